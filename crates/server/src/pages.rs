//! Server-rendered annotation page.

use std::f64::consts::{FRAC_PI_2, PI, TAU};

use shared::protocol::{RecordView, SummaryView};

const TITLE: &str = "Image Caption Annotation App";
const MODIFIED_COLOR: &str = "#66b3ff";
const NOT_MODIFIED_COLOR: &str = "#ff9999";
const MODIFIED_SLICE_OFFSET: f64 = 0.1;

const STYLE: &str = "body{font-family:sans-serif;max-width:960px;margin:2rem auto;padding:0 1rem}\
.columns{display:grid;grid-template-columns:repeat(3,1fr);gap:1.5rem}\
.columns form label{display:block;margin:.4rem 0}\
.notice{padding:.6rem .8rem;border-radius:4px;margin:1rem 0}\
.notice.success{background:#e6f4ea}.notice.error{background:#fce8e6}\
.notice.info{background:#e8f0fe}.notice.warning{background:#fef7e0}\
.record img{max-width:100%;display:block;margin:1rem 0}\
.record textarea{width:100%;height:200px}\
.legend span{display:inline-block;width:.8em;height:.8em;margin-right:.3em}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NoticeKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Notice {
    pub(crate) kind: NoticeKind,
    pub(crate) message: String,
}

impl Notice {
    pub(crate) fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.into(),
        }
    }

    pub(crate) fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: message.into(),
        }
    }
}

/// Values typed into the export panels, shown again after a submit. The API
/// token is never echoed back.
#[derive(Debug, Clone, Default)]
pub(crate) struct FormEcho {
    pub(crate) username: String,
    pub(crate) repo_name: String,
    pub(crate) output_dir: String,
}

pub(crate) struct Page<'a> {
    pub(crate) record: &'a RecordView,
    pub(crate) summary: SummaryView,
    pub(crate) notice: Option<Notice>,
    pub(crate) echo: FormEcho,
}

pub(crate) fn render_page(page: &Page<'_>) -> String {
    let record = page.record;
    let summary = &page.summary;
    let index = record.index;
    let last_index = record.total.saturating_sub(1);

    let notice = page
        .notice
        .as_ref()
        .map(|notice| {
            let class = match notice.kind {
                NoticeKind::Success => "success",
                NoticeKind::Error => "error",
            };
            format!(
                r#"<div class="notice {class}">{}</div>"#,
                escape_html(&notice.message)
            )
        })
        .unwrap_or_default();

    let status = if record.modified {
        r#"<div class="notice warning">This image has been modified.</div>"#
    } else {
        r#"<div class="notice info">This image has not been modified.</div>"#
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{TITLE}</title>
<style>{STYLE}</style>
</head>
<body>
<h1>{TITLE}</h1>
{notice}
<div class="columns">
  <section class="summary">
    <p>Modified: {modified} / {total}</p>
    {chart}
    <p class="legend"><span style="background:{MODIFIED_COLOR}"></span>Modified {modified_pct:.1}%
      <span style="background:{NOT_MODIFIED_COLOR}"></span>Not modified {unmodified_pct:.1}%</p>
  </section>
  <section class="push">
    <p>Push to Hugging Face Repository</p>
    <form method="post" action="/push">
      <input type="hidden" name="index" value="{index}">
      <label>Username <input type="text" name="username" value="{username}"></label>
      <label>API Token <input type="password" name="api_token" autocomplete="off"></label>
      <label>Repository Name <input type="text" name="repo_name" value="{repo_name}"></label>
      <button type="submit">Push</button>
    </form>
  </section>
  <section class="save">
    <p>Save as Local CSV File</p>
    <form method="post" action="/save">
      <input type="hidden" name="index" value="{index}">
      <label>Output Directory <input type="text" name="output_dir" value="{output_dir}"></label>
      <button type="submit">Save</button>
    </form>
  </section>
</div>
<form method="get" action="/" class="selector">
  <label>Select an image <input type="number" name="index" min="0" max="{last_index}" step="1" value="{index}"></label>
  <button type="submit">Go</button>
</form>
<p>Image {position} of {total}</p>
<form method="post" action="/records/{index}" class="record">
  <img src="{image_url}" alt="Image">
  <label>Caption<textarea name="caption">
{caption}</textarea></label>
  {status}
  <button type="submit">Submit</button>
</form>
</body>
</html>
"#,
        modified = summary.modified,
        total = summary.total,
        chart = pie_chart_svg(summary),
        modified_pct = summary.modified_ratio * 100.0,
        unmodified_pct = if summary.total == 0 {
            0.0
        } else {
            100.0 - summary.modified_ratio * 100.0
        },
        username = escape_html(&page.echo.username),
        repo_name = escape_html(&page.echo.repo_name),
        output_dir = escape_html(&page.echo.output_dir),
        position = index + 1,
        image_url = escape_html(&record.image_url),
        caption = escape_html(&record.text),
    )
}

/// Two-slice pie of modified vs. untouched records. Slices run
/// counter-clockwise from twelve o'clock; the modified slice is pulled out
/// slightly.
pub(crate) fn pie_chart_svg(summary: &SummaryView) -> String {
    let ratio = summary.modified_ratio.clamp(0.0, 1.0);
    let body = if summary.total == 0 || ratio <= 0.0 {
        format!(r#"<circle r="1" fill="{NOT_MODIFIED_COLOR}"/>"#)
    } else if ratio >= 1.0 {
        format!(r#"<circle r="1" fill="{MODIFIED_COLOR}"/>"#)
    } else {
        let start = FRAC_PI_2;
        let split = start + TAU * ratio;
        let middle = start + PI * ratio;
        let modified = slice(start, split, ratio > 0.5, MODIFIED_COLOR);
        let rest = slice(split, start + TAU, ratio < 0.5, NOT_MODIFIED_COLOR);
        format!(
            r#"<g transform="translate({:.4} {:.4})">{modified}</g>{rest}"#,
            MODIFIED_SLICE_OFFSET * middle.cos(),
            -MODIFIED_SLICE_OFFSET * middle.sin(),
        )
    };
    format!(
        r#"<svg class="pie" viewBox="-1.2 -1.2 2.4 2.4" width="200" height="200" role="img" aria-label="Modified {:.1}%">{body}</svg>"#,
        ratio * 100.0
    )
}

fn slice(from: f64, to: f64, large_arc: bool, color: &str) -> String {
    let (x0, y0) = (from.cos(), -from.sin());
    let (x1, y1) = (to.cos(), -to.sin());
    format!(
        r#"<path d="M 0 0 L {x0:.4} {y0:.4} A 1 1 0 {} 0 {x1:.4} {y1:.4} Z" fill="{color}"/>"#,
        u8::from(large_arc)
    )
}

pub(crate) fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
