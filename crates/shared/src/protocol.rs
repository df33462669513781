use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ExportFormat;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordView {
    pub index: usize,
    pub total: usize,
    pub text: String,
    pub original_text: String,
    pub modified: bool,
    pub image_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCaptionRequest {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateCaptionResponse {
    pub index: usize,
    /// False when the submitted caption matched the stored one.
    pub changed: bool,
    pub modified: bool,
    pub modified_count: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SummaryView {
    pub modified: usize,
    pub total: usize,
    pub modified_ratio: f64,
}

impl SummaryView {
    pub fn new(modified: usize, total: usize) -> Self {
        let modified_ratio = if total == 0 {
            0.0
        } else {
            modified as f64 / total as f64
        };
        Self {
            modified,
            total,
            modified_ratio,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub repo_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    pub repo_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_url: Option<String>,
    pub rows: usize,
    pub pushed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaveRequest {
    #[serde(default)]
    pub output_dir: String,
    #[serde(default)]
    pub format: ExportFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveResponse {
    pub path: String,
    pub format: ExportFormat,
    pub rows: usize,
    pub saved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_ratio_handles_empty_store() {
        let summary = SummaryView::new(0, 0);
        assert_eq!(summary.modified_ratio, 0.0);
    }

    #[test]
    fn save_request_defaults_to_csv() {
        let req: SaveRequest =
            serde_json::from_str(r#"{"output_dir":"out"}"#).expect("save request");
        assert_eq!(req.format, ExportFormat::Csv);

        let req: SaveRequest =
            serde_json::from_str(r#"{"output_dir":"out","format":"parquet"}"#).expect("json");
        assert_eq!(req.format, ExportFormat::Parquet);
    }
}
