use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{bail, Context};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, Response},
    routing::{get, post},
    Form, Json, Router,
};
use hub::HubClient;
use serde::Deserialize;
use shared::{
    domain::ExportFormat,
    error::{ApiError, ErrorCode},
    protocol::{PushRequest, SaveRequest, UpdateCaptionRequest},
};
use store::AnnotationStore;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, info, info_span};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;
mod pages;

use app_state::{AppState, Session, SessionRegistry};
use config::load_settings;
use pages::{render_page, FormEcho, Notice, Page};

type ApiRejection = (StatusCode, Json<ApiError>);

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CaptionForm {
    #[serde(default)]
    caption: String,
}

#[derive(Debug, Deserialize)]
struct PushForm {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    username: String,
    #[serde(default)]
    api_token: String,
    #[serde(default)]
    repo_name: String,
}

#[derive(Debug, Deserialize)]
struct SaveForm {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    output_dir: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();

    let (path, split) = (settings.dataset_path.clone(), settings.dataset_split.clone());
    let template = tokio::task::spawn_blocking(move || load_template(&path, &split)).await??;
    let remote = HubClient::new(&settings.hub_endpoint)
        .with_context(|| format!("invalid hub endpoint '{}'", settings.hub_endpoint))?;
    info!(endpoint = %remote.endpoint(), "hub client ready");

    let state = AppState {
        sessions: SessionRegistry::new(
            template,
            Duration::from_secs(settings.session_idle_seconds),
        ),
        remote: Arc::new(remote),
    };
    let app = build_router(Arc::new(state), settings.max_body_bytes);

    let addr: SocketAddr = settings
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.bind_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "annotator listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn load_template(path: &str, split: &str) -> anyhow::Result<AnnotationStore> {
    let source =
        dataset::open(path, split).with_context(|| format!("failed to open dataset '{path}'"))?;
    info!(dataset = %path, source = %source.describe(), "loading dataset");
    let store = AnnotationStore::load(source.examples()?)
        .with_context(|| format!("failed to load dataset '{path}'"))?;
    if store.is_empty() {
        bail!("dataset at '{path}' contains no records");
    }
    info!(records = store.len(), "dataset loaded");
    Ok(store)
}

fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/records/:index", post(submit_caption_form))
        .route("/records/:index/image", get(record_image))
        .route("/push", post(push_form))
        .route("/save", post(save_form))
        .route("/api/summary", get(api_summary))
        .route("/api/records/:index", get(api_record).put(api_update_record))
        .route("/api/export/hub", post(api_push))
        .route("/api/export/local", post(api_save))
        .route("/healthz", get(healthz))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> &'static str {
    let sessions = state.sessions.active_sessions().await;
    debug!(sessions, "health check");
    "ok"
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Remote => StatusCode::BAD_GATEWAY,
        ErrorCode::Io | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(err: ApiError) -> ApiRejection {
    (status_for(err.code), Json(err))
}

/// Renders the annotation page for `index`, clamped to the last record.
fn page(
    store: &AnnotationStore,
    index: usize,
    notice: Option<Notice>,
    echo: FormEcho,
) -> Result<Html<String>, ApiRejection> {
    let index = index.min(store.len().saturating_sub(1));
    let record = api::record_view(store, index).map_err(reject)?;
    Ok(Html(render_page(&Page {
        record: &record,
        summary: api::summary(store),
        notice,
        echo,
    })))
}

async fn index_page(session: Session, Query(query): Query<PageQuery>) -> Response {
    let store = session.store.lock().await;
    let rendered = page(&store, query.index.unwrap_or(0), None, FormEcho::default());
    session.attach(rendered)
}

async fn submit_caption_form(
    session: Session,
    Path(index): Path<usize>,
    Form(form): Form<CaptionForm>,
) -> Response {
    let submitted = normalize_newlines(&form.caption);
    let mut store = session.store.lock().await;
    let _span = info_span!("session", id = %session.id).entered();
    // browsers post textarea line breaks as CRLF whatever the stored caption used
    let caption = match store.get(index) {
        Ok(current) if normalize_newlines(current.text) == submitted => current.text.to_string(),
        _ => submitted,
    };
    let rendered = api::submit_caption(&mut store, index, &caption)
        .map_err(reject)
        .and_then(|outcome| {
            let notice = outcome
                .changed
                .then(|| Notice::success("Annotation updated successfully!"));
            page(&store, index, notice, FormEcho::default())
        });
    session.attach(rendered)
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

async fn push_form(
    State(state): State<Arc<AppState>>,
    session: Session,
    Form(form): Form<PushForm>,
) -> Response {
    let echo = FormEcho {
        username: form.username.clone(),
        repo_name: form.repo_name.clone(),
        ..FormEcho::default()
    };
    let store = session.store.lock().await;

    let filled = [&form.username, &form.api_token, &form.repo_name]
        .iter()
        .all(|field| !field.trim().is_empty());
    let notice = if !filled {
        Notice::error("Please fill in all the fields.")
    } else {
        let request = PushRequest {
            username: form.username,
            api_token: form.api_token,
            repo_name: form.repo_name,
        };
        match api::push_to_hub(&store, state.remote.as_ref(), &request).await {
            Ok(pushed) => {
                info!(repo_id = %pushed.repo_id, rows = pushed.rows, "dataset pushed");
                Notice::success("Dataset pushed to Hugging Face repository successfully!")
            }
            Err(err) => Notice::error(format!(
                "An error occurred while pushing the dataset: {}",
                err.message
            )),
        }
    };

    let rendered = page(&store, form.index, Some(notice), echo);
    session.attach(rendered)
}

async fn save_form(session: Session, Form(form): Form<SaveForm>) -> Response {
    let echo = FormEcho {
        output_dir: form.output_dir.clone(),
        ..FormEcho::default()
    };
    let store = session.store.lock().await;

    let notice = if form.output_dir.trim().is_empty() {
        Notice::error("Please enter an output directory.")
    } else {
        let request = SaveRequest {
            output_dir: form.output_dir,
            format: ExportFormat::Csv,
        };
        match api::save_local(&store, &request) {
            Ok(saved) => {
                info!(path = %saved.path, rows = saved.rows, "captions saved");
                Notice::success("Dataset saved as csv file successfully!")
            }
            Err(err) => Notice::error(format!(
                "An error occurred while saving the dataset: {}",
                err.message
            )),
        }
    };

    let rendered = page(&store, form.index, Some(notice), echo);
    session.attach(rendered)
}

async fn record_image(session: Session, Path(index): Path<usize>) -> Response {
    let image = session.store.lock().await.image(index);
    match image {
        Ok(bytes) => {
            let mime = api::image_mime(&bytes);
            session.attach(([(header::CONTENT_TYPE, mime)], Body::from(bytes.to_vec())))
        }
        Err(err) => session.attach(reject(ApiError::new(ErrorCode::NotFound, err.to_string()))),
    }
}

async fn api_summary(session: Session) -> Response {
    let summary = api::summary(&*session.store.lock().await);
    session.attach(Json(summary))
}

async fn api_record(session: Session, Path(index): Path<usize>) -> Response {
    let store = session.store.lock().await;
    let view = api::record_view(&store, index).map(Json).map_err(reject);
    session.attach(view)
}

async fn api_update_record(
    session: Session,
    Path(index): Path<usize>,
    Json(req): Json<UpdateCaptionRequest>,
) -> Response {
    let mut store = session.store.lock().await;
    let _span = info_span!("session", id = %session.id).entered();
    let outcome = api::submit_caption(&mut store, index, &req.text)
        .map(Json)
        .map_err(reject);
    session.attach(outcome)
}

async fn api_push(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(req): Json<PushRequest>,
) -> Response {
    let store = session.store.lock().await;
    let pushed = api::push_to_hub(&store, state.remote.as_ref(), &req)
        .await
        .map(Json)
        .map_err(reject);
    session.attach(pushed)
}

async fn api_save(session: Session, Json(req): Json<SaveRequest>) -> Response {
    let store = session.store.lock().await;
    let saved = api::save_local(&store, &req).map(Json).map_err(reject);
    session.attach(saved)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
