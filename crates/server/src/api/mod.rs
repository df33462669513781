use chrono::Utc;
use hub::{PushError, PushTarget, RemoteSink};
use shared::{
    domain::ExportFormat,
    error::{ApiError, ErrorCode},
    protocol::{
        PushRequest, PushResponse, RecordView, SaveRequest, SaveResponse, SummaryView,
        UpdateCaptionResponse,
    },
};
use store::{
    encode_dataset_parquet, save_captions_csv, save_dataset_parquet, AnnotationStore, ExportError,
    StoreError,
};
use tracing::{info, warn};

pub fn image_route(index: usize) -> String {
    format!("/records/{index}/image")
}

pub fn record_view(store: &AnnotationStore, index: usize) -> Result<RecordView, ApiError> {
    let record = store.get(index).map_err(not_found)?;
    let original_text = store.original_text(index).map_err(not_found)?;
    Ok(RecordView {
        index,
        total: store.len(),
        text: record.text.to_string(),
        original_text: original_text.to_string(),
        modified: record.modified,
        image_url: image_route(index),
    })
}

pub fn submit_caption(
    store: &mut AnnotationStore,
    index: usize,
    text: &str,
) -> Result<UpdateCaptionResponse, ApiError> {
    let changed = store.update(index, text).map_err(not_found)?;
    if changed {
        info!(index, "caption updated");
    }
    Ok(UpdateCaptionResponse {
        index,
        changed,
        modified: store.get(index).map_err(not_found)?.modified,
        modified_count: store.count_modified(),
    })
}

pub fn summary(store: &AnnotationStore) -> SummaryView {
    SummaryView::new(store.count_modified(), store.len())
}

pub async fn push_to_hub(
    store: &AnnotationStore,
    remote: &dyn RemoteSink,
    req: &PushRequest,
) -> Result<PushResponse, ApiError> {
    let target = PushTarget::new(&req.username, &req.repo_name, &req.api_token)
        .map_err(push_error)?;
    let shard = encode_dataset_parquet(store)
        .map_err(|err| ApiError::new(ErrorCode::Remote, err.to_string()))?;

    let receipt = remote.push_dataset(&target, shard).await.map_err(|err| {
        warn!(repo_id = %target.repo_id(), error = %err, "push to hub failed");
        push_error(err)
    })?;
    Ok(PushResponse {
        repo_id: receipt.repo_id,
        commit_url: receipt.commit_url,
        rows: store.len(),
        pushed_at: Utc::now(),
    })
}

pub fn save_local(store: &AnnotationStore, req: &SaveRequest) -> Result<SaveResponse, ApiError> {
    let saved = match req.format {
        ExportFormat::Csv => save_captions_csv(store, &req.output_dir),
        ExportFormat::Parquet => save_dataset_parquet(store, &req.output_dir),
    };
    let path = saved.map_err(|err| {
        if !err.is_validation() {
            warn!(output_dir = %req.output_dir, error = %err, "local export failed");
        }
        export_error(err)
    })?;
    Ok(SaveResponse {
        path: path.display().to_string(),
        format: req.format,
        rows: store.len(),
        saved_at: Utc::now(),
    })
}

/// Content type for an encoded image, sniffed from its magic bytes.
pub fn image_mime(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream")
}

fn not_found(err: StoreError) -> ApiError {
    ApiError::new(ErrorCode::NotFound, err.to_string())
}

fn push_error(err: PushError) -> ApiError {
    match err {
        PushError::Validation(message) => ApiError::new(ErrorCode::Validation, message),
        PushError::Authentication(message) => ApiError::new(ErrorCode::Unauthorized, message),
        PushError::Remote(message) => ApiError::new(ErrorCode::Remote, message),
    }
}

fn export_error(err: ExportError) -> ApiError {
    let code = if err.is_validation() {
        ErrorCode::Validation
    } else {
        ErrorCode::Io
    };
    ApiError::new(code, err.to_string())
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
