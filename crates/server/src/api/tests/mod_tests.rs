use super::*;
use async_trait::async_trait;
use hub::PushReceipt;
use shared::domain::Example;
use std::sync::Mutex;

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

struct FakeSink {
    outcome: fn() -> Result<PushReceipt, PushError>,
    calls: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakeSink {
    fn new(outcome: fn() -> Result<PushReceipt, PushError>) -> Self {
        Self {
            outcome,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<(String, Vec<u8>)> {
        self.calls.lock().expect("calls").clone()
    }
}

#[async_trait]
impl RemoteSink for FakeSink {
    async fn push_dataset(
        &self,
        target: &PushTarget,
        parquet_shard: Vec<u8>,
    ) -> Result<PushReceipt, PushError> {
        self.calls
            .lock()
            .expect("calls")
            .push((target.repo_id(), parquet_shard));
        (self.outcome)()
    }
}

fn accepted() -> Result<PushReceipt, PushError> {
    Ok(PushReceipt {
        repo_id: "alice/captions".into(),
        commit_url: Some("https://hub.test/commit/1".into()),
    })
}

fn rejected() -> Result<PushReceipt, PushError> {
    Err(PushError::Authentication("Invalid token".into()))
}

fn store() -> AnnotationStore {
    AnnotationStore::from_examples(vec![
        Example::new(PNG_MAGIC.to_vec(), "a cat"),
        Example::new(b"imgB".to_vec(), "a dog"),
        Example::new(b"imgC".to_vec(), "a bird"),
    ])
}

fn push_request(token: &str) -> PushRequest {
    PushRequest {
        username: "alice".into(),
        api_token: token.into(),
        repo_name: "captions".into(),
    }
}

#[test]
fn record_view_reports_position_and_image_route() {
    let view = record_view(&store(), 1).expect("view");
    assert_eq!(view.index, 1);
    assert_eq!(view.total, 3);
    assert_eq!(view.text, "a dog");
    assert!(!view.modified);
    assert_eq!(view.image_url, "/records/1/image");
}

#[test]
fn record_view_out_of_range_is_not_found() {
    let err = record_view(&store(), 3).expect_err("should fail");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[test]
fn submit_caption_tracks_changes() {
    let mut store = store();
    let outcome = submit_caption(&mut store, 1, "a small dog").expect("submit");
    assert_eq!(
        outcome,
        UpdateCaptionResponse {
            index: 1,
            changed: true,
            modified: true,
            modified_count: 1,
        }
    );

    let outcome = submit_caption(&mut store, 0, "a cat").expect("submit");
    assert!(!outcome.changed);
    assert!(!outcome.modified);
    assert_eq!(outcome.modified_count, 1);

    let view = record_view(&store, 1).expect("view");
    assert_eq!(view.text, "a small dog");
    assert_eq!(view.original_text, "a dog");
}

#[test]
fn summary_counts_modified_records() {
    let mut store = store();
    submit_caption(&mut store, 2, "a crow").expect("submit");
    let summary = summary(&store);
    assert_eq!(summary.modified, 1);
    assert_eq!(summary.total, 3);
    assert!((summary.modified_ratio - 1.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn push_with_blank_token_never_reaches_the_sink() {
    let sink = FakeSink::new(accepted);
    let err = push_to_hub(&store(), &sink, &push_request("  "))
        .await
        .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Validation);
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn push_sends_parquet_shard_of_current_captions() {
    let mut store = store();
    submit_caption(&mut store, 0, "a tabby cat").expect("submit");
    let sink = FakeSink::new(accepted);

    let response = push_to_hub(&store, &sink, &push_request("hf_secret"))
        .await
        .expect("push");
    assert_eq!(response.repo_id, "alice/captions");
    assert_eq!(response.rows, 3);

    let calls = sink.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "alice/captions");
    assert_eq!(calls[0].1, encode_dataset_parquet(&store).expect("encode"));
    assert!(calls[0].1.starts_with(b"PAR1"));
}

#[tokio::test]
async fn rejected_credential_leaves_store_intact() {
    let mut store = store();
    submit_caption(&mut store, 2, "a crow").expect("submit");
    let sink = FakeSink::new(rejected);

    let err = push_to_hub(&store, &sink, &push_request("hf_bad"))
        .await
        .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Unauthorized);
    assert_eq!(err.message, "Invalid token");
    assert_eq!(store.count_modified(), 1);
    assert_eq!(store.get(2).expect("record").text, "a crow");
}

#[test]
fn save_local_writes_requested_format() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output_dir = temp.path().join("out").display().to_string();

    let csv = save_local(
        &store(),
        &SaveRequest {
            output_dir: output_dir.clone(),
            format: ExportFormat::Csv,
        },
    )
    .expect("csv");
    assert!(csv.path.ends_with("all_captions.csv"));
    assert_eq!(csv.rows, 3);

    let parquet = save_local(
        &store(),
        &SaveRequest {
            output_dir,
            format: ExportFormat::Parquet,
        },
    )
    .expect("parquet");
    assert!(parquet.path.ends_with("modified_dataset.parquet"));
}

#[test]
fn save_local_classifies_failures() {
    let err = save_local(&store(), &SaveRequest::default()).expect_err("blank");
    assert_eq!(err.code, ErrorCode::Validation);

    let temp = tempfile::tempdir().expect("tempdir");
    let blocker = temp.path().join("file");
    std::fs::write(&blocker, b"x").expect("blocker");
    let err = save_local(
        &store(),
        &SaveRequest {
            output_dir: blocker.display().to_string(),
            format: ExportFormat::Csv,
        },
    )
    .expect_err("io");
    assert_eq!(err.code, ErrorCode::Io);
}

#[test]
fn image_mime_sniffs_known_formats() {
    assert_eq!(image_mime(PNG_MAGIC), "image/png");
    assert_eq!(image_mime(b"\xff\xd8\xff\xe0rest"), "image/jpeg");
    assert_eq!(image_mime(b"plain text"), "application/octet-stream");
}
