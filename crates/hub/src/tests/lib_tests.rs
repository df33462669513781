use super::*;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode as AxumStatus},
    routing::post,
    Json, Router,
};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Debug, Clone)]
struct RecordedCommit {
    namespace: String,
    repo: String,
    revision: String,
    content_type: Option<String>,
    body: String,
}

#[derive(Clone)]
struct FakeHubState {
    create_status: AxumStatus,
    commit_status: AxumStatus,
    create_calls: Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>,
    commits: Arc<Mutex<Vec<RecordedCommit>>>,
}

impl FakeHubState {
    fn new(create_status: AxumStatus, commit_status: AxumStatus) -> Self {
        Self {
            create_status,
            commit_status,
            create_calls: Arc::new(Mutex::new(Vec::new())),
            commits: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn handle_create(
    State(state): State<FakeHubState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> (AxumStatus, Json<serde_json::Value>) {
    state.create_calls.lock().await.push((bearer(&headers), body));
    let payload = if state.create_status.is_success() {
        serde_json::json!({ "url": "https://hub.test/datasets/alice/captions" })
    } else {
        serde_json::json!({ "error": "Invalid credentials in Authorization header" })
    };
    (state.create_status, Json(payload))
}

async fn handle_commit(
    State(state): State<FakeHubState>,
    Path((namespace, repo, revision)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: String,
) -> (AxumStatus, String) {
    state.commits.lock().await.push(RecordedCommit {
        namespace,
        repo,
        revision,
        content_type: headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    if state.commit_status.is_success() {
        (
            state.commit_status,
            serde_json::json!({
                "success": true,
                "commitOid": "abc123",
                "commitUrl": "https://hub.test/datasets/alice/captions/commit/abc123"
            })
            .to_string(),
        )
    } else {
        (state.commit_status, "storage backend unavailable".to_string())
    }
}

async fn spawn_fake_hub(state: FakeHubState) -> std::io::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new()
        .route("/api/repos/create", post(handle_create))
        .route(
            "/api/datasets/:namespace/:repo/commit/:revision",
            post(handle_commit),
        )
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

fn target() -> PushTarget {
    PushTarget::new("alice", "captions", "hf_secret").expect("target")
}

#[test]
fn blank_fields_fail_validation() {
    for (user, repo, token) in [
        ("", "captions", "hf_secret"),
        ("alice", "  ", "hf_secret"),
        ("alice", "captions", ""),
    ] {
        let err = PushTarget::new(user, repo, token).expect_err("should fail");
        assert!(matches!(err, PushError::Validation(_)));
    }
    assert!(matches!(
        PushTarget::new("alice", "org/captions", "hf_secret"),
        Err(PushError::Validation(_))
    ));
}

#[test]
fn debug_output_redacts_token() {
    let rendered = format!("{:?}", target());
    assert!(!rendered.contains("hf_secret"));
    assert!(rendered.contains("alice"));
    assert_eq!(target().repo_id(), "alice/captions");
}

#[test]
fn endpoint_path_is_kept_when_joining() {
    let client = HubClient::new("https://mirror.test/hub").expect("client");
    assert_eq!(client.endpoint().as_str(), "https://mirror.test/hub/");
    assert_eq!(
        client.url("api/repos/create").expect("url").as_str(),
        "https://mirror.test/hub/api/repos/create"
    );
}

#[tokio::test]
async fn push_creates_repo_and_commits_shard_and_card() {
    let state = FakeHubState::new(AxumStatus::OK, AxumStatus::OK);
    let endpoint = spawn_fake_hub(state.clone()).await.expect("fake hub");
    let client = HubClient::new(&endpoint).expect("client");

    let receipt = client
        .push_dataset(&target(), b"PAR1-shard".to_vec())
        .await
        .expect("push");
    assert_eq!(receipt.repo_id, "alice/captions");
    assert_eq!(
        receipt.commit_url.as_deref(),
        Some("https://hub.test/datasets/alice/captions/commit/abc123")
    );

    let creates = state.create_calls.lock().await.clone();
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0].0.as_deref(), Some("Bearer hf_secret"));
    assert_eq!(creates[0].1["type"], "dataset");
    assert_eq!(creates[0].1["name"], "captions");
    assert_eq!(creates[0].1["organization"], "alice");
    assert_eq!(creates[0].1["private"], false);

    let commits = state.commits.lock().await.clone();
    assert_eq!(commits.len(), 1);
    let commit = &commits[0];
    assert_eq!(
        (commit.namespace.as_str(), commit.repo.as_str(), commit.revision.as_str()),
        ("alice", "captions", "main")
    );
    assert_eq!(commit.content_type.as_deref(), Some("application/x-ndjson"));

    let lines: Vec<serde_json::Value> = commit
        .body
        .lines()
        .map(|line| serde_json::from_str(line).expect("ndjson line"))
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["key"], "header");
    assert_eq!(lines[0]["value"]["summary"], COMMIT_SUMMARY);
    assert_eq!(lines[1]["key"], "file");
    assert_eq!(lines[1]["value"]["path"], DATA_SHARD_PATH);
    assert_eq!(lines[1]["value"]["encoding"], "base64");
    let shard = STANDARD
        .decode(lines[1]["value"]["content"].as_str().expect("content"))
        .expect("base64");
    assert_eq!(shard, b"PAR1-shard");
    assert_eq!(lines[2]["value"]["path"], DATASET_CARD_PATH);
}

#[tokio::test]
async fn existing_repository_is_reused() {
    let state = FakeHubState::new(AxumStatus::CONFLICT, AxumStatus::OK);
    let endpoint = spawn_fake_hub(state.clone()).await.expect("fake hub");
    let client = HubClient::new(&endpoint).expect("client");

    client
        .push_dataset(&target(), b"shard".to_vec())
        .await
        .expect("push");
    assert_eq!(state.commits.lock().await.len(), 1);
}

#[tokio::test]
async fn rejected_token_is_an_authentication_error() {
    let state = FakeHubState::new(AxumStatus::UNAUTHORIZED, AxumStatus::OK);
    let endpoint = spawn_fake_hub(state.clone()).await.expect("fake hub");
    let client = HubClient::new(&endpoint).expect("client");

    let err = client
        .push_dataset(&target(), b"shard".to_vec())
        .await
        .expect_err("should fail");
    match err {
        PushError::Authentication(message) => {
            assert_eq!(message, "Invalid credentials in Authorization header")
        }
        other => panic!("expected authentication error, got {other:?}"),
    }
    assert!(state.commits.lock().await.is_empty());
}

#[tokio::test]
async fn failed_commit_is_a_remote_error() {
    let state = FakeHubState::new(AxumStatus::OK, AxumStatus::INTERNAL_SERVER_ERROR);
    let endpoint = spawn_fake_hub(state).await.expect("fake hub");
    let client = HubClient::new(&endpoint).expect("client");

    let err = client
        .push_dataset(&target(), b"shard".to_vec())
        .await
        .expect_err("should fail");
    match err {
        PushError::Remote(message) => assert!(message.contains("storage backend unavailable")),
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_hub_is_a_remote_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let client = HubClient::new(&format!("http://{addr}")).expect("client");
    let err = client
        .push_dataset(&target(), b"shard".to_vec())
        .await
        .expect_err("should fail");
    assert!(matches!(err, PushError::Remote(_)));
}
