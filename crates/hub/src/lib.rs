//! Upload of an exported dataset shard to a Hugging Face compatible hub.
//!
//! A push is two calls: create the dataset repository (an existing one is
//! fine), then commit the Parquet shard and a dataset card to `main`.

use std::fmt;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";
pub const DATA_SHARD_PATH: &str = "data/train-00000-of-00001.parquet";
pub const DATASET_CARD_PATH: &str = "README.md";

const DATASET_CARD: &str = "---\nconfigs:\n- config_name: default\n  data_files:\n  - split: train\n    path: data/train-*\n---\n";
const COMMIT_SUMMARY: &str = "Upload annotated captions";

#[derive(Debug, Error)]
pub enum PushError {
    #[error("{0}")]
    Validation(String),
    #[error("hub rejected the credential: {0}")]
    Authentication(String),
    #[error("hub request failed: {0}")]
    Remote(String),
}

/// Destination repository plus the token used to write to it. Constructing
/// one is the only way to reach the network, so blank input never leaves the
/// process.
#[derive(Clone)]
pub struct PushTarget {
    username: String,
    repo_name: String,
    token: String,
}

impl PushTarget {
    pub fn new(username: &str, repo_name: &str, token: &str) -> Result<Self, PushError> {
        let (username, repo_name, token) = (username.trim(), repo_name.trim(), token.trim());
        if username.is_empty() || repo_name.is_empty() || token.is_empty() {
            return Err(PushError::Validation(
                "username, API token and repository name are all required".into(),
            ));
        }
        if username.contains('/') || repo_name.contains('/') {
            return Err(PushError::Validation(
                "username and repository name must not contain '/'".into(),
            ));
        }
        Ok(Self {
            username: username.to_string(),
            repo_name: repo_name.to_string(),
            token: token.to_string(),
        })
    }

    pub fn repo_id(&self) -> String {
        format!("{}/{}", self.username, self.repo_name)
    }
}

impl fmt::Debug for PushTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushTarget")
            .field("username", &self.username)
            .field("repo_name", &self.repo_name)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReceipt {
    pub repo_id: String,
    pub commit_url: Option<String>,
}

#[async_trait]
pub trait RemoteSink: Send + Sync {
    async fn push_dataset(
        &self,
        target: &PushTarget,
        parquet_shard: Vec<u8>,
    ) -> Result<PushReceipt, PushError>;
}

#[derive(Debug, Serialize)]
struct CreateRepoRequest<'a> {
    name: &'a str,
    organization: &'a str,
    #[serde(rename = "type")]
    repo_type: &'a str,
    private: bool,
}

#[derive(Debug, Serialize)]
#[serde(tag = "key", content = "value", rename_all = "lowercase")]
enum CommitLine<'a> {
    Header {
        summary: &'a str,
        description: &'a str,
    },
    File {
        path: &'a str,
        content: String,
        encoding: &'a str,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    #[serde(default)]
    commit_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HubErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct HubClient {
    http: Client,
    endpoint: Url,
}

impl HubClient {
    pub fn new(endpoint: &str) -> Result<Self, url::ParseError> {
        let mut endpoint = Url::parse(endpoint.trim())?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, path: &str) -> Result<Url, PushError> {
        self.endpoint
            .join(path)
            .map_err(|err| PushError::Remote(format!("invalid hub url for '{path}': {err}")))
    }

    async fn create_repo(&self, target: &PushTarget) -> Result<(), PushError> {
        let response = self
            .http
            .post(self.url("api/repos/create")?)
            .bearer_auth(&target.token)
            .json(&CreateRepoRequest {
                name: &target.repo_name,
                organization: &target.username,
                repo_type: "dataset",
                private: false,
            })
            .send()
            .await
            .map_err(transport)?;

        if response.status() == StatusCode::CONFLICT {
            info!(repo_id = %target.repo_id(), "hub: dataset repository already exists");
            return Ok(());
        }
        check_status(response, "create repository").await?;
        info!(repo_id = %target.repo_id(), "hub: created dataset repository");
        Ok(())
    }

    async fn commit(
        &self,
        target: &PushTarget,
        parquet_shard: &[u8],
    ) -> Result<CommitResponse, PushError> {
        let lines = [
            CommitLine::Header {
                summary: COMMIT_SUMMARY,
                description: "",
            },
            CommitLine::File {
                path: DATA_SHARD_PATH,
                content: STANDARD.encode(parquet_shard),
                encoding: "base64",
            },
            CommitLine::File {
                path: DATASET_CARD_PATH,
                content: STANDARD.encode(DATASET_CARD),
                encoding: "base64",
            },
        ];
        let mut body = String::new();
        for line in &lines {
            let encoded = serde_json::to_string(line)
                .map_err(|err| PushError::Remote(format!("failed to encode commit: {err}")))?;
            body.push_str(&encoded);
            body.push('\n');
        }

        let path = format!(
            "api/datasets/{}/{}/commit/main",
            target.username, target.repo_name
        );
        let response = self
            .http
            .post(self.url(&path)?)
            .bearer_auth(&target.token)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(response, "commit").await?;

        let raw = response.text().await.map_err(transport)?;
        Ok(serde_json::from_str(&raw).unwrap_or_default())
    }
}

#[async_trait]
impl RemoteSink for HubClient {
    async fn push_dataset(
        &self,
        target: &PushTarget,
        parquet_shard: Vec<u8>,
    ) -> Result<PushReceipt, PushError> {
        self.create_repo(target).await?;
        let commit = self.commit(target, &parquet_shard).await?;
        info!(
            repo_id = %target.repo_id(),
            bytes = parquet_shard.len(),
            "hub: pushed dataset shard"
        );
        Ok(PushReceipt {
            repo_id: target.repo_id(),
            commit_url: commit.commit_url,
        })
    }
}

fn transport(err: reqwest::Error) -> PushError {
    PushError::Remote(err.to_string())
}

async fn check_status(response: Response, action: &str) -> Result<Response, PushError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let raw = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<HubErrorBody>(&raw)
        .map(|body| body.error)
        .unwrap_or_else(|_| raw.trim().to_string());
    let message = if message.is_empty() {
        status.to_string()
    } else {
        message
    };
    warn!(%status, action, "hub: request rejected");

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PushError::Authentication(message)),
        _ => Err(PushError::Remote(format!("{action} returned {status}: {message}"))),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
