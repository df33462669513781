use std::{
    collections::HashMap,
    convert::Infallible,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use hub::RemoteSink;
use shared::domain::SessionId;
use store::AnnotationStore;
use tokio::sync::Mutex;
use tracing::info;

pub(crate) const SESSION_COOKIE: &str = "annotator_session";

pub(crate) struct AppState {
    pub(crate) sessions: SessionRegistry,
    pub(crate) remote: Arc<dyn RemoteSink>,
}

struct SessionEntry {
    store: Arc<Mutex<AnnotationStore>>,
    last_seen: Instant,
}

/// Every session starts from a clone of the store built at startup; the
/// dataset itself is never read again.
pub(crate) struct SessionRegistry {
    template: AnnotationStore,
    idle_timeout: Duration,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    pub(crate) fn new(template: AnnotationStore, idle_timeout: Duration) -> Self {
        Self {
            template,
            idle_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn resolve(&self, requested: Option<SessionId>) -> Session {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;

        let before = sessions.len();
        sessions.retain(|_, entry| now.duration_since(entry.last_seen) < self.idle_timeout);
        if sessions.len() < before {
            info!(expired = before - sessions.len(), "dropped idle sessions");
        }

        if let Some(id) = requested {
            if let Some(entry) = sessions.get_mut(&id) {
                entry.last_seen = now;
                return Session {
                    id,
                    store: entry.store.clone(),
                    is_new: false,
                };
            }
        }

        let id = SessionId::new();
        let store = Arc::new(Mutex::new(self.template.clone()));
        sessions.insert(
            id,
            SessionEntry {
                store: store.clone(),
                last_seen: now,
            },
        );
        info!(session = %id, records = self.template.len(), "started annotation session");
        Session {
            id,
            store,
            is_new: true,
        }
    }

    pub(crate) async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

/// The caller's session, created on first access.
pub(crate) struct Session {
    pub(crate) id: SessionId,
    pub(crate) store: Arc<Mutex<AnnotationStore>>,
    is_new: bool,
}

impl Session {
    /// Adds the session cookie to `response` when the session was just created.
    pub(crate) fn attach(&self, response: impl IntoResponse) -> Response {
        let mut response = response.into_response();
        if self.is_new {
            let cookie = format!(
                "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax",
                self.id
            );
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
        }
        response
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Session {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let requested = session_cookie(&parts.headers);
        Ok(state.sessions.resolve(requested).await)
    }
}

pub(crate) fn session_cookie(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| SessionId::parse(value))
}
