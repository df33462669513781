use std::fs;

use serde::Deserialize;
use tracing::warn;

const CONFIG_FILE: &str = "annotator.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub bind_addr: String,
    pub dataset_path: String,
    pub dataset_split: String,
    pub hub_endpoint: String,
    pub session_idle_seconds: u64,
    pub max_body_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8501".into(),
            dataset_path: "./data/dataset".into(),
            dataset_split: "train".into(),
            hub_endpoint: hub::DEFAULT_HUB_ENDPOINT.into(),
            session_idle_seconds: 4 * 60 * 60,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Defaults, then `annotator.toml` in the working directory, then the
/// environment. `APP__*` variables win over their short aliases.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(CONFIG_FILE) {
        if let Err(error) = apply_file(&mut settings, &raw) {
            warn!(file = CONFIG_FILE, %error, "ignoring unreadable config file");
        }
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());

    settings
}

pub(crate) fn apply_file(settings: &mut Settings, raw: &str) -> Result<(), toml::de::Error> {
    let table: toml::Table = toml::from_str(raw)?;
    let value = |key: &str| match table.get(key)? {
        toml::Value::String(v) => Some(v.clone()),
        toml::Value::Integer(v) => Some(v.to_string()),
        _ => None,
    };

    if let Some(v) = value("bind_addr") {
        settings.bind_addr = v;
    }
    if let Some(v) = value("dataset_path") {
        settings.dataset_path = v;
    }
    if let Some(v) = value("dataset_split") {
        settings.dataset_split = v;
    }
    if let Some(v) = value("hub_endpoint") {
        settings.hub_endpoint = v;
    }
    if let Some(v) = value("session_idle_seconds").and_then(|v| v.parse().ok()) {
        settings.session_idle_seconds = v;
    }
    if let Some(v) = value("max_body_bytes").and_then(|v| v.parse().ok()) {
        settings.max_body_bytes = v;
    }
    Ok(())
}

pub(crate) fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("ANNOTATOR_BIND") {
        settings.bind_addr = v;
    }
    if let Some(v) = lookup("APP__BIND_ADDR") {
        settings.bind_addr = v;
    }

    if let Some(v) = lookup("DATASET_PATH") {
        settings.dataset_path = v;
    }
    if let Some(v) = lookup("APP__DATASET_PATH") {
        settings.dataset_path = v;
    }

    if let Some(v) = lookup("APP__DATASET_SPLIT") {
        settings.dataset_split = v;
    }

    if let Some(v) = lookup("HF_ENDPOINT") {
        settings.hub_endpoint = v;
    }
    if let Some(v) = lookup("APP__HUB_ENDPOINT") {
        settings.hub_endpoint = v;
    }

    if let Some(v) = lookup("APP__SESSION_IDLE_SECONDS") {
        match v.parse() {
            Ok(parsed) => settings.session_idle_seconds = parsed,
            Err(_) => warn!(value = %v, "ignoring invalid APP__SESSION_IDLE_SECONDS"),
        }
    }
    if let Some(v) = lookup("APP__MAX_BODY_BYTES") {
        match v.parse() {
            Ok(parsed) => settings.max_body_bytes = parsed,
            Err(_) => warn!(value = %v, "ignoring invalid APP__MAX_BODY_BYTES"),
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
