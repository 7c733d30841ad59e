use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use serde::Serialize;
use toml::Value;

use crate::commands::{load_config, CommandResult};

#[derive(Debug, Serialize)]
struct ConfigEntry {
    key: &'static str,
    value: String,
    source: String,
}

struct FileContext {
    path: Option<PathBuf>,
    doc: Option<Value>,
}

pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let path = detect_config_path();
    let file = FileContext { doc: load_config_file_doc(path.as_deref()), path };
    let api_token = config
        .server
        .api_token
        .as_ref()
        .map(|token| redact_token(token.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    let entries = vec![
        entry(&file, "database.url", config.database.url.clone(), &["CAPFLOW_DATABASE_URL"]),
        entry(
            &file,
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["CAPFLOW_DATABASE_MAX_CONNECTIONS"],
        ),
        entry(
            &file,
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["CAPFLOW_DATABASE_TIMEOUT_SECS"],
        ),
        entry(
            &file,
            "server.bind_address",
            config.server.bind_address.clone(),
            &["CAPFLOW_SERVER_BIND_ADDRESS"],
        ),
        entry(&file, "server.port", config.server.port.to_string(), &["CAPFLOW_SERVER_PORT"]),
        entry(
            &file,
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["CAPFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        entry(&file, "server.api_token", api_token, &["CAPFLOW_SERVER_API_TOKEN"]),
        entry(
            &file,
            "workflow.max_approvers",
            config.workflow.max_approvers.to_string(),
            &["CAPFLOW_WORKFLOW_MAX_APPROVERS"],
        ),
        entry(
            &file,
            "workflow.max_version_depth",
            config.workflow.max_version_depth.to_string(),
            &["CAPFLOW_WORKFLOW_MAX_VERSION_DEPTH"],
        ),
        entry(
            &file,
            "logging.level",
            config.logging.level.clone(),
            &["CAPFLOW_LOGGING_LEVEL"],
        ),
        entry(
            &file,
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            &["CAPFLOW_LOGGING_FORMAT"],
        ),
    ];

    CommandResult::success_with(
        "config",
        "effective config (source precedence: env > file > default)",
        Some(entries),
    )
}

fn entry(file: &FileContext, key: &'static str, value: String, env_keys: &[&str]) -> ConfigEntry {
    ConfigEntry { key, value, source: field_source(key, env_keys, file) }
}

fn detect_config_path() -> Option<PathBuf> {
    ["capflow.toml", "config/capflow.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(key_path: &str, env_keys: &[&str], file: &FileContext) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = &file.doc {
        if contains_path(doc, key_path) {
            let file_path = file
                .path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    let prefix: String = trimmed.chars().take(4).collect();
    format!("{prefix}***")
}
