use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use prsync_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let fields: Vec<(&str, String, &str)> = vec![
        ("database.url", config.database.url.clone(), "PRSYNC_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "PRSYNC_DATABASE_MAX_CONNECTIONS",
        ),
        ("database.timeout_secs", config.database.timeout_secs.to_string(), "PRSYNC_DATABASE_TIMEOUT_SECS"),
        ("server.bind_address", config.server.bind_address.clone(), "PRSYNC_SERVER_BIND_ADDRESS"),
        ("server.port", config.server.port.to_string(), "PRSYNC_SERVER_PORT"),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            "PRSYNC_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        (
            "github.webhook_secret",
            redact_secret(Some(&config.github.webhook_secret)),
            "PRSYNC_GITHUB_WEBHOOK_SECRET",
        ),
        ("github.api_token", redact_secret(config.github.api_token.as_ref()), "PRSYNC_GITHUB_API_TOKEN"),
        ("github.api_base_url", config.github.api_base_url.clone(), "PRSYNC_GITHUB_API_BASE_URL"),
        ("github.web_host", config.github.web_host.clone(), "PRSYNC_GITHUB_WEB_HOST"),
        (
            "slack.signing_secret",
            redact_secret(Some(&config.slack.signing_secret)),
            "PRSYNC_SLACK_SIGNING_SECRET",
        ),
        ("slack.api_base_url", config.slack.api_base_url.clone(), "PRSYNC_SLACK_API_BASE_URL"),
        (
            "slack.request_tolerance_secs",
            config.slack.request_tolerance_secs.to_string(),
            "PRSYNC_SLACK_REQUEST_TOLERANCE_SECS",
        ),
        (
            "worker.job_deadline_secs",
            config.worker.job_deadline_secs.to_string(),
            "PRSYNC_WORKER_JOB_DEADLINE_SECS",
        ),
        ("worker.max_retries", config.worker.max_retries.to_string(), "PRSYNC_WORKER_MAX_RETRIES"),
        ("worker.concurrency", config.worker.concurrency.to_string(), "PRSYNC_WORKER_CONCURRENCY"),
        ("logging.level", config.logging.level.clone(), "PRSYNC_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "PRSYNC_LOGGING_FORMAT"),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        fields
            .into_iter()
            .map(|(key, value, env_key)| render_line(key, &value, source(key, env_key))),
    );
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    ["prsync.toml", "config/prsync.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
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

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps a recognizable token prefix (`ghp_`, `xoxb-`) and hides the rest.
fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.find(['-', '_']) {
        Some(index) if index <= 4 => format!("{}***", &trimmed[..=index]),
        _ => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use toml::Value;

    use super::{contains_path, redact_secret};

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[test]
    fn redaction_keeps_only_short_token_prefixes() {
        assert_eq!(redact_secret(Some(&secret("ghp_abcdef123"))), "ghp_***");
        assert_eq!(redact_secret(Some(&secret("xoxb-123-456"))), "xoxb-***");
        assert_eq!(redact_secret(Some(&secret("webhook-shared-secret"))), "<redacted>");
        assert_eq!(redact_secret(Some(&secret("  "))), "<empty>");
        assert_eq!(redact_secret(None), "<unset>");
    }

    #[test]
    fn nested_key_paths_are_resolved_in_toml_documents() {
        let doc: Value = "[github]\nweb_host = \"ghe.example.com\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "github.web_host"));
        assert!(!contains_path(&doc, "github.api_token"));
        assert!(!contains_path(&doc, "slack.signing_secret"));
    }
}
