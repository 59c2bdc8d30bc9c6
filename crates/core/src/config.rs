use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reaction::ReactionVocabulary;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub github: GitHubConfig,
    pub slack: SlackConfig,
    pub worker: WorkerConfig,
    pub reactions: ReactionVocabulary,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct GitHubConfig {
    pub webhook_secret: SecretString,
    pub api_token: Option<SecretString>,
    pub api_base_url: String,
    /// Host matched when scanning chat messages for pull request links.
    pub web_host: String,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub signing_secret: SecretString,
    pub api_base_url: String,
    pub request_tolerance_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub job_deadline_secs: u64,
    pub max_retries: u32,
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    pub claim_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub github_webhook_secret: Option<String>,
    pub github_api_token: Option<String>,
    pub slack_signing_secret: Option<String>,
    pub worker_concurrency: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://prsync.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            github: GitHubConfig {
                webhook_secret: String::new().into(),
                api_token: None,
                api_base_url: "https://api.github.com".to_string(),
                web_host: crate::links::DEFAULT_WEB_HOST.to_string(),
            },
            slack: SlackConfig {
                signing_secret: String::new().into(),
                api_base_url: "https://slack.com/api".to_string(),
                request_tolerance_secs: crate::signature::DEFAULT_SLACK_TOLERANCE_SECS.unsigned_abs(),
            },
            worker: WorkerConfig {
                job_deadline_secs: 300,
                max_retries: 5,
                concurrency: 4,
                poll_interval_ms: 500,
                retry_base_delay_secs: 5,
                retry_max_delay_secs: 600,
                claim_timeout_secs: 900,
            },
            reactions: ReactionVocabulary::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("prsync.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(github) = patch.github {
            if let Some(webhook_secret) = github.webhook_secret {
                self.github.webhook_secret = secret_value(webhook_secret);
            }
            if let Some(api_token) = github.api_token {
                self.github.api_token = Some(secret_value(api_token));
            }
            if let Some(api_base_url) = github.api_base_url {
                self.github.api_base_url = api_base_url;
            }
            if let Some(web_host) = github.web_host {
                self.github.web_host = web_host;
            }
        }

        if let Some(slack) = patch.slack {
            if let Some(signing_secret) = slack.signing_secret {
                self.slack.signing_secret = secret_value(signing_secret);
            }
            if let Some(api_base_url) = slack.api_base_url {
                self.slack.api_base_url = api_base_url;
            }
            if let Some(request_tolerance_secs) = slack.request_tolerance_secs {
                self.slack.request_tolerance_secs = request_tolerance_secs;
            }
        }

        if let Some(worker) = patch.worker {
            if let Some(job_deadline_secs) = worker.job_deadline_secs {
                self.worker.job_deadline_secs = job_deadline_secs;
            }
            if let Some(max_retries) = worker.max_retries {
                self.worker.max_retries = max_retries;
            }
            if let Some(concurrency) = worker.concurrency {
                self.worker.concurrency = concurrency;
            }
            if let Some(poll_interval_ms) = worker.poll_interval_ms {
                self.worker.poll_interval_ms = poll_interval_ms;
            }
            if let Some(retry_base_delay_secs) = worker.retry_base_delay_secs {
                self.worker.retry_base_delay_secs = retry_base_delay_secs;
            }
            if let Some(retry_max_delay_secs) = worker.retry_max_delay_secs {
                self.worker.retry_max_delay_secs = retry_max_delay_secs;
            }
            if let Some(claim_timeout_secs) = worker.claim_timeout_secs {
                self.worker.claim_timeout_secs = claim_timeout_secs;
            }
        }

        if let Some(reactions) = patch.reactions {
            let vocabulary = &mut self.reactions;
            for (slot, value) in [
                (&mut vocabulary.approved, reactions.approved),
                (&mut vocabulary.changes_requested, reactions.changes_requested),
                (&mut vocabulary.commented, reactions.commented),
                (&mut vocabulary.closed, reactions.closed),
                (&mut vocabulary.merged, reactions.merged),
                (&mut vocabulary.delete, reactions.delete),
            ] {
                if let Some(value) = value {
                    *slot = value;
                }
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PRSYNC_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PRSYNC_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("PRSYNC_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PRSYNC_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("PRSYNC_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PRSYNC_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PRSYNC_SERVER_PORT") {
            self.server.port = parse_env("PRSYNC_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PRSYNC_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("PRSYNC_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("PRSYNC_GITHUB_WEBHOOK_SECRET") {
            self.github.webhook_secret = secret_value(value);
        }
        if let Some(value) = read_env("PRSYNC_GITHUB_API_TOKEN") {
            self.github.api_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("PRSYNC_GITHUB_API_BASE_URL") {
            self.github.api_base_url = value;
        }
        if let Some(value) = read_env("PRSYNC_GITHUB_WEB_HOST") {
            self.github.web_host = value;
        }

        if let Some(value) = read_env("PRSYNC_SLACK_SIGNING_SECRET") {
            self.slack.signing_secret = secret_value(value);
        }
        if let Some(value) = read_env("PRSYNC_SLACK_API_BASE_URL") {
            self.slack.api_base_url = value;
        }
        if let Some(value) = read_env("PRSYNC_SLACK_REQUEST_TOLERANCE_SECS") {
            self.slack.request_tolerance_secs =
                parse_env("PRSYNC_SLACK_REQUEST_TOLERANCE_SECS", &value)?;
        }

        if let Some(value) = read_env("PRSYNC_WORKER_JOB_DEADLINE_SECS") {
            self.worker.job_deadline_secs = parse_env("PRSYNC_WORKER_JOB_DEADLINE_SECS", &value)?;
        }
        if let Some(value) = read_env("PRSYNC_WORKER_MAX_RETRIES") {
            self.worker.max_retries = parse_env("PRSYNC_WORKER_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("PRSYNC_WORKER_CONCURRENCY") {
            self.worker.concurrency = parse_env("PRSYNC_WORKER_CONCURRENCY", &value)?;
        }

        let log_level = read_env("PRSYNC_LOGGING_LEVEL").or_else(|| read_env("PRSYNC_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PRSYNC_LOGGING_FORMAT").or_else(|| read_env("PRSYNC_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(webhook_secret) = overrides.github_webhook_secret {
            self.github.webhook_secret = secret_value(webhook_secret);
        }
        if let Some(api_token) = overrides.github_api_token {
            self.github.api_token = Some(secret_value(api_token));
        }
        if let Some(signing_secret) = overrides.slack_signing_secret {
            self.slack.signing_secret = secret_value(signing_secret);
        }
        if let Some(concurrency) = overrides.worker_concurrency {
            self.worker.concurrency = concurrency;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_github(&self.github)?;
        validate_slack(&self.slack)?;
        validate_worker(&self.worker)?;
        validate_reactions(&self.reactions)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("prsync.toml"), PathBuf::from("config/prsync.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_github(github: &GitHubConfig) -> Result<(), ConfigError> {
    if github.webhook_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "github.webhook_secret is required. Set it to the secret configured on the repository or organization webhook".to_string(),
        ));
    }

    if !is_http_url(&github.api_base_url) {
        return Err(ConfigError::Validation(
            "github.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    let host = github.web_host.trim();
    if host.is_empty() || host.contains('/') {
        return Err(ConfigError::Validation(
            "github.web_host must be a bare host name such as `github.com`".to_string(),
        ));
    }

    Ok(())
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let signing_secret = slack.signing_secret.expose_secret();
    if signing_secret.trim().is_empty() {
        return Err(ConfigError::Validation(
            "slack.signing_secret is required. Get it from https://api.slack.com/apps > Your App > Basic Information > Signing Secret".to_string(),
        ));
    }
    if signing_secret.starts_with("xoxb-") || signing_secret.starts_with("xapp-") {
        return Err(ConfigError::Validation(
            "slack.signing_secret looks like a token (hint: bot tokens are stored per workspace installation, not in config)".to_string(),
        ));
    }

    if !is_http_url(&slack.api_base_url) {
        return Err(ConfigError::Validation(
            "slack.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if slack.request_tolerance_secs == 0 || slack.request_tolerance_secs > 3600 {
        return Err(ConfigError::Validation(
            "slack.request_tolerance_secs must be in range 1..=3600".to_string(),
        ));
    }

    Ok(())
}

fn validate_worker(worker: &WorkerConfig) -> Result<(), ConfigError> {
    if worker.job_deadline_secs == 0 {
        return Err(ConfigError::Validation(
            "worker.job_deadline_secs must be greater than zero".to_string(),
        ));
    }
    if worker.concurrency == 0 || worker.concurrency > 64 {
        return Err(ConfigError::Validation(
            "worker.concurrency must be in range 1..=64".to_string(),
        ));
    }
    if worker.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "worker.poll_interval_ms must be greater than zero".to_string(),
        ));
    }
    if worker.retry_base_delay_secs > worker.retry_max_delay_secs {
        return Err(ConfigError::Validation(
            "worker.retry_base_delay_secs must not exceed worker.retry_max_delay_secs".to_string(),
        ));
    }
    if worker.claim_timeout_secs <= worker.job_deadline_secs {
        return Err(ConfigError::Validation(
            "worker.claim_timeout_secs must be longer than worker.job_deadline_secs".to_string(),
        ));
    }

    Ok(())
}

fn validate_reactions(reactions: &ReactionVocabulary) -> Result<(), ConfigError> {
    let mut names = reactions.managed();
    if names.len() != 5 {
        return Err(ConfigError::Validation(
            "reactions must map each review outcome and terminal state to a distinct emoji"
                .to_string(),
        ));
    }
    if !names.insert(crate::reaction::normalize_reaction(&reactions.delete)) {
        return Err(ConfigError::Validation(
            "reactions.delete must differ from every status reaction".to_string(),
        ));
    }
    if names.iter().any(|name| name.is_empty()) {
        return Err(ConfigError::Validation("reaction names must not be empty".to_string()));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    github: Option<GitHubPatch>,
    slack: Option<SlackPatch>,
    worker: Option<WorkerPatch>,
    reactions: Option<ReactionsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GitHubPatch {
    webhook_secret: Option<String>,
    api_token: Option<String>,
    api_base_url: Option<String>,
    web_host: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    signing_secret: Option<String>,
    api_base_url: Option<String>,
    request_tolerance_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkerPatch {
    job_deadline_secs: Option<u64>,
    max_retries: Option<u32>,
    concurrency: Option<usize>,
    poll_interval_ms: Option<u64>,
    retry_base_delay_secs: Option<u64>,
    retry_max_delay_secs: Option<u64>,
    claim_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ReactionsPatch {
    approved: Option<String>,
    changes_requested: Option<String>,
    commented: Option<String>,
    closed: Option<String>,
    merged: Option<String>,
    delete: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
