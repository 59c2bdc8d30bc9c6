pub mod channel;
pub mod config;
pub mod doctor;
pub mod migrate;
pub mod queue;
pub mod repo;
pub mod user;
pub mod workspace;

use std::future::Future;

use prsync_core::config::{AppConfig, LoadOptions};
use prsync_db::{connect_with_settings, migrations, DbPool};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    fn from_step(command: &str, error: StepError) -> Self {
        Self::failure(command, error.class, error.message, error.exit_code)
    }
}

/// A failed command step, already mapped to its error class and exit code.
#[derive(Debug)]
pub(crate) struct StepError {
    class: &'static str,
    message: String,
    exit_code: u8,
}

impl StepError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self { class: "invalid_argument", message: message.into(), exit_code: 6 }
    }

    pub(crate) fn persistence(error: impl std::fmt::Display) -> Self {
        Self { class: "persistence", message: error.to_string(), exit_code: 7 }
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self { class: "not_found", message: message.into(), exit_code: 8 }
    }
}

/// Loads config, opens a migrated pool, and runs `action` on a single-threaded
/// runtime. Admin commands share this so they never write to an unmigrated schema.
pub(crate) fn with_database<F, Fut>(command: &str, action: F) -> CommandResult
where
    F: FnOnce(DbPool) -> Fut,
    Fut: Future<Output = Result<String, StepError>>,
{
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| StepError {
            class: "db_connectivity",
            message: error.to_string(),
            exit_code: 4,
        })?;
        migrations::run_pending(&pool).await.map_err(|error| StepError {
            class: "migration",
            message: error.to_string(),
            exit_code: 5,
        })?;

        let outcome = action(pool.clone()).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(message) => CommandResult::success(command, message),
        Err(error) => CommandResult::from_step(command, error),
    }
}

pub(crate) fn required(field: &str, value: &str) -> Result<String, StepError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StepError::invalid_argument(format!("`{field}` must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
