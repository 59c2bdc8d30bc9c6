use std::{sync::Arc, time::Duration};

use prsync_core::config::{AppConfig, LoadOptions};
use prsync_db::{
    connect_with_settings, migrations,
    repositories::{
        SqlChannelConfigRepository, SqlInstallationRepository, SqlRepoRegistrationRepository,
        SqlTrackedMessageRepository, SqlUserLinkRepository,
    },
    DbPool, SqlJobQueue,
};
use prsync_github::HttpGitHubClient;
use prsync_slack::HttpSlackClient;
use thiserror::Error;
use tracing::info;

use crate::{
    ingress::IngressState,
    services::{Repositories, Services},
    tokens::InstallationTokenSource,
    worker::{dispatcher::JobDispatcher, QueueWorker, WorkerSettings},
};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub services: Services,
    pub queue: Arc<SqlJobQueue>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] prsync_core::config::ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("api client could not be built: {0}")]
    Client(String),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let installations = Arc::new(SqlInstallationRepository::new(db_pool.clone()));
    let repos = Repositories {
        tracked_messages: Arc::new(SqlTrackedMessageRepository::new(db_pool.clone())),
        registrations: Arc::new(SqlRepoRegistrationRepository::new(db_pool.clone())),
        channel_configs: Arc::new(SqlChannelConfigRepository::new(db_pool.clone())),
        user_links: Arc::new(SqlUserLinkRepository::new(db_pool.clone())),
        installations: installations.clone(),
    };

    let slack = HttpSlackClient::new(
        config.slack.api_base_url.clone(),
        Arc::new(InstallationTokenSource::new(installations)),
    )
    .map_err(|error| BootstrapError::Client(error.to_string()))?;
    let github = HttpGitHubClient::new(config.github.api_base_url.clone(), config.github.api_token.clone())
        .map_err(|error| BootstrapError::Client(error.to_string()))?;

    let queue = Arc::new(SqlJobQueue::new(db_pool.clone()));
    let services = Services::new(
        repos,
        queue.clone(),
        Arc::new(slack),
        Arc::new(github),
        config.reactions.clone(),
        config.github.web_host.clone(),
    );

    info!(
        event_name = "system.bootstrap.ready",
        worker_concurrency = config.worker.concurrency,
        "application services wired"
    );
    Ok(Application { config, db_pool, services, queue })
}

impl Application {
    pub fn ingress_state(&self) -> IngressState {
        IngressState::new(
            self.services.clone(),
            self.config.github.webhook_secret.clone(),
            self.config.slack.signing_secret.clone(),
            i64::try_from(self.config.slack.request_tolerance_secs).unwrap_or(i64::MAX),
        )
    }

    pub fn worker(&self) -> QueueWorker {
        let dispatcher = JobDispatcher::new(
            self.services.clone(),
            Duration::from_secs(self.config.worker.job_deadline_secs),
            self.config.worker.max_retries,
        );
        QueueWorker::new(
            self.queue.clone(),
            Arc::new(dispatcher),
            WorkerSettings::from_config(&self.config.worker),
        )
    }
}

#[cfg(test)]
mod tests {
    use prsync_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str, webhook_secret: Option<&str>) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                github_webhook_secret: webhook_secret.map(str::to_string),
                slack_signing_secret: Some("slack-signing".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_webhook_secret() {
        let result = bootstrap(overrides("sqlite::memory:", None)).await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("github.webhook_secret"), "{message}");
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_services() {
        let app = bootstrap(overrides("sqlite::memory:", Some("gh-secret")))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('tracked_message', 'repo_registration', 'job_queue')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected tables after bootstrap");
        assert_eq!(table_count, 3);
        assert_eq!(app.services.web_host, "github.com");

        let _state = app.ingress_state();
        let worker = app.worker();
        assert!(!worker.process_next().await.expect("empty queue"));

        app.db_pool.close().await;
    }
}
