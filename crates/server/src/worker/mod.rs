//! Queue consumer: claims deliveries, runs them through the dispatcher with
//! bounded parallelism and settles each one back into the queue.

pub mod deletion;
pub mod dispatcher;
pub mod error;
pub mod locks;
pub mod manual_links;
pub mod pr_events;
pub mod reaction_sync;
pub mod reviews;

use std::{sync::Arc, time::Duration};

use prsync_core::config::WorkerConfig;
use prsync_db::{Delivery, JobStore, QueueError, Settlement};
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use self::dispatcher::{DispatchOutcome, JobDispatcher};

/// Exponential retry backoff: `base * 2^retry`, capped at `max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn delay(&self, retry: u32) -> Duration {
        let multiplier = 1_u32 << retry.min(16);
        self.base.saturating_mul(multiplier).min(self.max)
    }
}

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub worker_id: String,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub claim_timeout: Duration,
    pub retry: RetryPolicy,
}

impl WorkerSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            worker_id: format!("worker-{}", uuid::Uuid::new_v4().simple()),
            concurrency: config.concurrency.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            claim_timeout: Duration::from_secs(config.claim_timeout_secs),
            retry: RetryPolicy {
                base: Duration::from_secs(config.retry_base_delay_secs),
                max: Duration::from_secs(config.retry_max_delay_secs),
            },
        }
    }
}

pub struct QueueWorker {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<JobDispatcher>,
    settings: WorkerSettings,
}

impl QueueWorker {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: Arc<JobDispatcher>, settings: WorkerSettings) -> Self {
        Self { store, dispatcher, settings }
    }

    /// Polls until `shutdown` flips to true, then waits for in-flight jobs.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let permits = Arc::new(Semaphore::new(self.settings.concurrency));
        info!(
            event_name = "worker.queue.started",
            worker_id = %self.settings.worker_id,
            concurrency = self.settings.concurrency,
            "queue worker started"
        );

        while !*shutdown.borrow() {
            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            match self.store.claim_next(&self.settings.worker_id, self.settings.claim_timeout).await {
                Ok(Some(delivery)) => {
                    let store = self.store.clone();
                    let dispatcher = self.dispatcher.clone();
                    let retry = self.settings.retry;
                    tokio::spawn(async move {
                        run_delivery(store.as_ref(), &dispatcher, retry, delivery).await;
                        drop(permit);
                    });
                    continue;
                }
                Ok(None) => drop(permit),
                Err(claim_error) => {
                    drop(permit);
                    warn!(
                        event_name = "worker.queue.claim_failed",
                        worker_id = %self.settings.worker_id,
                        error = %claim_error,
                        "could not claim next job"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        // Drain: every permit back means every spawned delivery settled.
        let concurrency = u32::try_from(self.settings.concurrency).unwrap_or(u32::MAX);
        let _drained = permits.acquire_many(concurrency).await;
        info!(
            event_name = "worker.queue.stopped",
            worker_id = %self.settings.worker_id,
            "queue worker stopped"
        );
    }

    /// Claims and processes one delivery inline. Returns whether one was found.
    pub async fn process_next(&self) -> Result<bool, QueueError> {
        let Some(delivery) =
            self.store.claim_next(&self.settings.worker_id, self.settings.claim_timeout).await?
        else {
            return Ok(false);
        };
        run_delivery(self.store.as_ref(), &self.dispatcher, self.settings.retry, delivery).await;
        Ok(true)
    }
}

async fn run_delivery(
    store: &dyn JobStore,
    dispatcher: &JobDispatcher,
    retry: RetryPolicy,
    delivery: Delivery,
) {
    let settlement = match dispatcher.dispatch(&delivery).await {
        DispatchOutcome::Processed => Settlement::Processed,
        DispatchOutcome::RetryRequested { error } => {
            Settlement::Retry { error, delay: retry.delay(delivery.retry_count) }
        }
        DispatchOutcome::Failed { error } => Settlement::Failed { error },
        DispatchOutcome::Abandoned { error } => Settlement::Abandoned { error },
    };

    if let Err(settle_error) = store.settle(&delivery.job.id, settlement).await {
        // The claim times out and the job is redelivered.
        error!(
            event_name = "worker.queue.settle_failed",
            trace_id = %delivery.job.trace_id,
            job_id = %delivery.job.id,
            error = %settle_error,
            "could not record job result"
        );
    }
}
