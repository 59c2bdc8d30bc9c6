//! Routes one claimed delivery to its processor under a deadline and
//! classifies the result for the queue.

use std::time::Duration;

use prsync_core::{domain::job::WebhookJob, ErrorKind, JobKind, LogContext};
use prsync_db::Delivery;
use prsync_github::GitHubEvent;
use tracing::{debug, error, info, warn};

use crate::{
    services::Services,
    worker::{deletion, error::JobError, manual_links, pr_events, reaction_sync, reviews},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Processed,
    RetryRequested { error: String },
    Failed { error: String },
    /// Retry budget spent; the queue treats this as final.
    Abandoned { error: String },
}

pub struct JobDispatcher {
    services: Services,
    deadline: Duration,
    max_retries: u32,
}

impl JobDispatcher {
    pub fn new(services: Services, deadline: Duration, max_retries: u32) -> Self {
        Self { services, deadline, max_retries }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub async fn dispatch(&self, delivery: &Delivery) -> DispatchOutcome {
        let ctx = LogContext::for_job(&delivery.job);
        let kind = delivery.job.kind.as_str();
        debug!(
            event_name = "worker.dispatch.started",
            trace_id = ctx.trace_id(),
            job_id = ctx.job_id(),
            job_kind = kind,
            retry_count = delivery.retry_count,
            "processing job"
        );

        // Dropping the processing future on expiry cancels every in-flight call.
        let result = match tokio::time::timeout(self.deadline, self.process(&delivery.job.kind, &ctx)).await {
            Ok(result) => result,
            Err(_) => Err(JobError::DeadlineExceeded { secs: self.deadline.as_secs() }),
        };

        let outcome = self.classify(result, delivery.retry_count);
        match &outcome {
            DispatchOutcome::Processed => info!(
                event_name = "worker.dispatch.processed",
                trace_id = ctx.trace_id(),
                job_id = ctx.job_id(),
                job_kind = kind,
                "job processed"
            ),
            DispatchOutcome::RetryRequested { error } => warn!(
                event_name = "worker.dispatch.retry_requested",
                trace_id = ctx.trace_id(),
                job_id = ctx.job_id(),
                job_kind = kind,
                retry_count = delivery.retry_count,
                error = %error,
                "job failed, will retry"
            ),
            DispatchOutcome::Failed { error } => error!(
                event_name = "worker.dispatch.failed",
                trace_id = ctx.trace_id(),
                job_id = ctx.job_id(),
                job_kind = kind,
                error = %error,
                "job failed permanently"
            ),
            DispatchOutcome::Abandoned { error } => error!(
                event_name = "worker.dispatch.abandoned",
                trace_id = ctx.trace_id(),
                job_id = ctx.job_id(),
                job_kind = kind,
                retry_count = delivery.retry_count,
                max_retries = self.max_retries,
                error = %error,
                "retry budget exhausted, giving up on job"
            ),
        }
        outcome
    }

    fn classify(&self, result: Result<(), JobError>, retry_count: u32) -> DispatchOutcome {
        let error = match result {
            Ok(()) => return DispatchOutcome::Processed,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(error = %error, "not found treated as a completed no-op");
                return DispatchOutcome::Processed;
            }
            Err(error) => error,
        };

        let message = error.to_string();
        if retry_count >= self.max_retries {
            DispatchOutcome::Abandoned { error: message }
        } else if error.is_retryable() {
            DispatchOutcome::RetryRequested { error: message }
        } else {
            DispatchOutcome::Failed { error: message }
        }
    }

    async fn process(&self, kind: &JobKind, ctx: &LogContext) -> Result<(), JobError> {
        let services = &self.services;
        match kind {
            JobKind::Webhook(webhook) => self.process_webhook(webhook, ctx).await,
            JobKind::ManualLink(job) => manual_links::handle(services, job, ctx).await.map(|_| ()),
            JobKind::ReactionSync(job) => reaction_sync::handle_job(services, job, ctx).await.map(|_| ()),
            JobKind::DeleteTrackedMessage(job) => deletion::handle(services, job, ctx).await.map(|_| ()),
        }
    }

    async fn process_webhook(&self, webhook: &WebhookJob, ctx: &LogContext) -> Result<(), JobError> {
        match GitHubEvent::parse(&webhook.event_type, &webhook.payload)? {
            GitHubEvent::PullRequest(event) => pr_events::handle(&self.services, &event, ctx).await,
            GitHubEvent::PullRequestReview(event) => {
                reviews::handle(&self.services, &event, ctx).await.map(|_| ())
            }
            GitHubEvent::Unsupported { event_type } => {
                debug!(
                    event_name = "worker.dispatch.unsupported_event",
                    trace_id = ctx.trace_id(),
                    job_id = ctx.job_id(),
                    delivery_id = %webhook.delivery_id,
                    github_event = %event_type,
                    "no processor for event type"
                );
                Ok(())
            }
        }
    }
}
