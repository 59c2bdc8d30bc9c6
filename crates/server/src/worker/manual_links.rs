//! Tracks human-posted chat messages that reference exactly one pull request.

use prsync_core::{
    domain::job::{ManualLinkJob, ReactionSyncJob},
    scan_message, ChannelConfig, Job, JobKind, LinkScan, LogContext, TrackedMessage,
};
use tracing::{debug, info};

use crate::{services::Services, worker::error::JobError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ManualLinkOutcome {
    Tracked { tracked_message_id: String },
    TrackingDisabled,
    NoReference,
    Ambiguous { references: usize },
}

pub async fn handle(
    services: &Services,
    job: &ManualLinkJob,
    ctx: &LogContext,
) -> Result<ManualLinkOutcome, JobError> {
    let ctx = ctx.with_workspace(&job.workspace_id);
    let config = services.repos.channel_configs.find(&job.workspace_id, &job.channel_id).await?;
    if !ChannelConfig::tracking_enabled(config.as_ref()) {
        debug!(
            event_name = "worker.manual_link.tracking_disabled",
            trace_id = ctx.trace_id(),
            job_id = ctx.job_id(),
            workspace_id = ctx.workspace(),
            channel_id = %job.channel_id,
            "manual link tracking is off for channel"
        );
        return Ok(ManualLinkOutcome::TrackingDisabled);
    }

    let reference = match scan_message(&job.text, &services.web_host) {
        LinkScan::Single(reference) => reference,
        LinkScan::NoReference => return Ok(ManualLinkOutcome::NoReference),
        LinkScan::Ambiguous(references) => {
            info!(
                event_name = "worker.manual_link.ambiguous",
                trace_id = ctx.trace_id(),
                job_id = ctx.job_id(),
                workspace_id = ctx.workspace(),
                channel_id = %job.channel_id,
                message_ts = %job.message_ts,
                references = references.len(),
                "message references several pull requests, not tracking"
            );
            return Ok(ManualLinkOutcome::Ambiguous { references: references.len() });
        }
    };

    let ctx = ctx.with_pr(&reference.repo, reference.number);
    let stored = services
        .repos
        .tracked_messages
        .insert_manual(TrackedMessage::manual(
            reference.repo.clone(),
            reference.number,
            job.workspace_id.clone(),
            job.channel_id.clone(),
            job.message_ts.clone(),
        ))
        .await?;

    if !stored.deleted_by_user {
        let follow_up = Job::new(
            ctx.trace_id.clone(),
            JobKind::ReactionSync(ReactionSyncJob {
                tracked_message_id: stored.id.clone(),
                repo: reference.repo.clone(),
                pr_number: reference.number,
                workspace_id: job.workspace_id.clone(),
            }),
        );
        services.queue.enqueue(&follow_up).await?;
    }

    info!(
        event_name = "worker.manual_link.tracked",
        trace_id = ctx.trace_id(),
        job_id = ctx.job_id(),
        repo = ctx.repo(),
        pr_number = ctx.pr_number(),
        workspace_id = ctx.workspace(),
        channel_id = %job.channel_id,
        message_ts = %job.message_ts,
        tracked_message_id = %stored.id.0,
        "manual pull request link tracked"
    );
    Ok(ManualLinkOutcome::Tracked { tracked_message_id: stored.id.0 })
}
