//! Applies a re-derived [`DesiredState`] to tracked chat messages.
//!
//! Messages are grouped by workspace and every message is synced on its own:
//! one failing message or workspace never stops the rest, and the sync never
//! fails the surrounding job. The desired state is derived while the locks of
//! every targeted message are held. Before mutating, the bot's current
//! reactions are read so only the delta is applied; when that read fails the
//! full idempotent plan is applied instead.

use std::{collections::BTreeMap, convert::Infallible, future::Future, sync::Arc};

use prsync_core::{
    reaction::ReactionVocabulary, DesiredState, LogContext, ReactionPlan, ReactionStep,
    RepoFullName, ReviewTarget, TrackedMessage, WorkspaceId,
};
use prsync_slack::{SlackApi, SlackApiError};
use tracing::{debug, info, warn};

use crate::{
    services::Services,
    worker::{error::JobError, locks::MessageLocks},
};

use prsync_core::domain::job::ReactionSyncJob;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub synced: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl SyncSummary {
    fn merge(&mut self, other: SyncSummary) {
        self.synced += other.synced;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

#[derive(Clone)]
pub struct ReactionSyncEngine {
    slack: Arc<dyn SlackApi>,
    vocabulary: ReactionVocabulary,
    locks: MessageLocks,
}

impl ReactionSyncEngine {
    pub fn new(slack: Arc<dyn SlackApi>, vocabulary: ReactionVocabulary, locks: MessageLocks) -> Self {
        Self { slack, vocabulary, locks }
    }

    pub fn plan(&self, desired: &DesiredState) -> ReactionPlan {
        ReactionPlan::for_state(desired, &self.vocabulary)
    }

    /// Syncs `messages` to a state already known to the caller.
    pub async fn sync_all(
        &self,
        messages: Vec<TrackedMessage>,
        desired: &DesiredState,
        ctx: &LogContext,
    ) -> SyncSummary {
        let desired = *desired;
        self.sync_with(messages, move || async move { desired }, ctx).await
    }

    /// Like [`Self::try_sync_with`] for derivations that always produce a state.
    pub async fn sync_with<F, Fut>(
        &self,
        messages: Vec<TrackedMessage>,
        derive: F,
        ctx: &LogContext,
    ) -> SyncSummary
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DesiredState>,
    {
        let result = self
            .try_sync_with(messages, move || async move { Ok::<_, Infallible>(derive().await) }, ctx)
            .await;
        match result {
            Ok(summary) => summary,
            Err(never) => match never {},
        }
    }

    /// Locks every live message, then runs `derive` and applies its state.
    /// Deriving under the locks keeps two events for the same PR from applying
    /// states each computed before the other finished.
    pub async fn try_sync_with<F, Fut, E>(
        &self,
        messages: Vec<TrackedMessage>,
        derive: F,
        ctx: &LogContext,
    ) -> Result<SyncSummary, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DesiredState, E>>,
    {
        let keys = messages
            .iter()
            .filter(|message| !message.deleted_by_user)
            .map(TrackedMessage::lock_key);
        let _guards = self.locks.acquire_all(keys).await;
        let desired = derive().await?;

        let mut groups: BTreeMap<WorkspaceId, Vec<TrackedMessage>> = BTreeMap::new();
        for message in messages {
            groups.entry(message.workspace_id.clone()).or_default().push(message);
        }

        let mut summary = SyncSummary::default();
        for (workspace, group) in &groups {
            summary.merge(self.apply_workspace(workspace, group, &desired, ctx).await);
        }

        info!(
            event_name = "worker.reaction_sync.completed",
            trace_id = ctx.trace_id(),
            job_id = ctx.job_id(),
            repo = ctx.repo(),
            pr_number = ctx.pr_number(),
            desired_state = desired.label(),
            workspaces = groups.len(),
            synced = summary.synced,
            failed = summary.failed,
            skipped = summary.skipped,
            "reaction sync finished"
        );
        Ok(summary)
    }

    async fn apply_workspace(
        &self,
        workspace: &WorkspaceId,
        messages: &[TrackedMessage],
        desired: &DesiredState,
        ctx: &LogContext,
    ) -> SyncSummary {
        let ctx = ctx.with_workspace(workspace);
        let plan = self.plan(desired);
        let mut summary = SyncSummary::default();

        for message in messages {
            if message.deleted_by_user {
                summary.skipped += 1;
                continue;
            }
            match self.apply_message(message, &plan, &ctx).await {
                Ok(()) => summary.synced += 1,
                Err(error) => {
                    summary.failed += 1;
                    warn!(
                        event_name = "worker.reaction_sync.message_failed",
                        trace_id = ctx.trace_id(),
                        job_id = ctx.job_id(),
                        repo = ctx.repo(),
                        pr_number = ctx.pr_number(),
                        workspace_id = ctx.workspace(),
                        channel_id = %message.channel_id,
                        message_ts = %message.message_ts,
                        retryable = error.is_retryable(),
                        error = %error,
                        "could not sync reactions on tracked message"
                    );
                }
            }
        }
        summary
    }

    /// Callers hold the message's lock.
    async fn apply_message(
        &self,
        message: &TrackedMessage,
        plan: &ReactionPlan,
        ctx: &LogContext,
    ) -> Result<(), SlackApiError> {
        let target = message.target();

        let steps = match self.slack.bot_reactions(&message.workspace_id, &target).await {
            Ok(current) => plan.delta(&current),
            Err(error) => {
                debug!(
                    event_name = "worker.reaction_sync.read_failed",
                    trace_id = ctx.trace_id(),
                    workspace_id = ctx.workspace(),
                    channel_id = %message.channel_id,
                    message_ts = %message.message_ts,
                    error = %error,
                    "falling back to the full reaction plan"
                );
                plan.clone()
            }
        };

        for step in steps.steps() {
            match step {
                ReactionStep::Add(name) => {
                    self.slack.add_reaction(&message.workspace_id, &target, name).await?;
                }
                ReactionStep::Remove(name) => {
                    self.slack.remove_reaction(&message.workspace_id, &target, name).await?;
                }
            }
        }
        Ok(())
    }
}

/// Backfills the live state onto one tracked message, typically a freshly
/// detected manual link.
pub async fn handle_job(
    services: &Services,
    job: &ReactionSyncJob,
    ctx: &LogContext,
) -> Result<SyncSummary, JobError> {
    let ctx = ctx.with_pr(&job.repo, job.pr_number).with_workspace(&job.workspace_id);
    let Some(message) = services.repos.tracked_messages.find_by_id(&job.tracked_message_id).await?
    else {
        info!(
            event_name = "worker.reaction_sync.message_missing",
            trace_id = ctx.trace_id(),
            job_id = ctx.job_id(),
            tracked_message_id = %job.tracked_message_id.0,
            "tracked message no longer exists"
        );
        return Ok(SyncSummary::default());
    };
    if message.deleted_by_user {
        return Ok(SyncSummary { skipped: 1, ..SyncSummary::default() });
    }

    let derive = move || async move {
        let snapshot = services.github.pull_request(&job.repo, job.pr_number).await?;
        let outcome = services.github.latest_review_outcome(&job.repo, job.pr_number).await?;
        Ok::<_, JobError>(DesiredState::from_live(snapshot.state, outcome))
    };
    services.sync.try_sync_with(vec![message], derive, &ctx).await
}

/// Re-derives the desired state from GitHub. Whatever GitHub cannot answer
/// right now falls back to `fallback`, which callers build from the webhook
/// payload.
pub async fn derive_live(
    services: &Services,
    repo: &RepoFullName,
    pr_number: u64,
    fallback: DesiredState,
    ctx: &LogContext,
) -> DesiredState {
    let terminal = match services.github.pull_request(repo, pr_number).await {
        Ok(snapshot) => snapshot.state.terminal(),
        Err(error) => {
            warn!(
                event_name = "worker.reaction_sync.pr_lookup_failed",
                trace_id = ctx.trace_id(),
                repo = ctx.repo(),
                pr_number = ctx.pr_number(),
                error = %error,
                "using the webhook's pull request state"
            );
            fallback.terminal
        }
    };
    let review = match services.github.latest_review_outcome(repo, pr_number).await {
        Ok(outcome) => ReviewTarget::from_outcome(outcome),
        Err(error) => {
            warn!(
                event_name = "worker.reaction_sync.review_lookup_failed",
                trace_id = ctx.trace_id(),
                repo = ctx.repo(),
                pr_number = ctx.pr_number(),
                error = %error,
                "using the webhook's review outcome"
            );
            fallback.review
        }
    };
    DesiredState { review, terminal }
}
