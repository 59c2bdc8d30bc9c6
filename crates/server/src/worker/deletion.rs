//! Author-requested removal of bot notifications.
//!
//! Authorization happens at ingress time so unauthorized reactions never reach
//! the queue; the job itself re-checks the row before deleting.

use prsync_core::{
    domain::job::DeleteTrackedMessageJob, Job, JobKind, LogContext, WorkspaceId,
};
use prsync_db::RepositoryError;
use prsync_slack::ReactionAddedEvent;
use tracing::{info, warn};

use crate::{services::Services, worker::error::JobError};

/// Returns the deletion job when the reactor is the verified, linked author of
/// the bot message they reacted to.
pub async fn authorize_deletion(
    services: &Services,
    workspace: &WorkspaceId,
    event: &ReactionAddedEvent,
    ctx: &LogContext,
) -> Result<Option<Job>, RepositoryError> {
    let Some(message) = services
        .repos
        .tracked_messages
        .find_bot_message(workspace, &event.channel_id, &event.message_ts)
        .await?
    else {
        return Ok(None);
    };

    let link = services.repos.user_links.find_by_slack_user(workspace, &event.reactor_user_id).await?;
    let authorized = link
        .as_ref()
        .filter(|link| link.verified)
        .map(|link| message.deletable_by(&link.github_login))
        .unwrap_or(false);
    if !authorized {
        warn!(
            event_name = "ingress.slack.delete_unauthorized",
            trace_id = ctx.trace_id(),
            workspace_id = %workspace,
            channel_id = %event.channel_id,
            message_ts = %event.message_ts,
            reactor = %event.reactor_user_id,
            "delete reaction from someone other than the linked pull request author"
        );
        return Ok(None);
    }

    Ok(Some(Job::new(
        ctx.trace_id.clone(),
        JobKind::DeleteTrackedMessage(DeleteTrackedMessageJob {
            tracked_message_id: message.id,
            workspace_id: workspace.clone(),
            requested_by: event.reactor_user_id.clone(),
        }),
    )))
}

/// Deletes the chat message and flags the row so no later sync targets it.
pub async fn handle(
    services: &Services,
    job: &DeleteTrackedMessageJob,
    ctx: &LogContext,
) -> Result<bool, JobError> {
    let ctx = ctx.with_workspace(&job.workspace_id);
    let Some(message) = services.repos.tracked_messages.find_by_id(&job.tracked_message_id).await?
    else {
        return Ok(false);
    };
    if message.deleted_by_user {
        return Ok(false);
    }

    services.slack.delete_message(&message.workspace_id, &message.target()).await?;
    let flagged = services.repos.tracked_messages.mark_deleted_by_user(&message.id).await?;

    info!(
        event_name = "worker.deletion.completed",
        trace_id = ctx.trace_id(),
        job_id = ctx.job_id(),
        repo = %message.repo,
        pr_number = message.pr_number,
        workspace_id = ctx.workspace(),
        channel_id = %message.channel_id,
        message_ts = %message.message_ts,
        requested_by = %job.requested_by,
        "bot message deleted on author request"
    );
    Ok(flagged)
}

#[cfg(test)]
mod tests {
    use prsync_core::{
        domain::job::DeleteTrackedMessageJob, JobKind, LogContext, RepoFullName, SlackUserId,
        TraceId, WorkspaceId,
    };
    use prsync_github::GitHubEvent;
    use prsync_slack::ReactionAddedEvent;
    use serde_json::json;

    use super::{authorize_deletion, handle};
    use crate::{
        services::testing::Harness,
        worker::{pr_events, reaction_sync::SyncSummary},
    };

    fn ctx() -> LogContext {
        LogContext::new(TraceId("trace".to_owned()))
    }

    async fn posted_notification(harness: &Harness) -> prsync_core::TrackedMessage {
        harness.register("acme/api", "W1", Some("C1")).await;
        let payload = json!({
            "action": "opened",
            "pull_request": {
                "number": 3,
                "title": "Bump deps",
                "html_url": "https://github.com/acme/api/pull/3",
                "state": "open",
                "user": { "login": "octocat" },
            },
            "repository": { "full_name": "acme/api" },
        });
        let GitHubEvent::PullRequest(event) =
            GitHubEvent::parse("pull_request", &payload).expect("parse")
        else {
            panic!("expected pull_request event");
        };
        pr_events::handle(&harness.services, &event, &ctx()).await.expect("opened");
        harness.tracked.all().await.remove(0)
    }

    fn wastebasket(message: &prsync_core::TrackedMessage, reactor: &str) -> ReactionAddedEvent {
        ReactionAddedEvent {
            channel_id: message.channel_id.clone(),
            message_ts: message.message_ts.clone(),
            reactor_user_id: SlackUserId(reactor.to_owned()),
            reaction: "wastebasket".to_owned(),
        }
    }

    #[tokio::test]
    async fn author_can_delete_their_notification_and_later_syncs_skip_it() {
        let harness = Harness::new();
        let message = posted_notification(&harness).await;
        harness.link_user("W1", "U-author", "octocat", None).await;

        let job = authorize_deletion(
            &harness.services,
            &WorkspaceId("W1".into()),
            &wastebasket(&message, "U-author"),
            &ctx(),
        )
        .await
        .expect("authorize")
        .expect("authorized");
        let JobKind::DeleteTrackedMessage(delete) = &job.kind else {
            panic!("unexpected job {job:?}");
        };

        assert!(handle(&harness.services, delete, &ctx()).await.expect("delete"));
        assert!(harness.slack.is_deleted(&message.workspace_id, &message.target()).await);
        assert!(!handle(&harness.services, delete, &ctx()).await.expect("second delete"));

        let live = harness
            .services
            .repos
            .tracked_messages
            .find_live_for_pr(&RepoFullName::new("acme/api"), 3)
            .await
            .expect("live");
        assert!(live.is_empty());
        let summary = harness
            .services
            .sync
            .sync_all(
                harness.tracked.all().await,
                &prsync_core::DesiredState::open(prsync_core::ReviewTarget::Cleared),
                &ctx(),
            )
            .await;
        assert_eq!(summary, SyncSummary { synced: 0, failed: 0, skipped: 1 });
    }

    #[tokio::test]
    async fn other_users_and_unverified_links_cannot_delete() {
        let harness = Harness::new();
        let message = posted_notification(&harness).await;
        harness.link_user("W1", "U-other", "someone-else", None).await;

        let stranger = authorize_deletion(
            &harness.services,
            &WorkspaceId("W1".into()),
            &wastebasket(&message, "U-other"),
            &ctx(),
        )
        .await
        .expect("authorize");
        let unlinked = authorize_deletion(
            &harness.services,
            &WorkspaceId("W1".into()),
            &wastebasket(&message, "U-nobody"),
            &ctx(),
        )
        .await
        .expect("authorize");

        assert!(stranger.is_none());
        assert!(unlinked.is_none());
    }

    #[tokio::test]
    async fn deleting_a_missing_row_is_a_no_op() {
        let harness = Harness::new();
        let deleted = handle(
            &harness.services,
            &DeleteTrackedMessageJob {
                tracked_message_id: prsync_core::TrackedMessageId("missing".to_owned()),
                workspace_id: WorkspaceId("W1".into()),
                requested_by: SlackUserId("U1".into()),
            },
            &ctx(),
        )
        .await
        .expect("missing");
        assert!(!deleted);
    }
}
