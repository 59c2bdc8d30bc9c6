//! `pull_request_review` webhook handling. The payload only says which review
//! changed; the reactions follow the live pull request, with the payload as a
//! fallback when GitHub cannot be reached.

use prsync_core::{DesiredState, LogContext, ReviewTarget};
use prsync_github::{PullRequestReviewEvent, ReviewAction};
use tracing::debug;

use crate::{
    services::Services,
    worker::{
        error::JobError,
        reaction_sync::{derive_live, SyncSummary},
    },
};

/// Review reaction implied by the event, or `None` when nothing changes.
pub fn review_target(event: &PullRequestReviewEvent) -> Option<ReviewTarget> {
    match event.action {
        ReviewAction::Submitted => event.outcome().map(ReviewTarget::Outcome),
        ReviewAction::Dismissed => Some(ReviewTarget::Cleared),
        ReviewAction::Other(_) => None,
    }
}

pub async fn handle(
    services: &Services,
    event: &PullRequestReviewEvent,
    ctx: &LogContext,
) -> Result<SyncSummary, JobError> {
    let ctx = ctx.with_pr(&event.repo, event.pull_request.number);
    let Some(review) = review_target(event) else {
        debug!(
            event_name = "worker.review.ignored",
            trace_id = ctx.trace_id(),
            job_id = ctx.job_id(),
            repo = ctx.repo(),
            pr_number = ctx.pr_number(),
            action = event.action.as_str(),
            review_state = %event.review_state,
            "review event carries no reaction change"
        );
        return Ok(SyncSummary::default());
    };

    let fallback = match event.pull_request.terminal() {
        Some(terminal) => DesiredState::closed(terminal, review),
        None => DesiredState::open(review),
    };
    let messages = services
        .repos
        .tracked_messages
        .find_live_for_pr(&event.repo, event.pull_request.number)
        .await?;
    if messages.is_empty() {
        return Ok(SyncSummary::default());
    }
    let derive = || derive_live(services, &event.repo, event.pull_request.number, fallback, &ctx);
    Ok(services.sync.sync_with(messages, derive, &ctx).await)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use prsync_core::{
        ChannelId, LogContext, MessageTs, PrState, RepoFullName, ReviewOutcome, ReviewTarget,
        TraceId, TrackedMessage, WorkspaceId,
    };
    use prsync_db::repositories::TrackedMessageRepository;
    use prsync_github::{GitHubApiError, GitHubEvent, PullRequestEvent, PullRequestReviewEvent};
    use serde_json::json;

    use super::{handle, review_target};
    use crate::{services::testing::Harness, worker::pr_events};

    fn review(action: &str, state: &str, pr_state: &str, merged: bool) -> PullRequestReviewEvent {
        let payload = json!({
            "action": action,
            "review": { "state": state, "user": { "login": "reviewer" } },
            "pull_request": {
                "number": 5,
                "title": "Tidy",
                "html_url": "https://github.com/acme/api/pull/5",
                "state": pr_state,
                "merged": merged,
                "user": { "login": "octocat" },
            },
            "repository": { "full_name": "acme/api" },
        });
        match GitHubEvent::parse("pull_request_review", &payload).expect("parse") {
            GitHubEvent::PullRequestReview(event) => event,
            other => panic!("unexpected event {other:?}"),
        }
    }

    fn ctx() -> LogContext {
        LogContext::new(TraceId("trace".to_owned()))
    }

    #[test]
    fn maps_actions_to_review_targets() {
        assert_eq!(
            review_target(&review("submitted", "approved", "open", false)),
            Some(ReviewTarget::Outcome(ReviewOutcome::Approved))
        );
        assert_eq!(
            review_target(&review("dismissed", "dismissed", "open", false)),
            Some(ReviewTarget::Cleared)
        );
        assert_eq!(review_target(&review("edited", "approved", "open", false)), None);
        assert_eq!(review_target(&review("submitted", "pending", "open", false)), None);
    }

    #[tokio::test]
    async fn changes_requested_replaces_approval_on_every_message() {
        let harness = Harness::new();
        let mut targets = Vec::new();
        for (workspace, ts) in [("W1", "1.0"), ("W2", "2.0")] {
            let stored = harness
                .tracked
                .insert_manual(TrackedMessage::manual(
                    RepoFullName::new("acme/api"),
                    5,
                    WorkspaceId(workspace.to_owned()),
                    ChannelId("C1".to_owned()),
                    MessageTs(ts.to_owned()),
                ))
                .await
                .expect("insert");
            targets.push(stored);
        }

        handle(&harness.services, &review("submitted", "approved", "open", false), &ctx())
            .await
            .expect("approved");
        handle(&harness.services, &review("submitted", "changes_requested", "open", false), &ctx())
            .await
            .expect("changes requested");

        for message in &targets {
            assert_eq!(
                harness.slack.reactions_on(&message.workspace_id, &message.target()).await,
                BTreeSet::from(["warning".to_owned()])
            );
        }
    }

    #[tokio::test]
    async fn review_on_merged_pr_keeps_the_terminal_reaction() {
        let harness = Harness::new();
        let stored = harness
            .tracked
            .insert_manual(TrackedMessage::manual(
                RepoFullName::new("acme/api"),
                5,
                WorkspaceId("W1".to_owned()),
                ChannelId("C1".to_owned()),
                MessageTs("1.0".to_owned()),
            ))
            .await
            .expect("insert");

        handle(&harness.services, &review("submitted", "commented", "closed", true), &ctx())
            .await
            .expect("commented");

        assert_eq!(
            harness.slack.reactions_on(&stored.workspace_id, &stored.target()).await,
            BTreeSet::from(["speech_balloon".to_owned(), "tada".to_owned()])
        );
    }

    async fn merged_and_approved(harness: &Harness) -> TrackedMessage {
        let repo = RepoFullName::new("acme/api");
        harness.github.set_state(&repo, 5, PrState::Merged).await;
        harness.github.set_review(&repo, 5, Some(ReviewOutcome::Approved)).await;
        harness
            .tracked
            .insert_manual(TrackedMessage::manual(
                repo,
                5,
                WorkspaceId("W1".to_owned()),
                ChannelId("C1".to_owned()),
                MessageTs("1.0".to_owned()),
            ))
            .await
            .expect("insert")
    }

    fn merged_event() -> PullRequestEvent {
        let payload = json!({
            "action": "closed",
            "pull_request": {
                "number": 5,
                "title": "Tidy",
                "html_url": "https://github.com/acme/api/pull/5",
                "state": "closed",
                "merged": true,
                "user": { "login": "octocat" },
            },
            "repository": { "full_name": "acme/api" },
        });
        match GitHubEvent::parse("pull_request", &payload).expect("parse") {
            GitHubEvent::PullRequest(event) => event,
            other => panic!("unexpected event {other:?}"),
        }
    }

    fn merged_and_approved_reactions() -> BTreeSet<String> {
        BTreeSet::from(["tada".to_owned(), "white_check_mark".to_owned()])
    }

    #[tokio::test]
    async fn stale_open_review_payload_arriving_after_the_merge_keeps_the_merge_reaction() {
        let harness = Harness::new();
        let stored = merged_and_approved(&harness).await;

        pr_events::handle(&harness.services, &merged_event(), &ctx()).await.expect("closed");
        handle(&harness.services, &review("submitted", "approved", "open", false), &ctx())
            .await
            .expect("approved");

        assert_eq!(
            harness.slack.reactions_on(&stored.workspace_id, &stored.target()).await,
            merged_and_approved_reactions()
        );
    }

    #[tokio::test]
    async fn review_then_merge_ends_at_the_live_state() {
        let harness = Harness::new();
        let stored = merged_and_approved(&harness).await;

        handle(&harness.services, &review("submitted", "approved", "open", false), &ctx())
            .await
            .expect("approved");
        pr_events::handle(&harness.services, &merged_event(), &ctx()).await.expect("closed");

        assert_eq!(
            harness.slack.reactions_on(&stored.workspace_id, &stored.target()).await,
            merged_and_approved_reactions()
        );
    }

    #[tokio::test]
    async fn concurrent_review_and_merge_on_one_message_end_at_the_live_state() {
        for _ in 0..16 {
            let harness = Harness::new();
            let stored = merged_and_approved(&harness).await;
            let review_event = review("submitted", "approved", "open", false);
            let close_event = merged_event();
            let ctx = ctx();

            let (reviewed, closed) = tokio::join!(
                handle(&harness.services, &review_event, &ctx),
                pr_events::handle(&harness.services, &close_event, &ctx),
            );
            reviewed.expect("approved");
            closed.expect("closed");

            assert_eq!(
                harness.slack.reactions_on(&stored.workspace_id, &stored.target()).await,
                merged_and_approved_reactions()
            );
        }
    }

    #[tokio::test]
    async fn unreachable_github_falls_back_to_the_review_payload() {
        let harness = Harness::new();
        let stored = merged_and_approved(&harness).await;
        let outage = GitHubApiError::Http {
            endpoint: "/repos/acme/api/pulls/5".to_owned(),
            status: 503,
        };
        harness.github.fail_pull_requests(Some(outage.clone())).await;
        harness.github.fail_reviews(Some(outage)).await;

        handle(&harness.services, &review("submitted", "changes_requested", "open", false), &ctx())
            .await
            .expect("changes requested");

        assert_eq!(
            harness.slack.reactions_on(&stored.workspace_id, &stored.target()).await,
            BTreeSet::from(["warning".to_owned()])
        );
    }
}
