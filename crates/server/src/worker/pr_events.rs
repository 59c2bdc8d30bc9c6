//! `pull_request` webhook handling: bot notifications on open, terminal
//! reactions on close, stale-terminal cleanup on reopen.

use prsync_core::{
    annotations::render_mention, parse_annotation, Annotation, ApplicationError,
    BotMessageReservation, ChannelId, ChannelRef, DesiredState, LogContext, NotifyDirective,
    RepoRegistration, ReservationOutcome, ReviewTarget, TerminalState, UserLink,
};
use prsync_github::{PullRequestAction, PullRequestEvent};
use prsync_slack::{pull_request_notification, PullRequestSummary};
use tracing::{debug, error, info, warn};

use crate::{
    services::Services,
    worker::{
        error::JobError,
        reaction_sync::{derive_live, SyncSummary},
    },
};

/// What happened for one registered workspace when a PR was opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotifyOutcome {
    Posted { channel_id: ChannelId },
    AlreadyTracked,
    NoChannel,
    UnknownChannel { name: String },
}

pub async fn handle(
    services: &Services,
    event: &PullRequestEvent,
    ctx: &LogContext,
) -> Result<(), JobError> {
    let ctx = ctx.with_pr(&event.repo, event.pull_request.number);
    match &event.action {
        PullRequestAction::Opened | PullRequestAction::ReadyForReview => {
            handle_opened(services, event, &ctx).await.map(|_| ())
        }
        PullRequestAction::Closed => handle_closed(services, event, &ctx).await.map(|_| ()),
        PullRequestAction::Reopened => handle_reopened(services, event, &ctx).await.map(|_| ()),
        PullRequestAction::Other(action) => {
            debug!(
                event_name = "worker.pr_event.ignored",
                trace_id = ctx.trace_id(),
                job_id = ctx.job_id(),
                repo = ctx.repo(),
                pr_number = ctx.pr_number(),
                action = %action,
                "pull request action needs no work"
            );
            Ok(())
        }
    }
}

pub async fn handle_opened(
    services: &Services,
    event: &PullRequestEvent,
    ctx: &LogContext,
) -> Result<Vec<NotifyOutcome>, JobError> {
    let pr = &event.pull_request;
    if pr.draft {
        info!(
            event_name = "worker.pr_event.draft_skipped",
            trace_id = ctx.trace_id(),
            repo = ctx.repo(),
            pr_number = ctx.pr_number(),
            "draft pull request, waiting for ready_for_review"
        );
        return Ok(Vec::new());
    }

    let directive = match parse_annotation(pr.body.as_deref().unwrap_or_default()) {
        Some(Annotation::Skip) => {
            info!(
                event_name = "worker.pr_event.annotation_skip",
                trace_id = ctx.trace_id(),
                repo = ctx.repo(),
                pr_number = ctx.pr_number(),
                "pull request opted out of notifications"
            );
            return Ok(Vec::new());
        }
        Some(Annotation::Notify(directive)) => directive,
        None => NotifyDirective::default(),
    };

    let author_links: Vec<UserLink> = services
        .repos
        .user_links
        .find_by_github_login(pr.author_login())
        .await?
        .into_iter()
        .filter(|link| link.verified)
        .collect();

    let registrations = registrations_for(services, event, &author_links, ctx).await?;
    if registrations.is_empty() {
        info!(
            event_name = "worker.pr_event.unregistered",
            trace_id = ctx.trace_id(),
            repo = ctx.repo(),
            pr_number = ctx.pr_number(),
            "repository is not registered in any workspace"
        );
        return Ok(Vec::new());
    }

    let mut outcomes = Vec::with_capacity(registrations.len());
    let mut attempted = 0usize;
    let mut retryable_failures = 0usize;
    let mut last_failure: Option<ApplicationError> = None;

    for registration in &registrations {
        let ws_ctx = ctx.with_workspace(&registration.workspace_id);
        let author_link =
            author_links.iter().find(|link| link.workspace_id == registration.workspace_id);
        match notify_workspace(services, event, &directive, author_link, registration, &ws_ctx).await {
            Ok(outcome) => {
                if matches!(outcome, NotifyOutcome::Posted { .. } | NotifyOutcome::AlreadyTracked) {
                    attempted += 1;
                }
                outcomes.push(outcome);
            }
            Err(failure) => {
                attempted += 1;
                if failure.is_retryable() {
                    retryable_failures += 1;
                }
                error!(
                    event_name = "worker.pr_event.workspace_failed",
                    trace_id = ws_ctx.trace_id(),
                    job_id = ws_ctx.job_id(),
                    repo = ws_ctx.repo(),
                    pr_number = ws_ctx.pr_number(),
                    workspace_id = ws_ctx.workspace(),
                    retryable = failure.is_retryable(),
                    error = %failure,
                    "could not notify workspace"
                );
                last_failure = Some(failure.into());
            }
        }
    }

    if let Some(last) = last_failure {
        if attempted > 0 && retryable_failures == attempted {
            return Err(JobError::AllWorkspacesFailed { attempted, last });
        }
    }
    Ok(outcomes)
}

/// Enabled registrations, or a single auto-registration into the author's
/// workspace when the repository is registered nowhere.
async fn registrations_for(
    services: &Services,
    event: &PullRequestEvent,
    author_links: &[UserLink],
    ctx: &LogContext,
) -> Result<Vec<RepoRegistration>, JobError> {
    let registrations = services.repos.registrations.list_enabled_for_repo(&event.repo).await?;
    if !registrations.is_empty() {
        return Ok(registrations);
    }

    let Some(author) = author_links.iter().find(|link| link.can_auto_register()) else {
        return Ok(Vec::new());
    };
    let registration =
        RepoRegistration::new(event.repo.clone(), author.workspace_id.clone(), None);
    if services.repos.registrations.register_if_absent(registration.clone()).await? {
        info!(
            event_name = "worker.pr_event.auto_registered",
            trace_id = ctx.trace_id(),
            repo = ctx.repo(),
            pr_number = ctx.pr_number(),
            workspace_id = %author.workspace_id,
            "repository auto-registered into the author's workspace"
        );
        return Ok(vec![registration]);
    }
    // Lost a race with another registration; use whatever is enabled now.
    Ok(services.repos.registrations.list_enabled_for_repo(&event.repo).await?)
}

async fn notify_workspace(
    services: &Services,
    event: &PullRequestEvent,
    directive: &NotifyDirective,
    author_link: Option<&UserLink>,
    registration: &RepoRegistration,
    ctx: &LogContext,
) -> Result<NotifyOutcome, JobError> {
    let workspace = &registration.workspace_id;
    let pr = &event.pull_request;

    let annotated = match &directive.channel {
        Some(ChannelRef::Id(id)) => Some(id.clone()),
        Some(ChannelRef::Name(name)) => match services.slack.resolve_channel(workspace, name).await? {
            Some(id) => Some(id),
            None => {
                warn!(
                    event_name = "worker.pr_event.unknown_channel",
                    trace_id = ctx.trace_id(),
                    repo = ctx.repo(),
                    pr_number = ctx.pr_number(),
                    workspace_id = ctx.workspace(),
                    channel = %name,
                    "channel #{name} from the pull request description does not exist in this workspace"
                );
                return Ok(NotifyOutcome::UnknownChannel { name: name.clone() });
            }
        },
        None => None,
    };
    let channel = annotated
        .or_else(|| author_link.and_then(|link| link.default_channel_in(workspace)).cloned())
        .or_else(|| registration.default_channel_id.clone());
    let Some(channel) = channel else {
        debug!(
            event_name = "worker.pr_event.no_channel",
            trace_id = ctx.trace_id(),
            repo = ctx.repo(),
            pr_number = ctx.pr_number(),
            workspace_id = ctx.workspace(),
            "no target channel configured for workspace"
        );
        return Ok(NotifyOutcome::NoChannel);
    };

    let reservation = BotMessageReservation::new(
        event.repo.clone(),
        pr.number,
        workspace.clone(),
        channel.clone(),
        Some(pr.author_login().to_owned()),
    );
    let id = match services.repos.tracked_messages.reserve_bot_message(&reservation).await? {
        ReservationOutcome::Reserved(id) => id,
        ReservationOutcome::AlreadyTracked => return Ok(NotifyOutcome::AlreadyTracked),
    };

    let summary = PullRequestSummary {
        repo: event.repo.to_string(),
        number: pr.number,
        title: pr.title.clone(),
        html_url: pr.html_url.clone(),
        author_login: pr.author_login().to_owned(),
        mentions: directive.mentions.iter().map(|mention| render_mention(mention)).collect(),
        emoji: directive.emoji.clone(),
    };
    let posted = match services
        .slack
        .post_message(workspace, &channel, &pull_request_notification(&summary))
        .await
    {
        Ok(posted) => posted,
        Err(post_error) => {
            if let Err(release_error) =
                services.repos.tracked_messages.release_reservation(&id).await
            {
                warn!(
                    event_name = "worker.pr_event.release_failed",
                    trace_id = ctx.trace_id(),
                    workspace_id = ctx.workspace(),
                    error = %release_error,
                    "reservation will be reclaimed after it goes stale"
                );
            }
            return Err(post_error.into());
        }
    };
    services.repos.tracked_messages.attach_message_ts(&id, &posted.message_ts).await?;

    info!(
        event_name = "worker.pr_event.notified",
        trace_id = ctx.trace_id(),
        job_id = ctx.job_id(),
        repo = ctx.repo(),
        pr_number = ctx.pr_number(),
        workspace_id = ctx.workspace(),
        channel_id = %posted.channel_id,
        message_ts = %posted.message_ts,
        "pull request notification posted"
    );
    Ok(NotifyOutcome::Posted { channel_id: channel })
}

/// Terminal and review reactions follow the live PR; the payload's merge flag
/// stands in when GitHub cannot be reached.
pub async fn handle_closed(
    services: &Services,
    event: &PullRequestEvent,
    ctx: &LogContext,
) -> Result<SyncSummary, JobError> {
    let terminal = TerminalState::from_close(event.pull_request.merged.unwrap_or(false));
    sync_tracked(services, event, DesiredState::closed(terminal, ReviewTarget::Unchanged), ctx)
        .await
}

pub async fn handle_reopened(
    services: &Services,
    event: &PullRequestEvent,
    ctx: &LogContext,
) -> Result<SyncSummary, JobError> {
    sync_tracked(services, event, DesiredState::open(ReviewTarget::Unchanged), ctx).await
}

async fn sync_tracked(
    services: &Services,
    event: &PullRequestEvent,
    fallback: DesiredState,
    ctx: &LogContext,
) -> Result<SyncSummary, JobError> {
    let number = event.pull_request.number;
    let messages = services.repos.tracked_messages.find_live_for_pr(&event.repo, number).await?;
    if messages.is_empty() {
        return Ok(SyncSummary::default());
    }
    let derive = || derive_live(services, &event.repo, number, fallback, ctx);
    Ok(services.sync.sync_with(messages, derive, ctx).await)
}
