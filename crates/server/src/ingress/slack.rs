use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use prsync_core::{
    domain::job::ManualLinkJob, signature::{verify_slack_signature, SignatureError}, Job, JobKind, LogContext,
    TraceId, WorkspaceId,
};
use prsync_slack::{
    parse_callback, EventContext, EventHandlerError, HandlerResult, MessagePostedEvent,
    ReactionAddedEvent, SlackCallback, SlackEventService,
};
use secrecy::ExposeSecret;
use serde_json::json;
use tracing::{debug, info};

use super::{reject, IngressError, IngressState};
use crate::{services::Services, worker::deletion::authorize_deletion};

const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
const SIGNATURE_HEADER: &str = "x-slack-signature";
const INTERACTION_PREFIX: &[u8] = b"payload=";

/// Enqueues follow-up work for Slack events; never calls the Slack API.
pub struct SlackIngressService {
    services: Services,
}

impl SlackIngressService {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn enqueue(&self, job: Job) -> Result<HandlerResult, EventHandlerError> {
        self.services
            .queue
            .enqueue(&job)
            .await
            .map_err(|error| EventHandlerError::Enqueue(error.to_string()))?;
        info!(
            event_name = "ingress.slack.enqueued",
            trace_id = %job.trace_id,
            job_id = %job.id,
            job_kind = job.kind.as_str(),
            "slack event queued"
        );
        Ok(HandlerResult::Enqueued)
    }
}

#[async_trait]
impl SlackEventService for SlackIngressService {
    async fn message_posted(
        &self,
        workspace: &WorkspaceId,
        event: &MessagePostedEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let job = Job::new(
            TraceId(ctx.correlation_id.clone()),
            JobKind::ManualLink(ManualLinkJob {
                workspace_id: workspace.clone(),
                channel_id: event.channel_id.clone(),
                message_ts: event.message_ts.clone(),
                user_id: event.user_id.clone(),
                text: event.text.clone(),
            }),
        );
        self.enqueue(job).await
    }

    async fn reaction_added(
        &self,
        workspace: &WorkspaceId,
        event: &ReactionAddedEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        if !self.services.reactions.is_delete_request(&event.reaction) {
            return Ok(HandlerResult::Ignored);
        }
        let log_ctx = LogContext::new(TraceId(ctx.correlation_id.clone())).with_workspace(workspace);
        let job = authorize_deletion(&self.services, workspace, event, &log_ctx)
            .await
            .map_err(|error| EventHandlerError::Lookup(error.to_string()))?;
        match job {
            Some(job) => self.enqueue(job).await,
            None => Ok(HandlerResult::Ignored),
        }
    }
}

pub async fn receive_event(
    State(state): State<IngressState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = TraceId::generate().0;
    match accept_event(&state, &headers, &body, &correlation_id).await {
        Ok(response) => response,
        Err(error) => reject("slack", error, &correlation_id).into_response(),
    }
}

async fn accept_event(
    state: &IngressState,
    headers: &HeaderMap,
    body: &[u8],
    correlation_id: &str,
) -> Result<Response, IngressError> {
    verify(state, headers, body)?;

    let callback =
        parse_callback(body).map_err(|error| IngressError::MalformedPayload(error.to_string()))?;
    let envelope = match callback {
        SlackCallback::UrlVerification { challenge } => {
            return Ok(Json(json!({ "challenge": challenge })).into_response());
        }
        SlackCallback::Ignored => return Ok(StatusCode::OK.into_response()),
        SlackCallback::EventCallback(envelope) => envelope,
    };

    let ctx = EventContext { correlation_id: correlation_id.to_owned() };
    let result = state.slack_events.dispatch(&envelope, &ctx).await?;
    debug!(
        event_name = "ingress.slack.dispatched",
        correlation_id,
        workspace_id = %envelope.workspace_id,
        event_id = %envelope.event_id,
        slack_event = envelope.event.event_type().as_str(),
        enqueued = result == HandlerResult::Enqueued,
        "slack event handled"
    );
    Ok(StatusCode::OK.into_response())
}

/// Interactive components are verified and acknowledged only.
pub async fn receive_interaction(
    State(state): State<IngressState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = TraceId::generate().0;
    let accepted = verify(&state, &headers, &body).and_then(|()| {
        if body.starts_with(INTERACTION_PREFIX) {
            Ok(())
        } else {
            Err(IngressError::MalformedPayload("expected a form-encoded `payload`".to_owned()))
        }
    });
    match accepted {
        Ok(()) => StatusCode::OK.into_response(),
        Err(error) => reject("slack", error, &correlation_id).into_response(),
    }
}

fn verify(state: &IngressState, headers: &HeaderMap, body: &[u8]) -> Result<(), IngressError> {
    let timestamp =
        header(headers, TIMESTAMP_HEADER).ok_or(IngressError::Signature(SignatureError::InvalidTimestamp))?;
    let signature =
        header(headers, SIGNATURE_HEADER).ok_or(IngressError::Signature(SignatureError::Malformed))?;
    verify_slack_signature(
        timestamp,
        body,
        signature,
        state.slack_secret.expose_secret().as_bytes(),
        chrono::Utc::now().timestamp(),
        state.slack_tolerance_secs,
    )?;
    Ok(())
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use axum::{body::to_bytes, http::StatusCode};
    use chrono::Utc;
    use prsync_core::{JobKind, WorkspaceId};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::{
        ingress::{
            router,
            tests::{slack_request, state, SLACK_SECRET},
        },
        services::testing::Harness,
        worker::pr_events,
    };

    const EVENTS: &str = "/webhooks/slack/events";

    fn message_event(text: &str) -> String {
        json!({
            "type": "event_callback",
            "team_id": "W1",
            "event_id": "Ev1",
            "event": {
                "type": "message",
                "channel": "C1",
                "user": "U1",
                "ts": "1730000000.000200",
                "text": text,
            },
        })
        .to_string()
    }

    #[tokio::test]
    async fn url_verification_echoes_the_challenge() {
        let harness = Harness::new();
        let body = json!({ "type": "url_verification", "challenge": "abc123" }).to_string();

        let response = router(state(&harness))
            .oneshot(slack_request(EVENTS, &body, Utc::now().timestamp(), SLACK_SECRET))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(value["challenge"], "abc123");
    }

    #[tokio::test]
    async fn stale_or_forged_requests_are_rejected() {
        let harness = Harness::new();
        let body = message_event("https://github.com/acme/api/pull/1");
        let app = router(state(&harness));

        let stale = app
            .clone()
            .oneshot(slack_request(EVENTS, &body, Utc::now().timestamp() - 600, SLACK_SECRET))
            .await
            .expect("response");
        let forged = app
            .oneshot(slack_request(EVENTS, &body, Utc::now().timestamp(), "wrong-secret"))
            .await
            .expect("response");

        assert_eq!(stale.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
        assert!(harness.queue.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn user_messages_are_queued_for_link_detection() {
        let harness = Harness::new();
        let body = message_event("see https://github.com/acme/api/pull/1");

        let response = router(state(&harness))
            .oneshot(slack_request(EVENTS, &body, Utc::now().timestamp(), SLACK_SECRET))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let jobs = harness.queue.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert!(matches!(&jobs[0].kind, JobKind::ManualLink(job) if job.workspace_id == WorkspaceId("W1".into())));
    }

    #[tokio::test]
    async fn wastebasket_from_the_author_queues_a_deletion() {
        let harness = Harness::new();
        harness.register("acme/api", "W1", Some("C1")).await;
        harness.link_user("W1", "U-author", "octocat", None).await;
        let payload = json!({
            "action": "opened",
            "pull_request": {
                "number": 4,
                "title": "Docs",
                "html_url": "https://github.com/acme/api/pull/4",
                "state": "open",
                "user": { "login": "octocat" },
            },
            "repository": { "full_name": "acme/api" },
        });
        let prsync_github::GitHubEvent::PullRequest(opened) =
            prsync_github::GitHubEvent::parse("pull_request", &payload).expect("parse")
        else {
            panic!("expected pull_request");
        };
        pr_events::handle(
            &harness.services,
            &opened,
            &prsync_core::LogContext::new(prsync_core::TraceId("t".into())),
        )
        .await
        .expect("opened");
        let message = harness.tracked.all().await.remove(0);

        let reaction = |user: &str, name: &str| {
            json!({
                "type": "event_callback",
                "team_id": "W1",
                "event_id": "Ev2",
                "event": {
                    "type": "reaction_added",
                    "user": user,
                    "reaction": name,
                    "item": { "type": "message", "channel": "C1", "ts": message.message_ts.0 },
                },
            })
            .to_string()
        };
        let app = router(state(&harness));
        for body in [reaction("U-author", "thumbsup"), reaction("U-stranger", "wastebasket")] {
            let response = app
                .clone()
                .oneshot(slack_request(EVENTS, &body, Utc::now().timestamp(), SLACK_SECRET))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert!(harness.queue.jobs().await.is_empty());

        let response = app
            .oneshot(slack_request(
                EVENTS,
                &reaction("U-author", "wastebasket"),
                Utc::now().timestamp(),
                SLACK_SECRET,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let jobs = harness.queue.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert!(matches!(&jobs[0].kind, JobKind::DeleteTrackedMessage(job) if job.tracked_message_id == message.id));
    }

    #[tokio::test]
    async fn enqueue_failure_is_service_unavailable() {
        let harness = Harness::new();
        harness.queue.set_fail_enqueue(true);
        let body = message_event("hello");

        let response = router(state(&harness))
            .oneshot(slack_request(EVENTS, &body, Utc::now().timestamp(), SLACK_SECRET))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn interactions_are_verified_and_acknowledged() {
        let harness = Harness::new();
        let app = router(state(&harness));

        let ok = app
            .clone()
            .oneshot(slack_request(
                "/webhooks/slack/interactions",
                "payload=%7B%22type%22%3A%22block_actions%22%7D",
                Utc::now().timestamp(),
                SLACK_SECRET,
            ))
            .await
            .expect("response");
        let malformed = app
            .oneshot(slack_request(
                "/webhooks/slack/interactions",
                "{}",
                Utc::now().timestamp(),
                SLACK_SECRET,
            ))
            .await
            .expect("response");

        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    }
}
