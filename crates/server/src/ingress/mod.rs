//! HTTP webhook ingress. Handlers verify, enqueue and answer; all business
//! work happens in the worker.

pub mod github;
pub mod slack;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use prsync_core::{signature::SignatureError, InterfaceError};
use prsync_db::QueueError;
use prsync_slack::{EventDispatcher, EventHandlerError};
use secrecy::SecretString;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::services::Services;

use self::slack::SlackIngressService;

#[derive(Clone)]
pub struct IngressState {
    pub services: Services,
    pub github_secret: SecretString,
    pub slack_secret: SecretString,
    pub slack_tolerance_secs: i64,
    pub slack_events: Arc<EventDispatcher<SlackIngressService>>,
}

impl IngressState {
    pub fn new(
        services: Services,
        github_secret: SecretString,
        slack_secret: SecretString,
        slack_tolerance_secs: i64,
    ) -> Self {
        let slack_events = Arc::new(EventDispatcher::new(SlackIngressService::new(services.clone())));
        Self { services, github_secret, slack_secret, slack_tolerance_secs, slack_events }
    }
}

pub fn router(state: IngressState) -> Router {
    Router::new()
        .route("/webhooks/github", post(github::receive))
        .route("/webhooks/slack/events", post(slack::receive_event))
        .route("/webhooks/slack/interactions", post(slack::receive_interaction))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("missing required header `{0}`")]
    MissingHeader(&'static str),
    #[error("signature rejected: {0}")]
    Signature(#[from] SignatureError),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error(transparent)]
    Enqueue(#[from] QueueError),
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

impl IngressError {
    pub fn into_interface(self, correlation_id: &str) -> InterfaceError {
        let correlation_id = correlation_id.to_owned();
        match self {
            Self::MissingHeader(_) | Self::MalformedPayload(_) => {
                InterfaceError::BadRequest { message: self.to_string(), correlation_id }
            }
            Self::Signature(_) => {
                InterfaceError::Unauthorized { message: self.to_string(), correlation_id }
            }
            Self::Enqueue(_) | Self::Handler(_) => {
                InterfaceError::ServiceUnavailable { message: self.to_string(), correlation_id }
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    correlation_id: &'a str,
}

/// Interface error rendered as JSON with user-safe text only.
pub struct ErrorResponse(pub InterfaceError);

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody { error: self.0.user_message(), correlation_id: self.0.correlation_id() };
        (status, Json(body)).into_response()
    }
}

fn reject(source: &'static str, error: IngressError, correlation_id: &str) -> ErrorResponse {
    warn!(
        event_name = "ingress.request.rejected",
        source,
        correlation_id,
        error = %error,
        "webhook request rejected"
    );
    ErrorResponse(error.into_interface(correlation_id))
}

#[cfg(test)]
pub(crate) mod tests {
    use axum::{body::Body, http::Request};
    use prsync_core::signature::{compute_github_signature, compute_slack_signature};
    use secrecy::SecretString;
    use tower::ServiceExt;

    use super::{router, IngressState};
    use crate::services::testing::Harness;

    pub const GITHUB_SECRET: &str = "gh-secret";
    pub const SLACK_SECRET: &str = "slack-secret";

    pub fn state(harness: &Harness) -> IngressState {
        IngressState::new(
            harness.services.clone(),
            SecretString::from(GITHUB_SECRET.to_owned()),
            SecretString::from(SLACK_SECRET.to_owned()),
            300,
        )
    }

    pub fn github_request(event: &str, body: &str, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::post("/webhooks/github")
            .header("content-type", "application/json")
            .header("x-github-event", event)
            .header("x-github-delivery", "delivery-1");
        if let Some(signature) = signature {
            builder = builder.header("x-hub-signature-256", signature);
        }
        builder.body(Body::from(body.to_owned())).expect("request")
    }

    pub fn github_signature(body: &str) -> String {
        compute_github_signature(body.as_bytes(), GITHUB_SECRET.as_bytes())
    }

    pub fn slack_request(path: &str, body: &str, timestamp: i64, secret: &str) -> Request<Body> {
        let timestamp = timestamp.to_string();
        let signature = compute_slack_signature(&timestamp, body.as_bytes(), secret.as_bytes());
        Request::post(path)
            .header("x-slack-request-timestamp", timestamp)
            .header("x-slack-signature", signature)
            .body(Body::from(body.to_owned()))
            .expect("request")
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let harness = Harness::new();
        let response = router(state(&harness))
            .oneshot(Request::get("/webhooks/gitlab").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
