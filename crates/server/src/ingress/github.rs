use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use prsync_core::{
    signature::{verify_github_signature, SignatureError},
    Job,
};
use prsync_github::is_tracked_event;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, info};

use super::{reject, IngressError, IngressState};

const EVENT_HEADER: &str = "x-github-event";
const DELIVERY_HEADER: &str = "x-github-delivery";
const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Fields every tracked webhook must carry before it is worth queueing.
#[derive(Deserialize)]
struct Envelope {
    action: Option<String>,
    repository: Option<serde_json::Value>,
}

pub async fn receive(
    State(state): State<IngressState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let delivery_id = header(&headers, DELIVERY_HEADER).unwrap_or("unknown").to_owned();
    match accept(&state, &headers, &body, &delivery_id).await {
        Ok(status) => status.into_response(),
        Err(error) => reject("github", error, &delivery_id).into_response(),
    }
}

async fn accept(
    state: &IngressState,
    headers: &HeaderMap,
    body: &[u8],
    delivery_id: &str,
) -> Result<StatusCode, IngressError> {
    let event_type = header(headers, EVENT_HEADER).ok_or(IngressError::MissingHeader(EVENT_HEADER))?;
    header(headers, DELIVERY_HEADER).ok_or(IngressError::MissingHeader(DELIVERY_HEADER))?;
    let signature =
        header(headers, SIGNATURE_HEADER).ok_or(IngressError::Signature(SignatureError::Malformed))?;
    verify_github_signature(body, signature, state.github_secret.expose_secret().as_bytes())?;

    if !is_tracked_event(event_type) {
        debug!(
            event_name = "ingress.github.ignored",
            delivery_id,
            github_event = event_type,
            "event type is not processed"
        );
        return Ok(StatusCode::OK);
    }

    let payload: serde_json::Value = serde_json::from_slice(body)
        .map_err(|error| IngressError::MalformedPayload(error.to_string()))?;
    let envelope = Envelope::deserialize(&payload)
        .map_err(|error| IngressError::MalformedPayload(error.to_string()))?;
    let action = envelope
        .action
        .ok_or_else(|| IngressError::MalformedPayload("missing `action`".to_owned()))?;
    if envelope.repository.is_none() {
        return Err(IngressError::MalformedPayload("missing `repository`".to_owned()));
    }

    let job = Job::webhook(delivery_id, event_type, payload);
    state.services.queue.enqueue(&job).await?;
    info!(
        event_name = "ingress.github.enqueued",
        trace_id = %job.trace_id,
        job_id = %job.id,
        delivery_id,
        github_event = event_type,
        action = %action,
        "webhook queued"
    );
    Ok(StatusCode::ACCEPTED)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use prsync_core::JobKind;
    use tower::ServiceExt;

    use crate::{
        ingress::{
            router,
            tests::{github_request, github_signature, state},
        },
        services::testing::Harness,
    };

    const OPENED: &str = r#"{"action":"opened","repository":{"full_name":"acme/api"},"pull_request":{"number":1}}"#;

    #[tokio::test]
    async fn valid_signed_delivery_is_queued() {
        let harness = Harness::new();
        let response = router(state(&harness))
            .oneshot(github_request("pull_request", OPENED, Some(github_signature(OPENED))))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let jobs = harness.queue.jobs().await;
        assert_eq!(jobs.len(), 1);
        match &jobs[0].kind {
            JobKind::Webhook(webhook) => {
                assert_eq!(webhook.delivery_id, "delivery-1");
                assert_eq!(webhook.event_type, "pull_request");
            }
            other => panic!("unexpected job {other:?}"),
        }
    }

    #[tokio::test]
    async fn bad_or_missing_signatures_are_unauthorized() {
        let harness = Harness::new();
        let app = router(state(&harness));

        let forged = app
            .clone()
            .oneshot(github_request("pull_request", OPENED, Some(github_signature("{}"))))
            .await
            .expect("response");
        let unsigned =
            app.oneshot(github_request("pull_request", OPENED, None)).await.expect("response");

        assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);
        assert!(harness.queue.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn untracked_events_are_acknowledged_without_queueing() {
        let harness = Harness::new();
        let body = r#"{"zen":"Keep it logically awesome."}"#;
        let response = router(state(&harness))
            .oneshot(github_request("ping", body, Some(github_signature(body))))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(harness.queue.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn payload_without_action_is_a_bad_request() {
        let harness = Harness::new();
        let body = r#"{"repository":{"full_name":"acme/api"}}"#;
        let response = router(state(&harness))
            .oneshot(github_request("pull_request", body, Some(github_signature(body))))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn enqueue_failure_is_service_unavailable() {
        let harness = Harness::new();
        harness.queue.set_fail_enqueue(true);
        let response = router(state(&harness))
            .oneshot(github_request("pull_request", OPENED, Some(github_signature(OPENED))))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
