//! Events API callbacks.
//!
//! Slack posts one JSON envelope per event. `url_verification` is answered
//! inline; `event_callback` carries the tenant (`team_id`) and an inner event
//! that is narrowed here into the closed [`SlackEvent`] union. Anything the
//! bot does not act on becomes [`SlackEvent::Unsupported`] so callers can
//! acknowledge it without special cases.

use async_trait::async_trait;
use prsync_core::{ChannelId, MessageTs, SlackUserId, WorkspaceId};
use serde::Deserialize;
use thiserror::Error;

/// Message subtypes that are still a person posting new content.
const USER_CONTENT_SUBTYPES: &[&str] = &["thread_broadcast", "file_share"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackCallback {
    UrlVerification { challenge: String },
    EventCallback(SlackEnvelope),
    /// Envelope types such as `app_rate_limited` that only need an acknowledgement.
    Ignored,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub workspace_id: WorkspaceId,
    pub event_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    MessagePosted(MessagePostedEvent),
    ReactionAdded(ReactionAddedEvent),
    AppHomeOpened { user_id: SlackUserId },
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::MessagePosted(_) => SlackEventType::MessagePosted,
            Self::ReactionAdded(_) => SlackEventType::ReactionAdded,
            Self::AppHomeOpened { .. } => SlackEventType::AppHomeOpened,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    MessagePosted,
    ReactionAdded,
    AppHomeOpened,
    Unsupported,
}

impl SlackEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessagePosted => "message_posted",
            Self::ReactionAdded => "reaction_added",
            Self::AppHomeOpened => "app_home_opened",
            Self::Unsupported => "unsupported",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessagePostedEvent {
    pub channel_id: ChannelId,
    pub user_id: SlackUserId,
    pub message_ts: MessageTs,
    pub thread_ts: Option<MessageTs>,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionAddedEvent {
    pub channel_id: ChannelId,
    pub message_ts: MessageTs,
    pub reactor_user_id: SlackUserId,
    pub reaction: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventParseError {
    #[error("callback body is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("`{event_type}` event is missing `{field}`")]
    MissingField { event_type: String, field: &'static str },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawCallback {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        team_id: String,
        #[serde(default)]
        event_id: Option<String>,
        event: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct RawMessage {
    user: Option<String>,
    channel: Option<String>,
    ts: Option<String>,
    #[serde(default)]
    text: String,
    thread_ts: Option<String>,
    subtype: Option<String>,
    bot_id: Option<String>,
}

#[derive(Deserialize)]
struct RawReaction {
    user: Option<String>,
    reaction: Option<String>,
    item: Option<RawReactionItem>,
}

#[derive(Deserialize)]
struct RawReactionItem {
    #[serde(rename = "type")]
    item_type: String,
    channel: Option<String>,
    ts: Option<String>,
}

pub fn parse_callback(body: &[u8]) -> Result<SlackCallback, EventParseError> {
    let raw: RawCallback = serde_json::from_slice(body)
        .map_err(|error| EventParseError::InvalidJson(error.to_string()))?;

    match raw {
        RawCallback::UrlVerification { challenge } => {
            Ok(SlackCallback::UrlVerification { challenge })
        }
        RawCallback::EventCallback { team_id, event_id, event } => {
            Ok(SlackCallback::EventCallback(SlackEnvelope {
                workspace_id: WorkspaceId(team_id),
                event_id: event_id.unwrap_or_else(|| "unknown".to_owned()),
                event: parse_event(event)?,
            }))
        }
        RawCallback::Other => Ok(SlackCallback::Ignored),
    }
}

fn parse_event(event: serde_json::Value) -> Result<SlackEvent, EventParseError> {
    let event_type = event.get("type").and_then(|value| value.as_str()).unwrap_or("").to_owned();

    match event_type.as_str() {
        "message" => {
            let raw: RawMessage = decode(&event_type, event)?;
            parse_message(raw, &event_type)
        }
        "reaction_added" => {
            let raw: RawReaction = decode(&event_type, event)?;
            parse_reaction(raw, &event_type)
        }
        "app_home_opened" => {
            let user = event.get("user").and_then(|value| value.as_str());
            let user = required(&event_type, "user", user.map(str::to_owned))?;
            Ok(SlackEvent::AppHomeOpened { user_id: SlackUserId(user) })
        }
        _ => Ok(SlackEvent::Unsupported { event_type }),
    }
}

fn parse_message(raw: RawMessage, event_type: &str) -> Result<SlackEvent, EventParseError> {
    let from_person = raw.bot_id.is_none()
        && raw
            .subtype
            .as_deref()
            .map(|subtype| USER_CONTENT_SUBTYPES.contains(&subtype))
            .unwrap_or(true);
    if !from_person {
        let subtype = raw.subtype.unwrap_or_else(|| "bot_message".to_owned());
        return Ok(SlackEvent::Unsupported { event_type: format!("message.{subtype}") });
    }

    Ok(SlackEvent::MessagePosted(MessagePostedEvent {
        channel_id: ChannelId(required(event_type, "channel", raw.channel)?),
        user_id: SlackUserId(required(event_type, "user", raw.user)?),
        message_ts: MessageTs(required(event_type, "ts", raw.ts)?),
        thread_ts: raw.thread_ts.map(MessageTs),
        text: raw.text,
    }))
}

fn parse_reaction(raw: RawReaction, event_type: &str) -> Result<SlackEvent, EventParseError> {
    let item = required(event_type, "item", raw.item)?;
    if item.item_type != "message" {
        return Ok(SlackEvent::Unsupported { event_type: format!("reaction_added.{}", item.item_type) });
    }

    Ok(SlackEvent::ReactionAdded(ReactionAddedEvent {
        channel_id: ChannelId(required(event_type, "item.channel", item.channel)?),
        message_ts: MessageTs(required(event_type, "item.ts", item.ts)?),
        reactor_user_id: SlackUserId(required(event_type, "user", raw.user)?),
        reaction: required(event_type, "reaction", raw.reaction)?,
    }))
}

fn decode<T: serde::de::DeserializeOwned>(
    event_type: &str,
    event: serde_json::Value,
) -> Result<T, EventParseError> {
    serde_json::from_value(event)
        .map_err(|error| EventParseError::InvalidJson(format!("{event_type}: {error}")))
}

fn required<T>(event_type: &str, field: &'static str, value: Option<T>) -> Result<T, EventParseError> {
    value.ok_or_else(|| EventParseError::MissingField { event_type: event_type.to_owned(), field })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Enqueued,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("enqueue failed: {0}")]
    Enqueue(String),
    #[error("lookup failed: {0}")]
    Lookup(String),
}

/// Business side of the events endpoint. Implementations only enqueue work;
/// the callback must be acknowledged within Slack's three second budget.
#[async_trait]
pub trait SlackEventService: Send + Sync {
    async fn message_posted(
        &self,
        workspace: &WorkspaceId,
        event: &MessagePostedEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;

    async fn reaction_added(
        &self,
        workspace: &WorkspaceId,
        event: &ReactionAddedEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

pub struct EventDispatcher<S> {
    service: S,
}

impl<S> EventDispatcher<S>
where
    S: SlackEventService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let workspace = &envelope.workspace_id;
        match &envelope.event {
            SlackEvent::MessagePosted(event) => {
                self.service.message_posted(workspace, event, ctx).await
            }
            SlackEvent::ReactionAdded(event) => {
                self.service.reaction_added(workspace, event, ctx).await
            }
            SlackEvent::AppHomeOpened { .. } | SlackEvent::Unsupported { .. } => {
                Ok(HandlerResult::Ignored)
            }
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use prsync_core::{ChannelId, MessageTs, SlackUserId, WorkspaceId};
    use serde_json::json;

    use super::{
        parse_callback, EventContext, EventDispatcher, EventHandlerError, EventParseError,
        HandlerResult, MessagePostedEvent, ReactionAddedEvent, SlackCallback, SlackEvent,
        SlackEventService, SlackEventType,
    };

    fn callback(event: serde_json::Value) -> Vec<u8> {
        json!({
            "type": "event_callback",
            "team_id": "T1",
            "event_id": "Ev1",
            "event": event,
        })
        .to_string()
        .into_bytes()
    }

    fn parsed_event(event: serde_json::Value) -> SlackEvent {
        match parse_callback(&callback(event)).expect("parse") {
            SlackCallback::EventCallback(envelope) => envelope.event,
            other => panic!("expected event callback, got {other:?}"),
        }
    }

    #[test]
    fn url_verification_returns_challenge() {
        let body = br#"{"type":"url_verification","challenge":"abc123","token":"x"}"#;
        assert_eq!(
            parse_callback(body).expect("parse"),
            SlackCallback::UrlVerification { challenge: "abc123".to_owned() }
        );
    }

    #[test]
    fn unknown_envelope_types_are_acknowledged() {
        let body = br#"{"type":"app_rate_limited","team_id":"T1","minute_rate_limited":1}"#;
        assert_eq!(parse_callback(body).expect("parse"), SlackCallback::Ignored);
    }

    #[test]
    fn plain_user_message_becomes_message_posted() {
        let event = parsed_event(json!({
            "type": "message",
            "channel": "C1",
            "user": "U1",
            "ts": "1730000000.000100",
            "text": "please look at https://github.com/acme/api/pull/7",
        }));

        assert_eq!(
            event,
            SlackEvent::MessagePosted(MessagePostedEvent {
                channel_id: ChannelId("C1".to_owned()),
                user_id: SlackUserId("U1".to_owned()),
                message_ts: MessageTs("1730000000.000100".to_owned()),
                thread_ts: None,
                text: "please look at https://github.com/acme/api/pull/7".to_owned(),
            })
        );
    }

    #[test]
    fn edits_deletes_and_bot_posts_are_unsupported() {
        let edited = parsed_event(json!({
            "type": "message", "subtype": "message_changed", "channel": "C1", "ts": "1.0"
        }));
        assert_eq!(edited.event_type(), SlackEventType::Unsupported);

        let deleted = parsed_event(json!({
            "type": "message", "subtype": "message_deleted", "channel": "C1", "ts": "1.0"
        }));
        assert_eq!(deleted, SlackEvent::Unsupported { event_type: "message.message_deleted".to_owned() });

        let bot = parsed_event(json!({
            "type": "message", "bot_id": "B1", "channel": "C1", "user": "U9", "ts": "1.0", "text": "hi"
        }));
        assert_eq!(bot.event_type(), SlackEventType::Unsupported);
    }

    #[test]
    fn thread_broadcasts_still_count_as_user_messages() {
        let event = parsed_event(json!({
            "type": "message", "subtype": "thread_broadcast", "channel": "C1", "user": "U1",
            "ts": "2.0", "thread_ts": "1.0", "text": "fyi"
        }));
        assert!(matches!(
            event,
            SlackEvent::MessagePosted(MessagePostedEvent { thread_ts: Some(ref ts), .. }) if ts.0 == "1.0"
        ));
    }

    #[test]
    fn reactions_on_messages_are_parsed_and_others_ignored() {
        let event = parsed_event(json!({
            "type": "reaction_added",
            "user": "U2",
            "reaction": "wastebasket",
            "item": { "type": "message", "channel": "C1", "ts": "1.0" },
        }));
        assert_eq!(
            event,
            SlackEvent::ReactionAdded(ReactionAddedEvent {
                channel_id: ChannelId("C1".to_owned()),
                message_ts: MessageTs("1.0".to_owned()),
                reactor_user_id: SlackUserId("U2".to_owned()),
                reaction: "wastebasket".to_owned(),
            })
        );

        let on_file = parsed_event(json!({
            "type": "reaction_added",
            "user": "U2",
            "reaction": "wastebasket",
            "item": { "type": "file", "file": "F1" },
        }));
        assert_eq!(on_file.event_type(), SlackEventType::Unsupported);
    }

    #[test]
    fn malformed_user_message_is_rejected() {
        let result = parse_callback(&callback(json!({ "type": "message", "channel": "C1", "ts": "1.0" })));
        assert_eq!(
            result,
            Err(EventParseError::MissingField { event_type: "message".to_owned(), field: "user" })
        );
        assert!(matches!(parse_callback(b"not json"), Err(EventParseError::InvalidJson(_))));
    }

    #[derive(Default)]
    struct RecordingService {
        calls: Mutex<Vec<SlackEventType>>,
    }

    #[async_trait]
    impl SlackEventService for RecordingService {
        async fn message_posted(
            &self,
            _workspace: &WorkspaceId,
            _event: &MessagePostedEvent,
            _ctx: &EventContext,
        ) -> Result<HandlerResult, EventHandlerError> {
            self.calls.lock().expect("lock").push(SlackEventType::MessagePosted);
            Ok(HandlerResult::Enqueued)
        }

        async fn reaction_added(
            &self,
            _workspace: &WorkspaceId,
            _event: &ReactionAddedEvent,
            _ctx: &EventContext,
        ) -> Result<HandlerResult, EventHandlerError> {
            self.calls.lock().expect("lock").push(SlackEventType::ReactionAdded);
            Err(EventHandlerError::Enqueue("queue offline".to_owned()))
        }
    }

    #[tokio::test]
    async fn dispatcher_routes_supported_events_and_ignores_the_rest() {
        let dispatcher = EventDispatcher::new(RecordingService::default());
        let ctx = EventContext::default();

        for (event, expected) in [
            (json!({"type": "message", "channel": "C1", "user": "U1", "ts": "1.0", "text": "x"}), Ok(HandlerResult::Enqueued)),
            (json!({"type": "app_home_opened", "user": "U1"}), Ok(HandlerResult::Ignored)),
            (json!({"type": "channel_created"}), Ok(HandlerResult::Ignored)),
            (
                json!({"type": "reaction_added", "user": "U1", "reaction": "x", "item": {"type": "message", "channel": "C1", "ts": "1.0"}}),
                Err(EventHandlerError::Enqueue("queue offline".to_owned())),
            ),
        ] {
            let SlackCallback::EventCallback(envelope) = parse_callback(&callback(event)).expect("parse") else {
                panic!("expected event callback");
            };
            assert_eq!(envelope.workspace_id, WorkspaceId("T1".to_owned()));
            assert_eq!(dispatcher.dispatch(&envelope, &ctx).await, expected);
        }

        assert_eq!(
            *dispatcher.service().calls.lock().expect("lock"),
            vec![SlackEventType::MessagePosted, SlackEventType::ReactionAdded]
        );
    }
}
