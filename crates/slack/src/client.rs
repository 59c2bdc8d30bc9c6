//! Workspace-scoped Slack Web API access.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use prsync_core::{
    reaction::normalize_reaction, ApplicationError, ChannelId, ErrorKind, MessageTarget,
    MessageTs, SlackUserId, WorkspaceId,
};
use reqwest::{header::RETRY_AFTER, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::blocks::MessageTemplate;

const REQUEST_TIMEOUT_SECS: u64 = 10;
const CHANNEL_PAGE_LIMIT: &str = "200";
/// Upper bound on `conversations.list` pages walked for one name lookup.
const MAX_CHANNEL_PAGES: usize = 50;

/// Slack error codes worth another attempt.
const TRANSIENT_CODES: &[&str] =
    &["ratelimited", "internal_error", "fatal_error", "service_unavailable", "request_timeout"];

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SlackApiError {
    #[error("slack `{method}` failed: {code}")]
    Api { method: &'static str, code: String },
    #[error("slack `{method}` rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { method: &'static str, retry_after_secs: Option<u64> },
    #[error("slack `{method}` returned HTTP {status}")]
    Http { method: &'static str, status: u16 },
    #[error("slack `{method}` transport error: {message}")]
    Transport { method: &'static str, message: String },
    #[error("slack `{method}` response could not be decoded: {message}")]
    Decode { method: &'static str, message: String },
    #[error("workspace {workspace} has no bot installation")]
    NotInstalled { workspace: WorkspaceId },
    #[error("bot user id for workspace {workspace} is unknown")]
    BotUserUnknown { workspace: WorkspaceId },
    #[error("credential lookup failed: {0}")]
    Credentials(String),
}

impl SlackApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api { code, .. } if TRANSIENT_CODES.contains(&code.as_str()) => {
                ErrorKind::TransientDependency
            }
            Self::Api { .. } => ErrorKind::PermanentDependency,
            Self::RateLimited { .. } | Self::Transport { .. } | Self::Credentials(_) => {
                ErrorKind::TransientDependency
            }
            Self::Http { status, .. } if *status >= 500 || *status == 408 => {
                ErrorKind::TransientDependency
            }
            Self::Http { .. }
            | Self::Decode { .. }
            | Self::NotInstalled { .. }
            | Self::BotUserUnknown { .. } => ErrorKind::PermanentDependency,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Slack error code for API-level failures.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            Self::RateLimited { .. } => Some("ratelimited"),
            _ => None,
        }
    }
}

impl From<SlackApiError> for ApplicationError {
    fn from(error: SlackApiError) -> Self {
        ApplicationError::from_kind(error.kind(), error.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel_id: ChannelId,
    pub message_ts: MessageTs,
}

/// Result of an idempotent reaction mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReactionChange {
    Applied,
    AlreadyInState,
}

#[derive(Clone, Debug)]
pub struct WorkspaceCredentials {
    pub bot_token: SecretString,
    pub bot_user_id: Option<SlackUserId>,
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn credentials(&self, workspace: &WorkspaceId)
        -> Result<WorkspaceCredentials, SlackApiError>;
}

#[async_trait]
pub trait SlackApi: Send + Sync {
    async fn post_message(
        &self,
        workspace: &WorkspaceId,
        channel: &ChannelId,
        message: &MessageTemplate,
    ) -> Result<PostedMessage, SlackApiError>;

    /// `already_reacted` counts as success.
    async fn add_reaction(
        &self,
        workspace: &WorkspaceId,
        target: &MessageTarget,
        name: &str,
    ) -> Result<ReactionChange, SlackApiError>;

    /// `no_reaction` counts as success.
    async fn remove_reaction(
        &self,
        workspace: &WorkspaceId,
        target: &MessageTarget,
        name: &str,
    ) -> Result<ReactionChange, SlackApiError>;

    /// Normalized names of the reactions the bot itself has placed on a message.
    async fn bot_reactions(
        &self,
        workspace: &WorkspaceId,
        target: &MessageTarget,
    ) -> Result<BTreeSet<String>, SlackApiError>;

    /// `message_not_found` counts as success.
    async fn delete_message(
        &self,
        workspace: &WorkspaceId,
        target: &MessageTarget,
    ) -> Result<(), SlackApiError>;

    /// Looks a channel up by name; `None` when the workspace has no such channel.
    async fn resolve_channel(
        &self,
        workspace: &WorkspaceId,
        name: &str,
    ) -> Result<Option<ChannelId>, SlackApiError>;
}

pub struct HttpSlackClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl HttpSlackClient {
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, SlackApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("prsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| SlackApiError::Transport {
                method: "client.build",
                message: error.to_string(),
            })?;
        Ok(Self { http, base_url: base_url.into().trim_end_matches('/').to_owned(), tokens })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    async fn post_json(
        &self,
        workspace: &WorkspaceId,
        method: &'static str,
        body: Value,
    ) -> Result<Value, SlackApiError> {
        let credentials = self.tokens.credentials(workspace).await?;
        let request = self
            .http
            .post(self.url(method))
            .bearer_auth(credentials.bot_token.expose_secret())
            .json(&body);
        self.send(workspace, method, request).await
    }

    async fn get(
        &self,
        workspace: &WorkspaceId,
        credentials: &WorkspaceCredentials,
        method: &'static str,
        query: &[(&str, &str)],
    ) -> Result<Value, SlackApiError> {
        let request = self
            .http
            .get(self.url(method))
            .bearer_auth(credentials.bot_token.expose_secret())
            .query(query);
        self.send(workspace, method, request).await
    }

    async fn send(
        &self,
        workspace: &WorkspaceId,
        method: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, SlackApiError> {
        debug!(event_name = "slack.api.call", method, workspace_id = %workspace, "calling slack");

        let response = request
            .send()
            .await
            .map_err(|error| SlackApiError::Transport { method, message: error.to_string() })?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok());
            return Err(SlackApiError::RateLimited { method, retry_after_secs });
        }
        if !status.is_success() {
            return Err(SlackApiError::Http { method, status: status.as_u16() });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|error| SlackApiError::Decode { method, message: error.to_string() })?;
        if body.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(body);
        }
        let code = body.get("error").and_then(Value::as_str).unwrap_or("unknown_error").to_owned();
        if code == "ratelimited" {
            return Err(SlackApiError::RateLimited { method, retry_after_secs: None });
        }
        Err(SlackApiError::Api { method, code })
    }

    async fn mutate_reaction(
        &self,
        workspace: &WorkspaceId,
        method: &'static str,
        target: &MessageTarget,
        name: &str,
        already_code: &str,
    ) -> Result<ReactionChange, SlackApiError> {
        let body = json!({
            "channel": target.channel_id.0,
            "timestamp": target.message_ts.0,
            "name": normalize_reaction(name),
        });
        match self.post_json(workspace, method, body).await {
            Ok(_) => Ok(ReactionChange::Applied),
            Err(SlackApiError::Api { code, .. }) if code == already_code => {
                Ok(ReactionChange::AlreadyInState)
            }
            Err(error) => Err(error),
        }
    }
}

#[derive(Deserialize)]
struct ReactionsGetResponse {
    message: Option<ReactionsGetMessage>,
}

#[derive(Deserialize)]
struct ReactionsGetMessage {
    #[serde(default)]
    reactions: Vec<RawReaction>,
}

#[derive(Deserialize)]
struct RawReaction {
    name: String,
    #[serde(default)]
    users: Vec<String>,
}

#[derive(Deserialize)]
struct ConversationsPage {
    #[serde(default)]
    channels: Vec<RawChannel>,
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Deserialize)]
struct RawChannel {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

fn decode<T: serde::de::DeserializeOwned>(
    method: &'static str,
    body: Value,
) -> Result<T, SlackApiError> {
    serde_json::from_value(body)
        .map_err(|error| SlackApiError::Decode { method, message: error.to_string() })
}

#[async_trait]
impl SlackApi for HttpSlackClient {
    async fn post_message(
        &self,
        workspace: &WorkspaceId,
        channel: &ChannelId,
        message: &MessageTemplate,
    ) -> Result<PostedMessage, SlackApiError> {
        const METHOD: &str = "chat.postMessage";
        let body = self.post_json(workspace, METHOD, message.to_post_body(&channel.0)).await?;
        let ts = body.get("ts").and_then(Value::as_str).ok_or_else(|| SlackApiError::Decode {
            method: METHOD,
            message: "response has no `ts`".to_owned(),
        })?;
        let channel_id =
            body.get("channel").and_then(Value::as_str).map(str::to_owned).unwrap_or_else(|| channel.0.clone());

        Ok(PostedMessage { channel_id: ChannelId(channel_id), message_ts: MessageTs(ts.to_owned()) })
    }

    async fn add_reaction(
        &self,
        workspace: &WorkspaceId,
        target: &MessageTarget,
        name: &str,
    ) -> Result<ReactionChange, SlackApiError> {
        self.mutate_reaction(workspace, "reactions.add", target, name, "already_reacted").await
    }

    async fn remove_reaction(
        &self,
        workspace: &WorkspaceId,
        target: &MessageTarget,
        name: &str,
    ) -> Result<ReactionChange, SlackApiError> {
        self.mutate_reaction(workspace, "reactions.remove", target, name, "no_reaction").await
    }

    async fn bot_reactions(
        &self,
        workspace: &WorkspaceId,
        target: &MessageTarget,
    ) -> Result<BTreeSet<String>, SlackApiError> {
        const METHOD: &str = "reactions.get";
        let credentials = self.tokens.credentials(workspace).await?;
        let bot_user = credentials
            .bot_user_id
            .clone()
            .ok_or_else(|| SlackApiError::BotUserUnknown { workspace: workspace.clone() })?;

        let body = self
            .get(
                workspace,
                &credentials,
                METHOD,
                &[
                    ("channel", target.channel_id.0.as_str()),
                    ("timestamp", target.message_ts.0.as_str()),
                    ("full", "true"),
                ],
            )
            .await?;
        let response: ReactionsGetResponse = decode(METHOD, body)?;

        Ok(response
            .message
            .map(|message| message.reactions)
            .unwrap_or_default()
            .into_iter()
            .filter(|reaction| reaction.users.iter().any(|user| user == &bot_user.0))
            .map(|reaction| normalize_reaction(&reaction.name))
            .collect())
    }

    async fn delete_message(
        &self,
        workspace: &WorkspaceId,
        target: &MessageTarget,
    ) -> Result<(), SlackApiError> {
        let body = json!({ "channel": target.channel_id.0, "ts": target.message_ts.0 });
        match self.post_json(workspace, "chat.delete", body).await {
            Ok(_) => Ok(()),
            Err(SlackApiError::Api { code, .. }) if code == "message_not_found" => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn resolve_channel(
        &self,
        workspace: &WorkspaceId,
        name: &str,
    ) -> Result<Option<ChannelId>, SlackApiError> {
        const METHOD: &str = "conversations.list";
        let wanted = name.trim().trim_start_matches('#').to_ascii_lowercase();
        let credentials = self.tokens.credentials(workspace).await?;
        let mut cursor = String::new();

        for _ in 0..MAX_CHANNEL_PAGES {
            let mut query = vec![
                ("types", "public_channel,private_channel"),
                ("exclude_archived", "true"),
                ("limit", CHANNEL_PAGE_LIMIT),
            ];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.as_str()));
            }
            let body = self.get(workspace, &credentials, METHOD, &query).await?;
            let page: ConversationsPage = decode(METHOD, body)?;

            if let Some(channel) = page.channels.into_iter().find(|channel| channel.name == wanted)
            {
                return Ok(Some(ChannelId(channel.id)));
            }
            match page.response_metadata.map(|metadata| metadata.next_cursor) {
                Some(next) if !next.is_empty() => cursor = next,
                _ => return Ok(None),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use prsync_core::{ApplicationError, ErrorKind, WorkspaceId};

    use super::SlackApiError;

    #[test]
    fn rate_limits_server_errors_and_network_failures_are_retryable() {
        assert!(SlackApiError::RateLimited { method: "reactions.add", retry_after_secs: Some(3) }
            .is_retryable());
        assert!(SlackApiError::Http { method: "chat.postMessage", status: 503 }.is_retryable());
        assert!(SlackApiError::Transport { method: "chat.postMessage", message: "reset".into() }
            .is_retryable());
        assert!(SlackApiError::Api { method: "chat.postMessage", code: "internal_error".into() }
            .is_retryable());
    }

    #[test]
    fn channel_and_auth_errors_are_permanent() {
        for code in ["channel_not_found", "message_not_found", "not_in_channel", "invalid_auth", "missing_scope"] {
            let error = SlackApiError::Api { method: "chat.postMessage", code: code.to_owned() };
            assert_eq!(error.kind(), ErrorKind::PermanentDependency, "{code}");
        }
        assert!(!SlackApiError::Http { method: "reactions.get", status: 403 }.is_retryable());
        assert!(!SlackApiError::NotInstalled { workspace: WorkspaceId("T1".into()) }.is_retryable());
    }

    #[test]
    fn converts_into_application_error_with_same_classification() {
        let error: ApplicationError =
            SlackApiError::RateLimited { method: "reactions.add", retry_after_secs: None }.into();
        assert!(error.is_retryable());

        let error: ApplicationError =
            SlackApiError::Api { method: "chat.delete", code: "cant_delete_message".into() }.into();
        assert_eq!(error.kind(), ErrorKind::PermanentDependency);
    }
}
