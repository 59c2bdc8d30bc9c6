//! Slack integration for prsync
//!
//! - **Events** (`events`) - Events API envelopes parsed into a closed event union and
//!   dispatched by exhaustive match
//! - **Web API** (`client`) - workspace-scoped calls for posting, reactions and deletion
//! - **Block Kit** (`blocks`) - pull request notification builder
//! - **Doubles** (`memory`) - in-memory Slack workspace for tests
//!
//! # Architecture
//!
//! ```text
//! Events API callback → parse_callback → EventDispatcher → SlackEventService (server)
//!
//! worker → SlackApi → HttpSlackClient → Slack Web API (per-workspace bot token)
//! ```

pub mod blocks;
pub mod client;
pub mod events;
pub mod memory;

pub use blocks::{pull_request_notification, MessageBuilder, MessageTemplate, PullRequestSummary};
pub use client::{
    HttpSlackClient, PostedMessage, ReactionChange, SlackApi, SlackApiError, TokenSource,
    WorkspaceCredentials,
};
pub use events::{
    parse_callback, EventContext, EventDispatcher, EventHandlerError, EventParseError,
    HandlerResult, MessagePostedEvent, ReactionAddedEvent, SlackCallback, SlackEnvelope,
    SlackEvent, SlackEventService,
};
pub use memory::{InMemorySlackApi, RecordedPost};
