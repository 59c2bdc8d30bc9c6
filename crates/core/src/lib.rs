pub mod annotations;
pub mod config;
pub mod context;
pub mod domain;
pub mod errors;
pub mod links;
pub mod reaction;
pub mod signature;

pub use annotations::{parse_annotation, Annotation, ChannelRef, NotifyDirective};
pub use context::LogContext;
pub use domain::identity::UserLink;
pub use domain::job::{Job, JobId, JobKind, TraceId};
pub use domain::pull_request::{PrState, ReviewOutcome, TerminalState};
pub use domain::repository::{RepoFullName, RepoRegistration};
pub use domain::tracked_message::{
    BotMessageReservation, MessageSource, MessageTarget, ReservationOutcome, TrackedMessage,
    TrackedMessageId,
};
pub use domain::workspace::{ChannelConfig, ChannelId, MessageTs, SlackUserId, WorkspaceId};
pub use errors::{ApplicationError, ErrorKind, InterfaceError};
pub use links::{find_pr_references, scan_message, LinkScan, PrReference};
pub use reaction::{DesiredState, ReactionPlan, ReactionStep, ReactionVocabulary, ReviewTarget};
