//! Wire-level types for the feed subsystem.
//!
//! Defines the contract with the external pipeline, resolved into explicit
//! tagged unions exactly once at this boundary so that downstream code can
//! pattern-match exhaustively instead of sniffing optional fields.

mod event;
mod send;

pub use event::FeedEvent;
pub use event::LifecycleState;
pub use event::RawEvent;
pub use event::SourceType;
pub use event::StatusVariant;
pub use event::TurnRole;
pub use event::TurnStatus;
pub use event::parse_timestamp;

pub use send::ConversationSendRequest;
pub use send::ConversationSendResponse;
pub use send::PromptAnswer;
pub use send::SendError;
pub use send::SendStatus;
