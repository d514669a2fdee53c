//! Synchronization core of the chat client.
//!
//! This crate owns the command/event protocol, the session lifecycle model,
//! and the IO-free reconciliation logic for roster, unread counters, typing
//! indicators and the active conversation. Runtimes feed it pushes, pull
//! results and timer ticks, and carry out the returned effects.

/// Async command/event channel primitives.
pub mod channel;
/// Bounded per-peer message logs.
pub mod conversation;
/// Stable error types and HTTP classification helpers.
pub mod error;
/// Wire-to-domain conversion and push frame codec.
pub mod normalization;
/// Backoff policy used by reconnect loops.
pub mod retry;
/// Known peers and presence.
pub mod roster;
/// Session aggregate and the effects it requests.
pub mod session;
/// Session lifecycle state machine.
pub mod state_machine;
/// Conversation sync engine.
pub mod sync;
/// Frontend-facing protocol types (commands, events, payloads).
pub mod types;
/// Typing indicator timers.
pub mod typing;
/// Unread counters.
pub mod unread;
/// Server JSON payloads.
pub mod wire;

pub use channel::{ChatChannelError, ChatChannels, EventStream};
pub use error::{ChatError, ChatErrorCategory, classify_auth_status, classify_http_status};
pub use normalization::{
    auth_error_message, decode_push_frame, encode_outbound, message_from_wire, normalize_error,
    normalize_unread_counts,
};
pub use retry::{ReconnectBackoff, RetryPolicy};
pub use roster::RosterStore;
pub use session::{ChatSession, SyncEffect};
pub use state_machine::ClientStateMachine;
pub use sync::{ConversationSyncEngine, FetchTicket};
pub use types::{
    ChatCommand, ChatEvent, ClientLifecycleState, ConversationPhase, Message, MessageOrigin,
    OutboundSignal, PushEvent, Session, SyncConfig, User, UserId,
};
pub use typing::TypingCoordinator;
pub use unread::UnreadTracker;
