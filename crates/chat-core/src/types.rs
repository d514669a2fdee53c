use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable user identifier assigned by the directory server.
pub type UserId = i64;

/// High-level client lifecycle state reported to the frontend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClientLifecycleState {
    /// No session exists.
    SignedOut,
    /// A login, registration or restore flow is running.
    Authenticating,
    /// Session established and the push channel is connected.
    Online,
    /// Session established but the push channel is down.
    Offline,
}

/// Per-conversation loading state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConversationPhase {
    #[default]
    Inactive,
    Loading,
    Ready,
}

/// Where a message entry came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MessageOrigin {
    /// Built locally and shown before the server saw it.
    LocalOptimistic,
    /// Delivered over the push channel.
    RemotePushed,
    /// Part of a full history pull.
    FetchedHistory,
}

/// A known peer (or the session user).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Avatar URL or asset reference.
    #[serde(rename = "avatar", default)]
    pub avatar_ref: Option<String>,
    #[serde(rename = "isOnline", alias = "is_online", default)]
    pub is_online: bool,
}

/// Authenticated identity owned by the session gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub user: User,
    /// Opaque bearer token.
    pub token: String,
}

/// One chat message. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub origin: MessageOrigin,
    /// Client-generated id carried on optimistic sends.
    pub correlation_id: Option<Uuid>,
}

impl Message {
    /// `true` when `user_id` is either side of the message.
    pub fn involves(&self, user_id: UserId) -> bool {
        self.sender_id == user_id || self.receiver_id == user_id
    }

    /// The other side of the conversation, seen from `self_id`.
    pub fn peer_of(&self, self_id: UserId) -> UserId {
        if self.sender_id == self_id {
            self.receiver_id
        } else {
            self.sender_id
        }
    }

    /// Content equality ignoring origin and correlation id.
    pub fn same_record(&self, other: &Message) -> bool {
        self.sender_id == other.sender_id
            && self.receiver_id == other.receiver_id
            && self.body == other.body
            && self.created_at == other.created_at
    }
}

/// Tuning values for the synchronization core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    /// How long a received typing flag survives without a refresh.
    pub typing_grace_ms: u64,
    /// Keystroke silence after which `isTyping: false` is sent.
    pub typing_idle_ms: u64,
    /// Retained messages per conversation.
    pub conversation_max_items: usize,
    /// Broadcast buffer for frontend events.
    pub event_buffer: usize,
    /// Bounded queue for frontend commands.
    pub command_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            typing_grace_ms: 3_000,
            typing_idle_ms: 1_000,
            conversation_max_items: 1_000,
            event_buffer: 512,
            command_buffer: 128,
        }
    }
}

/// Typed events produced by the connection manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PushEvent {
    /// The push channel (re)connected.
    Connected,
    /// A chat message was pushed.
    PeerMessage(Message),
    /// A peer went on- or offline.
    PresenceChanged { user_id: UserId, is_online: bool },
    /// A peer started or stopped typing.
    TypingSignal {
        user_id: UserId,
        contact_id: Option<UserId>,
        is_typing: bool,
    },
    /// The push channel was lost or a connect attempt failed.
    Disconnected {
        reason: String,
        retry_in_ms: Option<u64>,
    },
}

/// Outbound emissions on the shared push channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutboundSignal {
    PresenceAnnounce {
        user_id: UserId,
    },
    PeerMessage {
        sender_id: UserId,
        receiver_id: UserId,
        body: String,
        correlation_id: Uuid,
    },
    TypingSignal {
        user_id: UserId,
        contact_id: UserId,
        is_typing: bool,
    },
}

/// Command channel input accepted by the client runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatCommand {
    /// Authenticate with existing credentials.
    Login { username: String, password: String },
    /// Create an account and sign in.
    Register {
        username: String,
        email: String,
        password: String,
    },
    /// Restore the persisted session without re-authenticating.
    RestoreSession,
    /// Drop the session and every piece of per-session state.
    Logout,
    /// Re-pull roster and unread counts.
    RefreshRoster,
    /// Make `peer_id` the active conversation.
    SelectPeer { peer_id: UserId },
    /// Send a message to the active conversation.
    SendMessage { body: String },
    /// One local keystroke in the composer.
    Keystroke,
}

/// Event channel output emitted by the client runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatEvent {
    /// Lifecycle transition.
    StateChanged { state: ClientLifecycleState },
    /// Result of a login/register/restore flow.
    AuthResult {
        success: bool,
        error_code: Option<String>,
        user: Option<User>,
    },
    /// Full roster replacement (never contains the session user).
    RosterUpdated { users: Vec<User> },
    /// One roster entry changed presence.
    PresenceChanged { user_id: UserId, is_online: bool },
    /// Full log replacement for one conversation.
    ConversationSnapshot {
        peer_id: UserId,
        phase: ConversationPhase,
        messages: Vec<Message>,
    },
    /// One entry appended to the active log.
    MessageAppended { peer_id: UserId, message: Message },
    /// Received typing flag transition.
    TypingChanged { peer_id: UserId, is_typing: bool },
    /// Full unread snapshot.
    UnreadUpdated { counts: BTreeMap<UserId, u64> },
    /// Push channel status.
    ConnectionStatus {
        connected: bool,
        retry_in_ms: Option<u64>,
    },
    /// A recoverable or internal failure.
    Error {
        code: String,
        message: String,
        recoverable: bool,
    },
}
