//! JSON payloads exchanged with the chat server.
//!
//! Push frames are `{"event": <name>, "data": <payload>}` envelopes. Pull
//! endpoints use the request/response bodies at the bottom of this module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{User, UserId};

/// Frames the server pushes to us.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ServerFrame {
    #[serde(rename = "receivePrivateMessage")]
    PrivateMessage(WireMessage),
    #[serde(rename = "userStatusChanged")]
    StatusChanged(WirePresence),
    #[serde(rename = "userTyping")]
    Typing(WireTyping),
}

/// Frames we push to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ClientFrame {
    #[serde(rename = "userOnline")]
    UserOnline(UserId),
    #[serde(rename = "sendPrivateMessage")]
    SendPrivateMessage(WireOutgoingMessage),
    #[serde(rename = "typing")]
    Typing(WireTyping),
}

/// Stored message as returned by history pulls and pushes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WireOutgoingMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message: String,
    pub correlation_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WirePresence {
    pub user_id: UserId,
    pub is_online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WireTyping {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<UserId>,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Successful login/register response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

/// Error body of a rejected auth call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub user_id: UserId,
    pub contact_id: UserId,
}
