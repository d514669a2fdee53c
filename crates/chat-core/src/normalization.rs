use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::{
    error::{ChatError, ChatErrorCategory},
    types::{ChatEvent, Message, MessageOrigin, OutboundSignal, PushEvent, UserId},
    wire::{
        AuthErrorBody, ClientFrame, ServerFrame, WireMessage, WireOutgoingMessage, WireTyping,
    },
};

const DEFAULT_AUTH_ERROR: &str = "Authentication failed";

/// Convert a wire message into a domain message tagged with `origin`.
pub fn message_from_wire(wire: WireMessage, origin: MessageOrigin) -> Message {
    Message {
        sender_id: wire.sender_id,
        receiver_id: wire.receiver_id,
        body: wire.message,
        created_at: wire.created_at,
        origin,
        correlation_id: wire.correlation_id,
    }
}

pub fn push_event_from_frame(frame: ServerFrame) -> PushEvent {
    match frame {
        ServerFrame::PrivateMessage(wire) => {
            PushEvent::PeerMessage(message_from_wire(wire, MessageOrigin::RemotePushed))
        }
        ServerFrame::StatusChanged(presence) => PushEvent::PresenceChanged {
            user_id: presence.user_id,
            is_online: presence.is_online,
        },
        ServerFrame::Typing(typing) => PushEvent::TypingSignal {
            user_id: typing.user_id,
            contact_id: typing.contact_id,
            is_typing: typing.is_typing,
        },
    }
}

pub fn frame_from_outbound(signal: OutboundSignal) -> ClientFrame {
    match signal {
        OutboundSignal::PresenceAnnounce { user_id } => ClientFrame::UserOnline(user_id),
        OutboundSignal::PeerMessage {
            sender_id,
            receiver_id,
            body,
            correlation_id,
        } => ClientFrame::SendPrivateMessage(WireOutgoingMessage {
            sender_id,
            receiver_id,
            message: body,
            correlation_id,
        }),
        OutboundSignal::TypingSignal {
            user_id,
            contact_id,
            is_typing,
        } => ClientFrame::Typing(WireTyping {
            user_id,
            contact_id: Some(contact_id),
            is_typing,
        }),
    }
}

/// Decode one text frame from the push channel.
pub fn decode_push_frame(text: &str) -> Result<PushEvent, ChatError> {
    serde_json::from_str::<ServerFrame>(text)
        .map(push_event_from_frame)
        .map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Serialization,
                "malformed_frame",
                err.to_string(),
            )
        })
}

/// Encode one outbound signal as a text frame.
pub fn encode_outbound(signal: OutboundSignal) -> Result<String, ChatError> {
    serde_json::to_string(&frame_from_outbound(signal)).map_err(|err| {
        ChatError::new(
            ChatErrorCategory::Serialization,
            "encode_failed",
            err.to_string(),
        )
    })
}

/// Normalize a raw `{peerId: count}` object. Counts may arrive as numbers or
/// numeric strings; unparseable entries and zero counts are dropped.
pub fn normalize_unread_counts(raw: HashMap<String, Value>) -> HashMap<UserId, u64> {
    raw.into_iter()
        .filter_map(|(key, value)| {
            let Ok(peer_id) = key.trim().parse::<UserId>() else {
                warn!(key = %key, "dropping unread entry with non-numeric peer id");
                return None;
            };
            let count = match &value {
                Value::Number(number) => number.as_u64(),
                Value::String(text) => text.trim().parse::<u64>().ok(),
                _ => None,
            };
            match count {
                Some(0) => None,
                Some(count) => Some((peer_id, count)),
                None => {
                    warn!(peer_id, value = %value, "dropping unread entry with invalid count");
                    None
                }
            }
        })
        .collect()
}

/// Human-readable message from a rejected auth call body.
pub fn auth_error_message(body: &str) -> String {
    serde_json::from_str::<AuthErrorBody>(body)
        .ok()
        .and_then(|body| body.error)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_AUTH_ERROR.to_owned())
}

/// Convert an error into a frontend `Error` event.
pub fn normalize_error(error: ChatError) -> ChatEvent {
    let recoverable = error.is_recoverable();
    ChatEvent::Error {
        code: error.code,
        message: error.message,
        recoverable,
    }
}
