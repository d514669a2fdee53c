//! Terminal state reducer: folds runtime events into printable lines.

use std::collections::{BTreeMap, HashSet};

use chat_core::{ChatEvent, ClientLifecycleState, ConversationPhase, Message, User, UserId};
use tracing::trace;

/// Number of history lines printed when a conversation finishes loading.
const HISTORY_TAIL: usize = 20;

#[derive(Debug, Default)]
pub struct TermView {
    me: Option<User>,
    roster: Vec<User>,
    active_peer: Option<UserId>,
    typing: HashSet<UserId>,
    unread: BTreeMap<UserId, u64>,
    connected: bool,
}

impl TermView {
    pub fn active_peer(&self) -> Option<UserId> {
        self.active_peer
    }

    pub fn is_signed_in(&self) -> bool {
        self.me.is_some()
    }

    /// Resolve `/open` input: a numeric id or a roster username
    /// (case-insensitive).
    pub fn resolve_target(&self, target: &str) -> Option<UserId> {
        if let Ok(id) = target.parse::<UserId>() {
            return Some(id);
        }
        self.roster
            .iter()
            .find(|user| user.username.eq_ignore_ascii_case(target))
            .map(|user| user.id)
    }

    pub fn prompt(&self) -> String {
        let link = if self.connected { "" } else { " (offline)" };
        match self.active_peer {
            Some(peer) => {
                let typing = if self.typing.contains(&peer) {
                    " is typing"
                } else {
                    ""
                };
                format!("[{}{typing}]{link}> ", self.name_of(peer))
            }
            None => format!("[no conversation]{link}> "),
        }
    }

    pub fn roster_lines(&self) -> Vec<String> {
        if self.roster.is_empty() {
            return vec!["no contacts".to_owned()];
        }
        self.roster
            .iter()
            .map(|user| {
                let presence = if user.is_online { "online" } else { "offline" };
                let unread = match self.unread.get(&user.id) {
                    Some(count) => format!(" ({count} unread)"),
                    None => String::new(),
                };
                format!("  #{} {} [{presence}]{unread}", user.id, user.username)
            })
            .collect()
    }

    pub fn unread_lines(&self) -> Vec<String> {
        if self.unread.is_empty() {
            return vec!["no unread messages".to_owned()];
        }
        self.unread
            .iter()
            .map(|(peer, count)| format!("  {}: {count}", self.name_of(*peer)))
            .collect()
    }

    /// Apply one event and return the lines worth printing.
    pub fn handle_event(&mut self, event: ChatEvent) -> Vec<String> {
        match event {
            ChatEvent::StateChanged { state } => {
                if state == ClientLifecycleState::SignedOut {
                    *self = Self::default();
                }
                vec![format!("-- {}", lifecycle_label(state))]
            }
            ChatEvent::AuthResult {
                success,
                error_code,
                user,
            } => {
                if success {
                    let name = user
                        .as_ref()
                        .map(|u| u.username.clone())
                        .unwrap_or_else(|| "unknown".to_owned());
                    self.me = user;
                    vec![format!("-- signed in as {name}")]
                } else {
                    let code = error_code.unwrap_or_else(|| "unknown".to_owned());
                    vec![auth_error_text(&code)]
                }
            }
            ChatEvent::RosterUpdated { users } => {
                self.roster = users;
                let mut lines = vec![format!("-- {} contacts", self.roster.len())];
                lines.extend(self.roster_lines());
                lines
            }
            ChatEvent::PresenceChanged { user_id, is_online } => {
                let Some(user) = self.roster.iter_mut().find(|u| u.id == user_id) else {
                    return Vec::new();
                };
                user.is_online = is_online;
                let state = if is_online { "online" } else { "offline" };
                vec![format!("-- {} is {state}", user.username)]
            }
            ChatEvent::ConversationSnapshot {
                peer_id,
                phase,
                messages,
            } => self.apply_snapshot(peer_id, phase, &messages),
            ChatEvent::MessageAppended { peer_id, message } => {
                if self.active_peer != Some(peer_id) {
                    return Vec::new();
                }
                vec![self.format_message(&message)]
            }
            ChatEvent::TypingChanged { peer_id, is_typing } => {
                trace!(peer_id, is_typing, "typing flag");
                if is_typing {
                    self.typing.insert(peer_id);
                } else {
                    self.typing.remove(&peer_id);
                }
                Vec::new()
            }
            ChatEvent::UnreadUpdated { counts } => {
                let newly_unread: Vec<UserId> = counts
                    .iter()
                    .filter(|(peer, count)| self.unread.get(*peer).copied().unwrap_or(0) < **count)
                    .map(|(peer, _)| *peer)
                    .collect();
                self.unread = counts;
                newly_unread
                    .into_iter()
                    .map(|peer| {
                        format!(
                            "-- new message from {} ({} unread)",
                            self.name_of(peer),
                            self.unread.get(&peer).copied().unwrap_or(0)
                        )
                    })
                    .collect()
            }
            ChatEvent::ConnectionStatus {
                connected,
                retry_in_ms,
            } => {
                let was_connected = std::mem::replace(&mut self.connected, connected);
                match (connected, retry_in_ms) {
                    (true, _) if !was_connected => vec!["-- connected".to_owned()],
                    (true, _) => Vec::new(),
                    (false, Some(delay)) => vec![format!("-- disconnected, retrying in {delay} ms")],
                    (false, None) => vec!["-- disconnected".to_owned()],
                }
            }
            ChatEvent::Error { code, message, .. } => vec![format!("!! {code}: {message}")],
        }
    }

    fn apply_snapshot(
        &mut self,
        peer_id: UserId,
        phase: ConversationPhase,
        messages: &[Message],
    ) -> Vec<String> {
        match phase {
            ConversationPhase::Loading => {
                self.active_peer = Some(peer_id);
                vec![format!("-- loading conversation with {}", self.name_of(peer_id))]
            }
            ConversationPhase::Ready => {
                self.active_peer = Some(peer_id);
                let skip = messages.len().saturating_sub(HISTORY_TAIL);
                let mut lines = vec![format!(
                    "-- conversation with {} ({} messages)",
                    self.name_of(peer_id),
                    messages.len()
                )];
                lines.extend(messages[skip..].iter().map(|m| self.format_message(m)));
                lines
            }
            ConversationPhase::Inactive => {
                if self.active_peer == Some(peer_id) {
                    self.active_peer = None;
                }
                Vec::new()
            }
        }
    }

    fn name_of(&self, user_id: UserId) -> String {
        if let Some(me) = &self.me
            && me.id == user_id
        {
            return "you".to_owned();
        }
        self.roster
            .iter()
            .find(|user| user.id == user_id)
            .map(|user| user.username.clone())
            .unwrap_or_else(|| format!("#{user_id}"))
    }

    fn format_message(&self, message: &Message) -> String {
        format!(
            "{} {}: {}",
            message.created_at.format("%H:%M"),
            self.name_of(message.sender_id),
            message.body
        )
    }
}

fn lifecycle_label(state: ClientLifecycleState) -> &'static str {
    match state {
        ClientLifecycleState::SignedOut => "signed out",
        ClientLifecycleState::Authenticating => "authenticating",
        ClientLifecycleState::Online => "online",
        ClientLifecycleState::Offline => "offline",
    }
}

fn auth_error_text(code: &str) -> String {
    match code {
        "no_saved_session" => "-- no saved session, use /login or /register".to_owned(),
        other => format!("!! authentication failed ({other})"),
    }
}
