//! Per-session aggregate tying roster, unread, typing and the conversation
//! engine together.
//!
//! Every handler is synchronous and returns the [`SyncEffect`]s the runtime
//! must carry out. Nothing in here touches the network or the clock.

use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::ChatError,
    normalization::normalize_error,
    roster::RosterStore,
    sync::{ConversationSyncEngine, FetchResolution, FetchTicket, PushRoute, SelectOutcome},
    types::{ChatEvent, Message, OutboundSignal, PushEvent, Session, SyncConfig, User, UserId},
    typing::{TypingChange, TypingCoordinator},
    unread::UnreadTracker,
};

/// Work the runtime must perform on behalf of a [`ChatSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEffect {
    /// Emit on the shared push channel.
    Outbound(OutboundSignal),
    /// Pull history for the ticket's peer and hand it back via
    /// [`ChatSession::complete_history`].
    FetchHistory(FetchTicket),
    /// Acknowledge that the session user has read `contact_id`'s messages.
    MarkRead { contact_id: UserId },
    /// Pull the user directory and hand it to [`ChatSession::apply_roster`].
    FetchRoster,
    /// Pull unread counts and hand them to [`ChatSession::apply_unread`].
    FetchUnread,
    /// Forward to frontend subscribers.
    Notify(ChatEvent),
}

#[derive(Debug, Clone)]
pub struct ChatSession {
    session: Session,
    roster: RosterStore,
    unread: UnreadTracker,
    typing: TypingCoordinator,
    engine: ConversationSyncEngine,
    has_connected: bool,
}

impl ChatSession {
    pub fn new(session: Session, config: &SyncConfig) -> Self {
        let self_id = session.user.id;
        Self {
            roster: RosterStore::new(self_id),
            unread: UnreadTracker::default(),
            typing: TypingCoordinator::new(
                self_id,
                Duration::from_millis(config.typing_grace_ms),
                Duration::from_millis(config.typing_idle_ms),
            ),
            engine: ConversationSyncEngine::new(self_id, config.conversation_max_items),
            has_connected: false,
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn self_id(&self) -> UserId {
        self.session.user.id
    }

    pub fn roster(&self) -> &RosterStore {
        &self.roster
    }

    pub fn unread(&self) -> &UnreadTracker {
        &self.unread
    }

    pub fn typing(&self) -> &TypingCoordinator {
        &self.typing
    }

    pub fn conversations(&self) -> &ConversationSyncEngine {
        &self.engine
    }

    /// Initial pulls issued right after authentication.
    pub fn bootstrap(&self) -> Vec<SyncEffect> {
        vec![SyncEffect::FetchRoster, SyncEffect::FetchUnread]
    }

    pub fn apply_roster(&mut self, users: Vec<User>) -> Vec<SyncEffect> {
        self.roster.load(users);
        vec![notify(ChatEvent::RosterUpdated {
            users: self.roster.users().to_vec(),
        })]
    }

    pub fn apply_unread(&mut self, counts: HashMap<UserId, u64>) -> Vec<SyncEffect> {
        self.unread.resync(counts, self.engine.active_peer());
        vec![self.unread_event()]
    }

    pub fn select(&mut self, peer_id: UserId) -> Result<Vec<SyncEffect>, ChatError> {
        let had_unread = self.unread.count(peer_id) > 0;
        let outcome = self.engine.select(peer_id, &mut self.unread)?;

        let mut effects = Vec::new();
        if had_unread {
            effects.push(self.unread_event());
        }
        if let SelectOutcome::Fetch(ticket) = outcome {
            effects.push(self.snapshot_event(peer_id));
            effects.push(SyncEffect::FetchHistory(ticket));
        }
        Ok(effects)
    }

    pub fn complete_history(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<Message>, ChatError>,
    ) -> Vec<SyncEffect> {
        let had_unread = self.unread.count(ticket.peer_id) > 0;
        match self.engine.complete_fetch(ticket, result, &mut self.unread) {
            FetchResolution::Installed { peer_id } => {
                let mut effects = vec![self.snapshot_event(peer_id)];
                if had_unread {
                    effects.push(self.unread_event());
                }
                effects.push(SyncEffect::MarkRead {
                    contact_id: peer_id,
                });
                effects
            }
            FetchResolution::Failed { peer_id, error } => vec![
                self.snapshot_event(peer_id),
                notify(normalize_error(ChatError {
                    code: "history_fetch_failed".to_owned(),
                    message: format!("could not load conversation: {}", error.message),
                    ..error
                })),
            ],
            FetchResolution::Stale => Vec::new(),
        }
    }

    pub fn send_local(
        &mut self,
        body: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<Vec<SyncEffect>, ChatError> {
        let (message, signal) = self.engine.send_local(body, sent_at, Uuid::new_v4())?;
        Ok(vec![
            notify(ChatEvent::MessageAppended {
                peer_id: message.receiver_id,
                message,
            }),
            SyncEffect::Outbound(signal),
        ])
    }

    /// Local keystroke in the composer. Ignored with no active conversation.
    pub fn keystroke(&mut self, now: Instant) -> Vec<SyncEffect> {
        let Some(peer_id) = self.engine.active_peer() else {
            return Vec::new();
        };
        self.typing
            .keystroke(peer_id, now)
            .map(SyncEffect::Outbound)
            .into_iter()
            .collect()
    }

    /// Fire typing timers that fell due.
    pub fn poll_timers(&mut self, now: Instant) -> Vec<SyncEffect> {
        let tick = self.typing.poll(now);
        tick.changes
            .into_iter()
            .map(typing_event)
            .chain(tick.outbound.into_iter().map(SyncEffect::Outbound))
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.typing.next_deadline()
    }

    pub fn handle_push(&mut self, event: PushEvent, now: Instant) -> Vec<SyncEffect> {
        match event {
            PushEvent::Connected => self.on_connected(),
            PushEvent::Disconnected {
                reason,
                retry_in_ms,
            } => self.on_disconnected(&reason, retry_in_ms),
            PushEvent::PeerMessage(message) => {
                match self.engine.receive_push(message, &mut self.unread) {
                    PushRoute::Appended {
                        peer_id,
                        message,
                        read_receipt,
                    } => {
                        let mut effects =
                            vec![notify(ChatEvent::MessageAppended { peer_id, message })];
                        if read_receipt {
                            effects.push(SyncEffect::MarkRead {
                                contact_id: peer_id,
                            });
                        }
                        effects
                    }
                    PushRoute::Unread { .. } => vec![self.unread_event()],
                    PushRoute::Dropped => Vec::new(),
                }
            }
            PushEvent::PresenceChanged { user_id, is_online } => {
                if self.roster.apply_presence(user_id, is_online) {
                    vec![notify(ChatEvent::PresenceChanged { user_id, is_online })]
                } else {
                    Vec::new()
                }
            }
            PushEvent::TypingSignal {
                user_id,
                contact_id,
                is_typing,
            } => {
                // Before the first directory pull lands every sender is unknown.
                if self.roster.is_loaded() && !self.roster.contains(user_id) {
                    debug!(user_id, "typing signal from unknown user ignored");
                    return Vec::new();
                }
                self.typing
                    .on_signal(user_id, contact_id, is_typing, now)
                    .map(typing_event)
                    .into_iter()
                    .collect()
            }
        }
    }

    fn on_connected(&mut self) -> Vec<SyncEffect> {
        let mut effects = vec![notify(ChatEvent::ConnectionStatus {
            connected: true,
            retry_in_ms: None,
        })];
        if !self.has_connected {
            self.has_connected = true;
            return effects;
        }

        info!(user_id = self.self_id(), "push channel reconnected, resyncing");
        effects.push(SyncEffect::FetchRoster);
        effects.push(SyncEffect::FetchUnread);
        if let Some(ticket) = self.engine.refresh_active() {
            effects.push(self.snapshot_event(ticket.peer_id));
            effects.push(SyncEffect::FetchHistory(ticket));
        }
        effects
    }

    fn on_disconnected(&mut self, reason: &str, retry_in_ms: Option<u64>) -> Vec<SyncEffect> {
        debug!(reason, ?retry_in_ms, "push channel down");
        let mut effects: Vec<SyncEffect> =
            self.typing.clear_all().into_iter().map(typing_event).collect();
        effects.push(notify(ChatEvent::ConnectionStatus {
            connected: false,
            retry_in_ms,
        }));
        effects
    }

    fn snapshot_event(&self, peer_id: UserId) -> SyncEffect {
        let (phase, messages) = self
            .engine
            .view(peer_id)
            .map(|view| (view.phase(), view.messages().to_vec()))
            .unwrap_or_default();
        notify(ChatEvent::ConversationSnapshot {
            peer_id,
            phase,
            messages,
        })
    }

    fn unread_event(&self) -> SyncEffect {
        notify(ChatEvent::UnreadUpdated {
            counts: self.unread.snapshot(),
        })
    }
}

fn notify(event: ChatEvent) -> SyncEffect {
    SyncEffect::Notify(event)
}

fn typing_event(change: TypingChange) -> SyncEffect {
    notify(ChatEvent::TypingChanged {
        peer_id: change.peer_id,
        is_typing: change.is_typing,
    })
}
