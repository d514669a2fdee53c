//! Conversation sync engine: routes pushes, installs history pulls, and
//! appends optimistic sends for the single active conversation.
//!
//! Every history pull is tagged with a [`FetchTicket`]. Only the ticket
//! carrying the latest generation *and* the active peer may install; any
//! other completion is stale and dropped.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    conversation::ConversationView,
    error::{ChatError, ChatErrorCategory},
    types::{ConversationPhase, Message, MessageOrigin, OutboundSignal, UserId},
    unread::UnreadTracker,
};

/// Tag attached to one outstanding history pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchTicket {
    pub peer_id: UserId,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// The peer was already active and loaded or loading.
    AlreadyActive,
    /// A history pull must be issued for the ticket.
    Fetch(FetchTicket),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushRoute {
    /// Appended to the active log.
    Appended {
        peer_id: UserId,
        message: Message,
        /// The active peer sent it, so a read acknowledgement is due.
        read_receipt: bool,
    },
    /// Counted as unread for `peer_id`.
    Unread { peer_id: UserId, count: u64 },
    /// Not addressed to this session, or our own message to an inactive peer.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResolution {
    Installed { peer_id: UserId },
    Failed { peer_id: UserId, error: ChatError },
    Stale,
}

#[derive(Debug, Clone)]
pub struct ConversationSyncEngine {
    self_id: UserId,
    max_items: usize,
    active: Option<UserId>,
    views: HashMap<UserId, ConversationView>,
    generation: u64,
}

impl ConversationSyncEngine {
    pub fn new(self_id: UserId, max_items: usize) -> Self {
        Self {
            self_id,
            max_items: max_items.max(1),
            active: None,
            views: HashMap::new(),
            generation: 0,
        }
    }

    pub fn active_peer(&self) -> Option<UserId> {
        self.active
    }

    pub fn view(&self, peer_id: UserId) -> Option<&ConversationView> {
        self.views.get(&peer_id)
    }

    /// Phase of `peer_id`'s conversation; unknown peers are `Inactive`.
    pub fn phase(&self, peer_id: UserId) -> ConversationPhase {
        self.views
            .get(&peer_id)
            .map(ConversationView::phase)
            .unwrap_or_default()
    }

    /// Log of the active conversation, empty when none is active.
    pub fn active_messages(&self) -> &[Message] {
        self.active
            .and_then(|peer_id| self.views.get(&peer_id))
            .map(ConversationView::messages)
            .unwrap_or(&[])
    }

    /// Activate `peer_id`. The unread counter is cleared before anything
    /// else so it is zero regardless of when the pull completes.
    pub fn select(
        &mut self,
        peer_id: UserId,
        unread: &mut UnreadTracker,
    ) -> Result<SelectOutcome, ChatError> {
        if peer_id == self.self_id {
            return Err(ChatError::new(
                ChatErrorCategory::Config,
                "invalid_peer",
                "cannot open a conversation with yourself",
            ));
        }

        unread.clear(peer_id);

        if self.active == Some(peer_id)
            && matches!(
                self.phase(peer_id),
                ConversationPhase::Loading | ConversationPhase::Ready
            )
        {
            debug!(peer_id, "select short-circuited for active peer");
            return Ok(SelectOutcome::AlreadyActive);
        }

        if let Some(previous) = self.active.take()
            && previous != peer_id
            && let Some(view) = self.views.get_mut(&previous)
        {
            view.phase = ConversationPhase::Inactive;
            view.carried.clear();
        }

        self.active = Some(peer_id);
        Ok(SelectOutcome::Fetch(self.begin_load(peer_id)))
    }

    /// Issue a fresh pull for the active conversation, e.g. after a
    /// reconnect. Any pull still in flight becomes stale.
    pub fn refresh_active(&mut self) -> Option<FetchTicket> {
        let peer_id = self.active?;
        Some(self.begin_load(peer_id))
    }

    /// Resolve a history pull.
    pub fn complete_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<Message>, ChatError>,
        unread: &mut UnreadTracker,
    ) -> FetchResolution {
        if ticket.generation != self.generation || self.active != Some(ticket.peer_id) {
            debug!(
                peer_id = ticket.peer_id,
                generation = ticket.generation,
                current_generation = self.generation,
                active_peer = ?self.active,
                "discarding stale history fetch"
            );
            return FetchResolution::Stale;
        }

        let Some(view) = self.views.get_mut(&ticket.peer_id) else {
            return FetchResolution::Stale;
        };

        match result {
            Ok(history) => {
                let carried = std::mem::take(&mut view.carried);
                view.log.install_history(history, carried);
                view.phase = ConversationPhase::Ready;
                unread.clear(ticket.peer_id);
                debug!(
                    peer_id = ticket.peer_id,
                    message_count = view.log.len(),
                    "history installed"
                );
                FetchResolution::Installed {
                    peer_id: ticket.peer_id,
                }
            }
            Err(error) => {
                warn!(peer_id = ticket.peer_id, code = %error.code, "history fetch failed");
                view.phase = view.phase_before_load;
                view.carried.clear();
                FetchResolution::Failed {
                    peer_id: ticket.peer_id,
                    error,
                }
            }
        }
    }

    /// Route one pushed message.
    pub fn receive_push(&mut self, mut message: Message, unread: &mut UnreadTracker) -> PushRoute {
        if !message.involves(self.self_id) {
            warn!(
                sender_id = message.sender_id,
                receiver_id = message.receiver_id,
                "pushed message does not involve session user"
            );
            return PushRoute::Dropped;
        }

        let peer_id = message.peer_of(self.self_id);
        if peer_id == self.self_id {
            return PushRoute::Dropped;
        }
        message.origin = MessageOrigin::RemotePushed;

        if self.active == Some(peer_id)
            && let Some(view) = self.views.get_mut(&peer_id)
        {
            if view.phase == ConversationPhase::Loading {
                view.carried.push(message.clone());
            }
            view.log.append(message.clone());
            let read_receipt = message.sender_id == peer_id;
            return PushRoute::Appended {
                peer_id,
                message,
                read_receipt,
            };
        }

        if message.sender_id == self.self_id {
            debug!(peer_id, "own message to inactive peer ignored");
            return PushRoute::Dropped;
        }

        let count = unread.increment(message.sender_id);
        PushRoute::Unread {
            peer_id: message.sender_id,
            count,
        }
    }

    /// Append an optimistic entry to the active log and build its outbound
    /// payload.
    pub fn send_local(
        &mut self,
        body: &str,
        created_at: DateTime<Utc>,
        correlation_id: Uuid,
    ) -> Result<(Message, OutboundSignal), ChatError> {
        let Some(peer_id) = self.active else {
            return Err(ChatError::no_active_conversation());
        };
        if body.trim().is_empty() {
            return Err(ChatError::new(
                ChatErrorCategory::Config,
                "empty_message",
                "message body is empty",
            ));
        }

        let message = Message {
            sender_id: self.self_id,
            receiver_id: peer_id,
            body: body.to_owned(),
            created_at,
            origin: MessageOrigin::LocalOptimistic,
            correlation_id: Some(correlation_id),
        };
        let view = self
            .views
            .entry(peer_id)
            .or_insert_with(|| ConversationView::new(self.max_items));
        if view.phase == ConversationPhase::Loading {
            view.carried.push(message.clone());
        }
        view.log.append(message.clone());

        let signal = OutboundSignal::PeerMessage {
            sender_id: self.self_id,
            receiver_id: peer_id,
            body: message.body.clone(),
            correlation_id,
        };
        Ok((message, signal))
    }

    fn begin_load(&mut self, peer_id: UserId) -> FetchTicket {
        self.generation += 1;
        let view = self
            .views
            .entry(peer_id)
            .or_insert_with(|| ConversationView::new(self.max_items));
        if view.phase != ConversationPhase::Loading {
            view.phase_before_load = view.phase;
            // Optimistic entries are never dropped by a reload.
            view.carried = view
                .log
                .messages()
                .iter()
                .filter(|message| message.origin == MessageOrigin::LocalOptimistic)
                .cloned()
                .collect();
        }
        view.phase = ConversationPhase::Loading;

        FetchTicket {
            peer_id,
            generation: self.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const SELF: UserId = 1;
    const ALICE: UserId = 2;
    const BOB: UserId = 3;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_731_000_000 + secs, 0)
            .single()
            .expect("valid timestamp")
    }

    fn msg(sender: UserId, receiver: UserId, body: &str, secs: i64) -> Message {
        Message {
            sender_id: sender,
            receiver_id: receiver,
            body: body.to_owned(),
            created_at: at(secs),
            origin: MessageOrigin::FetchedHistory,
            correlation_id: None,
        }
    }

    fn bodies(engine: &ConversationSyncEngine) -> Vec<String> {
        engine
            .active_messages()
            .iter()
            .map(|m| m.body.clone())
            .collect()
    }

    fn ticket_of(outcome: SelectOutcome) -> FetchTicket {
        match outcome {
            SelectOutcome::Fetch(ticket) => ticket,
            other => panic!("expected a fetch, got {other:?}"),
        }
    }

    fn ready_with(
        engine: &mut ConversationSyncEngine,
        unread: &mut UnreadTracker,
        peer: UserId,
        history: Vec<Message>,
    ) {
        let ticket = ticket_of(engine.select(peer, unread).expect("select"));
        assert_eq!(
            engine.complete_fetch(ticket, Ok(history), unread),
            FetchResolution::Installed { peer_id: peer }
        );
    }

    #[test]
    fn select_clears_unread_before_fetch_completes() {
        let mut engine = ConversationSyncEngine::new(SELF, 100);
        let mut unread = UnreadTracker::default();
        unread.increment(ALICE);
        unread.increment(ALICE);

        let outcome = engine.select(ALICE, &mut unread).expect("select");

        assert_eq!(unread.count(ALICE), 0);
        assert!(!unread.snapshot().contains_key(&ALICE));
        assert_eq!(engine.phase(ALICE), ConversationPhase::Loading);
        assert_eq!(engine.active_peer(), Some(ALICE));
        assert!(matches!(outcome, SelectOutcome::Fetch(_)));
    }

    #[test]
    fn install_orders_history_and_marks_ready() {
        let mut engine = ConversationSyncEngine::new(SELF, 100);
        let mut unread = UnreadTracker::default();

        ready_with(
            &mut engine,
            &mut unread,
            ALICE,
            vec![msg(ALICE, SELF, "second", 2), msg(SELF, ALICE, "first", 1)],
        );

        assert_eq!(engine.phase(ALICE), ConversationPhase::Ready);
        assert_eq!(bodies(&engine), ["first", "second"]);
    }

    #[test]
    fn stale_fetch_is_discarded_after_switching_peers() {
        let mut engine = ConversationSyncEngine::new(SELF, 100);
        let mut unread = UnreadTracker::default();

        let ticket_a = ticket_of(engine.select(ALICE, &mut unread).expect("select a"));
        let ticket_b = ticket_of(engine.select(BOB, &mut unread).expect("select b"));

        let resolution = engine.complete_fetch(
            ticket_a,
            Ok(vec![msg(ALICE, SELF, "for alice", 1)]),
            &mut unread,
        );
        assert_eq!(resolution, FetchResolution::Stale);
        assert!(engine.active_messages().is_empty());
        assert!(engine.view(ALICE).expect("alice view").messages().is_empty());
        assert_eq!(engine.phase(ALICE), ConversationPhase::Inactive);

        engine.complete_fetch(ticket_b, Ok(vec![msg(BOB, SELF, "for bob", 2)]), &mut unread);
        assert_eq!(bodies(&engine), ["for bob"]);
    }

    #[test]
    fn stale_fetch_is_discarded_when_reselecting_same_peer_later() {
        let mut engine = ConversationSyncEngine::new(SELF, 100);
        let mut unread = UnreadTracker::default();

        let old_a = ticket_of(engine.select(ALICE, &mut unread).expect("select a"));
        engine.select(BOB, &mut unread).expect("select b");
        let new_a = ticket_of(engine.select(ALICE, &mut unread).expect("reselect a"));
        assert_ne!(old_a, new_a);

        assert_eq!(
            engine.complete_fetch(old_a, Ok(vec![msg(ALICE, SELF, "old", 1)]), &mut unread),
            FetchResolution::Stale
        );
        engine.complete_fetch(new_a, Ok(vec![msg(ALICE, SELF, "new", 2)]), &mut unread);
        assert_eq!(bodies(&engine), ["new"]);
    }

    #[test]
    fn reselecting_active_peer_short_circuits() {
        let mut engine = ConversationSyncEngine::new(SELF, 100);
        let mut unread = UnreadTracker::default();

        let first = engine.select(ALICE, &mut unread).expect("select");
        assert!(matches!(first, SelectOutcome::Fetch(_)));
        assert_eq!(
            engine.select(ALICE, &mut unread).expect("reselect while loading"),
            SelectOutcome::AlreadyActive
        );
    }

    #[test]
    fn pushes_for_active_peer_keep_delivery_order() {
        let mut engine = ConversationSyncEngine::new(SELF, 100);
        let mut unread = UnreadTracker::default();
        ready_with(&mut engine, &mut unread, ALICE, Vec::new());

        let deliveries = [
            msg(ALICE, SELF, "one", 30),
            msg(SELF, ALICE, "two", 10),
            msg(ALICE, SELF, "three", 20),
            msg(ALICE, SELF, "four", 20),
        ];
        for message in deliveries.clone() {
            engine.receive_push(message, &mut unread);
        }

        assert_eq!(bodies(&engine), ["one", "two", "three", "four"]);
        assert!(
            engine
                .active_messages()
                .iter()
                .all(|m| m.origin == MessageOrigin::RemotePushed)
        );
    }

    #[test]
    fn push_from_active_peer_requests_read_receipt() {
        let mut engine = ConversationSyncEngine::new(SELF, 100);
        let mut unread = UnreadTracker::default();
        ready_with(&mut engine, &mut unread, ALICE, Vec::new());

        let route = engine.receive_push(msg(ALICE, SELF, "hi", 5), &mut unread);
        match route {
            PushRoute::Appended {
                peer_id,
                read_receipt,
                message,
            } => {
                assert_eq!(peer_id, ALICE);
                assert!(read_receipt);
                assert_eq!(message.origin, MessageOrigin::RemotePushed);
            }
            other => panic!("unexpected route: {other:?}"),
        }

        let echo = engine.receive_push(msg(SELF, ALICE, "from other device", 6), &mut unread);
        assert!(matches!(
            echo,
            PushRoute::Appended {
                read_receipt: false,
                ..
            }
        ));
    }

    #[test]
    fn push_from_inactive_peer_counts_unread_and_leaves_log() {
        let mut engine = ConversationSyncEngine::new(SELF, 100);
        let mut unread = UnreadTracker::default();
        ready_with(&mut engine, &mut unread, ALICE, vec![msg(ALICE, SELF, "a", 1)]);

        let route = engine.receive_push(msg(BOB, SELF, "psst", 2), &mut unread);
        assert_eq!(
            route,
            PushRoute::Unread {
                peer_id: BOB,
                count: 1
            }
        );
        assert_eq!(unread.count(BOB), 1);
        assert_eq!(bodies(&engine), ["a"]);
        assert!(engine.view(BOB).is_none());
    }

    #[test]
    fn drops_foreign_and_own_inactive_messages() {
        let mut engine = ConversationSyncEngine::new(SELF, 100);
        let mut unread = UnreadTracker::default();

        assert_eq!(
            engine.receive_push(msg(ALICE, BOB, "not ours", 1), &mut unread),
            PushRoute::Dropped
        );
        assert_eq!(
            engine.receive_push(msg(SELF, BOB, "sent elsewhere", 2), &mut unread),
            PushRoute::Dropped
        );
        assert!(unread.snapshot().is_empty());
    }

    #[test]
    fn pushes_during_loading_survive_install() {
        let mut engine = ConversationSyncEngine::new(SELF, 100);
        let mut unread = UnreadTracker::default();
        let ticket = ticket_of(engine.select(ALICE, &mut unread).expect("select"));

        let racing = msg(ALICE, SELF, "racing", 10);
        let persisted = msg(ALICE, SELF, "persisted", 9);
        engine.receive_push(persisted.clone(), &mut unread);
        engine.receive_push(racing, &mut unread);

        engine.complete_fetch(
            ticket,
            Ok(vec![msg(SELF, ALICE, "old", 1), persisted]),
            &mut unread,
        );
        assert_eq!(bodies(&engine), ["old", "persisted", "racing"]);
    }

    #[test]
    fn failed_fetch_restores_prior_phase_and_log() {
        let mut engine = ConversationSyncEngine::new(SELF, 100);
        let mut unread = UnreadTracker::default();
        ready_with(&mut engine, &mut unread, ALICE, vec![msg(ALICE, SELF, "kept", 1)]);

        let ticket = engine.refresh_active().expect("active peer");
        let resolution = engine.complete_fetch(
            ticket,
            Err(ChatError::new(ChatErrorCategory::Network, "boom", "offline")),
            &mut unread,
        );

        assert!(matches!(resolution, FetchResolution::Failed { peer_id: ALICE, .. }));
        assert_eq!(engine.phase(ALICE), ConversationPhase::Ready);
        assert_eq!(bodies(&engine), ["kept"]);
    }

    #[test]
    fn refresh_makes_older_pull_stale() {
        let mut engine = ConversationSyncEngine::new(SELF, 100);
        let mut unread = UnreadTracker::default();
        let first = ticket_of(engine.select(ALICE, &mut unread).expect("select"));
        let second = engine.refresh_active().expect("active peer");

        assert_eq!(
            engine.complete_fetch(first, Ok(Vec::new()), &mut unread),
            FetchResolution::Stale
        );
        assert_eq!(
            engine.complete_fetch(second, Ok(Vec::new()), &mut unread),
            FetchResolution::Installed { peer_id: ALICE }
        );
    }

    #[test]
    fn send_local_appends_optimistic_entry_and_builds_payload() {
        let mut engine = ConversationSyncEngine::new(SELF, 100);
        let mut unread = UnreadTracker::default();
        ready_with(&mut engine, &mut unread, ALICE, Vec::new());

        let correlation_id = Uuid::new_v4();
        let (message, signal) = engine
            .send_local("hello", at(100), correlation_id)
            .expect("send should work");

        assert_eq!(message.origin, MessageOrigin::LocalOptimistic);
        assert_eq!(engine.active_messages(), [message]);
        assert_eq!(
            signal,
            OutboundSignal::PeerMessage {
                sender_id: SELF,
                receiver_id: ALICE,
                body: "hello".to_owned(),
                correlation_id,
            }
        );
    }

    #[test]
    fn send_during_loading_survives_install() {
        let mut engine = ConversationSyncEngine::new(SELF, 100);
        let mut unread = UnreadTracker::default();
        let ticket = ticket_of(engine.select(ALICE, &mut unread).expect("select"));

        engine
            .send_local("hello", at(100), Uuid::new_v4())
            .expect("send while loading");
        assert_eq!(bodies(&engine), ["hello"]);

        engine.complete_fetch(ticket, Ok(Vec::new()), &mut unread);
        assert_eq!(bodies(&engine), ["hello"]);
        assert_eq!(
            engine.active_messages()[0].origin,
            MessageOrigin::LocalOptimistic
        );
    }

    #[test]
    fn refresh_keeps_optimistic_entries_not_yet_stored() {
        let mut engine = ConversationSyncEngine::new(SELF, 100);
        let mut unread = UnreadTracker::default();
        ready_with(
            &mut engine,
            &mut unread,
            ALICE,
            vec![msg(ALICE, SELF, "ping", 1)],
        );
        engine
            .send_local("pong", at(50), Uuid::new_v4())
            .expect("send");
        engine
            .send_local("again", at(60), Uuid::new_v4())
            .expect("send");

        let ticket = engine.refresh_active().expect("active peer");
        engine.complete_fetch(
            ticket,
            Ok(vec![msg(ALICE, SELF, "ping", 1), msg(SELF, ALICE, "pong", 52)]),
            &mut unread,
        );

        assert_eq!(bodies(&engine), ["ping", "pong", "again"]);
        let origins: Vec<_> = engine.active_messages().iter().map(|m| m.origin).collect();
        assert_eq!(
            origins,
            [
                MessageOrigin::FetchedHistory,
                MessageOrigin::FetchedHistory,
                MessageOrigin::LocalOptimistic,
            ]
        );
    }

    #[test]
    fn send_local_requires_active_peer_and_non_blank_body() {
        let mut engine = ConversationSyncEngine::new(SELF, 100);
        let mut unread = UnreadTracker::default();

        let err = engine
            .send_local("hello", at(0), Uuid::new_v4())
            .expect_err("no active conversation");
        assert_eq!(err.code, "no_active_conversation");

        engine.select(ALICE, &mut unread).expect("select");
        let err = engine
            .send_local("   ", at(0), Uuid::new_v4())
            .expect_err("blank body");
        assert_eq!(err.code, "empty_message");
    }

    #[test]
    fn cannot_select_self() {
        let mut engine = ConversationSyncEngine::new(SELF, 100);
        let mut unread = UnreadTracker::default();
        let err = engine.select(SELF, &mut unread).expect_err("self select");
        assert_eq!(err.code, "invalid_peer");
        assert_eq!(engine.active_peer(), None);
    }
}
