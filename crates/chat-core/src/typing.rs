//! Ephemeral typing state.
//!
//! Both sides are plain deadline maps keyed by peer. Callers pass `now`
//! explicitly and drive expiry through [`TypingCoordinator::poll`], sleeping
//! until [`TypingCoordinator::next_deadline`] in between.

use std::{collections::HashMap, time::Duration};

use tokio::time::Instant;
use tracing::trace;

use crate::types::{OutboundSignal, UserId};

/// A received typing flag flipped for `peer_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingChange {
    pub peer_id: UserId,
    pub is_typing: bool,
}

/// Everything that fell due in one [`TypingCoordinator::poll`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TypingTick {
    /// Received flags that expired.
    pub changes: Vec<TypingChange>,
    /// `isTyping: false` emissions for idle composers.
    pub outbound: Vec<OutboundSignal>,
}

#[derive(Debug, Clone)]
pub struct TypingCoordinator {
    self_id: UserId,
    grace: Duration,
    idle: Duration,
    /// Peer is shown typing until the deadline.
    received: HashMap<UserId, Instant>,
    /// We told the peer we are typing; `false` goes out at the deadline.
    sent: HashMap<UserId, Instant>,
}

impl TypingCoordinator {
    pub fn new(self_id: UserId, grace: Duration, idle: Duration) -> Self {
        Self {
            self_id,
            grace,
            idle,
            received: HashMap::new(),
            sent: HashMap::new(),
        }
    }

    /// Apply a received signal. Returns a change only on a flag transition;
    /// a refresh just pushes the deadline out.
    pub fn on_signal(
        &mut self,
        user_id: UserId,
        contact_id: Option<UserId>,
        is_typing: bool,
        now: Instant,
    ) -> Option<TypingChange> {
        if user_id == self.self_id || contact_id.is_some_and(|contact| contact != self.self_id) {
            trace!(user_id, ?contact_id, "typing signal not addressed to us");
            return None;
        }

        if is_typing {
            let previous = self.received.insert(user_id, now + self.grace);
            previous.is_none().then_some(TypingChange {
                peer_id: user_id,
                is_typing: true,
            })
        } else {
            self.received.remove(&user_id).map(|_| TypingChange {
                peer_id: user_id,
                is_typing: false,
            })
        }
    }

    pub fn is_typing(&self, peer_id: UserId) -> bool {
        self.received.contains_key(&peer_id)
    }

    /// Register one local keystroke for `peer_id`. `isTyping: true` goes out
    /// only when the composer was idle; otherwise the idle timer is pushed out.
    pub fn keystroke(&mut self, peer_id: UserId, now: Instant) -> Option<OutboundSignal> {
        let previous = self.sent.insert(peer_id, now + self.idle);
        previous.is_none().then_some(OutboundSignal::TypingSignal {
            user_id: self.self_id,
            contact_id: peer_id,
            is_typing: true,
        })
    }

    /// Fire every deadline at or before `now`.
    pub fn poll(&mut self, now: Instant) -> TypingTick {
        let mut expired_received: Vec<UserId> = self
            .received
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(peer_id, _)| *peer_id)
            .collect();
        expired_received.sort_unstable();

        let mut expired_sent: Vec<UserId> = self
            .sent
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(peer_id, _)| *peer_id)
            .collect();
        expired_sent.sort_unstable();

        let changes = expired_received
            .into_iter()
            .map(|peer_id| {
                self.received.remove(&peer_id);
                TypingChange {
                    peer_id,
                    is_typing: false,
                }
            })
            .collect();

        let outbound = expired_sent
            .into_iter()
            .map(|peer_id| {
                self.sent.remove(&peer_id);
                OutboundSignal::TypingSignal {
                    user_id: self.self_id,
                    contact_id: peer_id,
                    is_typing: false,
                }
            })
            .collect();

        TypingTick { changes, outbound }
    }

    /// Earliest pending deadline on either side.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.received.values().chain(self.sent.values()).min().copied()
    }

    /// Drop all state, e.g. after the push channel went away. Sent-side
    /// entries are dropped silently since nothing can be emitted anyway.
    pub fn clear_all(&mut self) -> Vec<TypingChange> {
        self.sent.clear();
        let mut peers: Vec<UserId> = self.received.drain().map(|(peer_id, _)| peer_id).collect();
        peers.sort_unstable();
        peers
            .into_iter()
            .map(|peer_id| TypingChange {
                peer_id,
                is_typing: false,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SELF: UserId = 1;
    const PEER: UserId = 2;
    const OTHER: UserId = 3;

    fn coordinator() -> TypingCoordinator {
        TypingCoordinator::new(SELF, Duration::from_millis(3_000), Duration::from_millis(1_000))
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn typing_signal(contact_id: UserId, is_typing: bool) -> OutboundSignal {
        OutboundSignal::TypingSignal {
            user_id: SELF,
            contact_id,
            is_typing,
        }
    }

    #[test]
    fn received_flag_expires_after_grace_period() {
        let mut typing = coordinator();
        let start = Instant::now();

        assert_eq!(
            typing.on_signal(PEER, Some(SELF), true, start),
            Some(TypingChange {
                peer_id: PEER,
                is_typing: true
            })
        );
        assert!(typing.poll(start + ms(2_999)).changes.is_empty());
        assert!(typing.is_typing(PEER));

        let tick = typing.poll(start + ms(3_000));
        assert_eq!(
            tick.changes,
            vec![TypingChange {
                peer_id: PEER,
                is_typing: false
            }]
        );
        assert!(!typing.is_typing(PEER));
    }

    #[test]
    fn refresh_extends_deadline_without_reemitting() {
        let mut typing = coordinator();
        let start = Instant::now();

        typing.on_signal(PEER, Some(SELF), true, start);
        assert_eq!(typing.on_signal(PEER, Some(SELF), true, start + ms(2_000)), None);

        assert!(typing.poll(start + ms(3_500)).changes.is_empty());
        assert_eq!(typing.next_deadline(), Some(start + ms(5_000)));
        assert_eq!(typing.poll(start + ms(5_000)).changes.len(), 1);
    }

    #[test]
    fn explicit_false_clears_immediately_and_cancels_timer() {
        let mut typing = coordinator();
        let start = Instant::now();

        typing.on_signal(PEER, None, true, start);
        assert_eq!(
            typing.on_signal(PEER, None, false, start + ms(10)),
            Some(TypingChange {
                peer_id: PEER,
                is_typing: false
            })
        );
        assert_eq!(typing.next_deadline(), None);
        assert_eq!(typing.on_signal(PEER, None, false, start + ms(20)), None);
    }

    #[test]
    fn ignores_signals_for_other_contacts_or_from_self() {
        let mut typing = coordinator();
        let now = Instant::now();
        assert_eq!(typing.on_signal(PEER, Some(OTHER), true, now), None);
        assert_eq!(typing.on_signal(SELF, Some(PEER), true, now), None);
        assert!(!typing.is_typing(PEER));
    }

    #[test]
    fn received_timers_are_independent_per_peer() {
        let mut typing = coordinator();
        let start = Instant::now();

        typing.on_signal(PEER, Some(SELF), true, start);
        typing.on_signal(OTHER, Some(SELF), true, start + ms(1_000));

        let tick = typing.poll(start + ms(3_000));
        assert_eq!(
            tick.changes,
            vec![TypingChange {
                peer_id: PEER,
                is_typing: false
            }]
        );
        assert!(typing.is_typing(OTHER));
    }

    #[test]
    fn sent_side_emits_true_once_then_single_false_after_idle() {
        let mut typing = coordinator();
        let start = Instant::now();

        assert_eq!(typing.keystroke(PEER, start), Some(typing_signal(PEER, true)));
        for step in 1..=5 {
            assert_eq!(typing.keystroke(PEER, start + ms(step * 200)), None);
        }

        // Last keystroke at 1000 ms, so idle fires at 2000 ms.
        assert!(typing.poll(start + ms(1_999)).outbound.is_empty());
        let tick = typing.poll(start + ms(2_000));
        assert_eq!(tick.outbound, vec![typing_signal(PEER, false)]);
        assert!(typing.poll(start + ms(5_000)).outbound.is_empty());
    }

    #[test]
    fn resuming_after_idle_emits_true_again() {
        let mut typing = coordinator();
        let start = Instant::now();

        typing.keystroke(PEER, start);
        typing.poll(start + ms(1_000));
        assert_eq!(
            typing.keystroke(PEER, start + ms(1_500)),
            Some(typing_signal(PEER, true))
        );
    }

    #[test]
    fn switching_peers_lets_previous_sent_timer_fire() {
        let mut typing = coordinator();
        let start = Instant::now();

        typing.keystroke(PEER, start);
        assert_eq!(
            typing.keystroke(OTHER, start + ms(500)),
            Some(typing_signal(OTHER, true))
        );

        let tick = typing.poll(start + ms(1_000));
        assert_eq!(tick.outbound, vec![typing_signal(PEER, false)]);
        let tick = typing.poll(start + ms(1_500));
        assert_eq!(tick.outbound, vec![typing_signal(OTHER, false)]);
    }

    #[test]
    fn clear_all_reports_shown_flags_and_drops_timers() {
        let mut typing = coordinator();
        let now = Instant::now();
        typing.on_signal(OTHER, None, true, now);
        typing.on_signal(PEER, None, true, now);
        typing.keystroke(PEER, now);

        let changes = typing.clear_all();
        assert_eq!(
            changes.iter().map(|c| c.peer_id).collect::<Vec<_>>(),
            [PEER, OTHER]
        );
        assert!(changes.iter().all(|c| !c.is_typing));
        assert_eq!(typing.next_deadline(), None);
    }
}
