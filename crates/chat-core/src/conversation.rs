use crate::types::{ConversationPhase, Message, MessageOrigin};

/// Clock skew tolerated between an optimistic entry and the server's copy.
const OPTIMISTIC_ECHO_SKEW_SECS: i64 = 120;

/// Ordered, bounded message log for one peer.
#[derive(Debug, Clone)]
pub struct ConversationLog {
    messages: Vec<Message>,
    max_items: usize,
}

impl ConversationLog {
    /// Create a log with an item cap (`max_items >= 1`).
    pub fn new(max_items: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_items: max_items.max(1),
        }
    }

    /// Current entries in display order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append in arrival order. Never reorders existing entries.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
        self.trim_to_max();
    }

    /// Replace the log with a history pull.
    ///
    /// History is ordered by `created_at`; equal timestamps keep server order.
    /// `carried` entries (pushes and optimistic sends made while the pull was
    /// in flight, plus optimistic sends already shown) are re-appended in
    /// their original order unless the history holds their stored copy. Each
    /// history row absorbs at most one carried entry.
    pub fn install_history(&mut self, mut history: Vec<Message>, carried: Vec<Message>) {
        for message in &mut history {
            message.origin = MessageOrigin::FetchedHistory;
        }
        history.sort_by_key(|message| message.created_at);

        let mut absorbed = vec![false; history.len()];
        let mut survivors = Vec::new();
        for message in carried {
            let stored = history
                .iter()
                .zip(absorbed.iter())
                .position(|(row, used)| !used && is_stored_copy(row, &message));
            match stored {
                Some(index) => absorbed[index] = true,
                None => survivors.push(message),
            }
        }

        self.messages = history;
        self.messages.extend(survivors);
        self.trim_to_max();
    }

    fn trim_to_max(&mut self) {
        if self.messages.len() <= self.max_items {
            return;
        }

        let excess = self.messages.len() - self.max_items;
        self.messages.drain(0..excess);
    }
}

/// `true` when the fetched `row` is the server's record of `carried`.
///
/// Pushes must match exactly. An optimistic entry carries the client clock,
/// so it also matches a row with the same correlation id, or the same
/// participants and body within the skew window.
fn is_stored_copy(row: &Message, carried: &Message) -> bool {
    if row.same_record(carried) {
        return true;
    }
    if carried.origin != MessageOrigin::LocalOptimistic {
        return false;
    }
    if let (Some(stored), Some(local)) = (row.correlation_id, carried.correlation_id) {
        return stored == local;
    }
    row.sender_id == carried.sender_id
        && row.receiver_id == carried.receiver_id
        && row.body == carried.body
        && (row.created_at - carried.created_at).num_seconds().abs() <= OPTIMISTIC_ECHO_SKEW_SECS
}

/// Per-peer conversation state held by the sync engine.
#[derive(Debug, Clone)]
pub struct ConversationView {
    pub(crate) phase: ConversationPhase,
    pub(crate) log: ConversationLog,
    /// Entries that must outlive the outstanding history pull: pushes that
    /// arrived during it and every optimistic send.
    pub(crate) carried: Vec<Message>,
    /// Phase to fall back to when the outstanding pull fails.
    pub(crate) phase_before_load: ConversationPhase,
}

impl ConversationView {
    pub fn new(max_items: usize) -> Self {
        Self {
            phase: ConversationPhase::Inactive,
            log: ConversationLog::new(max_items),
            carried: Vec::new(),
            phase_before_load: ConversationPhase::Inactive,
        }
    }

    pub fn phase(&self) -> ConversationPhase {
        self.phase
    }

    pub fn messages(&self) -> &[Message] {
        self.log.messages()
    }
}
