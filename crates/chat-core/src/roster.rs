use tracing::{debug, trace};

use crate::types::{User, UserId};

/// Known peers and their live presence flag.
#[derive(Debug, Clone)]
pub struct RosterStore {
    self_id: UserId,
    users: Vec<User>,
    loaded: bool,
}

impl RosterStore {
    pub fn new(self_id: UserId) -> Self {
        Self {
            self_id,
            users: Vec::new(),
            loaded: false,
        }
    }

    /// Replace the roster with a directory pull, preserving server order.
    /// The session user is filtered out if the server includes it.
    pub fn load(&mut self, users: Vec<User>) {
        self.users = users
            .into_iter()
            .filter(|user| user.id != self.self_id)
            .collect();
        self.loaded = true;
        debug!(user_count = self.users.len(), "roster loaded");
    }

    /// Update one entry. Returns `false` when the user is unknown or the flag
    /// did not change.
    pub fn apply_presence(&mut self, user_id: UserId, is_online: bool) -> bool {
        let Some(user) = self.users.iter_mut().find(|user| user.id == user_id) else {
            trace!(user_id, "presence for unknown user ignored");
            return false;
        };
        if user.is_online == is_online {
            return false;
        }
        user.is_online = is_online;
        true
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn get(&self, user_id: UserId) -> Option<&User> {
        self.users.iter().find(|user| user.id == user_id)
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.get(user_id).is_some()
    }

    /// `true` once the first directory pull has been applied.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: UserId, name: &str, online: bool) -> User {
        User {
            id,
            username: name.to_owned(),
            avatar_ref: None,
            is_online: online,
        }
    }

    #[test]
    fn load_excludes_session_user_and_keeps_order() {
        let mut roster = RosterStore::new(1);
        roster.load(vec![user(3, "carol", false), user(1, "me", true), user(2, "bob", true)]);

        let ids: Vec<_> = roster.users().iter().map(|u| u.id).collect();
        assert_eq!(ids, [3, 2]);
        assert!(!roster.contains(1));
    }

    #[test]
    fn empty_directory_still_counts_as_loaded() {
        let mut roster = RosterStore::new(1);
        assert!(!roster.is_loaded());
        roster.load(Vec::new());
        assert!(roster.is_loaded());
        assert!(roster.users().is_empty());
    }

    #[test]
    fn presence_updates_exactly_one_entry() {
        let mut roster = RosterStore::new(1);
        roster.load(vec![user(2, "bob", false), user(3, "carol", false)]);

        assert!(roster.apply_presence(2, true));
        assert!(roster.get(2).expect("bob").is_online);
        assert!(!roster.get(3).expect("carol").is_online);
    }

    #[test]
    fn presence_for_unknown_or_unchanged_user_is_a_no_op() {
        let mut roster = RosterStore::new(1);
        roster.load(vec![user(2, "bob", true)]);

        assert!(!roster.apply_presence(99, true));
        assert!(!roster.apply_presence(2, true));
        assert_eq!(roster.users().len(), 1);
    }
}
