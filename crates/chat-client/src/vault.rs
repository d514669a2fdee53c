use std::sync::Arc;

use chat_core::{ChatError, ChatErrorCategory, Session, User};
use chat_platform::{KeyValueStore, ScopedStore, StoreError};
use tracing::warn;

pub const VAULT_NAMESPACE: &str = "trafellow-session";
const TOKEN_KEY: &str = "token";
const USER_KEY: &str = "user";

/// Persisted `token` + `user` pair used to restore a session without
/// re-authenticating.
#[derive(Clone)]
pub struct SessionVault {
    store: ScopedStore<Arc<dyn KeyValueStore>>,
}

impl SessionVault {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store: ScopedStore::new(store, VAULT_NAMESPACE),
        }
    }

    pub fn save(&self, session: &Session) -> Result<(), ChatError> {
        let user = serde_json::to_string(&session.user).map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Serialization,
                "vault_encode_failed",
                err.to_string(),
            )
        })?;
        self.store
            .set(TOKEN_KEY, &session.token)
            .map_err(map_store_error)?;
        self.store.set(USER_KEY, &user).map_err(map_store_error)
    }

    /// `Ok(None)` unless both entries are present. A user entry that does not
    /// parse is reported as `vault_corrupt`.
    pub fn load(&self) -> Result<Option<Session>, ChatError> {
        let token = self.store.get_optional(TOKEN_KEY).map_err(map_store_error)?;
        let user = self.store.get_optional(USER_KEY).map_err(map_store_error)?;
        let (Some(token), Some(user)) = (token, user) else {
            return Ok(None);
        };

        let user: User = serde_json::from_str(&user).map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Serialization,
                "vault_corrupt",
                format!("stored user is unreadable: {err}"),
            )
        })?;
        Ok(Some(Session { user, token }))
    }

    /// Remove both entries. Missing entries are not an error.
    pub fn clear(&self) -> Result<(), ChatError> {
        let mut first_error = None;
        for key in [TOKEN_KEY, USER_KEY] {
            match self.store.delete(key) {
                Ok(()) | Err(StoreError::NotFound) => {}
                Err(err) => {
                    warn!(key, error = %err, "failed clearing vault entry");
                    first_error.get_or_insert(map_store_error(err));
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

fn map_store_error(err: StoreError) -> ChatError {
    let code = match err {
        StoreError::NotFound => "vault_entry_missing",
        StoreError::Unavailable(_) => "vault_unavailable",
        StoreError::Backend(_) => "vault_failure",
    };
    ChatError::new(ChatErrorCategory::Storage, code, err.to_string())
}

#[cfg(test)]
mod tests {
    use chat_platform::InMemoryKeyValueStore;

    use super::*;

    fn session() -> Session {
        Session {
            user: User {
                id: 1,
                username: "alice".to_owned(),
                avatar_ref: Some("https://example.org/a.png".to_owned()),
                is_online: true,
            },
            token: "jwt".to_owned(),
        }
    }

    #[test]
    fn save_load_clear() {
        let vault = SessionVault::new(Arc::new(InMemoryKeyValueStore::default()));
        assert_eq!(vault.load().expect("empty load"), None);

        vault.save(&session()).expect("save");
        assert_eq!(vault.load().expect("load"), Some(session()));

        vault.clear().expect("clear");
        assert_eq!(vault.load().expect("load after clear"), None);
        vault.clear().expect("clearing twice is fine");
    }

    #[test]
    fn token_without_user_is_not_a_session() {
        let store = Arc::new(InMemoryKeyValueStore::default());
        store
            .set_value(VAULT_NAMESPACE, TOKEN_KEY, "jwt")
            .expect("seed token");
        let vault = SessionVault::new(store);
        assert_eq!(vault.load().expect("load"), None);
    }

    #[test]
    fn unreadable_user_is_reported_as_corrupt() {
        let store = Arc::new(InMemoryKeyValueStore::default());
        store
            .set_value(VAULT_NAMESPACE, TOKEN_KEY, "jwt")
            .expect("seed token");
        store
            .set_value(VAULT_NAMESPACE, USER_KEY, "{oops")
            .expect("seed user");
        let vault = SessionVault::new(store);
        let err = vault.load().expect_err("corrupt");
        assert_eq!(err.code, "vault_corrupt");
    }
}
