//! Small key-value persistence collaborators used by the session vault.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("entry not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// String values keyed by `(namespace, key)`.
pub trait KeyValueStore: Send + Sync {
    fn set_value(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError>;

    fn get_value(&self, namespace: &str, key: &str) -> Result<String, StoreError>;

    /// Remove an entry. Missing entries report [`StoreError::NotFound`].
    fn delete_value(&self, namespace: &str, key: &str) -> Result<(), StoreError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn set_value(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set_value(namespace, key, value)
    }

    fn get_value(&self, namespace: &str, key: &str) -> Result<String, StoreError> {
        (**self).get_value(namespace, key)
    }

    fn delete_value(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        (**self).delete_value(namespace, key)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryKeyValueStore {
    data: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn set_value(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        data.insert((namespace.to_owned(), key.to_owned()), value.to_owned());
        Ok(())
    }

    fn get_value(&self, namespace: &str, key: &str) -> Result<String, StoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        data.get(&(namespace.to_owned(), key.to_owned()))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn delete_value(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        if data
            .remove(&(namespace.to_owned(), key.to_owned()))
            .is_none()
        {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

/// One JSON object per namespace under a root directory. Writes replace the
/// file through a temp file so a crash never leaves a half-written map.
#[derive(Clone)]
pub struct FileKeyValueStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileKeyValueStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_path(&self, namespace: &str) -> Result<PathBuf, StoreError> {
        let valid = !namespace.is_empty()
            && namespace
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
            && !namespace.starts_with('.');
        if !valid {
            return Err(StoreError::Backend(format!(
                "invalid namespace name '{namespace}'"
            )));
        }
        Ok(self.root.join(format!("{namespace}.json")))
    }

    fn read_map(path: &Path) -> Result<BTreeMap<String, String>, StoreError> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(StoreError::Unavailable(format!(
                    "failed reading {}: {err}",
                    path.display()
                )));
            }
        };
        serde_json::from_slice(&raw).map_err(|err| {
            StoreError::Backend(format!("failed parsing {}: {err}", path.display()))
        })
    }

    fn write_map(&self, path: &Path, map: &BTreeMap<String, String>) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(|err| {
            StoreError::Unavailable(format!(
                "failed creating store directory {}: {err}",
                self.root.display()
            ))
        })?;

        let encoded =
            serde_json::to_vec_pretty(map).map_err(|err| StoreError::Backend(err.to_string()))?;
        let temp_path = temp_path_for(path);
        fs::write(&temp_path, encoded).map_err(|err| {
            StoreError::Unavailable(format!(
                "failed writing temp file {}: {err}",
                temp_path.display()
            ))
        })?;

        if let Err(rename_err) = fs::rename(&temp_path, path) {
            // Windows does not allow replacing existing files via rename.
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    let _ = fs::remove_file(&temp_path);
                    return Err(StoreError::Unavailable(format!(
                        "failed replacing {} after rename error ({rename_err}): {err}",
                        path.display()
                    )));
                }
            }
            fs::rename(&temp_path, path).map_err(|err| {
                let _ = fs::remove_file(&temp_path);
                StoreError::Unavailable(format!("failed writing {}: {err}", path.display()))
            })?;
        }
        Ok(())
    }

    fn update<T>(
        &self,
        namespace: &str,
        apply: impl FnOnce(&mut BTreeMap<String, String>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let path = self.namespace_path(namespace)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        let mut map = Self::read_map(&path)?;
        let result = apply(&mut map)?;
        if map.is_empty() {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(StoreError::Unavailable(format!(
                        "failed deleting {}: {err}",
                        path.display()
                    )));
                }
            }
        } else {
            self.write_map(&path, &map)?;
        }
        Ok(result)
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn set_value(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(namespace, |map| {
            map.insert(key.to_owned(), value.to_owned());
            Ok(())
        })
    }

    fn get_value(&self, namespace: &str, key: &str) -> Result<String, StoreError> {
        let path = self.namespace_path(namespace)?;
        Self::read_map(&path)?
            .remove(key)
            .ok_or(StoreError::NotFound)
    }

    fn delete_value(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        self.update(namespace, |map| {
            map.remove(key).map(|_| ()).ok_or(StoreError::NotFound)
        })
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("store.json");
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    parent.join(format!(".{file_name}.{now_nanos}.tmp"))
}

/// Entries live in the platform credential store: namespace maps to the
/// service name, key to the account.
#[cfg(feature = "os-keyring")]
#[derive(Default, Clone, Copy)]
pub struct OsKeyringStore;

#[cfg(feature = "os-keyring")]
impl KeyValueStore for OsKeyringStore {
    fn set_value(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        keyring::Entry::new(namespace, key)
            .and_then(|entry| entry.set_password(value))
            .map_err(map_keyring_error)
    }

    fn get_value(&self, namespace: &str, key: &str) -> Result<String, StoreError> {
        keyring::Entry::new(namespace, key)
            .and_then(|entry| entry.get_password())
            .map_err(map_keyring_error)
    }

    fn delete_value(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        keyring::Entry::new(namespace, key)
            .and_then(|entry| entry.delete_credential())
            .map_err(map_keyring_error)
    }
}

#[cfg(feature = "os-keyring")]
fn map_keyring_error(err: keyring::Error) -> StoreError {
    match err {
        keyring::Error::NoEntry => StoreError::NotFound,
        keyring::Error::PlatformFailure(inner) | keyring::Error::NoStorageAccess(inner) => {
            StoreError::Unavailable(inner.to_string())
        }
        other => StoreError::Backend(other.to_string()),
    }
}

/// A store pinned to one namespace.
#[derive(Clone)]
pub struct ScopedStore<S: KeyValueStore> {
    inner: S,
    namespace: String,
}

impl<S: KeyValueStore> ScopedStore<S> {
    pub fn new(inner: S, namespace: impl Into<String>) -> Self {
        Self {
            inner,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set_value(&self.namespace, key, value)
    }

    pub fn get(&self, key: &str) -> Result<String, StoreError> {
        self.inner.get_value(&self.namespace, key)
    }

    /// Returns `Ok(None)` for a missing entry instead of an error.
    pub fn get_optional(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete_value(&self.namespace, key)
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use super::*;

    fn unique_temp_dir(label: &str) -> PathBuf {
        let now_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        env::temp_dir().join(format!("trafellow-{label}-{now_nanos}"))
    }

    #[test]
    fn in_memory_set_get_delete() {
        let store = InMemoryKeyValueStore::default();
        store
            .set_value("session", "token", "abc")
            .expect("set should work");
        assert_eq!(
            store.get_value("session", "token").expect("get should work"),
            "abc"
        );
        store
            .delete_value("session", "token")
            .expect("delete should work");
        assert_eq!(
            store.get_value("session", "token"),
            Err(StoreError::NotFound)
        );
        assert_eq!(
            store.delete_value("session", "token"),
            Err(StoreError::NotFound)
        );
    }

    #[test]
    fn namespaces_are_isolated() {
        let store = InMemoryKeyValueStore::default();
        store.set_value("a", "k", "1").expect("set a");
        store.set_value("b", "k", "2").expect("set b");
        assert_eq!(store.get_value("a", "k").expect("get a"), "1");
        assert_eq!(store.get_value("b", "k").expect("get b"), "2");
    }

    #[test]
    fn file_store_persists_across_instances() {
        let root = unique_temp_dir("file-store");
        let store = FileKeyValueStore::new(&root);
        store.set_value("vault", "token", "t1").expect("set token");
        store.set_value("vault", "user", "{}").expect("set user");

        let reopened = FileKeyValueStore::new(&root);
        assert_eq!(reopened.get_value("vault", "token").expect("get"), "t1");

        reopened.delete_value("vault", "token").expect("delete token");
        assert_eq!(
            store.get_value("vault", "token"),
            Err(StoreError::NotFound)
        );
        reopened.delete_value("vault", "user").expect("delete user");
        assert!(!root.join("vault.json").exists());

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn file_store_missing_namespace_reads_as_not_found() {
        let store = FileKeyValueStore::new(unique_temp_dir("missing"));
        assert_eq!(store.get_value("vault", "token"), Err(StoreError::NotFound));
    }

    #[test]
    fn file_store_rejects_path_like_namespaces() {
        let store = FileKeyValueStore::new(unique_temp_dir("invalid"));
        assert!(matches!(
            store.set_value("../escape", "k", "v"),
            Err(StoreError::Backend(_))
        ));
        assert!(matches!(
            store.get_value("", "k"),
            Err(StoreError::Backend(_))
        ));
    }

    #[test]
    fn scoped_store_reads_missing_as_none() {
        let scoped = ScopedStore::new(Arc::new(InMemoryKeyValueStore::default()), "vault");
        assert_eq!(scoped.get_optional("token").expect("lookup"), None);
        scoped.set("token", "abc").expect("set");
        assert_eq!(
            scoped.get_optional("token").expect("lookup"),
            Some("abc".to_owned())
        );
    }

    #[cfg(feature = "os-keyring")]
    #[test]
    fn keyring_errors_map_to_store_errors() {
        assert_eq!(map_keyring_error(keyring::Error::NoEntry), StoreError::NotFound);
        assert_eq!(
            map_keyring_error(keyring::Error::NoStorageAccess("locked".into())),
            StoreError::Unavailable("locked".to_owned())
        );
        assert!(matches!(
            map_keyring_error(keyring::Error::TooLong("service".to_owned(), 255)),
            StoreError::Backend(_)
        ));
    }

    #[cfg(feature = "os-keyring")]
    #[test]
    fn keyring_store_reports_missing_entry_as_not_found() {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        let store = OsKeyringStore;
        assert_eq!(
            store.get_value("trafellow-test", "token"),
            Err(StoreError::NotFound)
        );
        assert_eq!(
            store.delete_value("trafellow-test", "token"),
            Err(StoreError::NotFound)
        );
        store
            .set_value("trafellow-test", "token", "jwt")
            .expect("mock keyring accepts writes");
    }
}
