//! Persisted client storage.
//!
//! Entries that outlive the process: the cart copy used for hydration
//! ([`CART_CACHE_KEY`]), the pending-order snapshot captured before the payment
//! redirect ([`PENDING_ORDER_KEY`]) and the analytics cache entries, stored under
//! their resource key. All go through [`ClientStorage`], a typed JSON layer over a
//! raw string [`PersistentStore`].

use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::errors::StorageError;

/// Persisted copy of the cart, read on hydration.
pub const CART_CACHE_KEY: &str = "cart_cache";

/// Pending-order snapshot, written before the payment redirect.
pub const PENDING_ORDER_KEY: &str = "pending_order_data";

/// Raw string key/value persistence.
pub trait PersistentStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: String) -> Result<(), StorageError>;
    /// Returns whether an entry was removed.
    fn remove(&self, key: &str) -> Result<bool, StorageError>;
}

/// Process-local store, used in tests and when nothing needs to survive a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Io("memory store poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Io("memory store poisoned".to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Io("memory store poisoned".to_string()))?;
        Ok(entries.remove(key).is_some())
    }
}

/// One JSON file per key under a directory.
///
/// Writes go to a temporary file that is then renamed over the target, so a crash
/// mid-write leaves either the old or the new value.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' { ch } else { '_' })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

impl PersistentStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let target = self.path_for(key);
        let staging = target.with_extension("json.tmp");
        let mut file = fs::File::create(&staging)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        fs::rename(&staging, &target)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    stored_at: DateTime<Utc>,
    ttl_ms: Option<u64>,
    payload: T,
}

/// A persisted value that has not expired.
#[derive(Debug, Clone, PartialEq)]
pub struct FreshEntry<T> {
    pub value: T,
    /// TTL left, `None` for entries saved without one.
    pub remaining: Option<Duration>,
}

/// Typed JSON access to a [`PersistentStore`].
#[derive(Clone)]
pub struct ClientStorage {
    backend: Arc<dyn PersistentStore>,
}

impl ClientStorage {
    pub fn new(backend: impl PersistentStore) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let Some(raw) = self.backend.get(key)? else {
            return Ok(None);
        };
        let envelope: Envelope<T> =
            serde_json::from_str(&raw).map_err(|err| StorageError::Deserialize {
                key: key.to_string(),
                message: err.to_string(),
            })?;
        Ok(Some(envelope.payload))
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        self.write(key, value, None)
    }

    /// Save `value`, to be treated as absent once `ttl` has elapsed.
    pub fn save_with_ttl<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        self.write(key, value, Some(ttl))
    }

    /// Load `key` unless its TTL has elapsed. Expired entries are removed.
    pub fn load_fresh<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        self.load_fresh_at(key, Utc::now())
    }

    /// [`load_fresh`](Self::load_fresh) against an explicit wall-clock time.
    pub fn load_fresh_at<T: DeserializeOwned>(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<T>, StorageError> {
        Ok(self.load_fresh_entry_at(key, now)?.map(|entry| entry.value))
    }

    /// Like [`load_fresh`](Self::load_fresh), also reporting how much TTL is left.
    pub fn load_fresh_entry<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<FreshEntry<T>>, StorageError> {
        self.load_fresh_entry_at(key, Utc::now())
    }

    pub fn load_fresh_entry_at<T: DeserializeOwned>(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<FreshEntry<T>>, StorageError> {
        let Some(raw) = self.backend.get(key)? else {
            return Ok(None);
        };
        let envelope: Envelope<T> =
            serde_json::from_str(&raw).map_err(|err| StorageError::Deserialize {
                key: key.to_string(),
                message: err.to_string(),
            })?;

        let remaining = match envelope.ttl_ms {
            Some(ttl_ms) => {
                let age_ms = now
                    .signed_duration_since(envelope.stored_at)
                    .num_milliseconds();
                let age = u64::try_from(age_ms).ok().filter(|age| *age < ttl_ms);
                let Some(age) = age else {
                    crate::debug_log!("Persisted entry '{}' expired ({} ms old)", key, age_ms);
                    self.backend.remove(key)?;
                    return Ok(None);
                };
                Some(Duration::from_millis(ttl_ms - age))
            }
            None => None,
        };
        Ok(Some(FreshEntry {
            value: envelope.payload,
            remaining,
        }))
    }

    pub fn remove(&self, key: &str) -> Result<bool, StorageError> {
        self.backend.remove(key)
    }

    pub fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.backend.get(key)?.is_some())
    }

    fn write<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let envelope = Envelope {
            stored_at: Utc::now(),
            ttl_ms: ttl.map(|ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)),
            payload: value,
        };
        let raw = serde_json::to_string(&envelope).map_err(|err| StorageError::Serialize {
            key: key.to_string(),
            message: err.to_string(),
        })?;
        self.backend.set(key, raw)
    }
}

impl Default for ClientStorage {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for ClientStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientStorage").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_and_remove() {
        let storage = ClientStorage::in_memory();
        storage.save(PENDING_ORDER_KEY, &vec![1u32, 2, 3]).unwrap();
        assert!(storage.contains(PENDING_ORDER_KEY).unwrap());
        assert_eq!(
            storage.load::<Vec<u32>>(PENDING_ORDER_KEY).unwrap(),
            Some(vec![1, 2, 3])
        );
        assert!(storage.remove(PENDING_ORDER_KEY).unwrap());
        assert!(!storage.remove(PENDING_ORDER_KEY).unwrap());
        assert_eq!(storage.load::<Vec<u32>>(PENDING_ORDER_KEY).unwrap(), None);
    }

    #[test]
    fn test_ttl_envelope_expires() {
        let storage = ClientStorage::in_memory();
        storage
            .save_with_ttl(CART_CACHE_KEY, &"cart".to_string(), Duration::from_secs(300))
            .unwrap();

        let soon = Utc::now() + chrono::Duration::seconds(60);
        assert_eq!(
            storage.load_fresh_at::<String>(CART_CACHE_KEY, soon).unwrap(),
            Some("cart".to_string())
        );

        let entry = storage
            .load_fresh_entry_at::<String>(CART_CACHE_KEY, soon)
            .unwrap()
            .unwrap();
        let remaining = entry.remaining.unwrap();
        assert!(remaining <= Duration::from_secs(240));
        assert!(remaining > Duration::from_secs(230));

        let later = Utc::now() + chrono::Duration::seconds(301);
        assert_eq!(storage.load_fresh_at::<String>(CART_CACHE_KEY, later).unwrap(), None);
        // expired entries are dropped
        assert!(!storage.contains(CART_CACHE_KEY).unwrap());
    }

    #[test]
    fn test_oversized_ttl_saturates() {
        let storage = ClientStorage::in_memory();
        storage
            .save_with_ttl(PENDING_ORDER_KEY, &1u32, Duration::MAX)
            .unwrap();
        let far = Utc::now() + chrono::Duration::days(365 * 100);
        assert_eq!(storage.load_fresh_at::<u32>(PENDING_ORDER_KEY, far).unwrap(), Some(1));
    }

    #[test]
    fn test_corrupt_entry_is_an_error() {
        let store = MemoryStore::new();
        store.set(CART_CACHE_KEY, "{not json".to_string()).unwrap();
        let storage = ClientStorage::new(store);
        assert!(matches!(
            storage.load::<String>(CART_CACHE_KEY),
            Err(StorageError::Deserialize { .. })
        ));
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = std::env::temp_dir().join(format!("storefront-sync-{}", std::process::id()));
        let storage = ClientStorage::new(FileStore::open(&dir).unwrap());
        storage.save(PENDING_ORDER_KEY, &42u64).unwrap();
        assert_eq!(storage.load::<u64>(PENDING_ORDER_KEY).unwrap(), Some(42));
        assert!(storage.remove(PENDING_ORDER_KEY).unwrap());
        assert_eq!(storage.load::<u64>(PENDING_ORDER_KEY).unwrap(), None);
        let _ = fs::remove_dir_all(&dir);
    }
}
