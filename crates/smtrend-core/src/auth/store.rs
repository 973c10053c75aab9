//! Durable per-origin key-value storage shared by every open session ("tab").
//!
//! A `SharedStorage` pairs a `StorageBackend` with a broadcast channel. Each
//! tab gets its own `PersistenceBridge`; every write through a bridge is
//! announced to all subscribers, the writer included.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::claims::Credential;

/// Storage file name in the cache directory
const STORAGE_FILE: &str = "storage.json";

/// Capacity of the change-notification channel. A lagging subscriber only
/// needs to know that something changed, so a small buffer suffices.
const EVENT_BUFFER_SIZE: usize = 16;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage file is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

/// Raw key-value storage.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-local storage.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// Storage persisted as a single JSON map in the cache directory.
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn path(&self) -> PathBuf {
        self.dir.join(STORAGE_FILE)
    }

    fn read_map(path: &Path) -> Result<HashMap<String, String>, StoreError> {
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_map(&self, map: &HashMap<String, String>) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!("{}.tmp", STORAGE_FILE));
        std::fs::write(&tmp, serde_json::to_string_pretty(map)?)?;
        std::fs::rename(&tmp, self.path())?;
        Ok(())
    }

    fn modify(&self, apply: impl FnOnce(&mut HashMap<String, String>)) -> Result<(), StoreError> {
        let _guard = lock(&self.write_lock);
        // A corrupt file is replaced rather than blocking every future write.
        let mut map = Self::read_map(&self.path()).unwrap_or_else(|e| {
            warn!(error = %e, "Discarding unreadable storage file");
            HashMap::new()
        });
        apply(&mut map);
        self.write_map(&map)
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(Self::read_map(&self.path())?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.modify(|map| {
            map.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.modify(|map| {
            map.remove(key);
        })
    }
}

/// Identity of one session sharing the storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabId(u64);

/// Change notification delivered to every subscriber after a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub writer: TabId,
}

/// The per-origin store: one backend, one notification channel.
/// Clone is cheap and every clone refers to the same origin.
#[derive(Clone)]
pub struct SharedStorage {
    backend: Arc<dyn StorageBackend>,
    events: broadcast::Sender<StorageEvent>,
    next_tab: Arc<AtomicU64>,
}

impl SharedStorage {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            backend,
            events,
            next_tab: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Storage backed by `<cache_dir>/storage.json`.
    pub fn on_disk(cache_dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileBackend::new(cache_dir)))
    }

    /// Open a bridge for a new tab reading and writing `key`.
    pub fn open_tab(&self, key: impl Into<String>) -> PersistenceBridge {
        let tab = TabId(self.next_tab.fetch_add(1, Ordering::Relaxed));
        PersistenceBridge {
            tab,
            key: key.into(),
            storage: self.clone(),
        }
    }
}

/// A tab's view of the credential slot in the shared storage.
#[derive(Clone)]
pub struct PersistenceBridge {
    tab: TabId,
    key: String,
    storage: SharedStorage,
}

impl PersistenceBridge {
    pub fn tab(&self) -> TabId {
        self.tab
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the stored credential. Unreadable storage counts as empty.
    pub fn load(&self) -> Option<Credential> {
        match self.storage.backend.get(&self.key) {
            Ok(value) => value.filter(|v| !v.is_empty()).map(Credential::from),
            Err(e) => {
                warn!(error = %e, key = %self.key, "Failed to read credential storage");
                None
            }
        }
    }

    pub fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        self.storage.backend.set(&self.key, credential.as_str())?;
        self.announce();
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.storage.backend.remove(&self.key)?;
        self.announce();
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.storage.events.subscribe()
    }

    fn announce(&self) {
        let event = StorageEvent {
            key: self.key.clone(),
            writer: self.tab,
        };
        // No subscribers is fine: nobody else is open.
        if self.storage.events.send(event).is_err() {
            debug!(key = %self.key, "Storage change had no subscribers");
        }
    }
}
