use lru::LruCache;
use std::cmp::max;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::model::LayerId;
use crate::pyramid::ParseEvent;

pub const DEFAULT_CAPACITY_BYTES: usize = 64 * 1024 * 1024;
const MIN_CAPACITY_BYTES: usize = 1024 * 1024;

/// Key for cached rendered tiles
/// The variant string distinguishes the format and the resolved colormap
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RenderKey {
    pub layer_id: LayerId,
    pub z: u8,
    pub x: u32,
    pub y: u32,
    pub variant: String,
}

struct CacheEntry {
    data: Arc<Vec<u8>>,
    size_bytes: usize,
}

struct Entries {
    current_bytes: usize,
    capacity_bytes: usize,
    lru: LruCache<RenderKey, CacheEntry>,
}

impl Entries {
    fn insert(&mut self, key: RenderKey, data: Arc<Vec<u8>>) {
        let size_bytes = data.len();
        if size_bytes > self.capacity_bytes {
            return;
        }

        if let Some(old) = self.lru.pop(&key) {
            self.current_bytes = self.current_bytes.saturating_sub(old.size_bytes);
        }

        while self.current_bytes + size_bytes > self.capacity_bytes {
            if let Some((_key, entry)) = self.lru.pop_lru() {
                self.current_bytes = self.current_bytes.saturating_sub(entry.size_bytes);
            } else {
                break;
            }
        }

        self.current_bytes = self.current_bytes.saturating_add(size_bytes);
        self.lru.put(key, CacheEntry { data, size_bytes });
    }

    fn remove_layer(&mut self, layer_id: LayerId) -> usize {
        let stale: Vec<RenderKey> = self
            .lru
            .iter()
            .filter(|(k, _)| k.layer_id == layer_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            if let Some(entry) = self.lru.pop(key) {
                self.current_bytes = self.current_bytes.saturating_sub(entry.size_bytes);
            }
        }
        stale.len()
    }
}

/// Byte-bounded LRU of encoded tile images.
pub struct RenderCache {
    entries: Mutex<Entries>,
}

impl RenderCache {
    /// Cache holding at most `capacity_bytes` of encoded images (never below 1 MB).
    #[must_use]
    pub fn new(capacity_bytes: usize) -> Self {
        RenderCache {
            entries: Mutex::new(Entries {
                current_bytes: 0,
                capacity_bytes: max(capacity_bytes, MIN_CAPACITY_BYTES),
                lru: LruCache::unbounded(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        // A panic mid-insert leaves the byte count slightly off at worst
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &RenderKey) -> Option<Arc<Vec<u8>>> {
        self.lock().lru.get(key).map(|entry| Arc::clone(&entry.data))
    }

    pub fn insert(&self, key: RenderKey, data: Arc<Vec<u8>>) {
        self.lock().insert(key, data);
    }

    pub fn len(&self) -> usize {
        self.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> usize {
        self.lock().current_bytes
    }

    /// Drop every cached image of a layer. Returns how many were dropped.
    pub fn invalidate_layer(&self, layer_id: LayerId) -> usize {
        let removed = self.lock().remove_layer(layer_id);
        debug!(layer = %layer_id, removed, "Invalidated rendered tiles");
        removed
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.lru.clear();
        entries.current_bytes = 0;
    }

    /// Invalidate layers as their pyramids change.
    ///
    /// Runs until the event channel closes. Missed events clear the whole
    /// cache.
    pub fn watch(self: Arc<Self>, mut events: broadcast::Receiver<ParseEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ParseEvent::Finished { layer_id } | ParseEvent::TilesDropped { layer_id }) => {
                        self.invalidate_layer(layer_id);
                    }
                    Ok(ParseEvent::Failed { .. }) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Render cache missed parse events, clearing");
                        self.clear();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY_BYTES)
    }
}
