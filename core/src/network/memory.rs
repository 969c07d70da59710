// In-process storage network, shared by cloning

use super::{resolve_fetch_key, resolve_insert_key, NetworkClient, NetworkError, SskKeyPair};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Shared {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    fail_inserts: AtomicBool,
    fail_fetches: AtomicBool,
    inserts: AtomicUsize,
    fetches: AtomicUsize,
}

/// A network where every clone sees the same key space
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    shared: Arc<Shared>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent insert fail until switched back
    pub fn set_fail_inserts(&self, fail: bool) {
        self.shared.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent fetch fail until switched back
    pub fn set_fail_fetches(&self, fail: bool) {
        self.shared.fail_fetches.store(fail, Ordering::SeqCst);
    }

    /// Successful inserts so far
    pub fn insert_count(&self) -> usize {
        self.shared.inserts.load(Ordering::SeqCst)
    }

    /// Fetch attempts so far (hits and misses)
    pub fn fetch_count(&self) -> usize {
        self.shared.fetches.load(Ordering::SeqCst)
    }

    /// Whether anything is stored under the public form of `key`
    pub fn contains(&self, key: &str) -> bool {
        resolve_fetch_key(key)
            .map(|k| self.shared.blobs.read().contains_key(&k))
            .unwrap_or(false)
    }

    /// Drop a stored blob, as if it fell out of the network
    pub fn forget(&self, key: &str) {
        if let Ok(k) = resolve_fetch_key(key) {
            self.shared.blobs.write().remove(&k);
        }
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.shared.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NetworkClient for MemoryNetwork {
    fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, NetworkError> {
        self.shared.fetches.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail_fetches.load(Ordering::SeqCst) {
            return Err(NetworkError::Unavailable("fetches disabled".to_string()));
        }
        let key = resolve_fetch_key(key)?;
        Ok(self.shared.blobs.read().get(&key).cloned())
    }

    fn insert(
        &self,
        data: &[u8],
        key: &str,
        _priority: u8,
        _extra: &str,
    ) -> Result<(), NetworkError> {
        if self.shared.fail_inserts.load(Ordering::SeqCst) {
            return Err(NetworkError::Unavailable("inserts disabled".to_string()));
        }
        let key = resolve_insert_key(key)?;
        let mut blobs = self.shared.blobs.write();
        match blobs.get(&key) {
            Some(existing) if existing.as_slice() != data => {
                return Err(NetworkError::Collision(key));
            }
            Some(_) => {}
            None => {
                blobs.insert(key, data.to_vec());
            }
        }
        self.shared.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn generate_key_pair(&self) -> Result<SskKeyPair, NetworkError> {
        Ok(SskKeyPair::generate())
    }
}
