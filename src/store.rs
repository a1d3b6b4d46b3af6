use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
};

use anyhow::{bail, Result};
use async_trait::async_trait;

/// Byte-oriented persistence contract used by the story repository.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local store. Reads and writes can be switched to fail so callers'
/// degradation paths can be exercised.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Raw write that bypasses failure injection; used to plant fixtures.
    pub fn insert_raw(&self, key: &str, bytes: Vec<u8>) {
        self.entries().insert(key.to_string(), bytes);
    }

    pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.entries().get(key).cloned()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("memory store read failure injected for '{key}'");
        }
        Ok(self.entries().get(key).cloned())
    }

    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("memory store write failure injected for '{key}'");
        }
        self.entries().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("memory store write failure injected for '{key}'");
        }
        self.entries().remove(key);
        Ok(())
    }
}
