//! Priority-aware prefetch cache for remote story media.
//!
//! Bounded two ways: at most `max_cached` blobs are kept (lowest priority
//! evicted first) and at most `max_concurrent` fetches run at once. Requests
//! beyond the concurrency limit are dropped, not queued; the session engine
//! re-requests on every navigation step.

pub mod fetcher;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use log::debug;
use tokio_util::sync::CancellationToken;

pub use fetcher::{placeholder_png, FetchResponse, MediaFetcher, StaticFetcher};

use crate::settings::EngineSettings;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = false;

use crate::log_info;

pub type Blob = Arc<Vec<u8>>;

struct InflightFetch {
    fetch_id: u64,
    cancel_token: CancellationToken,
}

#[derive(Default)]
struct CacheState {
    cached: HashMap<String, Blob>,
    inflight: HashMap<String, InflightFetch>,
    priority: HashMap<String, i64>,
    next_fetch_id: u64,
}

struct CacheInner {
    state: Mutex<CacheState>,
    fetcher: Arc<dyn MediaFetcher>,
    max_cached: usize,
    max_concurrent: usize,
}

#[derive(Clone)]
pub struct MediaCache {
    inner: Arc<CacheInner>,
}

impl MediaCache {
    pub fn new(fetcher: Arc<dyn MediaFetcher>, max_cached: usize, max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState::default()),
                fetcher,
                max_cached,
                max_concurrent,
            }),
        }
    }

    pub fn from_settings(fetcher: Arc<dyn MediaFetcher>, settings: &EngineSettings) -> Self {
        Self::new(
            fetcher,
            settings.max_cached_images,
            settings.max_concurrent_loads,
        )
    }

    /// Must be called from within a tokio runtime; fetches are spawned tasks.
    pub fn request(&self, key: &str, priority: i64) {
        let mut state = self.inner.lock_state();

        if state.cached.contains_key(key) {
            state.priority.insert(key.to_string(), priority);
            return;
        }
        // An in-flight fetch keeps the priority it was requested with.
        if state.inflight.contains_key(key) {
            return;
        }
        if state.inflight.len() >= self.inner.max_concurrent {
            log_info!("prefetch dropped for {key}: {} loads in flight", state.inflight.len());
            return;
        }

        let fetch_id = state.next_fetch_id;
        state.next_fetch_id = state.next_fetch_id.wrapping_add(1);
        let cancel_token = CancellationToken::new();
        state.inflight.insert(
            key.to_string(),
            InflightFetch {
                fetch_id,
                cancel_token: cancel_token.clone(),
            },
        );
        drop(state);

        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        tokio::spawn(async move {
            let blob = tokio::select! {
                _ = cancel_token.cancelled() => {
                    log_info!("prefetch cancelled for {key}");
                    None
                }
                result = inner.fetcher.fetch(&key) => accept_payload(&key, result),
            };
            inner.complete(&key, fetch_id, blob, priority);
        });
    }

    pub fn request_batch(&self, requests: &[(String, i64)]) {
        for (key, priority) in requests {
            self.request(key, *priority);
        }
    }

    pub fn get_cached(&self, key: &str) -> Option<Blob> {
        self.inner.lock_state().cached.get(key).cloned()
    }

    pub fn is_cached(&self, key: &str) -> bool {
        self.inner.lock_state().cached.contains_key(key)
    }

    pub fn is_inflight(&self, key: &str) -> bool {
        self.inner.lock_state().inflight.contains_key(key)
    }

    pub fn priority_of(&self, key: &str) -> Option<i64> {
        self.inner.lock_state().priority.get(key).copied()
    }

    pub fn cached_len(&self) -> usize {
        self.inner.lock_state().cached.len()
    }

    pub fn inflight_len(&self) -> usize {
        self.inner.lock_state().inflight.len()
    }

    pub fn max_cached(&self) -> usize {
        self.inner.max_cached
    }

    pub fn clear(&self) {
        let mut state = self.inner.lock_state();
        state.cached.clear();
        state.priority.clear();
        for (_, fetch) in state.inflight.drain() {
            fetch.cancel_token.cancel();
        }
    }
}

impl CacheInner {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn complete(&self, key: &str, fetch_id: u64, blob: Option<Blob>, priority: i64) {
        let mut state = self.lock_state();

        // A cleared or superseded fetch no longer owns the slot.
        match state.inflight.get(key) {
            Some(fetch) if fetch.fetch_id == fetch_id => {
                state.inflight.remove(key);
            }
            _ => return,
        }

        let Some(blob) = blob else {
            return;
        };
        state.cached.insert(key.to_string(), blob);
        state.priority.insert(key.to_string(), priority);

        if state.cached.len() > self.max_cached {
            evict_lowest(&mut state, self.max_cached);
        }
    }
}

fn accept_payload(key: &str, result: anyhow::Result<FetchResponse>) -> Option<Blob> {
    let response = match result {
        Ok(response) => response,
        Err(err) => {
            debug!("prefetch failed for {key}: {err:#}");
            return None;
        }
    };
    if !response.is_success() || response.body.is_empty() {
        debug!("prefetch for {key} returned status {}", response.status);
        return None;
    }
    if let Err(err) = image::guess_format(&response.body) {
        debug!("prefetch for {key} is not a decodable image: {err}");
        return None;
    }
    Some(Arc::new(response.body))
}

/// Drops the lowest-priority entries until `max_cached` remain.
fn evict_lowest(state: &mut CacheState, max_cached: usize) {
    let excess = state.cached.len().saturating_sub(max_cached);
    if excess == 0 {
        return;
    }

    let mut ranked: Vec<(i64, String)> = state
        .cached
        .keys()
        .map(|key| {
            let priority = state.priority.get(key).copied().unwrap_or(i64::MIN);
            (priority, key.clone())
        })
        .collect();
    ranked.sort_by_key(|(priority, _)| *priority);

    for (_, key) in ranked.into_iter().take(excess) {
        state.cached.remove(&key);
        state.priority.remove(&key);
        log_info!("evicted {key} from media cache");
    }
}
