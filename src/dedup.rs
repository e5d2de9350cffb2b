//! Bounded, time-aware cache of already-seen message fingerprints.
//!
//! Capacity eviction is first-inserted-first-evicted, independent of the
//! TTL-based sweep. Both `contains` and `insert` are exposed only through
//! `check_and_insert`, a single critical section, so the forwarding engine
//! can never observe a check/insert race against a concurrent peer worker.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use sha2::{Digest, Sha256};

const FINGERPRINT_LEN: usize = 16;

/// Capacity before first-inserted-first-evicted eviction kicks in.
pub const CAPACITY: usize = 500;

/// How long a fingerprint is remembered before the sweep removes it.
pub const TTL: Duration = Duration::from_secs(300);

/// How often the background sweeper runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Computes the duplicate-suppression fingerprint: the first 16 hex
/// characters of `SHA-256(hex(message_uuid) || hex(sender_uuid))`.
///
/// Independent of hop_count/ttl, so every relay of the same message
/// collides onto the same fingerprint.
pub fn fingerprint(message_uuid: &[u8; 16], sender_uuid: &[u8; 6]) -> String {
    let mut input = String::with_capacity(32 + 12);
    input.push_str(&hex::encode(message_uuid));
    input.push_str(&hex::encode(sender_uuid));

    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..FINGERPRINT_LEN].to_string()
}

/// Thread-safe duplicate cache. Never promotes on lookup — only `insert`
/// moves an entry to the front, so staying under capacity with no access
/// pattern other than `check_and_insert` behaves as pure insertion-order
/// (FIFO) eviction, matching the component design.
pub struct DuplicateCache {
    inner: Mutex<LruCache<String, Instant>>,
}

impl DuplicateCache {
    pub fn new() -> Self {
        Self::with_capacity(CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let cap = std::num::NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Returns `true` and does nothing if `fp` was already present.
    /// Otherwise inserts it with `now` as its observation time and
    /// returns `false`. This is the atomic check+insert the forwarding
    /// engine needs: a single lock covers both the lookup and the write.
    pub fn check_and_insert(&self, fp: &str, now: Instant) -> bool {
        let mut guard = self.inner.lock().expect("duplicate cache mutex poisoned");
        if guard.peek(fp).is_some() {
            return true;
        }
        guard.put(fp.to_string(), now);
        false
    }

    pub fn contains(&self, fp: &str) -> bool {
        let guard = self.inner.lock().expect("duplicate cache mutex poisoned");
        guard.peek(fp).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("duplicate cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry older than [`TTL`] relative to `now`.
    pub fn sweep_expired(&self, now: Instant) {
        let mut guard = self.inner.lock().expect("duplicate cache mutex poisoned");
        let stale: Vec<String> = guard
            .iter()
            .filter(|(_, &seen_at)| now.saturating_duration_since(seen_at) > TTL)
            .map(|(fp, _)| fp.clone())
            .collect();
        for fp in stale {
            guard.pop(&fp);
        }
    }
}

impl Default for DuplicateCache {
    fn default() -> Self {
        Self::new()
    }
}
