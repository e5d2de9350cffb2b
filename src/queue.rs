//! Store-and-forward queue: holds originated packets while no peer is
//! reachable, retrying on a fixed cadence until delivered-at-least-once,
//! expired by age, or exhausted by attempt count.
//!
//! Write-once per packet: the send API puts an entry in, the retry worker
//! takes entries out, and an entry is discarded only on a terminal
//! condition (age or attempts). There is no "delivered" signal threading
//! back from the mesh, so a successful broadcast does not remove the
//! entry - only age/attempts do.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::wire::types::Packet;

/// Give up on an entry once it has been retried this many times.
pub const MAX_ATTEMPTS: u32 = 20;

/// Give up on an entry once it is older than this, regardless of attempts.
pub const MAX_AGE: Duration = Duration::from_secs(3600);

/// How often the background retry worker wakes.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(30);

struct Entry {
    packet: Packet,
    attempts: u32,
}

/// What the retry worker should do with one entry on a given tick.
pub enum RetryOutcome {
    /// Age or attempt limit exceeded; entry has been removed.
    GaveUp,
    /// No peers are connected; entry stays queued untouched.
    Skipped,
    /// A broadcast attempt was made; `attempts` reflects the new count.
    Retried { attempts: u32 },
}

/// Thread-safe store-and-forward queue keyed by message UUID.
pub struct StoreAndForwardQueue {
    inner: Mutex<HashMap<[u8; 16], Entry>>,
}

impl StoreAndForwardQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Enqueues a freshly originated packet that had no peers to send to.
    pub async fn enqueue(&self, packet: Packet) {
        let mut guard = self.inner.lock().await;
        guard.insert(packet.message_uuid, Entry { packet, attempts: 0 });
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Runs one retry pass: for every entry, gives up on stale/exhausted
    /// packets, otherwise retries via `broadcast` when `has_peers` is
    /// true. `now_unix` is seconds since the Unix epoch (matching
    /// `Packet::timestamp`'s unit), kept as a parameter so tests can
    /// advance time without sleeping.
    pub async fn retry_tick<F, Fut>(&self, now_unix: u32, has_peers: bool, mut broadcast: F) -> Vec<RetryOutcome>
    where
        F: FnMut(Packet) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let mut guard = self.inner.lock().await;
        let mut outcomes = Vec::with_capacity(guard.len());
        let mut expired = Vec::new();

        for (uuid, entry) in guard.iter_mut() {
            let age = now_unix.saturating_sub(entry.packet.timestamp) as u64;
            if age as u64 > MAX_AGE.as_secs() || entry.attempts >= MAX_ATTEMPTS {
                expired.push(*uuid);
                outcomes.push(RetryOutcome::GaveUp);
                continue;
            }
            if !has_peers {
                outcomes.push(RetryOutcome::Skipped);
                continue;
            }
            broadcast(entry.packet.clone()).await;
            entry.attempts += 1;
            outcomes.push(RetryOutcome::Retried { attempts: entry.attempts });
        }

        for uuid in expired {
            guard.remove(&uuid);
        }

        outcomes
    }

    /// Attempt count currently recorded for a given message, if queued.
    pub async fn attempts_for(&self, message_uuid: &[u8; 16]) -> Option<u32> {
        self.inner.lock().await.get(message_uuid).map(|e| e.attempts)
    }
}

impl Default for StoreAndForwardQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::types::MessageType;

    fn sample_packet(timestamp: u32) -> Packet {
        Packet::new(MessageType::Sos, [5u8; 16], [1, 2, 3, 4, 5, 6], timestamp, b"ct".to_vec())
    }

    #[tokio::test]
    async fn skips_retry_with_no_peers() {
        let queue = StoreAndForwardQueue::new();
        queue.enqueue(sample_packet(1000)).await;

        let mut sent = 0;
        let outcomes = queue
            .retry_tick(1000, false, |_| {
                sent += 1;
                async {}
            })
            .await;

        assert_eq!(sent, 0);
        assert!(matches!(outcomes[0], RetryOutcome::Skipped));
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn retries_and_increments_attempts_when_peers_present() {
        let queue = StoreAndForwardQueue::new();
        let packet = sample_packet(1000);
        let uuid = packet.message_uuid;
        queue.enqueue(packet).await;

        queue.retry_tick(1005, true, |_| async {}).await;
        assert_eq!(queue.attempts_for(&uuid).await, Some(1));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let queue = StoreAndForwardQueue::new();
        let packet = sample_packet(1000);
        let uuid = packet.message_uuid;
        queue.enqueue(packet).await;

        for _ in 0..MAX_ATTEMPTS {
            queue.retry_tick(1000, true, |_| async {}).await;
        }
        assert_eq!(queue.attempts_for(&uuid).await, None);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn gives_up_after_max_age_regardless_of_attempts() {
        let queue = StoreAndForwardQueue::new();
        let packet = sample_packet(1000);
        queue.enqueue(packet).await;

        let later = 1000 + MAX_AGE.as_secs() as u32 + 1;
        queue.retry_tick(later, true, |_| async {}).await;
        assert!(queue.is_empty().await);
    }
}
