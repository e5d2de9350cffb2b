//! The forwarding engine: the policy core of the mesh. Parses incoming
//! frames, enforces duplicate/timestamp/TTL policy, dispatches delivery to
//! the application, emits ACKs, and constructs relay packets.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::crypto;
use crate::dedup::{fingerprint, DuplicateCache};
use crate::queue::StoreAndForwardQueue;
use crate::transport::PeerSet;
use crate::wire::codec;
use crate::wire::types::{GeoPoint, MeshPayload, MessageType, Packet};

/// Packets with `|now - timestamp| > STALENESS_WINDOW` seconds are rejected
/// as replays or clock-skewed.
pub const STALENESS_WINDOW: i64 = 300;

/// Events the node surfaces to the application. Modeled as a bounded
/// broadcast channel the application drains, rather than callback slots,
/// per the design notes' channel alternative.
#[derive(Debug, Clone)]
pub enum MeshEvent {
    MessageReceived { packet: Packet, payload: MeshPayload },
    PeerConnected(String),
    PeerDisconnected(String),
    PacketDropped { from: String, reason: String },
}

fn now_unix() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}

/// Shared policy core. Cheap to hold behind an `Arc`; all interior state
/// (duplicate cache, peer-set, queue) already manages its own
/// synchronization.
pub struct ForwardingEngine {
    device_uuid: [u8; 6],
    key: [u8; 16],
    default_ttl: u8,
    cache: DuplicateCache,
    peers: PeerSet,
    queue: Arc<StoreAndForwardQueue>,
    events: broadcast::Sender<MeshEvent>,
}

impl ForwardingEngine {
    pub fn new(
        device_uuid: [u8; 6],
        network_key: &[u8],
        default_ttl: u8,
        peers: PeerSet,
        queue: Arc<StoreAndForwardQueue>,
        events: broadcast::Sender<MeshEvent>,
    ) -> Self {
        Self {
            device_uuid,
            key: crypto::normalize_key(network_key),
            default_ttl,
            cache: DuplicateCache::new(),
            peers,
            queue,
            events,
        }
    }

    pub fn device_uuid(&self) -> [u8; 6] {
        self.device_uuid
    }

    pub fn device_uuid_hex(&self) -> String {
        hex::encode(self.device_uuid)
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    pub fn queue(&self) -> &Arc<StoreAndForwardQueue> {
        &self.queue
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.events.subscribe()
    }

    pub fn emit_peer_connected(&self, addr: String) {
        self.emit(MeshEvent::PeerConnected(addr));
    }

    pub fn emit_peer_disconnected(&self, addr: String) {
        self.emit(MeshEvent::PeerDisconnected(addr));
    }

    fn emit(&self, event: MeshEvent) {
        // Best-effort: a full/unsubscribed channel must never block the
        // receive worker.
        let _ = self.events.send(event);
    }

    /// Runs the background cache sweeper for one tick.
    pub fn sweep_cache(&self) {
        self.cache.sweep_expired(Instant::now());
    }

    /// The full receive-path pipeline for one raw frame observed from
    /// peer `from`: parse -> dup-check -> timestamp -> decrypt ->
    /// mark-seen -> classify -> deliver -> ack -> relay-decision ->
    /// relay-action. Every failure drops the packet silently (logged);
    /// a malformed frame never propagates an error to the caller.
    pub async fn handle_inbound(&self, from: &str, raw: &[u8]) {
        let packet = match codec::deserialize(raw) {
            Ok(p) => p,
            Err(e) => {
                warn!(peer = from, error = %e, "dropping unparseable frame");
                self.emit(MeshEvent::PacketDropped { from: from.to_string(), reason: e.to_string() });
                return;
            }
        };

        let fp = fingerprint(&packet.message_uuid, &packet.sender_uuid);
        if self.cache.contains(&fp) {
            trace!(peer = from, fingerprint = %fp, "dropping duplicate");
            return;
        }

        let now = now_unix() as i64;
        if (now - packet.timestamp as i64).abs() > STALENESS_WINDOW {
            warn!(peer = from, ts = packet.timestamp, "dropping stale/replayed packet");
            self.emit(MeshEvent::PacketDropped {
                from: from.to_string(),
                reason: "stale timestamp".into(),
            });
            return;
        }

        let payload = match crypto::decrypt_payload(&packet.payload, &self.key, &packet.message_uuid) {
            Ok(p) => p,
            Err(e) => {
                warn!(peer = from, error = %e, "dropping undecryptable payload");
                self.emit(MeshEvent::PacketDropped { from: from.to_string(), reason: e.to_string() });
                return;
            }
        };

        // Mark-before-relay/deliver: the atomic check+insert is the single
        // critical section that decides who wins a race between two peer
        // workers delivering the same fingerprint concurrently. The
        // `contains` check above is only a cheap fast-path; this return
        // value is the one that actually gates delivery and relay.
        if self.cache.check_and_insert(&fp, Instant::now()) {
            trace!(peer = from, fingerprint = %fp, "dropping duplicate seen by a concurrent worker");
            return;
        }

        let device_hex = self.device_uuid_hex();
        let is_for_me = payload.is_for_me(&device_hex);
        let is_broadcast = payload.is_broadcast();

        if is_for_me || is_broadcast {
            self.emit(MeshEvent::MessageReceived { packet: packet.clone(), payload: payload.clone() });
        }

        // Classify by the payload's own `kind`, not `packet.message_type`:
        // relaying rewrites the wire message_type to RELAY on every hop past
        // the first, but `kind` is part of the encrypted payload and survives
        // untouched end to end.
        let is_sos = payload.kind == "SOS";
        let is_direct = payload.kind == "DIRECT";
        let is_ack = payload.kind == "ACK";

        if is_direct && is_for_me {
            self.send_ack(packet.sender_uuid, packet.message_uuid).await;
        }

        let is_targeted_not_for_me = (is_direct || is_ack) && !is_for_me;
        if should_relay(packet.ttl, is_sos, is_broadcast, is_targeted_not_for_me) {
            self.relay(packet, &payload).await;
        }
    }

    async fn relay(&self, packet: Packet, payload: &MeshPayload) {
        let ciphertext = match crypto::encrypt_payload(payload, &self.key, &packet.message_uuid) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "failed to re-encrypt payload for relay");
                return;
            }
        };
        let relay_packet = packet.into_relay(ciphertext);
        self.peers.broadcast(&relay_packet).await;
    }

    async fn send_ack(&self, recipient_uuid: [u8; 6], original_message_id: [u8; 16]) {
        let payload = MeshPayload {
            kind: "ACK".into(),
            sender: self.device_uuid_hex(),
            recipient: hex::encode(recipient_uuid),
            timestamp: now_unix() as i64,
            content: None,
            location: None,
            priority: None,
            sos_type: None,
            original_message_id: Some(Uuid::from_bytes(original_message_id).to_string()),
        };
        self.originate(MessageType::Ack, payload).await;
    }

    pub async fn send_sos(&self, content: impl Into<String>, location: GeoPoint, sos_type: impl Into<String>) {
        let payload = MeshPayload {
            kind: "SOS".into(),
            sender: self.device_uuid_hex(),
            recipient: MeshPayload::BROADCAST_RECIPIENT.into(),
            timestamp: now_unix() as i64,
            content: Some(content.into()),
            location: Some(location),
            priority: Some(5),
            sos_type: Some(sos_type.into()),
            original_message_id: None,
        };
        self.originate(MessageType::Sos, payload).await;
    }

    pub async fn send_direct(&self, recipient_uuid: [u8; 6], content: impl Into<String>) {
        let payload = MeshPayload {
            kind: "DIRECT".into(),
            sender: self.device_uuid_hex(),
            recipient: hex::encode(recipient_uuid),
            timestamp: now_unix() as i64,
            content: Some(content.into()),
            location: None,
            priority: Some(3),
            sos_type: None,
            original_message_id: None,
        };
        self.originate(MessageType::Direct, payload).await;
    }

    /// Constructs a freshly originated packet and either broadcasts it or,
    /// if no peers are connected, enqueues it for store-and-forward.
    async fn originate(&self, kind: MessageType, payload: MeshPayload) {
        let message_uuid = *Uuid::new_v4().as_bytes();
        let ciphertext = match crypto::encrypt_payload(&payload, &self.key, &message_uuid) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "failed to encrypt originated payload");
                return;
            }
        };
        let packet = Packet::new(kind, message_uuid, self.device_uuid, now_unix(), ciphertext)
            .with_ttl(self.default_ttl);

        // Mark our own fingerprint seen so a copy relayed back to us by a
        // neighbor is dropped as a duplicate instead of re-delivered.
        let fp = fingerprint(&packet.message_uuid, &packet.sender_uuid);
        self.cache.check_and_insert(&fp, Instant::now());

        if self.peers.is_empty().await {
            self.queue.enqueue(packet).await;
        } else {
            self.peers.broadcast(&packet).await;
        }
    }
}

/// Relay iff `ttl > 0` AND (kind is SOS, OR recipient is broadcast, OR
/// kind is DIRECT/ACK and not addressed to us). Pure so it is trivially
/// testable in isolation from the rest of the pipeline.
fn should_relay(ttl: u8, is_sos: bool, is_broadcast: bool, is_targeted_not_for_me: bool) -> bool {
    ttl > 0 && (is_sos || is_broadcast || is_targeted_not_for_me)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn does_not_relay_when_ttl_exhausted() {
        assert!(!should_relay(0, true, true, true));
    }

    #[test]
    fn relays_sos_regardless_of_recipient() {
        assert!(should_relay(3, true, false, false));
    }

    #[test]
    fn relays_broadcast_recipients() {
        assert!(should_relay(3, false, true, false));
    }

    #[test]
    fn relays_direct_not_addressed_to_us() {
        assert!(should_relay(3, false, false, true));
    }

    #[test]
    fn does_not_relay_direct_addressed_to_us() {
        assert!(!should_relay(3, false, false, false));
    }
}
