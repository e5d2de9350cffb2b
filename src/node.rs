//! Node lifecycle: binds the forwarding engine, peer-set, and
//! store-and-forward queue together and owns the background workers
//! (accept, retry, cache sweep). Exposes a cheaply-cloneable [`MeshHandle`]
//! for the programmatic surface (`connect_to_peer`, `send_sos`,
//! `send_direct`, events, statistics), separate from the [`MeshNode`]
//! driver that owns `start`/`stop` and the worker task handles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{split, ReadHalf};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::dedup::SWEEP_INTERVAL;
use crate::forwarding::{ForwardingEngine, MeshEvent};
use crate::queue::{StoreAndForwardQueue, RETRY_INTERVAL};
use crate::transport::{BoxedStream, LinkLayer, PeerSet};
use crate::wire::codec;
use crate::wire::types::GeoPoint;

/// Snapshot returned by [`MeshHandle::get_statistics`].
#[derive(Debug, Clone)]
pub struct NodeStatistics {
    pub is_running: bool,
    pub peer_count: usize,
    pub cache_size: usize,
    pub queued_messages: usize,
    pub device_uuid_hex: String,
}

/// Spawns the per-peer receive worker: repeatedly reads a length-prefixed
/// frame and hands it to the forwarding engine, terminating on EOF,
/// incomplete frame, or stream error. On termination it removes itself
/// from the peer-set and fires the disconnect event.
fn spawn_receive_worker(
    engine: Arc<ForwardingEngine>,
    running: Arc<AtomicBool>,
    addr: String,
    mut read: ReadHalf<BoxedStream>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            match codec::read_frame_bytes(&mut read).await {
                Ok(raw) => engine.handle_inbound(&addr, &raw).await,
                Err(_) => break,
            }
        }
        engine.peers().remove(&addr).await;
        engine.emit_peer_disconnected(addr.clone());
        info!(peer = %addr, "peer disconnected");
    })
}

/// Cheaply-cloneable handle to a running (or stopped) node: the
/// programmatic surface named in the external interfaces.
#[derive(Clone)]
pub struct MeshHandle {
    engine: Arc<ForwardingEngine>,
    link: Arc<dyn LinkLayer>,
    running: Arc<AtomicBool>,
}

impl MeshHandle {
    pub fn device_uuid_hex(&self) -> String {
        self.engine.device_uuid_hex()
    }

    /// Subscribes to the node's event channel (`MessageReceived`,
    /// `PeerConnected`, `PeerDisconnected`, `PacketDropped`).
    pub fn subscribe_events(&self) -> broadcast::Receiver<MeshEvent> {
        self.engine.subscribe()
    }

    /// Looks up the mesh service on `addr`; on success opens a stream,
    /// inserts it into the peer-set, fires the connect event, and spawns
    /// a receive worker for it.
    pub async fn connect_to_peer(&self, addr: &str) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        match self.link.find_service(addr).await {
            Ok(true) => {}
            _ => return false,
        }
        let stream = match self.link.connect(addr).await {
            Ok(s) => s,
            Err(e) => {
                warn!(peer = addr, error = %e, "outbound connect failed");
                return false;
            }
        };

        let (read, write) = split(stream);
        self.engine.peers().insert(addr.to_string(), write).await;
        self.engine.emit_peer_connected(addr.to_string());
        info!(peer = addr, "peer connected (outbound)");
        spawn_receive_worker(self.engine.clone(), self.running.clone(), addr.to_string(), read);
        true
    }

    pub async fn send_sos(&self, content: impl Into<String>, location: GeoPoint, sos_type: impl Into<String>) {
        self.engine.send_sos(content, location, sos_type).await;
    }

    pub async fn send_direct(&self, recipient_uuid: [u8; 6], content: impl Into<String>) {
        self.engine.send_direct(recipient_uuid, content).await;
    }

    pub async fn get_statistics(&self) -> NodeStatistics {
        NodeStatistics {
            is_running: self.running.load(Ordering::SeqCst),
            peer_count: self.engine.peers().len().await,
            cache_size: self.engine.cache_len(),
            queued_messages: self.engine.queue().len().await,
            device_uuid_hex: self.engine.device_uuid_hex(),
        }
    }
}

/// The node driver: owns the link layer, the shared forwarding engine, and
/// the background worker task handles.
pub struct MeshNode {
    engine: Arc<ForwardingEngine>,
    link: Arc<dyn LinkLayer>,
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MeshNode {
    pub fn new(config: &NodeConfig, link: Arc<dyn LinkLayer>) -> Self {
        let peers = PeerSet::new();
        let queue = Arc::new(StoreAndForwardQueue::new());
        let (events_tx, _events_rx) = broadcast::channel(256);
        let engine = Arc::new(ForwardingEngine::new(
            config.device_uuid,
            &config.network_key,
            config.default_ttl,
            peers,
            queue,
            events_tx,
        ));

        Self {
            engine,
            link,
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn handle(&self) -> MeshHandle {
        MeshHandle {
            engine: self.engine.clone(),
            link: self.link.clone(),
            running: self.running.clone(),
        }
    }

    /// Idempotent: starting an already-running node is a no-op.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_accept_loop());
        tasks.push(self.spawn_retry_worker());
        tasks.push(self.spawn_sweep_worker());
    }

    /// Idempotent: stopping an already-stopped node is a no-op. Flips the
    /// running flag and aborts every background worker; per-peer workers
    /// exit on their next I/O error or flag check and tear down their own
    /// peer-set entry.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    fn spawn_accept_loop(&self) -> JoinHandle<()> {
        let link = self.link.clone();
        let engine = self.engine.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                match link.accept().await {
                    Ok((addr, stream)) => {
                        let (read, write) = split(stream);
                        engine.peers().insert(addr.clone(), write).await;
                        engine.emit_peer_connected(addr.clone());
                        info!(peer = %addr, "peer accepted");
                        spawn_receive_worker(engine.clone(), running.clone(), addr, read);
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        })
    }

    fn spawn_retry_worker(&self) -> JoinHandle<()> {
        let engine = self.engine.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RETRY_INTERVAL);
            interval.tick().await; // first tick fires immediately; skip it
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                let has_peers = !engine.peers().is_empty().await;
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs() as u32;
                let peers = engine.peers().clone();
                engine
                    .queue()
                    .retry_tick(now, has_peers, |packet| {
                        let peers = peers.clone();
                        async move { peers.broadcast(&packet).await }
                    })
                    .await;
            }
        })
    }

    fn spawn_sweep_worker(&self) -> JoinHandle<()> {
        let engine = self.engine.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                engine.sweep_cache();
            }
        })
    }
}
