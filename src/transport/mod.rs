//! Peer I/O layer: a substitutable `LinkLayer` transport abstraction plus
//! the peer-set that sits on top of it.
//!
//! `LinkLayer` stands in for the host's Bluetooth RFCOMM stack: `accept`,
//! `connect`, and `find_service` are exactly the operations the
//! specification delegates to the radio layer. Two implementations ship
//! here - [`tcp::TcpLinkLayer`] for real sockets and [`sim::SimulatedLinkLayer`]
//! for topology-driven tests - and the forwarding engine and peer-set code
//! below never know which one is in play.

pub mod sim;
pub mod tcp;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::Mutex;

use crate::error::MeshError;
use crate::wire::codec;
use crate::wire::types::Packet;

/// Any stream the link layer can hand back for a peer connection.
pub trait PeerStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> PeerStream for T {}

/// A boxed, type-erased peer stream.
pub type BoxedStream = Box<dyn PeerStream>;

/// The substitutable transport operation named in the design notes:
/// radio discovery/session setup, modeled as `find_service`/`connect`/`accept`.
#[async_trait]
pub trait LinkLayer: Send + Sync {
    /// Probes whether the mesh service is reachable at `addr` before dialing.
    async fn find_service(&self, addr: &str) -> Result<bool, MeshError>;

    /// Opens an outbound connection to `addr`.
    async fn connect(&self, addr: &str) -> Result<BoxedStream, MeshError>;

    /// Blocks until the next inbound connection arrives, returning the
    /// remote's address and the accepted stream.
    async fn accept(&self) -> Result<(String, BoxedStream), MeshError>;
}

type PeerWriteHalf = WriteHalf<BoxedStream>;

/// The mapping from peer address to its open duplex stream, per the
/// component design's peer-set contract.
///
/// Each entry's write half is wrapped in its own mutex so `broadcast` can
/// snapshot the map, drop the map lock, and write to every peer
/// concurrently without blocking inserts/removes that happen mid-broadcast.
#[derive(Clone)]
pub struct PeerSet {
    peers: Arc<Mutex<HashMap<String, Arc<Mutex<PeerWriteHalf>>>>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self {
            peers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn insert(&self, addr: String, write: PeerWriteHalf) {
        let mut guard = self.peers.lock().await;
        guard.insert(addr, Arc::new(Mutex::new(write)));
    }

    pub async fn remove(&self, addr: &str) {
        self.peers.lock().await.remove(addr);
    }

    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn addrs(&self) -> Vec<String> {
        self.peers.lock().await.keys().cloned().collect()
    }

    /// Writes the length-prefixed serialized packet to every peer stream.
    /// Takes a snapshot of (address, stream) pairs under the lock, writes
    /// without holding it, then removes any peer whose write failed.
    pub async fn broadcast(&self, packet: &Packet) {
        let snapshot: Vec<(String, Arc<Mutex<PeerWriteHalf>>)> = {
            let guard = self.peers.lock().await;
            guard.iter().map(|(a, w)| (a.clone(), w.clone())).collect()
        };

        let mut failed = Vec::new();
        for (addr, write) in snapshot {
            let mut w = write.lock().await;
            if codec::write_framed(&mut *w, packet).await.is_err() {
                failed.push(addr);
            }
        }

        if !failed.is_empty() {
            let mut guard = self.peers.lock().await;
            for addr in failed {
                guard.remove(&addr);
            }
        }
    }
}

impl Default for PeerSet {
    fn default() -> Self {
        Self::new()
    }
}
