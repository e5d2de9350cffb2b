//! Simulated transport: the substitutable broadcast primitive the test
//! harness uses to build topology-driven fan-out across in-process nodes,
//! per the design notes. Grounded on the same shared-registry shape as an
//! in-memory discovery provider: an `Arc<Mutex<HashMap<..>>>` every node in
//! the simulated mesh shares a clone of.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::duplex;
use tokio::sync::{mpsc, Mutex};

use crate::error::MeshError;
use crate::transport::{BoxedStream, LinkLayer};

type Inbound = (String, tokio::io::DuplexStream);

/// Shared registry of simulated node addresses, used to route `connect`
/// calls to the right node's `accept` loop. Clone and hand one to every
/// [`SimulatedLinkLayer`] that should be able to see the others.
#[derive(Clone)]
pub struct SimulatedNetwork {
    inboxes: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Inbound>>>>,
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self {
            inboxes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn register(&self, addr: String, tx: mpsc::UnboundedSender<Inbound>) {
        self.inboxes.lock().await.insert(addr, tx);
    }

    async fn dial(&self, addr: &str, from: String, stream: tokio::io::DuplexStream) -> Result<(), MeshError> {
        let guard = self.inboxes.lock().await;
        let tx = guard
            .get(addr)
            .ok_or_else(|| MeshError::TransportError(format!("no simulated node at {addr}")))?;
        tx.send((from, stream))
            .map_err(|_| MeshError::TransportError(format!("simulated node {addr} is not accepting")))
    }

    async fn contains(&self, addr: &str) -> bool {
        self.inboxes.lock().await.contains_key(addr)
    }
}

impl Default for SimulatedNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// One node's view of a [`SimulatedNetwork`]: its own address plus the
/// receiving end of its inbox.
pub struct SimulatedLinkLayer {
    addr: String,
    network: SimulatedNetwork,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Inbound>>,
}

impl SimulatedLinkLayer {
    pub async fn new(addr: impl Into<String>, network: SimulatedNetwork) -> Self {
        let addr = addr.into();
        let (tx, rx) = mpsc::unbounded_channel();
        network.register(addr.clone(), tx).await;
        Self {
            addr,
            network,
            inbound_rx: Mutex::new(rx),
        }
    }
}

#[async_trait]
impl LinkLayer for SimulatedLinkLayer {
    async fn find_service(&self, addr: &str) -> Result<bool, MeshError> {
        Ok(self.network.contains(addr).await)
    }

    async fn connect(&self, addr: &str) -> Result<BoxedStream, MeshError> {
        let (ours, theirs) = duplex(64 * 1024);
        self.network.dial(addr, self.addr.clone(), theirs).await?;
        Ok(Box::new(ours))
    }

    async fn accept(&self) -> Result<(String, BoxedStream), MeshError> {
        let mut rx = self.inbound_rx.lock().await;
        let (from, stream) = rx
            .recv()
            .await
            .ok_or_else(|| MeshError::TransportError("simulated network shut down".into()))?;
        Ok((from, Box::new(stream)))
    }
}
