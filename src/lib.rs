//! Disaster-resilient Bluetooth mesh node: a store-and-forward, multi-hop
//! message overlay for emergency (SOS), direct, and acknowledgement
//! traffic over short-range radio links, with no supporting
//! infrastructure.
//!
//! The crate is organized leaves-first, matching the component design:
//! [`wire`] (codec + packet/payload types), [`crypto`], [`dedup`]
//! (duplicate cache), [`queue`] (store-and-forward), [`transport`]
//! (the substitutable `LinkLayer` plus the peer-set), [`forwarding`]
//! (the policy core), and [`node`] (lifecycle + programmatic surface).

pub mod config;
pub mod crypto;
pub mod dedup;
pub mod error;
pub mod forwarding;
pub mod log_layer;
pub mod node;
pub mod queue;
pub mod transport;
pub mod wire;

pub use config::{ConfigError, ConfigFile, NodeConfig};
pub use error::{CodecError, CryptoError, MeshError};
pub use forwarding::{ForwardingEngine, MeshEvent};
pub use node::{MeshHandle, MeshNode, NodeStatistics};
pub use transport::{sim::SimulatedLinkLayer, sim::SimulatedNetwork, tcp::TcpLinkLayer, LinkLayer};
pub use wire::types::{GeoPoint, MeshPayload, MessageType, Packet, MESH_SERVICE_NAME, MESH_SERVICE_UUID};
