//! Real transport: a TCP link layer standing in for the host's Bluetooth
//! RFCOMM socket. `find_service` is a direct dial probe - the nearest TCP
//! analogue of an RFCOMM service lookup by UUID/name.

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use crate::error::MeshError;
use crate::transport::{BoxedStream, LinkLayer};

pub struct TcpLinkLayer {
    listener: TcpListener,
}

impl TcpLinkLayer {
    /// Binds the listening endpoint. `listen_addr` is host:port, e.g. `"0.0.0.0:7420"`.
    pub async fn bind(listen_addr: &str) -> Result<Self, MeshError> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|e| MeshError::TransportError(format!("bind {listen_addr}: {e}")))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, MeshError> {
        self.listener
            .local_addr()
            .map_err(|e| MeshError::TransportError(e.to_string()))
    }
}

#[async_trait]
impl LinkLayer for TcpLinkLayer {
    async fn find_service(&self, addr: &str) -> Result<bool, MeshError> {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                drop(stream);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn connect(&self, addr: &str) -> Result<BoxedStream, MeshError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| MeshError::TransportError(format!("connect {addr}: {e}")))?;
        stream.set_nodelay(true).ok();
        Ok(Box::new(stream))
    }

    async fn accept(&self) -> Result<(String, BoxedStream), MeshError> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| MeshError::TransportError(e.to_string()))?;
        stream.set_nodelay(true).ok();
        Ok((peer_addr.to_string(), Box::new(stream)))
    }
}
