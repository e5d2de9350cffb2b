use thiserror::Error;

/// Codec-layer failures: framing, header parsing, CRC.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame truncated: need at least {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("crc mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    CrcMismatch { expected: u16, computed: u16 },

    #[error("bad field: {0}")]
    BadField(&'static str),
}

/// Payload confidentiality failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("decrypt failed: {0}")]
    DecryptFailed(&'static str),

    #[error("payload is not valid json: {0}")]
    BadPayload(String),
}

/// Unified, tagged error type for the mesh core.
#[derive(Debug, Error, Clone)]
pub enum MeshError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("timestamp outside acceptance window: {0}")]
    StaleTimestamp(i64),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("no peers connected; packet queued for store-and-forward")]
    NoPeers,

    #[error("protocol version {0:#04x} is unsupported")]
    VersionUnsupported(u8),

    #[error("node is not running")]
    NotRunning,

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for MeshError {
    fn from(e: std::io::Error) -> Self {
        MeshError::Io(e.to_string())
    }
}
