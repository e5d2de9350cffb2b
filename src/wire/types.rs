use serde::{Deserialize, Serialize};

/// Fixed protocol version emitted by this implementation.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Size of the fixed packet header, in bytes.
pub const HEADER_SIZE: usize = 32;

/// Size of the trailing CRC field, in bytes.
pub const CRC_SIZE: usize = 2;

/// Default time-to-live assigned to originated packets.
pub const DEFAULT_TTL: u8 = 5;

/// 128-bit mesh service UUID advertised on the underlying link layer.
pub const MESH_SERVICE_UUID: &str = "0000FE50-0000-1000-8000-00805F9B34FB";

/// Service name advertised alongside [`MESH_SERVICE_UUID`].
pub const MESH_SERVICE_NAME: &str = "DisasterMeshNode";

/// One of the four message kinds carried in the packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Sos,
    Direct,
    Relay,
    Ack,
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        match self {
            MessageType::Sos => 0x01,
            MessageType::Direct => 0x02,
            MessageType::Relay => 0x03,
            MessageType::Ack => 0x04,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(MessageType::Sos),
            0x02 => Some(MessageType::Direct),
            0x03 => Some(MessageType::Relay),
            0x04 => Some(MessageType::Ack),
            _ => None,
        }
    }
}

/// A mesh packet: the 32-byte header plus its decrypted-or-not payload bytes.
///
/// `payload` holds ciphertext when the packet arrived off the wire or is about
/// to be serialized, and the codec never looks inside it — that's the
/// crypto layer's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub protocol_version: u8,
    pub message_type: u8,
    pub message_uuid: [u8; 16],
    pub hop_count: u8,
    pub ttl: u8,
    pub timestamp: u32,
    pub sender_uuid: [u8; 6],
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(
        message_type: MessageType,
        message_uuid: [u8; 16],
        sender_uuid: [u8; 6],
        timestamp: u32,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            message_type: message_type.as_u8(),
            message_uuid,
            hop_count: 0,
            ttl: DEFAULT_TTL,
            timestamp,
            sender_uuid,
            payload,
        }
    }

    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn message_uuid_hex(&self) -> String {
        hex::encode(self.message_uuid)
    }

    pub fn sender_uuid_hex(&self) -> String {
        hex::encode(self.sender_uuid)
    }

    /// Builds the relay successor: same identity fields, hop/ttl advanced,
    /// message_type rewritten to RELAY, payload replaced by the caller with a
    /// freshly re-encrypted ciphertext.
    pub fn into_relay(mut self, ciphertext: Vec<u8>) -> Self {
        self.message_type = MessageType::Relay.as_u8();
        self.hop_count = self.hop_count.saturating_add(1);
        self.ttl = self.ttl.saturating_sub(1);
        self.payload = ciphertext;
        self
    }
}

/// Decrypted, structured view of a packet's JSON payload.
///
/// Not every field is present on every kind; absent fields deserialize to
/// `None` via `#[serde(default)]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeshPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub sender: String,
    pub recipient: String,
    pub timestamp: i64,

    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default, rename = "sosType")]
    pub sos_type: Option<String>,
    #[serde(default, rename = "originalMessageId")]
    pub original_message_id: Option<String>,
}

impl MeshPayload {
    pub const BROADCAST_RECIPIENT: &'static str = "broadcast";

    pub fn is_broadcast(&self) -> bool {
        self.recipient == Self::BROADCAST_RECIPIENT
    }

    pub fn is_for_me(&self, device_uuid_hex: &str) -> bool {
        self.recipient == device_uuid_hex
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}
