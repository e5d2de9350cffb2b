//! Wire codec for mesh packets.
//!
//! Wire format per frame on a peer stream:
//!   `[4 bytes big-endian length][Header(32 B) || CRC(2 B) || Payload]`
//!
//! The header layout is fixed-width and big-endian throughout; see
//! `Packet` for field semantics. This module only ever sees ciphertext in
//! `payload` — decryption is the crypto layer's job.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::CodecError;
use crate::wire::types::{Packet, CRC_SIZE, HEADER_SIZE};

/// Maximum payload length representable in the 2-byte `payload_length` field.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// CRC-16-CCITT: init 0xFFFF, polynomial 0x1021, no reflection, no final XOR.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Serializes a packet to `Header(32B) || CRC(2B) || Payload`.
pub fn serialize(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    if packet.payload.len() > MAX_PAYLOAD_LEN {
        return Err(CodecError::BadField("payload_length exceeds 65535"));
    }
    if packet.sender_uuid.len() != 6 {
        return Err(CodecError::BadField("sender_uuid must be 6 bytes"));
    }

    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.push(packet.protocol_version);
    header.push(packet.message_type);
    header.extend_from_slice(&packet.message_uuid);
    header.push(packet.hop_count);
    header.push(packet.ttl);
    header.extend_from_slice(&packet.timestamp.to_be_bytes());
    header.extend_from_slice(&packet.sender_uuid);
    header.extend_from_slice(&(packet.payload.len() as u16).to_be_bytes());
    debug_assert_eq!(header.len(), HEADER_SIZE);

    let mut to_crc = header.clone();
    to_crc.extend_from_slice(&packet.payload);
    let crc = crc16_ccitt(&to_crc);

    let mut out = header;
    out.extend_from_slice(&crc.to_be_bytes());
    out.extend_from_slice(&packet.payload);
    Ok(out)
}

/// Deserializes `Header(32B) || CRC(2B) || Payload` into a packet.
///
/// Does not check `protocol_version` — that is a forwarding-engine policy
/// decision, not a framing concern.
pub fn deserialize(data: &[u8]) -> Result<Packet, CodecError> {
    if data.len() < HEADER_SIZE + CRC_SIZE {
        return Err(CodecError::Truncated {
            needed: HEADER_SIZE + CRC_SIZE,
            got: data.len(),
        });
    }

    let header = &data[..HEADER_SIZE];
    let protocol_version = header[0];
    let message_type = header[1];
    let mut message_uuid = [0u8; 16];
    message_uuid.copy_from_slice(&header[2..18]);
    let hop_count = header[18];
    let ttl = header[19];
    let timestamp = u32::from_be_bytes(header[20..24].try_into().unwrap());
    let mut sender_uuid = [0u8; 6];
    sender_uuid.copy_from_slice(&header[24..30]);
    let payload_length = u16::from_be_bytes(header[30..32].try_into().unwrap()) as usize;

    let crc_offset = HEADER_SIZE;
    if data.len() < crc_offset + CRC_SIZE + payload_length {
        return Err(CodecError::Truncated {
            needed: crc_offset + CRC_SIZE + payload_length,
            got: data.len(),
        });
    }
    let received_crc = u16::from_be_bytes(
        data[crc_offset..crc_offset + CRC_SIZE].try_into().unwrap(),
    );
    let payload_start = crc_offset + CRC_SIZE;
    let payload = data[payload_start..payload_start + payload_length].to_vec();

    let mut to_crc = header.to_vec();
    to_crc.extend_from_slice(&payload);
    let computed_crc = crc16_ccitt(&to_crc);

    if received_crc != computed_crc {
        return Err(CodecError::CrcMismatch {
            expected: received_crc,
            computed: computed_crc,
        });
    }

    Ok(Packet {
        protocol_version,
        message_type,
        message_uuid,
        hop_count,
        ttl,
        timestamp,
        sender_uuid,
        payload,
    })
}

/// Writes a packet to a peer stream, prefixed by its 4-byte big-endian total length.
pub async fn write_framed<W>(io: &mut W, packet: &Packet) -> io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let bytes = serialize(packet).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = bytes.len() as u32;
    io.write_all(&len.to_be_bytes()).await?;
    io.write_all(&bytes).await?;
    io.flush().await
}

/// Reads one length-prefixed frame's raw bytes (header||crc||payload) off a
/// peer stream, without parsing them.
///
/// A partial read or EOF before the frame completes surfaces as an
/// `io::Error` (`UnexpectedEof`), which callers treat as peer-session
/// termination. Parsing the returned bytes (and dropping them on a codec
/// error) is a separate, droppable-without-killing-the-session concern
/// handled by the forwarding engine.
pub async fn read_frame_bytes<R>(io: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + Send,
{
    let mut len_buf = [0u8; 4];
    io.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Reads one length-prefixed frame from a peer stream and parses it.
/// Convenience wrapper over [`read_frame_bytes`] + [`deserialize`] for
/// call sites that want parse errors to also terminate the session (tests,
/// simple request/response use).
pub async fn read_framed<R>(io: &mut R) -> io::Result<Packet>
where
    R: AsyncRead + Unpin + Send,
{
    let buf = read_frame_bytes(io).await?;
    deserialize(&buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

impl From<CodecError> for io::Error {
    fn from(e: CodecError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, e.to_string())
    }
}
