//! Payload confidentiality: AES-128-CBC with a key derived from the shared
//! network key and an IV derived from the message identifier.
//!
//! There is no MAC beyond the unkeyed CRC in the wire codec — see the
//! security caveats in the component design. Reusing the message UUID as
//! the IV is acceptable only because every originated message gets a fresh
//! random UUID.

use aes::Aes128;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::error::CryptoError;
use crate::wire::types::MeshPayload;

type Encryptor = cbc::Encryptor<Aes128>;
type Decryptor = cbc::Decryptor<Aes128>;

/// Normalizes a variable-length network key to the 16 bytes AES-128 needs:
/// truncate or zero-pad on the right.
pub fn normalize_key(network_key: &[u8]) -> [u8; 16] {
    let mut key = [0u8; 16];
    let n = network_key.len().min(16);
    key[..n].copy_from_slice(&network_key[..n]);
    key
}

/// The IV is the entire 16-byte message UUID, deterministic given the
/// message identifier.
fn iv_from_message_uuid(message_uuid: &[u8; 16]) -> [u8; 16] {
    *message_uuid
}

/// Serializes `payload` to JSON, pads, and encrypts it with AES-128-CBC
/// under `key`, using `message_uuid` as the IV.
pub fn encrypt_payload(
    payload: &MeshPayload,
    key: &[u8; 16],
    message_uuid: &[u8; 16],
) -> Result<Vec<u8>, CryptoError> {
    let plaintext = serde_json::to_vec(payload)
        .map_err(|e| CryptoError::BadPayload(e.to_string()))?;
    let iv = iv_from_message_uuid(message_uuid);
    let ciphertext = Encryptor::new(GenericArray::from_slice(key), GenericArray::from_slice(&iv))
        .encrypt_padded_vec_mut::<Pkcs7>(&plaintext);
    Ok(ciphertext)
}

/// Decrypts and strips PKCS#7 padding, then parses the plaintext as a
/// [`MeshPayload`].
pub fn decrypt_payload(
    ciphertext: &[u8],
    key: &[u8; 16],
    message_uuid: &[u8; 16],
) -> Result<MeshPayload, CryptoError> {
    let iv = iv_from_message_uuid(message_uuid);
    let plaintext = Decryptor::new(GenericArray::from_slice(key), GenericArray::from_slice(&iv))
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptFailed("padding or block-length error"))?;

    serde_json::from_slice(&plaintext).map_err(|e| CryptoError::BadPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::types::GeoPoint;

    fn sample_payload() -> MeshPayload {
        MeshPayload {
            kind: "SOS".into(),
            sender: "0102030405060708".into(),
            recipient: "broadcast".into(),
            timestamp: 1_700_000_000,
            content: Some("trapped on 3rd floor".into()),
            location: Some(GeoPoint { lat: 37.77, lng: -122.42 }),
            priority: Some(5),
            sos_type: Some("medical".into()),
            original_message_id: None,
        }
    }

    #[test]
    fn round_trips_a_payload() {
        let key = normalize_key(b"DisasterMeshNet!");
        let message_uuid = [9u8; 16];
        let payload = sample_payload();

        let ciphertext = encrypt_payload(&payload, &key, &message_uuid).unwrap();
        let decrypted = decrypt_payload(&ciphertext, &key, &message_uuid).unwrap();
        assert_eq!(payload, decrypted);
    }

    #[test]
    fn normalizes_short_keys_by_zero_padding() {
        let key = normalize_key(b"short");
        assert_eq!(&key[..5], b"short");
        assert_eq!(&key[5..], &[0u8; 11]);
    }

    #[test]
    fn normalizes_long_keys_by_truncation() {
        let key = normalize_key(b"this network key is definitely longer than 16 bytes");
        assert_eq!(key.len(), 16);
        assert_eq!(&key, b"this network key");
    }

    #[test]
    fn wrong_key_fails_to_decrypt_cleanly() {
        let key_a = normalize_key(b"network-key-a");
        let key_b = normalize_key(b"network-key-b");
        let message_uuid = [3u8; 16];
        let payload = sample_payload();

        let ciphertext = encrypt_payload(&payload, &key_a, &message_uuid).unwrap();
        // Wrong key either fails padding or yields garbage that isn't valid JSON/UTF-8.
        let result = decrypt_payload(&ciphertext, &key_b, &message_uuid);
        assert!(result.is_err());
    }

    #[test]
    fn different_message_uuids_give_different_ciphertext() {
        let key = normalize_key(b"DisasterMeshNet!");
        let payload = sample_payload();
        let c1 = encrypt_payload(&payload, &key, &[1u8; 16]).unwrap();
        let c2 = encrypt_payload(&payload, &key, &[2u8; 16]).unwrap();
        assert_ne!(c1, c2);
    }
}
