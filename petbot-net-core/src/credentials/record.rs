//! On-disk layout of the credential record.
//!
//! ```text
//! magic "PBWC" | version u16 | capacity u16 | count u32
//! capacity × ( ssid_len u8 | ssid [32] | pw_len u8 | pw [64] )
//! sha256 of everything above (32 bytes)
//! ```
//! Integers are little-endian. Unused slots are zero-filled so a record has a
//! fixed size for a given capacity.

use super::{Credential, MAX_PASSWORD_LEN, MAX_SSID_LEN};
use crate::error::StorageError;
use sha2::{Digest, Sha256};

const MAGIC: &[u8; 4] = b"PBWC";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 2 + 4;
const SLOT_LEN: usize = 1 + MAX_SSID_LEN + 1 + MAX_PASSWORD_LEN;
const DIGEST_LEN: usize = 32;

pub(super) fn record_len(capacity: usize) -> usize {
    HEADER_LEN + capacity * SLOT_LEN + DIGEST_LEN
}

/// `capacity` never exceeds [`super::MAX_CAPACITY`]; `CredentialStore::open` clamps it.
pub(super) fn encode(list: &[Credential], capacity: usize) -> Vec<u8> {
    debug_assert!(capacity <= super::MAX_CAPACITY);
    let mut buf = Vec::with_capacity(record_len(capacity));
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&(capacity as u16).to_le_bytes());
    buf.extend_from_slice(&(list.len() as u32).to_le_bytes());

    for slot in 0..capacity {
        match list.get(slot) {
            Some(c) => {
                put_field(&mut buf, c.ssid.as_bytes(), MAX_SSID_LEN);
                put_field(&mut buf, c.password.as_bytes(), MAX_PASSWORD_LEN);
            }
            None => buf.resize(buf.len() + SLOT_LEN, 0),
        }
    }

    let digest = Sha256::digest(&buf);
    buf.extend_from_slice(&digest);
    buf
}

fn put_field(buf: &mut Vec<u8>, value: &[u8], width: usize) {
    buf.push(value.len() as u8);
    buf.extend_from_slice(value);
    buf.resize(buf.len() + (width - value.len()), 0);
}

pub(super) fn decode(bytes: &[u8], capacity: usize) -> Result<Vec<Credential>, StorageError> {
    if bytes.len() != record_len(capacity) {
        return Err(StorageError::Corrupt("unexpected record length"));
    }

    let (body, digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
    if Sha256::digest(body).as_slice() != digest {
        return Err(StorageError::Corrupt("checksum mismatch"));
    }
    if &body[0..4] != MAGIC {
        return Err(StorageError::Corrupt("bad magic"));
    }
    if u16::from_le_bytes([body[4], body[5]]) != VERSION {
        return Err(StorageError::Corrupt("unsupported version"));
    }
    if u16::from_le_bytes([body[6], body[7]]) as usize != capacity {
        return Err(StorageError::Corrupt("capacity mismatch"));
    }
    let count = u32::from_le_bytes([body[8], body[9], body[10], body[11]]) as usize;
    if count > capacity {
        return Err(StorageError::Corrupt("count exceeds capacity"));
    }

    body[HEADER_LEN..]
        .chunks_exact(SLOT_LEN)
        .take(count)
        .map(decode_slot)
        .collect()
}

fn decode_slot(slot: &[u8]) -> Result<Credential, StorageError> {
    let (ssid_field, pw_field) = slot.split_at(1 + MAX_SSID_LEN);
    let ssid = take_field(ssid_field, MAX_SSID_LEN)?;
    let password = take_field(pw_field, MAX_PASSWORD_LEN)?;
    if ssid.is_empty() {
        return Err(StorageError::Corrupt("empty ssid in used slot"));
    }
    Ok(Credential { ssid, password })
}

fn take_field(field: &[u8], width: usize) -> Result<String, StorageError> {
    let len = field[0] as usize;
    if len > width {
        return Err(StorageError::Corrupt("field length out of range"));
    }
    String::from_utf8(field[1..1 + len].to_vec()).map_err(|_| StorageError::Corrupt("field is not UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Credential> {
        vec![
            Credential::new("Home", "12345678").unwrap(),
            Credential::new("Cafe", "").unwrap(),
        ]
    }

    #[test]
    fn record_has_fixed_size_regardless_of_count() {
        assert_eq!(encode(&[], 8).len(), record_len(8));
        assert_eq!(encode(&sample(), 8).len(), record_len(8));
    }

    #[test]
    fn decoding_restores_entries_in_order() {
        let bytes = encode(&sample(), 8);
        assert_eq!(decode(&bytes, 8).unwrap(), sample());
    }

    #[test]
    fn flipped_bit_is_detected() {
        let mut bytes = encode(&sample(), 8);
        bytes[HEADER_LEN + 3] ^= 0x01;
        assert!(matches!(decode(&bytes, 8), Err(StorageError::Corrupt("checksum mismatch"))));
    }

    #[test]
    fn record_written_for_other_capacity_is_rejected() {
        let bytes = encode(&sample(), 4);
        assert!(decode(&bytes, 8).is_err());
    }

    #[test]
    fn truncated_record_is_rejected() {
        let bytes = encode(&sample(), 8);
        assert!(decode(&bytes[..bytes.len() - 1], 8).is_err());
    }
}
