//! Wire encoding for untrusted sync payloads.
//!
//! Blocks, chain proofs and accounts chunks arrive from untrusted peers.
//! Both directions use a single size-limited bincode configuration so that
//! crafted length prefixes inside payloads cannot trigger oversized
//! allocations, and the outer frame is a u32 length prefix checked against
//! the same limit.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::constants::MAX_WIRE_MESSAGE_BYTES;

/// Wire encoding errors.
#[derive(Clone, Debug, thiserror::Error)]
pub enum WireError {
    #[error("payload serialization failed: {0}")]
    SerializationFailed(String),
    #[error(
        "payload exceeds maximum size ({} bytes)",
        crate::constants::MAX_WIRE_MESSAGE_BYTES
    )]
    PayloadTooLarge,
}

/// Size-limited bincode config used for both serialization and
/// deserialization.
fn bincode_config() -> impl bincode::Options {
    bincode::DefaultOptions::new().with_limit(MAX_WIRE_MESSAGE_BYTES as u64)
}

/// Serialize a payload to bytes (length-prefixed).
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let payload = bincode_config()
        .serialize(value)
        .map_err(|e| WireError::SerializationFailed(e.to_string()))?;
    if payload.len() > MAX_WIRE_MESSAGE_BYTES {
        return Err(WireError::PayloadTooLarge);
    }
    let len = (payload.len() as u32).to_le_bytes();
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&len);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Deserialize a payload from bytes (after the length prefix).
///
/// Rejects frames whose declared length exceeds `MAX_WIRE_MESSAGE_BYTES`;
/// never panics on arbitrary input.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Option<T> {
    if data.len() < 4 {
        return None;
    }
    let len = u32::from_le_bytes(data[..4].try_into().ok()?) as usize;
    if len > MAX_WIRE_MESSAGE_BYTES {
        return None;
    }
    if data.len() < 4 + len {
        return None;
    }
    bincode_config().deserialize(&data[4..4 + len]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{Account, AccountsTreeChunk};
    use crate::block::Block;
    use crate::chain::proof::{BlockChain, ChainProof, HeaderChain};

    #[test]
    fn block_roundtrip() {
        let block = Block::genesis();
        let bytes = encode(&block).unwrap();
        let decoded: Block = decode(&bytes).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.hash(), block.hash());
    }

    #[test]
    fn proof_roundtrip() {
        let proof = ChainProof::new(
            BlockChain::new(vec![Block::genesis().to_light()]),
            HeaderChain::new(vec![]),
        );
        let bytes = encode(&proof).unwrap();
        let decoded: ChainProof = decode(&bytes).unwrap();
        assert_eq!(decoded.prefix.len(), 1);
        assert!(decoded.suffix.is_empty());
        assert_eq!(decoded.head_height(), 1);
    }

    #[test]
    fn chunk_roundtrip() {
        let chunk = AccountsTreeChunk {
            entries: vec![([3u8; 32], Account { balance: 7, nonce: 1 })],
            terminal: true,
        };
        let bytes = encode(&chunk).unwrap();
        let decoded: AccountsTreeChunk = decode(&bytes).unwrap();
        assert_eq!(decoded.entries.len(), 1);
        assert!(decoded.terminal);
        assert_eq!(decoded.entries[0].1.balance, 7);
    }

    #[test]
    fn decode_rejects_oversized_length() {
        let mut data = Vec::new();
        data.extend_from_slice(&u32::MAX.to_le_bytes());
        data.extend_from_slice(&[0u8; 10]);
        assert!(decode::<Block>(&data).is_none());
    }

    #[test]
    fn decode_rejects_truncated_frame() {
        let block = Block::genesis();
        let mut bytes = encode(&block).unwrap();
        bytes.truncate(bytes.len() - 1);
        assert!(decode::<Block>(&bytes).is_none());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode::<ChainProof>(&[1, 2, 3]).is_none());
        assert!(decode::<ChainProof>(&[]).is_none());
    }
}
