//! Block, header, interlink and body types.
//!
//! A block is `{header, interlink, optional body}`. The header hash doubles
//! as the proof-of-work hash. The interlink is a vector of back-pointers to
//! progressively deeper-than-nominal ancestors; it is what makes sparse
//! (logarithmic) chain proofs possible, so its hash is committed in the
//! header and re-derived during proof verification.

use std::sync::OnceLock;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::accounts::Address;
use crate::{constants, pow, Hash};

/// Block validation errors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    #[error("block height must be positive")]
    InvalidHeight,
    #[error("n_bits is not a canonical compact target")]
    InvalidCompactTarget,
    #[error("header hash does not meet the declared target")]
    InvalidPow,
    #[error("interlink hash does not match the header")]
    InterlinkHashMismatch,
    #[error("body hash does not match the header")]
    BodyHashMismatch,
    #[error("too many transactions in block body")]
    TooManyTransactions,
    #[error("transaction values overflow")]
    ValueOverflow,
}

/// Block header. The `accounts_hash` commits to the accounts-tree root
/// *after* this block's body is applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u16,
    pub prev_hash: Hash,
    pub interlink_hash: Hash,
    pub body_hash: Hash,
    pub accounts_hash: Hash,
    pub n_bits: u32,
    pub height: u32,
    pub timestamp: u64,
    pub nonce: u64,
}

impl BlockHeader {
    /// Compute the header hash. This is also the PoW hash.
    pub fn hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new_derive_key("lumen.block.header");
        hasher.update(&self.version.to_le_bytes());
        hasher.update(&self.prev_hash);
        hasher.update(&self.interlink_hash);
        hasher.update(&self.body_hash);
        hasher.update(&self.accounts_hash);
        hasher.update(&self.n_bits.to_le_bytes());
        hasher.update(&self.height.to_le_bytes());
        hasher.update(&self.timestamp.to_le_bytes());
        hasher.update(&self.nonce.to_le_bytes());
        *hasher.finalize().as_bytes()
    }

    /// The PoW target this header declares.
    pub fn target(&self) -> U256 {
        pow::compact_to_target(self.n_bits)
    }

    /// Difficulty corresponding to the declared target.
    pub fn difficulty(&self) -> U256 {
        pow::difficulty_from_compact(self.n_bits)
    }

    /// Whether the header hash meets the declared target.
    pub fn verify_pow(&self) -> bool {
        pow::hash_to_target(&self.hash()) <= self.target()
    }
}

/// Interlink: back-pointers into the chain's history. Level `i` holds the
/// hash of the most recent ancestor whose PoW cleared depth `i`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInterlink {
    pub hashes: Vec<Hash>,
}

impl BlockInterlink {
    pub fn hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new_derive_key("lumen.block.interlink");
        hasher.update(&(self.hashes.len() as u32).to_le_bytes());
        for h in &self.hashes {
            hasher.update(h);
        }
        *hasher.finalize().as_bytes()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// A value transfer included in a block body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: Address,
    pub recipient: Address,
    pub value: u64,
    pub fee: u64,
    pub nonce: u32,
}

impl Transaction {
    pub fn id(&self) -> Hash {
        let mut hasher = blake3::Hasher::new_derive_key("lumen.transaction.id");
        hasher.update(&self.sender);
        hasher.update(&self.recipient);
        hasher.update(&self.value.to_le_bytes());
        hasher.update(&self.fee.to_le_bytes());
        hasher.update(&self.nonce.to_le_bytes());
        *hasher.finalize().as_bytes()
    }
}

/// Block body: the miner address (recipient of reward and fees) plus the
/// included transactions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBody {
    pub miner: Address,
    pub transactions: Vec<Transaction>,
}

impl BlockBody {
    /// Merkle root over the miner address and transaction ids.
    pub fn hash(&self) -> Hash {
        let mut leaves = Vec::with_capacity(1 + self.transactions.len());
        leaves.push(crate::hash_domain(b"lumen.block.miner", &self.miner));
        leaves.extend(self.transactions.iter().map(|tx| tx.id()));
        crate::merkle_root(&leaves)
    }

    /// Sum of all transaction fees, or `None` on overflow.
    pub fn total_fees(&self) -> Option<u64> {
        self.transactions
            .iter()
            .try_fold(0u64, |acc, tx| acc.checked_add(tx.fee))
    }

    /// Sum of all transferred values plus fees, or `None` on overflow.
    pub fn total_value(&self) -> Option<u64> {
        self.transactions.iter().try_fold(0u64, |acc, tx| {
            acc.checked_add(tx.value)?.checked_add(tx.fee)
        })
    }
}

/// An immutable block: header, interlink, and (for full blocks) a body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub interlink: BlockInterlink,
    pub body: Option<BlockBody>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn is_full(&self) -> bool {
        self.body.is_some()
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn prev_hash(&self) -> Hash {
        self.header.prev_hash
    }

    pub fn target(&self) -> U256 {
        self.header.target()
    }

    pub fn difficulty(&self) -> U256 {
        self.header.difficulty()
    }

    /// A light (header + interlink) view of this block.
    pub fn to_light(&self) -> Block {
        Block {
            header: self.header.clone(),
            interlink: self.interlink.clone(),
            body: None,
        }
    }

    /// Check all intrinsic invariants: canonical target encoding, proof of
    /// work (the deterministic genesis block is exempt), interlink and body
    /// commitments, and body value sanity.
    pub fn verify(&self) -> Result<(), BlockError> {
        if self.header.height == 0 {
            return Err(BlockError::InvalidHeight);
        }
        if !pow::is_valid_compact(self.header.n_bits) {
            return Err(BlockError::InvalidCompactTarget);
        }
        if self.hash() != genesis_hash() && !self.header.verify_pow() {
            return Err(BlockError::InvalidPow);
        }
        if self.interlink.hash() != self.header.interlink_hash {
            return Err(BlockError::InterlinkHashMismatch);
        }
        if let Some(body) = &self.body {
            if body.transactions.len() > constants::MAX_TXS_PER_BLOCK {
                return Err(BlockError::TooManyTransactions);
            }
            if body.total_value().is_none() {
                return Err(BlockError::ValueOverflow);
            }
            if body.hash() != self.header.body_hash {
                return Err(BlockError::BodyHashMismatch);
            }
        }
        Ok(())
    }

    /// Whether this block directly extends `pred`: hash link, height,
    /// timestamp ordering, and an interlink derived from `pred`.
    pub fn is_immediate_successor_of(&self, pred: &Block) -> bool {
        self.header.prev_hash == pred.hash()
            && self.header.height == pred.header.height + 1
            && self.header.timestamp >= pred.header.timestamp
            && self.header.interlink_hash == pred.get_next_interlink(&self.target()).hash()
    }

    /// Compute the interlink of a successor mined against `next_target`.
    ///
    /// With `depth` = this block's PoW depth relative to `next_target`,
    /// levels `0..=depth` of the successor's interlink point at this block;
    /// deeper levels are carried over from this block's own interlink.
    pub fn get_next_interlink(&self, next_target: &U256) -> BlockInterlink {
        let pow_depth = pow::target_depth(&pow::hash_to_target(&self.hash())) as i64;
        let next_depth = pow::target_depth(next_target) as i64;
        let depth = (pow_depth - next_depth).max(-1);

        let hash = self.hash();
        let mut hashes = Vec::new();
        for _ in 0..=depth {
            hashes.push(hash);
        }
        let carry_from = (depth + 1) as usize;
        if carry_from < self.interlink.hashes.len() {
            hashes.extend_from_slice(&self.interlink.hashes[carry_from..]);
        }
        BlockInterlink { hashes }
    }

    /// The deterministic genesis block: height 1, empty body, empty accounts
    /// tree, maximum target.
    pub fn genesis() -> Block {
        let interlink = BlockInterlink::default();
        let body = BlockBody {
            miner: [0u8; 32],
            transactions: vec![],
        };
        let header = BlockHeader {
            version: constants::BLOCK_VERSION,
            prev_hash: [0u8; 32],
            interlink_hash: interlink.hash(),
            body_hash: body.hash(),
            accounts_hash: [0u8; 32],
            n_bits: constants::GENESIS_NBITS,
            height: 1,
            timestamp: 0,
            nonce: 0,
        };
        Block {
            header,
            interlink,
            body: Some(body),
        }
    }
}

/// Hash of the deterministic genesis block.
pub fn genesis_hash() -> Hash {
    static GENESIS_HASH: OnceLock<Hash> = OnceLock::new();
    *GENESIS_HASH.get_or_init(|| Block::genesis().hash())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Mine a minimal header-only successor of `pred` at the given target.
    fn mine_successor(pred: &Block, n_bits: u32) -> Block {
        let target = pow::compact_to_target(n_bits);
        let interlink = pred.get_next_interlink(&target);
        let mut header = BlockHeader {
            version: constants::BLOCK_VERSION,
            prev_hash: pred.hash(),
            interlink_hash: interlink.hash(),
            body_hash: [0u8; 32],
            accounts_hash: [0u8; 32],
            n_bits,
            height: pred.height() + 1,
            timestamp: pred.header.timestamp + constants::BLOCK_TIME_SECS,
            nonce: 0,
        };
        while pow::hash_to_target(&header.hash()) > target {
            header.nonce += 1;
        }
        Block {
            header,
            interlink,
            body: None,
        }
    }

    #[test]
    fn genesis_verifies() {
        let genesis = Block::genesis();
        assert_eq!(genesis.height(), 1);
        assert!(genesis.is_full());
        genesis.verify().unwrap();
    }

    #[test]
    fn mined_successor_verifies_and_links() {
        let genesis = Block::genesis();
        let block = mine_successor(&genesis, constants::GENESIS_NBITS);
        block.verify().unwrap();
        assert!(block.is_immediate_successor_of(&genesis));
        assert!(!genesis.is_immediate_successor_of(&block));
    }

    #[test]
    fn interlink_points_at_predecessor() {
        let genesis = Block::genesis();
        let block = mine_successor(&genesis, constants::GENESIS_NBITS);
        // The successor's interlink must reference the predecessor at every
        // level the predecessor's PoW cleared (at least level 0 whenever the
        // predecessor met the target).
        let next = block.get_next_interlink(&block.target());
        assert!(!next.hashes.is_empty());
        assert_eq!(next.hashes[0], block.hash());
    }

    #[test]
    fn verify_rejects_bad_pow() {
        let genesis = Block::genesis();
        let mut block = mine_successor(&genesis, constants::GENESIS_NBITS);
        // Find a nonce whose hash misses the target.
        loop {
            block.header.nonce = block.header.nonce.wrapping_add(1);
            if pow::hash_to_target(&block.header.hash()) > block.target() {
                break;
            }
        }
        assert_eq!(block.verify(), Err(BlockError::InvalidPow));
    }

    #[test]
    fn verify_rejects_tampered_interlink() {
        let genesis = Block::genesis();
        let mut block = mine_successor(&genesis, constants::GENESIS_NBITS);
        block.interlink.hashes.push([7u8; 32]);
        // Re-mine so the failure is attributable to the interlink.
        let target = block.target();
        while pow::hash_to_target(&block.header.hash()) > target {
            block.header.nonce += 1;
        }
        assert_eq!(block.verify(), Err(BlockError::InterlinkHashMismatch));
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let genesis = Block::genesis();
        let mut block = Block::genesis();
        block.body = Some(BlockBody {
            miner: [9u8; 32],
            transactions: vec![],
        });
        assert_eq!(block.verify(), Err(BlockError::BodyHashMismatch));
        assert_eq!(genesis.verify(), Ok(()));
    }

    #[test]
    fn body_hash_covers_transactions() {
        let tx = Transaction {
            sender: [1u8; 32],
            recipient: [2u8; 32],
            value: 100,
            fee: 1,
            nonce: 0,
        };
        let body_a = BlockBody {
            miner: [0u8; 32],
            transactions: vec![tx.clone()],
        };
        let body_b = BlockBody {
            miner: [0u8; 32],
            transactions: vec![],
        };
        assert_ne!(body_a.hash(), body_b.hash());
        assert_eq!(body_a.total_fees(), Some(1));
        assert_eq!(body_a.total_value(), Some(101));
        let _ = tx.id();
    }
}
