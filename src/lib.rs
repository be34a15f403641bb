//! # Lumen
//!
//! A partial light chain synchronizer. Instead of replaying every historical
//! block, a node bootstraps a verified chain view from an untrusted peer in
//! three verified pieces:
//! - **Chain proof** — a sparse, interlink-sampled prefix of the chain plus a
//!   dense suffix of the most recent headers, scored by a superchain-quality
//!   metric so competing proofs can be compared.
//! - **Accounts snapshot** — the full accounts tree at the proof head,
//!   streamed in ordered chunks and pinned to the head's accounts hash.
//! - **Block suffix** — the most recent full blocks, applied *backwards* from
//!   the proof head; each step reverts the accounts state one block and
//!   cross-checks it against the chain's committed hashes.
//!
//! All work happens inside store and accounts transactions; nothing is
//! visible to the rest of the node until the synchronizer commits.

pub mod accounts;
pub mod block;
pub mod chain;
pub mod policy;
pub mod pow;
pub mod sync;
pub mod wire;

/// Protocol constants
pub mod constants {
    /// Number of dense suffix headers carried by a chain proof.
    pub const K: usize = 120;
    /// Superchain quality parameter: how many blocks of a given depth are
    /// required before that depth contributes to a proof's score.
    pub const M: usize = 240;
    /// How many full blocks are re-verified backwards from the proof head
    /// before a sync is considered complete.
    pub const NUM_BLOCKS_VERIFICATION: u32 = 250;
    /// Sliding window (in blocks) used for difficulty retargeting.
    pub const DIFFICULTY_BLOCK_WINDOW: u32 = 120;
    /// Target block interval in seconds.
    pub const BLOCK_TIME_SECS: u64 = 60;
    /// Retarget adjustment is clamped to this factor per window.
    pub const MAX_ADJUSTMENT_FACTOR: u64 = 2;
    /// Flat per-block miner reward (in base units).
    pub const BLOCK_REWARD: u64 = 5_000;
    /// Maximum number of transactions in a block body.
    pub const MAX_TXS_PER_BLOCK: usize = 10_000;
    /// Maximum encoded size for untrusted wire payloads (16 MiB).
    pub const MAX_WIRE_MESSAGE_BYTES: usize = 16 * 1024 * 1024;
    /// Compact encoding of the maximum target (difficulty 1); also the
    /// genesis block's `n_bits`.
    pub const GENESIS_NBITS: u32 = 0x1f01_0000;
    /// Block header version.
    pub const BLOCK_VERSION: u16 = 1;
}

/// 32-byte hash used throughout the protocol
pub type Hash = [u8; 32];

/// Compute a domain-separated BLAKE3 hash.
///
/// The domain MUST be valid UTF-8 (all lumen domains use ASCII). Panics at
/// runtime if it is not — this is a programming error, not an input error.
pub fn hash_domain(domain: &[u8], data: &[u8]) -> Hash {
    let domain_str = std::str::from_utf8(domain).expect("hash_domain: domain must be valid UTF-8");
    let mut hasher = blake3::Hasher::new_derive_key(domain_str);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Compute BLAKE3 hash of length-prefixed concatenated slices.
///
/// Each part is prefixed with its length as a little-endian u64, preventing
/// ambiguous concatenation (e.g., `["AB","C"]` vs `["A","BC"]`).
pub fn hash_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Compute a BLAKE3 merkle root over the given leaves.
///
/// The tree is padded to the next power of 2 with zero leaves. An empty
/// input yields the all-zero hash; a single leaf is its own root.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return [0u8; 32];
    }
    if leaves.len() == 1 {
        return leaves[0];
    }

    let n = leaves.len().next_power_of_two();
    let mut layer: Vec<Hash> = leaves.to_vec();
    layer.resize(n, [0u8; 32]);

    while layer.len() > 1 {
        layer = layer
            .chunks(2)
            .map(|pair| merge_hashes(&pair[0], &pair[1]))
            .collect();
    }
    layer[0]
}

fn merge_hashes(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new_derive_key("lumen.merkle.node");
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}
