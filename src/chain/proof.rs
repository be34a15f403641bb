//! Succinct chain proofs: a sparse, interlink-sampled block prefix plus a
//! dense header suffix, and the evaluator that verifies proofs and decides
//! which of two proofs represents more work.

use std::collections::{BTreeMap, HashSet};

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockHeader};
use crate::{pow, Hash};

/// A (possibly sparse) chain of light blocks, ordered by ascending height.
///
/// Consecutive blocks need not be adjacent: a successor is valid if it
/// either links to its predecessor directly via `prev_hash` or references it
/// from its interlink.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockChain {
    pub blocks: Vec<Block>,
}

impl BlockChain {
    pub fn new(blocks: Vec<Block>) -> Self {
        BlockChain { blocks }
    }

    pub fn head(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// The oldest block in the chain (the sparse prefix's anchor).
    pub fn tail(&self) -> Option<&Block> {
        self.blocks.first()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Verify the chain's internal consistency: every block intrinsically
    /// valid (PoW checks run in parallel for long chains), heights strictly
    /// increasing, and every block reachable from its successor.
    pub fn verify(&self) -> bool {
        if self.blocks.is_empty() {
            return false;
        }

        let intrinsically_valid = if self.blocks.len() > 1 {
            use rayon::prelude::*;
            self.blocks.par_iter().all(|b| b.verify().is_ok())
        } else {
            self.blocks.iter().all(|b| b.verify().is_ok())
        };
        if !intrinsically_valid {
            return false;
        }

        for pair in self.blocks.windows(2) {
            let (pred, succ) = (&pair[0], &pair[1]);
            if succ.height() <= pred.height() {
                return false;
            }
            let pred_hash = pred.hash();
            let dense = succ.prev_hash() == pred_hash && succ.height() == pred.height() + 1;
            let sparse = succ.interlink.hashes.contains(&pred_hash);
            if !dense && !sparse {
                return false;
            }
        }
        true
    }

    /// The deepest block present in both chains, if any.
    pub fn lowest_common_ancestor(&self, other: &BlockChain) -> Option<Block> {
        let ours: HashSet<Hash> = self.blocks.iter().map(|b| b.hash()).collect();
        other
            .blocks
            .iter()
            .rev()
            .find(|b| ours.contains(&b.hash()))
            .cloned()
    }
}

/// A dense chain of headers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeaderChain {
    pub headers: Vec<BlockHeader>,
}

impl HeaderChain {
    pub fn new(headers: Vec<BlockHeader>) -> Self {
        HeaderChain { headers }
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Sum of the per-header difficulties.
    pub fn total_difficulty(&self) -> U256 {
        self.headers
            .iter()
            .fold(U256::ZERO, |acc, h| acc + h.difficulty())
    }
}

/// A chain proof: sparse prefix, dense suffix.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainProof {
    pub prefix: BlockChain,
    pub suffix: HeaderChain,
}

impl ChainProof {
    pub fn new(prefix: BlockChain, suffix: HeaderChain) -> Self {
        ChainProof { prefix, suffix }
    }

    /// The degenerate proof of the empty chain: the genesis block alone.
    /// Used to seed a synchronizer that has no better proof yet.
    pub fn genesis() -> ChainProof {
        ChainProof {
            prefix: BlockChain::new(vec![Block::genesis().to_light()]),
            suffix: HeaderChain::new(vec![]),
        }
    }

    /// Height of the proof head (last suffix header, or the prefix head for
    /// an empty suffix).
    pub fn head_height(&self) -> u32 {
        match self.suffix.headers.last() {
            Some(h) => h.height,
            None => self.prefix.head().map_or(0, |b| b.height()),
        }
    }
}

/// Verify a chain proof and reconstruct its suffix blocks.
///
/// Checks, in order: the prefix self-verifies; the suffix length is exactly
/// `k` or exactly `head.height - 1` (the only admissible short form, for
/// chains younger than `k + 1` blocks); and each suffix header extends the
/// running head with valid PoW and an interlink hash equal to the hash of
/// the interlink stepped forward from its predecessor.
///
/// Returns the reconstructed suffix blocks (header + interlink, no body), or
/// `None` if any check fails.
pub fn verify_proof(proof: &ChainProof, k: usize) -> Option<Vec<Block>> {
    if !proof.prefix.verify() {
        return None;
    }
    let head_height = proof.head_height();
    let suffix_len = proof.suffix.len();
    if suffix_len != k && suffix_len as u64 != (head_height as u64).saturating_sub(1) {
        return None;
    }

    let mut head = proof.prefix.head()?.to_light();
    let mut suffix_blocks = Vec::with_capacity(suffix_len);
    for header in &proof.suffix.headers {
        if header.prev_hash != head.hash()
            || header.height != head.height() + 1
            || header.timestamp < head.header.timestamp
        {
            return None;
        }
        if !pow::is_valid_compact(header.n_bits) || !header.verify_pow() {
            return None;
        }
        let interlink = head.get_next_interlink(&header.target());
        if interlink.hash() != header.interlink_hash {
            return None;
        }
        head = Block {
            header: header.clone(),
            interlink,
            body: None,
        };
        suffix_blocks.push(head.clone());
    }
    Some(suffix_blocks)
}

/// Score a proof prefix relative to a common ancestor.
///
/// Only blocks at or above the ancestor's height count. Each block falls
/// into the bucket of the depth its PoW hash actually cleared; walking the
/// buckets from the deepest down, depths are accumulated until at least `m`
/// blocks are covered. The score is `2^depth * count` at that point — a
/// chain whose blocks consistently cleared deeper-than-nominal targets
/// outranks a longer chain of shallow ones.
pub fn score(prefix: &BlockChain, ancestor_height: u32, m: usize) -> U256 {
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for block in &prefix.blocks {
        if block.height() < ancestor_height {
            continue;
        }
        let depth = pow::target_depth(&pow::hash_to_target(&block.hash()));
        *counts.entry(depth).or_insert(0) += 1;
    }

    let mut sum = 0usize;
    let mut stop_depth = 0u32;
    for (&depth, &count) in counts.iter().rev() {
        sum += count;
        if sum >= m {
            stop_depth = depth;
            break;
        }
    }
    (U256::ONE << stop_depth as usize) * U256::from(sum as u64)
}

/// Decide whether `new` represents more work than `current`.
///
/// Scores are compared relative to the chains' lowest common ancestor; on a
/// tie the new proof wins if its suffix carries at least as much total
/// difficulty, so equal chains fed in order converge on the newer proof.
/// Proofs with no common ancestor are incomparable and `new` loses.
pub fn is_better_proof(new: &ChainProof, current: &ChainProof, m: usize) -> bool {
    let Some(lca) = new.prefix.lowest_common_ancestor(&current.prefix) else {
        return false;
    };
    let new_score = score(&new.prefix, lca.height(), m);
    let current_score = score(&current.prefix, lca.height(), m);
    if new_score == current_score {
        new.suffix.total_difficulty() >= current.suffix.total_difficulty()
    } else {
        new_score > current_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockInterlink;
    use crate::constants;

    /// Mine a dense header-only chain of `len` blocks on top of genesis.
    fn mine_chain(len: usize, salt: u8) -> Vec<Block> {
        let mut blocks = vec![Block::genesis().to_light()];
        for _ in 1..len {
            let pred = blocks.last().unwrap();
            let target = pow::compact_to_target(constants::GENESIS_NBITS);
            let interlink = pred.get_next_interlink(&target);
            let mut header = crate::block::BlockHeader {
                version: constants::BLOCK_VERSION,
                prev_hash: pred.hash(),
                interlink_hash: interlink.hash(),
                body_hash: [salt; 32],
                accounts_hash: [0u8; 32],
                n_bits: constants::GENESIS_NBITS,
                height: pred.height() + 1,
                timestamp: pred.header.timestamp + constants::BLOCK_TIME_SECS,
                nonce: 0,
            };
            while pow::hash_to_target(&header.hash()) > target {
                header.nonce += 1;
            }
            blocks.push(Block {
                header,
                interlink,
                body: None,
            });
        }
        blocks
    }

    fn proof_from(blocks: &[Block], k: usize) -> ChainProof {
        let split = blocks.len() - k;
        ChainProof::new(
            BlockChain::new(blocks[..split].to_vec()),
            HeaderChain::new(blocks[split..].iter().map(|b| b.header.clone()).collect()),
        )
    }

    #[test]
    fn dense_chain_verifies() {
        let blocks = mine_chain(6, 0);
        let chain = BlockChain::new(blocks);
        assert!(chain.verify());
        assert_eq!(chain.tail().unwrap().hash(), Block::genesis().hash());
        assert_eq!(chain.head().unwrap().height(), 6);
    }

    #[test]
    fn empty_chain_rejected() {
        assert!(!BlockChain::new(vec![]).verify());
    }

    #[test]
    fn unlinked_blocks_rejected() {
        let a = mine_chain(3, 0);
        let b = mine_chain(5, 1);
        // Splice a foreign block into an otherwise valid chain.
        let spliced = vec![a[0].clone(), a[1].clone(), b[4].clone()];
        assert!(!BlockChain::new(spliced).verify());
    }

    #[test]
    fn proof_roundtrip_reconstructs_suffix() {
        let blocks = mine_chain(8, 0);
        let proof = proof_from(&blocks, 3);
        let suffix = verify_proof(&proof, 3).expect("proof should verify");
        assert_eq!(suffix.len(), 3);
        assert_eq!(suffix.last().unwrap().hash(), blocks.last().unwrap().hash());
        // Reconstructed interlinks must match the originals.
        for (rebuilt, original) in suffix.iter().zip(&blocks[5..]) {
            assert_eq!(rebuilt.interlink, original.interlink);
        }
    }

    #[test]
    fn proof_rejects_wrong_suffix_length() {
        let blocks = mine_chain(8, 0);
        let proof = proof_from(&blocks, 3);
        // Expected k = 4, head height is 8, so neither rule matches.
        assert!(verify_proof(&proof, 4).is_none());
    }

    #[test]
    fn proof_accepts_short_chain_rule() {
        // A chain of 4 blocks can prove itself with suffix length 3 even
        // when k is much larger.
        let blocks = mine_chain(4, 0);
        let proof = proof_from(&blocks, 3);
        assert!(verify_proof(&proof, 120).is_some());
    }

    #[test]
    fn proof_rejects_tampered_interlink_hash() {
        let blocks = mine_chain(8, 0);
        let mut proof = proof_from(&blocks, 3);
        proof.suffix.headers[1].interlink_hash = [0xaa; 32];
        assert!(verify_proof(&proof, 3).is_none());
    }

    #[test]
    fn score_rewards_more_blocks_past_ancestor() {
        let blocks = mine_chain(12, 0);
        let chain = BlockChain::new(blocks);
        let low = score(&chain, 9, 3);
        let high = score(&chain, 1, 3);
        assert!(high >= low);
        assert!(high > U256::ZERO);
    }

    #[test]
    fn identical_proof_wins_tie_break() {
        let blocks = mine_chain(8, 0);
        let proof = proof_from(&blocks, 3);
        // Equal scores, equal suffix difficulty: adoption is favored.
        assert!(is_better_proof(&proof, &proof, 3));
    }

    #[test]
    fn longer_fork_beats_shorter() {
        let blocks = mine_chain(12, 0);
        // Both proofs share the chain up to height 6, then A continues dense
        // while B stops.
        let a = ChainProof::new(
            BlockChain::new(blocks[..9].to_vec()),
            HeaderChain::new(blocks[9..].iter().map(|b| b.header.clone()).collect()),
        );
        let b = ChainProof::new(
            BlockChain::new(blocks[..5].to_vec()),
            HeaderChain::new(blocks[5..7].iter().map(|b| b.header.clone()).collect()),
        );
        assert!(is_better_proof(&a, &b, 3));
        assert!(!is_better_proof(&b, &a, 3));
    }

    #[test]
    fn disjoint_proofs_are_incomparable() {
        let blocks = mine_chain(8, 0);
        let fork = mine_chain(8, 1);
        // Slices that exclude genesis share no blocks.
        let a = ChainProof::new(
            BlockChain::new(blocks[2..6].to_vec()),
            HeaderChain::new(blocks[6..8].iter().map(|b| b.header.clone()).collect()),
        );
        let b = ChainProof::new(
            BlockChain::new(fork[2..6].to_vec()),
            HeaderChain::new(fork[6..8].iter().map(|b| b.header.clone()).collect()),
        );
        assert!(!is_better_proof(&a, &b, 3));
    }

    #[test]
    fn interlink_default_is_empty() {
        assert!(BlockInterlink::default().is_empty());
    }
}
