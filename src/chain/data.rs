//! Per-block chain bookkeeping stored alongside each block.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::block::Block;

/// Cumulative totals for a stored block.
///
/// Blocks inserted from a proof's sparse prefix exist only so interlink and
/// ancestry checks can find them; they carry no usable totals and must never
/// be extended. Everything else tracks the cumulative difficulty and work of
/// its chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainTotals {
    Extendable {
        total_difficulty: U256,
        total_work: U256,
    },
    LookupOnly,
}

/// A block plus its chain bookkeeping.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainData {
    pub block: Block,
    pub totals: ChainTotals,
    pub on_main_chain: bool,
}

impl ChainData {
    pub fn new_extendable(
        block: Block,
        total_difficulty: U256,
        total_work: U256,
        on_main_chain: bool,
    ) -> Self {
        ChainData {
            block,
            totals: ChainTotals::Extendable {
                total_difficulty,
                total_work,
            },
            on_main_chain,
        }
    }

    /// Lookup-only entry for a sparse prefix block. Always marked as part of
    /// the main chain: the proof vouches for it, but it cannot be extended.
    pub fn lookup_only(block: Block) -> Self {
        ChainData {
            block,
            totals: ChainTotals::LookupOnly,
            on_main_chain: true,
        }
    }

    pub fn is_extendable(&self) -> bool {
        matches!(self.totals, ChainTotals::Extendable { .. })
    }

    pub fn total_difficulty(&self) -> Option<U256> {
        match &self.totals {
            ChainTotals::Extendable {
                total_difficulty, ..
            } => Some(*total_difficulty),
            ChainTotals::LookupOnly => None,
        }
    }

    pub fn total_work(&self) -> Option<U256> {
        match &self.totals {
            ChainTotals::Extendable { total_work, .. } => Some(*total_work),
            ChainTotals::LookupOnly => None,
        }
    }
}
