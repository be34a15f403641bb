//! Chain-side data structures: per-block bookkeeping, succinct chain proofs
//! and the persistent chain-data store.

pub mod data;
pub mod proof;
pub mod store;

pub use data::{ChainData, ChainTotals};
pub use proof::{BlockChain, ChainProof, HeaderChain};
pub use store::{ChainStore, ChainStoreTx, MemoryChainStore, SledChainStore, StoreError};
