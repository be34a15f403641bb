//! Persistent storage for chain data.
//!
//! Provides a `ChainStore` trait with a sled-backed implementation and an
//! in-memory one for tests and embedding, plus `ChainStoreTx`: a buffered
//! write overlay that keeps every mutation invisible to the underlying
//! store until `commit`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::chain::data::ChainData;
use crate::Hash;

/// Errors from store operations.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("store corrupted: {0}")]
    Corrupt(&'static str),
}

/// Trait for chain-data storage backends.
pub trait ChainStore: Send + Sync {
    fn get_chain_data(&self, hash: &Hash) -> Result<Option<ChainData>, StoreError>;
    fn put_chain_data(&self, hash: &Hash, data: &ChainData) -> Result<(), StoreError>;
    fn head_hash(&self) -> Result<Option<Hash>, StoreError>;
    fn set_head_hash(&self, hash: &Hash) -> Result<(), StoreError>;
    /// Remove all chain data and the head pointer.
    fn truncate(&self) -> Result<(), StoreError>;
    fn flush(&self) -> Result<(), StoreError>;
}

/// Sled-backed chain store.
pub struct SledChainStore {
    db: sled::Db,
    chain_data: sled::Tree,
    meta: sled::Tree,
}

const HEAD_KEY: &[u8] = b"head";

impl SledChainStore {
    /// Open or create a sled database at the given path.
    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Io(e.to_string()))?;
        Self::from_db(db)
    }

    /// Open a temporary in-memory sled database (for testing).
    pub fn open_temporary() -> Result<Self, StoreError> {
        let config = sled::Config::new().temporary(true);
        let db = config.open().map_err(|e| StoreError::Io(e.to_string()))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let chain_data = db
            .open_tree("chain_data")
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let meta = db
            .open_tree("chain_meta")
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(SledChainStore {
            db,
            chain_data,
            meta,
        })
    }
}

impl ChainStore for SledChainStore {
    fn get_chain_data(&self, hash: &Hash) -> Result<Option<ChainData>, StoreError> {
        match self
            .chain_data
            .get(hash)
            .map_err(|e| StoreError::Io(e.to_string()))?
        {
            Some(bytes) => {
                let data = bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    fn put_chain_data(&self, hash: &Hash, data: &ChainData) -> Result<(), StoreError> {
        let value =
            bincode::serialize(data).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.chain_data
            .insert(hash, value)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    fn head_hash(&self) -> Result<Option<Hash>, StoreError> {
        match self
            .meta
            .get(HEAD_KEY)
            .map_err(|e| StoreError::Io(e.to_string()))?
        {
            Some(bytes) => {
                let hash: Hash = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StoreError::Serialization("invalid head hash length".into()))?;
                Ok(Some(hash))
            }
            None => Ok(None),
        }
    }

    fn set_head_hash(&self, hash: &Hash) -> Result<(), StoreError> {
        self.meta
            .insert(HEAD_KEY, hash.as_slice())
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    fn truncate(&self) -> Result<(), StoreError> {
        self.chain_data
            .clear()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        self.meta
            .remove(HEAD_KEY)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryInner {
    data: HashMap<Hash, ChainData>,
    head: Option<Hash>,
}

/// In-memory chain store for tests and embedding without a disk store.
#[derive(Default)]
pub struct MemoryChainStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryInner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryInner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.read().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().data.is_empty()
    }
}

impl ChainStore for MemoryChainStore {
    fn get_chain_data(&self, hash: &Hash) -> Result<Option<ChainData>, StoreError> {
        Ok(self.read().data.get(hash).cloned())
    }

    fn put_chain_data(&self, hash: &Hash, data: &ChainData) -> Result<(), StoreError> {
        self.write().data.insert(*hash, data.clone());
        Ok(())
    }

    fn head_hash(&self) -> Result<Option<Hash>, StoreError> {
        Ok(self.read().head)
    }

    fn set_head_hash(&self, hash: &Hash) -> Result<(), StoreError> {
        self.write().head = Some(*hash);
        Ok(())
    }

    fn truncate(&self) -> Result<(), StoreError> {
        let mut inner = self.write();
        inner.data.clear();
        inner.head = None;
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// A buffered transaction over a `ChainStore`.
///
/// Reads see the transaction's own writes first and fall through to the
/// underlying store — unless the transaction truncated, in which case the
/// underlying content is dead. Nothing reaches the store until `commit`;
/// `commit` and `abort` are idempotent.
pub struct ChainStoreTx {
    store: Arc<dyn ChainStore>,
    writes: HashMap<Hash, ChainData>,
    head: Option<Hash>,
    truncated: bool,
    open: bool,
}

impl ChainStoreTx {
    pub fn new(store: Arc<dyn ChainStore>) -> Self {
        ChainStoreTx {
            store,
            writes: HashMap::new(),
            head: None,
            truncated: false,
            open: true,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn get_chain_data(&self, hash: &Hash) -> Result<Option<ChainData>, StoreError> {
        if let Some(data) = self.writes.get(hash) {
            return Ok(Some(data.clone()));
        }
        if self.truncated {
            return Ok(None);
        }
        self.store.get_chain_data(hash)
    }

    pub fn put_chain_data(&mut self, hash: Hash, data: ChainData) {
        self.writes.insert(hash, data);
    }

    pub fn head_hash(&self) -> Result<Option<Hash>, StoreError> {
        if let Some(head) = self.head {
            return Ok(Some(head));
        }
        if self.truncated {
            return Ok(None);
        }
        self.store.head_hash()
    }

    pub fn set_head_hash(&mut self, hash: Hash) {
        self.head = Some(hash);
    }

    /// Drop everything: buffered writes, the pending head pointer, and (at
    /// commit time) the underlying store's content.
    pub fn truncate(&mut self) {
        self.truncated = true;
        self.writes.clear();
        self.head = None;
    }

    /// Write the transaction through to the store. Returns `Ok(false)` if
    /// the transaction was already committed or aborted.
    pub fn commit(&mut self) -> Result<bool, StoreError> {
        if !self.open {
            return Ok(false);
        }
        self.open = false;
        if self.truncated {
            self.store.truncate()?;
        }
        for (hash, data) in &self.writes {
            self.store.put_chain_data(hash, data)?;
        }
        if let Some(head) = &self.head {
            self.store.set_head_hash(head)?;
        }
        self.store.flush()?;
        self.writes.clear();
        Ok(true)
    }

    /// Discard the transaction. Idempotent.
    pub fn abort(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.writes.clear();
        self.head = None;
        self.truncated = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::chain::data::ChainTotals;

    fn sample_data(on_main: bool) -> ChainData {
        ChainData {
            block: Block::genesis(),
            totals: ChainTotals::LookupOnly,
            on_main_chain: on_main,
        }
    }

    #[test]
    fn sled_roundtrip() {
        use alloy_primitives::U256;

        let store = SledChainStore::open_temporary().unwrap();
        let hash = Block::genesis().hash();
        assert!(store.get_chain_data(&hash).unwrap().is_none());

        let data = ChainData::new_extendable(
            Block::genesis(),
            U256::from(12345u64),
            U256::from(1u64) << 200usize,
            true,
        );
        store.put_chain_data(&hash, &data).unwrap();
        let loaded = store.get_chain_data(&hash).unwrap().unwrap();
        assert!(loaded.on_main_chain);
        assert_eq!(loaded.block.hash(), hash);
        assert_eq!(loaded.total_difficulty(), Some(U256::from(12345u64)));
        assert_eq!(loaded.total_work(), Some(U256::from(1u64) << 200usize));

        store.set_head_hash(&hash).unwrap();
        assert_eq!(store.head_hash().unwrap(), Some(hash));

        store.truncate().unwrap();
        assert!(store.get_chain_data(&hash).unwrap().is_none());
        assert!(store.head_hash().unwrap().is_none());
    }

    #[test]
    fn memory_roundtrip() {
        let store = MemoryChainStore::new();
        let hash = Block::genesis().hash();
        store.put_chain_data(&hash, &sample_data(false)).unwrap();
        assert_eq!(store.len(), 1);
        assert!(!store.get_chain_data(&hash).unwrap().unwrap().on_main_chain);
    }

    #[test]
    fn tx_buffers_until_commit() {
        let store = Arc::new(MemoryChainStore::new());
        let hash = Block::genesis().hash();

        let mut tx = ChainStoreTx::new(store.clone());
        tx.put_chain_data(hash, sample_data(true));
        tx.set_head_hash(hash);

        // Visible inside the transaction, invisible outside.
        assert!(tx.get_chain_data(&hash).unwrap().is_some());
        assert_eq!(tx.head_hash().unwrap(), Some(hash));
        assert!(store.is_empty());
        assert!(store.head_hash().unwrap().is_none());

        assert!(tx.commit().unwrap());
        assert_eq!(store.len(), 1);
        assert_eq!(store.head_hash().unwrap(), Some(hash));

        // Double commit is a no-op.
        assert!(!tx.commit().unwrap());
    }

    #[test]
    fn tx_abort_discards() {
        let store = Arc::new(MemoryChainStore::new());
        let hash = Block::genesis().hash();

        let mut tx = ChainStoreTx::new(store.clone());
        tx.put_chain_data(hash, sample_data(true));
        tx.abort();
        tx.abort(); // idempotent
        assert!(!tx.is_open());
        assert!(store.is_empty());
        assert!(!tx.commit().unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn tx_truncate_hides_store_content() {
        let store = Arc::new(MemoryChainStore::new());
        let hash = Block::genesis().hash();
        store.put_chain_data(&hash, &sample_data(true)).unwrap();
        store.set_head_hash(&hash).unwrap();

        let mut tx = ChainStoreTx::new(store.clone());
        assert!(tx.get_chain_data(&hash).unwrap().is_some());
        tx.truncate();
        assert!(tx.get_chain_data(&hash).unwrap().is_none());
        assert!(tx.head_hash().unwrap().is_none());
        // The store itself is untouched until commit.
        assert_eq!(store.len(), 1);

        assert!(tx.commit().unwrap());
        assert!(store.is_empty());
        assert!(store.head_hash().unwrap().is_none());
    }
}
