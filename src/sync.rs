//! The partial light chain synchronizer.
//!
//! Bootstraps a verified chain view from an untrusted peer in four phases:
//!
//! 1. `PROVE_CHAIN` — await a chain proof. A verified proof that beats the
//!    current one is adopted: the store is truncated to the proof's sparse
//!    prefix and the dense suffix is replayed header-by-header.
//! 2. `PROVE_ACCOUNTS_TREE` — stream accounts-tree chunks until the full
//!    snapshot at the proof head exists, pinned to the head's accounts hash.
//! 3. `PROVE_BLOCKS` — accept the most recent full blocks and walk them
//!    *backwards* from the proof head, reverting the accounts state one
//!    block per step and cross-checking it against each header.
//! 4. `COMPLETE` — await an external `commit`, which atomically promotes
//!    the reconstructed state to the canonical store and accounts.
//!
//! `ABORTED` is reachable from every phase and terminal; aborting leaves the
//! node's canonical state bit-identical to its pre-construction state, since
//! all work happens inside a store transaction and a private snapshot.
//!
//! Storage failures terminate the current operation with an error code and a
//! log line; the synchronizer stays abortable. All public operations are
//! serialized through `SyncHandle`, so phase checks never race.

use std::cmp;
use std::sync::Arc;

use alloy_primitives::U256;

use crate::accounts::{
    Accounts, AccountsTree, AccountsTreeChunk, AccountsTx, ChunkResult, PartialAccountsTree,
};
use crate::block::Block;
use crate::chain::data::{ChainData, ChainTotals};
use crate::chain::proof::{self, ChainProof};
use crate::chain::store::{ChainStore, ChainStoreTx, StoreError};
use crate::policy::Policy;
use crate::{constants, pow, Hash};

/// Synchronizer errors. Public operations translate these into result codes
/// after logging; the constructor surfaces them directly.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("chain store is inconsistent: {0}")]
    InconsistentStore(&'static str),
    #[error("invalid chain proof")]
    InvalidProof,
}

/// The externally visible phase of a synchronizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    ProveChain,
    ProveAccountsTree,
    ProveBlocks,
    Complete,
    Aborted,
}

/// Result codes for block pushes. Negative values are errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i8)]
pub enum PushResult {
    ErrOrphan = -2,
    ErrInvalid = -1,
    OkKnown = 0,
    OkExtended = 1,
    OkRebranched = 2,
    OkForked = 3,
}

impl PushResult {
    pub fn is_err(&self) -> bool {
        (*self as i8) < 0
    }
}

/// Events emitted synchronously from within synchronizer operations.
#[derive(Clone, Debug)]
pub enum SyncEvent {
    HeadChanged {
        head: Hash,
    },
    Complete {
        proof: Arc<ChainProof>,
        head_hash: Hash,
        main_chain: ChainData,
    },
    Committed {
        proof: Arc<ChainProof>,
        head_hash: Hash,
        main_chain: ChainData,
    },
    Aborted,
}

type EventObserver = Box<dyn Fn(&SyncEvent) + Send + Sync>;

/// Phase-specific state. The partial tree only exists while accounts chunks
/// are streaming, and the accounts transaction only while blocks are being
/// replayed backwards.
enum PhaseState {
    ProveChain,
    ProveAccountsTree { partial: PartialAccountsTree },
    ProveBlocks { accounts_tx: AccountsTx },
    Complete,
    Aborted,
}

/// A partial light chain: one sync attempt against one peer.
///
/// Constructed with the shared store and accounts plus the best chain proof
/// known so far (the degenerate [`ChainProof::genesis`] on a fresh node).
/// Destroyed on `commit` or `abort`; both release the underlying
/// transactions.
pub struct PartialLightChain {
    policy: Policy,
    store_tx: ChainStoreTx,
    accounts: Arc<Accounts>,
    /// The best proof known to this instance; replaced on adoption.
    proof: Arc<ChainProof>,
    /// Snapshot produced by the committed partial tree. Private to this
    /// instance until `commit` promotes it into `accounts`.
    snapshot: Option<AccountsTree>,
    phase: PhaseState,
    /// Oldest main-chain block we hold verified account state for. Reverse
    /// application moves it one predecessor closer to the pre-sync tip.
    proof_head: Option<ChainData>,
    head_hash: Hash,
    main_chain: ChainData,
    observers: Vec<EventObserver>,
}

impl PartialLightChain {
    /// Open a synchronizer over the given store and accounts.
    ///
    /// An empty store is initialized with the genesis block — inside the
    /// transaction, so an aborted sync leaves it empty.
    pub fn new(
        store: Arc<dyn ChainStore>,
        accounts: Arc<Accounts>,
        current_proof: ChainProof,
        policy: Policy,
    ) -> Result<Self, SyncError> {
        let mut store_tx = ChainStoreTx::new(store);
        let (head_hash, main_chain) = match store_tx.head_hash()? {
            Some(hash) => {
                let data = store_tx
                    .get_chain_data(&hash)?
                    .ok_or(SyncError::InconsistentStore("head block is not stored"))?;
                (hash, data)
            }
            None => {
                let genesis = Block::genesis();
                let hash = genesis.hash();
                let data = ChainData::new_extendable(
                    genesis,
                    pow::difficulty_from_compact(constants::GENESIS_NBITS),
                    pow::real_difficulty(&hash),
                    true,
                );
                store_tx.put_chain_data(hash, data.clone());
                store_tx.set_head_hash(hash);
                (hash, data)
            }
        };

        Ok(PartialLightChain {
            policy,
            store_tx,
            accounts,
            proof: Arc::new(current_proof),
            snapshot: None,
            phase: PhaseState::ProveChain,
            proof_head: None,
            head_hash,
            main_chain,
            observers: Vec::new(),
        })
    }

    /// Register an event observer. Dispatch is synchronous, inside the
    /// operation that emits the event.
    pub fn on_event(&mut self, observer: impl Fn(&SyncEvent) + Send + Sync + 'static) {
        self.observers.push(Box::new(observer));
    }

    fn notify(&self, event: &SyncEvent) {
        for observer in &self.observers {
            observer(event);
        }
    }

    /// Push a chain proof.
    ///
    /// Returns `false` if the proof fails verification (state unchanged) or
    /// arrives after the sync finished. A proof that verifies but does not
    /// beat the current one *aborts the synchronizer* and returns `true`:
    /// an instance is a single sync attempt, and a peer whose best proof
    /// cannot advance it has nothing more to offer.
    pub fn push_proof(&mut self, proof: ChainProof) -> bool {
        if matches!(self.phase, PhaseState::Aborted | PhaseState::Complete) {
            tracing::warn!("chain proof pushed after the sync finished, ignoring");
            return false;
        }
        let Some(suffix_blocks) = proof::verify_proof(&proof, self.policy.k) else {
            tracing::warn!("rejecting invalid chain proof");
            return false;
        };
        if !proof::is_better_proof(&proof, self.proof.as_ref(), self.policy.m) {
            tracing::warn!("chain proof does not improve on the current proof, aborting sync");
            self.abort();
            return true;
        }
        match self.accept_proof(proof, suffix_blocks) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "failed to adopt verified chain proof");
                self.abort();
                false
            }
        }
    }

    /// Adopt a verified, better proof: rebase the store onto its sparse
    /// prefix, replay the reconstructed suffix, then start streaming the
    /// accounts snapshot pinned to the new head.
    fn accept_proof(&mut self, proof: ChainProof, suffix_blocks: Vec<Block>) -> Result<(), SyncError> {
        let Some(prefix_head) = proof.prefix.head().cloned() else {
            return Err(SyncError::InvalidProof);
        };
        let prefix_head_hash = prefix_head.hash();

        let head_data = self.store_tx.get_chain_data(&prefix_head_hash)?;
        if !head_data.as_ref().is_some_and(ChainData::is_extendable) {
            // The proof's sparse base is not part of our dense chain:
            // restart the store from the proof. The base gets its own
            // difficulty as cumulative totals; every other prefix block is
            // stored for lookup only and can never be extended.
            self.store_tx.truncate();
            let data = ChainData::new_extendable(
                prefix_head.to_light(),
                prefix_head.difficulty(),
                pow::real_difficulty(&prefix_head_hash),
                true,
            );
            self.store_tx.put_chain_data(prefix_head_hash, data.clone());
            self.store_tx.set_head_hash(prefix_head_hash);
            self.head_hash = prefix_head_hash;
            self.main_chain = data;
            for block in &proof.prefix.blocks[..proof.prefix.len() - 1] {
                self.store_tx
                    .put_chain_data(block.hash(), ChainData::lookup_only(block.to_light()));
            }
        }

        for block in suffix_blocks {
            let result = self.push_light_block(block)?;
            if result.is_err() {
                tracing::error!(?result, "verified suffix block failed to apply");
                return Err(SyncError::InvalidProof);
            }
        }

        let expected_root = self.main_chain.block.header.accounts_hash;
        self.phase = PhaseState::ProveAccountsTree {
            partial: PartialAccountsTree::new(expected_root),
        };
        self.snapshot = None;
        self.proof_head = Some(self.main_chain.clone());
        self.proof = Arc::new(proof);
        tracing::info!(
            head = %hex::encode(&self.head_hash[..8]),
            height = self.main_chain.block.height(),
            "chain proof adopted"
        );
        Ok(())
    }

    /// Push a header-level block: the path used for proof suffixes and for
    /// new blocks at the tip after the sync completed.
    fn push_light_block(&mut self, block: Block) -> Result<PushResult, SyncError> {
        let hash = block.hash();
        if self.store_tx.get_chain_data(&hash)?.is_some() {
            return Ok(PushResult::OkKnown);
        }
        if let Err(e) = block.verify() {
            tracing::warn!(error = %e, block = %hex::encode(&hash[..8]), "rejecting invalid block");
            return Ok(PushResult::ErrInvalid);
        }
        let Some(prev) = self.store_tx.get_chain_data(&block.header.prev_hash)? else {
            return Ok(PushResult::ErrOrphan);
        };
        let (prev_td, prev_tw) = match &prev.totals {
            ChainTotals::Extendable {
                total_difficulty,
                total_work,
            } => (*total_difficulty, *total_work),
            // Lookup-only blocks anchor proofs; they cannot be extended.
            ChainTotals::LookupOnly => return Ok(PushResult::ErrOrphan),
        };
        if let Some(next_target) = self.get_next_target(&prev.block)? {
            if pow::is_valid_target(&next_target)
                && block.header.n_bits != pow::target_to_compact(&next_target)
            {
                tracing::warn!(
                    block = %hex::encode(&hash[..8]),
                    "block difficulty does not match the expected retarget"
                );
                return Ok(PushResult::ErrInvalid);
            }
        }

        let total_difficulty = prev_td + block.difficulty();
        let total_work = prev_tw + pow::real_difficulty(&hash);

        if block.header.prev_hash == self.head_hash {
            let data = ChainData::new_extendable(block, total_difficulty, total_work, true);
            self.store_tx.put_chain_data(hash, data.clone());
            self.store_tx.set_head_hash(hash);
            self.head_hash = hash;
            self.main_chain = data;
            self.notify(&SyncEvent::HeadChanged { head: hash });
            Ok(PushResult::OkExtended)
        } else if total_difficulty > self.main_total_difficulty() {
            let data = ChainData::new_extendable(block, total_difficulty, total_work, true);
            self.rebranch(hash, data)?;
            self.notify(&SyncEvent::HeadChanged { head: hash });
            Ok(PushResult::OkRebranched)
        } else {
            let data = ChainData::new_extendable(block, total_difficulty, total_work, false);
            self.store_tx.put_chain_data(hash, data);
            Ok(PushResult::OkForked)
        }
    }

    /// Switch the main chain to a fork that has accumulated more total
    /// difficulty.
    fn rebranch(&mut self, new_head_hash: Hash, new_head: ChainData) -> Result<(), SyncError> {
        // Collect the fork branch back to the first block still on the main
        // chain.
        let mut branch = vec![(new_head_hash, new_head)];
        let mut cursor = branch[0].1.block.header.prev_hash;
        loop {
            let data = self
                .store_tx
                .get_chain_data(&cursor)?
                .ok_or(SyncError::InconsistentStore("fork branch has a missing ancestor"))?;
            if data.on_main_chain {
                break;
            }
            let prev = data.block.header.prev_hash;
            branch.push((cursor, data));
            cursor = prev;
        }
        let ancestor = cursor;

        // Unmark the old main chain above the common ancestor.
        let mut cursor = self.head_hash;
        while cursor != ancestor {
            let mut data = self
                .store_tx
                .get_chain_data(&cursor)?
                .ok_or(SyncError::InconsistentStore("main chain has a missing ancestor"))?;
            data.on_main_chain = false;
            let prev = data.block.header.prev_hash;
            self.store_tx.put_chain_data(cursor, data);
            cursor = prev;
        }

        // Mark the new branch, oldest first.
        for (hash, mut data) in branch.into_iter().rev() {
            data.on_main_chain = true;
            if hash == new_head_hash {
                self.main_chain = data.clone();
            }
            self.store_tx.put_chain_data(hash, data);
        }
        self.store_tx.set_head_hash(new_head_hash);
        self.head_hash = new_head_hash;
        Ok(())
    }

    /// Compute the retargeted difficulty for the successor of `head`, or
    /// `None` when the retarget window is not fully available (sparse
    /// history) and the check must be skipped.
    fn get_next_target(&self, head: &Block) -> Result<Option<U256>, SyncError> {
        let window = self.policy.difficulty_block_window;
        if window == 0 || head.height() <= window {
            return Ok(None);
        }
        let mut tail = head.clone();
        for _ in 0..window {
            match self.store_tx.get_chain_data(&tail.header.prev_hash)? {
                Some(data) => tail = data.block,
                None => return Ok(None),
            }
        }
        let expected = window as u64 * self.policy.block_time_secs;
        if expected == 0 {
            return Ok(None);
        }
        let actual = head.header.timestamp.saturating_sub(tail.header.timestamp);
        let clamped = actual.clamp(
            expected / constants::MAX_ADJUSTMENT_FACTOR,
            expected * constants::MAX_ADJUSTMENT_FACTOR,
        );
        let next = head.target() * U256::from(clamped) / U256::from(expected);
        Ok(Some(next.clamp(U256::ONE, pow::TARGET_MAX)))
    }

    /// Every interlink entry we can resolve locally must be an ancestor.
    fn verify_interlink(&self, block: &Block) -> Result<bool, SyncError> {
        for hash in &block.interlink.hashes {
            if let Some(data) = self.store_tx.get_chain_data(hash)? {
                if data.block.height() >= block.height() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Push an accounts-tree chunk. Legal only while proving the accounts
    /// tree; on completion the snapshot is committed into this instance and
    /// the accounts transaction for reverse verification is opened.
    pub fn push_accounts_tree_chunk(&mut self, chunk: &AccountsTreeChunk) -> ChunkResult {
        let PhaseState::ProveAccountsTree { partial } = &mut self.phase else {
            return ChunkResult::ErrIncorrectProof;
        };
        let result = partial.push_chunk(chunk);
        if result != ChunkResult::OkComplete {
            return result;
        }

        let PhaseState::ProveAccountsTree { partial } =
            std::mem::replace(&mut self.phase, PhaseState::ProveChain)
        else {
            return ChunkResult::ErrIncorrectProof;
        };
        let Some(snapshot) = partial.commit() else {
            return ChunkResult::ErrIncorrectProof;
        };
        tracing::info!(
            accounts = snapshot.len(),
            root = %hex::encode(&snapshot.root_hash()[..8]),
            "accounts snapshot complete"
        );
        let accounts_tx = AccountsTx::new(snapshot.clone());
        self.snapshot = Some(snapshot);
        self.phase = PhaseState::ProveBlocks { accounts_tx };
        ChunkResult::OkComplete
    }

    /// Push a block.
    ///
    /// While proving blocks, only the proof head itself (full) or its
    /// immediate predecessor are acceptable; anything else is an orphan.
    /// After completion, blocks extend the chain through the normal path.
    pub fn push_block(&mut self, block: Block) -> PushResult {
        match &self.phase {
            PhaseState::ProveBlocks { .. } => {
                let Some(proof_head) = self.proof_head.clone() else {
                    return PushResult::ErrOrphan;
                };
                let hash = block.hash();
                // The head path only exists while the proof head is still
                // the header-only view stored at adoption; once a full block
                // holds that position, re-pushing it is an orphan.
                let result = if hash == proof_head.block.hash() && !proof_head.block.is_full() {
                    self.push_head_block(block, proof_head)
                } else if hash == proof_head.block.header.prev_hash {
                    self.push_block_backwards(block, proof_head)
                } else {
                    Ok(PushResult::ErrOrphan)
                };
                result.unwrap_or_else(|e| {
                    tracing::error!(error = %e, "store failure while applying block");
                    PushResult::ErrInvalid
                })
            }
            PhaseState::Complete => self.push_light_block(block).unwrap_or_else(|e| {
                tracing::error!(error = %e, "store failure while pushing block");
                PushResult::ErrInvalid
            }),
            _ => PushResult::ErrOrphan,
        }
    }

    /// Re-apply the proof head as a full block. On adoption only its header
    /// view was stored; the full body is needed both to serve the block and
    /// to revert the accounts state below it.
    fn push_head_block(
        &mut self,
        block: Block,
        proof_head: ChainData,
    ) -> Result<PushResult, SyncError> {
        let hash = block.hash();
        if !block.is_full() {
            return Ok(PushResult::ErrInvalid);
        }
        if let Err(e) = block.verify() {
            tracing::warn!(error = %e, block = %hex::encode(&hash[..8]), "rejecting invalid head block");
            return Ok(PushResult::ErrInvalid);
        }
        if !self.verify_interlink(&block)? {
            return Ok(PushResult::ErrInvalid);
        }
        let Some(prev) = self.store_tx.get_chain_data(&block.header.prev_hash)? else {
            return Ok(PushResult::ErrInvalid);
        };
        if !block.is_immediate_successor_of(&prev.block) {
            return Ok(PushResult::ErrInvalid);
        }
        if let Some(next_target) = self.get_next_target(&prev.block)? {
            if pow::is_valid_target(&next_target)
                && block.header.n_bits != pow::target_to_compact(&next_target)
            {
                return Ok(PushResult::ErrInvalid);
            }
        }

        let (total_difficulty, total_work) = match &prev.totals {
            ChainTotals::Extendable {
                total_difficulty,
                total_work,
            } => (
                *total_difficulty + block.difficulty(),
                *total_work + pow::real_difficulty(&hash),
            ),
            // With an empty suffix the head sits directly on the sparse
            // base; its adopted totals stay authoritative.
            ChainTotals::LookupOnly => {
                match (proof_head.total_difficulty(), proof_head.total_work()) {
                    (Some(td), Some(tw)) => (td, tw),
                    _ => return Err(SyncError::InconsistentStore("proof head has no totals")),
                }
            }
        };

        let data = ChainData::new_extendable(block, total_difficulty, total_work, true);
        Ok(self.prepend(hash, data))
    }

    /// Push the immediate predecessor of the current proof head.
    fn push_block_backwards(
        &mut self,
        block: Block,
        proof_head: ChainData,
    ) -> Result<PushResult, SyncError> {
        let hash = block.hash();
        if !block.is_full() {
            return Ok(PushResult::ErrInvalid);
        }
        if let Err(e) = block.verify() {
            tracing::warn!(error = %e, block = %hex::encode(&hash[..8]), "rejecting invalid predecessor block");
            return Ok(PushResult::ErrInvalid);
        }
        if !self.verify_interlink(&block)? {
            return Ok(PushResult::ErrInvalid);
        }
        if !proof_head.block.is_immediate_successor_of(&block) {
            return Ok(PushResult::ErrInvalid);
        }
        if let Some(next_target) = self.get_next_target(&block)? {
            if pow::is_valid_target(&next_target)
                && proof_head.block.header.n_bits != pow::target_to_compact(&next_target)
            {
                return Ok(PushResult::ErrInvalid);
            }
        }

        let (Some(ph_td), Some(ph_tw)) = (proof_head.total_difficulty(), proof_head.total_work())
        else {
            return Err(SyncError::InconsistentStore("proof head has no totals"));
        };
        // Totals decrease toward the past. Blocks below the proof's sparse
        // base bottom out at their own contribution.
        let total_difficulty = cmp::max(
            ph_td
                .checked_sub(proof_head.block.difficulty())
                .unwrap_or(U256::ZERO),
            block.difficulty(),
        );
        let total_work = cmp::max(
            ph_tw
                .checked_sub(pow::real_difficulty(&proof_head.block.hash()))
                .unwrap_or(U256::ZERO),
            pow::real_difficulty(&hash),
        );

        let data = ChainData::new_extendable(block, total_difficulty, total_work, true);
        Ok(self.prepend(hash, data))
    }

    /// Prepend a fully validated block: revert the accounts state across it,
    /// persist it, and advance the proof head. A block that does not revert
    /// cleanly is rejected without touching any state.
    fn prepend(&mut self, hash: Hash, data: ChainData) -> PushResult {
        let reward = self.policy.block_reward;
        let PhaseState::ProveBlocks { accounts_tx } = &mut self.phase else {
            return PushResult::ErrOrphan;
        };
        if let Err(e) = accounts_tx.revert_block(&data.block, reward) {
            tracing::warn!(
                error = %e,
                block = %hex::encode(&hash[..8]),
                "block does not revert cleanly against the accounts state"
            );
            return PushResult::ErrInvalid;
        }
        self.store_tx.put_chain_data(hash, data.clone());
        self.proof_head = Some(data);
        if !self.needs_more_blocks() {
            self.finish();
        }
        PushResult::OkExtended
    }

    /// Whether more backward blocks are required before the sync is
    /// complete. Bottoms out at the genesis block, which has no predecessor
    /// to prepend.
    pub fn needs_more_blocks(&self) -> bool {
        let Some(proof_head) = &self.proof_head else {
            return true;
        };
        let proof_height = proof_head.block.height();
        if proof_height <= 1 {
            return false;
        }
        self.main_chain.block.height() - proof_height < self.policy.num_blocks_verification
    }

    /// Enough history verified: discard the accounts transaction (it only
    /// served verification; the snapshot itself was committed when the
    /// partial tree completed) and await the external `commit`.
    fn finish(&mut self) {
        if let PhaseState::ProveBlocks { accounts_tx } = &mut self.phase {
            accounts_tx.abort();
        }
        self.phase = PhaseState::Complete;
        tracing::info!(
            head = %hex::encode(&self.head_hash[..8]),
            height = self.main_chain.block.height(),
            proof_height = self.proof_head.as_ref().map(|d| d.block.height()),
            "partial chain sync complete"
        );
        self.notify(&SyncEvent::Complete {
            proof: self.proof.clone(),
            head_hash: self.head_hash,
            main_chain: self.main_chain.clone(),
        });
    }

    /// Write the reconstructed chain through to the canonical store and
    /// promote the accounts snapshot. Legal only in `COMPLETE`; a second
    /// commit returns `false`.
    pub fn commit(&mut self) -> bool {
        if !matches!(self.phase, PhaseState::Complete) {
            return false;
        }
        match self.store_tx.commit() {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                tracing::error!(error = %e, "failed to commit chain store transaction");
                return false;
            }
        }
        if let Some(snapshot) = self.snapshot.take() {
            self.accounts.replace(snapshot);
        }
        tracing::info!(
            head = %hex::encode(&self.head_hash[..8]),
            height = self.main_chain.block.height(),
            "partial chain committed"
        );
        self.notify(&SyncEvent::Committed {
            proof: self.proof.clone(),
            head_hash: self.head_hash,
            main_chain: self.main_chain.clone(),
        });
        true
    }

    /// Abort the sync attempt. Safe in any phase, idempotent, and leaves
    /// all canonical state untouched.
    pub fn abort(&mut self) {
        if matches!(self.phase, PhaseState::Aborted) {
            return;
        }
        if let PhaseState::ProveBlocks { accounts_tx } = &mut self.phase {
            accounts_tx.abort();
        }
        self.phase = PhaseState::Aborted;
        self.snapshot = None;
        self.store_tx.abort();
        tracing::info!("partial chain sync aborted");
        self.notify(&SyncEvent::Aborted);
    }

    /// Current phase.
    pub fn state(&self) -> SyncPhase {
        match self.phase {
            PhaseState::ProveChain => SyncPhase::ProveChain,
            PhaseState::ProveAccountsTree { .. } => SyncPhase::ProveAccountsTree,
            PhaseState::ProveBlocks { .. } => SyncPhase::ProveBlocks,
            PhaseState::Complete => SyncPhase::Complete,
            PhaseState::Aborted => SyncPhase::Aborted,
        }
    }

    pub fn head_hash(&self) -> Hash {
        self.head_hash
    }

    pub fn height(&self) -> u32 {
        self.main_chain.block.height()
    }

    pub fn main_chain(&self) -> &ChainData {
        &self.main_chain
    }

    /// The proof currently backing this instance.
    pub fn current_proof(&self) -> Arc<ChainProof> {
        self.proof.clone()
    }

    pub fn proof_head_height(&self) -> Option<u32> {
        self.proof_head.as_ref().map(|d| d.block.height())
    }

    /// Locator hashes for requesting the next blocks from a peer: the proof
    /// head while replaying backwards, the chain head otherwise.
    pub fn block_locators(&self) -> Vec<Hash> {
        match (&self.phase, &self.proof_head) {
            (PhaseState::ProveBlocks { .. }, Some(proof_head)) => vec![proof_head.block.hash()],
            _ => vec![self.head_hash],
        }
    }

    /// Hex prefix from which the next accounts chunk must continue, while
    /// the snapshot is streaming.
    pub fn missing_accounts_prefix(&self) -> Option<String> {
        match &self.phase {
            PhaseState::ProveAccountsTree { partial } => Some(partial.missing_prefix()),
            _ => None,
        }
    }

    fn main_total_difficulty(&self) -> U256 {
        self.main_chain.total_difficulty().unwrap_or(U256::ZERO)
    }
}

/// Serialized façade over a [`PartialLightChain`].
///
/// All public operations go through a fair async mutex: they run one at a
/// time, in submission order, so phase checks and transitions never race.
#[derive(Clone)]
pub struct SyncHandle {
    inner: Arc<tokio::sync::Mutex<PartialLightChain>>,
}

impl SyncHandle {
    pub fn new(chain: PartialLightChain) -> Self {
        SyncHandle {
            inner: Arc::new(tokio::sync::Mutex::new(chain)),
        }
    }

    pub async fn push_proof(&self, proof: ChainProof) -> bool {
        self.inner.lock().await.push_proof(proof)
    }

    pub async fn push_accounts_tree_chunk(&self, chunk: AccountsTreeChunk) -> ChunkResult {
        self.inner.lock().await.push_accounts_tree_chunk(&chunk)
    }

    pub async fn push_block(&self, block: Block) -> PushResult {
        self.inner.lock().await.push_block(block)
    }

    pub async fn commit(&self) -> bool {
        self.inner.lock().await.commit()
    }

    pub async fn abort(&self) {
        self.inner.lock().await.abort()
    }

    pub async fn state(&self) -> SyncPhase {
        self.inner.lock().await.state()
    }

    pub async fn head_hash(&self) -> Hash {
        self.inner.lock().await.head_hash()
    }

    pub async fn needs_more_blocks(&self) -> bool {
        self.inner.lock().await.needs_more_blocks()
    }

    pub async fn proof_head_height(&self) -> Option<u32> {
        self.inner.lock().await.proof_head_height()
    }

    pub async fn block_locators(&self) -> Vec<Hash> {
        self.inner.lock().await.block_locators()
    }

    pub async fn missing_accounts_prefix(&self) -> Option<String> {
        self.inner.lock().await.missing_accounts_prefix()
    }

    pub async fn on_event(&self, observer: impl Fn(&SyncEvent) + Send + Sync + 'static) {
        self.inner.lock().await.on_event(observer)
    }
}
