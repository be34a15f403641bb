//! Account state management.
//!
//! Tracks the balance and nonce of every address in an ordered tree whose
//! BLAKE3 merkle root is committed in each block header (`accounts_hash` is
//! the root *after* the block's body is applied). The module provides:
//! - `AccountsTree` — the state itself, with forward (`commit_block`) and
//!   backward (`revert_block`) application,
//! - `Accounts` — the shared canonical view, atomically replaceable when a
//!   sync promotes a new snapshot,
//! - `AccountsTx` — a scratch view used as the substrate for reverse block
//!   verification,
//! - `PartialAccountsTree` — a snapshot under construction, fed by ordered
//!   chunks and pinned to an expected root hash.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockBody};
use crate::{merkle_root, Hash};

/// Account address (32 bytes, same domain as hashes).
pub type Address = Hash;

/// Errors from account state operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AccountsError {
    #[error("block must be full to be applied or reverted")]
    BodyMissing,
    #[error("accounts hash mismatch")]
    HashMismatch,
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("balance overflow")]
    BalanceOverflow,
    #[error("transaction nonce does not match account state")]
    NonceMismatch,
    #[error("transaction values overflow")]
    ValueOverflow,
    #[error("accounts transaction already closed")]
    TxClosed,
}

/// A single account: balance plus transaction counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: u64,
    pub nonce: u32,
}

impl Account {
    /// Initial accounts (zero balance, zero nonce) are not stored.
    pub fn is_initial(&self) -> bool {
        self.balance == 0 && self.nonce == 0
    }
}

fn account_leaf_hash(address: &Address, account: &Account) -> Hash {
    let mut hasher = blake3::Hasher::new_derive_key("lumen.account.leaf");
    hasher.update(address);
    hasher.update(&account.balance.to_le_bytes());
    hasher.update(&account.nonce.to_le_bytes());
    *hasher.finalize().as_bytes()
}

/// The full account state: an ordered map of all non-initial accounts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountsTree {
    entries: BTreeMap<Address, Account>,
}

impl AccountsTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: BTreeMap<Address, Account>) -> Self {
        AccountsTree { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, address: &Address) -> Account {
        self.entries.get(address).copied().unwrap_or_default()
    }

    /// Store an account; initial accounts are pruned.
    pub fn put(&mut self, address: Address, account: Account) {
        if account.is_initial() {
            self.entries.remove(&address);
        } else {
            self.entries.insert(address, account);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Account)> {
        self.entries.iter()
    }

    /// Merkle root over the sorted `(address, account)` leaves. The empty
    /// tree has the all-zero root.
    pub fn root_hash(&self) -> Hash {
        let leaves: Vec<Hash> = self
            .entries
            .iter()
            .map(|(addr, account)| account_leaf_hash(addr, account))
            .collect();
        merkle_root(&leaves)
    }

    fn credit(&mut self, address: &Address, amount: u64) -> Result<(), AccountsError> {
        let mut account = self.get(address);
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or(AccountsError::BalanceOverflow)?;
        self.put(*address, account);
        Ok(())
    }

    fn debit(&mut self, address: &Address, amount: u64) -> Result<(), AccountsError> {
        let mut account = self.get(address);
        account.balance = account
            .balance
            .checked_sub(amount)
            .ok_or(AccountsError::InsufficientBalance)?;
        self.put(*address, account);
        Ok(())
    }

    /// Apply a block body: debit each sender (value + fee, nonce must match
    /// and is bumped), credit each recipient, then credit the miner with the
    /// block reward plus all fees. Fails without mutating `self`.
    pub fn apply_body(&mut self, body: &BlockBody, reward: u64) -> Result<(), AccountsError> {
        let fees = body.total_fees().ok_or(AccountsError::ValueOverflow)?;
        let payout = reward
            .checked_add(fees)
            .ok_or(AccountsError::ValueOverflow)?;

        let mut scratch = self.clone();
        for tx in &body.transactions {
            let mut sender = scratch.get(&tx.sender);
            if sender.nonce != tx.nonce {
                return Err(AccountsError::NonceMismatch);
            }
            sender.nonce = sender
                .nonce
                .checked_add(1)
                .ok_or(AccountsError::NonceMismatch)?;
            scratch.put(tx.sender, sender);

            let amount = tx
                .value
                .checked_add(tx.fee)
                .ok_or(AccountsError::ValueOverflow)?;
            scratch.debit(&tx.sender, amount)?;
            scratch.credit(&tx.recipient, tx.value)?;
        }
        scratch.credit(&body.miner, payout)?;

        *self = scratch;
        Ok(())
    }

    /// Un-apply a block body: the exact inverse of `apply_body`. Fails
    /// without mutating `self`.
    fn unapply_body(&mut self, body: &BlockBody, reward: u64) -> Result<(), AccountsError> {
        let fees = body.total_fees().ok_or(AccountsError::ValueOverflow)?;
        let payout = reward
            .checked_add(fees)
            .ok_or(AccountsError::ValueOverflow)?;

        let mut scratch = self.clone();
        scratch.debit(&body.miner, payout)?;
        for tx in body.transactions.iter().rev() {
            scratch.debit(&tx.recipient, tx.value)?;
            let amount = tx
                .value
                .checked_add(tx.fee)
                .ok_or(AccountsError::ValueOverflow)?;
            scratch.credit(&tx.sender, amount)?;

            let mut sender = scratch.get(&tx.sender);
            if Some(sender.nonce) != tx.nonce.checked_add(1) {
                return Err(AccountsError::NonceMismatch);
            }
            sender.nonce = tx.nonce;
            scratch.put(tx.sender, sender);
        }

        *self = scratch;
        Ok(())
    }

    /// Apply a full block and check the resulting root against the header's
    /// `accounts_hash`. Fails without mutating `self`.
    pub fn commit_block(&mut self, block: &Block, reward: u64) -> Result<(), AccountsError> {
        let body = block.body.as_ref().ok_or(AccountsError::BodyMissing)?;
        let mut scratch = self.clone();
        scratch.apply_body(body, reward)?;
        if scratch.root_hash() != block.header.accounts_hash {
            return Err(AccountsError::HashMismatch);
        }
        *self = scratch;
        Ok(())
    }

    /// Revert a full block. The current root must equal the block's
    /// `accounts_hash` (the block must be the most recently applied one);
    /// the body is then un-applied. Fails without mutating `self`.
    pub fn revert_block(&mut self, block: &Block, reward: u64) -> Result<(), AccountsError> {
        let body = block.body.as_ref().ok_or(AccountsError::BodyMissing)?;
        if self.root_hash() != block.header.accounts_hash {
            return Err(AccountsError::HashMismatch);
        }
        self.unapply_body(body, reward)
    }
}

/// Shared canonical account state.
///
/// The synchronizer holds an `Arc<Accounts>` and only ever touches it at
/// commit time, when a fully verified snapshot atomically replaces the
/// previous state.
#[derive(Debug, Default)]
pub struct Accounts {
    tree: RwLock<AccountsTree>,
}

impl Accounts {
    pub fn new(tree: AccountsTree) -> Self {
        Accounts {
            tree: RwLock::new(tree),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, AccountsTree> {
        match self.tree.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, AccountsTree> {
        match self.tree.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn root_hash(&self) -> Hash {
        self.read().root_hash()
    }

    pub fn get(&self, address: &Address) -> Account {
        self.read().get(address)
    }

    /// Atomically replace the canonical state.
    pub fn replace(&self, tree: AccountsTree) {
        *self.write() = tree;
    }

    /// Open a writable scratch view over the current state.
    pub fn transaction(&self) -> AccountsTx {
        AccountsTx::new(self.read().clone())
    }
}

/// A writable scratch view over an accounts tree.
///
/// Used by the synchronizer as the substrate for reverse block application:
/// every `revert_block` moves the view one block into the past. The view is
/// discarded with `abort` (idempotent) or written back with `commit`.
#[derive(Debug)]
pub struct AccountsTx {
    tree: AccountsTree,
    open: bool,
}

impl AccountsTx {
    pub fn new(tree: AccountsTree) -> Self {
        AccountsTx { tree, open: true }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn root_hash(&self) -> Hash {
        self.tree.root_hash()
    }

    pub fn get(&self, address: &Address) -> Account {
        self.tree.get(address)
    }

    pub fn revert_block(&mut self, block: &Block, reward: u64) -> Result<(), AccountsError> {
        if !self.open {
            return Err(AccountsError::TxClosed);
        }
        self.tree.revert_block(block, reward)
    }

    /// Write the view back into the shared state. Returns `false` if the
    /// transaction was already closed.
    pub fn commit(&mut self, accounts: &Accounts) -> bool {
        if !self.open {
            return false;
        }
        self.open = false;
        accounts.replace(self.tree.clone());
        true
    }

    /// Discard the view. Idempotent.
    pub fn abort(&mut self) {
        self.open = false;
    }
}

/// Result codes for accounts-tree chunk pushes. Negative values are errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i8)]
pub enum ChunkResult {
    ErrHashMismatch = -2,
    ErrIncorrectProof = -1,
    OkUnfinished = 0,
    OkComplete = 1,
}

impl ChunkResult {
    pub fn is_err(&self) -> bool {
        (*self as i8) < 0
    }
}

/// An ordered slice of the accounts tree, streamed during snapshot sync.
/// The `terminal` chunk covers through the end of the tree and triggers the
/// root check.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountsTreeChunk {
    pub entries: Vec<(Address, Account)>,
    pub terminal: bool,
}

/// An accounts tree under construction from ordered prefix chunks, pinned to
/// the root hash the finished snapshot must have.
#[derive(Debug)]
pub struct PartialAccountsTree {
    expected_root: Hash,
    entries: BTreeMap<Address, Account>,
    last_key: Option<Address>,
    complete: bool,
}

impl PartialAccountsTree {
    pub fn new(expected_root: Hash) -> Self {
        PartialAccountsTree {
            expected_root,
            entries: BTreeMap::new(),
            last_key: None,
            complete: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Hex prefix from which the next chunk must continue (empty before the
    /// first chunk).
    pub fn missing_prefix(&self) -> String {
        self.last_key.map(hex::encode).unwrap_or_default()
    }

    /// Accept the next chunk.
    ///
    /// Entries must be strictly ascending, strictly beyond everything
    /// already received, and non-initial; violations yield
    /// `ERR_INCORRECT_PROOF`. The terminal chunk triggers the root check:
    /// on mismatch the chunk is rolled back (`ERR_HASH_MISMATCH`) so a
    /// correct terminal chunk can still finish the snapshot.
    pub fn push_chunk(&mut self, chunk: &AccountsTreeChunk) -> ChunkResult {
        if self.complete {
            return ChunkResult::ErrIncorrectProof;
        }
        if chunk.entries.is_empty() && !chunk.terminal {
            return ChunkResult::ErrIncorrectProof;
        }

        let mut prev = self.last_key;
        for (address, account) in &chunk.entries {
            if let Some(p) = &prev {
                if address <= p {
                    return ChunkResult::ErrIncorrectProof;
                }
            }
            if account.is_initial() {
                return ChunkResult::ErrIncorrectProof;
            }
            prev = Some(*address);
        }

        if chunk.terminal {
            let mut candidate = self.entries.clone();
            candidate.extend(chunk.entries.iter().copied());
            let root = AccountsTree::from_entries(candidate.clone()).root_hash();
            if root != self.expected_root {
                tracing::warn!(
                    expected = %hex::encode(&self.expected_root[..8]),
                    actual = %hex::encode(&root[..8]),
                    "terminal accounts chunk does not match the pinned root"
                );
                return ChunkResult::ErrHashMismatch;
            }
            self.entries = candidate;
            self.last_key = prev;
            self.complete = true;
            ChunkResult::OkComplete
        } else {
            self.entries.extend(chunk.entries.iter().copied());
            self.last_key = prev;
            ChunkResult::OkUnfinished
        }
    }

    /// Materialize the finished snapshot. `None` until complete.
    pub fn commit(self) -> Option<AccountsTree> {
        self.complete
            .then(|| AccountsTree::from_entries(self.entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockBody, Transaction};
    use crate::constants;

    fn addr(byte: u8) -> Address {
        [byte; 32]
    }

    fn tree_with(balances: &[(u8, u64)]) -> AccountsTree {
        let mut tree = AccountsTree::new();
        for &(a, balance) in balances {
            tree.put(addr(a), Account { balance, nonce: 0 });
        }
        tree
    }

    /// Build a full block at height 2 whose body transfers `value` from
    /// sender 1 to recipient 2, with accounts_hash consistent with `tree`.
    fn block_with_transfer(tree: &mut AccountsTree, value: u64) -> Block {
        let tx = Transaction {
            sender: addr(1),
            recipient: addr(2),
            value,
            fee: 10,
            nonce: tree.get(&addr(1)).nonce,
        };
        let body = BlockBody {
            miner: addr(9),
            transactions: vec![tx],
        };
        tree.apply_body(&body, constants::BLOCK_REWARD).unwrap();
        let mut block = Block::genesis();
        block.header.height = 2;
        block.header.body_hash = body.hash();
        block.header.accounts_hash = tree.root_hash();
        block.body = Some(body);
        block
    }

    #[test]
    fn empty_tree_has_zero_root() {
        assert_eq!(AccountsTree::new().root_hash(), [0u8; 32]);
    }

    #[test]
    fn initial_accounts_are_pruned() {
        let mut tree = tree_with(&[(1, 100)]);
        tree.put(addr(1), Account::default());
        assert!(tree.is_empty());
        assert_eq!(tree.root_hash(), [0u8; 32]);
    }

    #[test]
    fn apply_and_revert_roundtrip() {
        let mut tree = tree_with(&[(1, 1_000)]);
        let before = tree.clone();
        let before_root = tree.root_hash();

        let block = block_with_transfer(&mut tree, 500);
        assert_eq!(tree.get(&addr(1)).balance, 490);
        assert_eq!(tree.get(&addr(1)).nonce, 1);
        assert_eq!(tree.get(&addr(2)).balance, 500);
        assert_eq!(
            tree.get(&addr(9)).balance,
            constants::BLOCK_REWARD + 10
        );

        tree.revert_block(&block, constants::BLOCK_REWARD).unwrap();
        assert_eq!(tree, before);
        assert_eq!(tree.root_hash(), before_root);
    }

    #[test]
    fn revert_requires_matching_root() {
        let mut tree = tree_with(&[(1, 1_000)]);
        let block = block_with_transfer(&mut tree, 500);

        // Disturb the state: the revert precondition must now fail and the
        // tree must stay untouched.
        tree.put(addr(7), Account { balance: 1, nonce: 0 });
        let dirty = tree.clone();
        assert_eq!(
            tree.revert_block(&block, constants::BLOCK_REWARD),
            Err(AccountsError::HashMismatch)
        );
        assert_eq!(tree, dirty);
    }

    #[test]
    fn apply_rejects_bad_nonce_atomically() {
        let mut tree = tree_with(&[(1, 1_000)]);
        let tx = Transaction {
            sender: addr(1),
            recipient: addr(2),
            value: 1,
            fee: 0,
            nonce: 5,
        };
        let body = BlockBody {
            miner: addr(9),
            transactions: vec![tx],
        };

        let before = tree.clone();
        assert_eq!(tree.apply_body(&body, 0), Err(AccountsError::NonceMismatch));
        assert_eq!(tree, before);
    }

    #[test]
    fn apply_rejects_overdraft() {
        let mut tree = tree_with(&[(1, 5)]);
        let tx = Transaction {
            sender: addr(1),
            recipient: addr(2),
            value: 100,
            fee: 0,
            nonce: 0,
        };
        let body = BlockBody {
            miner: addr(9),
            transactions: vec![tx],
        };
        assert_eq!(
            tree.apply_body(&body, 0),
            Err(AccountsError::InsufficientBalance)
        );
    }

    #[test]
    fn accounts_replace_is_atomic_swap() {
        let accounts = Accounts::new(tree_with(&[(1, 10)]));
        let replacement = tree_with(&[(2, 20)]);
        let expected = replacement.root_hash();
        accounts.replace(replacement);
        assert_eq!(accounts.root_hash(), expected);
        assert_eq!(accounts.get(&addr(2)).balance, 20);
        assert_eq!(accounts.get(&addr(1)).balance, 0);
    }

    #[test]
    fn accounts_tx_abort_leaves_parent_untouched() {
        let accounts = Accounts::new(tree_with(&[(1, 10)]));
        let root = accounts.root_hash();
        let mut tx = accounts.transaction();
        tx.abort();
        tx.abort(); // idempotent
        assert!(!tx.is_open());
        assert_eq!(accounts.root_hash(), root);
        assert!(!tx.commit(&accounts));
    }

    #[test]
    fn partial_tree_accepts_ordered_chunks() {
        let tree = tree_with(&[(1, 10), (2, 20), (3, 30), (4, 40)]);
        let entries: Vec<(Address, Account)> =
            tree.iter().map(|(a, acc)| (*a, *acc)).collect();
        let mut partial = PartialAccountsTree::new(tree.root_hash());

        assert_eq!(partial.missing_prefix(), "");
        let first = AccountsTreeChunk {
            entries: entries[..2].to_vec(),
            terminal: false,
        };
        assert_eq!(partial.push_chunk(&first), ChunkResult::OkUnfinished);
        assert_eq!(partial.missing_prefix(), hex::encode(addr(2)));

        let second = AccountsTreeChunk {
            entries: entries[2..].to_vec(),
            terminal: true,
        };
        assert_eq!(partial.push_chunk(&second), ChunkResult::OkComplete);
        assert!(partial.is_complete());
        let rebuilt = partial.commit().unwrap();
        assert_eq!(rebuilt.root_hash(), tree.root_hash());
    }

    #[test]
    fn partial_tree_rejects_unordered_chunk() {
        let tree = tree_with(&[(1, 10), (2, 20)]);
        let mut partial = PartialAccountsTree::new(tree.root_hash());
        let chunk = AccountsTreeChunk {
            entries: vec![
                (addr(2), Account { balance: 20, nonce: 0 }),
                (addr(1), Account { balance: 10, nonce: 0 }),
            ],
            terminal: true,
        };
        assert_eq!(partial.push_chunk(&chunk), ChunkResult::ErrIncorrectProof);
    }

    #[test]
    fn partial_tree_rolls_back_bad_terminal_chunk() {
        let tree = tree_with(&[(1, 10), (2, 20)]);
        let entries: Vec<(Address, Account)> =
            tree.iter().map(|(a, acc)| (*a, *acc)).collect();
        let mut partial = PartialAccountsTree::new(tree.root_hash());

        // Terminal chunk missing the last account: root mismatch.
        let bad = AccountsTreeChunk {
            entries: entries[..1].to_vec(),
            terminal: true,
        };
        assert_eq!(partial.push_chunk(&bad), ChunkResult::ErrHashMismatch);
        assert!(!partial.is_complete());

        // A correct terminal chunk still completes the snapshot.
        let good = AccountsTreeChunk {
            entries,
            terminal: true,
        };
        assert_eq!(partial.push_chunk(&good), ChunkResult::OkComplete);
    }

    #[test]
    fn partial_tree_rejects_chunks_after_completion() {
        let tree = tree_with(&[(1, 10)]);
        let entries: Vec<(Address, Account)> =
            tree.iter().map(|(a, acc)| (*a, *acc)).collect();
        let mut partial = PartialAccountsTree::new(tree.root_hash());
        let chunk = AccountsTreeChunk {
            entries,
            terminal: true,
        };
        assert_eq!(partial.push_chunk(&chunk), ChunkResult::OkComplete);
        assert_eq!(partial.push_chunk(&chunk), ChunkResult::ErrIncorrectProof);
    }
}
