//! # LedgerStore — Durable Balance Storage
//!
//! The persistence layer behind the [`Ledger`](crate::ledger::Ledger),
//! built on sled's embedded key-value store.
//!
//! ## Tree Layout
//!
//! | Tree       | Key                 | Value                   |
//! |------------|---------------------|-------------------------|
//! | `balances` | principal (UTF-8)   | balance (16B BE)        |
//! | `journal`  | sequence (8B BE)    | `bincode(JournalEntry)` |
//!
//! Sequences are big-endian so that sled's lexicographic ordering matches
//! numeric ordering and a plain `iter()` walks the journal in commit order.
//!
//! ## Atomicity
//!
//! A mutation writes the new balance and its journal entry in a single
//! multi-tree sled transaction, then flushes. Either both land on disk or
//! neither does. The ledger only publishes the new balance to readers
//! after [`LedgerStore::commit`] returns, which is what "durably committed
//! before release" means for withdrawals.

use std::path::Path;

use chrono::Utc;
use sled::transaction::{ConflictableTransactionResult, TransactionError};
use sled::{Db, Transactional, Tree};

use super::journal::{EntryKind, JournalEntry};
use crate::config::{Balance, BALANCES_TREE, JOURNAL_TREE};
use crate::ledger::Principal;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// On-disk data that can't have been written by this store.
    #[error("corrupt ledger store: {0}")]
    Corrupt(String),

    /// The blocking task running a commit panicked.
    #[error("store task failed: {0}")]
    Interrupted(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// LedgerStore
// ---------------------------------------------------------------------------

/// Persistent storage for balances and the ledger journal.
///
/// # Thread Safety
///
/// sled trees support concurrent reads and serialized writes, so a
/// `LedgerStore` can be shared freely. Per-principal ordering of writes is
/// the ledger's job, not the store's.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    /// The underlying sled database handle.
    db: Db,
    /// Balances keyed by principal.
    balances: Tree,
    /// Journal entries keyed by sequence.
    journal: Tree,
}

impl LedgerStore {
    /// Open or create a store at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary store that is removed when dropped.
    ///
    /// Handy for unit tests: sled deletes the files on drop.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let balances = db.open_tree(BALANCES_TREE)?;
        let journal = db.open_tree(JOURNAL_TREE)?;
        Ok(Self {
            db,
            balances,
            journal,
        })
    }

    // -- Writes -------------------------------------------------------------

    /// Atomically persist a principal's new balance together with the
    /// journal entry describing how it got there, then flush.
    pub fn commit(
        &self,
        principal: &Principal,
        kind: EntryKind,
        amount: Balance,
        balance_after: Balance,
    ) -> StoreResult<JournalEntry> {
        let entry = JournalEntry {
            sequence: self.db.generate_id()?,
            principal: principal.clone(),
            kind,
            amount,
            balance_after,
            recorded_at: Utc::now(),
        };
        let entry_bytes =
            bincode::serialize(&entry).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let sequence_key = entry.sequence.to_be_bytes();
        let balance_value = balance_after.to_be_bytes();

        (&self.balances, &self.journal)
            .transaction(
                |(balances, journal)| -> ConflictableTransactionResult<(), StoreError> {
                    balances.insert(principal.as_bytes(), &balance_value[..])?;
                    journal.insert(&sequence_key[..], entry_bytes.as_slice())?;
                    Ok(())
                },
            )
            .map_err(|e| match e {
                TransactionError::Abort(inner) => inner,
                TransactionError::Storage(inner) => StoreError::Sled(inner),
            })?;

        self.db.flush()?;

        tracing::trace!(
            sequence = entry.sequence,
            principal = %principal,
            kind = ?kind,
            amount,
            balance_after,
            "ledger mutation committed"
        );
        Ok(entry)
    }

    // -- Reads --------------------------------------------------------------

    /// Retrieve the persisted balance for a principal, if one was ever written.
    pub fn get_balance(&self, principal: &Principal) -> StoreResult<Option<Balance>> {
        match self.balances.get(principal.as_bytes())? {
            Some(bytes) => Ok(Some(decode_balance(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load every persisted `(principal, balance)` pair, ordered by principal.
    pub fn load_balances(&self) -> StoreResult<Vec<(Principal, Balance)>> {
        self.balances
            .iter()
            .map(|item| -> StoreResult<(Principal, Balance)> {
                let (key, value) = item?;
                let raw = std::str::from_utf8(&key)
                    .map_err(|e| StoreError::Corrupt(format!("principal key: {}", e)))?;
                let principal: Principal = raw
                    .parse()
                    .map_err(|e| StoreError::Corrupt(format!("principal key: {}", e)))?;
                Ok((principal, decode_balance(&value)?))
            })
            .collect()
    }

    /// The whole journal in commit order.
    pub fn journal(&self) -> StoreResult<Vec<JournalEntry>> {
        self.journal
            .iter()
            .values()
            .map(|value| -> StoreResult<JournalEntry> { decode_entry(&value?) })
            .collect()
    }

    /// Journal entries for a single principal, in commit order.
    pub fn journal_for(&self, principal: &Principal) -> StoreResult<Vec<JournalEntry>> {
        Ok(self
            .journal()?
            .into_iter()
            .filter(|entry| &entry.principal == principal)
            .collect())
    }

    /// Number of journal entries.
    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    /// Number of principals with a persisted balance.
    pub fn principal_count(&self) -> usize {
        self.balances.len()
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode_balance(bytes: &[u8]) -> StoreResult<Balance> {
    let raw: [u8; 16] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("balance is {} bytes, expected 16", bytes.len())))?;
    Ok(Balance::from_be_bytes(raw))
}

fn decode_entry(bytes: &[u8]) -> StoreResult<JournalEntry> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(id: &str) -> Principal {
        id.parse().unwrap()
    }

    #[test]
    fn open_temporary_store() {
        let store = LedgerStore::open_temporary().unwrap();
        assert_eq!(store.journal_len(), 0);
        assert_eq!(store.principal_count(), 0);
        assert!(store.load_balances().unwrap().is_empty());
    }

    #[test]
    fn commit_writes_balance_and_journal() {
        let store = LedgerStore::open_temporary().unwrap();
        let alice = principal("0xalice");

        let entry = store.commit(&alice, EntryKind::Credit, 100, 100).unwrap();
        assert_eq!(entry.balance_after, 100);
        assert_eq!(store.get_balance(&alice).unwrap(), Some(100));

        let journal = store.journal().unwrap();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0], entry);
    }

    #[test]
    fn journal_is_in_commit_order() {
        let store = LedgerStore::open_temporary().unwrap();
        let alice = principal("0xalice");

        store.commit(&alice, EntryKind::Credit, 100, 100).unwrap();
        store.commit(&alice, EntryKind::Debit, 30, 70).unwrap();
        store.commit(&alice, EntryKind::Compensation, 30, 100).unwrap();

        let kinds: Vec<EntryKind> = store.journal().unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EntryKind::Credit, EntryKind::Debit, EntryKind::Compensation]
        );

        let sequences: Vec<u64> = store.journal().unwrap().iter().map(|e| e.sequence).collect();
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn journal_for_filters_by_principal() {
        let store = LedgerStore::open_temporary().unwrap();
        let alice = principal("0xalice");
        let bob = principal("0xbob");

        store.commit(&alice, EntryKind::Credit, 5, 5).unwrap();
        store.commit(&bob, EntryKind::Credit, 7, 7).unwrap();
        store.commit(&alice, EntryKind::Debit, 5, 0).unwrap();

        let alice_entries = store.journal_for(&alice).unwrap();
        assert_eq!(alice_entries.len(), 2);
        assert!(alice_entries.iter().all(|e| e.principal == alice));
    }

    #[test]
    fn unknown_principal_has_no_balance() {
        let store = LedgerStore::open_temporary().unwrap();
        assert_eq!(store.get_balance(&principal("0xnobody")).unwrap(), None);
    }

    #[test]
    fn reopen_persistent_store() {
        let dir = tempfile::tempdir().unwrap();
        let alice = principal("0xalice");
        let bob = principal("0xbob");

        {
            let store = LedgerStore::open(dir.path()).unwrap();
            store.commit(&alice, EntryKind::Credit, 10, 10).unwrap();
            store.commit(&bob, EntryKind::Credit, 20, 20).unwrap();
            store.commit(&bob, EntryKind::Debit, 5, 15).unwrap();
        }

        let store = LedgerStore::open(dir.path()).unwrap();
        assert_eq!(
            store.load_balances().unwrap(),
            vec![(alice, 10), (bob, 15)]
        );
        assert_eq!(store.journal_len(), 3);
    }

    #[test]
    fn balances_past_u64_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let whale = principal("0xwhale");
        let amount = Balance::from(u64::MAX) * 1_000;

        {
            let store = LedgerStore::open(dir.path()).unwrap();
            store.commit(&whale, EntryKind::Credit, amount, amount).unwrap();
        }

        let store = LedgerStore::open(dir.path()).unwrap();
        assert_eq!(store.get_balance(&whale).unwrap(), Some(amount));
        assert_eq!(store.journal().unwrap()[0].amount, amount);
    }

    #[test]
    fn corrupt_balance_is_reported() {
        let store = LedgerStore::open_temporary().unwrap();
        // A pre-widening 8-byte balance is not a valid 16-byte one.
        store
            .balances
            .insert(b"0xalice", &7u64.to_be_bytes()[..])
            .unwrap();

        assert!(matches!(
            store.load_balances(),
            Err(StoreError::Corrupt(_))
        ));
    }
}
