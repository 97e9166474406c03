//! # Storage Module
//!
//! Durable backing for the ledger. The ledger itself keeps balances in
//! memory for fast reads; this module is where they survive a
//! restart.
//!
//! ```text
//! store.rs    — sled-backed LedgerStore: balances + journal trees
//! journal.rs  — JournalEntry, the audit record of each mutation
//! ```
//!
//! Bincode for on-disk journal entries, fixed-width big-endian integers for
//! balances. JSON is for configs and debugging; bincode is for storage.

pub mod journal;
pub mod store;

pub use journal::{EntryKind, JournalEntry};
pub use store::{LedgerStore, StoreError, StoreResult};
