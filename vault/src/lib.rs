// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # SecureVault — Core Library
//!
//! A custody ledger. Principals deposit value, the vault keeps the books,
//! and principals withdraw what the books say they own. Nothing more, and
//! very deliberately nothing less.
//!
//! The vault doesn't move money itself. A [`transfer::ValueTransfer`]
//! implementation does that; the vault's job is to make sure the ledger
//! and the custody account can never disagree about who owns what.
//!
//! ## Architecture
//!
//! - **config** — Unit constants, timeouts, and [`config::VaultConfig`].
//! - **ledger** — Balances, principals, and the per-principal writer guard.
//! - **storage** — Optional sled persistence: balances plus an append-only
//!   journal, written in one transaction.
//! - **transfer** — The boundary to whatever physically moves value.
//! - **service** — Deposit, withdraw, balance. The part callers touch.
//! - **metrics** — Prometheus counters for the above.
//! - **logging** — Subscriber setup for host processes.
//!
//! ## Design Philosophy
//!
//! 1. Debit before release. Always. Compensate if the release fails.
//! 2. Credit after receipt. Always. Never on a caller's say-so.
//! 3. Integer units only; floating point stays out of the ledger.
//! 4. If it touches money, it has tests. Plural.

pub mod config;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod service;
pub mod storage;
pub mod transfer;

pub use config::{Balance, VaultConfig};
pub use ledger::{Ledger, LedgerError, Principal};
pub use service::{VaultError, VaultService};
pub use transfer::{IncomingTransfer, MemoryTransfer, TransferError, ValueTransfer};
