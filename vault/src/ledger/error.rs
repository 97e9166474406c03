//! Error types for ledger operations.
//!
//! Every ledger failure leaves state untouched. If you got a `LedgerError`
//! back, no balance moved and no journal entry was written.

use thiserror::Error;

use super::principal::Principal;
use crate::config::Balance;
use crate::storage::StoreError;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Credits and debits must move a positive amount. Zero is a no-op at
    /// best and a bug in the caller at worst.
    #[error("amount must be greater than zero")]
    InvalidAmount,

    /// The principal identifier was empty.
    #[error("principal identifier must not be empty")]
    InvalidPrincipal,

    /// Attempted to debit more than the principal holds.
    #[error(
        "insufficient balance: available {available}, requested {requested} (principal {principal})"
    )]
    InsufficientBalance {
        /// The principal that was being debited.
        principal: Principal,
        /// The balance at the time of the check.
        available: Balance,
        /// The amount that was requested.
        requested: Balance,
    },

    /// A credit would overflow the principal's balance or the ledger total.
    ///
    /// Debits that are still waiting on their release count against the
    /// total too, so the room they need for a compensation stays free.
    #[error("balance overflow: current {current}, credit {credit} (principal {principal})")]
    ArithmeticOverflow {
        /// The principal that was being credited.
        principal: Principal,
        /// The balance (or ledger total) before the failed credit.
        current: Balance,
        /// The amount that caused the overflow.
        credit: Balance,
    },

    /// A compensation or release settlement named more than this writer
    /// section has debited and is holding for release.
    #[error("only {held} is held for release, cannot settle {requested} (principal {principal})")]
    NotHeld {
        /// The principal whose section was asked.
        principal: Principal,
        /// Amount currently held.
        held: Balance,
        /// Amount the caller tried to settle or restore.
        requested: Balance,
    },

    /// The durable store refused the write. In-memory state is unchanged.
    #[error("ledger store error: {0}")]
    Storage(#[from] StoreError),
}
