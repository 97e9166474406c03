//! # Value Transfer Boundary
//!
//! The ledger only keeps the books. Actually moving value into and out of
//! custody (a bank rail, an on-chain settlement, a payment processor) is
//! somebody else's job, and this module is the seam where the vault talks
//! to them.
//!
//! ```text
//!            receive(IncomingTransfer)          release(ReleaseOrder)
//!   payer ──────────────────────────► vault ──────────────────────────► payee
//!                    │                  │                    │
//!                    └── TransferReceipt┘                    └── TransferReceipt
//! ```
//!
//! ## Contract
//!
//! - `receive` confirms that the value described by an [`IncomingTransfer`]
//!   has landed in custody, exactly once per transfer id. The vault never
//!   credits before this returns `Ok`.
//! - `release` moves value out. The vault calls it only after the debit is
//!   committed. It may be called more than once with the same
//!   `withdrawal_id` (retries), and implementations must not pay twice.
//! - Both calls are wrapped in a timeout by the vault. A timed-out release
//!   is treated as failed and the debit is compensated.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::Balance;
use crate::ledger::Principal;

pub use memory::MemoryTransfer;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures reported by (or about) the value transfer boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// The boundary has no record of the incoming transfer.
    #[error("incoming transfer {0} not confirmed")]
    NotConfirmed(Uuid),

    /// The incoming transfer was already credited once.
    #[error("incoming transfer {0} already consumed")]
    AlreadyConsumed(Uuid),

    /// The transferred amount differs from what the caller claimed.
    #[error("amount mismatch: expected {expected}, received {received}")]
    AmountMismatch {
        /// Amount the vault was asked to credit.
        expected: Balance,
        /// Amount the transfer actually carries.
        received: Balance,
    },

    /// The incoming transfer was paid by someone other than the depositor.
    #[error("payer mismatch: expected {expected}, transfer paid by {actual}")]
    PayerMismatch {
        /// The principal making the deposit.
        expected: Principal,
        /// The principal that actually paid.
        actual: Principal,
    },

    /// The boundary refused or failed the transfer.
    #[error("transfer rejected: {0}")]
    Rejected(String),

    /// The boundary didn't answer within the configured timeout.
    #[error("transfer timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },
}

// ---------------------------------------------------------------------------
// Transfer Types
// ---------------------------------------------------------------------------

/// Which way value moved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferDirection {
    /// Into custody (deposit).
    Incoming,
    /// Out of custody (withdrawal).
    Outgoing,
}

/// Evidence of an incoming payment, presented alongside a deposit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingTransfer {
    /// Identifier assigned by the transfer mechanism. Credited at most once.
    pub transfer_id: Uuid,
    /// Who paid.
    pub payer: Principal,
    /// How much was paid, in smallest units.
    pub amount: Balance,
}

/// Instruction to move value out of custody.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseOrder {
    /// Stable across retries of the same withdrawal; the boundary dedupes
    /// on it.
    pub withdrawal_id: Uuid,
    /// Who gets paid.
    pub principal: Principal,
    /// How much, in smallest units.
    pub amount: Balance,
}

/// Proof that value crossed the custody boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Transfer id for incoming receipts, withdrawal id for outgoing ones.
    pub id: Uuid,
    /// The principal on the other side of the transfer.
    pub principal: Principal,
    /// Amount moved, in smallest units.
    pub amount: Balance,
    /// Which way it moved.
    pub direction: TransferDirection,
    /// When the boundary settled it.
    pub settled_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ValueTransfer
// ---------------------------------------------------------------------------

/// The physical movement of value in and out of custody.
#[async_trait]
pub trait ValueTransfer: Send + Sync + 'static {
    /// Confirms that `incoming` has been received into custody.
    async fn receive(&self, incoming: &IncomingTransfer) -> Result<TransferReceipt, TransferError>;

    /// Releases `order.amount` to `order.principal`.
    async fn release(&self, order: &ReleaseOrder) -> Result<TransferReceipt, TransferError>;
}
