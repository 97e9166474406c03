//! # Vault Service
//!
//! The public face of the vault: deposit, withdraw, balance. Validates the
//! request, takes the principal's writer section on the [`Ledger`], and
//! coordinates with the [`ValueTransfer`] boundary so that ledger state and
//! custody never drift apart.
//!
//! ## Ordering
//!
//! ```text
//! deposit:   lock ─► precheck ─► receive ─► credit ─► unlock
//! withdraw:  lock ─► debit ─► release ─┬─► unlock                (ok)
//!                                      └─► compensate ─► unlock  (failed / timed out)
//! ```
//!
//! Credit never precedes confirmed receipt. Release never precedes a
//! committed debit. And because the principal stays locked from debit to
//! the end of the release, a withdrawal that re-enters the vault from
//! inside the release path (or races in from another task) waits, then
//! sees the debited balance.
//!
//! ## Cancellation
//!
//! Both operations run their critical section in a spawned task. Dropping
//! the caller's future doesn't abandon a committed debit mid-release: the
//! task runs to completion, releases or compensates, and logs the outcome.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

use crate::config::{Balance, ConfigError, VaultConfig};
use crate::ledger::{Ledger, LedgerError, Principal};
use crate::metrics::VaultMetrics;
use crate::storage::{LedgerStore, StoreError};
use crate::transfer::{
    IncomingTransfer, ReleaseOrder, TransferError, TransferReceipt, ValueTransfer,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Typed failures returned to vault callers.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Amount was zero. Rejected before touching any state.
    #[error("amount must be greater than zero")]
    InvalidAmount,

    /// Empty principal identifier.
    #[error("principal identifier must not be empty")]
    InvalidPrincipal,

    /// Withdrawal exceeds the principal's balance. Nothing moved.
    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        /// Balance at the time of the check.
        available: Balance,
        /// Amount requested.
        requested: Balance,
    },

    /// Credit would overflow the balance or the ledger total. Nothing moved.
    #[error("balance overflow: current {current}, credit {credit}")]
    ArithmeticOverflow {
        /// Balance (or ledger total) before the failed credit.
        current: Balance,
        /// Amount that caused the overflow.
        credit: Balance,
    },

    /// The incoming value wasn't confirmed, so nothing was credited.
    #[error("incoming transfer not confirmed: {0}")]
    TransferNotConfirmed(#[source] TransferError),

    /// The release failed after the debit committed. The debit has been
    /// compensated; the balance is back where it was.
    #[error("release of withdrawal {withdrawal_id} failed (balance restored): {source}")]
    TransferReleaseFailed {
        /// Withdrawal id given to the boundary.
        withdrawal_id: Uuid,
        /// Last error from the boundary.
        #[source]
        source: TransferError,
    },

    /// The release failed and so did the compensating credit. The ledger
    /// is short by the withdrawal amount and needs manual reconciliation.
    #[error("release of withdrawal {withdrawal_id} failed and compensation failed: {source}")]
    CompensationFailed {
        /// Withdrawal id given to the boundary.
        withdrawal_id: Uuid,
        /// Why the compensating credit failed.
        #[source]
        source: LedgerError,
    },

    /// The ledger refused to settle or restore a release it wasn't holding.
    #[error("ledger inconsistency: {0}")]
    Inconsistent(#[source] LedgerError),

    /// The durable store refused a write.
    #[error("ledger storage error: {0}")]
    Storage(#[from] StoreError),

    /// Invalid configuration.
    #[error("invalid vault configuration: {0}")]
    Config(#[from] ConfigError),

    /// Metrics registration failed.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The task running the operation panicked or was aborted.
    #[error("vault operation interrupted: {0}")]
    Interrupted(String),
}

impl From<LedgerError> for VaultError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidAmount => VaultError::InvalidAmount,
            LedgerError::InsufficientBalance {
                available,
                requested,
                ..
            } => VaultError::InsufficientBalance {
                available,
                requested,
            },
            LedgerError::ArithmeticOverflow {
                current, credit, ..
            } => VaultError::ArithmeticOverflow { current, credit },
            LedgerError::InvalidPrincipal => VaultError::InvalidPrincipal,
            LedgerError::Storage(e) => VaultError::Storage(e),
            err @ LedgerError::NotHeld { .. } => VaultError::Inconsistent(err),
        }
    }
}

// ---------------------------------------------------------------------------
// VaultService
// ---------------------------------------------------------------------------

/// Deposit/withdraw/balance over a shared [`Ledger`] and a transfer boundary.
///
/// Cheap to clone; clones share the ledger, boundary, and metrics.
pub struct VaultService<T: ValueTransfer> {
    ledger: Arc<Ledger>,
    transfer: Arc<T>,
    config: VaultConfig,
    metrics: VaultMetrics,
}

impl<T: ValueTransfer> Clone for VaultService<T> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            transfer: Arc::clone(&self.transfer),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<T: ValueTransfer> VaultService<T> {
    /// Builds a service over an existing ledger.
    ///
    /// # Errors
    ///
    /// [`VaultError::Config`] if `config` fails validation.
    pub fn new(
        ledger: Arc<Ledger>,
        transfer: Arc<T>,
        config: VaultConfig,
    ) -> Result<Self, VaultError> {
        config.validate()?;
        let metrics = VaultMetrics::new()?;
        metrics.set_custody(ledger.total_balance());

        tracing::info!(
            persistent = ledger.is_persistent(),
            principals = ledger.principal_count(),
            custody = ledger.total_balance(),
            transfer_timeout_ms = config.transfer_timeout_ms,
            max_release_attempts = config.max_release_attempts,
            "vault service ready"
        );

        Ok(Self {
            ledger,
            transfer,
            config,
            metrics,
        })
    }

    /// Builds a service from config alone: a sled-backed ledger under
    /// `config.data_dir` when set, an in-memory one otherwise.
    pub fn open(config: VaultConfig, transfer: Arc<T>) -> Result<Self, VaultError> {
        let ledger = match config.data_dir.as_deref() {
            Some(dir) => open_ledger(dir)?,
            None => Ledger::in_memory(),
        };
        Self::new(Arc::new(ledger), transfer, config)
    }

    /// The shared ledger.
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// The transfer boundary.
    pub fn transfer(&self) -> &Arc<T> {
        &self.transfer
    }

    /// The service's metrics.
    pub fn metrics(&self) -> &VaultMetrics {
        &self.metrics
    }

    /// The active configuration.
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Current balance of `principal`. Zero for a principal never seen.
    pub fn balance(&self, principal: &Principal) -> Balance {
        self.ledger.balance_of(principal)
    }

    /// Total value the ledger says is in custody.
    pub fn total_custody(&self) -> Balance {
        self.ledger.total_balance()
    }

    /// Credits `amount` to `principal` once `incoming` is confirmed.
    ///
    /// Returns the new balance.
    ///
    /// # Errors
    ///
    /// - [`VaultError::InvalidAmount`] if `amount` is 0.
    /// - [`VaultError::TransferNotConfirmed`] if `incoming` doesn't attest
    ///   exactly `amount` from `principal`, or the boundary can't confirm it
    ///   in time.
    /// - [`VaultError::ArithmeticOverflow`] if the credit can't fit.
    pub async fn deposit(
        &self,
        principal: &Principal,
        amount: Balance,
        incoming: IncomingTransfer,
    ) -> Result<Balance, VaultError> {
        if amount == 0 {
            return Err(self.reject(VaultError::InvalidAmount));
        }
        if incoming.amount != amount {
            return Err(self.reject(VaultError::TransferNotConfirmed(
                TransferError::AmountMismatch {
                    expected: amount,
                    received: incoming.amount,
                },
            )));
        }
        if &incoming.payer != principal {
            return Err(self.reject(VaultError::TransferNotConfirmed(
                TransferError::PayerMismatch {
                    expected: principal.clone(),
                    actual: incoming.payer,
                },
            )));
        }

        let vault = self.clone();
        let principal = principal.clone();
        detached(async move { vault.deposit_locked(principal, amount, incoming).await }).await
    }

    /// Debits `amount` from `principal` and releases it.
    ///
    /// Returns the new balance.
    ///
    /// # Errors
    ///
    /// - [`VaultError::InvalidAmount`] if `amount` is 0.
    /// - [`VaultError::InsufficientBalance`] if the balance doesn't cover
    ///   `amount`. No value leaves the vault.
    /// - [`VaultError::TransferReleaseFailed`] if every release attempt
    ///   failed or timed out. The debit has been compensated.
    /// - [`VaultError::CompensationFailed`] if the compensation itself
    ///   failed (storage trouble). Logged at `error`.
    pub async fn withdraw(
        &self,
        principal: &Principal,
        amount: Balance,
    ) -> Result<Balance, VaultError> {
        if amount == 0 {
            return Err(self.reject(VaultError::InvalidAmount));
        }

        let vault = self.clone();
        let principal = principal.clone();
        detached(async move { vault.withdraw_locked(principal, amount).await }).await
    }

    // -----------------------------------------------------------------------
    // Critical Sections
    // -----------------------------------------------------------------------

    async fn deposit_locked(
        &self,
        principal: Principal,
        amount: Balance,
        incoming: IncomingTransfer,
    ) -> Result<Balance, VaultError> {
        let mut guard = self.ledger.lock(&principal).await;

        // Refuse before value moves, not after.
        guard
            .check_credit(amount)
            .map_err(|e| self.reject(e.into()))?;

        let receipt = self
            .bounded(self.transfer.receive(&incoming))
            .await
            .map_err(|e| self.reject(VaultError::TransferNotConfirmed(e)))?;

        if receipt.amount != amount {
            tracing::error!(
                principal = %principal,
                transfer_id = %incoming.transfer_id,
                expected = amount,
                received = receipt.amount,
                "transfer boundary confirmed a different amount than requested"
            );
            return Err(self.reject(VaultError::TransferNotConfirmed(
                TransferError::AmountMismatch {
                    expected: amount,
                    received: receipt.amount,
                },
            )));
        }

        match guard.credit(amount).await {
            Ok(balance) => {
                drop(guard);
                self.metrics.deposits_total.inc();
                self.metrics.set_custody(self.ledger.total_balance());
                tracing::info!(
                    principal = %principal,
                    amount,
                    balance,
                    transfer_id = %incoming.transfer_id,
                    "deposit credited"
                );
                Ok(balance)
            }
            Err(e) => {
                // Value is in custody but not on the books. Send it back.
                drop(guard);
                tracing::error!(
                    principal = %principal,
                    amount,
                    error = %e,
                    "credit failed after receipt; refunding"
                );
                self.refund(&principal, amount, incoming.transfer_id).await;
                Err(e.into())
            }
        }
    }

    async fn withdraw_locked(
        &self,
        principal: Principal,
        amount: Balance,
    ) -> Result<Balance, VaultError> {
        let withdrawal_id = Uuid::new_v4();
        let mut guard = self.ledger.lock(&principal).await;

        // (1) Debit commits first. If it fails, nothing leaves the vault.
        // The debited amount keeps its ledger capacity until step (2) or
        // (3) resolves it.
        let remaining = guard
            .debit_for_release(amount)
            .await
            .map_err(|e| self.reject(e.into()))?;

        // (2) Release, still holding the principal.
        let order = ReleaseOrder {
            withdrawal_id,
            principal: principal.clone(),
            amount,
        };
        let max_attempts = self.config.max_release_attempts;
        let mut attempt = 1;
        let failure = loop {
            match self.bounded(self.transfer.release(&order)).await {
                Ok(_) => {
                    if let Err(e) = guard.settle_release(amount) {
                        tracing::error!(
                            principal = %principal,
                            withdrawal_id = %withdrawal_id,
                            error = %e,
                            "released value was not held by the writer section"
                        );
                    }
                    drop(guard);
                    self.metrics.withdrawals_total.inc();
                    self.metrics.set_custody(self.ledger.total_balance());
                    tracing::info!(
                        principal = %principal,
                        amount,
                        balance = remaining,
                        withdrawal_id = %withdrawal_id,
                        attempt,
                        "withdrawal released"
                    );
                    return Ok(remaining);
                }
                Err(e) if attempt < max_attempts => {
                    tracing::warn!(
                        principal = %principal,
                        withdrawal_id = %withdrawal_id,
                        attempt,
                        error = %e,
                        "release attempt failed; retrying"
                    );
                    attempt += 1;
                }
                Err(e) => break e,
            }
        };

        // (3) Compensate under the same guard.
        match guard.compensate(amount).await {
            Ok(restored) => {
                drop(guard);
                self.metrics.compensations_total.inc();
                self.metrics.set_custody(self.ledger.total_balance());
                tracing::warn!(
                    principal = %principal,
                    amount,
                    balance = restored,
                    withdrawal_id = %withdrawal_id,
                    attempts = attempt,
                    error = %failure,
                    "release failed; compensating credit applied"
                );
                Err(VaultError::TransferReleaseFailed {
                    withdrawal_id,
                    source: failure,
                })
            }
            Err(e) => {
                drop(guard);
                tracing::error!(
                    principal = %principal,
                    amount,
                    withdrawal_id = %withdrawal_id,
                    release_error = %failure,
                    error = %e,
                    "compensating credit failed; ledger needs manual reconciliation"
                );
                Err(VaultError::CompensationFailed {
                    withdrawal_id,
                    source: e,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internal Helpers
    // -----------------------------------------------------------------------

    /// Runs a boundary call under the configured timeout and records latency.
    async fn bounded<F>(&self, call: F) -> Result<TransferReceipt, TransferError>
    where
        F: Future<Output = Result<TransferReceipt, TransferError>>,
    {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.config.transfer_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(TransferError::Timeout {
                timeout_ms: self.config.transfer_timeout_ms,
            }),
        };
        self.metrics
            .transfer_latency_seconds
            .observe(started.elapsed().as_secs_f64());
        outcome
    }

    /// Best-effort return of value that was received but couldn't be credited.
    async fn refund(&self, principal: &Principal, amount: Balance, transfer_id: Uuid) {
        let order = ReleaseOrder {
            withdrawal_id: transfer_id,
            principal: principal.clone(),
            amount,
        };
        match self.bounded(self.transfer.release(&order)).await {
            Ok(_) => tracing::warn!(
                principal = %principal,
                amount,
                transfer_id = %transfer_id,
                "uncredited deposit refunded"
            ),
            Err(e) => tracing::error!(
                principal = %principal,
                amount,
                transfer_id = %transfer_id,
                error = %e,
                "refund of uncredited deposit failed; custody exceeds ledger"
            ),
        }
    }

    fn reject(&self, err: VaultError) -> VaultError {
        self.metrics.rejected_total.inc();
        tracing::debug!(error = %err, "vault operation rejected");
        err
    }
}

impl<T: ValueTransfer> std::fmt::Debug for VaultService<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultService")
            .field("ledger", &self.ledger)
            .field("config", &self.config)
            .finish()
    }
}

fn open_ledger(dir: &Path) -> Result<Ledger, VaultError> {
    let store = LedgerStore::open(dir)?;
    Ledger::open(store).map_err(VaultError::from)
}

/// Runs `op` on its own task so the caller dropping its future can't cut a
/// critical section in half.
async fn detached<F>(op: F) -> Result<Balance, VaultError>
where
    F: Future<Output = Result<Balance, VaultError>> + Send + 'static,
{
    tokio::spawn(op)
        .await
        .map_err(|e| VaultError::Interrupted(e.to_string()))?
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
