//! # In-Process Transfer Gateway
//!
//! A [`ValueTransfer`] that keeps custody in memory. It does everything a
//! real gateway promises (each incoming transfer credited once, releases
//! deduped by withdrawal id, custody never goes negative) without talking
//! to anything.
//!
//! Also doubles as the fault injector for the vault's tests: releases can
//! be made to fail, to hang, or to call back into the vault mid-flight.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    IncomingTransfer, ReleaseOrder, TransferDirection, TransferError, TransferReceipt,
    ValueTransfer,
};
use crate::config::Balance;
use crate::ledger::Principal;

/// Callback invoked at the start of every release, before any state moves.
pub type ReleaseHook = Arc<dyn Fn(&ReleaseOrder) + Send + Sync>;

#[derive(Default)]
struct CustodyState {
    /// Value currently held, in smallest units.
    held: Balance,
    /// Announced but not yet received transfers: id -> (payer, amount).
    pending: HashMap<Uuid, (Principal, Balance)>,
    /// Transfer ids already received.
    consumed: HashSet<Uuid>,
    /// Settled releases by withdrawal id.
    released: HashMap<Uuid, TransferReceipt>,
    /// Total paid out per principal.
    paid_out: HashMap<Principal, Balance>,
    /// Upcoming releases that should fail.
    failures_remaining: u32,
}

/// In-memory custody account implementing [`ValueTransfer`].
#[derive(Default)]
pub struct MemoryTransfer {
    state: Mutex<CustodyState>,
    release_delay: Mutex<Option<Duration>>,
    release_hook: Mutex<Option<ReleaseHook>>,
    release_calls: AtomicU64,
}

impl MemoryTransfer {
    /// Creates a gateway with empty custody.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an incoming payment from `payer` and returns the transfer
    /// the payer presents when depositing.
    pub fn announce(&self, payer: &Principal, amount: Balance) -> IncomingTransfer {
        let transfer_id = Uuid::new_v4();
        self.state
            .lock()
            .pending
            .insert(transfer_id, (payer.clone(), amount));
        IncomingTransfer {
            transfer_id,
            payer: payer.clone(),
            amount,
        }
    }

    /// Value currently held in custody.
    pub fn custody(&self) -> Balance {
        self.state.lock().held
    }

    /// Total released to `principal` so far.
    pub fn paid_out(&self, principal: &Principal) -> Balance {
        self.state
            .lock()
            .paid_out
            .get(principal)
            .copied()
            .unwrap_or(0)
    }

    /// Announced transfers that haven't been received yet.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// How many times `release` has been called, successful or not.
    pub fn release_calls(&self) -> u64 {
        self.release_calls.load(Ordering::Relaxed)
    }

    /// Makes the next `count` releases fail with [`TransferError::Rejected`].
    pub fn fail_releases(&self, count: u32) {
        self.state.lock().failures_remaining = count;
    }

    /// Makes every release sleep for `delay` before settling.
    pub fn set_release_delay(&self, delay: Option<Duration>) {
        *self.release_delay.lock() = delay;
    }

    /// Installs (or clears) a callback run at the start of every release.
    pub fn set_release_hook(&self, hook: Option<ReleaseHook>) {
        *self.release_hook.lock() = hook;
    }
}

#[async_trait]
impl ValueTransfer for MemoryTransfer {
    async fn receive(&self, incoming: &IncomingTransfer) -> Result<TransferReceipt, TransferError> {
        let id = incoming.transfer_id;
        let mut state = self.state.lock();

        if state.consumed.contains(&id) {
            return Err(TransferError::AlreadyConsumed(id));
        }
        let (payer, amount) = state
            .pending
            .get(&id)
            .cloned()
            .ok_or(TransferError::NotConfirmed(id))?;

        if payer != incoming.payer {
            return Err(TransferError::PayerMismatch {
                expected: incoming.payer.clone(),
                actual: payer,
            });
        }
        if amount != incoming.amount {
            return Err(TransferError::AmountMismatch {
                expected: incoming.amount,
                received: amount,
            });
        }

        let held = state.held;
        state.held = held
            .checked_add(amount)
            .ok_or_else(|| TransferError::Rejected(format!("custody overflow at {}", held)))?;
        state.pending.remove(&id);
        state.consumed.insert(id);

        Ok(TransferReceipt {
            id,
            principal: payer,
            amount,
            direction: TransferDirection::Incoming,
            settled_at: Utc::now(),
        })
    }

    async fn release(&self, order: &ReleaseOrder) -> Result<TransferReceipt, TransferError> {
        self.release_calls.fetch_add(1, Ordering::Relaxed);

        let hook = self.release_hook.lock().clone();
        if let Some(hook) = hook {
            hook(order);
        }

        let delay = *self.release_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();

        if let Some(receipt) = state.released.get(&order.withdrawal_id) {
            return Ok(receipt.clone());
        }
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(TransferError::Rejected("injected release failure".into()));
        }

        let held = state.held;
        state.held = held.checked_sub(order.amount).ok_or_else(|| {
            TransferError::Rejected(format!(
                "custody holds {}, cannot release {}",
                held, order.amount
            ))
        })?;
        *state.paid_out.entry(order.principal.clone()).or_insert(0) += order.amount;

        let receipt = TransferReceipt {
            id: order.withdrawal_id,
            principal: order.principal.clone(),
            amount: order.amount,
            direction: TransferDirection::Outgoing,
            settled_at: Utc::now(),
        };
        state.released.insert(order.withdrawal_id, receipt.clone());
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(id: &str) -> Principal {
        id.parse().unwrap()
    }

    fn order(principal: &Principal, amount: Balance) -> ReleaseOrder {
        ReleaseOrder {
            withdrawal_id: Uuid::new_v4(),
            principal: principal.clone(),
            amount,
        }
    }

    #[tokio::test]
    async fn receive_moves_value_into_custody() {
        let gateway = MemoryTransfer::new();
        let alice = principal("0xalice");
        let incoming = gateway.announce(&alice, 100);

        let receipt = gateway.receive(&incoming).await.unwrap();
        assert_eq!(receipt.amount, 100);
        assert_eq!(receipt.direction, TransferDirection::Incoming);
        assert_eq!(gateway.custody(), 100);
        assert_eq!(gateway.pending_count(), 0);
    }

    #[tokio::test]
    async fn incoming_transfer_consumed_once() {
        let gateway = MemoryTransfer::new();
        let alice = principal("0xalice");
        let incoming = gateway.announce(&alice, 100);

        gateway.receive(&incoming).await.unwrap();
        assert_eq!(
            gateway.receive(&incoming).await.unwrap_err(),
            TransferError::AlreadyConsumed(incoming.transfer_id)
        );
        assert_eq!(gateway.custody(), 100);
    }

    #[tokio::test]
    async fn unannounced_transfer_not_confirmed() {
        let gateway = MemoryTransfer::new();
        let forged = IncomingTransfer {
            transfer_id: Uuid::new_v4(),
            payer: principal("0xmallory"),
            amount: 1_000_000,
        };

        assert!(matches!(
            gateway.receive(&forged).await,
            Err(TransferError::NotConfirmed(_))
        ));
        assert_eq!(gateway.custody(), 0);
    }

    #[tokio::test]
    async fn inflated_claim_rejected_and_transfer_stays_pending() {
        let gateway = MemoryTransfer::new();
        let alice = principal("0xalice");
        let mut incoming = gateway.announce(&alice, 100);
        incoming.amount = 1_000;

        assert_eq!(
            gateway.receive(&incoming).await.unwrap_err(),
            TransferError::AmountMismatch {
                expected: 1_000,
                received: 100
            }
        );
        assert_eq!(gateway.pending_count(), 1);
        assert_eq!(gateway.custody(), 0);
    }

    #[tokio::test]
    async fn someone_elses_payment_rejected() {
        let gateway = MemoryTransfer::new();
        let alice = principal("0xalice");
        let mut incoming = gateway.announce(&alice, 100);
        incoming.payer = principal("0xmallory");

        assert!(matches!(
            gateway.receive(&incoming).await,
            Err(TransferError::PayerMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn release_pays_out_and_dedupes_by_withdrawal_id() {
        let gateway = MemoryTransfer::new();
        let alice = principal("0xalice");
        gateway
            .receive(&gateway.announce(&alice, 100))
            .await
            .unwrap();

        let order = order(&alice, 40);
        let first = gateway.release(&order).await.unwrap();
        let retry = gateway.release(&order).await.unwrap();

        assert_eq!(first, retry);
        assert_eq!(gateway.custody(), 60);
        assert_eq!(gateway.paid_out(&alice), 40);
        assert_eq!(gateway.release_calls(), 2);
    }

    #[tokio::test]
    async fn release_beyond_custody_rejected() {
        let gateway = MemoryTransfer::new();
        let alice = principal("0xalice");

        assert!(matches!(
            gateway.release(&order(&alice, 1)).await,
            Err(TransferError::Rejected(_))
        ));
        assert_eq!(gateway.paid_out(&alice), 0);
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let gateway = MemoryTransfer::new();
        let alice = principal("0xalice");
        gateway
            .receive(&gateway.announce(&alice, 10))
            .await
            .unwrap();
        gateway.fail_releases(2);

        let order = order(&alice, 5);
        assert!(gateway.release(&order).await.is_err());
        assert!(gateway.release(&order).await.is_err());
        assert!(gateway.release(&order).await.is_ok());
        assert_eq!(gateway.custody(), 5);
    }

    #[tokio::test]
    async fn release_hook_sees_the_order() {
        let gateway = MemoryTransfer::new();
        let alice = principal("0xalice");
        gateway
            .receive(&gateway.announce(&alice, 10))
            .await
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        gateway.set_release_hook(Some(Arc::new(move |order: &ReleaseOrder| {
            sink.lock().push(order.amount);
        })));

        gateway.release(&order(&alice, 3)).await.unwrap();
        assert_eq!(*seen.lock(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn release_delay_is_honored() {
        let gateway = MemoryTransfer::new();
        let alice = principal("0xalice");
        gateway
            .receive(&gateway.announce(&alice, 10))
            .await
            .unwrap();
        gateway.set_release_delay(Some(Duration::from_secs(30)));

        let started = tokio::time::Instant::now();
        gateway.release(&order(&alice, 1)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(30));
    }
}
