//! # The Ledger
//!
//! Sole owner of the principal → balance mapping. Nothing else in the
//! crate is allowed to move a balance; the vault service asks the ledger
//! for a [`PrincipalGuard`] and mutates through that.
//!
//! ## Concurrency Model
//!
//! ```text
//!   DashMap<Principal, Arc<Slot>>
//!                        │
//!                        ├── writer: tokio Mutex   ← one writer per principal
//!                        └── committed: RwLock     ← readers skip the writer mutex
//!
//!   Totals { settled, outgoing }                   ← capacity, parking_lot Mutex
//! ```
//!
//! Writers take the principal's mutex and hold it for as long as the
//! [`PrincipalGuard`] lives. Because it's an async mutex, the guard can be
//! held across `.await`, which is the whole point: a withdrawal keeps the
//! principal locked from debit through release (and compensation, if the
//! release fails). A second withdrawal for the same principal, whether
//! concurrent or re-entering from inside the release path, waits its turn
//! and sees the already-debited balance.
//!
//! Readers never take the writer mutex. The `committed` value is only
//! replaced after the durable write succeeded, so `balance_of` observes
//! either the pre- or post-state of a mutation, never something in between.
//!
//! ## Capacity
//!
//! `settled` is the sum of all balances. `outgoing` is value debited for a
//! release that hasn't settled yet. Credits must fit under
//! `settled + outgoing`, so whatever a pending release might have to put
//! back is never handed to another principal in the meantime, and a
//! compensation can't overflow.
//!
//! ## Durable Writes
//!
//! With a store attached, each mutation runs on tokio's blocking pool. The
//! job owns a clone of the writer lease, so the principal stays locked
//! until the commit and the in-memory publish are both done, even if the
//! awaiting caller goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::error::LedgerError;
use super::principal::Principal;
use crate::config::Balance;
use crate::storage::{EntryKind, JournalEntry, LedgerStore, StoreError};

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// Per-principal state. Created lazily; dropped again if the writer that
/// created it never committed anything.
struct Slot {
    /// Last committed balance. Written only while `writer` is held.
    committed: RwLock<Balance>,
    /// Set once the principal has had a committed mutation (or was restored
    /// from the store). Slots created by a lookup that never committed
    /// anything don't count as ledger entries.
    opened: AtomicBool,
    /// Single-writer section for this principal.
    writer: Arc<Mutex<()>>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            committed: RwLock::new(0),
            opened: AtomicBool::new(false),
            writer: Arc::new(Mutex::new(())),
        }
    }

    fn restored(balance: Balance) -> Self {
        Self {
            committed: RwLock::new(balance),
            opened: AtomicBool::new(true),
            writer: Arc::new(Mutex::new(())),
        }
    }

    fn balance(&self) -> Balance {
        *self.committed.read()
    }

    fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Totals
// ---------------------------------------------------------------------------

/// Ledger-wide sums. Invariant: `settled + outgoing <= Balance::MAX`.
#[derive(Debug, Default)]
struct Totals {
    /// Sum of all committed balances.
    settled: Balance,
    /// Debited, not yet released. Still occupies capacity.
    outgoing: Balance,
}

impl Totals {
    fn in_use(&self) -> Balance {
        self.settled.saturating_add(self.outgoing)
    }

    /// Claims room for a credit. On failure returns the capacity in use.
    fn credit(&mut self, amount: Balance) -> Result<(), Balance> {
        let in_use = self.in_use();
        in_use.checked_add(amount).ok_or(in_use)?;
        self.settled += amount;
        Ok(())
    }

    fn undo_credit(&mut self, amount: Balance) {
        self.settled = self.settled.saturating_sub(amount);
    }

    fn debit(&mut self, amount: Balance, hold: bool) {
        self.settled = self.settled.saturating_sub(amount);
        if hold {
            self.outgoing += amount;
        }
    }

    /// The held value left custody; its room is free again.
    fn settle(&mut self, amount: Balance) {
        self.outgoing = self.outgoing.saturating_sub(amount);
    }

    /// The held value goes back on the books. Fits by construction.
    fn restore(&mut self, amount: Balance) {
        self.outgoing = self.outgoing.saturating_sub(amount);
        self.settled += amount;
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

struct Shared {
    accounts: DashMap<Principal, Arc<Slot>>,
    totals: SyncMutex<Totals>,
    /// Durable backing. `None` for a purely in-memory ledger.
    store: Option<LedgerStore>,
}

/// The authoritative principal → balance ledger.
///
/// Share it as `Arc<Ledger>`. There is no global instance.
pub struct Ledger {
    shared: Arc<Shared>,
}

impl Ledger {
    /// Creates an empty ledger with no durable backing.
    ///
    /// Balances vanish with the process. Fine for tests and dev setups,
    /// not fine for money.
    pub fn in_memory() -> Self {
        Self::from_parts(DashMap::new(), 0, None)
    }

    /// Opens a ledger backed by `store`, restoring every persisted balance.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Storage`] if the store can't be read or its
    /// balances sum past `Balance::MAX` (which this ledger never writes).
    pub fn open(store: LedgerStore) -> Result<Self, LedgerError> {
        let accounts = DashMap::new();
        let mut total: Balance = 0;

        for (principal, balance) in store.load_balances()? {
            total = total.checked_add(balance).ok_or_else(|| {
                StoreError::Corrupt(format!("ledger total overflows at principal {}", principal))
            })?;
            accounts.insert(principal, Arc::new(Slot::restored(balance)));
        }

        tracing::info!(
            principals = accounts.len(),
            total,
            journal_entries = store.journal_len(),
            "ledger restored from store"
        );

        Ok(Self::from_parts(accounts, total, Some(store)))
    }

    fn from_parts(
        accounts: DashMap<Principal, Arc<Slot>>,
        settled: Balance,
        store: Option<LedgerStore>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                accounts,
                totals: SyncMutex::new(Totals {
                    settled,
                    outgoing: 0,
                }),
                store,
            }),
        }
    }

    /// Returns `true` if mutations are written through to a durable store.
    pub fn is_persistent(&self) -> bool {
        self.shared.store.is_some()
    }

    /// The durable store, if any.
    pub fn store(&self) -> Option<&LedgerStore> {
        self.shared.store.as_ref()
    }

    // -----------------------------------------------------------------------
    // Writer Sections
    // -----------------------------------------------------------------------

    /// Acquires exclusive write access to `principal`'s balance.
    ///
    /// Waits until any other holder releases the guard. Operations on other
    /// principals are unaffected.
    pub async fn lock(&self, principal: &Principal) -> PrincipalGuard {
        let slot = self.slot(principal);
        let writer = Arc::clone(&slot.writer).lock_owned().await;
        self.guard(principal, slot, writer)
    }

    /// Like [`lock`](Self::lock), but returns `None` instead of waiting
    /// when the principal is already locked.
    pub fn try_lock(&self, principal: &Principal) -> Option<PrincipalGuard> {
        let slot = self.slot(principal);
        let writer = Arc::clone(&slot.writer).try_lock_owned().ok()?;
        Some(self.guard(principal, slot, writer))
    }

    fn guard(
        &self,
        principal: &Principal,
        slot: Arc<Slot>,
        writer: OwnedMutexGuard<()>,
    ) -> PrincipalGuard {
        PrincipalGuard {
            lease: Arc::new(Lease {
                shared: Arc::clone(&self.shared),
                principal: principal.clone(),
                slot,
                held: SyncMutex::new(0),
                _writer: writer,
            }),
        }
    }

    /// Fetches or lazily creates the slot. Never holds a shard lock past
    /// the return, so callers can `.await` freely afterwards.
    fn slot(&self, principal: &Principal) -> Arc<Slot> {
        if let Some(slot) = self.shared.accounts.get(principal) {
            return Arc::clone(slot.value());
        }
        let slot = self
            .shared
            .accounts
            .entry(principal.clone())
            .or_insert_with(|| Arc::new(Slot::empty()));
        Arc::clone(slot.value())
    }

    // -----------------------------------------------------------------------
    // One-shot Operations
    // -----------------------------------------------------------------------

    /// Credits `amount` to `principal` in its own writer section.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] if `amount` is 0.
    /// - [`LedgerError::ArithmeticOverflow`] if the balance or the ledger
    ///   capacity would exceed `Balance::MAX`.
    /// - [`LedgerError::Storage`] if the durable write fails.
    pub async fn credit(
        &self,
        principal: &Principal,
        amount: Balance,
    ) -> Result<Balance, LedgerError> {
        let mut guard = self.lock(principal).await;
        guard.credit(amount).await
    }

    /// Debits `amount` from `principal` in its own writer section.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] if `amount` is 0.
    /// - [`LedgerError::InsufficientBalance`] if the balance doesn't cover it.
    /// - [`LedgerError::Storage`] if the durable write fails.
    pub async fn debit(
        &self,
        principal: &Principal,
        amount: Balance,
    ) -> Result<Balance, LedgerError> {
        let mut guard = self.lock(principal).await;
        guard.debit(amount).await
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Current committed balance of `principal`. Zero if never credited.
    pub fn balance_of(&self, principal: &Principal) -> Balance {
        self.shared
            .accounts
            .get(principal)
            .map(|slot| slot.balance())
            .unwrap_or(0)
    }

    /// Sum of all balances. Equals total credited minus total debited.
    pub fn total_balance(&self) -> Balance {
        self.shared.totals.lock().settled
    }

    /// Value debited for releases that haven't settled yet.
    pub fn outgoing_balance(&self) -> Balance {
        self.shared.totals.lock().outgoing
    }

    /// Number of principals with a ledger entry (including zero balances).
    pub fn principal_count(&self) -> usize {
        self.shared
            .accounts
            .iter()
            .filter(|slot| slot.is_open())
            .count()
    }

    /// All ledger entries as `(principal, balance)`, sorted by principal.
    pub fn snapshot(&self) -> Vec<(Principal, Balance)> {
        let mut entries: Vec<(Principal, Balance)> = self
            .shared
            .accounts
            .iter()
            .filter(|slot| slot.is_open())
            .map(|slot| (slot.key().clone(), slot.balance()))
            .collect();
        entries.sort();
        entries
    }

    /// The durable journal. Empty for an in-memory ledger.
    pub fn journal(&self) -> Result<Vec<JournalEntry>, LedgerError> {
        match &self.shared.store {
            Some(store) => Ok(store.journal()?),
            None => Ok(Vec::new()),
        }
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("principals", &self.principal_count())
            .field("total", &self.total_balance())
            .field("persistent", &self.is_persistent())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Lease
// ---------------------------------------------------------------------------

/// What a mutation does to the balance.
#[derive(Clone, Copy, Debug)]
enum Op {
    Credit,
    Debit { hold: bool },
    Compensate,
}

/// The writer section proper. Shared between the guard and any blocking
/// commit still running on its behalf; the principal unlocks when the last
/// of them lets go.
struct Lease {
    shared: Arc<Shared>,
    principal: Principal,
    slot: Arc<Slot>,
    /// Debited in this section and waiting on a release.
    held: SyncMutex<Balance>,
    _writer: OwnedMutexGuard<()>,
}

impl Lease {
    fn apply(&self, op: Op, amount: Balance) -> Result<Balance, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let current = self.slot.balance();

        match op {
            Op::Credit => {
                let next = current
                    .checked_add(amount)
                    .ok_or_else(|| self.overflow(current, amount))?;
                self.shared
                    .totals
                    .lock()
                    .credit(amount)
                    .map_err(|in_use| self.overflow(in_use, amount))?;

                if let Err(e) = self.persist(EntryKind::Credit, amount, next) {
                    self.shared.totals.lock().undo_credit(amount);
                    return Err(e);
                }
                self.publish(next);
                tracing::debug!(principal = %self.principal, amount, balance = next, "credit");
                Ok(next)
            }
            Op::Debit { hold } => {
                if current < amount {
                    return Err(LedgerError::InsufficientBalance {
                        principal: self.principal.clone(),
                        available: current,
                        requested: amount,
                    });
                }
                let next = current - amount;

                self.persist(EntryKind::Debit, amount, next)?;
                self.publish(next);
                self.shared.totals.lock().debit(amount, hold);
                if hold {
                    *self.held.lock() += amount;
                }
                tracing::debug!(principal = %self.principal, amount, balance = next, hold, "debit");
                Ok(next)
            }
            Op::Compensate => {
                self.check_held(amount)?;
                let next = current
                    .checked_add(amount)
                    .ok_or_else(|| self.overflow(current, amount))?;

                self.persist(EntryKind::Compensation, amount, next)?;
                self.publish(next);
                self.shared.totals.lock().restore(amount);
                *self.held.lock() -= amount;
                tracing::debug!(principal = %self.principal, amount, balance = next, "compensation");
                Ok(next)
            }
        }
    }

    fn settle(&self, amount: Balance) -> Result<(), LedgerError> {
        self.check_held(amount)?;
        self.shared.totals.lock().settle(amount);
        *self.held.lock() -= amount;
        Ok(())
    }

    fn check_held(&self, amount: Balance) -> Result<(), LedgerError> {
        let held = *self.held.lock();
        if amount == 0 || amount > held {
            return Err(LedgerError::NotHeld {
                principal: self.principal.clone(),
                held,
                requested: amount,
            });
        }
        Ok(())
    }

    fn persist(&self, kind: EntryKind, amount: Balance, next: Balance) -> Result<(), LedgerError> {
        if let Some(store) = &self.shared.store {
            store.commit(&self.principal, kind, amount, next)?;
        }
        Ok(())
    }

    fn publish(&self, next: Balance) {
        *self.slot.committed.write() = next;
        self.slot.opened.store(true, Ordering::Release);
    }

    fn overflow(&self, current: Balance, credit: Balance) -> LedgerError {
        LedgerError::ArithmeticOverflow {
            principal: self.principal.clone(),
            current,
            credit,
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let held = *self.held.get_mut();
        if held > 0 {
            // Neither settled nor compensated. The debit stands.
            self.shared.totals.lock().settle(held);
            tracing::warn!(
                principal = %self.principal,
                held,
                "writer section closed with an unresolved release"
            );
        }

        // A lookup that never committed leaves nothing behind, unless
        // another writer is already queued on the same slot.
        if !self.slot.is_open() {
            self.shared.accounts.remove_if(&self.principal, |_, slot| {
                Arc::ptr_eq(slot, &self.slot) && Arc::strong_count(slot) == 2 && !slot.is_open()
            });
        }
    }
}

// ---------------------------------------------------------------------------
// PrincipalGuard
// ---------------------------------------------------------------------------

/// Exclusive write access to one principal's balance.
///
/// Every check-then-act on a balance happens through a guard, so the check
/// and the mutation are one atomic unit from the point of view of every
/// other writer. Dropping the guard releases the principal.
pub struct PrincipalGuard {
    lease: Arc<Lease>,
}

impl PrincipalGuard {
    /// The principal this guard locks.
    pub fn principal(&self) -> &Principal {
        &self.lease.principal
    }

    /// The committed balance. Stable for as long as the guard is held.
    pub fn balance(&self) -> Balance {
        self.lease.slot.balance()
    }

    /// Amount debited through [`debit_for_release`](Self::debit_for_release)
    /// and not yet settled or compensated.
    pub fn held(&self) -> Balance {
        *self.lease.held.lock()
    }

    /// Checks that a credit of `amount` would currently succeed, without
    /// applying it.
    ///
    /// The principal's own balance can't change while the guard is held, so
    /// that half of the check stays true. Ledger capacity can still move
    /// through other principals, so [`credit`](Self::credit) re-checks.
    pub fn check_credit(&self, amount: Balance) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let current = self.balance();
        if current.checked_add(amount).is_none() {
            return Err(self.lease.overflow(current, amount));
        }
        let in_use = self.lease.shared.totals.lock().in_use();
        if in_use.checked_add(amount).is_none() {
            return Err(self.lease.overflow(in_use, amount));
        }
        Ok(())
    }

    /// Adds `amount` to the balance. Returns the new balance.
    pub async fn credit(&mut self, amount: Balance) -> Result<Balance, LedgerError> {
        self.run(Op::Credit, amount).await
    }

    /// Subtracts `amount` from the balance. Returns the new balance.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InsufficientBalance`] if `amount` exceeds the balance.
    /// Nothing is debited in that case; there are no partial debits.
    pub async fn debit(&mut self, amount: Balance) -> Result<Balance, LedgerError> {
        self.run(Op::Debit { hold: false }, amount).await
    }

    /// Like [`debit`](Self::debit), but keeps `amount` reserved in ledger
    /// capacity until [`settle_release`](Self::settle_release) or
    /// [`compensate`](Self::compensate) resolves it.
    pub async fn debit_for_release(&mut self, amount: Balance) -> Result<Balance, LedgerError> {
        self.run(Op::Debit { hold: true }, amount).await
    }

    /// The held `amount` left custody. Frees its capacity.
    pub fn settle_release(&mut self, amount: Balance) -> Result<(), LedgerError> {
        self.lease.settle(amount)
    }

    /// Restores a held `amount` whose release failed, journaled as a
    /// compensation. Uses the capacity the debit reserved, so it can't
    /// overflow no matter what other principals did in the meantime.
    pub async fn compensate(&mut self, amount: Balance) -> Result<Balance, LedgerError> {
        self.run(Op::Compensate, amount).await
    }

    async fn run(&mut self, op: Op, amount: Balance) -> Result<Balance, LedgerError> {
        if self.lease.shared.store.is_none() {
            return self.lease.apply(op, amount);
        }
        let lease = Arc::clone(&self.lease);
        tokio::task::spawn_blocking(move || lease.apply(op, amount))
            .await
            .map_err(|e| LedgerError::from(StoreError::Interrupted(e.to_string())))?
    }
}

impl std::fmt::Debug for PrincipalGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrincipalGuard")
            .field("principal", self.principal())
            .field("balance", &self.balance())
            .field("held", &self.held())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
