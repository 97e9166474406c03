//! # Ledger Journal
//!
//! Append-only audit trail of every committed balance mutation. One entry
//! per credit, debit, or compensating credit, written in the same sled
//! transaction as the balance it describes, so the journal and the balance
//! tree can never disagree about what happened.
//!
//! Compensations get their own kind on purpose: each one means the
//! outgoing transfer mechanism failed after a debit landed, and somebody
//! should be looking at it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Balance;
use crate::ledger::Principal;

/// What a journal entry records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// Value entered custody for the principal.
    Credit,
    /// Value left (or is about to leave) custody for the principal.
    Debit,
    /// A debit reversed because the outgoing release failed.
    Compensation,
}

impl EntryKind {
    /// Returns `true` if this kind increases the balance.
    pub fn is_credit(&self) -> bool {
        matches!(self, EntryKind::Credit | EntryKind::Compensation)
    }
}

/// A single committed ledger mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Monotonically increasing sequence number (sled `generate_id`).
    /// Gaps are possible; ordering is what matters.
    pub sequence: u64,
    /// The principal whose balance changed.
    pub principal: Principal,
    /// Direction of the change.
    pub kind: EntryKind,
    /// Size of the change in smallest units.
    pub amount: Balance,
    /// The principal's balance after the change was applied.
    pub balance_after: Balance,
    /// Wall-clock time the entry was written.
    pub recorded_at: DateTime<Utc>,
}

impl JournalEntry {
    /// The principal's balance before this entry was applied.
    ///
    /// Reconstructed from `balance_after` and `amount`; `None` means the
    /// entry is internally inconsistent (which the store never writes).
    pub fn balance_before(&self) -> Option<Balance> {
        if self.kind.is_credit() {
            self.balance_after.checked_sub(self.amount)
        } else {
            self.balance_after.checked_add(self.amount)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: EntryKind, amount: Balance, balance_after: Balance) -> JournalEntry {
        JournalEntry {
            sequence: 7,
            principal: "0xalice".parse().unwrap(),
            kind,
            amount,
            balance_after,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn credit_kinds() {
        assert!(EntryKind::Credit.is_credit());
        assert!(EntryKind::Compensation.is_credit());
        assert!(!EntryKind::Debit.is_credit());
    }

    #[test]
    fn balance_before_reverses_the_entry() {
        assert_eq!(entry(EntryKind::Credit, 40, 100).balance_before(), Some(60));
        assert_eq!(entry(EntryKind::Debit, 40, 60).balance_before(), Some(100));
        assert_eq!(
            entry(EntryKind::Compensation, 40, 100).balance_before(),
            Some(60)
        );
        assert_eq!(entry(EntryKind::Credit, 10, 5).balance_before(), None);
    }

    #[test]
    fn bincode_encoding_is_stable_across_reads() {
        let original = entry(EntryKind::Debit, 1, 2);
        let bytes = bincode::serialize(&original).unwrap();
        let decoded: JournalEntry = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, original);
    }
}
