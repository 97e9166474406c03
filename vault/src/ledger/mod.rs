//! # Ledger Module — Balances & Invariants
//!
//! The ledger is where the vault keeps its books. Every balance in custody
//! is a [`Balance`](crate::config::Balance) (`u128`) in the smallest
//! indivisible unit, owned by exactly one [`Principal`], and only ever
//! changed through a [`PrincipalGuard`].
//!
//! ## Architecture
//!
//! ```text
//! principal.rs  — Principal: opaque, exact-equality owner identifier
//! book.rs       — Ledger + PrincipalGuard: per-principal writer sections
//! error.rs      — LedgerError
//! ```
//!
//! ## Invariants
//!
//! 1. **No negative balances.** Balances are unsigned and debits are
//!    checked before they apply. An overdraft is rejected whole, never
//!    clamped.
//!
//! 2. **No wrapping.** Credits use checked arithmetic against both the
//!    principal's balance and the ledger total.
//!
//! 3. **Conservation.** The ledger total is exactly credits minus debits.
//!    Failed operations move nothing.
//!
//! 4. **Releases keep their room.** A debit waiting on its release still
//!    counts against ledger capacity, so restoring it after a failed
//!    release always fits.
//!
//! 5. **One writer per principal.** Check and act happen under the same
//!    guard, so two debits can never both pass against a balance that only
//!    covers one of them.

pub mod book;
pub mod error;
pub mod principal;

pub use book::{Ledger, PrincipalGuard};
pub use error::LedgerError;
pub use principal::Principal;
