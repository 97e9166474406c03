//! Terminal walkthrough of the SecureVault custody lifecycle.
//!
//! Deposits, a withdrawal, a refused overdraft, two racing withdrawals, and
//! a release that fails and gets compensated. Output uses ANSI colors; set
//! `RUST_LOG=secure_vault=debug` to watch the service's own log lines on
//! stderr alongside it.
//!
//! Run with:
//!   cargo run --example custody_demo --release

use std::sync::Arc;
use std::time::Instant;

use secure_vault::config::{format_units, parse_units};
use secure_vault::logging::{init_logging, LogFormat};
use secure_vault::{
    Balance, Ledger, MemoryTransfer, Principal, VaultConfig, VaultError, VaultService,
};

// ---------------------------------------------------------------------------
// ANSI color constants
// ---------------------------------------------------------------------------

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";

const BG_BLUE: &str = "\x1b[44m";

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

fn banner() {
    println!();
    println!("{BG_BLUE}{BOLD}{WHITE}                                                        {RESET}");
    println!("{BG_BLUE}{BOLD}{WHITE}    SECURE VAULT  --  Custody Lifecycle Demo            {RESET}");
    println!("{BG_BLUE}{BOLD}{WHITE}                                                        {RESET}");
    println!();
}

fn section(num: u32, title: &str) {
    println!();
    println!("{BOLD}{CYAN}===[{YELLOW} Step {num} {CYAN}]========================================{RESET}");
    println!("{BOLD}{WHITE}  {title}{RESET}");
}

fn success(text: &str) {
    println!("{GREEN}  [OK] {text}{RESET}");
}

fn refused(text: &str) {
    println!("{RED}  [REFUSED] {text}{RESET}");
}

fn balance_row(vault: &VaultService<MemoryTransfer>, who: &Principal) {
    println!(
        "  {BOLD}{:<10}{RESET}  {WHITE}{:>8}{RESET} {DIM}coins{RESET}",
        who.as_str(),
        format_units(vault.balance(who))
    );
}

fn custody_row(vault: &VaultService<MemoryTransfer>) {
    println!(
        "  {DIM}ledger total {} | gateway custody {}{RESET}",
        format_units(vault.total_custody()),
        format_units(vault.transfer().custody())
    );
}

fn coins(s: &str) -> anyhow::Result<Balance> {
    parse_units(s).ok_or_else(|| anyhow::anyhow!("not an amount: {s}"))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging("warn", LogFormat::Pretty);
    banner();
    let started = Instant::now();

    let vault = VaultService::new(
        Arc::new(Ledger::in_memory()),
        Arc::new(MemoryTransfer::new()),
        VaultConfig::default(),
    )?;
    let alice: Principal = "alice".parse()?;
    let bob: Principal = "bob".parse()?;

    section(1, "Deposits");
    for (who, amount) in [(&alice, "1.0"), (&bob, "2.5")] {
        let amount = coins(amount)?;
        let incoming = vault.transfer().announce(who, amount);
        vault.deposit(who, amount, incoming).await?;
        success(&format!("{} deposited {}", who, format_units(amount)));
    }
    balance_row(&vault, &alice);
    balance_row(&vault, &bob);

    section(2, "Withdrawal");
    vault.withdraw(&alice, coins("0.5")?).await?;
    success("alice withdrew 0.5");
    balance_row(&vault, &alice);

    section(3, "Overdraft");
    match vault.withdraw(&alice, coins("0.6")?).await {
        Err(e @ VaultError::InsufficientBalance { .. }) => refused(&e.to_string()),
        other => anyhow::bail!("overdraft should be refused, got {other:?}"),
    }
    balance_row(&vault, &alice);

    section(4, "Two withdrawals of 1.5 race for bob's 2.5");
    let (first, second) = tokio::join!(
        vault.withdraw(&bob, coins("1.5")?),
        vault.withdraw(&bob, coins("1.5")?)
    );
    for outcome in [first, second] {
        match outcome {
            Ok(left) => success(&format!("released, {} left", format_units(left))),
            Err(e) => refused(&e.to_string()),
        }
    }
    balance_row(&vault, &bob);

    section(5, "Release fails after the debit");
    vault.transfer().fail_releases(1);
    if let Err(e) = vault.withdraw(&bob, coins("1.0")?).await {
        refused(&e.to_string());
    }
    success("debit compensated");
    balance_row(&vault, &bob);

    section(6, "Books");
    custody_row(&vault);
    println!(
        "  {DIM}compensations {} | elapsed {:.2} ms{RESET}",
        vault.metrics().compensations_total.get(),
        started.elapsed().as_secs_f64() * 1000.0
    );
    println!();
    Ok(())
}
