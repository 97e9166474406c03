//! # Vault Configuration & Constants
//!
//! Every magic number in the vault lives here. If you're hardcoding a
//! timeout somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! Two layers:
//!
//! - **Constants** — denomination and the defaults nobody should need to
//!   touch in tests.
//! - **[`VaultConfig`]** — the runtime knobs an embedding application can
//!   override (transfer timeout, release retries, data directory). It
//!   derives `Serialize`/`Deserialize` so it can sit inside whatever config
//!   file the host process already has.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Denomination
// ---------------------------------------------------------------------------

/// An amount of the custody asset in smallest units.
///
/// 128 bits so that 18 decimals still leaves room for ~3.4 * 10^20 whole
/// coins. A `u64` would cap the entire vault at about 18.4 coins.
pub type Balance = u128;

/// Decimal places of the custody asset. 18, wei-style. The ledger never
/// divides; this is for parsing and display only.
pub const UNIT_DECIMALS: u32 = 18;

/// Smallest units in one whole coin (`10^18`).
pub const UNITS_PER_COIN: Balance = 1_000_000_000_000_000_000;

// ---------------------------------------------------------------------------
// Transfer Boundary
// ---------------------------------------------------------------------------

/// Default upper bound on a single call into the value transfer boundary.
/// A bank rail or settlement layer that can't answer within 10 seconds is
/// treated as failed; withdrawals compensate, deposits are not credited.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(10);

/// Same as above, as milliseconds, because serde wants an integer.
/// Keep this in sync with DEFAULT_TRANSFER_TIMEOUT.
pub const DEFAULT_TRANSFER_TIMEOUT_MS: u64 = 10_000;

/// Release attempts per withdrawal before compensating. One by default:
/// retrying a release that timed out only makes sense when the boundary
/// dedupes by withdrawal id.
pub const DEFAULT_MAX_RELEASE_ATTEMPTS: u32 = 1;

/// Hard ceiling on release attempts.
pub const MAX_RELEASE_ATTEMPTS_CEILING: u32 = 10;

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Name of the sled tree holding principal balances.
pub const BALANCES_TREE: &str = "balances";

/// Name of the sled tree holding the append-only ledger journal.
pub const JOURNAL_TREE: &str = "journal";

// ---------------------------------------------------------------------------
// VaultConfig
// ---------------------------------------------------------------------------

/// Invalid runtime configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("transfer timeout must be positive")]
    ZeroTimeout,

    #[error("max release attempts must be in 1..={max}, got {got}")]
    ReleaseAttempts { got: u32, max: u32 },

    #[error("malformed config: {0}")]
    Malformed(String),
}

/// Runtime configuration of a [`VaultService`](crate::service::VaultService).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Upper bound on each `receive`/`release` call, in milliseconds.
    pub transfer_timeout_ms: u64,

    /// How many times a withdrawal tries to release before compensating.
    pub max_release_attempts: u32,

    /// Where the sled ledger store lives. `None` keeps the ledger in memory.
    pub data_dir: Option<PathBuf>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            transfer_timeout_ms: DEFAULT_TRANSFER_TIMEOUT_MS,
            max_release_attempts: DEFAULT_MAX_RELEASE_ATTEMPTS,
            data_dir: None,
        }
    }
}

impl VaultConfig {
    /// Parses a JSON config blob and validates it.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Returns a copy with a different transfer timeout.
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Returns a copy with a different release attempt budget.
    pub fn with_max_release_attempts(mut self, attempts: u32) -> Self {
        self.max_release_attempts = attempts;
        self
    }

    /// The transfer timeout as a `Duration`.
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    /// Rejects configurations that would let a transfer call block forever
    /// or retry without bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transfer_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_release_attempts == 0
            || self.max_release_attempts > MAX_RELEASE_ATTEMPTS_CEILING
        {
            return Err(ConfigError::ReleaseAttempts {
                got: self.max_release_attempts,
                max: MAX_RELEASE_ATTEMPTS_CEILING,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

/// Parses a decimal coin amount (`"1.5"`) into smallest units.
///
/// Returns `None` for malformed input, more than [`UNIT_DECIMALS`]
/// fractional digits, or values that don't fit in a [`Balance`]. We don't
/// round.
pub fn parse_units(s: &str) -> Option<Balance> {
    let s = s.trim();
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if frac.len() > UNIT_DECIMALS as usize {
        return None;
    }
    let digits_ok = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    if !digits_ok(whole) || !digits_ok(frac) {
        return None;
    }

    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<Balance>().ok()?.checked_mul(UNITS_PER_COIN)?
    };
    let frac_units = if frac.is_empty() {
        0
    } else {
        let scale = Balance::pow(10, UNIT_DECIMALS - frac.len() as u32);
        frac.parse::<Balance>().ok()?.checked_mul(scale)?
    };
    whole_units.checked_add(frac_units)
}

/// Formats smallest units as a decimal coin amount, trimming trailing zeros.
pub fn format_units(units: Balance) -> String {
    let whole = units / UNITS_PER_COIN;
    let frac = units % UNITS_PER_COIN;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:018}", frac);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_constants_in_sync() {
        assert_eq!(
            DEFAULT_TRANSFER_TIMEOUT.as_millis() as u64,
            DEFAULT_TRANSFER_TIMEOUT_MS
        );
    }

    #[test]
    fn test_units_per_coin_matches_decimals() {
        assert_eq!(UNITS_PER_COIN, Balance::pow(10, UNIT_DECIMALS));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = VaultConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.transfer_timeout(), DEFAULT_TRANSFER_TIMEOUT);
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = VaultConfig::default().with_transfer_timeout(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn test_release_attempts_bounds() {
        let none = VaultConfig::default().with_max_release_attempts(0);
        assert!(matches!(
            none.validate(),
            Err(ConfigError::ReleaseAttempts { got: 0, .. })
        ));

        let too_many =
            VaultConfig::default().with_max_release_attempts(MAX_RELEASE_ATTEMPTS_CEILING + 1);
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = VaultConfig::from_json(r#"{"transfer_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.transfer_timeout_ms, 250);
        assert_eq!(config.max_release_attempts, DEFAULT_MAX_RELEASE_ATTEMPTS);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            VaultConfig::from_json("not json"),
            Err(ConfigError::Malformed(_))
        ));
        assert!(matches!(
            VaultConfig::from_json(r#"{"transfer_timeout_ms": 0}"#),
            Err(ConfigError::ZeroTimeout)
        ));
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_units("1.0"), Some(UNITS_PER_COIN));
        assert_eq!(parse_units("0.5"), Some(UNITS_PER_COIN / 2));
        assert_eq!(parse_units("0.6"), Some(600_000_000_000_000_000));
        assert_eq!(parse_units("3"), Some(3 * UNITS_PER_COIN));
        assert_eq!(parse_units(".25"), Some(UNITS_PER_COIN / 4));
        assert_eq!(parse_units("0.000000000000000001"), Some(1));
    }

    #[test]
    fn test_parse_units_rejects_bad_input() {
        assert_eq!(parse_units(""), None);
        assert_eq!(parse_units("."), None);
        assert_eq!(parse_units("-1"), None);
        assert_eq!(parse_units("1.2.3"), None);
        assert_eq!(parse_units("0.0000000000000000001"), None);
        // u128 tops out a little above 3.4 * 10^20 coins.
        assert!(parse_units("340282366920938463463").is_some());
        assert_eq!(parse_units("340282366920938463464"), None);
    }

    #[test]
    fn test_amounts_past_u64_range() {
        let big = parse_units("1000000").unwrap();
        assert!(big > u128::from(u64::MAX));
        assert_eq!(format_units(big), "1000000");
        assert_eq!(format_units(parse_units("20.25").unwrap()), "20.25");
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let config = VaultConfig::default().with_transfer_timeout(Duration::MAX);
        assert_eq!(config.transfer_timeout_ms, u64::MAX);
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(UNITS_PER_COIN), "1");
        assert_eq!(format_units(UNITS_PER_COIN / 2), "0.5");
        assert_eq!(format_units(400_000_000_000_000_000), "0.4");
        assert_eq!(format_units(1), "0.000000000000000001");
        assert_eq!(format_units(0), "0");
    }
}
