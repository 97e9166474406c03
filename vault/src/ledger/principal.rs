//! Principal identifiers.
//!
//! A principal is whoever owns a balance: an address, an account number,
//! a DID. The vault doesn't care which. Identity has already been
//! authenticated by the time a principal reaches the ledger, so all we
//! enforce is that the identifier is non-empty and compared exactly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::LedgerError;

/// Opaque, immutable identifier of a balance owner.
///
/// Equality is exact byte equality: `"0xABC"` and `"0xabc"` are different
/// principals. Normalization, if any, is the identity layer's problem.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal(String);

impl Principal {
    /// Creates a principal from an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidPrincipal`] if `id` is empty.
    pub fn new(id: impl Into<String>) -> Result<Self, LedgerError> {
        let id = id.into();
        if id.is_empty() {
            return Err(LedgerError::InvalidPrincipal);
        }
        Ok(Self(id))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier as raw bytes, used as the storage key.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Principal {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Principal {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Principal> for String {
    fn from(principal: Principal) -> Self {
        principal.0
    }
}

impl AsRef<str> for Principal {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_principal_rejected() {
        assert!(matches!(
            Principal::new(""),
            Err(LedgerError::InvalidPrincipal)
        ));
        assert!("".parse::<Principal>().is_err());
    }

    #[test]
    fn equality_is_exact() {
        let lower: Principal = "0xabc".parse().unwrap();
        let upper: Principal = "0xABC".parse().unwrap();
        assert_ne!(lower, upper);
        assert_eq!(lower, Principal::new("0xabc").unwrap());
    }

    #[test]
    fn display_is_the_raw_identifier() {
        let p: Principal = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap();
        assert_eq!(p.to_string(), "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
        assert_eq!(p.as_bytes(), p.as_str().as_bytes());
    }

    #[test]
    fn deserialization_validates() {
        let ok: Principal = serde_json::from_str("\"0xalice\"").unwrap();
        assert_eq!(ok.as_str(), "0xalice");
        assert!(serde_json::from_str::<Principal>("\"\"").is_err());
    }
}
