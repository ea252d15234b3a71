use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

const ADDRESS_HEX_LEN: usize = 40;

/// 20-byte account / contract / asset handle in `0x`-prefixed lowercase hex.
///
/// Identities, protected asset handles, app and workerpool identifiers all
/// share this shape. The all-zero address is the "unrestricted" sentinel on
/// grant restriction fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address must start with 0x: {0}")]
    MissingPrefix(String),

    #[error("address must have {expected} hex digits, got {got}: {value}")]
    InvalidLength {
        expected: usize,
        got: usize,
        value: String,
    },

    #[error("address contains non-hex characters: {0}")]
    InvalidHex(String),
}

impl Address {
    pub fn parse(value: &str) -> Result<Self, AddressError> {
        let trimmed = value.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| AddressError::MissingPrefix(trimmed.to_string()))?;

        if digits.len() != ADDRESS_HEX_LEN {
            return Err(AddressError::InvalidLength {
                expected: ADDRESS_HEX_LEN,
                got: digits.len(),
                value: trimmed.to_string(),
            });
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressError::InvalidHex(trimmed.to_string()));
        }

        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }

    /// The zero address, meaning "any" on restriction fields.
    pub fn zero() -> Self {
        Self(format!("0x{}", "0".repeat(ADDRESS_HEX_LEN)))
    }

    /// Address derived from the first 20 bytes of a digest.
    pub fn from_digest(digest: &[u8]) -> Self {
        let take = digest.len().min(ADDRESS_HEX_LEN / 2);
        let mut bytes = [0u8; ADDRESS_HEX_LEN / 2];
        bytes[..take].copy_from_slice(&digest[..take]);
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn is_zero(&self) -> bool {
        self.0[2..].bytes().all(|b| b == b'0')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when this restriction value admits `candidate`.
    pub fn admits(&self, candidate: &Address) -> bool {
        self.is_zero() || self == candidate
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}
