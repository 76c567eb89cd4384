//! Opaque 64-bit file identifiers.
//!
//! A [`Uid`] has two textual forms:
//!
//! - **Canonical** (`Display` / [`Uid::parse`]): unpadded URL-safe base64 of the
//!   8 little-endian bytes, 11 characters. Used in public URLs and JSON.
//! - **Base32** ([`Uid::to_base32`]): lowercase unpadded base32hex of the same
//!   bytes, 13 characters. Safe for file names and object keys.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Length of the canonical base64 form.
const UID_BASE64_LEN: usize = 11;

/// Opaque, sortable file identifier. Zero is never a valid id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UidParseError {
    #[error("Invalid uid length: expected 11 characters, got {0}")]
    InvalidLength(usize),

    #[error("Invalid uid encoding: {0}")]
    InvalidEncoding(String),

    #[error("Uid must not be zero")]
    Zero,
}

impl Uid {
    pub const ZERO: Uid = Uid(0);

    pub const fn new(value: u64) -> Self {
        Uid(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Parse the canonical form, returning [`Uid::ZERO`] on any failure.
    pub fn parse(s: &str) -> Uid {
        s.parse().unwrap_or(Uid::ZERO)
    }

    /// Lowercase unpadded base32hex of the little-endian bytes.
    pub fn to_base32(self) -> String {
        base32::encode(
            base32::Alphabet::Rfc4648Hex { padding: false },
            &self.0.to_le_bytes(),
        )
        .to_ascii_lowercase()
    }
}

impl From<u64> for Uid {
    fn from(value: u64) -> Self {
        Uid(value)
    }
}

impl From<Uid> for u64 {
    fn from(uid: Uid) -> Self {
        uid.0
    }
}

impl Display for Uid {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&URL_SAFE_NO_PAD.encode(self.0.to_le_bytes()))
    }
}

impl FromStr for Uid {
    type Err = UidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != UID_BASE64_LEN {
            return Err(UidParseError::InvalidLength(s.len()));
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| UidParseError::InvalidEncoding(e.to_string()))?;
        let bytes: [u8; 8] = bytes
            .try_into()
            .map_err(|_| UidParseError::InvalidEncoding(s.to_string()))?;

        match u64::from_le_bytes(bytes) {
            0 => Err(UidParseError::Zero),
            value => Ok(Uid(value)),
        }
    }
}

impl Serialize for Uid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Uid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
