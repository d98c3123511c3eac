//! Content addresses.
//!
//! Every inter-object reference in the store is a 40-hex-digit content
//! address. [`Hash::of_bytes`] computes the address of a byte payload:
//! BLAKE3, truncated to 20 bytes, lowercase hex. The in-memory store and
//! operation hashing both go through it, so an operation's hash equals the
//! address the store would assign to its canonical JSON form.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of hex digits in a content address.
pub const HASH_LEN: usize = 40;

/// Number of leading hex digits shown to humans.
pub const HUMAN_ID_LEN: usize = 7;

/// Error returned when a string is not a well-formed content address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed hash '{raw}': expected {HASH_LEN} lowercase hex digits")]
pub struct InvalidHash {
    /// The rejected input.
    pub raw: String,
}

impl From<InvalidHash> for crate::Error {
    fn from(err: InvalidHash) -> Self {
        Self::CorruptStorage(err.to_string())
    }
}

/// A 40-hex-digit content address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash(String);

impl Hash {
    /// Compute the content address of a byte payload.
    #[must_use]
    pub fn of_bytes(data: &[u8]) -> Self {
        let digest = blake3::hash(data);
        Self(hex::encode(&digest.as_bytes()[..HASH_LEN / 2]))
    }

    /// Parse a hash from its hex form, validating shape.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidHash`] unless the input is exactly [`HASH_LEN`]
    /// lowercase hex digits.
    pub fn from_hex(s: &str) -> Result<Self, InvalidHash> {
        if s.len() == HASH_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            Ok(Self(s.to_owned()))
        } else {
            Err(InvalidHash { raw: s.to_owned() })
        }
    }

    /// The full hex form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The short prefix shown to humans.
    #[must_use]
    pub fn human(&self) -> &str {
        &self.0[..HUMAN_ID_LEN]
    }

    /// Whether this hash starts with the given hex prefix.
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Hash {
    type Err = InvalidHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{HASH_LEN, Hash, InvalidHash};

    #[test]
    fn of_bytes_is_40_hex_digits() {
        let hash = Hash::of_bytes(b"hello");
        assert_eq!(hash.as_str().len(), HASH_LEN);
        assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn of_bytes_is_deterministic() {
        assert_eq!(Hash::of_bytes(b"payload"), Hash::of_bytes(b"payload"));
        assert_ne!(Hash::of_bytes(b"payload"), Hash::of_bytes(b"payloae"));
    }

    #[test]
    fn from_hex_rejects_bad_shapes() {
        assert!(Hash::from_hex("abc").is_err());
        assert!(Hash::from_hex(&"A".repeat(HASH_LEN)).is_err());
        assert!(Hash::from_hex(&"g".repeat(HASH_LEN)).is_err());

        let valid = "0123456789abcdef0123456789abcdef01234567";
        assert_eq!(Hash::from_hex(valid).map(|h| h.to_string()), Ok(valid.to_owned()));
    }

    #[test]
    fn human_id_is_a_prefix() {
        let hash = Hash::of_bytes(b"x");
        assert_eq!(hash.human().len(), 7);
        assert!(hash.has_prefix(hash.human()));
    }

    #[test]
    fn json_round_trip() {
        let hash = Hash::of_bytes(b"round trip");
        let json = serde_json::to_string(&hash).unwrap();
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, back);
    }

    #[test]
    fn json_rejects_malformed() {
        let err = serde_json::from_str::<Hash>("\"nope\"");
        assert!(err.is_err());
        let _: InvalidHash = Hash::from_hex("nope").unwrap_err();
    }
}
