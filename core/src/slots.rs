// Slot sequence: the one-way key chain shared by sender and receiver
//
// A slot is a 32-byte SHA-256 output, carried around as unpadded base-32.
// `next = sha256(current)`: anyone holding the seed can walk forward,
// nobody can walk back or guess the chain without it.

use data_encoding::BASE32_NOPAD;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Raw slot length (SHA-256 digest size)
pub const SLOT_LEN: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlotError {
    #[error("Invalid base-32: {0}")]
    InvalidEncoding(String),
    #[error("Slot decodes to {0} bytes, expected {SLOT_LEN}")]
    WrongLength(usize),
}

/// Encode bytes as unpadded upper-case RFC 4648 base-32
pub fn base32_encode(bytes: &[u8]) -> String {
    BASE32_NOPAD.encode(bytes)
}

/// Decode unpadded base-32 (case-insensitive)
pub fn base32_decode(text: &str) -> Result<Vec<u8>, SlotError> {
    BASE32_NOPAD
        .decode(text.to_ascii_uppercase().as_bytes())
        .map_err(|e| SlotError::InvalidEncoding(e.to_string()))
}

/// One position in a slot sequence
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Slot(String);

impl Slot {
    /// Wrap raw slot bytes
    pub fn from_bytes(bytes: &[u8; SLOT_LEN]) -> Self {
        Self(base32_encode(bytes))
    }

    /// A fresh random seed
    pub fn random() -> Self {
        let mut seed = [0u8; SLOT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        Self::from_bytes(&seed)
    }

    /// Parse a persisted or transmitted slot token
    pub fn parse(token: &str) -> Result<Self, SlotError> {
        let bytes = base32_decode(token.trim())?;
        if bytes.len() != SLOT_LEN {
            return Err(SlotError::WrongLength(bytes.len()));
        }
        // Re-encode so equality is independent of the sender's letter case
        Ok(Self(base32_encode(&bytes)))
    }

    /// `sha256(decode(self))`, re-encoded
    pub fn advance(&self) -> Slot {
        // Constructed only through from_bytes/parse, so decoding cannot fail
        let raw = base32_decode(&self.0).unwrap_or_default();
        let digest = Sha256::digest(&raw);
        let mut next = [0u8; SLOT_LEN];
        next.copy_from_slice(&digest);
        Slot::from_bytes(&next)
    }

    /// Walk forward `n` steps
    pub fn advance_by(&self, n: usize) -> Slot {
        (0..n).fold(self.clone(), |slot, _| slot.advance())
    }

    /// Iterate this slot followed by every successor
    pub fn sequence(&self) -> SlotSequence {
        SlotSequence {
            next: Some(self.clone()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unbounded iterator over a slot chain, starting with the seed itself
#[derive(Debug, Clone)]
pub struct SlotSequence {
    next: Option<Slot>,
}

impl Iterator for SlotSequence {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        let current = self.next.take()?;
        self.next = Some(current.advance());
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_base32_known_vector() {
        assert_eq!(base32_encode(b"foobar"), "MZXW6YTBOI");
        assert_eq!(base32_decode("MZXW6YTBOI").unwrap(), b"foobar");
        assert_eq!(base32_decode("mzxw6ytboi").unwrap(), b"foobar");
    }

    #[test]
    fn test_slot_token_length() {
        let slot = Slot::random();
        assert_eq!(slot.as_str().len(), 52);
        assert_eq!(Slot::parse(slot.as_str()).unwrap(), slot);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(Slot::parse("AB1"), Err(SlotError::InvalidEncoding(_))));
        assert_eq!(Slot::parse("MZXW6YTBOI"), Err(SlotError::WrongLength(6)));
    }

    #[test]
    fn test_advance_is_sha256_of_raw_bytes() {
        let seed = [7u8; SLOT_LEN];
        let slot = Slot::from_bytes(&seed);
        let expected: [u8; 32] = Sha256::digest(seed).into();
        assert_eq!(slot.advance(), Slot::from_bytes(&expected));
    }

    #[test]
    fn test_sequence_starts_at_seed() {
        let seed = Slot::random();
        let walked: Vec<Slot> = seed.sequence().take(3).collect();
        assert_eq!(walked[0], seed);
        assert_eq!(walked[1], seed.advance());
        assert_eq!(walked[2], seed.advance_by(2));
    }

    proptest! {
        #[test]
        fn prop_sequences_from_same_seed_agree(seed in proptest::array::uniform32(any::<u8>()), n in 1usize..40) {
            let a: Vec<Slot> = Slot::from_bytes(&seed).sequence().take(n).collect();
            let b: Vec<Slot> = Slot::from_bytes(&seed).sequence().take(n).collect();
            prop_assert_eq!(a, b);
        }
    }
}
