// Storage network client: the only way two parties ever talk
//
// The network is a key/value space that cannot push. Keys are strings:
// `SSK@<public>/<suffix>` is readable by anyone holding the public half and
// writable only through `SSKPRIV@<secret>/<suffix>`; `KSK@<name>` keys are
// chosen by hand and writable by anyone. `USK@` fetches resolve like `SSK@`.

pub mod directory;
pub mod memory;

pub use directory::DirectoryNetwork;
pub use memory::MemoryNetwork;

use crate::slots::{base32_decode, base32_encode};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

pub const PUBLIC_PREFIX: &str = "SSK@";
pub const PRIVATE_PREFIX: &str = "SSKPRIV@";
pub const UPDATABLE_PREFIX: &str = "USK@";
pub const KEYWORD_PREFIX: &str = "KSK@";

/// Domain separator for deriving the public half of a key pair
const SSK_CONTEXT: &[u8] = b"slotpost ssk v1";

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Invalid key {0:?}")]
    InvalidKey(String),
    #[error("Key collision: different data already stored under {0}")]
    Collision(String),
    #[error("Insert rejected: {0}")]
    InsertRejected(String),
    #[error("Network unavailable: {0}")]
    Unavailable(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A signed-subspace key pair, both halves ending in `/`
#[derive(Clone, PartialEq, Eq)]
pub struct SskKeyPair {
    pub pubkey: String,
    pub privkey: String,
}

impl fmt::Debug for SskKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SskKeyPair")
            .field("pubkey", &self.pubkey)
            .field("privkey", &"<redacted>")
            .finish()
    }
}

impl SskKeyPair {
    /// Generate a fresh random key pair
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut secret);
        let pair = Self {
            pubkey: format!("{}{}/", PUBLIC_PREFIX, public_body(&secret)),
            privkey: format!("{}{}/", PRIVATE_PREFIX, base32_encode(&secret)),
        };
        zeroize::Zeroize::zeroize(&mut secret);
        pair
    }

    /// The key body of the public half (between `SSK@` and `/`)
    pub fn public_body(&self) -> &str {
        self.pubkey
            .trim_start_matches(PUBLIC_PREFIX)
            .trim_end_matches('/')
    }
}

fn public_body(secret: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(SSK_CONTEXT);
    hasher.update(secret);
    base32_encode(&hasher.finalize())
}

/// The key under which data inserted at `key` becomes fetchable.
pub fn resolve_insert_key(key: &str) -> Result<String, NetworkError> {
    if let Some(rest) = key.strip_prefix(PRIVATE_PREFIX) {
        let (secret, suffix) = rest
            .split_once('/')
            .ok_or_else(|| NetworkError::InvalidKey(key.to_string()))?;
        let secret =
            base32_decode(secret).map_err(|_| NetworkError::InvalidKey(key.to_string()))?;
        return Ok(format!("{}{}/{}", PUBLIC_PREFIX, public_body(&secret), suffix));
    }
    if key.starts_with(PUBLIC_PREFIX) || key.starts_with(UPDATABLE_PREFIX) {
        return Err(NetworkError::InsertRejected(
            "cannot insert under a public key without its private half".to_string(),
        ));
    }
    if key.starts_with(KEYWORD_PREFIX) {
        return Ok(key.to_string());
    }
    Err(NetworkError::InvalidKey(key.to_string()))
}

/// Normalise a fetch key so `USK@` and `SSK@` address the same space
pub fn resolve_fetch_key(key: &str) -> Result<String, NetworkError> {
    if let Some(rest) = key.strip_prefix(UPDATABLE_PREFIX) {
        return Ok(format!("{}{}", PUBLIC_PREFIX, rest));
    }
    if key.starts_with(PUBLIC_PREFIX) || key.starts_with(KEYWORD_PREFIX) {
        return Ok(key.to_string());
    }
    if key.starts_with(PRIVATE_PREFIX) {
        return resolve_insert_key(key);
    }
    Err(NetworkError::InvalidKey(key.to_string()))
}

/// Blocking client for the storage network.
///
/// Implementations own transport-level timeouts and retries; the protocol
/// only sees "found", "absent", "inserted" or an error.
#[cfg_attr(test, mockall::automock)]
pub trait NetworkClient: Send + Sync {
    /// Fetch the blob stored under `key`, `None` if nothing is there (yet)
    fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, NetworkError>;

    /// Insert `data` under `key`
    fn insert(&self, data: &[u8], key: &str, priority: u8, extra: &str)
        -> Result<(), NetworkError>;

    /// Create a fresh signed-subspace key pair
    fn generate_key_pair(&self) -> Result<SskKeyPair, NetworkError>;
}
