// Cryptography module: handshake envelope encryption

pub mod chained;
pub mod encrypt;

pub use encrypt::{
    validate_ed25519_public_key, AsymmetricBlockCipher, BlockOpener, BlockSealer, BLOCK_SIZE,
};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid Ed25519 public key")]
    InvalidPublicKey,
    #[error("Block too large: {actual} bytes (max {max})")]
    BlockTooLarge { max: usize, actual: usize },
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,
}
