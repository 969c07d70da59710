// Asymmetric block primitive: X25519 ECDH + XChaCha20-Poly1305 per block
//
// Seal one block:
// 1. Convert recipient's Ed25519 public key → X25519 public key
// 2. Generate ephemeral X25519 keypair
// 3. ECDH: ephemeral_secret × recipient_x25519_public → shared_secret
// 4. KDF: Blake3::derive_key(shared_secret) → symmetric_key
// 5. Encrypt: XChaCha20-Poly1305(symmetric_key, random_nonce, block)
// 6. Output: ephemeral_pub (32) ‖ nonce (24) ‖ ciphertext+tag
//
// Open reverses it with the recipient's Ed25519 signing key converted to an
// X25519 static secret. Blocks are bounded in size; longer payloads go
// through `chained`.

use super::CryptoError;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use ed25519_dalek::SigningKey;
use rand::RngCore;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

/// KDF context string for deriving block keys from ECDH shared secrets.
/// Changing this breaks compatibility with every RTS in flight.
const KDF_CONTEXT: &str = "slotpost v1 rts block encryption";

/// Largest plaintext accepted by one block
pub const BLOCK_SIZE: usize = 256;

/// Bytes added to each block: ephemeral key, nonce, Poly1305 tag
pub const BLOCK_OVERHEAD: usize = 32 + 24 + 16;

/// A primitive asymmetric cipher with a bounded block size
pub trait AsymmetricBlockCipher {
    /// Largest input `process_block` accepts
    fn input_block_size(&self) -> usize;
    /// Output size for a full input block
    fn output_block_size(&self) -> usize;
    fn process_block(&self, block: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Convert an Ed25519 signing key to an X25519 static secret for ECDH.
///
/// Ed25519 and X25519 share Curve25519; the scalar is the clamped first
/// half of SHA-512(secret), which x25519-dalek clamps itself.
fn ed25519_to_x25519_secret(signing_key: &SigningKey) -> StaticSecret {
    let mut hash = <sha2::Sha512 as sha2::Digest>::digest(signing_key.to_bytes());
    let mut secret_bytes = [0u8; 32];
    secret_bytes.copy_from_slice(&hash[..32]);

    let secret = StaticSecret::from(secret_bytes);

    secret_bytes.zeroize();
    hash.as_mut_slice().zeroize();

    secret
}

/// Convert an Ed25519 verifying (public) key to an X25519 public key via the
/// Edwards → Montgomery map.
fn ed25519_public_to_x25519(public_key_bytes: &[u8; 32]) -> Result<X25519PublicKey, CryptoError> {
    use curve25519_dalek::edwards::CompressedEdwardsY;

    let compressed = CompressedEdwardsY::from_slice(public_key_bytes)
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let edwards_point = compressed
        .decompress()
        .ok_or(CryptoError::InvalidPublicKey)?;

    Ok(X25519PublicKey::from(edwards_point.to_montgomery().to_bytes()))
}

fn derive_key(shared_secret: &[u8]) -> [u8; 32] {
    blake3::derive_key(KDF_CONTEXT, shared_secret)
}

/// Encrypting side: seals blocks for one recipient
pub struct BlockSealer {
    recipient: X25519PublicKey,
}

impl BlockSealer {
    /// `recipient_public_key` is the recipient's Ed25519 public key
    pub fn new(recipient_public_key: &[u8; 32]) -> Result<Self, CryptoError> {
        Ok(Self {
            recipient: ed25519_public_to_x25519(recipient_public_key)?,
        })
    }
}

impl AsymmetricBlockCipher for BlockSealer {
    fn input_block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn output_block_size(&self) -> usize {
        BLOCK_SIZE + BLOCK_OVERHEAD
    }

    fn process_block(&self, block: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if block.len() > BLOCK_SIZE {
            return Err(CryptoError::BlockTooLarge {
                max: BLOCK_SIZE,
                actual: block.len(),
            });
        }

        let ephemeral_secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
        let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);
        let shared_secret = ephemeral_secret.diffie_hellman(&self.recipient);
        let mut symmetric_key = derive_key(shared_secret.as_bytes());

        let mut nonce_bytes = [0u8; 24];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let cipher = XChaCha20Poly1305::new_from_slice(&symmetric_key)
            .map_err(|_| CryptoError::EncryptionFailed)?;
        symmetric_key.zeroize();

        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce_bytes), block)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(BLOCK_OVERHEAD + block.len());
        out.extend_from_slice(ephemeral_public.as_bytes());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }
}

/// Decrypting side: opens blocks sealed for our identity key
pub struct BlockOpener {
    secret: StaticSecret,
}

impl BlockOpener {
    pub fn new(recipient_signing_key: &SigningKey) -> Self {
        Self {
            secret: ed25519_to_x25519_secret(recipient_signing_key),
        }
    }
}

impl AsymmetricBlockCipher for BlockOpener {
    fn input_block_size(&self) -> usize {
        BLOCK_SIZE + BLOCK_OVERHEAD
    }

    fn output_block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn process_block(&self, block: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if block.len() < BLOCK_OVERHEAD || block.len() > BLOCK_SIZE + BLOCK_OVERHEAD {
            return Err(CryptoError::DecryptionFailed);
        }

        let mut ephemeral_bytes = [0u8; 32];
        ephemeral_bytes.copy_from_slice(&block[..32]);
        let ephemeral_public = X25519PublicKey::from(ephemeral_bytes);
        let nonce = XNonce::from_slice(&block[32..56]);

        let shared_secret = self.secret.diffie_hellman(&ephemeral_public);
        let mut symmetric_key = derive_key(shared_secret.as_bytes());
        let cipher = XChaCha20Poly1305::new_from_slice(&symmetric_key)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        symmetric_key.zeroize();

        cipher
            .decrypt(nonce, &block[56..])
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

/// Check that bytes are a usable Ed25519 public key for sealing
pub fn validate_ed25519_public_key(public_key_bytes: &[u8]) -> Result<[u8; 32], CryptoError> {
    let bytes: [u8; 32] = public_key_bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    ed25519_public_to_x25519(&bytes)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityKeys;

    #[test]
    fn test_block_roundtrip() {
        let bob = IdentityKeys::generate();
        let bob_public = bob.signing_key.verifying_key().to_bytes();

        let sealer = BlockSealer::new(&bob_public).unwrap();
        let sealed = sealer.process_block(b"one block of text").unwrap();
        assert_eq!(sealed.len(), BLOCK_OVERHEAD + 17);

        let opened = BlockOpener::new(&bob.signing_key)
            .process_block(&sealed)
            .unwrap();
        assert_eq!(opened, b"one block of text");
    }

    #[test]
    fn test_wrong_recipient_cannot_open() {
        let bob = IdentityKeys::generate();
        let eve = IdentityKeys::generate();
        let sealer = BlockSealer::new(&bob.signing_key.verifying_key().to_bytes()).unwrap();
        let sealed = sealer.process_block(b"secret").unwrap();

        assert!(BlockOpener::new(&eve.signing_key).process_block(&sealed).is_err());
    }

    #[test]
    fn test_oversized_block_rejected() {
        let bob = IdentityKeys::generate();
        let sealer = BlockSealer::new(&bob.signing_key.verifying_key().to_bytes()).unwrap();
        assert!(matches!(
            sealer.process_block(&[0u8; BLOCK_SIZE + 1]),
            Err(CryptoError::BlockTooLarge { .. })
        ));
    }

    #[test]
    fn test_validate_public_key_length() {
        assert!(validate_ed25519_public_key(&[1u8; 31]).is_err());
        let keys = IdentityKeys::generate();
        assert!(validate_ed25519_public_key(&keys.signing_key.verifying_key().to_bytes()).is_ok());
    }
}
