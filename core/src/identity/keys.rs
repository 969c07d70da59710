// Long-term identity keys

use anyhow::Result;
use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

/// Ed25519 signature length
pub const SIGNATURE_LEN: usize = 64;

/// Identity keys (signing; the same key decrypts sealed handshakes)
#[derive(Clone)]
pub struct IdentityKeys {
    pub signing_key: SigningKey,
}

impl IdentityKeys {
    /// Generate new identity keys
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut secret_key_bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut secret_key_bytes);
        let signing_key = SigningKey::from_bytes(&secret_key_bytes);
        secret_key_bytes.zeroize();
        Self { signing_key }
    }

    /// Raw public key bytes
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Get public key as hex
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key())
    }

    /// Get identity ID (Blake3 hash of public key), for display
    pub fn identity_id(&self) -> String {
        hex::encode(blake3::hash(&self.public_key()).as_bytes())
    }

    /// Sign the SHA-256 digest of `data`
    pub fn sign_digest(&self, data: &[u8]) -> Vec<u8> {
        let digest = Sha256::digest(data);
        self.signing_key.sign(&digest).to_bytes().to_vec()
    }

    /// Verify a signature made by `sign_digest`
    pub fn verify_digest(data: &[u8], signature: &[u8], public_key: &[u8]) -> Result<bool> {
        let verifying_key = VerifyingKey::from_bytes(
            public_key
                .try_into()
                .map_err(|_| anyhow::anyhow!("Invalid public key"))?,
        )?;

        let sig = Ed25519Signature::from_bytes(
            signature
                .try_into()
                .map_err(|_| anyhow::anyhow!("Invalid signature"))?,
        );

        let digest = Sha256::digest(data);
        Ok(verifying_key.verify(&digest, &sig).is_ok())
    }

    /// Serialize keys to bytes.
    /// Returns a `Zeroizing<Vec<u8>>` that wipes the secret on drop.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.signing_key.to_bytes().to_vec())
    }

    /// Deserialize keys from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let signing_key = SigningKey::from_bytes(
            bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("Invalid key bytes"))?,
        );
        Ok(Self { signing_key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let keys = IdentityKeys::generate();
        assert_eq!(keys.public_key_hex().len(), 64);
        assert_eq!(keys.identity_id().len(), 64);
    }

    #[test]
    fn test_digest_signing() {
        let keys = IdentityKeys::generate();
        let data = b"commssk=SSK@abc/\r\n\r\n";

        let signature = keys.sign_digest(data);
        assert_eq!(signature.len(), SIGNATURE_LEN);

        assert!(IdentityKeys::verify_digest(data, &signature, &keys.public_key()).unwrap());
        assert!(!IdentityKeys::verify_digest(b"tampered", &signature, &keys.public_key()).unwrap());
    }

    #[test]
    fn test_verify_rejects_bad_lengths() {
        let keys = IdentityKeys::generate();
        assert!(IdentityKeys::verify_digest(b"x", &[0u8; 10], &keys.public_key()).is_err());
        assert!(IdentityKeys::verify_digest(b"x", &[0u8; 64], &[0u8; 3]).is_err());
    }

    #[test]
    fn test_serialization() {
        let keys = IdentityKeys::generate();
        let restored = IdentityKeys::from_bytes(&keys.to_bytes()).unwrap();
        assert_eq!(keys.public_key_hex(), restored.public_key_hex());
    }
}
