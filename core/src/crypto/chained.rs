// Chained asymmetric block cipher
//
// The primitive only takes one bounded block. Longer plaintexts are split
// into input-size blocks and, before block i > 0 is encrypted, it is XORed
// with the leading bytes of ciphertext block i - 1. Decryption walks the
// same chain in order. Every ciphertext block except the last has the
// primitive's full output size, which is how the reader finds boundaries.

use super::encrypt::AsymmetricBlockCipher;
use super::CryptoError;

fn xor_with(block: &mut [u8], previous: &[u8]) {
    for (byte, mask) in block.iter_mut().zip(previous) {
        *byte ^= mask;
    }
}

/// Encrypt `plaintext` block by block with chaining
pub fn encrypt(
    cipher: &impl AsymmetricBlockCipher,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let in_size = cipher.input_block_size();
    let mut out = Vec::new();
    let mut previous: Option<Vec<u8>> = None;

    for chunk in plaintext.chunks(in_size) {
        let mut block = chunk.to_vec();
        if let Some(prev) = &previous {
            xor_with(&mut block, prev);
        }
        let sealed = cipher.process_block(&block)?;
        out.extend_from_slice(&sealed);
        previous = Some(sealed);
    }

    Ok(out)
}

/// Reverse `encrypt`. `cipher` is the decrypting engine, whose input block
/// size equals the encrypting engine's output block size.
pub fn decrypt(
    cipher: &impl AsymmetricBlockCipher,
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let in_size = cipher.input_block_size();
    let mut out = Vec::with_capacity(ciphertext.len());
    let mut previous: Option<&[u8]> = None;

    for chunk in ciphertext.chunks(in_size) {
        let mut block = cipher.process_block(chunk)?;
        if let Some(prev) = previous {
            xor_with(&mut block, prev);
        }
        out.extend_from_slice(&block);
        previous = Some(chunk);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encrypt::{BlockOpener, BlockSealer, BLOCK_OVERHEAD, BLOCK_SIZE};
    use crate::identity::IdentityKeys;

    /// Reversible toy cipher: adds one to every byte, fixed 4-byte blocks
    struct Shift;

    impl AsymmetricBlockCipher for Shift {
        fn input_block_size(&self) -> usize {
            4
        }
        fn output_block_size(&self) -> usize {
            4
        }
        fn process_block(&self, block: &[u8]) -> Result<Vec<u8>, CryptoError> {
            Ok(block.iter().map(|b| b.wrapping_add(1)).collect())
        }
    }

    struct Unshift;

    impl AsymmetricBlockCipher for Unshift {
        fn input_block_size(&self) -> usize {
            4
        }
        fn output_block_size(&self) -> usize {
            4
        }
        fn process_block(&self, block: &[u8]) -> Result<Vec<u8>, CryptoError> {
            Ok(block.iter().map(|b| b.wrapping_sub(1)).collect())
        }
    }

    #[test]
    fn test_chain_feeds_previous_ciphertext_forward() {
        // Identical plaintext blocks must not give identical ciphertext blocks
        let ct = encrypt(&Shift, &[0, 0, 0, 0, 0, 0, 0, 0, 9]).unwrap();
        assert_eq!(&ct[..4], &[1, 1, 1, 1]);
        assert_eq!(&ct[4..8], &[2, 2, 2, 2]);
        assert_eq!(&ct[8..], &[(9 ^ 2) + 1]);
        assert_eq!(decrypt(&Unshift, &ct).unwrap(), vec![0, 0, 0, 0, 0, 0, 0, 0, 9]);
    }

    #[test]
    fn test_empty_plaintext() {
        assert!(encrypt(&Shift, &[]).unwrap().is_empty());
        assert!(decrypt(&Unshift, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_multi_block_sealed_roundtrip() {
        let bob = IdentityKeys::generate();
        let sealer = BlockSealer::new(&bob.signing_key.verifying_key().to_bytes()).unwrap();
        let plaintext: Vec<u8> = (0..(BLOCK_SIZE * 2 + 10)).map(|i| i as u8).collect();

        let ct = encrypt(&sealer, &plaintext).unwrap();
        assert_eq!(ct.len(), plaintext.len() + 3 * BLOCK_OVERHEAD);

        let pt = decrypt(&BlockOpener::new(&bob.signing_key), &ct).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn test_reordered_blocks_fail() {
        let bob = IdentityKeys::generate();
        let sealer = BlockSealer::new(&bob.signing_key.verifying_key().to_bytes()).unwrap();
        let plaintext = vec![7u8; BLOCK_SIZE * 2];
        let ct = encrypt(&sealer, &plaintext).unwrap();

        let full = BLOCK_SIZE + BLOCK_OVERHEAD;
        let mut swapped = ct[full..].to_vec();
        swapped.extend_from_slice(&ct[..full]);
        let pt = decrypt(&BlockOpener::new(&bob.signing_key), &swapped).unwrap();
        assert_ne!(pt, plaintext);
    }
}
