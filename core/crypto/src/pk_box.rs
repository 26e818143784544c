//! Public-key authenticated encryption.
//!
//! The box key is the blake2b hash of the X25519 shared secret, so either
//! party can open what the other sealed. Sealing then uses the secret box.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::aead;
use crate::keys::{PrivateKey, PublicKey, KEY_LENGTH};
use crate::message::CipherWithNonce;
use lockbox_common::{Error, Result};

fn box_key(
    their_public: &PublicKey,
    my_private: &PrivateKey,
) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
    let secret = StaticSecret::from(*my_private.as_bytes());
    let shared = secret.diffie_hellman(&X25519PublicKey::from(*their_public.as_bytes()));

    // A low-order public key forces an all-zero shared secret.
    if !shared.was_contributory() {
        return Err(Error::Crypto("Non-contributory public key".to_string()));
    }

    let mut hasher = Blake2b::<U32>::new();
    hasher.update(shared.as_bytes());
    hasher.update(b"lockbox-box");

    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    key.copy_from_slice(&hasher.finalize());
    Ok(key)
}

/// Encrypt `message` from the holder of `my_private` to the holder of the
/// private key behind `their_public`.
pub fn encrypt_box(
    message: &[u8],
    their_public: &PublicKey,
    my_private: &PrivateKey,
) -> Result<CipherWithNonce> {
    let key = box_key(their_public, my_private)?;
    aead::seal(&key[..], message)
}

/// Decrypt a box sealed by the holder of the private key behind
/// `their_public`.
///
/// # Errors
/// - Returns `TamperDetected` if the box does not authenticate
pub fn decrypt_box(
    message: &CipherWithNonce,
    their_public: &PublicKey,
    my_private: &PrivateKey,
) -> Result<Vec<u8>> {
    let key = box_key(their_public, my_private)?;
    aead::open(&key[..], message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox_common::ErrorKind;

    #[test]
    fn test_box_roundtrip() {
        let alice = PrivateKey::generate();
        let bob = PrivateKey::generate();

        let sealed = encrypt_box(b"for bob", &bob.public_key(), &alice).unwrap();
        let opened = decrypt_box(&sealed, &alice.public_key(), &bob).unwrap();

        assert_eq!(opened, b"for bob");
    }

    #[test]
    fn test_box_wrong_recipient() {
        let alice = PrivateKey::generate();
        let bob = PrivateKey::generate();
        let eve = PrivateKey::generate();

        let sealed = encrypt_box(b"for bob", &bob.public_key(), &alice).unwrap();
        let err = decrypt_box(&sealed, &alice.public_key(), &eve).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TamperDetected);
    }

    #[test]
    fn test_box_rejects_zero_public_key() {
        let alice = PrivateKey::generate();
        let err = encrypt_box(b"x", &PublicKey([0u8; KEY_LENGTH]), &alice).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CryptoFailure);
    }
}
