//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305,
};

use crate::keys::KEY_LENGTH;
use crate::message::CipherWithNonce;
use lockbox_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

fn cipher_for(key: &[u8]) -> Result<XChaCha20Poly1305> {
    if key.len() != KEY_LENGTH {
        return Err(Error::Crypto(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Ok(XChaCha20Poly1305::new(GenericArray::from_slice(key)))
}

/// Encrypt plaintext using XChaCha20-Poly1305.
///
/// # Preconditions
/// - `key` must be exactly KEY_LENGTH bytes
/// - `plaintext` can be any size
///
/// # Postconditions
/// - Returns nonce || ciphertext || tag
/// - The nonce is randomly generated
///
/// # Errors
/// - Returns `Crypto` if key length is incorrect or encryption fails
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let sealed = seal(key, plaintext)?;

    let mut result = Vec::with_capacity(NONCE_SIZE + sealed.cipher().len());
    result.extend_from_slice(sealed.nonce());
    result.extend_from_slice(sealed.cipher());

    Ok(result)
}

/// Decrypt output of [`encrypt`].
///
/// # Errors
/// - Returns `Crypto` if key length is incorrect
/// - Returns `TamperDetected` if the input is too short to hold a nonce and
///   tag, or if authentication fails (tampered data or wrong key)
pub fn decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::TamperDetected("Ciphertext too short".to_string()));
    }

    let (nonce_bytes, encrypted) = ciphertext.split_at(NONCE_SIZE);

    cipher
        .decrypt(GenericArray::from_slice(nonce_bytes), encrypted)
        .map_err(|_| Error::TamperDetected("Decryption failed".to_string()))
}

/// Secret box: encrypt under a fresh random nonce, keeping the nonce apart
/// from the ciphertext.
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<CipherWithNonce> {
    let cipher = cipher_for(key)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(&nonce);
    Ok(CipherWithNonce::new(ciphertext, nonce_bytes))
}

/// Open a secret box produced by [`seal`].
///
/// # Errors
/// - Returns `TamperDetected` if authentication fails
pub fn open(key: &[u8], message: &CipherWithNonce) -> Result<Vec<u8>> {
    decrypt_with_nonce(key, message.nonce(), &[], message.cipher())
}

/// Encrypt plaintext with a specific nonce and associated data.
///
/// # Warning
/// Using the same nonce twice with the same key completely breaks security.
/// Only the chunked stream uses this, with nonces built from a random prefix
/// and a counter.
pub fn encrypt_with_nonce(
    key: &[u8],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    cipher
        .encrypt(
            GenericArray::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))
}

/// Decrypt ciphertext with a specific nonce and associated data.
pub fn decrypt_with_nonce(
    key: &[u8],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    if ciphertext.len() < TAG_SIZE {
        return Err(Error::TamperDetected("Ciphertext too short".to_string()));
    }

    cipher
        .decrypt(
            GenericArray::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| Error::TamperDetected("Decryption failed".to_string()))
}
