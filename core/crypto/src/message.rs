//! Ciphertext paired with the nonce it was sealed under.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use crate::aead::NONCE_SIZE;
use lockbox_common::{Error, Result};

/// Output of the secret box and the public-key box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherWithNonce {
    cipher: Vec<u8>,
    nonce: [u8; NONCE_SIZE],
}

impl CipherWithNonce {
    /// Pair a ciphertext with its nonce.
    pub fn new(cipher: Vec<u8>, nonce: [u8; NONCE_SIZE]) -> Self {
        Self { cipher, nonce }
    }

    /// Ciphertext including the authentication tag.
    pub fn cipher(&self) -> &[u8] {
        &self.cipher
    }

    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    /// Encode as `<base64url cipher>.<base64url nonce>`, unpadded.
    pub fn to_message(&self) -> String {
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&self.cipher),
            URL_SAFE_NO_PAD.encode(self.nonce)
        )
    }

    /// Decode the text form produced by [`CipherWithNonce::to_message`].
    ///
    /// # Errors
    /// - Returns `InvalidArgument` if the separator is missing, either part is
    ///   not base64url, or the nonce has the wrong length
    pub fn decode(message: &str) -> Result<Self> {
        let (cipher, nonce) = message
            .split_once('.')
            .ok_or_else(|| Error::InvalidArgument("Can't decode ciphertext".to_string()))?;

        let cipher = URL_SAFE_NO_PAD
            .decode(cipher)
            .map_err(|e| Error::InvalidArgument(format!("Invalid ciphertext encoding: {}", e)))?;
        let nonce = URL_SAFE_NO_PAD
            .decode(nonce)
            .map_err(|e| Error::InvalidArgument(format!("Invalid nonce encoding: {}", e)))?;
        let nonce: [u8; NONCE_SIZE] = nonce.try_into().map_err(|n: Vec<u8>| {
            Error::InvalidArgument(format!(
                "Invalid nonce length: expected {}, got {}",
                NONCE_SIZE,
                n.len()
            ))
        })?;

        Ok(Self { cipher, nonce })
    }
}
