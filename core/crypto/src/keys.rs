//! Key types with secure memory handling.
//!
//! All secret key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use lockbox_common::{Error, Result};

/// Length of symmetric and curve keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of a KDF salt in bytes.
pub const SALT_LENGTH: usize = 32;

fn random_array<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Fill a fresh buffer with `len` random bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Symmetric key for the secret box, the stream cipher and vault entries.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    key: [u8; KEY_LENGTH],
}

impl SecretKey {
    /// Create a secret key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Create a secret key from a slice.
    ///
    /// # Errors
    /// - Returns `Crypto` if the slice is not exactly KEY_LENGTH bytes
    pub fn from_slice(key: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LENGTH] = key.try_into().map_err(|_| {
            Error::Crypto(format!(
                "Invalid key length: expected {}, got {}",
                KEY_LENGTH,
                key.len()
            ))
        })?;
        Ok(Self { key })
    }

    /// Generate a random secret key.
    pub fn generate() -> Self {
        Self {
            key: random_array(),
        }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Derive a purpose-bound subkey.
    ///
    /// Uses blake2b over the key and a context label.
    pub fn derive_subkey(&self, context: &[u8]) -> SecretKey {
        use blake2::digest::consts::U32;
        use blake2::{Blake2b, Digest};

        let mut hasher = Blake2b::<U32>::new();
        hasher.update(self.key);
        hasher.update(context);
        hasher.update(b"subkey");

        let result = hasher.finalize();
        let mut derived = [0u8; KEY_LENGTH];
        derived.copy_from_slice(&result);
        SecretKey::from_bytes(derived)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// X25519 private key for the public-key box.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    key: [u8; KEY_LENGTH],
}

impl PrivateKey {
    /// Generate a random private key.
    pub fn generate() -> Self {
        Self {
            key: random_array(),
        }
    }

    /// Create a private key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Compute the matching public key.
    pub fn public_key(&self) -> PublicKey {
        let secret = x25519_dalek::StaticSecret::from(self.key);
        PublicKey(*x25519_dalek::PublicKey::from(&secret).as_bytes())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

/// X25519 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; KEY_LENGTH]);

impl PublicKey {
    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

/// Ed25519 signing key (the 32-byte seed).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningKey {
    seed: [u8; KEY_LENGTH],
}

impl SigningKey {
    /// Generate a random signing key.
    pub fn generate() -> Self {
        Self {
            seed: random_array(),
        }
    }

    /// Create a signing key from its seed.
    pub fn from_bytes(seed: [u8; KEY_LENGTH]) -> Self {
        Self { seed }
    }

    /// Get the seed bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.seed
    }

    /// Compute the matching verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        let signing = ed25519_dalek::SigningKey::from_bytes(&self.seed);
        VerifyingKey(signing.verifying_key().to_bytes())
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKey([REDACTED])")
    }
}

/// Ed25519 public verifying key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyingKey(pub [u8; KEY_LENGTH]);

impl VerifyingKey {
    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(pub [u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        Self(random_array())
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}
