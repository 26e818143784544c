//! Cryptographic primitives for Lockbox.
//!
//! This module provides:
//! - Authenticated secret-key encryption using XChaCha20-Poly1305
//! - A public-key box over X25519 and detached Ed25519 signatures
//! - Key derivation using Argon2id
//! - Chunked stream encryption and the versioned encrypted-file format
//!
//! # Security Guarantees
//! - All secret key material is zeroized on drop
//! - No plaintext or key material is ever logged
//! - Any modification of sealed data is reported as `TamperDetected`

pub mod aead;
pub mod file;
pub mod kdf;
pub mod keys;
pub mod message;
pub mod pk_box;
pub mod sign;
pub mod stream;

pub use aead::{decrypt, encrypt, open, seal};
pub use file::{decrypt_bytes, encrypt_bytes, FileCodec, FileVersion, BLOCK_SIZE};
pub use kdf::{derive_key, KdfParams};
pub use keys::{PrivateKey, PublicKey, Salt, SecretKey, SigningKey, VerifyingKey};
pub use message::CipherWithNonce;
pub use pk_box::{decrypt_box, encrypt_box};
pub use sign::{sign, verify, Signature};
pub use stream::{ChunkTag, DecryptingStream, EncryptingStream};
