//! Detached Ed25519 signatures.

use ed25519_dalek::{Signature as Ed25519Signature, Signer, Verifier};

use crate::keys::{SigningKey, VerifyingKey};

/// Length of a detached signature in bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// Detached Ed25519 signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_LENGTH]);

impl Signature {
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }
}

/// Sign `message` with `signing_key`.
pub fn sign(message: &[u8], signing_key: &SigningKey) -> Signature {
    let key = ed25519_dalek::SigningKey::from_bytes(signing_key.as_bytes());
    Signature(key.sign(message).to_bytes())
}

/// Verify a detached signature.
///
/// Takes raw bytes so that malformed input from the wire (wrong lengths, an
/// invalid curve point) is simply reported as `false`.
pub fn verify(signature: &[u8], message: &[u8], public_key: &[u8]) -> bool {
    let Ok(signature) = <[u8; SIGNATURE_LENGTH]>::try_from(signature) else {
        return false;
    };
    let Ok(public_key) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(&public_key) else {
        return false;
    };

    key.verify(message, &Ed25519Signature::from_bytes(&signature))
        .is_ok()
}

/// Verify against a typed key.
pub fn verify_with(signature: &Signature, message: &[u8], public_key: &VerifyingKey) -> bool {
    verify(signature.as_bytes(), message, public_key.as_bytes())
}
