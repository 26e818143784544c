//! Encrypted configuration blobs.
//!
//! A blob file is `nonce(24) || ciphertext || tag(16)`, one secret-box
//! encryption of the UTF-8 plaintext. Saving replaces the whole file.

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;
use zeroize::Zeroizing;

use crate::derivation::write_atomic;
use lockbox_common::{Error, Result};
use lockbox_crypto::{aead, SecretKey};

/// Reads and writes one encrypted blob file.
#[derive(Debug, Clone)]
pub struct ConfigBlobCodec {
    path: PathBuf,
}

impl ConfigBlobCodec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Encrypt `plaintext` under `key` and replace the blob file.
    pub fn save(&self, plaintext: &str, key: &SecretKey) -> Result<()> {
        let sealed = aead::encrypt(key.as_bytes(), plaintext.as_bytes())?;
        write_atomic(&self.path, &sealed).map_err(|e| e.in_storage("Saving config blob"))?;
        debug!(path = %self.path.display(), "Saved config blob");
        Ok(())
    }

    /// Decrypt the blob file.
    ///
    /// # Errors
    /// - `NotFound` if the file does not exist
    /// - `TamperDetected` if any byte of the file was altered or `key` is wrong
    /// - `Format` if the authenticated plaintext is not UTF-8
    pub fn load(&self, key: &SecretKey) -> Result<String> {
        let sealed = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "No config blob at {}",
                    self.path.display()
                )))
            }
            Err(e) => return Err(Error::from(e).in_storage("Loading config blob")),
        };

        let plaintext = Zeroizing::new(aead::decrypt(key.as_bytes(), &sealed)?);
        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| Error::Format("Config blob is not valid UTF-8".to_string()))?;
        debug!(path = %self.path.display(), "Loaded config blob");
        Ok(text.to_string())
    }

    /// Delete the blob file. Returns whether it existed.
    pub fn delete(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Deleted config blob");
                Ok(true)
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::from(e).in_storage("Deleting config blob")),
        }
    }
}
