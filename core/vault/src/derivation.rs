//! Device-bound protection passphrase for the keystore container.
//!
//! A random seed is written once per installation, next to a small
//! parameters record holding the salt, round count and memory cost. The
//! passphrase is Argon2id over the seed with those parameters, so it is
//! stable for the life of the installation and never stored anywhere.
//!
//! The seed is kept on disk with adjacent bytes swapped. This only keeps
//! the raw buffer from being read off the disk at a glance; its strength
//! comes from the seed's entropy and the KDF.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::config::DerivationParams;
use lockbox_common::{Error, Result};
use lockbox_crypto::kdf::{derive_bytes, KdfParams};
use lockbox_crypto::keys::random_bytes;

/// Size of the seed buffer in bytes.
pub const SEED_LENGTH: usize = 65;

/// Size of the salt in bytes.
pub const SEED_SALT_LENGTH: usize = 32;

/// Size of the derived passphrase before encoding.
pub const PASSPHRASE_LENGTH: usize = 32;

/// Swap every adjacent pair of bytes in place.
///
/// Applying it twice restores the input. An odd trailing byte is left alone.
pub fn swap_pairs(buf: &mut [u8]) {
    for pair in buf.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}

/// Companion record stored next to the seed.
#[derive(Serialize, Deserialize)]
struct SeedParams {
    rounds: u32,
    memory_cost: u32,
    parallelism: u32,
    salt: String,
}

impl SeedParams {
    fn kdf(&self) -> KdfParams {
        KdfParams {
            memory_cost: self.memory_cost,
            time_cost: self.rounds,
            parallelism: self.parallelism,
        }
    }
}

/// Write `bytes` to `path`, replacing it atomically.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Derives the keystore protection passphrase from the installation seed.
#[derive(Debug, Clone)]
pub struct ProtectionSecretDerivation {
    dir: PathBuf,
    params: DerivationParams,
}

impl ProtectionSecretDerivation {
    /// Keep seed records in `dir`, creating new ones with `params`.
    pub fn new(dir: impl Into<PathBuf>, params: DerivationParams) -> Self {
        Self {
            dir: dir.into(),
            params,
        }
    }

    fn seed_path(&self, context: &str) -> PathBuf {
        self.dir.join(context)
    }

    fn params_path(&self, context: &str) -> PathBuf {
        self.dir.join(format!("{}.params.json", context))
    }

    /// Derive the passphrase for the seed record named `context`.
    ///
    /// Creates the seed and its parameters on first use.
    ///
    /// # Errors
    /// - `Storage` if a record cannot be read or written, if the seed exists
    ///   without its parameters record, or if either record is malformed
    pub fn derive(&self, context: &str) -> Result<Zeroizing<String>> {
        let seed_path = self.seed_path(context);
        let (seed, params) = if seed_path.exists() {
            self.read(context)?
        } else {
            self.create(context)?
        };

        // The KDF input is the encoded seed.
        let input = Zeroizing::new(URL_SAFE_NO_PAD.encode(&seed[..]));
        let salt = Zeroizing::new(
            URL_SAFE_NO_PAD
                .decode(&params.salt)
                .map_err(|e| Error::Storage(format!("Malformed seed parameters: {}", e)))?,
        );

        let output = derive_bytes(input.as_bytes(), &salt, &params.kdf(), PASSPHRASE_LENGTH)?;
        Ok(Zeroizing::new(URL_SAFE_NO_PAD.encode(&output[..])))
    }

    fn create(&self, context: &str) -> Result<(Zeroizing<Vec<u8>>, SeedParams)> {
        let rounds = rand::thread_rng().gen_range(self.params.min_rounds..=self.params.max_rounds);
        let params = SeedParams {
            rounds,
            memory_cost: self.params.memory_cost,
            parallelism: self.params.parallelism,
            salt: URL_SAFE_NO_PAD.encode(random_bytes(SEED_SALT_LENGTH)),
        };
        let json = serde_json::to_vec(&params).map_err(|e| Error::Serialization(e.to_string()))?;

        let seed = Zeroizing::new(random_bytes(SEED_LENGTH));
        let mut stored = Zeroizing::new(seed.to_vec());
        swap_pairs(&mut stored);

        // Parameters first: a seed on disk always has its companion record.
        write_atomic(&self.params_path(context), &json)
            .map_err(|e| e.in_storage("Writing seed parameters"))?;
        write_atomic(&self.seed_path(context), &stored)
            .map_err(|e| e.in_storage("Writing seed"))?;

        info!(record = context, "Created protection seed");
        Ok((seed, params))
    }

    fn read(&self, context: &str) -> Result<(Zeroizing<Vec<u8>>, SeedParams)> {
        let mut seed = Zeroizing::new(
            fs::read(self.seed_path(context))
                .map_err(|e| Error::from(e).in_storage("Reading seed"))?,
        );
        if seed.len() != SEED_LENGTH {
            return Err(Error::Storage(format!(
                "Invalid seed record: expected {} bytes, got {}",
                SEED_LENGTH,
                seed.len()
            )));
        }
        swap_pairs(&mut seed);

        let params_path = self.params_path(context);
        if !params_path.exists() {
            return Err(Error::Storage(
                "Seed parameters record is missing".to_string(),
            ));
        }
        let json = fs::read(&params_path)
            .map_err(|e| Error::from(e).in_storage("Reading seed parameters"))?;
        let params: SeedParams = serde_json::from_slice(&json)
            .map_err(|e| Error::Storage(format!("Malformed seed parameters: {}", e)))?;

        debug!(record = context, "Loaded protection seed");
        Ok((seed, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox_common::ErrorKind;
    use tempfile::TempDir;

    fn fast() -> DerivationParams {
        DerivationParams {
            memory_cost: 64,
            parallelism: 1,
            min_rounds: 1,
            max_rounds: 3,
        }
    }

    #[test]
    fn test_swap_pairs_is_involution() {
        let original: Vec<u8> = (0..SEED_LENGTH as u8).collect();
        let mut buf = original.clone();

        swap_pairs(&mut buf);
        assert_eq!(&buf[..4], &[1, 0, 3, 2]);
        assert_eq!(buf[SEED_LENGTH - 1], original[SEED_LENGTH - 1]);

        swap_pairs(&mut buf);
        assert_eq!(buf, original);
    }

    #[test]
    fn test_derive_is_stable() {
        let dir = TempDir::new().unwrap();
        let derivation = ProtectionSecretDerivation::new(dir.path(), fast());

        let first = derivation.derive("sys").unwrap();
        let second = derivation.derive("sys").unwrap();
        assert_eq!(*first, *second);
        assert_eq!(URL_SAFE_NO_PAD.decode(first.as_bytes()).unwrap().len(), PASSPHRASE_LENGTH);

        // A new handle over the same records derives the same passphrase.
        let reopened = ProtectionSecretDerivation::new(dir.path(), DerivationParams::default());
        assert_eq!(*reopened.derive("sys").unwrap(), *first);
    }

    #[test]
    fn test_contexts_are_independent() {
        let dir = TempDir::new().unwrap();
        let derivation = ProtectionSecretDerivation::new(dir.path(), fast());

        assert_ne!(*derivation.derive("a").unwrap(), *derivation.derive("b").unwrap());
    }

    #[test]
    fn test_seed_is_stored_swapped() {
        let dir = TempDir::new().unwrap();
        let derivation = ProtectionSecretDerivation::new(dir.path(), fast());
        let (seed, _) = derivation.create("sys").unwrap();

        let mut stored = fs::read(dir.path().join("sys")).unwrap();
        assert_eq!(stored.len(), SEED_LENGTH);
        swap_pairs(&mut stored);
        assert_eq!(stored, *seed);
    }

    #[test]
    fn test_rounds_within_range() {
        let dir = TempDir::new().unwrap();
        let derivation = ProtectionSecretDerivation::new(dir.path(), fast());
        for i in 0..8 {
            let (_, params) = derivation.create(&format!("r{}", i)).unwrap();
            assert!((1..=3).contains(&params.rounds));
        }
    }

    #[test]
    fn test_missing_params_is_fatal() {
        let dir = TempDir::new().unwrap();
        let derivation = ProtectionSecretDerivation::new(dir.path(), fast());
        derivation.derive("sys").unwrap();

        fs::remove_file(dir.path().join("sys.params.json")).unwrap();
        let err = derivation.derive("sys").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
    }

    #[test]
    fn test_corrupt_seed_is_fatal() {
        let dir = TempDir::new().unwrap();
        let derivation = ProtectionSecretDerivation::new(dir.path(), fast());
        derivation.derive("sys").unwrap();

        fs::write(dir.path().join("sys"), [0u8; 10]).unwrap();
        assert_eq!(derivation.derive("sys").unwrap_err().kind(), ErrorKind::StorageFailure);

        fs::write(dir.path().join("sys"), [0u8; SEED_LENGTH]).unwrap();
        fs::write(dir.path().join("sys.params.json"), b"{not json").unwrap();
        assert_eq!(derivation.derive("sys").unwrap_err().kind(), ErrorKind::StorageFailure);
    }
}
