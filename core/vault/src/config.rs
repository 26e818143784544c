//! Vault configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use lockbox_common::{Error, Result};
use lockbox_crypto::KdfParams;

/// Keystore container file name in the vault root.
pub const KEYSTORE_FILENAME: &str = "keystore.bin";

/// Seed record name in the vault root.
pub const SEED_RECORD: &str = "sys";

/// Directory holding encrypted config blobs.
pub const BLOB_DIRNAME: &str = "blobs";

/// Default lock-screen validity window in seconds.
pub const DEFAULT_LOCK_SCREEN_VALIDITY_SECS: u64 = 60;

/// Parameters for deriving the keystore protection passphrase.
///
/// The round count is picked once per installation, uniformly from
/// `min_rounds..=max_rounds`, and stored with the salt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationParams {
    /// Memory cost in KiB.
    pub memory_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
    /// Smallest round count (Argon2 time cost) to draw.
    pub min_rounds: u32,
    /// Largest round count to draw.
    pub max_rounds: u32,
}

impl Default for DerivationParams {
    fn default() -> Self {
        Self {
            memory_cost: 19456, // 19 MiB
            parallelism: 1,
            min_rounds: 3,
            max_rounds: 5,
        }
    }
}

impl DerivationParams {
    fn validate(&self) -> Result<()> {
        if self.min_rounds == 0 || self.min_rounds > self.max_rounds {
            return Err(Error::InvalidArgument(format!(
                "Invalid round range: {}..={}",
                self.min_rounds, self.max_rounds
            )));
        }
        if self.parallelism == 0 {
            return Err(Error::InvalidArgument(
                "Parallelism must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Vault configuration, stored as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Directory holding every vault file.
    pub root: PathBuf,
    /// Keystore container file name.
    pub keystore_file: String,
    /// Seed record name; its parameters live next to it.
    pub seed_record: String,
    /// Protection passphrase derivation.
    pub derivation: DerivationParams,
    /// KDF for password-protected entries.
    pub entry_kdf: KdfParams,
    /// Store unprotected entries behind an explicit empty password.
    #[serde(default)]
    pub legacy_empty_password: bool,
    /// Lock-screen validity window used by the CLI and `ProtectionPolicy::lock_screen`.
    #[serde(default = "default_lock_screen_validity")]
    pub lock_screen_validity_secs: u64,
}

fn default_lock_screen_validity() -> u64 {
    DEFAULT_LOCK_SCREEN_VALIDITY_SECS
}

impl VaultConfig {
    /// Create a configuration rooted at `root` with production defaults.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            keystore_file: KEYSTORE_FILENAME.to_string(),
            seed_record: SEED_RECORD.to_string(),
            derivation: DerivationParams::default(),
            entry_kdf: KdfParams::moderate(),
            legacy_empty_password: false,
            lock_screen_validity_secs: DEFAULT_LOCK_SCREEN_VALIDITY_SECS,
        }
    }

    pub fn with_derivation(mut self, params: DerivationParams) -> Self {
        self.derivation = params;
        self
    }

    pub fn with_entry_kdf(mut self, params: KdfParams) -> Self {
        self.entry_kdf = params;
        self
    }

    pub fn with_legacy_empty_password(mut self, enabled: bool) -> Self {
        self.legacy_empty_password = enabled;
        self
    }

    pub fn with_lock_screen_validity(mut self, secs: u64) -> Self {
        self.lock_screen_validity_secs = secs;
        self
    }

    /// Check the configuration before any file is touched.
    ///
    /// # Errors
    /// - `InvalidArgument` for blank file names, an empty round range or a
    ///   zero lock-screen window
    pub fn validate(&self) -> Result<()> {
        if self.keystore_file.trim().is_empty() || self.seed_record.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "Keystore and seed record names cannot be blank".to_string(),
            ));
        }
        if self.lock_screen_validity_secs == 0 {
            return Err(Error::InvalidArgument(
                "Lock-screen validity must be positive".to_string(),
            ));
        }
        self.derivation.validate()
    }

    /// Path of the keystore container.
    pub fn keystore_path(&self) -> PathBuf {
        self.root.join(&self.keystore_file)
    }

    /// Path of the encrypted blob stored under `name`.
    pub fn blob_path(&self, name: &str) -> PathBuf {
        self.root.join(BLOB_DIRNAME).join(format!("{}.bin", name))
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Write this configuration to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = VaultConfig::new("/tmp/lockbox");
        config.validate().unwrap();

        assert_eq!(config.keystore_path(), PathBuf::from("/tmp/lockbox/keystore.bin"));
        assert_eq!(
            config.blob_path("credentials-NO"),
            PathBuf::from("/tmp/lockbox/blobs/credentials-NO.bin")
        );
    }

    #[test]
    fn test_invalid_round_range() {
        let config = VaultConfig::new("/tmp").with_derivation(DerivationParams {
            min_rounds: 6,
            max_rounds: 5,
            ..DerivationParams::default()
        });
        assert!(config.validate().is_err());

        let config = VaultConfig::new("/tmp").with_lock_screen_validity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = VaultConfig::new("/data/lockbox")
            .with_legacy_empty_password(true)
            .with_entry_kdf(KdfParams::interactive());

        let json = config.to_json().unwrap();
        let restored = VaultConfig::from_json(&json).unwrap();

        assert_eq!(restored, config);
    }

    #[test]
    fn test_missing_optional_fields_use_defaults() {
        let mut value: serde_json::Value =
            serde_json::from_str(&VaultConfig::new("/r").to_json().unwrap()).unwrap();
        let map = value.as_object_mut().unwrap();
        map.remove("legacy_empty_password");
        map.remove("lock_screen_validity_secs");

        let restored = VaultConfig::from_json(&value.to_string()).unwrap();
        assert!(!restored.legacy_empty_password);
        assert_eq!(restored.lock_screen_validity_secs, DEFAULT_LOCK_SCREEN_VALIDITY_SECS);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.json");
        let config = VaultConfig::new(dir.path());

        config.save(&path).unwrap();
        assert_eq!(VaultConfig::load(&path).unwrap(), config);
    }
}
