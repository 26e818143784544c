//! File-backed keystore container.
//!
//! The whole container is serialized to JSON and sealed with the secret box
//! under a key derived from the protection passphrase. Password-protected
//! entries are additionally wrapped under a key derived from their own
//! passphrase, so the container passphrase alone does not release them.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::derivation::write_atomic;
use crate::policy::{ProtectionParameter, ProtectionPolicy};
use lockbox_common::{Error, Result};
use lockbox_crypto::aead;
use lockbox_crypto::kdf::{derive_key, KdfParams};
use lockbox_crypto::keys::{Salt, SecretKey, KEY_LENGTH};

/// Container file format version.
const CONTAINER_VERSION: u32 = 1;

#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum EntryProtection {
    Plain { key: String },
    /// Same storage as `Plain`; only marks entries written in
    /// legacy-compatibility mode.
    EmptyPassword { key: String },
    Password { salt: String, wrapped: String },
}

/// One entry as held in the container, key material included.
///
/// Returned by [`KeyContainer::remove`] so a failed persist can put it back.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    policy: ProtectionPolicy,
    created_at: DateTime<Utc>,
    protection: EntryProtection,
}

#[derive(Serialize, Deserialize)]
struct ContainerFile {
    version: u32,
    entries: BTreeMap<String, StoredEntry>,
}

/// Summary of one entry, without key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub alias: String,
    pub policy: ProtectionPolicy,
    pub created_at: DateTime<Utc>,
}

fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn decode(text: &str) -> Result<Zeroizing<Vec<u8>>> {
    URL_SAFE_NO_PAD
        .decode(text)
        .map(Zeroizing::new)
        .map_err(|e| Error::Storage(format!("Malformed keystore entry: {}", e)))
}

/// The in-memory keystore and the file it persists to.
pub struct KeyContainer {
    path: PathBuf,
    key: SecretKey,
    entry_kdf: KdfParams,
    entries: RwLock<BTreeMap<String, StoredEntry>>,
}

impl KeyContainer {
    /// Load the container at `path`, or create and persist an empty one.
    ///
    /// # Errors
    /// - `TamperDetected` if the file does not open under `passphrase`
    /// - `Storage` for I/O failures or a malformed container
    pub fn open_or_create(path: &Path, passphrase: &str, entry_kdf: KdfParams) -> Result<Self> {
        let key = Self::container_key(passphrase)?;

        if path.exists() {
            let sealed =
                fs::read(path).map_err(|e| Error::from(e).in_storage("Reading keystore"))?;
            let json = Zeroizing::new(aead::decrypt(key.as_bytes(), &sealed)?);
            let file: ContainerFile = serde_json::from_slice(&json)
                .map_err(|e| Error::Storage(format!("Malformed keystore: {}", e)))?;
            if file.version != CONTAINER_VERSION {
                return Err(Error::Format(format!(
                    "Unsupported keystore version: {}",
                    file.version
                )));
            }

            debug!(path = %path.display(), entries = file.entries.len(), "Loaded keystore");
            return Ok(Self {
                path: path.to_path_buf(),
                key,
                entry_kdf,
                entries: RwLock::new(file.entries),
            });
        }

        let container = Self {
            path: path.to_path_buf(),
            key,
            entry_kdf,
            entries: RwLock::new(BTreeMap::new()),
        };
        container.persist()?;
        debug!(path = %path.display(), "Created keystore");
        Ok(container)
    }

    fn container_key(passphrase: &str) -> Result<SecretKey> {
        let bytes = URL_SAFE_NO_PAD
            .decode(passphrase)
            .map(Zeroizing::new)
            .map_err(|_| Error::Crypto("Malformed protection passphrase".to_string()))?;
        Ok(SecretKey::from_slice(&bytes)?.derive_subkey(b"keystore"))
    }

    /// Path of the container file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.read_entries().contains_key(alias)
    }

    /// Policy an entry was created under.
    pub fn policy_of(&self, alias: &str) -> Option<ProtectionPolicy> {
        self.read_entries().get(alias).map(|e| e.policy)
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// List entries in alias order.
    pub fn entries(&self) -> Vec<EntryInfo> {
        self.read_entries()
            .iter()
            .map(|(alias, entry)| EntryInfo {
                alias: alias.clone(),
                policy: entry.policy,
                created_at: entry.created_at,
            })
            .collect()
    }

    /// Add an entry in memory. Call [`persist`](Self::persist) to save it.
    ///
    /// Replaces any existing entry under `alias`.
    pub fn insert(
        &self,
        alias: &str,
        key: &SecretKey,
        policy: ProtectionPolicy,
        protection: &ProtectionParameter,
    ) -> Result<()> {
        let protection = match protection {
            ProtectionParameter::Unprotected => EntryProtection::Plain {
                key: encode(key.as_bytes()),
            },
            ProtectionParameter::EmptyPassword => EntryProtection::EmptyPassword {
                key: encode(key.as_bytes()),
            },
            ProtectionParameter::Password(password) => {
                let salt = Salt::generate();
                let wrapping = derive_key(password.as_bytes(), salt.as_bytes(), &self.entry_kdf)?;
                let wrapped = aead::encrypt(wrapping.as_bytes(), key.as_bytes())?;
                EntryProtection::Password {
                    salt: encode(salt.as_bytes()),
                    wrapped: encode(&wrapped),
                }
            }
        };

        let entry = StoredEntry {
            policy,
            created_at: Utc::now(),
            protection,
        };
        self.write_entries().insert(alias.to_string(), entry);
        Ok(())
    }

    /// Release the key stored under `alias`.
    ///
    /// # Errors
    /// - `NotFound` if there is no such entry
    /// - `AuthenticationFailed` if a password entry is opened without its
    ///   password or with the wrong one
    pub fn unwrap_key(&self, alias: &str, password: Option<&str>) -> Result<SecretKey> {
        let protection = self
            .read_entries()
            .get(alias)
            .map(|e| e.protection.clone())
            .ok_or_else(|| Error::NotFound(format!("No key for alias {}", alias)))?;

        match protection {
            EntryProtection::Plain { key } | EntryProtection::EmptyPassword { key } => {
                SecretKey::from_slice(&decode(&key)?)
            }
            EntryProtection::Password { salt, wrapped } => {
                let password = password
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| Error::AuthenticationFailed("Password required".to_string()))?;
                let wrapping = derive_key(password.as_bytes(), &decode(&salt)?, &self.entry_kdf)?;
                let key = aead::decrypt(wrapping.as_bytes(), &decode(&wrapped)?).map_err(|e| {
                    match e {
                        Error::TamperDetected(_) => {
                            Error::AuthenticationFailed("Wrong password".to_string())
                        }
                        other => other,
                    }
                })?;
                let key = Zeroizing::new(key);
                if key.len() != KEY_LENGTH {
                    return Err(Error::Storage("Malformed keystore entry".to_string()));
                }
                SecretKey::from_slice(&key)
            }
        }
    }

    /// Remove an entry in memory, returning it if it existed.
    pub fn remove(&self, alias: &str) -> Option<StoredEntry> {
        self.write_entries().remove(alias)
    }

    /// Put back an entry taken out by [`remove`](Self::remove).
    pub fn restore(&self, alias: &str, entry: StoredEntry) {
        self.write_entries().insert(alias.to_string(), entry);
    }

    /// Seal the current entries and atomically replace the container file.
    ///
    /// Callers that mutate and persist concurrently must serialize the pair
    /// themselves.
    pub fn persist(&self) -> Result<()> {
        let json = {
            let entries = self.read_entries();
            let file = ContainerFile {
                version: CONTAINER_VERSION,
                entries: entries.clone(),
            };
            Zeroizing::new(
                serde_json::to_vec(&file).map_err(|e| Error::Serialization(e.to_string()))?,
            )
        };

        let sealed = aead::encrypt(self.key.as_bytes(), &json)?;
        write_atomic(&self.path, &sealed).map_err(|e| e.in_storage("Saving keystore"))?;
        debug!(path = %self.path.display(), "Saved keystore");
        Ok(())
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, StoredEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, StoredEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for KeyContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyContainer")
            .field("path", &self.path)
            .field("entries", &self.len())
            .finish()
    }
}
