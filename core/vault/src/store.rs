//! Policy-protected configuration storage.
//!
//! A [`ConfigStore`] binds an identifier, a protection policy and an
//! authenticator. Each identifier is stored under `<identifier>-<suffix>`,
//! both as the vault key alias and as the blob file name, so the same
//! identifier saved under two policies never collides.

use std::sync::Arc;

use tracing::{debug, info};

use crate::auth::KeyAuthenticator;
use crate::blob::ConfigBlobCodec;
use crate::manager::SecretKeyVault;
use crate::policy::ProtectionPolicy;
use lockbox_common::{Error, Identifier, Result};

/// Identifier used when the caller does not name one.
pub const DEFAULT_IDENTIFIER: &str = "credentials";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(String),
    Cancelled,
    NotFound,
}

/// Stores one configuration string under one identifier and policy.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    vault: Arc<SecretKeyVault>,
    identifier: String,
    policy: ProtectionPolicy,
    authenticator: KeyAuthenticator,
}

impl ConfigStore {
    /// Bind a store. Arguments are checked by each operation, before any I/O.
    pub fn new(
        vault: Arc<SecretKeyVault>,
        identifier: impl Into<String>,
        policy: ProtectionPolicy,
        authenticator: KeyAuthenticator,
    ) -> Self {
        Self {
            vault,
            identifier: identifier.into(),
            policy,
            authenticator,
        }
    }

    /// Store bound to [`DEFAULT_IDENTIFIER`].
    pub fn with_default_identifier(
        vault: Arc<SecretKeyVault>,
        policy: ProtectionPolicy,
        authenticator: KeyAuthenticator,
    ) -> Self {
        Self::new(vault, DEFAULT_IDENTIFIER, policy, authenticator)
    }

    /// Whether `identifier` is acceptable: non-blank, ASCII letters, digits,
    /// `-` or `_`, at most 100 characters.
    pub fn valid_identifier(identifier: &str) -> bool {
        Identifier::is_valid(identifier)
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn policy(&self) -> ProtectionPolicy {
        self.policy
    }

    /// Name used for both the vault key and the blob file.
    pub fn storage_name(&self) -> String {
        format!("{}-{}", self.identifier, self.policy.suffix())
    }

    fn check(&self) -> Result<String> {
        let identifier = Identifier::new(self.identifier.as_str())?;
        self.policy.validate()?;
        if !self.authenticator.supports(&self.policy) {
            return Err(Error::InvalidArgument(format!(
                "{:?} cannot satisfy policy {}",
                self.authenticator,
                self.policy.suffix()
            )));
        }
        Ok(format!("{}-{}", identifier, self.policy.suffix()))
    }

    fn blob(&self, name: &str) -> ConfigBlobCodec {
        ConfigBlobCodec::new(self.vault.config().blob_path(name))
    }

    /// Encrypt and store `plaintext`, replacing any previous value.
    ///
    /// # Errors
    /// - `InvalidArgument` for a bad identifier or an authenticator that does
    ///   not match the policy
    /// - `AuthenticationFailed` if the key could not be unlocked
    pub fn save(&self, plaintext: &str) -> Result<SaveOutcome> {
        let name = self.check()?;
        let key = match self.vault.unlock(&name, self.policy, &self.authenticator) {
            Ok(key) => key,
            Err(Error::AuthenticationCancelled) => return Ok(SaveOutcome::Cancelled),
            Err(e) => return Err(e),
        };

        self.blob(&name).save(plaintext, &key)?;
        info!(name = %name, "Saved config");
        Ok(SaveOutcome::Saved)
    }

    /// Load and decrypt the stored value.
    ///
    /// Nothing stored yields `NotFound` without an authentication prompt.
    ///
    /// # Errors
    /// - `TamperDetected` if the stored blob was altered
    pub fn load(&self) -> Result<LoadOutcome> {
        let name = self.check()?;
        let blob = self.blob(&name);
        if !blob.exists() {
            debug!(name = %name, "No stored config");
            return Ok(LoadOutcome::NotFound);
        }

        let key = match self.vault.unlock(&name, self.policy, &self.authenticator) {
            Ok(key) => key,
            Err(Error::AuthenticationCancelled) => return Ok(LoadOutcome::Cancelled),
            Err(e) => return Err(e),
        };

        match blob.load(&key) {
            Ok(text) => Ok(LoadOutcome::Loaded(text)),
            Err(Error::NotFound(_)) => Ok(LoadOutcome::NotFound),
            Err(e) => Err(e),
        }
    }

    /// Remove the stored value and its key.
    ///
    /// Both are attempted even if the first fails; the first error is
    /// returned.
    pub fn remove(&self) -> Result<()> {
        let name = self.check()?;

        let key_result = self.vault.remove_key(&name);
        let blob_result = self.blob(&name).delete();
        key_result?;
        blob_result?;

        info!(name = %name, "Removed config");
        Ok(())
    }
}
