//! The secret-key vault.
//!
//! One [`SecretKeyVault`] is built at process setup and shared as an
//! `Arc`. The keystore container behind it is created or loaded on first
//! use, exactly once, and every mutation is persisted before it returns.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::auth::{
    AuthOutcome, KeyAuthenticator, KeyChallenge, PlatformChallenge, UnlockAttempt, UnlockState,
};
use crate::config::VaultConfig;
use crate::container::{EntryInfo, KeyContainer};
use crate::derivation::ProtectionSecretDerivation;
use crate::policy::{ProtectionParameter, ProtectionPolicy};
use lockbox_common::{Error, Result};
use lockbox_crypto::SecretKey;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reject aliases that cannot name a keystore entry.
fn check_alias(alias: &str) -> Result<()> {
    if alias.trim().is_empty() {
        return Err(Error::InvalidArgument("Alias cannot be blank".to_string()));
    }
    if alias.chars().any(char::is_control) {
        return Err(Error::InvalidArgument(
            "Alias cannot contain control characters".to_string(),
        ));
    }
    Ok(())
}

/// Named, persistent collection of secret keys.
pub struct SecretKeyVault {
    config: VaultConfig,
    derivation: ProtectionSecretDerivation,
    container: OnceCell<Arc<KeyContainer>>,
    save_lock: Mutex<()>,
    lock_screen_unlocks: Mutex<HashMap<String, Instant>>,
}

impl SecretKeyVault {
    /// Create a vault handle. Nothing is read or written until the first
    /// key operation.
    ///
    /// # Errors
    /// - `InvalidArgument` if the configuration is invalid
    pub fn new(config: VaultConfig) -> Result<Self> {
        config.validate()?;
        let derivation = ProtectionSecretDerivation::new(&config.root, config.derivation.clone());
        Ok(Self {
            config,
            derivation,
            container: OnceCell::new(),
            save_lock: Mutex::new(()),
            lock_screen_unlocks: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// The keystore container, loading or creating it on first call.
    ///
    /// Concurrent first calls converge on one instance: one thread runs the
    /// setup while the others wait for it. A failed setup leaves the vault
    /// uninitialized, so the next call tries again.
    ///
    /// # Errors
    /// - `Storage` if the seed records or the container cannot be read or
    ///   written
    /// - `TamperDetected` if the container does not open
    pub fn container(&self) -> Result<Arc<KeyContainer>> {
        self.container
            .get_or_try_init(|| {
                let passphrase = self.derivation.derive(&self.config.seed_record)?;
                let container = KeyContainer::open_or_create(
                    &self.config.keystore_path(),
                    &passphrase,
                    self.config.entry_kdf.clone(),
                )?;
                info!(
                    path = %self.config.keystore_path().display(),
                    entries = container.len(),
                    "Keystore ready"
                );
                Ok::<_, Error>(Arc::new(container))
            })
            .cloned()
    }

    /// Return the key for `alias`, creating it under `policy` if absent.
    ///
    /// An existing key is never regenerated. Lock-screen and biometric keys
    /// are only released through [`unlock`](Self::unlock).
    ///
    /// # Errors
    /// - `InvalidArgument` for a blank alias, a lock-screen or biometric
    ///   policy, a password policy without a non-blank `auth_secret`, or an
    ///   existing key under another policy; all reported before any I/O
    /// - `AuthenticationFailed` if `auth_secret` does not open a password key
    /// - any container error from [`container`](Self::container)
    pub fn get_or_create_key(
        &self,
        alias: &str,
        policy: ProtectionPolicy,
        auth_secret: Option<&str>,
    ) -> Result<SecretKey> {
        if policy.requires_challenge() {
            return Err(Error::InvalidArgument(format!(
                "Keys under policy {} are released through unlock",
                policy.suffix()
            )));
        }
        self.open_key(alias, policy, auth_secret)
    }

    /// Shared body of [`get_or_create_key`](Self::get_or_create_key), without
    /// the challenge check. Callers gate challenge policies themselves.
    fn open_key(
        &self,
        alias: &str,
        policy: ProtectionPolicy,
        auth_secret: Option<&str>,
    ) -> Result<SecretKey> {
        check_alias(alias)?;
        policy.validate()?;
        let protection = ProtectionParameter::for_policy(
            &policy,
            auth_secret,
            self.config.legacy_empty_password,
        )?;

        let container = self.container()?;
        self.create_if_needed(&container, alias, policy, &protection)?;

        container.unwrap_key(alias, auth_secret)
    }

    fn create_if_needed(
        &self,
        container: &KeyContainer,
        alias: &str,
        policy: ProtectionPolicy,
        protection: &ProtectionParameter,
    ) -> Result<()> {
        let _guard = lock(&self.save_lock);

        match container.policy_of(alias) {
            Some(existing) if existing.same_kind(&policy) => Ok(()),
            Some(existing) => Err(Error::InvalidArgument(format!(
                "Key {} exists under policy {}",
                alias,
                existing.suffix()
            ))),
            None => {
                container.insert(alias, &SecretKey::generate(), policy, protection)?;
                if let Err(e) = container.persist() {
                    container.remove(alias);
                    return Err(e);
                }
                info!(alias, policy = policy.suffix(), "Created vault key");
                Ok(())
            }
        }
    }

    /// Delete the key for `alias`. Absent aliases are a no-op.
    pub fn remove_key(&self, alias: &str) -> Result<()> {
        check_alias(alias)?;
        let container = self.container()?;

        {
            let _guard = lock(&self.save_lock);
            let Some(removed) = container.remove(alias) else {
                return Ok(());
            };
            if let Err(e) = container.persist() {
                container.restore(alias, removed);
                return Err(e);
            }
        }

        lock(&self.lock_screen_unlocks).remove(alias);
        info!(alias, "Removed vault key");
        Ok(())
    }

    /// Whether a key exists for `alias`.
    pub fn contains_key(&self, alias: &str) -> Result<bool> {
        check_alias(alias)?;
        Ok(self.container()?.contains(alias))
    }

    /// Entries in the container, without key material.
    pub fn entries(&self) -> Result<Vec<EntryInfo>> {
        Ok(self.container()?.entries())
    }

    /// Release the key for `alias` through `authenticator`, creating the key
    /// under `policy` if absent.
    ///
    /// # Errors
    /// - `InvalidArgument` if `authenticator` cannot satisfy `policy`, checked
    ///   before any I/O or challenge
    /// - `AuthenticationCancelled` if the user abandoned the challenge
    /// - `AuthenticationFailed` if the challenge or password was rejected
    pub fn unlock(
        &self,
        alias: &str,
        policy: ProtectionPolicy,
        authenticator: &KeyAuthenticator,
    ) -> Result<SecretKey> {
        check_alias(alias)?;
        policy.validate()?;
        if !authenticator.supports(&policy) {
            return Err(Error::InvalidArgument(format!(
                "{:?} cannot unlock keys under policy {}",
                authenticator,
                policy.suffix()
            )));
        }

        let attempt = UnlockAttempt::begin(alias);
        let result = self.run_unlock(alias, policy, authenticator);
        let state = match &result {
            Ok(_) => UnlockState::Succeeded,
            Err(Error::AuthenticationCancelled) => UnlockState::Cancelled,
            Err(_) => UnlockState::Failed,
        };
        if attempt.finish(state) == UnlockState::Failed {
            if let Err(e) = &result {
                warn!(alias, error = %e, "Unlock failed");
            }
        }
        result
    }

    fn run_unlock(
        &self,
        alias: &str,
        policy: ProtectionPolicy,
        authenticator: &KeyAuthenticator,
    ) -> Result<SecretKey> {
        match (policy, authenticator) {
            (ProtectionPolicy::None, _) => self.open_key(alias, policy, None),
            (ProtectionPolicy::Password, KeyAuthenticator::Password(source)) => {
                match source.password() {
                    AuthOutcome::Granted(password) => {
                        self.open_key(alias, policy, Some(password.as_str()))
                    }
                    AuthOutcome::Cancelled => Err(Error::AuthenticationCancelled),
                    AuthOutcome::Failed(reason) => Err(Error::AuthenticationFailed(reason)),
                }
            }
            (
                ProtectionPolicy::LockScreen { valid_for_secs },
                KeyAuthenticator::LockScreen(platform),
            ) => {
                if self.lock_screen_still_valid(alias, valid_for_secs) {
                    debug!(alias, "Lock-screen authorization still valid");
                    return self.open_key(alias, policy, None);
                }
                let key = self.challenge(alias, policy, platform.as_ref())?;
                lock(&self.lock_screen_unlocks).insert(alias.to_string(), Instant::now());
                Ok(key)
            }
            (ProtectionPolicy::Biometric, KeyAuthenticator::Biometric(platform)) => {
                self.challenge(alias, policy, platform.as_ref())
            }
            _ => Err(Error::InvalidArgument(format!(
                "{:?} cannot unlock keys under policy {}",
                authenticator,
                policy.suffix()
            ))),
        }
    }

    fn lock_screen_still_valid(&self, alias: &str, valid_for_secs: u64) -> bool {
        lock(&self.lock_screen_unlocks)
            .get(alias)
            .map(|at| at.elapsed() < Duration::from_secs(valid_for_secs))
            .unwrap_or(false)
    }

    /// Make sure the entry exists, then release it for a token minted for a
    /// fresh challenge.
    fn challenge(
        &self,
        alias: &str,
        policy: ProtectionPolicy,
        platform: &dyn PlatformChallenge,
    ) -> Result<SecretKey> {
        let protection =
            ProtectionParameter::for_policy(&policy, None, self.config.legacy_empty_password)?;
        let container = self.container()?;
        self.create_if_needed(&container, alias, policy, &protection)?;

        let challenge = KeyChallenge::new(alias, policy);
        match platform.authorize(&challenge) {
            AuthOutcome::Granted(token) => {
                if challenge.accepts(token) {
                    container.unwrap_key(alias, None)
                } else {
                    Err(Error::AuthenticationFailed(
                        "Authorization token does not match the challenge".to_string(),
                    ))
                }
            }
            AuthOutcome::Cancelled => Err(Error::AuthenticationCancelled),
            AuthOutcome::Failed(reason) => Err(Error::AuthenticationFailed(reason)),
        }
    }
}

impl std::fmt::Debug for SecretKeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKeyVault")
            .field("root", &self.config.root)
            .field("initialized", &self.container.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthorizationToken;
    use crate::config::DerivationParams;
    use lockbox_common::ErrorKind;
    use lockbox_crypto::KdfParams;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use tempfile::TempDir;

    fn vault(dir: &TempDir) -> SecretKeyVault {
        let config = VaultConfig::new(dir.path())
            .with_derivation(DerivationParams {
                memory_cost: 64,
                parallelism: 1,
                min_rounds: 1,
                max_rounds: 2,
            })
            .with_entry_kdf(KdfParams {
                memory_cost: 64,
                time_cost: 1,
                parallelism: 1,
            });
        SecretKeyVault::new(config).unwrap()
    }

    fn granting() -> Arc<dyn PlatformChallenge> {
        Arc::new(|c: &KeyChallenge| AuthOutcome::Granted(AuthorizationToken::for_challenge(c)))
    }

    #[test]
    fn test_key_is_stable() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);

        let first = vault.get_or_create_key("k", ProtectionPolicy::None, None).unwrap();
        let second = vault.get_or_create_key("k", ProtectionPolicy::None, None).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());

        // A fresh handle over the same directory sees the same key.
        let reopened = self::vault(&dir);
        let third = reopened.get_or_create_key("k", ProtectionPolicy::None, None).unwrap();
        assert_eq!(first.as_bytes(), third.as_bytes());
    }

    #[test]
    fn test_invalid_arguments_touch_nothing() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);

        for alias in ["", "   ", "a\u{0}b"] {
            let err = vault.get_or_create_key(alias, ProtectionPolicy::None, None).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
        let err = vault.get_or_create_key("k", ProtectionPolicy::Password, Some(" ")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = vault
            .unlock("k", ProtectionPolicy::Biometric, &KeyAuthenticator::None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = vault.get_or_create_key("k", ProtectionPolicy::Biometric, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_password_policy() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);

        let key = vault
            .get_or_create_key("p", ProtectionPolicy::Password, Some("correct"))
            .unwrap();
        let again = vault
            .unlock("p", ProtectionPolicy::Password, &KeyAuthenticator::with_password("correct"))
            .unwrap();
        assert_eq!(key.as_bytes(), again.as_bytes());

        let err = vault
            .unlock("p", ProtectionPolicy::Password, &KeyAuthenticator::with_password("wrong"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    }

    #[test]
    fn test_policy_mismatch() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        vault.get_or_create_key("k", ProtectionPolicy::None, None).unwrap();

        let err = vault
            .get_or_create_key("k", ProtectionPolicy::Password, Some("pw"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_remove_key() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        let first = vault.get_or_create_key("k", ProtectionPolicy::None, None).unwrap();

        vault.remove_key("k").unwrap();
        vault.remove_key("k").unwrap();
        assert!(!vault.contains_key("k").unwrap());

        let second = vault.get_or_create_key("k", ProtectionPolicy::None, None).unwrap();
        assert_ne!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_failed_remove_keeps_key() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        let key = vault.get_or_create_key("k", ProtectionPolicy::None, None).unwrap();

        // A directory in place of the keystore file makes the next save fail.
        let keystore = vault.config().keystore_path();
        std::fs::remove_file(&keystore).unwrap();
        std::fs::create_dir(&keystore).unwrap();
        std::fs::write(keystore.join("occupied"), b"x").unwrap();

        let err = vault.remove_key("k").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert!(vault.contains_key("k").unwrap());

        let again = vault.get_or_create_key("k", ProtectionPolicy::None, None).unwrap();
        assert_eq!(key.as_bytes(), again.as_bytes());
    }

    #[test]
    fn test_challenge_keys_only_released_by_unlock() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        let auth = KeyAuthenticator::Biometric(granting());
        let key = vault.unlock("bio", ProtectionPolicy::Biometric, &auth).unwrap();

        for policy in [ProtectionPolicy::Biometric, ProtectionPolicy::lock_screen()] {
            let err = vault.get_or_create_key("bio", policy, None).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }

        let again = vault.unlock("bio", ProtectionPolicy::Biometric, &auth).unwrap();
        assert_eq!(key.as_bytes(), again.as_bytes());
    }

    #[test]
    fn test_biometric_challenge_every_time() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let platform: Arc<dyn PlatformChallenge> = Arc::new(move |c: &KeyChallenge| {
            counter.fetch_add(1, Ordering::SeqCst);
            AuthOutcome::Granted(AuthorizationToken::for_challenge(c))
        });
        let auth = KeyAuthenticator::Biometric(platform);

        let a = vault.unlock("b", ProtectionPolicy::Biometric, &auth).unwrap();
        let b = vault.unlock("b", ProtectionPolicy::Biometric, &auth).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_lock_screen_window_skips_challenge() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let platform: Arc<dyn PlatformChallenge> = Arc::new(move |c: &KeyChallenge| {
            counter.fetch_add(1, Ordering::SeqCst);
            AuthOutcome::Granted(AuthorizationToken::for_challenge(c))
        });
        let auth = KeyAuthenticator::LockScreen(platform);
        let policy = ProtectionPolicy::LockScreen { valid_for_secs: 3600 };

        vault.unlock("ls", policy, &auth).unwrap();
        vault.unlock("ls", policy, &auth).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        vault.remove_key("ls").unwrap();
        vault.unlock("ls", policy, &auth).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancel_and_failure_are_distinct() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);

        let cancel: Arc<dyn PlatformChallenge> =
            Arc::new(|_: &KeyChallenge| AuthOutcome::<AuthorizationToken>::Cancelled);
        let err = vault
            .unlock("b", ProtectionPolicy::Biometric, &KeyAuthenticator::Biometric(cancel))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationCancelled);

        let reject: Arc<dyn PlatformChallenge> = Arc::new(|_: &KeyChallenge| {
            AuthOutcome::<AuthorizationToken>::Failed("no match".to_string())
        });
        let err = vault
            .unlock("b", ProtectionPolicy::Biometric, &KeyAuthenticator::Biometric(reject))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    }

    #[test]
    fn test_stale_token_rejected() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        let stale = KeyChallenge::new("b", ProtectionPolicy::Biometric);
        let replay: Arc<dyn PlatformChallenge> = Arc::new(move |_: &KeyChallenge| {
            AuthOutcome::Granted(AuthorizationToken::for_challenge(&stale))
        });

        let err = vault
            .unlock("b", ProtectionPolicy::Biometric, &KeyAuthenticator::Biometric(replay))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);

        let auth = KeyAuthenticator::Biometric(granting());
        let ok = vault.unlock("b", ProtectionPolicy::Biometric, &auth);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_concurrent_first_access() {
        let dir = TempDir::new().unwrap();
        let vault = Arc::new(vault(&dir));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let vault = vault.clone();
                thread::spawn(move || {
                    let container = vault.container().unwrap();
                    let key = vault
                        .get_or_create_key("shared", ProtectionPolicy::None, None)
                        .unwrap();
                    (container, *key.as_bytes())
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let (first_container, first_key) = &results[0];
        for (container, key) in &results {
            assert!(Arc::ptr_eq(container, first_container));
            assert_eq!(key, first_key);
        }
        assert_eq!(vault.entries().unwrap().len(), 1);
    }
}
