use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use proptest::prelude::*;
use tempfile::TempDir;
use zeroize::Zeroizing;

use lockbox_common::ErrorKind;
use lockbox_crypto::KdfParams;
use lockbox_vault::{
    AuthOutcome, AuthorizationToken, ConfigStore, DerivationParams, KeyAuthenticator, KeyChallenge,
    LoadOutcome, PlatformChallenge, ProtectionPolicy, SaveOutcome, SecretKeyVault, VaultConfig,
};

fn fast_config(dir: &TempDir) -> VaultConfig {
    VaultConfig::new(dir.path())
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
        })
}

fn open_vault(dir: &TempDir) -> Arc<SecretKeyVault> {
    Arc::new(SecretKeyVault::new(fast_config(dir)).unwrap())
}

fn unprotected(vault: Arc<SecretKeyVault>, identifier: &str) -> ConfigStore {
    ConfigStore::new(vault, identifier, ProtectionPolicy::None, KeyAuthenticator::None)
}

fn granting() -> Arc<dyn PlatformChallenge> {
    Arc::new(|c: &KeyChallenge| AuthOutcome::Granted(AuthorizationToken::for_challenge(c)))
}

fn every_policy() -> Vec<(ProtectionPolicy, KeyAuthenticator)> {
    vec![
        (ProtectionPolicy::None, KeyAuthenticator::None),
        (ProtectionPolicy::Password, KeyAuthenticator::with_password("correct horse")),
        (ProtectionPolicy::lock_screen(), KeyAuthenticator::LockScreen(granting())),
        (ProtectionPolicy::Biometric, KeyAuthenticator::Biometric(granting())),
    ]
}

#[test]
fn roundtrip_under_every_policy() {
    let dir = TempDir::new().unwrap();
    let vault = open_vault(&dir);
    let long = "{\"token\":\"".to_string() + &"x".repeat(8 * 1024) + "\"}";

    for (policy, auth) in every_policy() {
        let store = ConfigStore::new(vault.clone(), "credentials", policy, auth);
        for plaintext in ["", "short", long.as_str(), "日本語 ✓ émoji 🔐"] {
            assert_eq!(store.save(plaintext).unwrap(), SaveOutcome::Saved);
            assert_eq!(
                store.load().unwrap(),
                LoadOutcome::Loaded(plaintext.to_string()),
                "policy {:?}",
                policy
            );
        }
    }
}

#[test]
fn values_survive_a_new_vault_handle() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::new(
        open_vault(&dir),
        "client",
        ProtectionPolicy::Password,
        KeyAuthenticator::with_password("pw"),
    );
    store.save("persisted").unwrap();

    let reopened = ConfigStore::new(
        open_vault(&dir),
        "client",
        ProtectionPolicy::Password,
        KeyAuthenticator::with_password("pw"),
    );
    assert_eq!(reopened.load().unwrap(), LoadOutcome::Loaded("persisted".to_string()));
}

#[test]
fn policies_do_not_collide() {
    let dir = TempDir::new().unwrap();
    let vault = open_vault(&dir);

    let none = unprotected(vault.clone(), "shared");
    let password = ConfigStore::new(
        vault.clone(),
        "shared",
        ProtectionPolicy::Password,
        KeyAuthenticator::with_password("pw"),
    );

    none.save("plain").unwrap();
    password.save("guarded").unwrap();

    assert_eq!(none.load().unwrap(), LoadOutcome::Loaded("plain".to_string()));
    assert_eq!(password.load().unwrap(), LoadOutcome::Loaded("guarded".to_string()));

    none.remove().unwrap();
    assert_eq!(none.load().unwrap(), LoadOutcome::NotFound);
    assert_eq!(password.load().unwrap(), LoadOutcome::Loaded("guarded".to_string()));
}

#[test]
fn wrong_password_cannot_unwrap() {
    let dir = TempDir::new().unwrap();
    let vault = open_vault(&dir);
    ConfigStore::new(
        vault.clone(),
        "client",
        ProtectionPolicy::Password,
        KeyAuthenticator::with_password("right"),
    )
    .save("secret")
    .unwrap();

    for wrong in ["wrong", "right ", "RIGHT"] {
        let store = ConfigStore::new(
            vault.clone(),
            "client",
            ProtectionPolicy::Password,
            KeyAuthenticator::with_password(wrong),
        );
        assert_eq!(store.load().unwrap_err().kind(), ErrorKind::AuthenticationFailed);
    }
}

#[test]
fn blank_password_is_invalid_argument() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::new(
        open_vault(&dir),
        "client",
        ProtectionPolicy::Password,
        KeyAuthenticator::with_password("   "),
    );

    assert_eq!(store.save("x").unwrap_err().kind(), ErrorKind::InvalidArgument);
}

#[test]
fn cancellation_is_reported_as_outcome() {
    let dir = TempDir::new().unwrap();
    let vault = open_vault(&dir);
    let cancel: Arc<dyn PlatformChallenge> =
        Arc::new(|_: &KeyChallenge| AuthOutcome::<AuthorizationToken>::Cancelled);

    let store = ConfigStore::new(
        vault.clone(),
        "client",
        ProtectionPolicy::Biometric,
        KeyAuthenticator::Biometric(cancel),
    );
    assert_eq!(store.save("x").unwrap(), SaveOutcome::Cancelled);

    ConfigStore::new(
        vault.clone(),
        "client",
        ProtectionPolicy::Biometric,
        KeyAuthenticator::Biometric(granting()),
    )
    .save("x")
    .unwrap();
    assert_eq!(store.load().unwrap(), LoadOutcome::Cancelled);

    let password_cancel = ConfigStore::new(
        vault,
        "other",
        ProtectionPolicy::Password,
        KeyAuthenticator::Password(Arc::new(|| AuthOutcome::<Zeroizing<String>>::Cancelled)),
    );
    assert_eq!(password_cancel.save("x").unwrap(), SaveOutcome::Cancelled);
}

#[test]
fn invalid_identifiers_touch_nothing() {
    let dir = TempDir::new().unwrap();
    let vault = open_vault(&dir);
    let too_long = "a".repeat(101);

    for identifier in ["", "   ", "tab\there", "new\nline", "nul\u{0}", "a b", too_long.as_str()] {
        let store = unprotected(vault.clone(), identifier);
        assert_eq!(store.save("x").unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(store.load().unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(store.remove().unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn platform_not_prompted_for_invalid_identifier() {
    let dir = TempDir::new().unwrap();
    let prompts = Arc::new(AtomicUsize::new(0));
    let counter = prompts.clone();
    let platform: Arc<dyn PlatformChallenge> = Arc::new(move |c: &KeyChallenge| {
        counter.fetch_add(1, Ordering::SeqCst);
        AuthOutcome::Granted(AuthorizationToken::for_challenge(c))
    });

    let store = ConfigStore::new(
        open_vault(&dir),
        "bad id",
        ProtectionPolicy::Biometric,
        KeyAuthenticator::Biometric(platform),
    );
    assert!(store.save("x").is_err());
    assert_eq!(prompts.load(Ordering::SeqCst), 0);
}

#[test]
fn tampered_blob_is_detected() {
    let dir = TempDir::new().unwrap();
    let vault = open_vault(&dir);
    let store = unprotected(vault.clone(), "client");
    store.save("{\"api_key\":\"k\"}").unwrap();

    let path = vault.config().blob_path(&store.storage_name());
    let original = fs::read(&path).unwrap();
    for index in [0, original.len() / 2, original.len() - 1] {
        let mut tampered = original.clone();
        tampered[index] ^= 0x01;
        fs::write(&path, &tampered).unwrap();

        assert_eq!(store.load().unwrap_err().kind(), ErrorKind::TamperDetected);
    }
}

#[test]
fn tampered_keystore_is_detected() {
    let dir = TempDir::new().unwrap();
    unprotected(open_vault(&dir), "client").save("x").unwrap();

    let keystore = fast_config(&dir).keystore_path();
    let mut bytes = fs::read(&keystore).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x80;
    fs::write(&keystore, &bytes).unwrap();

    let store = unprotected(open_vault(&dir), "client");
    assert_eq!(store.load().unwrap_err().kind(), ErrorKind::TamperDetected);
}

#[test]
fn concurrent_first_access_creates_one_key() {
    let dir = TempDir::new().unwrap();
    let vault = open_vault(&dir);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let vault = vault.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let key = vault
                    .get_or_create_key("credentials-NO", ProtectionPolicy::None, None)
                    .unwrap();
                (vault.container().unwrap(), *key.as_bytes())
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for (container, key) in &results {
        assert!(Arc::ptr_eq(container, &results[0].0));
        assert_eq!(key, &results[0].1);
    }
    assert_eq!(vault.entries().unwrap().len(), 1);

    // The persisted container holds the same single entry.
    let reopened = open_vault(&dir);
    assert_eq!(reopened.entries().unwrap().len(), 1);
}

#[test]
fn concurrent_saves_to_distinct_identifiers() {
    let dir = TempDir::new().unwrap();
    let vault = open_vault(&dir);

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let vault = vault.clone();
            thread::spawn(move || {
                let store = ConfigStore::new(
                    vault,
                    format!("client_{}", i),
                    ProtectionPolicy::None,
                    KeyAuthenticator::None,
                );
                store.save(&format!("value {}", i)).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let reopened = open_vault(&dir);
    assert_eq!(reopened.entries().unwrap().len(), 6);
    for i in 0..6 {
        let store = ConfigStore::new(
            reopened.clone(),
            format!("client_{}", i),
            ProtectionPolicy::None,
            KeyAuthenticator::None,
        );
        assert_eq!(store.load().unwrap(), LoadOutcome::Loaded(format!("value {}", i)));
    }
}

#[test]
fn legacy_empty_password_mode_roundtrips() {
    let dir = TempDir::new().unwrap();
    let vault = Arc::new(
        SecretKeyVault::new(fast_config(&dir).with_legacy_empty_password(true)).unwrap(),
    );
    let store = unprotected(vault, "client");

    store.save("legacy").unwrap();
    assert_eq!(store.load().unwrap(), LoadOutcome::Loaded("legacy".to_string()));
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 16, .. ProptestConfig::default() })]

    #[test]
    fn any_string_roundtrips(plaintext in any::<String>()) {
        let dir = TempDir::new().unwrap();
        let store = unprotected(open_vault(&dir), "prop");

        prop_assert_eq!(store.save(&plaintext).unwrap(), SaveOutcome::Saved);
        prop_assert_eq!(store.load().unwrap(), LoadOutcome::Loaded(plaintext));
    }
}
