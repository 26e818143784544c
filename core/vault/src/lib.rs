//! Device-local secret vault for Lockbox.
//!
//! This module provides:
//! - A keystore container guarded by a device-bound protection passphrase
//! - Named keys under none, password, lock-screen and biometric policies
//! - Authenticators for unlocking policy-protected keys
//! - Encrypted configuration blobs and the config store built on them
//!
//! # Architecture
//! Callers build one [`SecretKeyVault`] at startup and share it. Keys it
//! releases feed [`ConfigBlobCodec`] here and the file codec in
//! `lockbox-crypto`.

pub mod auth;
pub mod blob;
pub mod config;
pub mod container;
pub mod derivation;
pub mod manager;
pub mod policy;
pub mod store;

pub use auth::{
    AuthOutcome, AuthorizationToken, KeyAuthenticator, KeyChallenge, PasswordSource,
    PlatformChallenge, StaticPassword, UnlockState,
};
pub use blob::ConfigBlobCodec;
pub use config::{DerivationParams, VaultConfig};
pub use container::{EntryInfo, KeyContainer};
pub use derivation::ProtectionSecretDerivation;
pub use manager::SecretKeyVault;
pub use policy::{ProtectionParameter, ProtectionPolicy};
pub use store::{ConfigStore, LoadOutcome, SaveOutcome, DEFAULT_IDENTIFIER};
