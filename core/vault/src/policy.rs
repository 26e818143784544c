//! Protection policies for vault keys.

use std::mem;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::config::DEFAULT_LOCK_SCREEN_VALIDITY_SECS;
use lockbox_common::{Error, Result};

/// How a vault key is guarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtectionPolicy {
    /// Released unconditionally.
    None,
    /// Wrapped under a caller-supplied passphrase.
    Password,
    /// Released after a device lock-screen challenge; the challenge stays
    /// valid for `valid_for_secs`.
    LockScreen { valid_for_secs: u64 },
    /// Released after a biometric challenge, every time.
    Biometric,
}

impl ProtectionPolicy {
    /// Lock-screen policy with the default validity window.
    pub fn lock_screen() -> Self {
        ProtectionPolicy::LockScreen {
            valid_for_secs: DEFAULT_LOCK_SCREEN_VALIDITY_SECS,
        }
    }

    /// Short tag appended to storage names so that one identifier saved
    /// under different policies never collides.
    pub fn suffix(&self) -> &'static str {
        match self {
            ProtectionPolicy::None => "NO",
            ProtectionPolicy::Password => "PW",
            ProtectionPolicy::LockScreen { .. } => "LS",
            ProtectionPolicy::Biometric => "BI",
        }
    }

    /// Whether the key is only released for a platform challenge token.
    pub fn requires_challenge(&self) -> bool {
        matches!(
            self,
            ProtectionPolicy::LockScreen { .. } | ProtectionPolicy::Biometric
        )
    }

    /// Same policy kind, ignoring lock-screen timing.
    pub fn same_kind(&self, other: &ProtectionPolicy) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }

    /// # Errors
    /// - `InvalidArgument` for a lock-screen window of zero seconds
    pub fn validate(&self) -> Result<()> {
        match self {
            ProtectionPolicy::LockScreen { valid_for_secs: 0 } => Err(Error::InvalidArgument(
                "Lock-screen validity must be positive".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// How an entry is wrapped inside the keystore container.
#[derive(Clone)]
pub enum ProtectionParameter {
    /// Stored as-is under the container encryption.
    Unprotected,
    /// Legacy-compatibility marker. The key is stored and released exactly
    /// like [`Unprotected`](Self::Unprotected); only the entry's recorded
    /// protection differs.
    EmptyPassword,
    /// Wrapped under a key derived from this passphrase.
    Password(Zeroizing<String>),
}

impl ProtectionParameter {
    /// Pick the protection for a new entry.
    ///
    /// Lock-screen and biometric entries are gated by their challenge rather
    /// than a passphrase, so they are stored like unprotected ones.
    ///
    /// # Errors
    /// - `InvalidArgument` for a password policy without a non-blank secret
    pub fn for_policy(
        policy: &ProtectionPolicy,
        auth_secret: Option<&str>,
        legacy_empty_password: bool,
    ) -> Result<Self> {
        match policy {
            ProtectionPolicy::Password => match auth_secret {
                Some(secret) if !secret.trim().is_empty() => {
                    Ok(ProtectionParameter::Password(Zeroizing::new(secret.to_string())))
                }
                _ => Err(Error::InvalidArgument("Password cannot be blank".to_string())),
            },
            ProtectionPolicy::None if legacy_empty_password => {
                Ok(ProtectionParameter::EmptyPassword)
            }
            _ => Ok(ProtectionParameter::Unprotected),
        }
    }
}

impl std::fmt::Debug for ProtectionParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtectionParameter::Unprotected => write!(f, "Unprotected"),
            ProtectionParameter::EmptyPassword => write!(f, "EmptyPassword"),
            ProtectionParameter::Password(_) => write!(f, "Password([REDACTED])"),
        }
    }
}
