//! Authenticators that unlock policy-protected keys.
//!
//! Platform flows (lock screen, biometrics) are injected through
//! [`PlatformChallenge`]. The vault issues a [`KeyChallenge`] bound to one
//! alias, and only releases the key for an [`AuthorizationToken`] minted for
//! that exact challenge.

use std::fmt;
use std::sync::Arc;

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::policy::ProtectionPolicy;
use lockbox_crypto::keys::random_bytes;

/// Result of asking a user or platform for authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome<T> {
    Granted(T),
    /// The user abandoned the challenge.
    Cancelled,
    /// The challenge was answered wrongly or the platform refused it.
    Failed(String),
}

/// Supplies a passphrase for password-protected keys.
pub trait PasswordSource: Send + Sync {
    fn password(&self) -> AuthOutcome<Zeroizing<String>>;
}

impl<F> PasswordSource for F
where
    F: Fn() -> AuthOutcome<Zeroizing<String>> + Send + Sync,
{
    fn password(&self) -> AuthOutcome<Zeroizing<String>> {
        self()
    }
}

/// A fixed passphrase.
pub struct StaticPassword(Zeroizing<String>);

impl StaticPassword {
    pub fn new(password: impl Into<String>) -> Self {
        Self(Zeroizing::new(password.into()))
    }
}

impl PasswordSource for StaticPassword {
    fn password(&self) -> AuthOutcome<Zeroizing<String>> {
        AuthOutcome::Granted(self.0.clone())
    }
}

/// Length of a challenge nonce in bytes.
pub const CHALLENGE_NONCE_LENGTH: usize = 32;

/// A single-use authorization request for one key.
#[derive(Debug)]
pub struct KeyChallenge {
    alias: String,
    policy: ProtectionPolicy,
    nonce: [u8; CHALLENGE_NONCE_LENGTH],
}

impl KeyChallenge {
    /// Issue a fresh challenge for `alias`.
    pub fn new(alias: &str, policy: ProtectionPolicy) -> Self {
        let mut nonce = [0u8; CHALLENGE_NONCE_LENGTH];
        nonce.copy_from_slice(&random_bytes(CHALLENGE_NONCE_LENGTH));
        Self {
            alias: alias.to_string(),
            policy,
            nonce,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn policy(&self) -> ProtectionPolicy {
        self.policy
    }

    /// Check and consume a token.
    pub fn accepts(&self, token: AuthorizationToken) -> bool {
        let same_nonce: bool = self.nonce.ct_eq(&token.nonce).into();
        same_nonce && self.alias == token.alias
    }
}

/// Proof that a platform challenge succeeded.
///
/// Not cloneable: each token releases a key at most once.
pub struct AuthorizationToken {
    alias: String,
    nonce: [u8; CHALLENGE_NONCE_LENGTH],
}

impl AuthorizationToken {
    /// Mint the token answering `challenge`. Platform implementations call
    /// this once the user has passed the challenge.
    pub fn for_challenge(challenge: &KeyChallenge) -> Self {
        Self {
            alias: challenge.alias.clone(),
            nonce: challenge.nonce,
        }
    }
}

impl fmt::Debug for AuthorizationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationToken")
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}

/// A platform-mediated challenge (lock screen or biometric prompt).
pub trait PlatformChallenge: Send + Sync {
    fn authorize(&self, challenge: &KeyChallenge) -> AuthOutcome<AuthorizationToken>;
}

impl<F> PlatformChallenge for F
where
    F: Fn(&KeyChallenge) -> AuthOutcome<AuthorizationToken> + Send + Sync,
{
    fn authorize(&self, challenge: &KeyChallenge) -> AuthOutcome<AuthorizationToken> {
        self(challenge)
    }
}

/// The capability a caller brings to unlock a key.
#[derive(Clone)]
pub enum KeyAuthenticator {
    None,
    Password(Arc<dyn PasswordSource>),
    LockScreen(Arc<dyn PlatformChallenge>),
    Biometric(Arc<dyn PlatformChallenge>),
}

impl KeyAuthenticator {
    /// Authenticator answering every prompt with `password`.
    pub fn with_password(password: impl Into<String>) -> Self {
        KeyAuthenticator::Password(Arc::new(StaticPassword::new(password)))
    }

    /// Whether this authenticator can unlock keys under `policy`.
    pub fn supports(&self, policy: &ProtectionPolicy) -> bool {
        matches!(
            (self, policy),
            (_, ProtectionPolicy::None)
                | (KeyAuthenticator::Password(_), ProtectionPolicy::Password)
                | (KeyAuthenticator::LockScreen(_), ProtectionPolicy::LockScreen { .. })
                | (KeyAuthenticator::Biometric(_), ProtectionPolicy::Biometric)
        )
    }
}

impl fmt::Debug for KeyAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyAuthenticator::None => "None",
            KeyAuthenticator::Password(_) => "Password",
            KeyAuthenticator::LockScreen(_) => "LockScreen",
            KeyAuthenticator::Biometric(_) => "Biometric",
        };
        write!(f, "KeyAuthenticator::{}", name)
    }
}

/// Progress of one unlock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockState {
    Requested,
    Succeeded,
    Cancelled,
    Failed,
}

impl UnlockState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UnlockState::Requested)
    }
}

/// One unlock attempt. Finishing consumes it, so a finished attempt cannot
/// be resumed or retried.
#[derive(Debug)]
pub struct UnlockAttempt {
    alias: String,
    state: UnlockState,
}

impl UnlockAttempt {
    pub fn begin(alias: &str) -> Self {
        tracing::debug!(alias, "Unlock requested");
        Self {
            alias: alias.to_string(),
            state: UnlockState::Requested,
        }
    }

    pub fn state(&self) -> UnlockState {
        self.state
    }

    pub fn finish(mut self, state: UnlockState) -> UnlockState {
        debug_assert!(state.is_terminal());
        self.state = state;
        tracing::debug!(alias = %self.alias, state = ?self.state, "Unlock finished");
        self.state
    }
}
