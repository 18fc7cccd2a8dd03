//! Email/password session management

use crate::firebase::backend::AuthBackend;
use crate::firebase::error::AuthError;
use crate::firebase::identity::Identity;
use crate::firebase::observer::Subscription;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    InvalidCredentials,
    TooManyAttempts,
    Generic,
}

impl FailureKind {
    /// Maps a backend error code such as `INVALID_PASSWORD`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "INVALID_LOGIN_CREDENTIALS" | "INVALID_PASSWORD" | "EMAIL_NOT_FOUND"
            | "INVALID_EMAIL" | "MISSING_PASSWORD" | "USER_DISABLED" => {
                FailureKind::InvalidCredentials
            }
            "TOO_MANY_ATTEMPTS_TRY_LATER" => FailureKind::TooManyAttempts,
            _ => FailureKind::Generic,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            FailureKind::InvalidCredentials => "Incorrect email or password.",
            FailureKind::TooManyAttempts => "Too many failed attempts. Please try again later.",
            FailureKind::Generic => "Could not sign in. Please try again.",
        }
    }
}

/// A failed login, carrying the message to show the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct LoginFailure {
    pub kind: FailureKind,
    pub message: &'static str,
}

impl From<FailureKind> for LoginFailure {
    fn from(kind: FailureKind) -> Self {
        Self {
            kind,
            message: kind.message(),
        }
    }
}

impl From<&AuthError> for LoginFailure {
    fn from(err: &AuthError) -> Self {
        err.code()
            .map(FailureKind::from_code)
            .unwrap_or(FailureKind::Generic)
            .into()
    }
}

pub struct SessionManager {
    auth: Arc<dyn AuthBackend>,
    current: Arc<RwLock<Option<Identity>>>,
    _mirror: Subscription,
}

impl SessionManager {
    pub fn new(auth: Arc<dyn AuthBackend>) -> Self {
        let current = Arc::new(RwLock::new(None));
        let mirror = {
            let current = current.clone();
            auth.auth_state().subscribe(move |identity: Option<&Identity>| {
                *current.write().unwrap_or_else(PoisonError::into_inner) = identity.cloned();
            })
        };

        Self {
            auth,
            current,
            _mirror: mirror,
        }
    }

    /// Signs in. The held identity is set by the transition the backend
    /// publishes, so a later sign-out is never overwritten here.
    pub async fn login(&self, email: &str, password: &str) -> Result<Identity, LoginFailure> {
        match self.auth.sign_in(email, password).await {
            Ok(identity) => {
                info!("Signed in as {}", identity);
                Ok(identity)
            }
            Err(e) => {
                warn!("Sign-in failed for {}: {}", email, e);
                Err(LoginFailure::from(&e))
            }
        }
    }

    /// Signs out. The held identity is cleared by the resulting state
    /// transition, not here.
    pub async fn logout(&self) -> Result<(), AuthError> {
        match self.auth.sign_out().await {
            Ok(()) => {
                info!("Signed out");
                Ok(())
            }
            Err(e) => {
                warn!("Sign-out failed: {}", e);
                Err(e)
            }
        }
    }

    pub fn current_user(&self) -> Option<Identity> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current_user().is_some()
    }

    /// Calls `callback` now with the current state, then on every
    /// transition until the returned subscription is dropped.
    pub fn observe_state<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Option<&Identity>) + Send + Sync + 'static,
    {
        self.auth.auth_state().subscribe(callback)
    }
}
