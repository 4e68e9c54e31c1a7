use std::collections::HashMap;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tracing::{error, info, warn};

use dashboard_core::ActionState;
use dashboard_storage::UserRepository;

pub const CREDENTIALS_PROVIDER: &str = "credentials";
pub const DEFAULT_SIGN_IN_REDIRECT: &str = "/dashboard";
const REDIRECT_ALLOWLIST: &[&str] = &["/dashboard"];
const MIN_PASSWORD_LEN: usize = 6;

pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid credentials.";
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong.";

/// Classified authentication failures reported by an identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// The submitted credentials did not match a user.
    CredentialsSignin,
    /// The provider failed while checking credentials.
    CallbackRoute,
    UnknownProvider,
}

#[derive(Debug, Error)]
pub enum SignInError {
    #[error("authentication failed ({0:?})")]
    Auth(AuthErrorKind),
    #[error("identity provider failure: {0}")]
    Internal(String),
}

/// External identity provider that validates a raw credential payload.
///
/// On success the provider decides where the client continues.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(
        &self,
        provider: &str,
        credentials: &HashMap<String, String>,
    ) -> Result<String, SignInError>;
}

/// Result of a sign-in attempt that did not propagate an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Redirect(String),
    Rejected(ActionState),
}

/// Signs in with the credentials provider.
///
/// Classified failures become a user-facing message; anything else is
/// returned to the caller untouched.
pub async fn authenticate(
    identity: &dyn IdentityProvider,
    credentials: &HashMap<String, String>,
) -> Result<AuthOutcome, SignInError> {
    let (result, outcome) = match identity.sign_in(CREDENTIALS_PROVIDER, credentials).await {
        Ok(location) => (Ok(AuthOutcome::Redirect(location)), "ok"),
        Err(SignInError::Auth(AuthErrorKind::CredentialsSignin)) => (
            Ok(AuthOutcome::Rejected(ActionState::message(
                INVALID_CREDENTIALS_MESSAGE,
            ))),
            "invalid_credentials",
        ),
        Err(SignInError::Auth(kind)) => {
            warn!(stage = "auth", ?kind, "sign-in failed");
            (
                Ok(AuthOutcome::Rejected(ActionState::message(
                    GENERIC_FAILURE_MESSAGE,
                ))),
                "failed",
            )
        }
        Err(other) => (Err(other), "error"),
    };
    counter!("auth_sign_in_total", "result" => outcome).increment(1);
    result
}

/// Email/password provider backed by the `users` table and argon2 hashes.
#[derive(Clone)]
pub struct CredentialsProvider {
    users: UserRepository,
}

impl CredentialsProvider {
    pub fn new(users: UserRepository) -> Self {
        Self { users }
    }
}

#[async_trait]
impl IdentityProvider for CredentialsProvider {
    async fn sign_in(
        &self,
        provider: &str,
        credentials: &HashMap<String, String>,
    ) -> Result<String, SignInError> {
        if provider != CREDENTIALS_PROVIDER {
            return Err(SignInError::Auth(AuthErrorKind::UnknownProvider));
        }

        let Some((email, password)) = parse_credentials(credentials) else {
            return Err(SignInError::Auth(AuthErrorKind::CredentialsSignin));
        };

        let user = self.users.find_by_email(email).await.map_err(|err| {
            error!(stage = "auth", error = %err, "failed to fetch user");
            SignInError::Auth(AuthErrorKind::CallbackRoute)
        })?;
        let Some(user) = user else {
            return Err(SignInError::Auth(AuthErrorKind::CredentialsSignin));
        };

        let parsed = PasswordHash::new(&user.password).map_err(|err| {
            error!(
                stage = "auth",
                user_id = %user.id,
                error = %err,
                "stored password hash is malformed"
            );
            SignInError::Auth(AuthErrorKind::CallbackRoute)
        })?;
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => {}
            Err(argon2::password_hash::Error::Password) => {
                return Err(SignInError::Auth(AuthErrorKind::CredentialsSignin));
            }
            Err(err) => return Err(SignInError::Internal(err.to_string())),
        }

        info!(stage = "auth", user_id = %user.id, "user signed in");
        let location = credentials
            .get("redirectTo")
            .map(String::as_str)
            .filter(|value| is_redirect_allowed(value))
            .unwrap_or(DEFAULT_SIGN_IN_REDIRECT);
        Ok(location.to_string())
    }
}

fn parse_credentials(credentials: &HashMap<String, String>) -> Option<(&str, &str)> {
    let email = credentials.get("email")?.as_str();
    let password = credentials.get("password")?.as_str();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || password.chars().count() < MIN_PASSWORD_LEN {
        return None;
    }
    Some((email, password))
}

fn is_redirect_allowed(value: &str) -> bool {
    if !value.starts_with('/') || value.starts_with("//") || value.contains("://") {
        return false;
    }
    if value.split('/').any(|segment| segment == "..") {
        return false;
    }
    let path = value.split('?').next().unwrap_or(value);
    REDIRECT_ALLOWLIST
        .iter()
        .any(|prefix| path == *prefix || path.starts_with(&format!("{prefix}/")))
}
