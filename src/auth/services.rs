use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        claims::Claims,
        jwt::JwtKeys,
        password::{hash_password, PasswordError},
        sessions::SessionRepo,
        validation::{validate_login, validate_registration, FieldError},
    },
    config::HashConfig,
    db::now_utc,
    users::{
        repo::UserRepo,
        repo_types::{RepoError, User},
    },
};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("email already registered")]
    DuplicateEmail,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account locked for {retry_after_secs}s")]
    AccountLocked { retry_after_secs: u64 },
    #[error("invalid token")]
    InvalidToken,
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("hashing failure: {0}")]
    Hashing(String),
    #[error("token signing failure: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

impl From<RepoError> for AuthError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::DuplicateEmail => Self::DuplicateEmail,
            RepoError::Hashing(msg) | RepoError::Verification(msg) => Self::Hashing(msg),
            RepoError::Storage(e) => Self::Storage(e.to_string()),
        }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// A freshly issued token and the user it belongs to.
#[derive(Debug)]
pub struct AuthOutcome {
    pub token: String,
    pub user: User,
}

#[derive(Debug)]
pub struct Registration<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
}

/// Register/login orchestration and token issue/verify. Holds no user
/// state; every call goes back to the database.
#[derive(Clone)]
pub struct AuthService {
    users: UserRepo,
    sessions: SessionRepo,
    keys: Arc<JwtKeys>,
    /// Verified against when the email is unknown so both failure paths pay
    /// for one hash.
    dummy_hash: Arc<str>,
}

impl AuthService {
    pub fn new(
        users: UserRepo,
        sessions: SessionRepo,
        keys: JwtKeys,
        hashing: &HashConfig,
    ) -> Result<Self, PasswordError> {
        let dummy_hash = hash_password("dummy-password-for-unknown-emails", hashing)?;
        Ok(Self {
            users,
            sessions,
            keys: Arc::new(keys),
            dummy_hash: dummy_hash.into(),
        })
    }

    pub fn users(&self) -> &UserRepo {
        &self.users
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    #[instrument(skip_all, fields(email = %input.email))]
    pub async fn register(&self, input: Registration<'_>) -> Result<AuthOutcome, AuthError> {
        let email = input.email.trim();
        let first_name = input.first_name.trim();
        let last_name = input.last_name.trim();
        validate_registration(email, input.password, first_name, last_name)
            .map_err(AuthError::Validation)?;

        let user = match self
            .users
            .create(email, input.password, first_name, last_name)
            .await
        {
            Ok(u) => u,
            Err(RepoError::DuplicateEmail) => {
                warn!("email already registered");
                return Err(AuthError::DuplicateEmail);
            }
            Err(e) => return Err(e.into()),
        };

        let token = self.keys.sign(user.id)?;
        info!(user_id = user.id, "user registered");
        Ok(AuthOutcome { token, user })
    }

    #[instrument(skip_all, fields(email = %email))]
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthOutcome, AuthError> {
        let email = email.trim();
        validate_login(email, password).map_err(AuthError::Validation)?;

        let Some(user) = self.users.find_by_email(email, true).await? else {
            // Result ignored: this only burns the same CPU a real check would.
            let _ = self.users.verify_password(password, &self.dummy_hash).await;
            warn!("login unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        let now = now_utc();
        if let Some(remaining) = user.lock_remaining(now) {
            warn!(user_id = user.id, "login attempt on locked account");
            return Err(locked(remaining));
        }

        let hash = user
            .password_hash
            .as_deref()
            .ok_or_else(|| AuthError::Hashing("stored hash missing".into()))?;

        if !self.users.verify_password(password, hash).await? {
            let Some(attempts) = self.users.record_failed_login(user.id).await? else {
                return Err(AuthError::InvalidCredentials);
            };
            warn!(
                user_id = user.id,
                attempts = attempts.attempts,
                "login invalid password"
            );
            if let Some(remaining) = attempts.lock_remaining(now) {
                return Err(locked(remaining));
            }
            return Err(AuthError::InvalidCredentials);
        }

        self.users.record_successful_login(user.id).await?;
        let token = self.keys.sign(user.id)?;

        let mut user = user;
        user.password_hash = None;
        user.login_attempts = 0;
        user.last_login = Some(now);
        info!(user_id = user.id, "user logged in");
        Ok(AuthOutcome { token, user })
    }

    /// Every failure, including revocation, is `InvalidToken`.
    pub async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.keys.verify(token).map_err(|_| AuthError::InvalidToken)?;
        if self.sessions.is_revoked(token).await? {
            warn!(user_id = claims.sub, "revoked token presented");
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }

    #[instrument(skip_all, fields(user_id = claims.sub))]
    pub async fn logout(&self, token: &str, claims: &Claims) -> Result<(), AuthError> {
        let expires_at = OffsetDateTime::from_unix_timestamp(claims.exp)
            .map_err(|_| AuthError::InvalidToken)?;
        self.sessions.revoke(claims.sub, token, expires_at).await?;
        info!("user logged out");
        Ok(())
    }
}

fn locked(remaining: time::Duration) -> AuthError {
    AuthError::AccountLocked {
        retry_after_secs: remaining.whole_seconds().max(1) as u64,
    }
}
