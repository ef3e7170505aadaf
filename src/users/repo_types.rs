use sqlx::FromRow;
use time::OffsetDateTime;

use crate::auth::password::PasswordError;

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    /// Only populated by `find_by_email(.., true)`; never serialized.
    pub password_hash: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub last_login: Option<OffsetDateTime>,
    pub login_attempts: i64,
    pub locked_until: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Time left on the lock, if the account is locked at `now`.
    pub fn lock_remaining(&self, now: OffsetDateTime) -> Option<time::Duration> {
        self.locked_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    pub fn is_locked(&self, now: OffsetDateTime) -> bool {
        self.lock_remaining(now).is_some()
    }
}

/// Counters returned by `record_failed_login`.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct LoginAttempts {
    #[sqlx(rename = "login_attempts")]
    pub attempts: i64,
    pub locked_until: Option<OffsetDateTime>,
}

impl LoginAttempts {
    pub fn lock_remaining(&self, now: OffsetDateTime) -> Option<time::Duration> {
        self.locked_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("email already exists")]
    DuplicateEmail,
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error("password verification failed: {0}")]
    Verification(String),
    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl RepoError {
    pub(crate) fn hashing(e: PasswordError) -> Self {
        Self::Hashing(e.to_string())
    }

    pub(crate) fn verification(e: PasswordError) -> Self {
        Self::Verification(e.to_string())
    }
}
