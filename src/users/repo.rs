use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::{
    auth::password::{hash_password, verify_password},
    config::{HashConfig, LockoutConfig},
    db::now_utc,
    users::repo_types::{LoginAttempts, RepoError, User},
};

/// Sole writer of the `users` table. Inactive rows are invisible to every
/// lookup here.
#[derive(Clone)]
pub struct UserRepo {
    db: SqlitePool,
    hashing: HashConfig,
    lockout: LockoutConfig,
}

impl UserRepo {
    pub fn new(db: SqlitePool, hashing: HashConfig, lockout: LockoutConfig) -> Self {
        Self {
            db,
            hashing,
            lockout,
        }
    }

    /// Hash `plain` and insert a fresh active user.
    pub async fn create(
        &self,
        email: &str,
        plain_password: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User, RepoError> {
        let hash = self.hash(plain_password).await?;
        let now = now_utc();

        let inserted = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash, first_name, last_name,
                               is_active, login_attempts, created_at, updated_at)
            VALUES (?, ?, ?, ?, 1, 0, ?, ?)
            RETURNING id, email, NULL AS password_hash, first_name, last_name, is_active,
                      last_login, login_attempts, locked_until, created_at, updated_at
            "#,
        )
        .bind(email)
        .bind(&hash)
        .bind(first_name)
        .bind(last_name)
        .bind(now)
        .bind(now)
        .fetch_one(&self.db)
        .await;

        match inserted {
            Ok(user) => {
                debug!(user_id = user.id, "user row inserted");
                Ok(user)
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(RepoError::DuplicateEmail)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Active user with exactly this email. The stored hash is attached only
    /// when `include_secret` is set.
    pub async fn find_by_email(
        &self,
        email: &str,
        include_secret: bool,
    ) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, CASE WHEN ? THEN password_hash END AS password_hash,
                   first_name, last_name, is_active, last_login, login_attempts,
                   locked_until, created_at, updated_at
            FROM users
            WHERE email = ? AND is_active = 1
            "#,
        )
        .bind(include_secret)
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, NULL AS password_hash, first_name, last_name, is_active,
                   last_login, login_attempts, locked_until, created_at, updated_at
            FROM users
            WHERE id = ? AND is_active = 1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    /// Runs on the blocking pool; argon2 is deliberately slow.
    pub async fn verify_password(
        &self,
        plain_password: &str,
        stored_hash: &str,
    ) -> Result<bool, RepoError> {
        let plain = plain_password.to_owned();
        let hash = stored_hash.to_owned();
        tokio::task::spawn_blocking(move || verify_password(&plain, &hash))
            .await
            .map_err(|e| RepoError::Verification(e.to_string()))?
            .map_err(RepoError::verification)
    }

    pub async fn record_successful_login(&self, id: i64) -> Result<(), RepoError> {
        let now = now_utc();
        sqlx::query(
            r#"
            UPDATE users
            SET last_login = ?, login_attempts = 0, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Increment the failure counter and, once it reaches the threshold, set
    /// the lock deadline. One conditional UPDATE, so concurrent failures
    /// cannot lose increments. `None` if the user is gone or inactive.
    pub async fn record_failed_login(&self, id: i64) -> Result<Option<LoginAttempts>, RepoError> {
        let now = now_utc();
        let lock_until = now + self.lockout.duration();

        let attempts = sqlx::query_as::<_, LoginAttempts>(
            r#"
            UPDATE users
            SET login_attempts = login_attempts + 1,
                locked_until = CASE
                    WHEN login_attempts + 1 >= ? THEN ?
                    ELSE locked_until
                END,
                updated_at = ?
            WHERE id = ? AND is_active = 1
            RETURNING login_attempts, locked_until
            "#,
        )
        .bind(self.lockout.threshold)
        .bind(lock_until)
        .bind(now)
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        if let Some(a) = &attempts {
            if a.attempts >= self.lockout.threshold {
                warn!(user_id = id, attempts = a.attempts, "account locked");
            }
        }
        Ok(attempts)
    }

    /// Newest first.
    pub async fn list_active(&self, limit: i64, offset: i64) -> Result<Vec<User>, RepoError> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, NULL AS password_hash, first_name, last_name, is_active,
                   last_login, login_attempts, locked_until, created_at, updated_at
            FROM users
            WHERE is_active = 1
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    pub async fn count_active(&self) -> Result<i64, RepoError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE is_active = 1")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    pub async fn update_profile(
        &self,
        id: i64,
        first_name: &str,
        last_name: &str,
    ) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET first_name = ?, last_name = ?, updated_at = ?
            WHERE id = ? AND is_active = 1
            RETURNING id, email, NULL AS password_hash, first_name, last_name, is_active,
                      last_login, login_attempts, locked_until, created_at, updated_at
            "#,
        )
        .bind(first_name)
        .bind(last_name)
        .bind(now_utc())
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    /// Soft delete. The row, and its email, stay reserved.
    pub async fn deactivate(&self, id: i64) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "UPDATE users SET is_active = 0, updated_at = ? WHERE id = ? AND is_active = 1",
        )
        .bind(now_utc())
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[cfg(test)]
    pub(crate) fn db_for_tests(&self) -> &SqlitePool {
        &self.db
    }

    async fn hash(&self, plain_password: &str) -> Result<String, RepoError> {
        let plain = plain_password.to_owned();
        let cfg = self.hashing;
        tokio::task::spawn_blocking(move || hash_password(&plain, &cfg))
            .await
            .map_err(|e| RepoError::Hashing(e.to_string()))?
            .map_err(RepoError::hashing)
    }
}
