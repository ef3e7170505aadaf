use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::debug;

use crate::db::now_utc;

/// Revoked-token list backed by the `sessions` table. Rows only matter
/// until the token would have expired anyway.
#[derive(Clone)]
pub struct SessionRepo {
    db: SqlitePool,
}

impl SessionRepo {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn revoke(
        &self,
        user_id: i64,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        let now = now_utc();
        let purged = self.purge_expired(now).await?;
        sqlx::query(
            "INSERT INTO sessions (user_id, token, expires_at, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .bind(now)
        .execute(&self.db)
        .await?;
        debug!(user_id, purged, "token revoked");
        Ok(())
    }

    pub async fn is_revoked(&self, token: &str) -> Result<bool, sqlx::Error> {
        let (hit,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM sessions WHERE token = ?)")
                .bind(token)
                .fetch_one(&self.db)
                .await?;
        Ok(hit)
    }

    pub async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::password::fast_params, config::LockoutConfig, db::connect_in_memory,
        users::repo::UserRepo,
    };

    async fn setup() -> (SessionRepo, i64) {
        let pool = connect_in_memory().await;
        let users = UserRepo::new(pool.clone(), fast_params(), LockoutConfig::default());
        let user = users
            .create("sess@example.com", "Str0ngPass!", "Se", "Ss")
            .await
            .unwrap();
        (SessionRepo::new(pool), user.id)
    }

    #[tokio::test]
    async fn revoked_tokens_are_remembered() {
        let (sessions, user_id) = setup().await;
        assert!(!sessions.is_revoked("tok-1").await.unwrap());
        sessions
            .revoke(user_id, "tok-1", now_utc() + time::Duration::hours(1))
            .await
            .unwrap();
        assert!(sessions.is_revoked("tok-1").await.unwrap());
        assert!(!sessions.is_revoked("tok-2").await.unwrap());
    }

    #[tokio::test]
    async fn purge_drops_only_expired_rows() {
        let (sessions, user_id) = setup().await;
        let now = now_utc();
        sessions
            .revoke(user_id, "old", now - time::Duration::minutes(1))
            .await
            .unwrap();
        sessions
            .revoke(user_id, "live", now + time::Duration::hours(1))
            .await
            .unwrap();
        // the second revoke already purged "old"
        assert!(!sessions.is_revoked("old").await.unwrap());
        assert!(sessions.is_revoked("live").await.unwrap());
        assert_eq!(sessions.purge_expired(now).await.unwrap(), 0);
    }
}
