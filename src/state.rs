use std::{sync::Arc, time::Instant};

use axum::extract::FromRef;
use sqlx::SqlitePool;

use crate::{
    auth::{jwt::JwtKeys, services::AuthService, sessions::SessionRepo},
    config::AppConfig,
    users::repo::UserRepo,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: UserRepo,
    pub auth: AuthService,
    pub started_at: Instant,
}

impl AppState {
    /// Wires repositories and services over an already migrated pool.
    pub fn init(db: SqlitePool, config: AppConfig) -> anyhow::Result<Self> {
        let users = UserRepo::new(db.clone(), config.hashing, config.lockout);
        let sessions = SessionRepo::new(db);
        let keys = JwtKeys::from_config(&config.jwt);
        let auth = AuthService::new(users.clone(), sessions, keys, &config.hashing)?;

        Ok(Self {
            config: Arc::new(config),
            users,
            auth,
            started_at: Instant::now(),
        })
    }

    /// In-memory database, cheap hashing and a caller-chosen auth limit.
    #[cfg(test)]
    pub async fn for_tests(auth_max: u32) -> Self {
        use crate::{
            auth::password::fast_params,
            config::{JwtConfig, LockoutConfig, RateLimitConfig},
        };

        let db = crate::db::connect_in_memory().await;
        let config = AppConfig {
            database_url: "sqlite::memory:".into(),
            environment: "test".into(),
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "userauth".into(),
                audience: "userauth-clients".into(),
                ttl_minutes: 60,
            },
            lockout: LockoutConfig::default(),
            hashing: fast_params(),
            rate_limit: RateLimitConfig {
                auth_max,
                api_max: 1_000,
                window_secs: 900,
            },
            db_max_connections: 1,
            db_timeout_secs: 5,
            request_timeout_secs: 30,
            cors_origins: vec!["http://localhost:3000".into()],
        };
        Self::init(db, config).expect("test state")
    }
}

impl FromRef<AppState> for AuthService {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}
