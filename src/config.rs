use std::{fmt, str::FromStr, time::Duration};

use anyhow::Context;
use serde::Deserialize;

#[derive(Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("ttl_minutes", &self.ttl_minutes)
            .finish()
    }
}

/// Failed-login policy: `threshold` consecutive failures lock the account
/// for `minutes`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LockoutConfig {
    pub threshold: i64,
    pub minutes: i64,
}

impl LockoutConfig {
    pub fn duration(&self) -> time::Duration {
        time::Duration::minutes(self.minutes)
    }
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            minutes: 15,
        }
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per window per client on `/api/auth/*`.
    pub auth_max: u32,
    /// Requests per window per client on all of `/api/*`.
    pub api_max: u32,
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub environment: String,
    pub jwt: JwtConfig,
    pub lockout: LockoutConfig,
    pub hashing: HashConfig,
    pub rate_limit: RateLimitConfig,
    pub db_max_connections: u32,
    pub db_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub cors_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if secret.trim().is_empty() {
            anyhow::bail!("JWT_SECRET must not be empty");
        }

        let jwt = JwtConfig {
            secret,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "userauth".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "userauth-clients".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 60 * 24),
        };

        let defaults = HashConfig::default();
        let hashing = HashConfig {
            memory_kib: env_or("HASH_MEMORY_KIB", defaults.memory_kib),
            iterations: env_or("HASH_ITERATIONS", defaults.iterations),
            parallelism: env_or("HASH_PARALLELISM", defaults.parallelism),
        };

        let lockout = LockoutConfig {
            threshold: env_or("LOCKOUT_THRESHOLD", 5),
            minutes: env_or("LOCKOUT_MINUTES", 15),
        };
        if lockout.threshold < 1 {
            anyhow::bail!("LOCKOUT_THRESHOLD must be at least 1");
        }

        let rate_limit = RateLimitConfig {
            auth_max: env_or("AUTH_RATE_LIMIT", 5),
            api_max: env_or("API_RATE_LIMIT", 100),
            window_secs: env_or("RATE_LIMIT_WINDOW_SECS", 15 * 60),
        };

        let cors_origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".into())
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://users.db?mode=rwc".into()),
            environment: std::env::var("APP_ENV").unwrap_or_else(|_| "development".into()),
            jwt,
            lockout,
            hashing,
            rate_limit,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 5),
            db_timeout_secs: env_or("DB_TIMEOUT_SECS", 5),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30),
            cors_origins,
        })
    }

    pub fn db_timeout(&self) -> Duration {
        Duration::from_secs(self.db_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
