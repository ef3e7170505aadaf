use std::net::SocketAddr;

use userauth::{app, config::AppConfig, db, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    userauth::init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(environment = %config.environment, "starting userauth");

    let pool = db::connect(&config).await?;
    db::migrate(&pool).await?;

    let state = AppState::init(pool, config)?;
    let app = app::build_app(state)?;

    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "3001".into())
    )
    .parse()?;

    app::serve(app, addr).await
}
