use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    Router,
};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::KeyExtractor, GovernorError, GovernorLayer,
};
use tracing::warn;

use crate::error::ApiError;

/// Rate-limit key: peer address when the server runs with connect info,
/// otherwise the first `X-Forwarded-For` hop, otherwise one shared bucket.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp;

impl KeyExtractor for ClientIp {
    type Key = String;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        Ok(client_key(req))
    }
}

fn client_key<T>(req: &Request<T>) -> String {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| "unknown".into())
}

/// Puts every route registered so far on `router` behind a per-client token
/// bucket: `max` requests in a burst, refilled evenly over `window`.
pub fn limit_per_client<S>(
    router: Router<S>,
    max: u32,
    window: Duration,
) -> anyhow::Result<Router<S>>
where
    S: Clone + Send + Sync + 'static,
{
    let refill_ms = (window.as_millis() / u128::from(max.max(1))).max(1);
    let config = GovernorConfigBuilder::default()
        .key_extractor(ClientIp)
        .per_millisecond(u64::try_from(refill_ms).unwrap_or(u64::MAX))
        .burst_size(max)
        .finish()
        .ok_or_else(|| anyhow::anyhow!("invalid rate limit: {max} per {window:?}"))?;
    let config = Arc::new(config);

    // Forget idle clients so the key store doesn't grow without bound.
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        let limiter = config.limiter().clone();
        runtime.spawn(async move {
            let mut tick = tokio::time::interval(window);
            loop {
                tick.tick().await;
                limiter.retain_recent();
            }
        });
    }

    Ok(router
        .route_layer(GovernorLayer { config })
        .route_layer(middleware::map_response(json_rejection)))
}

/// Rewrites the governor's plain-text 429 into the API error envelope,
/// keeping its wait time as `Retry-After`.
async fn json_rejection(response: Response) -> Response {
    if response.status() != StatusCode::TOO_MANY_REQUESTS {
        return response;
    }
    let retry_after_secs = ["retry-after", "x-ratelimit-after"]
        .iter()
        .find_map(|name| response.headers().get(*name))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(1)
        .max(1);
    warn!(retry_after_secs, "rate limit exceeded");
    ApiError::RateLimited { retry_after_secs }.into_response()
}
