use std::net::SocketAddr;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::{auth, db::now_utc, rate_limit::limit_per_client, state::AppState, users};

const BODY_LIMIT: usize = 10 * 1024 * 1024;

pub fn build_app(state: AppState) -> anyhow::Result<Router> {
    let limits = state.config.rate_limit;
    let auth_routes = limit_per_client(auth::router(), limits.auth_max, limits.window())?;

    let api = Router::new()
        .merge(auth_routes)
        .merge(users::router())
        .route("/health", get(health));
    let api = limit_per_client(api, limits.api_max, limits.window())?;

    let app = Router::new()
        .nest("/api", api)
        .fallback(not_found)
        .layer(cors(&state.config.cors_origins))
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
        .with_state(state);
    Ok(app)
}

fn cors(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([HeaderName::from_static("retry-after")])
        .allow_credentials(true)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let timestamp = now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default();
    Json(json!({
        "status": "OK",
        "timestamp": timestamp,
        "uptime": state.started_at.elapsed().as_secs_f64(),
        "environment": state.config.environment,
    }))
}

async fn not_found(method: Method, uri: Uri) -> impl IntoResponse {
    tracing::debug!(%method, path = %uri.path(), "route not found");
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Route not found",
            "path": uri.path(),
            "method": method.as_str(),
        })),
    )
}

pub async fn serve(app: Router, addr: SocketAddr) -> anyhow::Result<()> {
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::{
        auth::{jwt::JwtKeys, services::Registration},
        config::JwtConfig,
    };

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, axum::http::HeaderMap, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, json)
    }

    fn login_body(email: &str, password: &str) -> Value {
        json!({ "email": email, "password": password })
    }

    async fn register(state: &AppState, email: &str, first: &str) -> (i64, String) {
        let out = state
            .auth
            .register(Registration {
                email,
                password: "Str0ngPass!",
                first_name: first,
                last_name: "Tester",
            })
            .await
            .unwrap();
        (out.user.id, out.token)
    }

    #[tokio::test]
    async fn register_login_then_lock_after_five_failures() {
        let app = build_app(AppState::for_tests(100).await).unwrap();

        let (status, _, body) = send(
            &app,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({
                "email": "alice@example.com",
                "password": "Str0ngPass!",
                "firstName": "Alice",
                "lastName": "A"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["user"]["email"], "alice@example.com");
        assert!(body["data"]["token"].as_str().is_some());
        assert!(body["data"]["user"].get("passwordHash").is_none());

        let (status, _, body) = send(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(login_body("alice@example.com", "Str0ngPass!")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["user"]["lastLogin"].is_string());

        for attempt in 1..=4 {
            let (status, _, body) = send(
                &app,
                Method::POST,
                "/api/auth/login",
                None,
                Some(login_body("alice@example.com", "wrong-password")),
            )
            .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "attempt {attempt}");
            assert_eq!(body["message"], "Invalid email or password");
        }

        let (status, headers, _) = send(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(login_body("alice@example.com", "wrong-password")),
        )
        .await;
        assert_eq!(status, StatusCode::LOCKED);
        let retry: u64 = headers[header::RETRY_AFTER].to_str().unwrap().parse().unwrap();
        assert!(retry > 0 && retry <= 15 * 60);

        let (status, _, _) = send(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(login_body("alice@example.com", "Str0ngPass!")),
        )
        .await;
        assert_eq!(status, StatusCode::LOCKED);
    }

    #[tokio::test]
    async fn register_rejects_bad_input_and_duplicates() {
        let app = build_app(AppState::for_tests(100).await).unwrap();

        let (status, _, body) = send(
            &app,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "email": "not-an-email", "password": "short" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let fields: Vec<&str> = body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["field"].as_str().unwrap())
            .collect();
        assert!(fields.contains(&"email"));
        assert!(fields.contains(&"password"));
        assert!(fields.contains(&"firstName"));

        let alice = json!({
            "email": "alice@example.com",
            "password": "Str0ngPass!",
            "firstName": "Alice",
            "lastName": "Liddell"
        });
        let (status, _, _) =
            send(&app, Method::POST, "/api/auth/register", None, Some(alice.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _, body) =
            send(&app, Method::POST, "/api/auth/register", None, Some(alice)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let app = build_app(AppState::for_tests(100).await).unwrap();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn profile_requires_a_valid_token() {
        let state = AppState::for_tests(100).await;
        let (id, token) = register(&state, "bob@example.com", "Bob").await;
        let app = build_app(state.clone()).unwrap();

        let (status, _, body) = send(&app, Method::GET, "/api/users/profile", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Access token required");

        let foreign = JwtKeys::from_config(&JwtConfig {
            secret: "some-other-secret".into(),
            issuer: "userauth".into(),
            audience: "userauth-clients".into(),
            ttl_minutes: 60,
        })
        .sign(id)
        .unwrap();
        let (status, _, _) =
            send(&app, Method::GET, "/api/users/profile", Some(&foreign), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let expired = state
            .auth
            .keys()
            .sign_at(id, time::OffsetDateTime::now_utc() - time::Duration::minutes(61))
            .unwrap();
        let (status, _, body) =
            send(&app, Method::GET, "/api/users/profile", Some(&expired), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Invalid or expired token");

        let (status, _, body) =
            send(&app, Method::GET, "/api/users/profile", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["user"]["id"], id);
        assert_eq!(body["data"]["user"]["fullName"], "Bob Tester");
    }

    #[tokio::test]
    async fn update_profile_validates_and_persists() {
        let state = AppState::for_tests(100).await;
        let (_, token) = register(&state, "carol@example.com", "Carol").await;
        let app = build_app(state).unwrap();

        let (status, _, _) = send(
            &app,
            Method::PUT,
            "/api/users/profile",
            Some(&token),
            Some(json!({ "firstName": "C", "lastName": "Danvers" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, body) = send(
            &app,
            Method::PUT,
            "/api/users/profile",
            Some(&token),
            Some(json!({ "firstName": "  Carol ", "lastName": "Danvers" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["user"]["fullName"], "Carol Danvers");

        let (_, _, body) = send(&app, Method::GET, "/api/users/profile", Some(&token), None).await;
        assert_eq!(body["data"]["user"]["lastName"], "Danvers");
    }

    #[tokio::test]
    async fn lists_active_users_page_by_page() {
        let state = AppState::for_tests(100).await;
        register(&state, "one@example.com", "One").await;
        register(&state, "two@example.com", "Two").await;
        let (_, token) = register(&state, "three@example.com", "Three").await;
        let app = build_app(state).unwrap();

        let (status, _, body) = send(
            &app,
            Method::GET,
            "/api/users/all?page=1&limit=2",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let users = body["data"]["users"].as_array().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0]["email"], "three@example.com");
        let pagination = &body["data"]["pagination"];
        assert_eq!(pagination["totalUsers"], 3);
        assert_eq!(pagination["totalPages"], 2);
        assert_eq!(pagination["hasNextPage"], true);
        assert_eq!(pagination["hasPrevPage"], false);

        let (_, _, body) = send(
            &app,
            Method::GET,
            "/api/users/all?page=2&limit=2",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(body["data"]["users"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"]["users"][0]["email"], "one@example.com");

        let (status, _, body) =
            send(&app, Method::GET, "/api/users/stats", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["totalUsers"], 3);
        assert!(body["data"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn logout_revokes_only_that_token() {
        let state = AppState::for_tests(100).await;
        let (_, first) = register(&state, "dave@example.com", "Dave").await;
        let app = build_app(state).unwrap();

        let (status, _, body) = send(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(login_body("dave@example.com", "Str0ngPass!")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let second = body["data"]["token"].as_str().unwrap().to_owned();

        let (status, _, _) = send(&app, Method::POST, "/api/auth/logout", Some(&first), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, _) = send(&app, Method::GET, "/api/auth/verify", Some(&first), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _, body) =
            send(&app, Method::GET, "/api/auth/verify", Some(&second), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["user"]["email"], "dave@example.com");
    }

    #[tokio::test]
    async fn auth_routes_are_rate_limited() {
        let app = build_app(AppState::for_tests(2).await).unwrap();
        for _ in 0..2 {
            let (status, _, _) = send(
                &app,
                Method::POST,
                "/api/auth/login",
                None,
                Some(login_body("nobody@example.com", "Whatever1!")),
            )
            .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
        let (status, headers, body) = send(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(login_body("nobody@example.com", "Whatever1!")),
        )
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(headers.contains_key(header::RETRY_AFTER));
        assert_eq!(body["success"], false);

        // The tighter limit applies to auth routes only.
        let (status, _, _) = send(&app, Method::GET, "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn default_auth_limit_throttles_before_lockout() {
        let app = build_app(AppState::for_tests(5).await).unwrap();
        let (status, _, _) = send(
            &app,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({
                "email": "erin@example.com",
                "password": "Str0ngPass!",
                "firstName": "Erin",
                "lastName": "E"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _, _) = send(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(login_body("erin@example.com", "Str0ngPass!")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let mut statuses = Vec::new();
        for _ in 0..5 {
            let (status, _, _) = send(
                &app,
                Method::POST,
                "/api/auth/login",
                None,
                Some(login_body("erin@example.com", "wrong-password")),
            )
            .await;
            statuses.push(status);
        }
        assert_eq!(
            statuses,
            [
                StatusCode::UNAUTHORIZED,
                StatusCode::UNAUTHORIZED,
                StatusCode::UNAUTHORIZED,
                StatusCode::TOO_MANY_REQUESTS,
                StatusCode::TOO_MANY_REQUESTS,
            ]
        );
    }

    #[tokio::test]
    async fn health_and_unknown_routes() {
        let app = build_app(AppState::for_tests(100).await).unwrap();

        let (status, headers, body) = send(&app, Method::GET, "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "OK");
        assert_eq!(body["environment"], "test");
        assert!(body["uptime"].is_number());
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");

        let (status, _, body) = send(&app, Method::DELETE, "/api/nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Route not found");
        assert_eq!(body["path"], "/api/nope");
        assert_eq!(body["method"], "DELETE");
    }
}
