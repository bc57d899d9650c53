use super::*;
use crate::config::{PeersConfig, SecurityConfig};
use crate::db::models::security_event_models::{SecurityAction, SecurityEventQuery};
use crate::db::models::user_models::UserRole;
use crate::db::test_pool;
use crate::security::auth::tests::{seed_user, test_config};
use crate::security::rate_limit::InMemoryRateLimiter;
use crate::telemetry::{FixtureSource, PeerTelemetrySource};
use axum::body::Body;
use axum::http::{HeaderMap, Request};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

const PASSWORD: &str = "Tunnel-2024";

async fn state_with(telemetry: Arc<dyn PeerTelemetrySource>, rate_limit: RateLimitConfig) -> AppState {
    let pool = test_pool().await;
    let security: SecurityConfig = test_config();
    let peers = PeersConfig {
        server_public_key: Some("c2VydmVyLXB1YmxpYy1rZXktZm9yLXRlc3RzLW9ubHk=".to_string()),
        ..PeersConfig::default()
    };

    AppState {
        auth_service: Arc::new(AuthService::new(Arc::clone(&pool), &security).unwrap()),
        peer_manager: Arc::new(PeerManager::new(Arc::clone(&pool), telemetry, &peers).unwrap()),
        rate_limiter: Arc::new(InMemoryRateLimiter::new(Duration::from_secs(
            rate_limit.window_secs,
        ))),
        rate_limit,
        trust_proxy_headers: false,
        db_pool: pool,
    }
}

async fn test_state() -> AppState {
    state_with(
        Arc::new(FixtureSource::from_config(&[])),
        RateLimitConfig::default(),
    )
    .await
}

async fn send(
    state: &AppState,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, HeaderMap, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}

async fn login(state: &AppState, username: &str) -> String {
    let (status, _, body) = send(
        state,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "username": username, "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {}", body);
    body["session_token"].as_str().unwrap().to_string()
}

async fn events(state: &AppState, action: SecurityAction) -> usize {
    state
        .auth_service
        .list_events(&SecurityEventQuery {
            action: Some(action),
            ..SecurityEventQuery::default()
        })
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn health_reports_database_and_sets_security_headers() {
    let state = test_state().await;

    let (status, headers, body) = send(&state, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "up");
    assert_eq!(body["telemetry_source"], "fixture");
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["referrer-policy"], "strict-origin-when-cross-origin");
}

#[tokio::test]
async fn session_lifecycle() {
    let state = test_state().await;
    seed_user(&state.db_pool, "alice", PASSWORD, UserRole::Admin).await;

    let token = login(&state, "alice").await;

    let (status, _, me) = send(&state, "GET", "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["username"], "alice");
    assert!(me.get("password_hash").is_none());

    let (status, _, _) = send(&state, "POST", "/api/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, body) = send(&state, "GET", "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Authentication failed");
    assert_eq!(events(&state, SecurityAction::Logout).await, 1);
}

#[tokio::test]
async fn rejected_and_locked_logins_look_the_same() {
    let state = test_state().await;
    seed_user(&state.db_pool, "bob", PASSWORD, UserRole::User).await;

    let mut bodies = Vec::new();
    for _ in 0..6 {
        let (status, _, body) = send(
            &state,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "username": "bob", "password": "Wrong-pass-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        bodies.push(body);
    }

    assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(events(&state, SecurityAction::AccountLocked).await, 1);
    assert_eq!(events(&state, SecurityAction::LoginBlockedLocked).await, 1);
}

#[tokio::test]
async fn missing_token_is_recorded() {
    let state = test_state().await;

    let (status, _, body) = send(&state, "GET", "/api/peers", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], 401);
    assert_eq!(events(&state, SecurityAction::UnauthorizedApiAccess).await, 1);

    let (status, _, _) = send(&state, "GET", "/api/stats", Some("not-a-session"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(events(&state, SecurityAction::UnauthorizedApiAccess).await, 2);
}

#[tokio::test]
async fn admin_routes_need_the_admin_role() {
    let state = test_state().await;
    seed_user(&state.db_pool, "carol", PASSWORD, UserRole::Moderator).await;
    let token = login(&state, "carol").await;

    let (status, _, body) = send(&state, "GET", "/api/users", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Insufficient permissions");
    assert_eq!(events(&state, SecurityAction::InsufficientPermissions).await, 1);

    let (status, _, _) = send(&state, "GET", "/api/stats", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(events(&state, SecurityAction::InsufficientPermissions).await, 2);
}

#[tokio::test]
async fn stats_overview_counts_users_and_peers() {
    let state = test_state().await;
    seed_user(&state.db_pool, "alice", PASSWORD, UserRole::Admin).await;
    seed_user(&state.db_pool, "carol", PASSWORD, UserRole::Moderator).await;
    let token = login(&state, "alice").await;

    for (name, enabled) in [("laptop", true), ("phone", false)] {
        let (status, _, _) = send(
            &state,
            "POST",
            "/api/peers",
            Some(&token),
            Some(json!({ "name": name, "enabled": enabled })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, _, stats) = send(&state, "GET", "/api/stats", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["users"]["total"], 2);
    assert_eq!(stats["users"]["active"], 2);
    assert_eq!(stats["users"]["inactive"], 0);
    assert_eq!(stats["users"]["admins"], 1);
    assert_eq!(stats["peers"]["total"], 2);
    assert_eq!(stats["peers"]["enabled"], 1);
    assert_eq!(stats["peers"]["disabled"], 1);
    assert_eq!(stats["summary"]["peer_count"], 2);
}

#[tokio::test]
async fn malformed_ids_are_json_validation_errors() {
    let state = test_state().await;
    seed_user(&state.db_pool, "alice", PASSWORD, UserRole::Admin).await;
    let token = login(&state, "alice").await;

    for uri in ["/api/peers/not-a-uuid", "/api/users/42", "/api/peers/xyz/config"] {
        let (status, headers, body) = send(&state, "GET", uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(body["status"], 400);
        assert!(body["message"].as_str().unwrap().starts_with("Validation error"));
    }
}

#[tokio::test]
async fn peer_provisioning_flow() {
    let state = test_state().await;
    seed_user(&state.db_pool, "alice", PASSWORD, UserRole::Admin).await;
    let token = login(&state, "alice").await;

    let (status, _, created) = send(
        &state,
        "POST",
        "/api/peers",
        Some(&token),
        Some(json!({ "name": "laptop" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["address"], "10.8.0.2");
    assert_eq!(created["status"], "disconnected");
    assert!(created.get("private_key").is_none());
    let id = created["id"].as_str().unwrap().to_string();

    let (status, _, listing) = send(&state, "GET", "/api/peers", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["peers"].as_array().unwrap().len(), 1);
    assert_eq!(listing["statistics"].as_array().unwrap().len(), 3);
    assert_eq!(listing["summary"]["average_per_peer"], 0);

    let (status, _, updated) = send(
        &state,
        "PUT",
        &format!("/api/peers/{}", id),
        Some(&token),
        Some(json!({ "enabled": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["enabled"], false);

    let (status, _, export) = send(
        &state,
        "GET",
        &format!("/api/peers/{}/config", id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(export["filename"], "laptop.conf");
    assert!(export["config"].as_str().unwrap().contains("Address = 10.8.0.2/24"));

    let (status, _, _) = send(&state, "DELETE", &format!("/api/peers/{}", id), Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(&state, "GET", &format!("/api/peers/{}", id), Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_eq!(events(&state, SecurityAction::PeerCreated).await, 1);
    assert_eq!(events(&state, SecurityAction::PeerConfigExported).await, 1);
    assert_eq!(events(&state, SecurityAction::PeerDeleted).await, 1);
}

#[tokio::test]
async fn telemetry_failure_is_a_recorded_500() {
    let state = state_with(
        Arc::new(FixtureSource::unavailable("wg: interface not found")),
        RateLimitConfig::default(),
    )
    .await;
    seed_user(&state.db_pool, "alice", PASSWORD, UserRole::Admin).await;
    let token = login(&state, "alice").await;

    let (status, _, body) = send(&state, "GET", "/api/peers", Some(&token), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Internal server error");
    assert_eq!(events(&state, SecurityAction::TelemetryUnavailable).await, 1);

    // Stats read stored counters and keep working
    let (status, _, _) = send(&state, "GET", "/api/stats", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn login_attempts_are_rate_limited() {
    let state = state_with(
        Arc::new(FixtureSource::from_config(&[])),
        RateLimitConfig {
            login_limit: 2,
            ..RateLimitConfig::default()
        },
    )
    .await;

    let attempt = || {
        send(
            &state,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "username": "nobody", "password": "Wrong-pass-1" })),
        )
    };

    assert_eq!(attempt().await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(attempt().await.0, StatusCode::UNAUTHORIZED);

    let (status, _, body) = attempt().await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["message"], "Too many requests, try again later");
    assert_eq!(events(&state, SecurityAction::ApiRateLimitExceeded).await, 1);

    let (status, _, _) = send(&state, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn user_administration() {
    let state = test_state().await;
    let admin = seed_user(&state.db_pool, "alice", PASSWORD, UserRole::Admin).await;
    let token = login(&state, "alice").await;

    let (status, _, body) = send(
        &state,
        "DELETE",
        &format!("/api/users/{}", admin.id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap().contains("own account"));

    let (status, _, created) = send(
        &state,
        "POST",
        "/api/users",
        Some(&token),
        Some(json!({ "username": "Dave", "password": "Sturdy-Pass-9", "email": "dave@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["username"], "dave");
    assert_eq!(created["role"], "user");
    let id = created["id"].as_str().unwrap().to_string();

    let (status, _, _) = send(
        &state,
        "POST",
        "/api/users",
        Some(&token),
        Some(json!({ "username": "dave", "password": "Sturdy-Pass-9" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _, reset) = send(
        &state,
        "POST",
        &format!("/api/users/{}/reset-password", id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reset["password"].as_str().unwrap().len(), 16);

    let (status, _, users) = send(&state, "GET", "/api/users", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users.as_array().unwrap().len(), 2);

    let (status, _, listed) = send(
        &state,
        "GET",
        "/api/security-events?action=password_reset",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_bodies_are_validation_errors() {
    let state = test_state().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"username\": "))
        .unwrap();
    let response = router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
