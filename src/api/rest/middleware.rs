use crate::api::rest::extractors::client_context;
use crate::api::rest::{ApiError, AppState};
use crate::db::models::security_event_models::{NewSecurityEvent, SecurityAction, Severity};
use crate::error::Error;
use axum::{
    body::Body,
    extract::State,
    http::{Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use log::warn;
use serde_json::json;
use std::time::Duration;

/// Login route, limited separately from the rest of the API
const LOGIN_PATH: &str = "/api/auth/login";

/// Limits that apply to a request, narrowest last
fn scopes(state: &AppState, method: &Method, path: &str) -> Vec<(&'static str, usize)> {
    let config = &state.rate_limit;
    let mut scopes = vec![("global", config.global_limit)];
    if path.starts_with("/api/") {
        scopes.push(("api", config.api_limit));
    }
    if *method == Method::POST && path == LOGIN_PATH {
        scopes.push(("login", config.login_limit));
    }
    scopes
}

/// Per-client sliding-window rate limiting
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next<Body>,
) -> Response {
    if !state.rate_limit.enabled {
        return next.run(request).await;
    }

    let client = client_context(&state, request.headers(), request.extensions());
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let window = Duration::from_secs(state.rate_limit.window_secs);

    for (scope, limit) in scopes(&state, &method, &path) {
        let key = format!("{}:{}", scope, client.rate_limit_key());
        if state.rate_limiter.check(&key, limit, window) {
            continue;
        }

        warn!(
            "Rate limit '{}' exceeded by {} on {} {}",
            scope,
            client.rate_limit_key(),
            method,
            path
        );
        state
            .auth_service
            .record_event_best_effort(
                NewSecurityEvent::new(SecurityAction::ApiRateLimitExceeded, Severity::Warning)
                    .client(client.ip_address.clone(), client.user_agent.clone())
                    .details(json!({
                        "scope": scope,
                        "limit": limit,
                        "window_secs": state.rate_limit.window_secs,
                        "method": method.as_str(),
                        "path": path,
                    })),
            )
            .await;

        return ApiError::from(Error::RateLimited(format!("{} limit exceeded", scope)))
            .into_response();
    }

    next.run(request).await
}

/// Record infrastructure failures that surfaced as a 500
pub async fn record_failures(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next<Body>,
) -> Response {
    let client = client_context(&state, request.headers(), request.extensions());
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    if let Some(failure) = response.extensions().get::<Error>() {
        let action = match failure {
            Error::Telemetry(_) => SecurityAction::TelemetryUnavailable,
            _ => SecurityAction::InfrastructureFailure,
        };
        state
            .auth_service
            .record_event_best_effort(
                NewSecurityEvent::new(action, Severity::Critical)
                    .client(client.ip_address.clone(), client.user_agent.clone())
                    .details(json!({
                        "method": method.as_str(),
                        "path": path,
                        "error": failure.to_string(),
                    })),
            )
            .await;
    }

    response
}
