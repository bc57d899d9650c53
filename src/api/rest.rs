use crate::config::{ApiConfig, RateLimitConfig};
use crate::error::Error;
use crate::security::auth::AuthService;
use crate::security::rate_limit::RateLimiter;
use crate::services::PeerManager;
use anyhow::Result;
use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    Json, Router,
};
use log::{error, info};
use serde::Serialize;
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

pub mod auth_controller;
pub mod extractors;
pub mod health_controller;
pub mod middleware;
pub mod peers_controller;
pub mod security_events_controller;
pub mod stats_controller;
pub mod users_controller;

#[cfg(test)]
mod tests;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: Arc<SqlitePool>,
    pub auth_service: Arc<AuthService>,
    pub peer_manager: Arc<PeerManager>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub rate_limit: RateLimitConfig,
    pub trust_proxy_headers: bool,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
    /// Infrastructure error behind a generic 500, picked up by the failure recorder
    #[serde(skip)]
    pub failure: Option<Error>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError {
            message: message.into(),
            status: status.as_u16(),
            failure: None,
        }
    }

    fn internal(failure: Option<Error>) -> Self {
        ApiError {
            message: "Internal server error".to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            failure,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(_) => ApiError::new(StatusCode::BAD_REQUEST, err.to_string()),
            Error::Authentication(_) => {
                ApiError::new(StatusCode::UNAUTHORIZED, "Authentication failed")
            }
            Error::Authorization(_) => {
                ApiError::new(StatusCode::FORBIDDEN, "Insufficient permissions")
            }
            Error::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, err.to_string()),
            Error::Constraint(_) => ApiError::new(StatusCode::CONFLICT, err.to_string()),
            Error::RateLimited(_) => ApiError::new(
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests, try again later",
            ),
            _ => {
                error!("Request failed: {}", err);
                let failure = err.is_infrastructure().then(|| err.clone());
                ApiError::internal(failure)
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(err) = err.downcast_ref::<Error>() {
            return (*err).clone().into();
        }

        error!("Unhandled error: {:#}", err);
        ApiError::internal(Some(Error::Internal(err.to_string())))
    }
}

/// Implement IntoResponse for ApiError
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let failure = self.failure.clone();
        let mut response = (status, Json(self)).into_response();
        if let Some(failure) = failure {
            response.extensions_mut().insert(failure);
        }
        response
    }
}

/// Every route with its middleware, ready to serve
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/auth", auth_controller::create_router())
        .nest("/api/peers", peers_controller::create_router())
        .nest("/api/users", users_controller::create_router())
        .nest("/api/stats", stats_controller::create_router())
        .nest(
            "/api/security-events",
            security_events_controller::create_router(),
        )
        .merge(health_controller::create_router())
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .layer(from_fn_with_state(state.clone(), middleware::record_failures))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|origin| {
            origin
                .parse::<HeaderValue>()
                .map_err(|_| Error::Config(format!("Invalid CORS origin: {}", origin)))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600)))
}

pub struct RestApi {
    config: ApiConfig,
    state: AppState,
}

impl RestApi {
    pub fn new(config: &ApiConfig, state: AppState) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            state,
        })
    }

    pub async fn run(&self) -> Result<()> {
        let app = router(self.state.clone());

        // Without configured origins the browser's same-origin policy applies
        let app = if self.config.cors_origins.is_empty() {
            app
        } else {
            app.layer(cors_layer(&self.config.cors_origins)?)
        };

        let addr = self.config.address.clone() + ":" + &self.config.port.to_string();
        let addr: SocketAddr = addr.parse()?;

        info!("API server listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;

        axum::Server::from_tcp(listener.into_std()?)?
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("API server stopped");

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
