use crate::api::rest::extractors::{ApiJson, ClientInfo, CurrentUser};
use crate::api::rest::{ApiResult, AppState};
use crate::db::models::user_models::{ChangePasswordRequest, LoginCredentials, SessionGrant, User};
use crate::error::Error;
use crate::security::auth::LoginOutcome;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use log::info;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/change-password", post(change_password))
}

async fn login(
    State(state): State<AppState>,
    ClientInfo(client): ClientInfo,
    ApiJson(credentials): ApiJson<LoginCredentials>,
) -> ApiResult<Json<SessionGrant>> {
    match state.auth_service.login(&credentials, &client).await? {
        LoginOutcome::Authenticated(grant) => {
            info!("Issued session for {}", grant.user.username);
            Ok(Json(grant))
        }
        // Locked and rejected attempts look the same from outside
        LoginOutcome::Locked | LoginOutcome::Rejected => {
            Err(Error::Authentication("Invalid credentials".to_string()).into())
        }
    }
}

async fn logout(State(state): State<AppState>, current: CurrentUser) -> ApiResult<StatusCode> {
    state
        .auth_service
        .logout(&current.token, &current.user, &current.client)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn me(current: CurrentUser) -> Json<User> {
    Json(current.user)
}

async fn change_password(
    State(state): State<AppState>,
    current: CurrentUser,
    ApiJson(request): ApiJson<ChangePasswordRequest>,
) -> ApiResult<StatusCode> {
    state
        .auth_service
        .change_password(
            &current.user,
            &request.current_password,
            &request.new_password,
            &current.client,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
