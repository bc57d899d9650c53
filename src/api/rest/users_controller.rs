use crate::api::rest::extractors::{AdminUser, ApiJson, ApiPath};
use crate::api::rest::{ApiResult, AppState};
use crate::db::models::user_models::{CreateUserRequest, UpdateUserRequest, User};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/:id", get(get_user).put(update_user).delete(delete_user))
        .route("/:id/reset-password", post(reset_password))
}

/// Returned once; the plain password is not stored
#[derive(Debug, Serialize)]
struct ResetPasswordResponse {
    password: String,
}

async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<Json<Vec<User>>> {
    let users = state.auth_service.list_users().await?;
    Ok(Json(users))
}

async fn get_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<User>> {
    let user = state.auth_service.get_user(&id).await?;
    Ok(Json(user))
}

async fn create_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiJson(request): ApiJson<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let user = state
        .auth_service
        .create_user(&admin.user, &request, &admin.client)
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn update_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<UpdateUserRequest>,
) -> ApiResult<Json<User>> {
    let user = state
        .auth_service
        .update_user(&admin.user, &id, &request, &admin.client)
        .await?;
    Ok(Json(user))
}

async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .auth_service
        .delete_user(&admin.user, &id, &admin.client)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reset_password(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<ResetPasswordResponse>> {
    let password = state
        .auth_service
        .reset_password(&admin.user, &id, &admin.client)
        .await?;
    Ok(Json(ResetPasswordResponse { password }))
}
