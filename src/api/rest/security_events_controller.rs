use crate::api::rest::extractors::AdminUser;
use crate::api::rest::{ApiResult, AppState};
use crate::db::models::security_event_models::{SecurityEvent, SecurityEventQuery};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};

pub fn create_router() -> Router<AppState> {
    Router::new().route("/", get(list_events))
}

async fn list_events(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<SecurityEventQuery>,
) -> ApiResult<Json<Vec<SecurityEvent>>> {
    let events = state.auth_service.list_events(&query).await?;
    Ok(Json(events))
}
