use crate::api::rest::extractors::AdminUser;
use crate::api::rest::{ApiResult, AppState};
use crate::db::models::user_models::UserCounts;
use crate::services::peer_manager::PeerStats;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

pub fn create_router() -> Router<AppState> {
    Router::new().route("/", get(get_stats))
}

#[derive(Debug, Serialize)]
struct StatsOverview {
    #[serde(flatten)]
    peers: PeerStats,
    users: UserCounts,
}

/// Dashboard overview: account totals plus traffic from the last stored telemetry
async fn get_stats(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<Json<StatsOverview>> {
    let peers = state.peer_manager.stats(crate::db::now()).await?;
    let users = state.auth_service.user_counts().await?;
    Ok(Json(StatsOverview { peers, users }))
}
