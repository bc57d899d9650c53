use crate::api::rest::extractors::{AdminUser, ApiJson, ApiPath, CurrentUser};
use crate::api::rest::{ApiResult, AppState};
use crate::db::models::peer_models::{CreatePeerRequest, UpdatePeerRequest};
use crate::db::models::security_event_models::{NewSecurityEvent, SecurityAction, Severity};
use crate::security::ClientContext;
use crate::services::peer_manager::{ClientConfig, PeerListing, PeerView};
use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use uuid::Uuid;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_peers).post(create_peer))
        .route("/:id", get(get_peer).put(update_peer).delete(delete_peer))
        .route("/:id/config", get(export_config))
}

async fn audit(
    state: &AppState,
    actor: &CurrentUser,
    action: SecurityAction,
    severity: Severity,
    details: Value,
) -> ApiResult<()> {
    let ClientContext {
        ip_address,
        user_agent,
    } = actor.client.clone();
    state
        .auth_service
        .record_event(
            NewSecurityEvent::new(action, severity)
                .user(Some(actor.user.id))
                .client(ip_address, user_agent)
                .details(details),
        )
        .await?;
    Ok(())
}

async fn list_peers(
    State(state): State<AppState>,
    _current: CurrentUser,
) -> ApiResult<Json<PeerListing>> {
    let listing = state.peer_manager.list(crate::db::now()).await?;
    Ok(Json(listing))
}

async fn get_peer(
    State(state): State<AppState>,
    _current: CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<PeerView>> {
    let view = state.peer_manager.get_view(&id, crate::db::now()).await?;
    Ok(Json(view))
}

async fn create_peer(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiJson(request): ApiJson<CreatePeerRequest>,
) -> ApiResult<(StatusCode, Json<PeerView>)> {
    let peer = state.peer_manager.provision(&request).await?;

    audit(
        &state,
        &admin,
        SecurityAction::PeerCreated,
        Severity::Info,
        json!({ "peer_id": peer.id, "name": peer.name, "address": peer.address }),
    )
    .await?;

    let view = state.peer_manager.view(peer, crate::db::now())?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn update_peer(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<UpdatePeerRequest>,
) -> ApiResult<Json<PeerView>> {
    let peer = state.peer_manager.update(&id, &request).await?;

    audit(
        &state,
        &admin,
        SecurityAction::PeerUpdated,
        Severity::Info,
        json!({ "peer_id": peer.id, "name": peer.name, "enabled": peer.enabled }),
    )
    .await?;

    let view = state.peer_manager.view(peer, crate::db::now())?;
    Ok(Json(view))
}

async fn delete_peer(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    let peer = state.peer_manager.delete(&id).await?;

    audit(
        &state,
        &admin,
        SecurityAction::PeerDeleted,
        Severity::Warning,
        json!({ "peer_id": peer.id, "name": peer.name, "public_key": peer.public_key }),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn export_config(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<ClientConfig>> {
    let config = state.peer_manager.client_config(&id).await?;

    // Exports carry a private key
    audit(
        &state,
        &admin,
        SecurityAction::PeerConfigExported,
        Severity::Warning,
        json!({ "peer_id": id, "filename": config.filename }),
    )
    .await?;

    Ok(Json(config))
}
