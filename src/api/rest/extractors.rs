use crate::api::rest::{ApiError, AppState};
use crate::db::models::security_event_models::{NewSecurityEvent, SecurityAction, Severity};
use crate::db::models::user_models::{User, UserRole};
use crate::error::Error;
use crate::security::ClientContext;
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, ConnectInfo, FromRequest, FromRequestParts, Path},
    http::{header, request::Parts, Extensions, HeaderMap, Request},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;

/// Client of a request as seen through the configured proxy policy
pub fn client_context(state: &AppState, headers: &HeaderMap, extensions: &Extensions) -> ClientContext {
    let remote = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    ClientContext::resolve(headers, remote, state.trust_proxy_headers)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

/// Resolved client address and user agent
pub struct ClientInfo(pub ClientContext);

#[async_trait]
impl FromRequestParts<AppState> for ClientInfo {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(ClientInfo(client_context(state, &parts.headers, &parts.extensions)))
    }
}

/// Caller holding a valid session
pub struct CurrentUser {
    pub user: User,
    pub token: String,
    pub client: ClientContext,
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let client = client_context(state, &parts.headers, &parts.extensions);
        let path = parts.uri.path().to_string();

        let Some(token) = bearer_token(&parts.headers) else {
            reject_unauthorized(state, &client, &path, "missing_token").await;
            return Err(Error::Authentication("Missing bearer token".to_string()).into());
        };

        match state
            .auth_service
            .validate_session(&token, crate::db::now())
            .await
        {
            Ok(user) => Ok(CurrentUser {
                user,
                token,
                client,
            }),
            Err(e) => {
                if let Some(Error::Authentication(_)) = e.downcast_ref::<Error>() {
                    reject_unauthorized(state, &client, &path, "invalid_session").await;
                }
                Err(e.into())
            }
        }
    }
}

async fn reject_unauthorized(state: &AppState, client: &ClientContext, path: &str, reason: &str) {
    state
        .auth_service
        .record_event_best_effort(
            NewSecurityEvent::new(SecurityAction::UnauthorizedApiAccess, Severity::Warning)
                .client(client.ip_address.clone(), client.user_agent.clone())
                .details(json!({ "path": path, "reason": reason })),
        )
        .await;
}

/// Caller holding a valid session with the admin role
pub struct AdminUser(pub CurrentUser);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let current = CurrentUser::from_request_parts(parts, state).await?;

        if !current.user.role.satisfies(UserRole::Admin) {
            state
                .auth_service
                .record_event_best_effort(
                    NewSecurityEvent::new(SecurityAction::InsufficientPermissions, Severity::Warning)
                        .user(Some(current.user.id))
                        .client(
                            current.client.ip_address.clone(),
                            current.client.user_agent.clone(),
                        )
                        .details(json!({
                            "path": parts.uri.path(),
                            "role": current.user.role,
                            "required": UserRole::Admin,
                        })),
                )
                .await;
            return Err(Error::Authorization(format!(
                "{} requires the admin role",
                parts.uri.path()
            ))
            .into());
        }

        Ok(AdminUser(current))
    }
}

/// JSON body whose rejections are rendered as validation errors
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S, B> FromRequest<S, B> for ApiJson<T>
where
    T: DeserializeOwned,
    Json<T>: FromRequest<S, B, Rejection = JsonRejection>,
    S: Send + Sync,
    B: Send + 'static,
{
    type Rejection = ApiError;

    async fn from_request(req: Request<B>, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| Error::Validation(rejection.body_text()))?;
        Ok(ApiJson(value))
    }
}

/// Path parameters; a malformed segment is a 400 with the usual error body
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| Error::Validation(rejection.body_text()))?;
        Ok(ApiPath(value))
    }
}
