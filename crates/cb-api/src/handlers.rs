//! # cb-api Handlers
//!
//! Each handler extracts request data, applies the rate limit where the
//! route has one, and hands off to `BoardService`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{ConnectInfo, FromRequestParts, Path, Query, State};
use axum::http::header::HOST;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use tracing::warn;

use cb_core::service::{AdminDeleteInput, ListQuery, RenewInput, ReplyInput, ResponseInput};
use cb_core::traits::{RateLimit, RateLimiter, CREATE_POST_LIMIT, RESPOND_LIMIT};
use cb_core::validation::PostInput;
use cb_core::{AppError, BoardService};

use crate::error::{failed, ApiError};

/// State shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BoardService>,
    pub limiter: Arc<dyn RateLimiter>,
    /// Configured public origin; the `Host` header is used when unset.
    pub base_url: Option<String>,
}

impl AppState {
    fn base_url(&self, headers: &HeaderMap) -> String {
        if let Some(base) = &self.base_url {
            return base.clone();
        }
        let host = headers
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("localhost");
        format!("http://{host}")
    }

    fn admit(&self, scope: &str, ip: &ClientIp, limit: RateLimit, message: &str) -> Result<(), ApiError> {
        if self.limiter.check_and_record(&format!("{scope}:{}", ip.0), limit) {
            return Ok(());
        }
        warn!(scope, ip = %ip.0, "rate limit exceeded");
        Err(ApiError::new(AppError::RateLimited(message.to_owned()), "Too many requests."))
    }
}

/// The caller's address for rate limiting: the first `X-Forwarded-For`
/// entry, else the socket peer, else `unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = forwarded {
            return Ok(Self(ip.to_owned()));
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(Self(peer.unwrap_or_else(|| "unknown".to_owned())))
    }
}

pub async fn list_posts(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let list = state
        .service
        .list_posts(&query)
        .await
        .map_err(failed("Could not load posts."))?;
    Ok(Json(list))
}

pub async fn get_post(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let detail = state.service.get_post(&id).await.map_err(failed("Could not load post."))?;
    Ok(Json(detail))
}

pub async fn create_post(
    State(state): State<AppState>,
    ip: ClientIp,
    headers: HeaderMap,
    payload: Result<Json<PostInput>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    state.admit("create-post", &ip, CREATE_POST_LIMIT, "Too many posts. Try again later.")?;
    let Json(input) = payload?;
    let created = state
        .service
        .create_post(&input, &state.base_url(&headers))
        .await
        .map_err(failed("Could not create post."))?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn respond(
    State(state): State<AppState>,
    ip: ClientIp,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<ResponseInput>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    state.admit("respond-post", &ip, RESPOND_LIMIT, "Too many responses. Try again later.")?;
    let Json(input) = payload?;
    let ack = state
        .service
        .respond(&id, &input, &state.base_url(&headers))
        .await
        .map_err(failed("Could not send response."))?;
    Ok(Json(ack))
}

pub async fn manage_view(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .service
        .manage_view(&token)
        .await
        .map_err(failed("Could not load manage page."))?;
    Ok(Json(view))
}

pub async fn update_post(
    State(state): State<AppState>,
    Path(token): Path<String>,
    payload: Result<Json<PostInput>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(input) = payload?;
    let ack = state
        .service
        .update_post(&token, &input)
        .await
        .map_err(failed("Could not update post."))?;
    Ok(Json(ack))
}

pub async fn renew_post(
    State(state): State<AppState>,
    Path(token): Path<String>,
    payload: Result<Json<RenewInput>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(input) = payload?;
    let renewed = state
        .service
        .renew_post(&token, &input)
        .await
        .map_err(failed("Could not renew post."))?;
    Ok(Json(renewed))
}

pub async fn deactivate_post(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let ack = state
        .service
        .deactivate_post(&token)
        .await
        .map_err(failed("Could not deactivate post."))?;
    Ok(Json(ack))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let ack = state
        .service
        .delete_post(&token)
        .await
        .map_err(failed("Could not delete post."))?;
    Ok(Json(ack))
}

pub async fn reply(
    State(state): State<AppState>,
    Path(token): Path<String>,
    payload: Result<Json<ReplyInput>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(input) = payload?;
    let ack = state
        .service
        .reply(&token, &input)
        .await
        .map_err(failed("Could not send relay reply."))?;
    Ok(Json(ack))
}

pub async fn admin_delete(
    State(state): State<AppState>,
    payload: Result<Json<AdminDeleteInput>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(input) = payload?;
    let ack = state
        .service
        .admin_delete(&input)
        .await
        .map_err(failed("Could not delete post."))?;
    Ok(Json(ack))
}

/// Unknown routes when no static directory is mounted.
pub async fn not_found() -> ApiError {
    ApiError::new(AppError::not_found("Not found."), "Not found.")
}
