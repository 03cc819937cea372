//! HTTP handlers.

use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{Request, header},
    response::Response,
};
use log::{debug, warn};
use serde::Serialize;

use crate::auth::CurrentUser;
use crate::collector::ViewerInstanceStatus;
use crate::proxy::{ProxyError, ProxyRequest, proxy_id_from_path};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Launch state of a viewer instance as reported by the collector.
pub async fn get_viewer_instance(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(viewer_instance_uuid): Path<String>,
) -> ApiResult<Json<ViewerInstanceStatus>> {
    state
        .collector
        .get_viewer_instance(&viewer_instance_uuid)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("viewer instance {viewer_instance_uuid}")))
}

/// Relay any request under `/proxy-<id>/` to its viewer VM.
pub async fn proxy_request(
    State(state): State<AppState>,
    user: CurrentUser,
    req: Request<Body>,
) -> Result<Response, ProxyError> {
    let proxy_id = proxy_id_from_path(req.uri().path())
        .ok_or(ProxyError::NotAProxyPath)?
        .to_string();
    let uri = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let limit = state.max_body_bytes;
    let declared = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(ProxyError::PayloadTooLarge { limit });
    }

    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| body_error(e, limit))?;

    debug!("proxying {} {} for {}", parts.method, uri, user.id());

    let request = ProxyRequest {
        method: parts.method,
        uri,
        headers: parts.headers,
        body,
        user_uid: user.id().to_string(),
    };

    state.proxy.handle(&proxy_id, request).await
}

fn body_error(err: axum::Error, limit: usize) -> ProxyError {
    if err.to_string().contains("length limit") {
        warn!("Proxy request body exceeded limit of {} bytes", limit);
        return ProxyError::PayloadTooLarge { limit };
    }
    warn!("Failed to buffer proxy request body: {:?}", err);
    ProxyError::BodyRead(err)
}
