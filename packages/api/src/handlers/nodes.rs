// Node admin surface plus the internal heartbeat callback nodes use to
// prove liveness between scheduling decisions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use sandchest_repo::types::Node;

use crate::error::ApiResult;
use crate::{AppState, CurrentAuth};

/// Grace window a node has to renew its heartbeat before the TTL sweep can
/// declare it lost. Kept generous relative to the expected heartbeat cadence.
const NODE_HEARTBEAT_TTL_SECONDS: u64 = 30;

pub async fn list(State(state): State<AppState>, CurrentAuth(ctx): CurrentAuth) -> ApiResult<Json<Vec<Node>>> {
    ctx.require_scope("admin:*")?;
    Ok(Json(state.nodes.list().await.map_err(crate::error::AppError::from)?))
}

pub async fn upsert(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Json(node): Json<Node>,
) -> ApiResult<impl IntoResponse> {
    ctx.require_scope("admin:*")?;
    let node = state.nodes.upsert(node).await.map_err(crate::error::AppError::from)?;
    Ok((StatusCode::OK, Json(node)))
}

pub async fn heartbeat(State(state): State<AppState>, Path(node_id): Path<String>) -> ApiResult<StatusCode> {
    state.nodes.touch_last_seen(&node_id).await.map_err(crate::error::AppError::from)?;
    state.kv.register_node_heartbeat(&node_id, NODE_HEARTBEAT_TTL_SECONDS).await;
    Ok(StatusCode::OK)
}
