// Guest filesystem access. HTTP has no LIST verb, so a listing is a GET with
// `?list=true`; everything else maps onto PUT/GET/DELETE directly.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use sandchest_core::SandchestError;
use sandchest_orchestrator::types::PutFileInput;
use sandchest_orchestrator::FileController;

use crate::error::ApiResult;
use crate::{AppState, CurrentAuth};

fn controller(state: &AppState) -> FileController<'_> {
    FileController { sandboxes: &state.sandboxes, quotas: &state.quotas, node_client: state.node_client.as_ref() }
}

#[derive(Deserialize)]
pub struct FileQuery {
    pub path: String,
    #[serde(default)]
    pub batch: bool,
    #[serde(default)]
    pub list: bool,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

pub async fn put(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path(sandbox_id): Path<String>,
    Query(query): Query<FileQuery>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    ctx.require_scope("file:write")?;
    let response = controller(&state)
        .put(PutFileInput { org_id: ctx.org_id.clone(), sandbox_id, path: query.path, data: body.to_vec(), batch: query.batch })
        .await?;
    Ok((StatusCode::OK, Json(response)))
}

pub async fn get_or_list(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path(sandbox_id): Path<String>,
    Query(query): Query<FileQuery>,
) -> ApiResult<axum::response::Response> {
    ctx.require_scope("file:read")?;
    if query.list {
        let listing = controller(&state).list(&sandbox_id, &ctx.org_id, &query.path, query.cursor, query.limit).await?;
        return Ok(Json(listing).into_response());
    }
    if !query.path.starts_with('/') {
        return Err(crate::error::AppError(SandchestError::validation("path must be absolute")));
    }
    let data = controller(&state).get(&sandbox_id, &ctx.org_id, &query.path).await?;
    Ok((StatusCode::OK, [("content-type", "application/octet-stream")], data).into_response())
}

pub async fn delete(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path(sandbox_id): Path<String>,
    Query(query): Query<FileQuery>,
) -> ApiResult<StatusCode> {
    ctx.require_scope("file:write")?;
    controller(&state).delete(&sandbox_id, &ctx.org_id, &query.path).await?;
    Ok(StatusCode::OK)
}
