// Sandbox lifecycle endpoints: create, fetch, list, fork, fork tree, stop,
// delete. All business rules live in `SandboxController`; these handlers
// only translate HTTP in and out.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use sandchest_orchestrator::SandboxController;
use sandchest_repo::types::{Sandbox, SandboxStatus};
use sandchest_repo::SandboxListFilter;
use sandchest_scheduler::Scheduler;

use crate::error::{ApiResult, AppError};
use crate::{AppState, CurrentAuth};

fn controller(state: &AppState) -> SandboxController<'_> {
    SandboxController {
        sandboxes: &state.sandboxes,
        quotas: &state.quotas,
        billing: &state.billing,
        scheduler: Scheduler::new(&state.nodes, state.kv.as_ref()),
        node_client: state.node_client.as_ref(),
    }
}

#[derive(Deserialize)]
pub struct CreateSandboxRequest {
    pub image_id: String,
    pub profile: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: i64,
}

fn default_ttl_seconds() -> i64 {
    3600
}

pub async fn create(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Json(request): Json<CreateSandboxRequest>,
) -> ApiResult<impl IntoResponse> {
    ctx.require_scope("sandbox:create")?;
    if request.ttl_seconds < 1 {
        return Err(AppError(sandchest_core::SandchestError::validation("ttl_seconds must be at least 1")));
    }

    let sandbox = controller(&state)
        .create(sandchest_orchestrator::types::CreateSandboxInput {
            org_id: ctx.org_id.clone(),
            user_id: ctx.user_id.clone(),
            image_id: request.image_id,
            profile_name: request.profile,
            env: request.env,
            ttl_seconds: request.ttl_seconds,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(sandbox)))
}

pub async fn get(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path(id): Path<String>,
) -> ApiResult<Json<Sandbox>> {
    ctx.require_scope("sandbox:read")?;
    Ok(Json(controller(&state).get(&id, &ctx.org_id).await?))
}

#[derive(Deserialize)]
pub struct ListSandboxesQuery {
    pub status: Option<String>,
    pub forked_from: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

pub async fn list(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Query(query): Query<ListSandboxesQuery>,
) -> ApiResult<impl IntoResponse> {
    ctx.require_scope("sandbox:read")?;
    let status = query.status.map(|s| SandboxStatus::parse(&s)).transpose()?;
    let page = state
        .sandboxes
        .list(&ctx.org_id, SandboxListFilter { status, forked_from: query.forked_from, cursor: query.cursor, limit: query.limit })
        .await
        .map_err(AppError::from)?;
    Ok(Json(page))
}

#[derive(Deserialize)]
pub struct ForkSandboxRequest {
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: i64,
}

pub async fn fork(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path(id): Path<String>,
    Json(request): Json<ForkSandboxRequest>,
) -> ApiResult<impl IntoResponse> {
    ctx.require_scope("sandbox:create")?;
    let child = controller(&state)
        .fork(sandchest_orchestrator::types::ForkSandboxInput {
            org_id: ctx.org_id.clone(),
            parent_id: id,
            env: request.env,
            ttl_seconds: request.ttl_seconds,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(child)))
}

pub async fn forks(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    ctx.require_scope("sandbox:read")?;
    let tree = state
        .sandboxes
        .get_fork_tree(&id, &ctx.org_id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError(sandchest_core::SandchestError::not_found(format!("sandbox {id} not found"))))?;
    Ok(Json(tree))
}

pub async fn stop(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    ctx.require_scope("sandbox:write")?;
    controller(&state).stop(&id, &ctx.org_id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn delete(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    ctx.require_scope("sandbox:write")?;
    controller(&state).delete(&id, &ctx.org_id).await?;
    Ok(StatusCode::OK)
}
