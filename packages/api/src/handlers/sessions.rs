// Persistent shell session endpoints. Session-scoped exec is not a method on
// `SessionController`; it runs through `ExecController::create` with
// `session_id` set, same as a standalone exec.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use sandchest_orchestrator::types::{CreateExecInput, CreateSessionInput, ExecOutcomeResponse};
use sandchest_orchestrator::{ExecController, SessionController};
use sandchest_repo::types::SandboxSession;

use crate::error::ApiResult;
use crate::handlers::execs::CmdRequest;
use crate::{AppState, CurrentAuth};

fn session_controller(state: &AppState) -> SessionController<'_> {
    SessionController {
        sandboxes: &state.sandboxes,
        sessions: &state.sessions,
        quotas: &state.quotas,
        node_client: state.node_client.as_ref(),
    }
}

fn exec_controller(state: &AppState) -> ExecController<'_> {
    ExecController {
        sandboxes: &state.sandboxes,
        execs: &state.execs,
        quotas: &state.quotas,
        billing: &state.billing,
        kv: state.kv.as_ref(),
        node_client: state.node_client.as_ref(),
    }
}

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub shell: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path(sandbox_id): Path<String>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    ctx.require_scope("session:create")?;
    let session = session_controller(&state)
        .create(CreateSessionInput { org_id: ctx.org_id.clone(), sandbox_id, shell: request.shell })
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path((_sandbox_id, session_id)): Path<(String, String)>,
) -> ApiResult<Json<SandboxSession>> {
    ctx.require_scope("session:read")?;
    Ok(Json(session_controller(&state).get(&session_id, &ctx.org_id).await?))
}

#[derive(Deserialize)]
pub struct ListSessionsQuery {
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

pub async fn list(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path(sandbox_id): Path<String>,
    Query(query): Query<ListSessionsQuery>,
) -> ApiResult<impl IntoResponse> {
    ctx.require_scope("session:read")?;
    let page = state.sessions.list(&sandbox_id, &ctx.org_id, query.cursor, query.limit).await.map_err(crate::error::AppError::from)?;
    Ok(Json(page))
}

pub async fn destroy(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path((_sandbox_id, session_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    ctx.require_scope("session:write")?;
    session_controller(&state).destroy(&session_id, &ctx.org_id).await?;
    Ok(StatusCode::OK)
}

pub async fn input(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path((_sandbox_id, session_id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    ctx.require_scope("session:write")?;
    session_controller(&state).input(&session_id, &ctx.org_id, &body).await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
pub struct SessionExecRequest {
    pub cmd: CmdRequest,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub timeout_seconds: Option<i64>,
    #[serde(default)]
    pub wait: bool,
}

pub async fn exec(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path((sandbox_id, session_id)): Path<(String, String)>,
    Json(request): Json<SessionExecRequest>,
) -> ApiResult<impl IntoResponse> {
    ctx.require_scope("exec:create")?;
    let outcome: ExecOutcomeResponse = exec_controller(&state)
        .create(
            &ctx.user_id,
            CreateExecInput {
                org_id: ctx.org_id.clone(),
                sandbox_id,
                session_id: Some(session_id),
                cmd: request.cmd.into(),
                cwd: request.cwd,
                env: request.env,
                timeout_seconds: request.timeout_seconds,
                wait: request.wait,
            },
        )
        .await?;

    let status = if outcome.status == "queued" { StatusCode::ACCEPTED } else { StatusCode::OK };
    Ok((status, Json(outcome)))
}
