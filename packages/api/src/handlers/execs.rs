// Exec creation (sync and async), lookup, listing and output streaming.

use std::collections::HashMap;
use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream;
use serde::Deserialize;

use sandchest_orchestrator::types::{CmdInput, CreateExecInput, ExecOutcomeResponse};
use sandchest_orchestrator::ExecController;
use sandchest_repo::types::{Exec, ExecStatus};
use sandchest_repo::ExecListFilter;

use crate::error::{ApiResult, AppError};
use crate::sse::{create_sse_event, create_sse_response};
use crate::{AppState, CurrentAuth};

fn controller(state: &AppState) -> ExecController<'_> {
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
#[serde(untagged)]
pub enum CmdRequest {
    Array(Vec<String>),
    Shell(String),
}

impl From<CmdRequest> for CmdInput {
    fn from(cmd: CmdRequest) -> Self {
        match cmd {
            CmdRequest::Array(argv) => CmdInput::Array(argv),
            CmdRequest::Shell(shell) => CmdInput::Shell(shell),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateExecRequest {
    pub cmd: CmdRequest,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub timeout_seconds: Option<i64>,
    #[serde(default)]
    pub wait: bool,
    #[serde(default)]
    pub session_id: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path(sandbox_id): Path<String>,
    Json(request): Json<CreateExecRequest>,
) -> ApiResult<impl IntoResponse> {
    ctx.require_scope("exec:create")?;
    let outcome: ExecOutcomeResponse = controller(&state)
        .create(
            &ctx.user_id,
            CreateExecInput {
                org_id: ctx.org_id.clone(),
                sandbox_id,
                session_id: request.session_id,
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

pub async fn get(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path((_sandbox_id, exec_id)): Path<(String, String)>,
) -> ApiResult<Json<Exec>> {
    ctx.require_scope("exec:read")?;
    Ok(Json(controller(&state).get(&exec_id, &ctx.org_id).await?))
}

#[derive(Deserialize)]
pub struct ListExecsQuery {
    pub status: Option<String>,
    pub session_id: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

pub async fn list(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path(sandbox_id): Path<String>,
    Query(query): Query<ListExecsQuery>,
) -> ApiResult<impl IntoResponse> {
    ctx.require_scope("exec:read")?;
    let status = query.status.map(|s| ExecStatus::parse(&s)).transpose()?;
    let page = state
        .execs
        .list(
            &sandbox_id,
            &ctx.org_id,
            ExecListFilter { status, session_id: query.session_id, cursor: query.cursor, limit: query.limit },
        )
        .await
        .map_err(AppError::from)?;
    Ok(Json(page))
}

pub async fn stream(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path((_sandbox_id, exec_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    ctx.require_scope("exec:read")?;
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let events = controller(&state).stream(&exec_id, last_event_id).await;
    let frames = events
        .into_iter()
        .filter_map(|event| create_sse_event("output", &event.data).ok().map(|e| e.id(event.seq.to_string())))
        .map(Ok::<_, Infallible>)
        .collect::<Vec<_>>();

    Ok(create_sse_response(stream::iter(frames)))
}
