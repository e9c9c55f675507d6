// Replay bundle retrieval, both tenant-scoped and fully public, plus the
// replay event stream every bundle points at via `events_url`.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use futures::stream;

use sandchest_orchestrator::ReplayAggregator;

use crate::error::ApiResult;
use crate::sse::{create_sse_event, create_sse_response};
use crate::{AppState, CurrentAuth};

fn controller(state: &AppState) -> ReplayAggregator<'_> {
    ReplayAggregator {
        sandboxes: &state.sandboxes,
        execs: &state.execs,
        sessions: &state.sessions,
        artifacts: &state.artifacts,
        kv: state.kv.as_ref(),
    }
}

/// Authenticated callers see any replay within their org; anonymous callers
/// (the auth middleware lets these paths through) fall back to the public
/// lookup, which only resolves sandboxes with `replay_public = true`.
pub async fn bundle(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path(sandbox_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let org_id = ctx.is_authenticated().then_some(ctx.org_id.as_str());
    let (bundle, access) = controller(&state).bundle(&sandbox_id, org_id).await?;
    Ok((
        [("x-replay-access", access.as_header_value())],
        Json(bundle),
    ))
}

pub async fn public_bundle(
    State(state): State<AppState>,
    Path(sandbox_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let (bundle, access) = controller(&state).bundle(&sandbox_id, None).await?;
    Ok((
        [("x-replay-access", access.as_header_value())],
        Json(bundle),
    ))
}

pub async fn stream(
    State(state): State<AppState>,
    Path(sandbox_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let events = controller(&state).stream(&sandbox_id, last_event_id).await;
    let frames = events
        .into_iter()
        .filter_map(|event| create_sse_event("replay", &event.data).ok().map(|e| e.id(event.seq.to_string())))
        .map(Ok::<_, Infallible>)
        .collect::<Vec<_>>();

    Ok(create_sse_response(stream::iter(frames)))
}
