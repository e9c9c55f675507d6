// Artifact path registration, termination-time collection and signed
// download mediation. `collect` is exposed as an explicit endpoint here
// rather than firing automatically off the sandbox state machine, since
// `SandboxController` has no artifact dependency wired in yet.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect};
use axum::Json;
use serde::{Deserialize, Serialize};

use sandchest_orchestrator::ArtifactController;
use sandchest_repo::types::Artifact;

use crate::error::ApiResult;
use crate::{AppState, CurrentAuth};

fn controller(state: &AppState) -> ArtifactController<'_> {
    ArtifactController {
        artifacts: &state.artifacts,
        quotas: &state.quotas,
        kv: state.kv.as_ref(),
        node_client: state.node_client.as_ref(),
        object_store: state.object_store.as_ref(),
    }
}

#[derive(Deserialize)]
pub struct RegisterArtifactsRequest {
    pub paths: Vec<String>,
}

#[derive(Serialize)]
pub struct RegisterArtifactsResponse {
    pub registered: usize,
}

pub async fn register(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path(sandbox_id): Path<String>,
    Json(request): Json<RegisterArtifactsRequest>,
) -> ApiResult<impl IntoResponse> {
    ctx.require_scope("artifact:write")?;
    let registered = controller(&state).register(&sandbox_id, &request.paths).await;
    Ok((StatusCode::OK, Json(RegisterArtifactsResponse { registered })))
}

pub async fn collect(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path(sandbox_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    ctx.require_scope("artifact:write")?;
    let collected = controller(&state).collect(&sandbox_id, &ctx.org_id).await?;
    Ok((StatusCode::OK, Json(collected)))
}

pub async fn get(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path((_sandbox_id, artifact_id)): Path<(String, String)>,
) -> ApiResult<Json<Artifact>> {
    ctx.require_scope("artifact:read")?;
    Ok(Json(controller(&state).get(&artifact_id, &ctx.org_id).await?))
}

pub async fn download(
    State(state): State<AppState>,
    CurrentAuth(ctx): CurrentAuth,
    Path((_sandbox_id, artifact_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    ctx.require_scope("artifact:read")?;
    let ctl = controller(&state);
    let artifact = ctl.get(&artifact_id, &ctx.org_id).await?;
    let url = ctl.presign(&artifact);
    Ok(Redirect::temporary(&url))
}
