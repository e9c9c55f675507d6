// Router composition and shared application state for the control plane's
// HTTP surface. Handlers build orchestrator controllers on the fly from the
// repos/clients held here; nothing here owns domain logic itself.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{Method, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use sandchest_auth::{AuthContext, AuthResolver};
use sandchest_billing::billing_gate::BillingGate;
use sandchest_kv::Kv;
use sandchest_node_client::NodeClient;
use sandchest_orchestrator::ObjectStore;
use sandchest_repo::{ArtifactRepo, AuditRepo, ExecRepo, NodeRepo, OrgQuotaRepo, SandboxRepo, SessionRepo};

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod sse;

use middleware::{auth_middleware, create_panic_handler, rate_limit_middleware, SecurityHeadersLayer};

/// Everything a handler needs to build an orchestrator controller for the
/// current request. Cheap to clone: every field is either a pool-backed
/// repo or already `Arc`-wrapped.
pub struct AppStateInner {
    pub sandboxes: SandboxRepo,
    pub execs: ExecRepo,
    pub sessions: SessionRepo,
    pub artifacts: ArtifactRepo,
    pub quotas: OrgQuotaRepo,
    pub nodes: NodeRepo,
    pub audit: AuditRepo,
    pub kv: Arc<dyn Kv>,
    pub node_client: Arc<dyn NodeClient>,
    pub object_store: Arc<dyn ObjectStore>,
    pub auth_resolver: Arc<AuthResolver>,
    pub billing: Arc<BillingGate>,
    pub instance_id: String,
}

#[derive(Clone)]
pub struct AppState(Arc<AppStateInner>);

impl std::ops::Deref for AppState {
    type Target = AppStateInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sandboxes: SandboxRepo,
        execs: ExecRepo,
        sessions: SessionRepo,
        artifacts: ArtifactRepo,
        quotas: OrgQuotaRepo,
        nodes: NodeRepo,
        audit: AuditRepo,
        kv: Arc<dyn Kv>,
        node_client: Arc<dyn NodeClient>,
        object_store: Arc<dyn ObjectStore>,
        auth_resolver: Arc<AuthResolver>,
        billing: Arc<BillingGate>,
        instance_id: String,
    ) -> Self {
        Self(Arc::new(AppStateInner {
            sandboxes,
            execs,
            sessions,
            artifacts,
            quotas,
            nodes,
            audit,
            kv,
            node_client,
            object_store,
            auth_resolver,
            billing,
            instance_id,
        }))
    }
}

/// Local wrapper around [`AuthContext`] so the extractor impl below doesn't
/// run into the orphan rule (both the trait and `AuthContext` are foreign to
/// this crate). Derefs transparently so handlers read it exactly like the
/// context itself.
#[derive(Debug, Clone)]
pub struct CurrentAuth(pub AuthContext);

impl std::ops::Deref for CurrentAuth {
    type Target = AuthContext;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Pulls the [`AuthContext`] the auth middleware stashed in the request
/// extensions. Only fails if the middleware was somehow skipped for this
/// route, which is a routing bug rather than a caller error.
impl<S> FromRequestParts<S> for CurrentAuth
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(CurrentAuth)
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "auth middleware did not run for this route"))
    }
}

fn create_sandbox_router() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::sandboxes::create))
        .route("/", get(handlers::sandboxes::list))
        .route("/{id}", get(handlers::sandboxes::get))
        .route("/{id}", delete(handlers::sandboxes::delete))
        .route("/{id}/fork", post(handlers::sandboxes::fork))
        .route("/{id}/forks", get(handlers::sandboxes::forks))
        .route("/{id}/stop", post(handlers::sandboxes::stop))
}

fn create_exec_router() -> Router<AppState> {
    Router::new()
        .route("/{sandbox_id}/exec", post(handlers::execs::create))
        .route("/{sandbox_id}/exec/{exec_id}", get(handlers::execs::get))
        .route("/{sandbox_id}/exec/{exec_id}/stream", get(handlers::execs::stream))
        .route("/{sandbox_id}/execs", get(handlers::execs::list))
}

fn create_session_router() -> Router<AppState> {
    Router::new()
        .route("/{sandbox_id}/sessions", post(handlers::sessions::create))
        .route("/{sandbox_id}/sessions", get(handlers::sessions::list))
        .route("/{sandbox_id}/sessions/{session_id}", get(handlers::sessions::get))
        .route("/{sandbox_id}/sessions/{session_id}", delete(handlers::sessions::destroy))
        .route("/{sandbox_id}/sessions/{session_id}/input", post(handlers::sessions::input))
        .route("/{sandbox_id}/sessions/{session_id}/exec", post(handlers::sessions::exec))
}

fn create_file_router() -> Router<AppState> {
    Router::new()
        .route("/{sandbox_id}/files", put(handlers::files::put))
        .route("/{sandbox_id}/files", get(handlers::files::get_or_list))
        .route("/{sandbox_id}/files", delete(handlers::files::delete))
}

fn create_artifact_router() -> Router<AppState> {
    Router::new()
        .route("/{sandbox_id}/artifacts/register", post(handlers::artifacts::register))
        .route("/{sandbox_id}/artifacts/collect", post(handlers::artifacts::collect))
        .route("/{sandbox_id}/artifacts/{artifact_id}", get(handlers::artifacts::get))
        .route("/{sandbox_id}/artifacts/{artifact_id}/download", get(handlers::artifacts::download))
}

fn create_replay_router() -> Router<AppState> {
    Router::new()
        .route("/{sandbox_id}/replay", get(handlers::replay::bundle))
        .route("/{sandbox_id}/replay/events", get(handlers::replay::stream))
}

fn create_node_router() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::nodes::list))
        .route("/", post(handlers::nodes::upsert))
}

fn create_internal_router() -> Router<AppState> {
    Router::new().route("/nodes/{node_id}/heartbeat", post(handlers::nodes::heartbeat))
}

async fn healthz() -> &'static str {
    "ok"
}

/// Composes the full `/v1` surface plus the cross-cutting layers: panic
/// containment outermost, then tracing, permissive CORS (the API is bearer-
/// authenticated, not cookie-based, so a wide CORS policy does not expose
/// session state), fixed security headers, identity resolution and finally
/// per-org rate limiting immediately around the handlers.
pub fn create_router(state: AppState) -> Router {
    let sandboxes = Router::new().nest("/sandboxes", create_sandbox_router());
    let execs = Router::new().nest("/sandboxes", create_exec_router());
    let sessions = Router::new().nest("/sandboxes", create_session_router());
    let files = Router::new().nest("/sandboxes", create_file_router());
    let artifacts = Router::new().nest("/sandboxes", create_artifact_router());
    let replay = Router::new().nest("/sandboxes", create_replay_router());

    let v1 = Router::new()
        .merge(sandboxes)
        .merge(execs)
        .merge(sessions)
        .merge(files)
        .merge(artifacts)
        .merge(replay)
        .nest("/nodes", create_node_router())
        .nest("/internal", create_internal_router())
        .route("/public/replay/{sandbox_id}", get(handlers::replay::public_bundle))
        .route("/public/replay/{sandbox_id}/events", get(handlers::replay::stream))
        .route("/health", get(healthz))
        .route("/readyz", get(healthz));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(healthz))
        .route("/healthz", get(healthz))
        .route("/readyz", get(healthz))
        .nest("/v1", v1)
        .with_state(state.clone())
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(from_fn_with_state(state, auth_middleware))
        .layer(SecurityHeadersLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(create_panic_handler())
}
