//! # Reaper Platform
//!
//! Thin control-plane translations onto the policy store, validator, and
//! version/rollback manager: CRUD and batch operations over policies,
//! version history and rollback, stats, agents, and delegations (spec
//! §4.11). Every response is wrapped `{success, data?, error?}`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use clap::Parser;
use metrics::Metrics;
use policy_engine::{
    load_directory, AgentStore, DelegationStore, DelegationValidator, PolicyStore, Validator,
    VersionManager,
};
use reaper_core::{
    endpoints, Agent, AgentId, Delegation, DelegationRequest, Policy, ReaperError, Result,
    BUILD_INFO,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Parser, Debug, Clone)]
#[command(name = "reaper-platform", version = reaper_core::VERSION)]
struct Args {
    #[arg(long, default_value_t = 8081)]
    http_port: u16,

    #[arg(long, default_value = "./policies")]
    policy_dir: PathBuf,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// `text` or `json`.
    #[arg(long, default_value = "text")]
    log_format: String,

    #[arg(long, default_value_t = 10)]
    graceful_shutdown_timeout_secs: u64,

    /// Print version and exit.
    #[arg(long, default_value_t = false)]
    show_version: bool,

    /// Self-test: hit the local health endpoint and exit with its status.
    #[arg(long, default_value_t = false)]
    health_check: bool,
}

struct PlatformState {
    store: Arc<PolicyStore>,
    validator: Arc<Validator>,
    version_manager: Arc<VersionManager>,
    agents: Arc<AgentStore>,
    delegations: Arc<DelegationStore>,
    metrics: Arc<Metrics>,
    ready: Arc<AtomicBool>,
}

impl PlatformState {
    fn delegation_validator(&self) -> DelegationValidator {
        DelegationValidator::new(self.agents.clone(), self.delegations.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.show_version {
        println!("{BUILD_INFO}");
        return Ok(());
    }

    if args.health_check {
        return run_health_check(args.http_port).await;
    }

    init_tracing(&args.log_level, &args.log_format);
    info!("Starting Reaper Platform {}", BUILD_INFO);

    let store = Arc::new(PolicyStore::new());
    let validator = Arc::new(Validator::new());
    let version_manager = Arc::new(VersionManager::new(store.clone()));
    let app_metrics = Arc::new(Metrics::new());
    let ready = Arc::new(AtomicBool::new(false));

    match load_directory(&args.policy_dir) {
        Ok(outcome) => {
            for err in &outcome.errors {
                warn!(%err, "policy file failed to load at startup");
            }
            if let Err(e) = version_manager.update_with_rollback(outcome.policies, "startup load") {
                warn!(error = %e, "startup policy set failed invariant checks; starting empty");
            }
            app_metrics.set_policies_loaded(store.count());
        }
        Err(e) => {
            warn!(error = %e, "startup policy load failed; starting with an empty store");
        }
    }
    ready.store(true, Ordering::Relaxed);

    let state = Arc::new(PlatformState {
        store,
        validator,
        version_manager,
        agents: Arc::new(AgentStore::new()),
        delegations: Arc::new(DelegationStore::new()),
        metrics: app_metrics,
        ready,
    });

    let app = build_router(state);

    let listener = TcpListener::bind(("0.0.0.0", args.http_port)).await?;
    info!("Reaper Platform listening on {}", listener.local_addr()?);

    let shutdown_timeout = std::time::Duration::from_secs(args.graceful_shutdown_timeout_secs);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!(timeout_secs = shutdown_timeout.as_secs(), "shutdown signal received");
            tokio::time::sleep(shutdown_timeout.min(std::time::Duration::from_millis(50))).await;
        })
        .await?;

    Ok(())
}

fn init_tracing(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run_health_check(http_port: u16) -> anyhow::Result<()> {
    let url = format!("http://127.0.0.1:{http_port}{}", endpoints::HEALTH);
    match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => {
            println!("healthy");
            Ok(())
        }
        Ok(resp) => {
            eprintln!("unhealthy: status {}", resp.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("health check failed: {e}");
            std::process::exit(1);
        }
    }
}

fn build_router(state: Arc<PlatformState>) -> Router {
    Router::new()
        .route(endpoints::HEALTH, get(health_check))
        .route(endpoints::HEALTH_LIVE, get(health_live))
        .route(endpoints::HEALTH_READY, get(health_ready))
        .route(endpoints::HEALTH_STARTUP, get(health_startup))
        .route(endpoints::METRICS, get(metrics_text))
        .route(endpoints::METRICS_JSON, get(metrics_json))
        .route(
            endpoints::API_V1_POLICIES,
            get(list_policies).post(create_policy),
        )
        .route(
            "/api/v1/policies/{name}",
            get(get_policy).put(update_policy).delete(delete_policy),
        )
        .route(endpoints::API_V1_POLICIES_BATCH, post(batch_create_policies))
        .route(
            endpoints::API_V1_POLICIES_BATCH_VALIDATE,
            post(batch_validate_policies),
        )
        .route("/api/v1/policies/{name}/validate", post(validate_stored_policy))
        .route(endpoints::API_V1_POLICIES_VALIDATE, post(validate_payload_policy))
        .route(endpoints::API_V1_VERSIONS, get(list_versions))
        .route("/api/v1/versions/current", get(current_version))
        .route("/api/v1/versions/{n}", get(get_version))
        .route("/api/v1/versions/{n}/rollback", post(rollback_version))
        .route("/api/v1/versions/previous/rollback", post(rollback_previous))
        .route(endpoints::API_V1_STATS, get(stats))
        .route(endpoints::API_V1_AGENTS, get(list_agents).post(create_agent))
        .route(
            "/api/v1/agents/{id}",
            get(get_agent).delete(remove_agent),
        )
        .route(
            endpoints::API_V1_DELEGATIONS,
            get(list_delegations).post(create_delegation),
        )
        .route(
            "/api/v1/delegations/{id}",
            get(get_delegation).delete(remove_delegation),
        )
        .route("/api/v1/delegations/validate", post(validate_delegation))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn ok(data: impl serde::Serialize) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

fn err_response(e: ReaperError) -> (StatusCode, Json<Value>) {
    let status = match e.code() {
        "InvalidArgument" => StatusCode::BAD_REQUEST,
        "NotFound" => StatusCode::NOT_FOUND,
        "AlreadyExists" => StatusCode::CONFLICT,
        "ResourceExhausted" => StatusCode::TOO_MANY_REQUESTS,
        "Unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({ "success": false, "error": { "code": e.code(), "message": e.to_string() } })),
    )
}

type ApiResult = std::result::Result<Json<Value>, (StatusCode, Json<Value>)>;

fn to_api(r: Result<impl serde::Serialize>) -> ApiResult {
    r.map(ok).map_err(err_response)
}

#[instrument]
async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "reaper-platform", "version": reaper_core::VERSION }))
}

#[instrument]
async fn health_live() -> Json<Value> {
    Json(json!({ "status": "live" }))
}

#[instrument(skip(state))]
async fn health_ready(State(state): State<Arc<PlatformState>>) -> impl IntoResponse {
    if state.ready.load(Ordering::Relaxed) {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "not-ready" })))
    }
}

#[instrument(skip(state))]
async fn health_startup(State(state): State<Arc<PlatformState>>) -> impl IntoResponse {
    if state.ready.load(Ordering::Relaxed) {
        (StatusCode::OK, Json(json!({ "status": "started" })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "starting" })))
    }
}

#[instrument(skip(state))]
async fn metrics_text(State(state): State<Arc<PlatformState>>) -> String {
    state.metrics.render_prometheus()
}

#[instrument(skip(state))]
async fn metrics_json(State(state): State<Arc<PlatformState>>) -> Json<Value> {
    Json(state.metrics.render_json())
}

#[instrument(skip(state))]
async fn list_policies(State(state): State<Arc<PlatformState>>) -> Json<Value> {
    let policies = state.store.get_all();
    ok(json!({ "policies": policies, "total": policies.len() }))
}

#[instrument(skip(state, payload))]
async fn create_policy(
    State(state): State<Arc<PlatformState>>,
    Json(payload): Json<Policy>,
) -> ApiResult {
    let validation = state.validator.validate(&payload);
    if !validation.is_valid() {
        return Err(err_response(ReaperError::InvalidPolicy {
            reason: format!("{} validation error(s)", validation.errors.len()),
        }));
    }
    let result = state.store.add(payload).map(|_| {
        state.metrics.set_policies_loaded(state.store.count());
        json!({ "status": "created" })
    });
    to_api(result)
}

#[instrument(skip(state))]
async fn get_policy(State(state): State<Arc<PlatformState>>, Path(name): Path<String>) -> ApiResult {
    to_api(state.store.get(&name))
}

#[instrument(skip(state, payload))]
async fn update_policy(
    State(state): State<Arc<PlatformState>>,
    Path(name): Path<String>,
    Json(payload): Json<Policy>,
) -> ApiResult {
    if payload.name != name {
        return Err(err_response(ReaperError::InvalidInput {
            reason: "payload name does not match path".to_string(),
        }));
    }
    let validation = state.validator.validate(&payload);
    if !validation.is_valid() {
        return Err(err_response(ReaperError::InvalidPolicy {
            reason: format!("{} validation error(s)", validation.errors.len()),
        }));
    }
    let result: Result<Value> = (|| {
        state.store.remove(&name)?;
        state.store.add(payload)?;
        Ok(json!({ "status": "updated" }))
    })();
    to_api(result)
}

#[instrument(skip(state))]
async fn delete_policy(State(state): State<Arc<PlatformState>>, Path(name): Path<String>) -> ApiResult {
    let result = state.store.remove(&name).map(|_| {
        state.metrics.set_policies_loaded(state.store.count());
        json!({ "status": "deleted" })
    });
    to_api(result)
}

#[instrument(skip(state, payload))]
async fn batch_create_policies(
    State(state): State<Arc<PlatformState>>,
    Json(payload): Json<Vec<Policy>>,
) -> ApiResult {
    let validation = state.validator.validate_batch(&payload);
    if !validation.is_valid() {
        let errors: Vec<Value> = validation
            .results
            .into_iter()
            .filter(|(_, r)| !r.is_valid())
            .map(|(name, r)| json!({ "policy": name, "errors": r.errors.iter().map(|d| d.message.clone()).collect::<Vec<_>>() }))
            .collect();
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": { "code": "InvalidArgument", "message": "batch validation failed", "details": errors } })),
        ));
    }

    let mut merged: std::collections::HashMap<String, Policy> = state
        .store
        .get_all()
        .into_iter()
        .map(|p| (p.name.clone(), (*p).clone()))
        .collect();
    for policy in payload {
        merged.insert(policy.name.clone(), policy);
    }
    let result = state
        .version_manager
        .update_with_rollback(merged, "batch create")
        .map(|v| {
            state.metrics.set_policies_loaded(state.store.count());
            json!({ "status": "created", "version": v.version })
        });
    to_api(result)
}

#[instrument(skip(state, payload))]
async fn batch_validate_policies(
    State(state): State<Arc<PlatformState>>,
    Json(payload): Json<Vec<Policy>>,
) -> Json<Value> {
    let validation = state.validator.validate_batch(&payload);
    ok(json!({ "valid": validation.is_valid(), "results": validation.results }))
}

#[instrument(skip(state))]
async fn validate_stored_policy(
    State(state): State<Arc<PlatformState>>,
    Path(name): Path<String>,
) -> ApiResult {
    let policy = state.store.get(&name).map_err(err_response)?;
    let validation = state.validator.validate(&policy);
    Ok(ok(json!({ "valid": validation.is_valid(), "errors": validation.errors, "warnings": validation.warnings })))
}

#[instrument(skip(state, payload))]
async fn validate_payload_policy(
    State(state): State<Arc<PlatformState>>,
    Json(payload): Json<Policy>,
) -> Json<Value> {
    let validation = state.validator.validate(&payload);
    ok(json!({ "valid": validation.is_valid(), "errors": validation.errors, "warnings": validation.warnings }))
}

#[instrument(skip(state))]
async fn list_versions(State(state): State<Arc<PlatformState>>) -> Json<Value> {
    ok(state.version_manager.list_versions())
}

#[instrument(skip(state))]
async fn current_version(State(state): State<Arc<PlatformState>>) -> ApiResult {
    match state.version_manager.get_current_version() {
        Some(v) => Ok(ok(v)),
        None => Err(err_response(ReaperError::VersionNotFound { version: 0 })),
    }
}

#[instrument(skip(state))]
async fn get_version(State(state): State<Arc<PlatformState>>, Path(n): Path<u64>) -> ApiResult {
    to_api(state.version_manager.get_version(n))
}

#[instrument(skip(state))]
async fn rollback_version(State(state): State<Arc<PlatformState>>, Path(n): Path<u64>) -> ApiResult {
    let result = state.version_manager.rollback(n).map(|v| {
        state.metrics.set_policies_loaded(state.store.count());
        v
    });
    to_api(result)
}

#[instrument(skip(state))]
async fn rollback_previous(State(state): State<Arc<PlatformState>>) -> ApiResult {
    let result = state.version_manager.rollback_to_previous().map(|v| {
        state.metrics.set_policies_loaded(state.store.count());
        v
    });
    to_api(result)
}

#[instrument(skip(state))]
async fn stats(State(state): State<Arc<PlatformState>>) -> Json<Value> {
    ok(state.version_manager.get_stats())
}

#[instrument(skip(state))]
async fn list_agents(State(state): State<Arc<PlatformState>>) -> Json<Value> {
    let agents = state.agents.list();
    ok(json!({ "agents": agents, "total": agents.len() }))
}

#[instrument(skip(state, payload))]
async fn create_agent(State(state): State<Arc<PlatformState>>, Json(payload): Json<Agent>) -> ApiResult {
    state.agents.add(payload);
    Ok(ok(json!({ "status": "created" })))
}

#[instrument(skip(state))]
async fn get_agent(State(state): State<Arc<PlatformState>>, Path(id): Path<AgentId>) -> ApiResult {
    to_api(state.agents.get(&id))
}

#[instrument(skip(state))]
async fn remove_agent(State(state): State<Arc<PlatformState>>, Path(id): Path<AgentId>) -> ApiResult {
    to_api(state.agents.remove(&id))
}

#[instrument(skip(state))]
async fn list_delegations(State(state): State<Arc<PlatformState>>) -> Json<Value> {
    let delegations = state.delegations.list();
    ok(json!({ "delegations": delegations, "total": delegations.len() }))
}

#[instrument(skip(state, payload))]
async fn create_delegation(
    State(state): State<Arc<PlatformState>>,
    Json(payload): Json<Delegation>,
) -> ApiResult {
    state.delegations.add(payload);
    Ok(ok(json!({ "status": "created" })))
}

#[instrument(skip(state))]
async fn get_delegation(State(state): State<Arc<PlatformState>>, Path(id): Path<Uuid>) -> ApiResult {
    to_api(state.delegations.get(&id))
}

#[instrument(skip(state))]
async fn remove_delegation(State(state): State<Arc<PlatformState>>, Path(id): Path<Uuid>) -> ApiResult {
    to_api(state.delegations.remove(&id))
}

#[instrument(skip(state, payload))]
async fn validate_delegation(
    State(state): State<Arc<PlatformState>>,
    Json(payload): Json<DelegationRequest>,
) -> ApiResult {
    match state.delegation_validator().validate(&payload) {
        Ok(()) => Ok(ok(json!({ "valid": true }))),
        Err(e) => Err(err_response(e)),
    }
}
