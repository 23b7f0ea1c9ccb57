//! # Reaper Agent
//!
//! Hosts the decision plane: rate limiter, decision cache, decision engine,
//! and a background policy loader/watcher keeping the local snapshot
//! current. Exposes the decision surface as JSON-over-HTTP (`Check`,
//! `CheckBatch`) and as a WebSocket (`CheckStream`), plus health and
//! metrics endpoints.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use clap::Parser;
use metrics::Metrics;
use policy_engine::{
    load_directory, DecisionEngine, ExprCache, LruCache, PolicyStore, PolicyWatcher, RateLimiter,
    Validator, VersionManager,
};
use reaper_core::{endpoints, CheckRequest, CheckResponse, BUILD_INFO};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

/// Decision-plane server: rate limiter, cache, engine, watcher.
#[derive(Parser, Debug, Clone)]
#[command(name = "reaper-agent", version = reaper_core::VERSION)]
struct Args {
    /// Port for the decision RPC surface. Identical router to `http_port`;
    /// set the two equal to serve everything on one port.
    #[arg(long, default_value_t = 7070)]
    rpc_port: u16,

    /// Port for health/metrics and (unless `rpc_port` differs) the decision
    /// routes too.
    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    /// Enables the in-process LRU decision cache.
    #[arg(long, default_value_t = true)]
    cache_enabled: bool,

    #[arg(long, default_value_t = 100_000)]
    cache_size: usize,

    #[arg(long, default_value_t = 300)]
    cache_ttl_secs: u64,

    /// Bounded worker pool size for `CheckBatch`.
    #[arg(long, default_value_t = policy_engine::DEFAULT_BATCH_WORKERS)]
    worker_count: usize,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// `text` or `json`.
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Directory of `.yaml`/`.yml`/`.json` policy files.
    #[arg(long, default_value = "./policies")]
    policy_dir: PathBuf,

    #[arg(long, default_value_t = 10)]
    graceful_shutdown_timeout_secs: u64,

    /// Token bucket capacity.
    #[arg(long, default_value_t = 1_000)]
    rate_limit_max_tokens: u32,

    /// Token bucket refill rate, tokens/sec.
    #[arg(long, default_value_t = 500.0)]
    rate_limit_refill_per_sec: f64,

    /// Print version and exit.
    #[arg(long, default_value_t = false)]
    show_version: bool,

    /// Self-test: hit the local health endpoint and exit with its status.
    #[arg(long, default_value_t = false)]
    health_check: bool,
}

struct AgentState {
    engine: Arc<DecisionEngine>,
    metrics: Arc<Metrics>,
    ready: Arc<AtomicBool>,
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
    info!("Starting Reaper Agent {}", BUILD_INFO);

    let store = Arc::new(PolicyStore::new());
    let expr_cache = Arc::new(ExprCache::new());
    let validator = Arc::new(Validator::with_expr_cache(expr_cache.clone()));
    let version_manager = Arc::new(VersionManager::new(store.clone()));
    let reload_bus = Arc::new(message_queue::ReloadBus::new(64));
    let rate_limiter = Arc::new(RateLimiter::new(
        args.rate_limit_max_tokens,
        args.rate_limit_refill_per_sec,
    ));
    let app_metrics = Arc::new(Metrics::new());
    let ready = Arc::new(AtomicBool::new(false));

    let mut engine = DecisionEngine::new(store.clone(), expr_cache)
        .with_rate_limiter(rate_limiter)
        .with_batch_workers(args.worker_count);
    if args.cache_enabled {
        let cache = Arc::new(LruCache::new(
            args.cache_size,
            Duration::from_secs(args.cache_ttl_secs),
        ));
        engine = engine.with_cache(cache);
    }
    let engine = Arc::new(engine);

    let watcher = Arc::new(PolicyWatcher::new(
        args.policy_dir.clone(),
        version_manager.clone(),
        validator,
        reload_bus,
    ));

    match load_directory(&args.policy_dir) {
        Ok(outcome) => {
            if !outcome.errors.is_empty() {
                for err in &outcome.errors {
                    warn!(%err, "policy file failed to load at startup");
                }
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

    if let Err(e) = watcher.start() {
        warn!(error = %e, "failed to start policy watcher");
    }

    let state = Arc::new(AgentState {
        engine,
        metrics: app_metrics,
        ready,
    });

    let app = build_router(state);

    let shutdown_timeout = Duration::from_secs(args.graceful_shutdown_timeout_secs);
    let http_listener = TcpListener::bind(("0.0.0.0", args.http_port)).await?;
    info!("Reaper Agent listening on {}", http_listener.local_addr()?);

    if args.rpc_port != args.http_port {
        // A distinct decision-RPC port is configured: serve the identical
        // router there too so `Check`/`CheckBatch`/`CheckStream` are
        // reachable independent of the health/metrics port.
        let rpc_listener = TcpListener::bind(("0.0.0.0", args.rpc_port)).await?;
        info!("Reaper Agent decision RPC listening on {}", rpc_listener.local_addr()?);
        let rpc_app = app.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(rpc_listener, rpc_app)
                .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
                .await
            {
                warn!(error = %e, "rpc listener exited with error");
            }
        });
    }

    axum::serve(http_listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
        .await?;
    watcher.stop();

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

async fn shutdown_signal(timeout: Duration) {
    let _ = tokio::signal::ctrl_c().await;
    info!(timeout_secs = timeout.as_secs(), "shutdown signal received, draining in-flight requests");
    tokio::time::sleep(timeout.min(Duration::from_millis(50))).await;
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

fn build_router(state: Arc<AgentState>) -> Router {
    Router::new()
        .route(endpoints::HEALTH, get(health_check))
        .route(endpoints::HEALTH_LIVE, get(health_live))
        .route(endpoints::HEALTH_READY, get(health_ready))
        .route(endpoints::HEALTH_STARTUP, get(health_startup))
        .route(endpoints::METRICS, get(metrics_text))
        .route(endpoints::METRICS_JSON, get(metrics_json))
        .route(endpoints::API_V1_MESSAGES, post(check_one))
        .route(endpoints::API_V1_MESSAGES_BATCH, post(check_batch))
        .route(endpoints::API_V1_MESSAGES_STREAM, get(check_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[instrument]
async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "reaper-agent", "version": reaper_core::VERSION }))
}

#[instrument]
async fn health_live() -> Json<Value> {
    Json(json!({ "status": "live" }))
}

#[instrument(skip(state))]
async fn health_ready(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    if state.ready.load(Ordering::Relaxed) {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "not-ready" })))
    }
}

#[instrument(skip(state))]
async fn health_startup(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    if state.ready.load(Ordering::Relaxed) {
        (StatusCode::OK, Json(json!({ "status": "started" })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "starting" })))
    }
}

#[instrument(skip(state))]
async fn metrics_text(State(state): State<Arc<AgentState>>) -> String {
    state.metrics.render_prometheus()
}

#[instrument(skip(state))]
async fn metrics_json(State(state): State<Arc<AgentState>>) -> Json<Value> {
    Json(state.metrics.render_json())
}

#[instrument(skip(state, request))]
async fn check_one(
    State(state): State<Arc<AgentState>>,
    Json(request): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, (StatusCode, Json<Value>)> {
    let start = Instant::now();
    let result = state.engine.check(request).await;
    state
        .metrics
        .record_request(result.is_ok(), start.elapsed().as_micros() as u64);
    result.map(Json).map_err(|e| error_response(&e))
}

fn error_response(e: &reaper_core::ReaperError) -> (StatusCode, Json<Value>) {
    let status = match e.code() {
        "InvalidArgument" => StatusCode::BAD_REQUEST,
        "NotFound" => StatusCode::NOT_FOUND,
        "AlreadyExists" => StatusCode::CONFLICT,
        "ResourceExhausted" => StatusCode::TOO_MANY_REQUESTS,
        "Cancelled" => StatusCode::BAD_REQUEST,
        "DeadlineExceeded" => StatusCode::GATEWAY_TIMEOUT,
        "Unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({ "success": false, "error": { "code": e.code(), "message": e.to_string() } })),
    )
}

#[instrument(skip(state, requests))]
async fn check_batch(
    State(state): State<Arc<AgentState>>,
    Json(requests): Json<Vec<CheckRequest>>,
) -> Json<Value> {
    let start = Instant::now();
    let results = state.engine.check_batch(requests).await;
    let responses: Vec<Value> = results
        .into_iter()
        .map(|r| {
            let ok = r.is_ok();
            state
                .metrics
                .record_request(ok, start.elapsed().as_micros() as u64);
            match r {
                Ok(resp) => json!({ "success": true, "data": resp }),
                Err(e) => error_response(&e).1 .0,
            }
        })
        .collect();
    Json(json!({ "responses": responses }))
}

#[instrument(skip(state, ws))]
async fn check_stream(
    State(state): State<Arc<AgentState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

async fn handle_stream(mut socket: WebSocket, state: Arc<AgentState>) {
    let (in_tx, in_rx) = mpsc::channel::<CheckRequest>(128);
    let mut out_rx = state.engine.clone().check_stream(in_rx);

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<CheckRequest>(&text) {
                            Ok(request) => {
                                if in_tx.send(request).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "malformed CheckRequest on stream");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read error");
                        break;
                    }
                    _ => {}
                }
            }
            response = out_rx.recv() => {
                match response {
                    Some(response) => {
                        if let Ok(text) = serde_json::to_string(&response) {
                            if socket.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }
        }
    }

    // Every break above leaves `in_rx` as the only thing keeping the
    // spawned check_stream task alive; drop our sender so it closes and
    // the flush below terminates instead of blocking forever.
    drop(in_tx);

    // Flush any responses still in flight after the client half-closes,
    // so a client that stops sending still gets every outstanding answer.
    while let Some(response) = out_rx.recv().await {
        if let Ok(text) = serde_json::to_string(&response) {
            if socket.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    }
}
