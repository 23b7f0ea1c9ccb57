//! Decision Engine (C8)
//!
//! Single-request, batch, and streaming evaluation: admission through the
//! rate limiter, fingerprint/cache lookup with single-flight collapsing,
//! deterministic policy/rule matching, and deny-overrides combination (spec
//! §4.7).

use crate::cache::{DecisionCache, SingleFlight};
use crate::condition::{self, EvalContext, ExprCache};
use crate::fingerprint::fingerprint;
use crate::rate_limit::RateLimiter;
use crate::store::PolicyStore;
use reaper_core::{
    ActionResult, AttrValue, CheckRequest, CheckResponse, Effect, Principal, ReaperError,
    Resource, ResponseMetadata, Result,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{instrument, warn};

/// Default batch worker pool size (spec §4.7 "Batch").
pub const DEFAULT_BATCH_WORKERS: usize = 16;

#[derive(Clone)]
pub struct DecisionEngine {
    store: Arc<PolicyStore>,
    expr_cache: Arc<ExprCache>,
    cache: Option<Arc<dyn DecisionCache>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    single_flight: Arc<SingleFlight<CheckResponse>>,
    batch_workers: usize,
}

impl DecisionEngine {
    pub fn new(store: Arc<PolicyStore>, expr_cache: Arc<ExprCache>) -> Self {
        Self {
            store,
            expr_cache,
            cache: None,
            rate_limiter: None,
            single_flight: Arc::new(SingleFlight::new()),
            batch_workers: DEFAULT_BATCH_WORKERS,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn DecisionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_batch_workers(mut self, n: usize) -> Self {
        self.batch_workers = n.max(1);
        self
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    /// Single decision request (spec §4.7 "Single request").
    #[instrument(skip(self, request), fields(request_id = %request.request_id))]
    pub async fn check(&self, request: CheckRequest) -> Result<CheckResponse> {
        if let Some(limiter) = &self.rate_limiter {
            if !limiter.allow() {
                return Err(ReaperError::Overloaded);
            }
        }

        let fp = fingerprint(&request);

        if let Some(cache) = &self.cache {
            if let Some(mut cached) = cache.get(&fp).await {
                cached.metadata.cache_hit = true;
                return Ok(cached);
            }
        }

        let engine = self.clone();
        let response = self
            .single_flight
            .run(&fp, move || async move { engine.evaluate(request).await })
            .await;

        if let Some(cache) = &self.cache {
            cache.set(&fp, response.clone()).await;
        }

        Ok(response)
    }

    /// `check` with a caller-supplied deadline (spec §5 "Cancellation":
    /// "Every public entry point accepts a deadline/cancellation handle").
    pub async fn check_with_deadline(
        &self,
        request: CheckRequest,
        deadline: Duration,
    ) -> Result<CheckResponse> {
        match tokio::time::timeout(deadline, self.check(request)).await {
            Ok(result) => result,
            Err(_) => Err(ReaperError::Cancelled),
        }
    }

    /// Steps 3-6 of spec §4.7: select applicable policies in deterministic
    /// order, evaluate rules per action, combine with deny-overrides. Never
    /// fails: condition errors and unmatched actions become a default-deny
    /// result, never a caller-visible error (spec §7).
    async fn evaluate(&self, request: CheckRequest) -> CheckResponse {
        let start = Instant::now();
        let snapshot = self.store.snapshot();
        let applicable = snapshot.get_by_resource_kind(&request.resource.kind);

        let ctx = EvalContext::new(
            principal_env(&request.principal),
            resource_env(&request.resource),
            AttrValue::Map(request.context.clone()),
        );

        let actions = request.deduped_actions();
        let mut results = Vec::with_capacity(actions.len());

        for action in &actions {
            results.push(self.evaluate_action(action, &applicable, &request.principal.roles, &ctx));
        }

        CheckResponse {
            request_id: request.request_id,
            results,
            metadata: ResponseMetadata {
                evaluation_duration_micros: start.elapsed().as_micros() as u64,
                policies_considered: applicable.len(),
                cache_hit: false,
            },
        }
    }

    fn evaluate_action(
        &self,
        action: &str,
        applicable: &[Arc<reaper_core::Policy>],
        principal_roles: &[String],
        ctx: &EvalContext,
    ) -> ActionResult {
        let mut matched_deny: Option<(String, String)> = None;
        let mut matched_allow: Option<(String, String)> = None;

        'policies: for policy in applicable {
            for rule in &policy.rules {
                if !rule.matches_action(action) {
                    continue;
                }
                if !rule.matches_roles(principal_roles) {
                    continue;
                }
                if let Some(condition_src) = &rule.condition {
                    match self.expr_cache.compile(condition_src) {
                        Ok(expr) => match condition::eval(&expr, ctx) {
                            Ok(AttrValue::Bool(true)) => {}
                            Ok(_) => continue, // non-bool or false result: rule does not match
                            Err(diagnostic) => {
                                warn!(
                                    policy = %policy.name,
                                    rule = %rule.name,
                                    %diagnostic,
                                    "condition evaluation error, skipping rule"
                                );
                                continue;
                            }
                        },
                        Err(e) => {
                            // Should not happen for an admitted policy (the
                            // validator rejects syntax errors at admission
                            // time); treat as a skipped rule defensively.
                            warn!(policy = %policy.name, rule = %rule.name, %e, "uncompilable condition");
                            continue;
                        }
                    }
                }

                // Deny-overrides: any matched deny, within a policy or
                // across policies, wins immediately (spec §4.7 step 5).
                if rule.effect == Effect::Deny {
                    matched_deny = Some((policy.name.clone(), rule.name.clone()));
                    break 'policies;
                }
                if matched_allow.is_none() {
                    matched_allow = Some((policy.name.clone(), rule.name.clone()));
                }
            }
        }

        if let Some((policy, rule)) = matched_deny {
            ActionResult {
                action: action.to_string(),
                effect: Effect::Deny,
                matched_policy: policy,
                matched_rule: rule,
                matched: true,
            }
        } else if let Some((policy, rule)) = matched_allow {
            ActionResult {
                action: action.to_string(),
                effect: Effect::Allow,
                matched_policy: policy,
                matched_rule: rule,
                matched: true,
            }
        } else {
            ActionResult::default_deny(action)
        }
    }

    /// Fan out over a bounded worker pool; result order matches input order
    /// regardless of completion order. A panic in any one worker is
    /// contained and surfaces as `Internal` for that request only (spec
    /// §4.7 "Batch").
    pub async fn check_batch(&self, requests: Vec<CheckRequest>) -> Vec<Result<CheckResponse>> {
        let semaphore = Arc::new(Semaphore::new(self.batch_workers));
        let mut tasks = Vec::with_capacity(requests.len());

        for request in requests {
            let engine = self.clone();
            let semaphore = semaphore.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("batch semaphore is never closed");
                engine.check(request).await
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(result) => results.push(result),
                Err(join_err) => {
                    warn!(error = %join_err, "batch worker panicked");
                    results.push(Err(ReaperError::Internal {
                        reason: "worker panicked while evaluating this request".to_string(),
                    }));
                }
            }
        }
        results
    }

    /// Bidirectional streaming: each request on `rx` produces exactly one
    /// response on the returned channel, in completion order (not arrival
    /// order); correlation is by `request_id`. The task flushes outstanding
    /// work after `rx` is closed (spec §4.7 "Stream").
    pub fn check_stream(self: Arc<Self>, mut rx: mpsc::Receiver<CheckRequest>) -> mpsc::Receiver<CheckResponse> {
        let (tx, out_rx) = mpsc::channel(128);

        tokio::spawn(async move {
            let mut inflight: JoinSet<Result<CheckResponse>> = JoinSet::new();

            loop {
                tokio::select! {
                    maybe_request = rx.recv() => {
                        match maybe_request {
                            Some(request) => {
                                let engine = self.clone();
                                inflight.spawn(async move { engine.check(request).await });
                            }
                            None => break,
                        }
                    }
                    Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                        forward(&tx, joined).await;
                    }
                }
            }

            while let Some(joined) = inflight.join_next().await {
                forward(&tx, joined).await;
            }
        });

        out_rx
    }
}

async fn forward(
    tx: &mpsc::Sender<CheckResponse>,
    joined: std::result::Result<Result<CheckResponse>, tokio::task::JoinError>,
) {
    match joined {
        Ok(Ok(response)) => {
            let _ = tx.send(response).await;
        }
        Ok(Err(e)) => {
            warn!(error = %e, "stream request failed");
        }
        Err(join_err) => {
            warn!(error = %join_err, "stream worker panicked");
        }
    }
}

/// Projects a `Principal` into the ambient `{principal, resource, context}`
/// evaluation environment the condition grammar reads from (spec §4.5).
fn principal_env(principal: &Principal) -> AttrValue {
    let mut map = HashMap::new();
    map.insert("id".to_string(), AttrValue::from(principal.id.clone()));
    map.insert(
        "roles".to_string(),
        AttrValue::List(principal.roles.iter().map(|r| AttrValue::from(r.clone())).collect()),
    );
    map.insert("attributes".to_string(), AttrValue::Map(principal.attributes.clone()));
    AttrValue::Map(map)
}

fn resource_env(resource: &Resource) -> AttrValue {
    let mut map = HashMap::new();
    map.insert("kind".to_string(), AttrValue::from(resource.kind.clone()));
    map.insert("id".to_string(), AttrValue::from(resource.id.clone()));
    map.insert("attributes".to_string(), AttrValue::Map(resource.attributes.clone()));
    AttrValue::Map(map)
}
