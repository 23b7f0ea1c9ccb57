//! BDD tests for the decision agent's request-handling path: the same
//! `DecisionEngine` composition the `reaper-agent` binary wires together
//! behind its HTTP surface (spec §4.6, §4.8).

use cucumber::{given, then, when, World};
use policy_engine::{DecisionEngine, Effect, ExprCache, PolicyStore, RateLimiter};
use reaper_core::{CheckRequest, Policy, Principal, Resource, Rule};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(World)]
#[world(init = Self::new)]
struct AgentWorld {
    store: Arc<PolicyStore>,
    engine: Option<DecisionEngine>,
    ready: AtomicBool,
    last_response: Option<String>,
}

impl std::fmt::Debug for AgentWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentWorld")
            .field("ready", &self.ready.load(Ordering::Relaxed))
            .field("last_response", &self.last_response)
            .finish()
    }
}

impl AgentWorld {
    fn new() -> Self {
        Self {
            store: Arc::new(PolicyStore::new()),
            engine: None,
            ready: AtomicBool::new(false),
            last_response: None,
        }
    }
}

#[given(regex = r#"^a decision agent with a policy granting "(.*)" to role "(.*)" on "(.*)"$"#)]
async fn given_agent_with_granting_policy(world: &mut AgentWorld, action: String, role: String, kind: String) {
    let policy = Policy::new(
        "granting-policy",
        kind,
        vec![Rule {
            name: "allow-rule".to_string(),
            actions: vec![action],
            effect: Effect::Allow,
            roles: vec![role],
            condition: None,
            derived_roles: vec![],
        }],
    );
    world.store.add(policy).unwrap();
    world.engine = Some(DecisionEngine::new(world.store.clone(), Arc::new(ExprCache::new())));
    world.ready.store(true, Ordering::Relaxed);
}

#[given("a decision agent with an empty policy store")]
async fn given_agent_empty_store(world: &mut AgentWorld) {
    world.engine = Some(DecisionEngine::new(world.store.clone(), Arc::new(ExprCache::new())));
    world.ready.store(true, Ordering::Relaxed);
}

#[given(regex = r#"^a decision agent with a token bucket of capacity (\d+)$"#)]
async fn given_agent_with_rate_limit(world: &mut AgentWorld, capacity: u32) {
    let policy = Policy::new(
        "granting-policy",
        "service",
        vec![Rule {
            name: "allow-rule".to_string(),
            actions: vec!["deploy".to_string()],
            effect: Effect::Allow,
            roles: vec!["operator".to_string()],
            condition: None,
            derived_roles: vec![],
        }],
    );
    world.store.add(policy).unwrap();
    let limiter = Arc::new(RateLimiter::new(capacity, 0.0));
    world.engine = Some(
        DecisionEngine::new(world.store.clone(), Arc::new(ExprCache::new())).with_rate_limiter(limiter),
    );
    world.ready.store(true, Ordering::Relaxed);
}

#[given("a decision agent with no policies loaded yet")]
async fn given_agent_not_loaded(world: &mut AgentWorld) {
    world.engine = Some(DecisionEngine::new(world.store.clone(), Arc::new(ExprCache::new())));
}

#[when(regex = r#"^a principal with role "(.*)" requests "(.*)" on a "(.*)"$"#)]
async fn when_principal_requests(world: &mut AgentWorld, role: String, action: String, kind: String) {
    let mut principal = Principal::new("requester-1");
    principal.roles = vec![role];
    let resource = Resource::new(kind, "resource-1");
    let request = CheckRequest {
        request_id: uuid::Uuid::new_v4().to_string(),
        principal,
        resource,
        actions: vec![action],
        context: Default::default(),
    };
    match world.engine.as_ref().unwrap().check(request).await {
        Ok(response) => {
            world.last_response = Some(match response.results[0].effect {
                Effect::Allow => "allow".to_string(),
                Effect::Deny => "deny".to_string(),
            });
        }
        Err(e) if e.code() == "ResourceExhausted" => {
            world.last_response = Some("overloaded".to_string());
        }
        Err(e) => panic!("unexpected engine error: {e}"),
    }
}

#[when("the agent loads its policy store")]
async fn when_agent_loads(world: &mut AgentWorld) {
    world.ready.store(true, Ordering::Relaxed);
}

#[then(regex = r#"^the agent should respond "(.*)"$"#)]
async fn then_agent_responds(world: &mut AgentWorld, expected: String) {
    assert_eq!(world.last_response.as_deref(), Some(expected.as_str()));
}

#[then("the agent should be ready")]
async fn then_agent_ready(world: &mut AgentWorld) {
    assert!(world.ready.load(Ordering::Relaxed));
}

#[then("the agent should not be ready")]
async fn then_agent_not_ready(world: &mut AgentWorld) {
    assert!(!world.ready.load(Ordering::Relaxed));
}

#[tokio::main]
async fn main() {
    AgentWorld::run("tests/features").await;
}
