//! BDD tests for policy admission, storage, and end-to-end decision evaluation.

use cucumber::{given, then, when, World};
use policy_engine::condition::ExprCache;
use policy_engine::store::PolicyStore;
use policy_engine::{CheckRequest, DecisionEngine, Effect, Policy, Principal, Resource, Rule, Validator};
use std::sync::Arc;

#[derive(World)]
#[world(init = Self::new)]
struct PolicyEngineWorld {
    store: Arc<PolicyStore>,
    validator: Validator,
    engine: Option<DecisionEngine>,
    last_valid: Option<bool>,
    last_decision: Option<String>,
}

impl std::fmt::Debug for PolicyEngineWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngineWorld")
            .field("store", &self.store)
            .field("last_valid", &self.last_valid)
            .field("last_decision", &self.last_decision)
            .finish()
    }
}

impl PolicyEngineWorld {
    fn new() -> Self {
        Self {
            store: Arc::new(PolicyStore::new()),
            validator: Validator::new(),
            engine: None,
            last_valid: None,
            last_decision: None,
        }
    }
}

#[given("a policy engine with an empty store")]
async fn given_policy_engine(world: &mut PolicyEngineWorld) {
    world.engine = Some(DecisionEngine::new(world.store.clone(), Arc::new(ExprCache::new())));
}

#[when(regex = r#"^I load a valid policy named "(.*)" for resource kind "(.*)"$"#)]
async fn when_load_valid_policy(world: &mut PolicyEngineWorld, name: String, kind: String) {
    let policy = Policy::new(
        name,
        kind,
        vec![Rule {
            name: "r1".to_string(),
            actions: vec!["read".to_string()],
            effect: Effect::Allow,
            roles: vec![],
            condition: None,
            derived_roles: vec![],
        }],
    );
    let result = world.validator.validate(&policy);
    world.last_valid = Some(result.is_valid());
    if result.is_valid() {
        world.store.add(policy).unwrap();
    }
}

#[when(regex = r#"^I load a policy named "(.*)" with no rules$"#)]
async fn when_load_empty_policy(world: &mut PolicyEngineWorld, name: String) {
    let policy = Policy::new(name, "document", vec![]);
    let result = world.validator.validate(&policy);
    world.last_valid = Some(result.is_valid());
    if result.is_valid() {
        world.store.add(policy).unwrap();
    }
}

#[given(regex = r#"^a stored policy granting "(.*)" to role "(.*)" on "(.*)"$"#)]
async fn given_stored_granting_policy(world: &mut PolicyEngineWorld, action: String, role: String, kind: String) {
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
}

#[when(regex = r#"^a principal with role "(.*)" requests "(.*)" on a "(.*)"$"#)]
async fn when_principal_requests(world: &mut PolicyEngineWorld, role: String, action: String, kind: String) {
    let mut principal = Principal::new("requester-1");
    principal.roles = vec![role];
    let resource = Resource::new(kind, "resource-1");
    let request = CheckRequest {
        request_id: "req-1".to_string(),
        principal,
        resource,
        actions: vec![action],
        context: Default::default(),
    };
    let response = world.engine.as_ref().unwrap().check(request).await.unwrap();
    let effect = response.results[0].effect;
    world.last_decision = Some(match effect {
        Effect::Allow => "allow".to_string(),
        Effect::Deny => "deny".to_string(),
    });
}

#[then("the policy should be ready")]
async fn then_policy_ready(world: &mut PolicyEngineWorld) {
    assert_eq!(world.last_valid, Some(true));
}

#[then("the policy should be rejected")]
async fn then_policy_rejected(world: &mut PolicyEngineWorld) {
    assert_eq!(world.last_valid, Some(false));
}

#[then(regex = r#"^the store should contain (\d+) polic(?:y|ies)$"#)]
async fn then_store_count(world: &mut PolicyEngineWorld, count: usize) {
    assert_eq!(world.store.count(), count);
}

#[then(regex = r#"^the decision should be "(.*)"$"#)]
async fn then_decision_is(world: &mut PolicyEngineWorld, expected: String) {
    assert_eq!(world.last_decision.as_deref(), Some(expected.as_str()));
}

#[tokio::main]
async fn main() {
    PolicyEngineWorld::run("tests/features").await;
}
