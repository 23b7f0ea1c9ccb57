//! BDD tests for the control plane's policy/version/agent/delegation
//! management surface: the same `policy_engine` building blocks the
//! `reaper-platform` binary wires behind its REST API (spec §4.4, §4.9, §6).

use cucumber::{given, then, when, World};
use chrono::{Duration, Utc};
use policy_engine::{AgentStore, DelegationStore, DelegationValidator, PolicyStore, Validator, VersionManager};
use reaper_core::{
    Agent, AgentKind, AgentStatus, Credential, CredentialType, Delegation, DelegationChain,
    DelegationRequest, Effect, Policy, Rule, Scope,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(World)]
#[world(init = Self::new)]
struct PlatformWorld {
    store: Arc<PolicyStore>,
    validator: Validator,
    versions: VersionManager,
    agents: Arc<AgentStore>,
    delegations: Arc<DelegationStore>,
    agent_ids: HashMap<String, Uuid>,
    last_admit_ok: Option<bool>,
    last_delegation_ok: Option<bool>,
}

impl std::fmt::Debug for PlatformWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformWorld")
            .field("last_admit_ok", &self.last_admit_ok)
            .field("last_delegation_ok", &self.last_delegation_ok)
            .finish()
    }
}

impl PlatformWorld {
    fn new() -> Self {
        let store = Arc::new(PolicyStore::new());
        Self {
            versions: VersionManager::new(store.clone()),
            store,
            validator: Validator::new(),
            agents: Arc::new(AgentStore::new()),
            delegations: Arc::new(DelegationStore::new()),
            agent_ids: HashMap::new(),
            last_admit_ok: None,
            last_delegation_ok: None,
        }
    }

    fn admit(&mut self, policy: Policy) -> bool {
        let result = self.validator.validate(&policy);
        if !result.is_valid() {
            return false;
        }
        let mut snapshot: HashMap<String, Policy> = self
            .store
            .get_all()
            .into_iter()
            .map(|p| (p.name.clone(), (*p).clone()))
            .collect();
        snapshot.insert(policy.name.clone(), policy);
        self.versions.update_with_rollback(snapshot, "bdd admission").is_ok()
    }

    fn agent(&mut self, name: &str) -> Uuid {
        *self.agent_ids.entry(name.to_string()).or_insert_with(Uuid::new_v4)
    }
}

#[given("a control plane with an empty policy store")]
async fn given_empty_store(_world: &mut PlatformWorld) {}

#[given("a control plane with an empty agent store")]
async fn given_empty_agent_store(_world: &mut PlatformWorld) {}

#[given(regex = r#"^a policy named "(.*)" for resource kind "(.*)" is already admitted$"#)]
async fn given_policy_already_admitted(world: &mut PlatformWorld, name: String, kind: String) {
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
    assert!(world.admit(policy), "setup admission unexpectedly failed");
}

#[when(regex = r#"^I admit a policy named "(.*)" for resource kind "(.*)"$"#)]
async fn when_admit_policy(world: &mut PlatformWorld, name: String, kind: String) {
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
    world.last_admit_ok = Some(world.admit(policy));
}

#[when(regex = r#"^I admit a policy named "(.*)" with no rules$"#)]
async fn when_admit_empty_policy(world: &mut PlatformWorld, name: String) {
    let policy = Policy::new(name, "document", vec![]);
    world.last_admit_ok = Some(world.admit(policy));
}

#[when(regex = r#"^I register an active agent named "(.*)" with a valid credential$"#)]
async fn when_register_agent(world: &mut PlatformWorld, name: String) {
    let agent = Agent {
        id: world.agent(&name),
        kind: AgentKind::AutomationBot,
        display_name: name,
        status: AgentStatus::Active,
        expires_at: None,
        credentials: vec![valid_credential()],
    };
    world.agents.add(agent);
}

#[given(regex = r#"^a control plane with two active agents "(.*)" and "(.*)" holding valid credentials$"#)]
async fn given_two_active_agents(world: &mut PlatformWorld, a: String, b: String) {
    for name in [a, b] {
        let agent = Agent {
            id: world.agent(&name),
            kind: AgentKind::AutomationBot,
            display_name: name,
            status: AgentStatus::Active,
            expires_at: None,
            credentials: vec![valid_credential()],
        };
        world.agents.add(agent);
    }
}

#[given(regex = r#"^an active, non-expired delegation from "(.*)" to "(.*)" scoped to "(.*)"$"#)]
async fn given_delegation(world: &mut PlatformWorld, from: String, to: String, scope: String) {
    let (action, kind) = scope.split_once(':').unwrap();
    let delegation = Delegation {
        id: Uuid::new_v4(),
        from_agent: world.agent(&from),
        to_agent: world.agent(&to),
        scopes: vec![Scope::new(action, kind)],
        max_hops: 5,
        expires_at: Utc::now() + Duration::hours(1),
        active: true,
    };
    world.delegations.add(delegation);
}

#[when(regex = r#"^I validate a delegation chain from "(.*)" to "(.*)" scoped to "(.*)"$"#)]
async fn when_validate_delegation(world: &mut PlatformWorld, from: String, to: String, scope: String) {
    let (action, kind) = scope.split_once(':').unwrap();
    let source = world.agent(&from);
    let target = world.agent(&to);
    let chain = DelegationChain {
        source_agent: source,
        target_agent: target,
        intermediaries: vec![],
        scopes: vec![Scope::new(action, kind)],
        max_hops: 5,
        expires_at: Utc::now() + Duration::hours(1),
    };
    let request = DelegationRequest {
        source_agent: source,
        target_agent: target,
        chain,
        principal_id: "principal-1".to_string(),
        action: action.to_string(),
        resource_kind: kind.to_string(),
    };
    let validator = DelegationValidator::new(world.agents.clone(), world.delegations.clone());
    world.last_delegation_ok = Some(validator.validate(&request).is_ok());
}

#[then("the admission should succeed")]
async fn then_admission_succeeds(world: &mut PlatformWorld) {
    assert_eq!(world.last_admit_ok, Some(true));
}

#[then("the admission should fail")]
async fn then_admission_fails(world: &mut PlatformWorld) {
    assert_eq!(world.last_admit_ok, Some(false));
}

#[then(regex = r#"^the current version should be (\d+)$"#)]
async fn then_current_version(world: &mut PlatformWorld, expected: u64) {
    let current = world.versions.get_current_version().map(|v| v.version).unwrap_or(0);
    assert_eq!(current, expected);
}

#[then(regex = r#"^the agent store should contain (\d+) agents?$"#)]
async fn then_agent_store_count(world: &mut PlatformWorld, expected: usize) {
    assert_eq!(world.agents.list().len(), expected);
}

#[then("the delegation validation should succeed")]
async fn then_delegation_succeeds(world: &mut PlatformWorld) {
    assert_eq!(world.last_delegation_ok, Some(true));
}

#[then("the delegation validation should fail")]
async fn then_delegation_fails(world: &mut PlatformWorld) {
    assert_eq!(world.last_delegation_ok, Some(false));
}

fn valid_credential() -> Credential {
    Credential {
        id: Uuid::new_v4(),
        kind: CredentialType::ApiKey,
        value: "secret".to_string(),
        issued_at: Utc::now(),
        expires_at: Some(Utc::now() + Duration::hours(1)),
    }
}

#[tokio::main]
async fn main() {
    PlatformWorld::run("tests/features").await;
}
