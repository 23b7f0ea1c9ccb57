//! BDD tests for Reaper Core's data model invariants.

use chrono::{Duration, Utc};
use cucumber::{given, then, when, World};
use reaper_core::*;
use uuid::Uuid;

#[derive(Debug, World)]
#[world(init = Self::new)]
struct ReaperWorld {
    agent: Option<Agent>,
    last_error: Option<ReaperError>,
    scope: Option<Scope>,
}

impl ReaperWorld {
    fn new() -> Self {
        Self {
            agent: None,
            last_error: None,
            scope: None,
        }
    }
}

fn parse_status(s: &str) -> AgentStatus {
    match s {
        "active" => AgentStatus::Active,
        "suspended" => AgentStatus::Suspended,
        "revoked" => AgentStatus::Revoked,
        other => panic!("unknown status {other}"),
    }
}

#[given(regex = r#"^an agent with status "(.*)" and no expiration$"#)]
async fn given_agent_no_expiration(world: &mut ReaperWorld, status: String) {
    world.agent = Some(Agent {
        id: Uuid::new_v4(),
        kind: AgentKind::AiAgent,
        display_name: "test-agent".to_string(),
        status: parse_status(&status),
        expires_at: None,
        credentials: vec![],
    });
}

#[given(regex = r#"^an agent with status "(.*)" and an expiration in the past$"#)]
async fn given_agent_expired(world: &mut ReaperWorld, status: String) {
    world.agent = Some(Agent {
        id: Uuid::new_v4(),
        kind: AgentKind::AiAgent,
        display_name: "test-agent".to_string(),
        status: parse_status(&status),
        expires_at: Some(Utc::now() - Duration::hours(1)),
        credentials: vec![],
    });
}

#[then("the agent should be active")]
async fn then_agent_active(world: &mut ReaperWorld) {
    assert!(world.agent.as_ref().unwrap().is_active(Utc::now()));
}

#[then("the agent should not be active")]
async fn then_agent_not_active(world: &mut ReaperWorld) {
    assert!(!world.agent.as_ref().unwrap().is_active(Utc::now()));
}

#[when("I look up a non-existent policy")]
async fn when_lookup_missing_policy(world: &mut ReaperWorld) {
    world.last_error = Some(ReaperError::PolicyNotFound {
        policy_id: "non-existent".to_string(),
    });
}

#[then(regex = r#"^I should get a "(.*)" error$"#)]
async fn then_should_get_error(world: &mut ReaperWorld, code: String) {
    let error = world.last_error.as_ref().expect("no error recorded");
    assert_eq!(error.code(), code);
}

#[then("the error should include the policy ID")]
async fn then_error_includes_policy_id(world: &mut ReaperWorld) {
    let error = world.last_error.as_ref().unwrap();
    assert!(error.to_string().contains("non-existent"));
}

#[given(regex = r#"^a delegation scope of "(.*)"$"#)]
async fn given_scope(world: &mut ReaperWorld, scope: String) {
    world.scope = Some(Scope(scope));
}

#[then(regex = r#"^it should match the requested scope "(.*)"$"#)]
async fn then_scope_matches(world: &mut ReaperWorld, requested: String) {
    let (action, kind) = requested.split_once(':').unwrap();
    assert!(world
        .scope
        .as_ref()
        .unwrap()
        .matches(&Scope::new(action, kind)));
}

#[then(regex = r#"^it should not match the requested scope "(.*)"$"#)]
async fn then_scope_does_not_match(world: &mut ReaperWorld, requested: String) {
    let (action, kind) = requested.split_once(':').unwrap();
    assert!(!world
        .scope
        .as_ref()
        .unwrap()
        .matches(&Scope::new(action, kind)));
}

#[tokio::main]
async fn main() {
    ReaperWorld::run("tests/features").await;
}
