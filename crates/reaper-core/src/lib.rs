//! # Reaper Core
//!
//! Canonical data model and error taxonomy for the Reaper policy decision
//! point: policies and rules, principals and resources, check requests and
//! responses, agents, credentials, and delegation chains.

pub mod agent;
pub mod attrs;
pub mod delegation;
pub mod error;
pub mod policy;
pub mod principal;
pub mod request;
pub mod version;

pub use agent::{Agent, AgentId, AgentKind, AgentStatus, Credential, CredentialType};
pub use attrs::{AttrMap, AttrValue};
pub use delegation::{Delegation, DelegationChain, DelegationRequest, Scope, GLOBAL_MAX_HOPS};
pub use error::{ReaperError, Result};
pub use policy::{Effect, Policy, PolicyId, Rule};
pub use principal::{Principal, Resource};
pub use request::{ActionResult, CheckRequest, CheckResponse, ResponseMetadata};
pub use version::{PolicyVersion, VersionStats};

/// Current Reaper version for compatibility checks.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reaper build information for telemetry and debugging.
pub const BUILD_INFO: &str = concat!(
    "Reaper ",
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("CARGO_PKG_NAME"),
    ")"
);

/// Standard API endpoints for Reaper services (spec §6).
pub mod endpoints {
    pub const HEALTH: &str = "/health";
    pub const HEALTH_LIVE: &str = "/health/live";
    pub const HEALTH_READY: &str = "/health/ready";
    pub const HEALTH_STARTUP: &str = "/health/startup";
    pub const METRICS: &str = "/metrics";
    pub const METRICS_JSON: &str = "/metrics/json";
    pub const API_V1_POLICIES: &str = "/api/v1/policies";
    pub const API_V1_POLICIES_BATCH: &str = "/api/v1/policies/batch";
    pub const API_V1_POLICIES_BATCH_VALIDATE: &str = "/api/v1/policies/batch/validate";
    pub const API_V1_POLICIES_VALIDATE: &str = "/api/v1/policies/validate";
    pub const API_V1_VERSIONS: &str = "/api/v1/versions";
    pub const API_V1_STATS: &str = "/api/v1/stats";
    pub const API_V1_AGENTS: &str = "/api/v1/agents";
    pub const API_V1_DELEGATIONS: &str = "/api/v1/delegations";
    pub const API_V1_MESSAGES: &str = "/api/v1/messages";
    pub const API_V1_MESSAGES_BATCH: &str = "/api/v1/messages/batch";
    pub const API_V1_MESSAGES_STREAM: &str = "/api/v1/messages/stream";
}
