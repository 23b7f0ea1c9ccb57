//! # Policy Engine
//!
//! The decision-plane logic layered over `reaper-core`'s data model: the
//! policy store, condition evaluator, validator, decision cache, rate
//! limiter, version/rollback manager, file loader/watcher, delegation
//! validator, and the decision engine that ties them together.

pub use reaper_core;

pub mod cache;
pub mod condition;
pub mod delegation;
pub mod engine;
pub mod fingerprint;
pub mod loader;
pub mod rate_limit;
pub mod store;
pub mod validator;
pub mod version;

pub use cache::{
    CacheStats, DecisionCache, DistributedBackend, DistributedCache, HybridCache, LruCache,
    SingleFlight,
};
pub use condition::{eval, parse, CondError, EvalContext, Expr, ExprCache};
pub use delegation::{AgentStore, DelegationStore, DelegationValidator};
pub use engine::{DecisionEngine, DEFAULT_BATCH_WORKERS};
pub use fingerprint::fingerprint;
pub use loader::{load_directory, LoadError, LoadOutcome, PolicyWatcher, DEFAULT_DEBOUNCE};
pub use rate_limit::RateLimiter;
pub use store::{PolicyStore, Snapshot};
pub use validator::{BatchValidationResult, Diagnostic, ValidationResult, Validator};
pub use version::{checksum, VersionManager};

// Re-export core types for convenience.
pub use reaper_core::{
    ActionResult, Agent, AgentId, AgentKind, AgentStatus, AttrMap, AttrValue, CheckRequest,
    CheckResponse, Credential, CredentialType, Delegation, DelegationChain, DelegationRequest,
    Effect, Policy, PolicyId, PolicyVersion, Principal, ReaperError, Resource, ResponseMetadata,
    Result, Rule, Scope, VersionStats, GLOBAL_MAX_HOPS,
};
