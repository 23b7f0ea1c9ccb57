//! Decision request/response types (spec §3, §6 "Decision RPC").

use crate::attrs::AttrMap;
use crate::policy::Effect;
use crate::principal::{Principal, Resource};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub request_id: String,
    pub principal: Principal,
    pub resource: Resource,
    pub actions: Vec<String>,
    #[serde(default)]
    pub context: AttrMap,
}

impl CheckRequest {
    /// Ordered, deduplicated actions, per spec §3's `CheckRequest` invariant.
    pub fn deduped_actions(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.actions
            .iter()
            .filter(|a| seen.insert((*a).clone()))
            .cloned()
            .collect()
    }
}

/// Per-action result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResult {
    pub action: String,
    pub effect: Effect,
    #[serde(default)]
    pub matched_policy: String,
    #[serde(default)]
    pub matched_rule: String,
    pub matched: bool,
}

impl ActionResult {
    pub fn default_deny(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            effect: Effect::Deny,
            matched_policy: String::new(),
            matched_rule: String::new(),
            matched: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResponseMetadata {
    pub evaluation_duration_micros: u64,
    pub policies_considered: usize,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResponse {
    pub request_id: String,
    pub results: Vec<ActionResult>,
    pub metadata: ResponseMetadata,
}

impl CheckResponse {
    /// Equality ignoring `metadata`, used by the cache-transparency test
    /// property of spec §8 (`Check(R)` with cache on/off must be byte-equal
    /// in `results`, metadata may differ).
    pub fn results_eq(&self, other: &CheckResponse) -> bool {
        self.results == other.results
    }
}
