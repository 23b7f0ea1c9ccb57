//! Delegation and delegation-chain types (spec §3, §4.9).

use crate::agent::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A `action:resource-kind` pattern, with `*` wildcards permitted in either
/// half (glossary: "Scope").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope(pub String);

impl Scope {
    pub fn new(action: &str, resource_kind: &str) -> Self {
        Scope(format!("{action}:{resource_kind}"))
    }

    /// A scope matches a request scope if it equals it, or either half is
    /// `*`, or the whole scope is `*` (spec §4.9 step 4).
    pub fn matches(&self, requested: &Scope) -> bool {
        if self.0 == "*" {
            return true;
        }
        if self.0 == requested.0 {
            return true;
        }
        let (Some((sa, sr)), Some((ra, rr))) = (split_scope(&self.0), split_scope(&requested.0))
        else {
            return false;
        };
        (sa == "*" || sa == ra) && (sr == "*" || sr == rr)
    }
}

fn split_scope(s: &str) -> Option<(&str, &str)> {
    s.split_once(':')
}

/// A single agent→agent delegation grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegation {
    pub id: Uuid,
    pub from_agent: AgentId,
    pub to_agent: AgentId,
    pub scopes: Vec<Scope>,
    pub max_hops: u8,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
}

impl Delegation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// An ordered agent chain A1..An such that each consecutive pair has an
/// active, non-expired delegation whose scope covers the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationChain {
    pub source_agent: AgentId,
    pub target_agent: AgentId,
    #[serde(default)]
    pub intermediaries: Vec<AgentId>,
    pub scopes: Vec<Scope>,
    pub max_hops: u8,
    pub expires_at: DateTime<Utc>,
}

/// Global ceiling on chain length regardless of any individual delegation's
/// `max_hops` (spec §4.9 step 3: "hop count ≤ max-hops (≤ 5 global ceiling)").
pub const GLOBAL_MAX_HOPS: u8 = 5;

impl DelegationChain {
    /// Length = intermediaries + 2 (source and target).
    pub fn len(&self) -> usize {
        self.intermediaries.len() + 2
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Ordered agent ids from source to target, inclusive.
    pub fn ordered_agents(&self) -> Vec<AgentId> {
        let mut v = Vec::with_capacity(self.len());
        v.push(self.source_agent);
        v.extend(self.intermediaries.iter().copied());
        v.push(self.target_agent);
        v
    }
}

/// Request passed to the delegation validator (spec §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationRequest {
    pub source_agent: AgentId,
    pub target_agent: AgentId,
    pub chain: DelegationChain,
    pub principal_id: String,
    pub action: String,
    pub resource_kind: String,
}
