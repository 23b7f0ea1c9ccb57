//! Delegation Validator (C10)
//!
//! Validates agent-to-agent delegation chains: structural soundness, agent
//! and credential freshness, hop limits, and scope coverage (spec §4.9).
//! Runs as a gate before the decision engine for delegated requests; success
//! is silent, failure yields a structured error identifying the failing
//! step.

use dashmap::DashMap;
use reaper_core::{
    Agent, AgentId, AgentStatus, Delegation, DelegationRequest, ReaperError, Result, Scope,
    GLOBAL_MAX_HOPS,
};
use std::sync::Arc;
use uuid::Uuid;

/// Owns agents, independent of the policy store (spec §3
/// "Ownership/lifecycle": "Agents and delegations are owned by their own
/// stores").
#[derive(Debug, Default)]
pub struct AgentStore {
    agents: DashMap<AgentId, Agent>,
}

impl AgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, agent: Agent) {
        self.agents.insert(agent.id, agent);
    }

    pub fn get(&self, id: &AgentId) -> Result<Agent> {
        self.agents
            .get(id)
            .map(|a| a.clone())
            .ok_or_else(|| ReaperError::AgentNotFound {
                agent_id: id.to_string(),
            })
    }

    pub fn list(&self) -> Vec<Agent> {
        self.agents.iter().map(|e| e.value().clone()).collect()
    }

    pub fn remove(&self, id: &AgentId) -> Result<Agent> {
        self.agents
            .remove(id)
            .map(|(_, a)| a)
            .ok_or_else(|| ReaperError::AgentNotFound {
                agent_id: id.to_string(),
            })
    }

    /// Suspend/reinstate/revoke transitions per the state machine in spec §4
    /// ("active -> suspended <-> active", "{active,suspended} -> revoked
    /// (terminal)").
    pub fn set_status(&self, id: &AgentId, status: AgentStatus) -> Result<()> {
        let mut entry = self
            .agents
            .get_mut(id)
            .ok_or_else(|| ReaperError::AgentNotFound {
                agent_id: id.to_string(),
            })?;
        if entry.status == AgentStatus::Revoked {
            return Err(ReaperError::InvalidInput {
                reason: "revoked is a terminal state".to_string(),
            });
        }
        entry.status = status;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct DelegationStore {
    delegations: DashMap<Uuid, Delegation>,
}

impl DelegationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, delegation: Delegation) {
        self.delegations.insert(delegation.id, delegation);
    }

    pub fn get(&self, id: &Uuid) -> Result<Delegation> {
        self.delegations
            .get(id)
            .map(|d| d.clone())
            .ok_or_else(|| ReaperError::DelegationNotFound {
                delegation_id: id.to_string(),
            })
    }

    pub fn list(&self) -> Vec<Delegation> {
        self.delegations.iter().map(|e| e.value().clone()).collect()
    }

    pub fn remove(&self, id: &Uuid) -> Result<Delegation> {
        self.delegations
            .remove(id)
            .map(|(_, d)| d)
            .ok_or_else(|| ReaperError::DelegationNotFound {
                delegation_id: id.to_string(),
            })
    }

    /// All delegations whose `from_agent` matches, used to reconstruct
    /// whether consecutive hops in a chain are each backed by a live grant.
    pub fn from_agent(&self, from: &AgentId) -> Vec<Delegation> {
        self.delegations
            .iter()
            .filter(|e| &e.value().from_agent == from)
            .map(|e| e.value().clone())
            .collect()
    }
}

pub struct DelegationValidator {
    agents: Arc<AgentStore>,
    delegations: Arc<DelegationStore>,
}

impl DelegationValidator {
    pub fn new(agents: Arc<AgentStore>, delegations: Arc<DelegationStore>) -> Self {
        Self { agents, delegations }
    }

    /// Runs every step of spec §4.9 in order, returning on the first
    /// failure with a structured error naming the failing step.
    pub fn validate(&self, request: &DelegationRequest) -> Result<()> {
        let now = chrono::Utc::now();

        // Step 1: basic structural checks.
        if request.chain.len() < 2 {
            return Err(ReaperError::DelegationInvalid {
                reason: "chain must contain at least source and target".to_string(),
            });
        }

        // Step 2: agent status, credentials.
        let source = self.agents.get(&request.source_agent).map_err(|_| {
            ReaperError::DelegationInvalid {
                reason: "source agent not found".to_string(),
            }
        })?;
        let target = self.agents.get(&request.target_agent).map_err(|_| {
            ReaperError::DelegationInvalid {
                reason: "target agent not found".to_string(),
            }
        })?;

        for (role, agent) in [("source", &source), ("target", &target)] {
            if !agent.is_active(now) {
                return Err(ReaperError::DelegationInvalid {
                    reason: format!("{role} agent {} is not active", agent.id),
                });
            }
            if agent.credentials.is_empty() {
                return Err(ReaperError::DelegationInvalid {
                    reason: format!("{role} agent {} has no credentials", agent.id),
                });
            }
            if !agent.has_valid_credential(now) {
                return Err(ReaperError::DelegationInvalid {
                    reason: format!("{role} agent {} has no non-expired credential", agent.id),
                });
            }
        }

        // Step 3: chain checks.
        if request.chain.is_expired(now) {
            return Err(ReaperError::DelegationInvalid {
                reason: "delegation chain has expired".to_string(),
            });
        }
        let hops = request.chain.len();
        if hops > request.chain.max_hops as usize || hops > GLOBAL_MAX_HOPS as usize {
            return Err(ReaperError::DelegationInvalid {
                reason: format!(
                    "chain hop count {hops} exceeds max_hops {} (global ceiling {GLOBAL_MAX_HOPS})",
                    request.chain.max_hops
                ),
            });
        }
        if request.chain.scopes.is_empty() {
            return Err(ReaperError::DelegationInvalid {
                reason: "chain scopes must not be empty".to_string(),
            });
        }
        if request.chain.source_agent != request.source_agent
            || request.chain.target_agent != request.target_agent
        {
            return Err(ReaperError::DelegationInvalid {
                reason: "chain endpoints do not match source/target agents".to_string(),
            });
        }

        // Each consecutive pair in the chain must be backed by an active,
        // non-expired delegation whose scope covers the request (glossary:
        // "Delegation chain").
        let ordered = request.chain.ordered_agents();
        for pair in ordered.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            let has_link = self.delegations.from_agent(&from).into_iter().any(|d| {
                d.active
                    && d.to_agent == to
                    && !d.is_expired(now)
                    && d.scopes.iter().any(|s| s.matches(&request.scope()))
            });
            if !has_link {
                return Err(ReaperError::DelegationInvalid {
                    reason: format!("no active, non-expired, scope-covering delegation from {from} to {to}"),
                });
            }
        }

        // Step 4: scope match against the chain's declared scopes too (the
        // caller-supplied chain summary, in addition to the per-hop check
        // above).
        let requested_scope = request.scope();
        if !request
            .chain
            .scopes
            .iter()
            .any(|s| s.matches(&requested_scope))
        {
            return Err(ReaperError::DelegationInvalid {
                reason: format!("no chain scope covers requested scope {}", requested_scope.0),
            });
        }

        Ok(())
    }
}

trait RequestScope {
    fn scope(&self) -> Scope;
}

impl RequestScope for DelegationRequest {
    fn scope(&self) -> Scope {
        Scope::new(&self.action, &self.resource_kind)
    }
}
