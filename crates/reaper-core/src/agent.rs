//! Agent and credential types (spec §3) for agent-to-agent delegated
//! authorization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type AgentId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Human,
    AiAgent,
    Service,
    AutomationBot,
}

/// `active → suspended ↔ active`, `{active,suspended} → revoked` (terminal).
/// `expired` is a derived predicate, never a stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Suspended,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    ApiKey,
    OauthToken,
    Certificate,
    Ed25519Key,
    Jwt,
    PublicKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: CredentialType,
    pub value: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub kind: AgentKind,
    pub display_name: String,
    pub status: AgentStatus,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub credentials: Vec<Credential>,
}

impl Agent {
    /// An agent is active iff `status == Active` and (no expiration, or it's
    /// in the future).
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == AgentStatus::Active
            && self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }

    pub fn has_valid_credential(&self, now: DateTime<Utc>) -> bool {
        self.credentials.iter().any(|c| !c.is_expired(now))
    }
}
