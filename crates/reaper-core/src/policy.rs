//! Policy and rule types (spec §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type PolicyId = String;

/// Effect of a matching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

/// Accepts both `EFFECT_ALLOW`/`EFFECT_DENY` (the on-disk wire spelling from
/// §6) and lowercase `allow`/`deny` when parsing policy files.
impl std::str::FromStr for Effect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EFFECT_ALLOW" | "ALLOW" => Ok(Effect::Allow),
            "EFFECT_DENY" | "DENY" => Ok(Effect::Deny),
            other => Err(format!("unknown effect: {other}")),
        }
    }
}

/// Always serializes to the lowercase wire spelling; deserialization goes
/// through `FromStr` so both on-disk spellings in spec §6 are accepted.
impl Serialize for Effect {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Effect::Allow => serializer.serialize_str("allow"),
            Effect::Deny => serializer.serialize_str("deny"),
        }
    }
}

impl<'de> Deserialize<'de> for Effect {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A single rule within a policy.
///
/// Invariant: `name` unique within its owning policy; `effect` is one of
/// `allow`/`deny`; `actions` non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub name: String,
    pub actions: Vec<String>,
    pub effect: Effect,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub derived_roles: Vec<String>,
}

impl Rule {
    /// Any-match semantics: empty `actions` is never valid (caught by the
    /// validator), `*` matches any action.
    pub fn matches_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == "*" || a == action)
    }

    /// Empty `roles` matches any principal (§4.7 step 4).
    pub fn matches_roles(&self, principal_roles: &[String]) -> bool {
        self.roles.is_empty()
            || self
                .roles
                .iter()
                .any(|r| principal_roles.iter().any(|pr| pr == r))
    }
}

/// A named unit bound to a single resource kind (spec §3).
///
/// Invariant: unique `name` within the store; `resource_kind` non-empty;
/// `rules` non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub name: PolicyId,
    pub resource_kind: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_api_version() -> String {
    "reaper/v1".to_string()
}

impl Policy {
    pub fn new(name: impl Into<String>, resource_kind: impl Into<String>, rules: Vec<Rule>) -> Self {
        Self {
            name: name.into(),
            resource_kind: resource_kind.into(),
            api_version: default_api_version(),
            rules,
            metadata: HashMap::new(),
        }
    }
}
