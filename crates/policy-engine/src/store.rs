//! Policy Store (C2)
//!
//! Concurrent mapping from policy name to policy, with an auxiliary mapping
//! from resource kind to the set of policy names that target it. Readers
//! dereference a published immutable snapshot; writers build a new snapshot
//! off-line and swap it in under a short-lived write lock, so no reader ever
//! observes a partially updated index (spec §4.1, §5).

use parking_lot::RwLock;
use reaper_core::{Policy, ReaperError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// An immutable view of the policy set. Cheap to clone (an `Arc` bump);
/// readers hold one for the duration of a single request so a concurrent
/// reload never changes the set they see mid-flight (spec §5).
#[derive(Debug, Default)]
pub struct Snapshot {
    policies: HashMap<String, Arc<Policy>>,
    by_resource_kind: HashMap<String, Vec<String>>,
}

impl Snapshot {
    fn build(policies: HashMap<String, Arc<Policy>>) -> Self {
        let mut by_resource_kind: HashMap<String, Vec<String>> = HashMap::new();
        for (name, policy) in &policies {
            by_resource_kind
                .entry(policy.resource_kind.clone())
                .or_default()
                .push(name.clone());
        }
        for names in by_resource_kind.values_mut() {
            names.sort();
        }
        Self {
            policies,
            by_resource_kind,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Policy>> {
        self.policies.get(name).cloned()
    }

    pub fn get_all(&self) -> Vec<Arc<Policy>> {
        self.policies.values().cloned().collect()
    }

    /// Policies for a resource kind, in deterministic (lexicographic by
    /// name) order, as required by the decision engine (spec §4.7 step 3).
    pub fn get_by_resource_kind(&self, kind: &str) -> Vec<Arc<Policy>> {
        self.by_resource_kind
            .get(kind)
            .map(|names| names.iter().filter_map(|n| self.policies.get(n).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.policies.len()
    }
}

#[derive(Debug)]
pub struct PolicyStore {
    current: RwLock<Arc<Snapshot>>,
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyStore {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    /// Current published snapshot. Workers hold this for the lifetime of a
    /// single request (spec §5 "Worker pool").
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    pub fn add(&self, policy: Policy) -> Result<()> {
        let mut guard = self.current.write();
        if guard.policies.contains_key(&policy.name) {
            return Err(ReaperError::AlreadyExists { name: policy.name });
        }
        let mut policies = guard.policies.clone();
        policies.insert(policy.name.clone(), Arc::new(policy));
        *guard = Arc::new(Snapshot::build(policies));
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<Arc<Policy>> {
        let mut guard = self.current.write();
        let mut policies = guard.policies.clone();
        let removed = policies
            .remove(name)
            .ok_or_else(|| ReaperError::PolicyNotFound {
                policy_id: name.to_string(),
            })?;
        *guard = Arc::new(Snapshot::build(policies));
        Ok(removed)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Policy>> {
        self.current
            .read()
            .get(name)
            .ok_or_else(|| ReaperError::PolicyNotFound {
                policy_id: name.to_string(),
            })
    }

    pub fn get_all(&self) -> Vec<Arc<Policy>> {
        self.current.read().get_all()
    }

    pub fn get_by_resource_kind(&self, kind: &str) -> Vec<Arc<Policy>> {
        self.current.read().get_by_resource_kind(kind)
    }

    pub fn count(&self) -> usize {
        self.current.read().count()
    }

    pub fn clear(&self) {
        *self.current.write() = Arc::new(Snapshot::default());
    }

    /// Atomically replace the entire policy set: either the new set becomes
    /// fully visible, or (on an empty write-lock critical section failing to
    /// even begin) the prior set remains — there is no partially-applied
    /// intermediate state (spec §4.1).
    pub fn replace(&self, policies: HashMap<String, Policy>) {
        let arced = policies.into_iter().map(|(k, v)| (k, Arc::new(v))).collect();
        *self.current.write() = Arc::new(Snapshot::build(arced));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reaper_core::{Effect, Rule};

    fn policy(name: &str, kind: &str) -> Policy {
        Policy::new(
            name,
            kind,
            vec![Rule {
                name: "r1".into(),
                actions: vec!["*".into()],
                effect: Effect::Allow,
                roles: vec![],
                condition: None,
                derived_roles: vec![],
            }],
        )
    }

    #[test]
    fn add_duplicate_fails() {
        let store = PolicyStore::new();
        store.add(policy("p1", "document")).unwrap();
        let err = store.add(policy("p1", "document")).unwrap_err();
        assert_eq!(err.code(), "AlreadyExists");
    }

    #[test]
    fn remove_missing_fails() {
        let store = PolicyStore::new();
        let err = store.remove("missing").unwrap_err();
        assert_eq!(err.code(), "NotFound");
    }

    #[test]
    fn by_resource_kind_is_sorted() {
        let store = PolicyStore::new();
        store.add(policy("zeta", "document")).unwrap();
        store.add(policy("alpha", "document")).unwrap();
        let names: Vec<_> = store
            .get_by_resource_kind("document")
            .iter()
            .map(|p| p.name.clone())
            .collect();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn replace_is_atomic_snapshot_swap() {
        let store = PolicyStore::new();
        store.add(policy("a", "document")).unwrap();
        let mut next = HashMap::new();
        next.insert("b".to_string(), policy("b", "document"));
        store.replace(next);
        assert!(store.get("a").is_err());
        assert!(store.get("b").is_ok());
    }
}
