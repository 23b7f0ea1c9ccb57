//! Version/Rollback Manager (C5)
//!
//! Maintains a bounded ring of [`PolicyVersion`] snapshots behind a
//! monotonically increasing counter that is never reused, even across
//! rollback (spec §4.4). Writers are serialized by a single mutex; readers
//! of version history copy out of the ring rather than holding a reference
//! into it (spec §5 "Version ring: writer-serialized; readers copy-on-read").

use crate::store::PolicyStore;
use parking_lot::Mutex;
use reaper_core::{Policy, PolicyVersion, ReaperError, Result, VersionStats};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};

const DEFAULT_CAPACITY: usize = 10;

/// Content-addressed checksum over a policy snapshot: same content (by
/// canonical JSON serialization of the sorted-by-name map) always yields the
/// same checksum, independent of `HashMap` iteration order.
pub fn checksum(snapshot: &HashMap<String, Policy>) -> String {
    let mut names: Vec<&String> = snapshot.keys().collect();
    names.sort();
    let mut hasher = Sha256::new();
    for name in names {
        let policy = &snapshot[name];
        // serde_json::to_string on a Policy is deterministic for our shapes
        // (no HashMap-valued fields reordering rule arrays); metadata is the
        // only HashMap field and its keys are hashed via a sorted dump too.
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        hasher.update(canonical_policy_bytes(policy));
        hasher.update(b"\x1e"); // record separator
    }
    hex::encode(hasher.finalize())
}

fn canonical_policy_bytes(policy: &Policy) -> Vec<u8> {
    let mut meta: Vec<(&String, &String)> = policy.metadata.iter().collect();
    meta.sort();
    let mut buf = Vec::new();
    buf.extend_from_slice(policy.name.as_bytes());
    buf.extend_from_slice(policy.resource_kind.as_bytes());
    buf.extend_from_slice(policy.api_version.as_bytes());
    for rule in &policy.rules {
        buf.extend_from_slice(rule.name.as_bytes());
        for a in &rule.actions {
            buf.extend_from_slice(a.as_bytes());
        }
        buf.extend_from_slice(format!("{:?}", rule.effect).as_bytes());
        let mut roles = rule.roles.clone();
        roles.sort();
        for r in &roles {
            buf.extend_from_slice(r.as_bytes());
        }
        if let Some(c) = &rule.condition {
            buf.extend_from_slice(c.as_bytes());
        }
    }
    for (k, v) in meta {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(v.as_bytes());
    }
    buf
}

struct Inner {
    ring: VecDeque<PolicyVersion>,
    capacity: usize,
    next_version: u64,
}

/// Serializes writers (`UpdateWithRollback`, `Rollback`) via a manager-level
/// mutex and owns the [`PolicyStore`] it swaps in and out of (spec §4.4,
/// §5).
pub struct VersionManager {
    store: std::sync::Arc<PolicyStore>,
    inner: Mutex<Inner>,
}

impl VersionManager {
    pub fn new(store: std::sync::Arc<PolicyStore>) -> Self {
        Self::with_capacity(store, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(store: std::sync::Arc<PolicyStore>, capacity: usize) -> Self {
        Self {
            store,
            inner: Mutex::new(Inner {
                ring: VecDeque::new(),
                capacity: capacity.max(1),
                next_version: 1,
            }),
        }
    }

    /// Atomically replaces the store's contents with `new_set` and records a
    /// new version. On any failure the prior snapshot is restored and the
    /// store is left untouched (spec §4.4 "Guarantees all-or-nothing").
    /// Validation of `new_set` is the caller's responsibility (the control
    /// plane runs the [`crate::validator::Validator`] before calling this).
    pub fn update_with_rollback(
        &self,
        new_set: HashMap<String, Policy>,
        comment: impl Into<String>,
    ) -> Result<PolicyVersion> {
        let mut guard = self.inner.lock();
        let prior = self.store.get_all();

        self.store.replace(new_set.clone());

        // Post-swap invariant: every resource kind is non-empty (checked
        // already by the validator, but re-checked here as the last line of
        // defense before committing a version).
        if let Err(e) = self.check_invariants() {
            let prior_map: HashMap<String, Policy> = prior
                .into_iter()
                .map(|p| (p.name.clone(), (*p).clone()))
                .collect();
            self.store.replace(prior_map);
            return Err(e);
        }

        let version = PolicyVersion {
            version: guard.next_version,
            timestamp: chrono::Utc::now(),
            comment: comment.into(),
            checksum: checksum(&new_set),
            snapshot: new_set,
        };
        guard.next_version += 1;
        guard.ring.push_back(version.clone());
        while guard.ring.len() > guard.capacity {
            // Oldest is dropped; the current version pointer (the back of
            // the ring) is never evicted because we only ever push_back and
            // pop_front, and capacity is always >= 1.
            guard.ring.pop_front();
        }
        Ok(version)
    }

    fn check_invariants(&self) -> Result<()> {
        for policy in self.store.get_all() {
            if policy.resource_kind.trim().is_empty() {
                return Err(ReaperError::Internal {
                    reason: format!("policy {} has empty resource_kind post-swap", policy.name),
                });
            }
        }
        Ok(())
    }

    /// Rolls back to the exact content of version `v`, producing a *new*
    /// version whose snapshot equals `v`'s (spec §4.4: "rollback produces a
    /// new version whose content equals the target").
    pub fn rollback(&self, v: u64) -> Result<PolicyVersion> {
        let target = {
            let guard = self.inner.lock();
            guard
                .ring
                .iter()
                .find(|pv| pv.version == v)
                .cloned()
                .ok_or(ReaperError::VersionNotFound { version: v })?
        };
        self.update_with_rollback(target.snapshot, format!("rollback to v{v}"))
    }

    pub fn rollback_to_previous(&self) -> Result<PolicyVersion> {
        let previous_version = {
            let guard = self.inner.lock();
            if guard.ring.len() < 2 {
                return Err(ReaperError::VersionNotFound {
                    version: guard.next_version.saturating_sub(1),
                });
            }
            guard.ring[guard.ring.len() - 2].version
        };
        self.rollback(previous_version)
    }

    pub fn get_version(&self, v: u64) -> Result<PolicyVersion> {
        self.inner
            .lock()
            .ring
            .iter()
            .find(|pv| pv.version == v)
            .cloned()
            .ok_or(ReaperError::VersionNotFound { version: v })
    }

    pub fn get_current_version(&self) -> Option<PolicyVersion> {
        self.inner.lock().ring.back().cloned()
    }

    pub fn list_versions(&self) -> Vec<PolicyVersion> {
        self.inner.lock().ring.iter().cloned().collect()
    }

    pub fn get_stats(&self) -> VersionStats {
        let guard = self.inner.lock();
        VersionStats {
            current_version: guard.ring.back().map(|v| v.version).unwrap_or(0),
            versions_retained: guard.ring.len(),
            ring_capacity: guard.capacity,
            total_policies: guard.ring.back().map(|v| v.snapshot.len()).unwrap_or(0),
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::collection::vec as pvec;
    use proptest::prelude::*;
    use reaper_core::{Effect, Rule};

    fn policy(name: &str) -> Policy {
        Policy::new(
            name,
            "document",
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

    fn set(names: &[String]) -> HashMap<String, Policy> {
        names.iter().map(|n| (n.clone(), policy(n))).collect()
    }

    proptest! {
        // Spec §8 "Rollback idempotence": Rollback(v) followed by
        // Rollback(v) yields the same store state; versions strictly
        // increase.
        #[test]
        fn rollback_is_idempotent_across_arbitrary_histories(
            name_batches in pvec(pvec("[a-z]{1,6}", 1..4), 2..6),
        ) {
            let store = std::sync::Arc::new(PolicyStore::new());
            let mgr = VersionManager::new(store.clone());

            let mut versions = Vec::new();
            for names in &name_batches {
                let v = mgr
                    .update_with_rollback(set(names), "batch")
                    .unwrap();
                versions.push(v);
            }

            let target = versions[0].version;
            let first = mgr.rollback(target).unwrap();
            let state_after_first: std::collections::HashSet<String> =
                store.get_all().into_iter().map(|p| p.name.clone()).collect();

            let second = mgr.rollback(target).unwrap();
            let state_after_second: std::collections::HashSet<String> =
                store.get_all().into_iter().map(|p| p.name.clone()).collect();

            prop_assert_eq!(first.checksum.clone(), second.checksum.clone());
            prop_assert_eq!(state_after_first, state_after_second);
            prop_assert!(second.version > first.version);
        }
    }
}
