//! `PolicyVersion` — the snapshot entity maintained by the version/rollback
//! manager (spec §3, §4.4). The ring buffer and mutation logic live in
//! `policy-engine::version`; this crate only owns the data shape so both the
//! engine and the control plane can speak about it.

use crate::policy::Policy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyVersion {
    /// Monotonically increasing, never reused even across rollback.
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub comment: String,
    pub snapshot: HashMap<String, Policy>,
    /// Content-addressed checksum: same content ⇒ same checksum.
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VersionStats {
    pub current_version: u64,
    pub versions_retained: usize,
    pub ring_capacity: usize,
    pub total_policies: usize,
}
