//! Request fingerprinting: the decision cache key (spec §4.6, §8
//! "Fingerprint stability").
//!
//! A stable hash over `(principal id, sorted role set, resource kind+id,
//! sorted action list, canonicalized context)`. Built by feeding a
//! deterministic byte stream into `xxhash-rust`'s XXH3 — fast, not
//! cryptographic, which is the right tradeoff for a cache key that is
//! recomputed on every request (unlike [`crate::version::checksum`], which
//! favors stability/inspectability over speed).

use reaper_core::{AttrValue, CheckRequest};
use xxhash_rust::xxh3::Xxh3;

pub fn fingerprint(request: &CheckRequest) -> String {
    let mut hasher = Xxh3::new();

    hasher.update(request.principal.id.as_bytes());
    hasher.update(b"\0");

    let mut roles = request.principal.roles.clone();
    roles.sort();
    for r in &roles {
        hasher.update(r.as_bytes());
        hasher.update(b",");
    }
    hasher.update(b"\0");

    hasher.update(request.resource.kind.as_bytes());
    hasher.update(b":");
    hasher.update(request.resource.id.as_bytes());
    hasher.update(b"\0");

    let mut actions = request.deduped_actions();
    actions.sort();
    for a in &actions {
        hasher.update(a.as_bytes());
        hasher.update(b",");
    }
    hasher.update(b"\0");

    let mut ctx_keys: Vec<&String> = request.context.keys().collect();
    ctx_keys.sort();
    for k in ctx_keys {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hash_value(&mut hasher, &request.context[k]);
        hasher.update(b";");
    }

    format!("{:016x}", hasher.digest())
}

fn hash_value(hasher: &mut Xxh3, value: &AttrValue) {
    match value {
        AttrValue::Null => hasher.update(b"null"),
        AttrValue::Bool(b) => hasher.update(&[*b as u8]),
        AttrValue::Number(n) => hasher.update(&n.to_bits().to_le_bytes()),
        AttrValue::String(s) => hasher.update(s.as_bytes()),
        AttrValue::List(items) => {
            for item in items {
                hash_value(hasher, item);
                hasher.update(b",");
            }
        }
        AttrValue::Map(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for k in keys {
                hasher.update(k.as_bytes());
                hash_value(hasher, &map[k]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reaper_core::{Principal, Resource};

    fn base_request() -> CheckRequest {
        CheckRequest {
            request_id: "r1".into(),
            principal: Principal::new("u1").with_roles(vec!["admin".into(), "user".into()]),
            resource: Resource::new("document", "d1"),
            actions: vec!["read".into(), "write".into()],
            context: Default::default(),
        }
    }

    #[test]
    fn reordering_actions_does_not_change_fingerprint() {
        let mut r1 = base_request();
        let mut r2 = base_request();
        r2.actions = vec!["write".into(), "read".into()];
        r1.request_id = "a".into();
        r2.request_id = "b".into();
        assert_eq!(fingerprint(&r1), fingerprint(&r2));
    }

    #[test]
    fn reordering_roles_does_not_change_fingerprint() {
        let mut r1 = base_request();
        let mut r2 = base_request();
        r1.principal.roles = vec!["admin".into(), "user".into()];
        r2.principal.roles = vec!["user".into(), "admin".into()];
        assert_eq!(fingerprint(&r1), fingerprint(&r2));
    }

    #[test]
    fn different_principal_changes_fingerprint() {
        let r1 = base_request();
        let mut r2 = base_request();
        r2.principal.id = "u2".into();
        assert_ne!(fingerprint(&r1), fingerprint(&r2));
    }

    #[test]
    fn different_actions_changes_fingerprint() {
        let r1 = base_request();
        let mut r2 = base_request();
        r2.actions = vec!["delete".into()];
        assert_ne!(fingerprint(&r1), fingerprint(&r2));
    }
}
