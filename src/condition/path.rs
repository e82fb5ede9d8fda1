//! Safe dotted-path resolution over record snapshots.
//!
//! Conditions reference fields as dotted paths ("status.name" traverses the
//! embedded `status` object). Resolution must never fail on an unset or
//! missing relation: every segment that cannot be followed resolves to
//! absent instead.

use serde_json::Value;

/// Resolve a dotted field path against a record snapshot.
///
/// Returns `None` when any segment is missing, explicitly null, or lands on
/// a non-object mid-path. A null anywhere on the path is treated as an
/// absent relation, matching the sentinel-not-panic contract.
pub fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            _ => return None,
        };
        if current.is_null() {
            return None;
        }
    }
    Some(current)
}

/// Resolve a path, falling back to a default on absence.
pub fn resolve_or<'a>(root: &'a Value, path: &str, default: &'a Value) -> &'a Value {
    resolve(root, path).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_top_level_field() {
        let record = json!({"balance": 5});
        assert_eq!(resolve(&record, "balance"), Some(&json!(5)));
    }

    #[test]
    fn resolves_nested_field() {
        let record = json!({"status": {"name": "ACTIVE"}});
        assert_eq!(resolve(&record, "status.name"), Some(&json!("ACTIVE")));
    }

    #[test]
    fn missing_relation_is_absent_not_a_panic() {
        let record = json!({"status": null});
        assert_eq!(resolve(&record, "status.name"), None);
    }

    #[test]
    fn missing_field_is_absent() {
        let record = json!({"balance": 5});
        assert_eq!(resolve(&record, "owner.name"), None);
    }

    #[test]
    fn scalar_mid_path_is_absent() {
        let record = json!({"balance": 5});
        assert_eq!(resolve(&record, "balance.cents"), None);
    }

    #[test]
    fn null_leaf_is_absent() {
        let record = json!({"closed_at": null});
        assert_eq!(resolve(&record, "closed_at"), None);
    }

    #[test]
    fn resolve_or_falls_back() {
        let record = json!({"status": null});
        let default = json!("UNKNOWN");
        assert_eq!(resolve_or(&record, "status.name", &default), &default);
    }
}
