//! JSON merge for layered configuration.

use serde_json::Value;

/// Merge an overlay layer into the accumulated base.
///
/// Objects merge recursively, everything else overrides. When constraints
/// are provided, any key pinned by a non-object constraint value is locked
/// and overlay writes to it are ignored; object-valued constraints lock
/// recursively.
pub(super) fn merge_layer(base: &mut Value, overlay: &Value, constraints: Option<&Value>) {
    let (Value::Object(base_map), Value::Object(overlay_map)) = (&mut *base, overlay) else {
        if constraints.is_none() {
            *base = overlay.clone();
        }
        return;
    };

    let constraint_map = match constraints {
        Some(Value::Object(map)) => Some(map),
        // A non-object constraint pins this whole subtree.
        Some(_) => return,
        None => None,
    };

    for (key, overlay_value) in overlay_map {
        let key_constraint = constraint_map.and_then(|map| map.get(key));
        if matches!(key_constraint, Some(value) if !value.is_object()) {
            continue;
        }
        match base_map.get_mut(key) {
            Some(existing) => merge_layer(existing, overlay_value, key_constraint),
            None => {
                let mut fresh = Value::Object(serde_json::Map::new());
                merge_layer(&mut fresh, overlay_value, key_constraint);
                base_map.insert(key.clone(), fresh);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn objects_merge_recursively_and_scalars_override() {
        let mut base = json!({ "analysis": { "relevance_threshold": 0.3 }, "a": 1 });
        let overlay = json!({ "analysis": { "utility_enabled": false }, "a": 2 });
        merge_layer(&mut base, &overlay, None);
        assert_eq!(
            base,
            json!({
                "analysis": { "relevance_threshold": 0.3, "utility_enabled": false },
                "a": 2
            })
        );
    }

    #[test]
    fn constrained_keys_are_locked() {
        let mut base = json!({ "recovery": { "restart_limit": 3 } });
        let overlay = json!({ "recovery": { "restart_limit": 99, "cooldown_secs": 5 } });
        let constraints = json!({ "recovery": { "restart_limit": 3 } });
        merge_layer(&mut base, &overlay, Some(&constraints));
        assert_eq!(
            base,
            json!({ "recovery": { "restart_limit": 3, "cooldown_secs": 5 } })
        );
    }
}
