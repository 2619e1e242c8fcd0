//! Layer merging for configuration records.

use indexmap::IndexMap;
use serde_yaml::Value;

/// Deep merge two YAML values.
///
/// Mappings merge key by key, recursing where both sides hold a mapping.
/// Sequences and scalars from `overlay` replace `base` wholesale.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                if let Some(base_value) = base_map.get(key) {
                    merged.insert(key.clone(), deep_merge(base_value, value));
                } else {
                    merged.insert(key.clone(), value.clone());
                }
            }
            Value::Mapping(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Merge an overlay layer into a keyed layer in place.
///
/// Insertion order of `base` is preserved; keys new in `overlay` are appended.
pub fn merge_layer(base: &mut IndexMap<String, Value>, overlay: &IndexMap<String, Value>) {
    for (key, value) in overlay {
        let merged = match base.get(key) {
            Some(existing) => deep_merge(existing, value),
            None => value.clone(),
        };
        base.insert(key.clone(), merged);
    }
}

/// Resolve a slash-separated path (`sshTunnel/bridgeHost`) in a value tree.
pub fn resolve_path<'a>(root: &'a IndexMap<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('/').filter(|p| !p.is_empty());
    let mut current = root.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Mapping(map) => map.get(part)?,
            Value::Sequence(seq) => seq.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
