use std::collections::BTreeMap;

use serde_json::Value;

/// Flatten a JSON value into `path → leaf` entries.
///
/// Object keys join with dots, list indices render in brackets:
/// `{"a": {"b": [1]}}` → `{"a.b[0]": 1}`. Empty objects and arrays flatten to
/// themselves so their presence still participates in comparison.
pub fn flatten(value: &Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    walk(value, String::new(), &mut out);
    out
}

fn walk(value: &Value, path: String, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (k, v) in map {
                let next = if path.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", path, k)
                };
                walk(v, next, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, v) in items.iter().enumerate() {
                walk(v, format!("{}[{}]", path, i), out);
            }
        }
        other => {
            out.insert(path, other.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_objects_join_with_dots() {
        let flat = flatten(&json!({"spec": {"versioning": {"enabled": true}}}));
        assert_eq!(flat["spec.versioning.enabled"], json!(true));
    }

    #[test]
    fn arrays_index_in_brackets() {
        let flat = flatten(&json!({"ingress": [{"port": 80}, {"port": 443}]}));
        assert_eq!(flat["ingress[0].port"], json!(80));
        assert_eq!(flat["ingress[1].port"], json!(443));
    }

    #[test]
    fn empty_containers_are_leaves() {
        let flat = flatten(&json!({"labels": {}, "rules": []}));
        assert_eq!(flat["labels"], json!({}));
        assert_eq!(flat["rules"], json!([]));
    }
}
