//! Utility functions for path rendering and value conversion

use std::collections::HashMap;
use std::sync::LazyLock;

use hwc_core::resource::Value;
use regex::Regex;
use serde_json::json;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"));

/// Fill `{name}` placeholders in a path template
///
/// Returns the name of the first placeholder without a value as the error.
pub fn render_path(template: &str, params: &HashMap<String, String>) -> Result<String, String> {
    let mut missing = None;
    let rendered = PLACEHOLDER_RE.replace_all(template, |caps: &regex::Captures| {
        let name = &caps[1];
        match params.get(name) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(name),
        None => Ok(rendered.into_owned()),
    }
}

/// Names of the placeholders used by a path template
pub fn path_placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER_RE
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Read a string (or number, rendered as a string) at a JSON pointer
pub fn pointer_str(value: &serde_json::Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Convert JSON value to resource Value
pub fn json_to_value(value: &serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::String(s) => Some(Value::String(s.clone())),
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Some(Value::Int(i)),
            None => n.as_f64().map(Value::Float),
        },
        serde_json::Value::Array(arr) => {
            let items: Vec<Value> = arr.iter().filter_map(json_to_value).collect();
            Some(Value::List(items))
        }
        serde_json::Value::Object(obj) => {
            let map: HashMap<String, Value> = obj
                .iter()
                .filter_map(|(k, v)| json_to_value(v).map(|v| (k.clone(), v)))
                .collect();
            Some(Value::Map(map))
        }
        serde_json::Value::Null => None,
    }
}

/// Convert resource Value to JSON value
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::String(s) => json!(s),
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(map) => {
            let obj: serde_json::Map<String, serde_json::Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect();
            serde_json::Value::Object(obj)
        }
    }
}

/// Flatten a JSON object snapshot into resource attributes
pub fn snapshot_attributes(snapshot: &serde_json::Value) -> HashMap<String, Value> {
    match snapshot {
        serde_json::Value::Object(obj) => obj
            .iter()
            .filter_map(|(k, v)| json_to_value(v).map(|v| (k.clone(), v)))
            .collect(),
        _ => HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_path() {
        let rendered = render_path(
            "/api/v3/projects/{project_id}/clusters/{cluster_id}/nodepools",
            &params(&[("project_id", "p1"), ("cluster_id", "c1")]),
        );
        assert_eq!(
            rendered,
            Ok("/api/v3/projects/p1/clusters/c1/nodepools".to_string())
        );
    }

    #[test]
    fn test_render_path_reports_missing_placeholder() {
        let rendered = render_path(
            "/v3/{project_id}/instances/{id}",
            &params(&[("project_id", "p1")]),
        );
        assert_eq!(rendered, Err("id".to_string()));
    }

    #[test]
    fn test_path_placeholders() {
        assert_eq!(
            path_placeholders("/api/v3/projects/{project_id}/clusters/{cluster_id}"),
            vec!["project_id".to_string(), "cluster_id".to_string()]
        );
        assert!(path_placeholders("/v2/zones").is_empty());
    }

    #[test]
    fn test_pointer_str() {
        let body = json!({"order_id": "CS1", "instance": {"id": "i-1"}, "code": 5});
        assert_eq!(pointer_str(&body, "/instance/id"), Some("i-1".to_string()));
        assert_eq!(pointer_str(&body, "/code"), Some("5".to_string()));
        assert_eq!(pointer_str(&body, "/job_id"), None);
        assert_eq!(pointer_str(&body, "/instance"), None);
    }

    #[test]
    fn test_json_value_conversion() {
        let json = json!({"name": "corp.", "ttl": 300, "tags": ["a"], "router": {"id": "r1"}});
        let value = json_to_value(&json).unwrap();
        match &value {
            Value::Map(map) => {
                assert_eq!(map.get("ttl"), Some(&Value::Int(300)));
                assert_eq!(
                    map.get("tags"),
                    Some(&Value::List(vec![Value::String("a".to_string())]))
                );
            }
            other => panic!("Expected Map, got {:?}", other),
        }
        assert_eq!(value_to_json(&value), json);
    }

    #[test]
    fn test_fractional_numbers_are_kept() {
        let json = json!({"storage_ratio": 0.75, "volume": 40});
        let attrs = snapshot_attributes(&json);
        assert_eq!(attrs.get("storage_ratio"), Some(&Value::Float(0.75)));
        assert_eq!(attrs.get("volume"), Some(&Value::Int(40)));
        assert_eq!(value_to_json(&Value::Float(0.75)), json!(0.75));
    }

    #[test]
    fn test_snapshot_attributes_skips_nulls() {
        let attrs = snapshot_attributes(&json!({"id": "z1", "description": null}));
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs.get("id"), Some(&Value::String("z1".to_string())));
        assert!(snapshot_attributes(&json!("scalar")).is_empty());
    }
}
