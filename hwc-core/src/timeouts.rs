//! Per-operation timeouts
//!
//! Mirrors the `timeouts { create = "30m" }` block users put on a resource. Durations use
//! the same compact notation (`"1h30m"`, `"45s"`, `"10m"`).

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::resource::Value;

/// Attribute holding user-supplied timeouts on a resource
pub const TIMEOUTS_ATTRIBUTE: &str = "timeouts";

/// Default timeout for each operation (10 minutes)
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(600);

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?$").expect("duration pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeoutsError {
    #[error("invalid duration {0:?}, expected e.g. \"30s\", \"10m\" or \"1h30m\"")]
    InvalidDuration(String),

    #[error("unknown timeout {0:?}, expected one of create, update, delete")]
    UnknownOperation(String),

    #[error("timeout {0:?} must be a string")]
    NotAString(String),

    #[error("timeouts must be a map of operation to duration")]
    NotAMap,
}

/// Timeouts for the create, update and delete phases of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    #[serde(deserialize_with = "deserialize_duration")]
    pub create: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub update: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::uniform(DEFAULT_OPERATION_TIMEOUT)
    }
}

impl Timeouts {
    pub const fn new(create: Duration, update: Duration, delete: Duration) -> Self {
        Self {
            create,
            update,
            delete,
        }
    }

    /// Same timeout for every operation
    pub const fn uniform(timeout: Duration) -> Self {
        Self::new(timeout, timeout, timeout)
    }

    /// Overlay the `timeouts` attribute of a resource on top of `defaults`
    pub fn from_attributes(
        attributes: &HashMap<String, Value>,
        defaults: Timeouts,
    ) -> Result<Self, TimeoutsError> {
        let Some(value) = attributes.get(TIMEOUTS_ATTRIBUTE) else {
            return Ok(defaults);
        };
        let Value::Map(entries) = value else {
            return Err(TimeoutsError::NotAMap);
        };

        let mut timeouts = defaults;
        for (operation, value) in entries {
            let Value::String(raw) = value else {
                return Err(TimeoutsError::NotAString(operation.clone()));
            };
            let duration = parse_duration(raw)?;
            match operation.as_str() {
                "create" => timeouts.create = duration,
                "update" => timeouts.update = duration,
                "delete" => timeouts.delete = duration,
                other => return Err(TimeoutsError::UnknownOperation(other.to_string())),
            }
        }
        Ok(timeouts)
    }
}

/// Parse a compact duration such as `"1h30m"`, `"10m"` or `"45s"`
pub fn parse_duration(s: &str) -> Result<Duration, TimeoutsError> {
    let trimmed = s.trim();
    let invalid = || TimeoutsError::InvalidDuration(s.to_string());

    if trimmed.is_empty() {
        return Err(invalid());
    }
    let caps = DURATION_RE.captures(trimmed).ok_or_else(invalid)?;

    let mut secs = 0u64;
    for (index, unit) in [(1, 3600u64), (2, 60), (3, 1)] {
        if let Some(m) = caps.get(index) {
            let n: u64 = m.as_str().parse().map_err(|_| invalid())?;
            secs = n
                .checked_mul(unit)
                .and_then(|v| secs.checked_add(v))
                .ok_or_else(invalid)?;
        }
    }
    Ok(Duration::from_secs(secs))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_durations() {
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("2h0m5s").unwrap(), Duration::from_secs(7205));
        assert_eq!(parse_duration(" 5m ").unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn rejects_malformed_durations() {
        for raw in ["", "10", "m", "5x", "1m2h", "-5m"] {
            assert!(
                matches!(parse_duration(raw), Err(TimeoutsError::InvalidDuration(_))),
                "{:?} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn attributes_override_defaults() {
        let mut entries = HashMap::new();
        entries.insert("create".to_string(), Value::String("30m".to_string()));
        let mut attributes = HashMap::new();
        attributes.insert(TIMEOUTS_ATTRIBUTE.to_string(), Value::Map(entries));

        let timeouts = Timeouts::from_attributes(&attributes, Timeouts::default()).unwrap();

        assert_eq!(timeouts.create, Duration::from_secs(1800));
        assert_eq!(timeouts.update, DEFAULT_OPERATION_TIMEOUT);
        assert_eq!(timeouts.delete, DEFAULT_OPERATION_TIMEOUT);
    }

    #[test]
    fn missing_attribute_keeps_defaults() {
        let defaults = Timeouts::uniform(Duration::from_secs(1200));
        let timeouts = Timeouts::from_attributes(&HashMap::new(), defaults).unwrap();
        assert_eq!(timeouts, defaults);
    }

    #[test]
    fn rejects_unknown_operations_and_shapes() {
        let mut entries = HashMap::new();
        entries.insert("read".to_string(), Value::String("5m".to_string()));
        let mut attributes = HashMap::new();
        attributes.insert(TIMEOUTS_ATTRIBUTE.to_string(), Value::Map(entries));
        assert_eq!(
            Timeouts::from_attributes(&attributes, Timeouts::default()),
            Err(TimeoutsError::UnknownOperation("read".to_string()))
        );

        attributes.insert(TIMEOUTS_ATTRIBUTE.to_string(), Value::Int(5));
        assert_eq!(
            Timeouts::from_attributes(&attributes, Timeouts::default()),
            Err(TimeoutsError::NotAMap)
        );
    }

    #[test]
    fn deserializes_from_config() {
        let timeouts: Timeouts =
            serde_json::from_str(r#"{"create": "1h", "delete": "20m"}"#).unwrap();
        assert_eq!(timeouts.create, Duration::from_secs(3600));
        assert_eq!(timeouts.update, DEFAULT_OPERATION_TIMEOUT);
        assert_eq!(timeouts.delete, Duration::from_secs(1200));

        assert!(serde_json::from_str::<Timeouts>(r#"{"create": "soon"}"#).is_err());
    }
}
