//! Telemetry carried alongside discovery and run completions.
//!
//! Test hosts attach a flat `name -> value` map to their completion payloads. The controller merges those maps into
//! the caller's collection; later values win, except numbers, which are summed so per-host counters aggregate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known metric: number of tests discovered.
pub const TOTAL_TESTS_DISCOVERED: &str = "VS.TestDiscovery.TotalTests";

/// Well-known metric: number of tests run.
pub const TOTAL_TESTS_RUN: &str = "VS.TestRun.TotalTests";

/// Well-known metric: wall-clock seconds the request took, as seen by the controller.
pub const TIME_TAKEN_IN_SEC: &str = "VS.TestPlatform.TimeTakenInSec";

/// Well-known metric: terminal state of the request.
pub const REQUEST_STATE: &str = "VS.TestPlatform.RequestState";

/// A bag of named telemetry values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsCollection {
    values: BTreeMap<String, Value>,
}

impl MetricsCollection {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a single metric, replacing any previous value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Look up a metric by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Merge another collection into this one.
    ///
    /// Numeric values present on both sides are summed; everything else is overwritten by `other`.
    pub fn merge(&mut self, other: &MetricsCollection) {
        for (name, incoming) in &other.values {
            match (self.values.get(name), incoming) {
                (Some(Value::Number(existing)), Value::Number(added)) => {
                    let summed = match (existing.as_u64(), added.as_u64()) {
                        (Some(a), Some(b)) => Value::from(a.saturating_add(b)),
                        _ => Value::from(existing.as_f64().unwrap_or(0.0) + added.as_f64().unwrap_or(0.0)),
                    };
                    self.values.insert(name.clone(), summed);
                }
                _ => {
                    self.values.insert(name.clone(), incoming.clone());
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate metrics in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_sums_integers() {
        let mut total = MetricsCollection::new();
        total.add(TOTAL_TESTS_RUN, 3u64);

        let mut host = MetricsCollection::new();
        host.add(TOTAL_TESTS_RUN, 4u64);
        total.merge(&host);

        assert_eq!(total.get(TOTAL_TESTS_RUN), Some(&Value::from(7u64)));
    }

    #[test]
    fn test_merge_overwrites_non_numeric() {
        let mut total = MetricsCollection::new();
        total.add(REQUEST_STATE, "InProgress");

        let mut other = MetricsCollection::new();
        other.add(REQUEST_STATE, "Completed");
        other.add("Adapter", "xunit");
        total.merge(&other);

        assert_eq!(total.get(REQUEST_STATE), Some(&Value::from("Completed")));
        assert_eq!(total.len(), 2);
    }

    #[test]
    fn test_merge_sums_floats() {
        let mut total = MetricsCollection::new();
        total.add(TIME_TAKEN_IN_SEC, 1.5);
        let mut other = MetricsCollection::new();
        other.add(TIME_TAKEN_IN_SEC, 0.5);
        total.merge(&other);
        assert_eq!(total.get(TIME_TAKEN_IN_SEC).and_then(Value::as_f64), Some(2.0));
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let mut metrics = MetricsCollection::new();
        metrics.add("b", 2u64);
        metrics.add("a", 1u64);
        let json = serde_json::to_string(&metrics).unwrap();
        assert_eq!(json, r#"{"a":1,"b":2}"#);
    }
}
