use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Precision/recall/f1 for one group of samples.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub num_samples: usize,
}

/// Evaluation report for a run: weighted overall metrics, per-tag
/// breakdown, and named data slices.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Performance {
    pub overall: ClassMetrics,
    pub class: BTreeMap<String, ClassMetrics>,
    pub slices: BTreeMap<String, ClassMetrics>,
}

impl Performance {
    /// Resolve a dot-separated filter (e.g. `class.mlops.f1`) against the
    /// serialized report. Unknown segments resolve to an empty object.
    pub fn filter(&self, filter: &str) -> serde_json::Value {
        let mut current = match serde_json::to_value(self) {
            Ok(value) => value,
            Err(_) => return serde_json::json!({}),
        };
        for key in filter.split('.') {
            current = current
                .get(key)
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_walks_nested_keys() {
        let mut performance = Performance::default();
        performance.class.insert(
            "mlops".to_string(),
            ClassMetrics {
                precision: 0.9,
                recall: 0.8,
                f1: 0.85,
                num_samples: 10,
            },
        );
        let value = performance.filter("class.mlops.f1");
        assert_eq!(value, serde_json::json!(0.85));
    }

    #[test]
    fn test_filter_unknown_key_is_empty_object() {
        let performance = Performance::default();
        assert_eq!(performance.filter("class.nope"), serde_json::json!({}));
    }
}
