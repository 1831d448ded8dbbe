use crate::threshold::{QualityDomain, QualityThreshold};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Outcome of validating one result object against a threshold set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityVerdict {
    /// True iff no check was violated.
    pub passed: bool,
    /// Weighted score over the checks that had a value, in `[0, 1]`.
    pub score: f64,
    /// Names of the violated checks.
    pub violated_checks: Vec<String>,
}

/// What one threshold's extraction found in the result object.
enum Extracted {
    /// A numeric (or numerically mapped) value.
    Value(f64),
    /// Nothing at the path.
    Missing,
    /// A category string with no numeric mapping; passes leniently.
    Unmapped,
    /// The path traverses through a non-object value.
    Error,
}

/// Validates structured results against weighted threshold sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityGate {
    /// When set, extraction errors fail closed instead of open.
    pub strict_mode: bool,
}

impl QualityGate {
    /// A lenient gate: extraction errors fail open.
    pub fn new() -> Self {
        Self { strict_mode: false }
    }

    /// A strict gate: extraction errors count as violations.
    pub fn strict() -> Self {
        Self { strict_mode: true }
    }

    /// Validate `result` against a domain's defaults with `overrides`
    /// merged in by threshold name (overrides win; new names are added).
    pub fn validate_domain(
        &self,
        result: &serde_json::Value,
        domain: QualityDomain,
        overrides: &[QualityThreshold],
    ) -> QualityVerdict {
        let mut merged: BTreeMap<String, QualityThreshold> = domain
            .default_thresholds()
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();
        for t in overrides {
            merged.insert(t.name.clone(), t.clone());
        }
        let thresholds: Vec<QualityThreshold> = merged.into_values().collect();
        self.validate(result, &thresholds)
    }

    /// Validate `result` against `thresholds`.
    ///
    /// For each threshold the corresponding value is extracted by name
    /// (dotted paths descend into nested objects); categorical values map
    /// to a fixed scale (high 0.8, medium 0.5, low 0.2), unmapped
    /// categories pass leniently, and a missing value violates only a
    /// `required` threshold. The aggregate score is
    /// `Σ(normalized × weight) / Σ(weight)` over thresholds that had a
    /// value, where a value is normalized against its lower bound and
    /// capped at 1.0.
    pub fn validate(
        &self,
        result: &serde_json::Value,
        thresholds: &[QualityThreshold],
    ) -> QualityVerdict {
        let mut violated = Vec::new();
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;

        for threshold in thresholds {
            match extract(result, &threshold.name) {
                Extracted::Value(value) => {
                    weight_total += threshold.weight;
                    weighted_sum += normalize(value, threshold) * threshold.weight;
                    if value < threshold.min_value || value > threshold.max_value {
                        violated.push(threshold.name.clone());
                    }
                }
                Extracted::Missing => {
                    if threshold.required {
                        violated.push(threshold.name.clone());
                    }
                }
                Extracted::Unmapped => {
                    debug!(check = %threshold.name, "unmapped category passes leniently");
                }
                Extracted::Error => {
                    if self.strict_mode {
                        violated.push(threshold.name.clone());
                    } else {
                        debug!(check = %threshold.name, "extraction error ignored (fail open)");
                    }
                }
            }
        }

        let score = if weight_total > 0.0 {
            weighted_sum / weight_total
        } else {
            0.0
        };

        QualityVerdict {
            passed: violated.is_empty(),
            score,
            violated_checks: violated,
        }
    }
}

/// Normalize a raw value against the threshold's lower bound, capped at 1.0.
fn normalize(value: f64, threshold: &QualityThreshold) -> f64 {
    if threshold.min_value > 0.0 {
        (value / threshold.min_value).clamp(0.0, 1.0)
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Map a category string to the fixed numeric scale.
fn category_value(s: &str) -> Option<f64> {
    match s.to_ascii_lowercase().as_str() {
        "high" => Some(0.8),
        "medium" => Some(0.5),
        "low" => Some(0.2),
        _ => None,
    }
}

fn extract(result: &serde_json::Value, path: &str) -> Extracted {
    let mut current = result;
    for segment in path.split('.') {
        match current {
            serde_json::Value::Object(map) => match map.get(segment) {
                Some(next) => current = next,
                None => return Extracted::Missing,
            },
            // Descending into a scalar is a malformed result shape.
            _ => return Extracted::Error,
        }
    }

    match current {
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(value) => Extracted::Value(value),
            None => Extracted::Error,
        },
        serde_json::Value::String(s) => match category_value(s) {
            Some(value) => Extracted::Value(value),
            None => Extracted::Unmapped,
        },
        // A boolean check is a degenerate categorical.
        serde_json::Value::Bool(b) => Extracted::Value(if *b { 1.0 } else { 0.0 }),
        serde_json::Value::Null => Extracted::Missing,
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => Extracted::Missing,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn confidence(min: f64) -> Vec<QualityThreshold> {
        vec![QualityThreshold::new("confidence", min).required()]
    }

    #[test]
    fn value_below_minimum_is_violated() {
        let gate = QualityGate::new();
        let verdict = gate.validate(&serde_json::json!({"confidence": 0.6}), &confidence(0.75));
        assert!(!verdict.passed);
        assert_eq!(verdict.violated_checks, vec!["confidence".to_string()]);
    }

    #[test]
    fn value_above_minimum_passes_with_capped_score() {
        let gate = QualityGate::new();
        let verdict = gate.validate(&serde_json::json!({"confidence": 0.9}), &confidence(0.75));
        assert!(verdict.passed);
        assert!(verdict.violated_checks.is_empty());
        assert_eq!(verdict.score, 1.0);
    }

    #[test]
    fn value_above_maximum_is_violated() {
        let thresholds = vec![QualityThreshold::new("hallucination_rate", 0.0).with_max(0.1)];
        let gate = QualityGate::new();
        let verdict = gate.validate(&serde_json::json!({"hallucination_rate": 0.4}), &thresholds);
        assert!(!verdict.passed);
    }

    #[test]
    fn categories_map_to_fixed_scale() {
        let gate = QualityGate::new();
        let thresholds = vec![QualityThreshold::new("relevance", 0.5)];

        let high = gate.validate(&serde_json::json!({"relevance": "high"}), &thresholds);
        assert!(high.passed);
        assert_eq!(high.score, 1.0); // 0.8 / 0.5 capped

        let low = gate.validate(&serde_json::json!({"relevance": "low"}), &thresholds);
        assert!(!low.passed);
    }

    #[test]
    fn unmapped_category_passes_leniently() {
        let gate = QualityGate::new();
        let thresholds = vec![QualityThreshold::new("relevance", 0.5).required()];
        let verdict = gate.validate(&serde_json::json!({"relevance": "excellent"}), &thresholds);
        assert!(verdict.passed);
        // No numeric value, so nothing contributed to the score.
        assert_eq!(verdict.score, 0.0);
    }

    #[test]
    fn missing_required_value_is_a_violation() {
        let gate = QualityGate::new();
        let verdict = gate.validate(&serde_json::json!({"other": 1.0}), &confidence(0.75));
        assert!(!verdict.passed);
        assert_eq!(verdict.violated_checks, vec!["confidence".to_string()]);
    }

    #[test]
    fn missing_optional_value_is_skipped() {
        let gate = QualityGate::new();
        let thresholds = vec![QualityThreshold::new("novelty", 0.4)];
        let verdict = gate.validate(&serde_json::json!({}), &thresholds);
        assert!(verdict.passed);
    }

    #[test]
    fn dotted_paths_reach_nested_fields() {
        let gate = QualityGate::new();
        let thresholds = vec![QualityThreshold::new("analysis.confidence", 0.5).required()];
        let result = serde_json::json!({"analysis": {"confidence": 0.8}});
        assert!(gate.validate(&result, &thresholds).passed);
    }

    #[test]
    fn extraction_error_fails_open_unless_strict() {
        // "analysis" is a scalar; descending into it is malformed.
        let result = serde_json::json!({"analysis": 3});
        let thresholds = vec![QualityThreshold::new("analysis.confidence", 0.5).required()];

        assert!(QualityGate::new().validate(&result, &thresholds).passed);
        let strict = QualityGate::strict().validate(&result, &thresholds);
        assert!(!strict.passed);
        assert_eq!(strict.violated_checks, vec!["analysis.confidence".to_string()]);
    }

    #[test]
    fn weighted_score_uses_only_present_values() {
        let gate = QualityGate::new();
        let thresholds = vec![
            QualityThreshold::new("a", 0.5).with_weight(1.0),
            QualityThreshold::new("b", 0.5).with_weight(3.0),
            QualityThreshold::new("absent", 0.5).with_weight(10.0),
        ];
        // a: 0.25/0.5 → 0.5 normalized; b: 0.5/0.5 → 1.0.
        let result = serde_json::json!({"a": 0.25, "b": 0.5});
        let verdict = gate.validate(&result, &thresholds);
        let expected = (0.5 * 1.0 + 1.0 * 3.0) / 4.0;
        assert!((verdict.score - expected).abs() < 1e-9);
    }

    #[test]
    fn domain_overrides_merge_by_name() {
        let gate = QualityGate::new();
        // Relax the business confidence floor to 0.5 and add a new check.
        let overrides = vec![
            QualityThreshold::new("confidence", 0.5).required(),
            QualityThreshold::new("citations", 0.5),
        ];
        let result = serde_json::json!({
            "confidence": 0.6,
            "relevance": 0.9,
            "citations": 0.7,
        });
        let verdict = gate.validate_domain(&result, QualityDomain::Business, &overrides);
        assert!(verdict.passed, "violations: {:?}", verdict.violated_checks);

        // Default business floor (0.75) would have rejected 0.6.
        let strict_default = gate.validate_domain(&result, QualityDomain::Business, &[]);
        assert!(!strict_default.passed);
    }

    #[test]
    fn boolean_values_are_degenerate_categoricals() {
        let gate = QualityGate::new();
        let thresholds = vec![QualityThreshold::new("grounded", 1.0).required()];
        assert!(gate.validate(&serde_json::json!({"grounded": true}), &thresholds).passed);
        assert!(!gate.validate(&serde_json::json!({"grounded": false}), &thresholds).passed);
    }
}
