use serde::{Deserialize, Serialize};

fn default_max() -> f64 {
    1.0
}

fn default_weight() -> f64 {
    1.0
}

/// One named, weighted acceptance rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityThreshold {
    /// Name of the check; also the extraction path into the result object
    /// (dotted paths reach nested fields, e.g. `analysis.confidence`).
    pub name: String,
    /// Lower acceptance bound.
    pub min_value: f64,
    /// Upper acceptance bound.
    #[serde(default = "default_max")]
    pub max_value: f64,
    /// Weight in the aggregate score.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Whether a missing value counts as a violation.
    #[serde(default)]
    pub required: bool,
}

impl QualityThreshold {
    /// A threshold named `name` with lower bound `min_value` and defaults
    /// for everything else.
    pub fn new(name: impl Into<String>, min_value: f64) -> Self {
        Self {
            name: name.into(),
            min_value,
            max_value: default_max(),
            weight: default_weight(),
            required: false,
        }
    }

    /// Set the upper bound.
    pub fn with_max(mut self, max_value: f64) -> Self {
        self.max_value = max_value;
        self
    }

    /// Set the score weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Mark the check as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A named bundle of default thresholds tailored to a class of outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityDomain {
    /// Market/competitor analyses and other business deliverables.
    Business,
    /// Research outputs where sourcing matters more than timeliness.
    Academic,
    /// Operational results from service-style agents.
    Service,
    /// Fallback bundle for unclassified outputs.
    Generic,
}

impl QualityDomain {
    /// The default threshold set for this domain.
    ///
    /// Callers merge per-invocation overrides over these by name.
    pub fn default_thresholds(self) -> Vec<QualityThreshold> {
        match self {
            Self::Business => vec![
                QualityThreshold::new("confidence", 0.75).required(),
                QualityThreshold::new("relevance", 0.7).required(),
                QualityThreshold::new("actionability", 0.6).with_weight(0.8),
                QualityThreshold::new("data_freshness", 0.5).with_weight(0.5),
            ],
            Self::Academic => vec![
                QualityThreshold::new("confidence", 0.8).required(),
                QualityThreshold::new("citation_quality", 0.7).required(),
                QualityThreshold::new("methodology", 0.7).with_weight(0.8),
                QualityThreshold::new("novelty", 0.4).with_weight(0.5),
            ],
            Self::Service => vec![
                QualityThreshold::new("availability", 0.9).required(),
                QualityThreshold::new("latency_score", 0.7).with_weight(0.8),
                QualityThreshold::new("completeness", 0.6).with_weight(0.7),
            ],
            Self::Generic => vec![
                QualityThreshold::new("confidence", 0.6).required(),
                QualityThreshold::new("completeness", 0.5).with_weight(0.8),
            ],
        }
    }
}
