use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::api::ParamLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Strict parse of a rule document severity (`LOW`, `MEDIUM`, `HIGH`, `CRITICAL`).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "LOW" => Some(Severity::Low),
            "MEDIUM" => Some(Severity::Medium),
            "HIGH" => Some(Severity::High),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredParameter {
    pub name: String,
    pub location: ParamLocation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionLocations {
    #[serde(default)]
    pub path_parameters: Vec<String>,
    #[serde(default)]
    pub query_parameters: Vec<String>,
    #[serde(default)]
    pub headers: Vec<String>,
}

impl DetectionLocations {
    pub fn is_empty(&self) -> bool {
        self.path_parameters.is_empty()
            && self.query_parameters.is_empty()
            && self.headers.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub locations: DetectionLocations,
    pub strategies: Vec<Strategy>,
}

impl Detection {
    pub fn has_active_strategy(&self, name_fragment: &str) -> bool {
        self.strategies
            .iter()
            .any(|s| s.active && s.name.to_ascii_lowercase().contains(name_fragment))
    }
}

/// A validated vulnerability-detection rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub severity: Severity,
    pub category: String,
    /// `ANY` or a specific HTTP verb
    pub method: String,
    pub required_parameters: Vec<RequiredParameter>,
    pub detection: Detection,
    pub payloads: BTreeMap<String, Vec<String>>,
    pub patterns: Vec<String>,
}

// ============================================
// On-disk rule documents
// ============================================
//
// Rule files are deserialized leniently into `RuleDocument` so that a
// malformed rule can be reported and skipped instead of failing the whole
// file. `rules::validator` turns a document into a `Rule`.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleFile {
    #[serde(default)]
    pub rules: Vec<RuleDocument>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleDocument {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub severity: Option<String>,
    pub category: Option<String>,
    pub method: Option<String>,
    #[serde(default)]
    pub required_parameters: Vec<RequiredParameter>,
    pub detection: Option<DetectionDocument>,
    #[serde(default)]
    pub payloads: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetectionDocument {
    pub locations: Option<DetectionLocations>,
    pub strategies: Option<Vec<Strategy>>,
}
