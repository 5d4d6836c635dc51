pub mod loader;
pub mod matcher;
pub mod validator;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::RuleEngineConfig;
use crate::error::RuleError;
use crate::models::{Endpoint, Rule, Severity};

pub use validator::{RuleValidator, validate_rule};

/// Which admitted rules take part in matching.
#[derive(Debug, Clone)]
pub struct RuleFilter {
    /// Empty means every category
    pub enabled_categories: Vec<String>,
    pub severity_threshold: Severity,
}

impl RuleFilter {
    pub fn allows(&self, rule: &Rule) -> bool {
        rule.severity >= self.severity_threshold
            && (self.enabled_categories.is_empty()
                || self
                    .enabled_categories
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(&rule.category)))
    }
}

impl Default for RuleFilter {
    fn default() -> Self {
        Self {
            enabled_categories: Vec::new(),
            severity_threshold: Severity::Low,
        }
    }
}

#[derive(Debug)]
struct RuleEntry {
    rule: Arc<Rule>,
    source: PathBuf,
}

/// Loaded rule set. Iteration order is load order.
#[derive(Debug, Default)]
pub struct RuleEngine {
    entries: Vec<RuleEntry>,
    index: HashMap<String, usize>,
    filter: RuleFilter,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(filter: RuleFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn from_config(config: &RuleEngineConfig) -> Self {
        Self::with_filter(RuleFilter {
            enabled_categories: config.enabled_categories.clone(),
            severity_threshold: config.severity_threshold,
        })
    }

    /// Loads every valid rule in `dir`. A rule id seen twice, either within
    /// the directory or against already loaded rules, fails the whole load
    /// and leaves the engine unchanged.
    pub fn load_rules(&mut self, dir: &Path) -> Result<usize, RuleError> {
        let loaded = loader::load_dir(dir)?;

        let mut staged: HashMap<&str, &Path> = HashMap::new();
        for (source, rule) in &loaded {
            let first = self
                .index
                .get(&rule.id)
                .map(|&i| self.entries[i].source.as_path())
                .or_else(|| staged.get(rule.id.as_str()).copied());
            if let Some(first) = first {
                return Err(RuleError::DuplicateRuleId {
                    id: rule.id.clone(),
                    first: first.to_path_buf(),
                    second: source.clone(),
                });
            }
            staged.insert(rule.id.as_str(), source.as_path());
        }

        let count = loaded.len();
        for (source, rule) in loaded {
            self.index.insert(rule.id.clone(), self.entries.len());
            self.entries.push(RuleEntry {
                rule: Arc::new(rule),
                source,
            });
        }

        tracing::info!("Loaded {} rules from {}", count, dir.display());
        Ok(count)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Rule>> {
        self.index.get(id).map(|&i| Arc::clone(&self.entries[i].rule))
    }

    pub fn rules(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.entries.iter().map(|e| &e.rule)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every participating rule applicable to `endpoint`, in load order.
    pub fn match_endpoint(&self, endpoint: &Endpoint) -> Vec<Arc<Rule>> {
        self.rules()
            .filter(|rule| self.filter.allows(rule))
            .filter(|rule| matcher::matches(rule, endpoint))
            .cloned()
            .collect()
    }
}
