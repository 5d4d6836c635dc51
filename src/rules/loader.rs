//! Rule discovery and file loading
//!
//! A rules directory is scanned non-recursively for `*.yaml` and `*.yml`
//! files, in sorted order. Each file holds a top-level `rules:` list.
//! Files that cannot be read or parsed, and rules that fail validation,
//! are logged and skipped.

use std::path::{Path, PathBuf};

use crate::error::RuleError;
use crate::models::Rule;
use crate::models::rule::RuleFile;

const EXTENSIONS: [&str; 2] = ["yaml", "yml"];

pub fn rule_files(dir: &Path) -> Result<Vec<PathBuf>, RuleError> {
    if !dir.is_dir() {
        return Err(RuleError::Directory {
            path: dir.to_path_buf(),
            message: "not a directory".to_string(),
        });
    }

    let base = glob::Pattern::escape(&dir.to_string_lossy());
    let mut files = Vec::new();
    for extension in EXTENSIONS {
        let pattern = format!("{}/*.{}", base, extension);
        let entries = glob::glob(&pattern).map_err(|e| RuleError::Directory {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => files.push(path),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable rule path: {}", e),
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Valid rules from one file. Never fails; problems are logged.
pub fn load_file(path: &Path) -> Vec<Rule> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!("Skipping rule file {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    let file: RuleFile = match serde_yaml::from_str(&content) {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!("Skipping rule file {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    let mut rules = Vec::with_capacity(file.rules.len());
    for doc in file.rules {
        let rule_id = doc.id.clone().unwrap_or_else(|| "<unnamed>".to_string());
        match Rule::try_from(doc) {
            Ok(rule) => rules.push(rule),
            Err(source) => {
                let error = RuleError::Invalid { rule_id, source };
                tracing::warn!("Skipping rule in {}: {}", path.display(), error);
            }
        }
    }

    tracing::debug!("Loaded {} rules from {}", rules.len(), path.display());
    rules
}

/// Every valid rule in `dir`, tagged with the file it came from.
pub fn load_dir(dir: &Path) -> Result<Vec<(PathBuf, Rule)>, RuleError> {
    let mut loaded = Vec::new();
    for path in rule_files(dir)? {
        for rule in load_file(&path) {
            loaded.push((path.clone(), rule));
        }
    }
    Ok(loaded)
}
