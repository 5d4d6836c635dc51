// Error taxonomy for the scan orchestration engine

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// ============================================
// Definition parsing
// ============================================

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to read API definition {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("API definition is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error("Malformed {format} document: {message}")]
    Malformed { format: &'static str, message: String },

    #[error("Invalid {format} document: {message}")]
    Validation { format: &'static str, message: String },

    #[error("Unsupported API definition format")]
    UnsupportedFormat,
}

// ============================================
// Rules
// ============================================

/// Why a single rule was refused admission into the rule set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unknown severity `{0}`")]
    UnknownSeverity(String),

    #[error("detection block has no `{0}` entry")]
    MissingDetection(&'static str),

    #[error("detection block has no active strategy")]
    NoActiveStrategy,

    #[error("rule carries no payloads")]
    EmptyPayloads,
}

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Failed to read rules directory {path}: {message}")]
    Directory { path: PathBuf, message: String },

    #[error("Rule id `{id}` is defined in both {first} and {second}")]
    DuplicateRuleId {
        id: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Invalid rule `{rule_id}`: {source}")]
    Invalid {
        rule_id: String,
        #[source]
        source: RuleValidationError,
    },
}

// ============================================
// Scanner communication
// ============================================

#[derive(Error, Debug)]
pub enum CommsError {
    #[error("Scanner node unreachable: {0}")]
    Connection(String),

    /// Credential or TLS misconfiguration. Never retried.
    #[error("Transport security misconfigured: {0}")]
    Security(String),

    #[error("Scanner call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Scanner returned {code:?}: {message}")]
    Status { code: tonic::Code, message: String },

    #[error("No scanner node available")]
    NoNodeAvailable,
}

impl CommsError {
    /// Transient failures that the transport layer may retry on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            CommsError::Connection(_) => true,
            CommsError::Status { code, .. } => *code == tonic::Code::Unavailable,
            _ => false,
        }
    }
}

impl From<tonic::Status> for CommsError {
    fn from(status: tonic::Status) -> Self {
        CommsError::Status {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

// ============================================
// Task execution
// ============================================

/// Failure of a single task attempt. Every variant except `Stopped` is
/// counted against the task's retry budget.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task execution failed: {0}")]
    Execution(String),

    #[error("Task attempt exceeded {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Comms(#[from] CommsError),

    #[error("Scan was stopped")]
    Stopped,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid task transition for {task_id}: {from} -> {to}")]
pub struct TransitionError {
    pub task_id: String,
    pub from: &'static str,
    pub to: &'static str,
}

// ============================================
// Auth collaborator
// ============================================

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No handler registered for auth type {0}")]
    NoHandler(String),

    #[error("Auth handler misconfigured: {0}")]
    Misconfigured(String),
}

// ============================================
// Configuration
// ============================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

// ============================================
// Scan (top level)
// ============================================

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Task generation failed: {0}")]
    Parse(#[from] ParseError),

    #[error("Task generation failed: {0}")]
    Rules(#[from] RuleError),

    #[error("Scan {0} not found")]
    NotFound(uuid::Uuid),
}
