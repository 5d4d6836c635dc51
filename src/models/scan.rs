use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;

use super::api::{AuthType, Endpoint};
use super::rule::Rule;

// ============================================
// Scan lifecycle
// ============================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanStatus {
    pub id: Uuid,
    pub state: ScanState,
    pub progress: f32,
    pub total_tasks: usize,
    pub finished_tasks: usize,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScanStatus {
    pub fn queued(id: Uuid) -> Self {
        Self {
            id,
            state: ScanState::Queued,
            progress: 0.0,
            total_tasks: 0,
            finished_tasks: 0,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

// ============================================
// Tasks
// ============================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Stopped
        )
    }

    /// PENDING -> RUNNING -> {COMPLETED | FAILED | STOPPED}, plus PENDING -> STOPPED
    /// for tasks cancelled before dispatch. Terminal states are final.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::Running) => true,
            (TaskStatus::Pending, TaskStatus::Stopped) => true,
            (TaskStatus::Running, TaskStatus::Completed)
            | (TaskStatus::Running, TaskStatus::Failed)
            | (TaskStatus::Running, TaskStatus::Stopped) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthContext {
    pub auth_type: AuthType,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTarget {
    pub url: String,
    pub method: String,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInsertionPoint {
    /// `<param location>.<param name>`
    pub location: String,
    /// Attack category
    #[serde(rename = "type")]
    pub point_type: String,
    pub payloads: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub headers: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub insertion_points: Vec<TaskInsertionPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessConditions {
    pub status_codes: Vec<u16>,
    /// Seconds; zero when no time-based strategy is active
    pub timing_threshold: f64,
    pub error_patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceCollection {
    pub save_request: bool,
    pub save_response: bool,
    pub timing_analysis: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskValidation {
    pub success_conditions: SuccessConditions,
    pub evidence_collection: EvidenceCollection,
}

/// One unit of work: a single rule applied to a single endpoint.
#[derive(Debug, Clone)]
pub struct ScanTask {
    pub id: String,
    pub scan_id: Uuid,
    pub endpoint: Arc<Endpoint>,
    pub rule: Arc<Rule>,
    pub target: TaskTarget,
    pub auth_context: Option<AuthContext>,
    pub payload: Option<TaskPayload>,
    pub validation: Option<TaskValidation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusRecord {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: f32,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

// ============================================
// Results
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub data: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub rule_id: String,
    /// Lowercase severity as reported by the scanner node
    pub severity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub task_id: String,
    pub success: bool,
    pub status: TaskStatus,
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    #[serde(with = "duration_secs")]
    pub execution_time: Duration,
    pub retry_count: u32,
}

impl ScanResult {
    pub fn completed(
        task_id: impl Into<String>,
        findings: Vec<Finding>,
        execution_time: Duration,
        retry_count: u32,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            status: TaskStatus::Completed,
            findings,
            error_details: None,
            execution_time,
            retry_count,
        }
    }

    pub fn failed(
        task_id: impl Into<String>,
        error_details: impl Into<String>,
        execution_time: Duration,
        retry_count: u32,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            status: TaskStatus::Failed,
            findings: Vec::new(),
            error_details: Some(error_details.into()),
            execution_time,
            retry_count,
        }
    }

    pub fn stopped(task_id: impl Into<String>, execution_time: Duration, retry_count: u32) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            status: TaskStatus::Stopped,
            findings: Vec::new(),
            error_details: Some(TaskError::Stopped.to_string()),
            execution_time,
            retry_count,
        }
    }
}

pub const SEVERITY_KEYS: [&str; 5] = ["critical", "high", "medium", "low", "info"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub total_findings: usize,
    pub severity_counts: BTreeMap<String, usize>,
    #[serde(with = "duration_secs")]
    pub execution_time: Duration,
}

impl Default for ScanSummary {
    fn default() -> Self {
        Self {
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            total_findings: 0,
            severity_counts: SEVERITY_KEYS
                .iter()
                .map(|k| (k.to_string(), 0))
                .collect(),
            execution_time: Duration::ZERO,
        }
    }
}

/// Durations travel as fractional seconds in reports.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
