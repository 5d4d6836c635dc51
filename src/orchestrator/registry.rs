use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::TransitionError;
use crate::models::{TaskStatus, TaskStatusRecord};

/// Latest status of every task the coordinator has seen. Enforces the task
/// state machine; terminal records are never rewritten.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    records: Mutex<HashMap<String, TaskStatusRecord>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, task_id: &str) {
        let record = TaskStatusRecord {
            task_id: task_id.to_string(),
            status: TaskStatus::Pending,
            progress: 0.0,
            timestamp: Utc::now(),
            message: "Queued".to_string(),
        };
        self.records.lock().await.insert(task_id.to_string(), record);
    }

    pub async fn transition(
        &self,
        task_id: &str,
        next: TaskStatus,
        message: impl Into<String>,
    ) -> Result<(), TransitionError> {
        let mut records = self.records.lock().await;
        let current = records
            .get(task_id)
            .map(|r| r.status)
            .unwrap_or(TaskStatus::Pending);

        if !current.can_transition_to(next) {
            return Err(TransitionError {
                task_id: task_id.to_string(),
                from: current.as_str(),
                to: next.as_str(),
            });
        }

        let progress = if next.is_terminal() { 1.0 } else { 0.0 };
        records.insert(
            task_id.to_string(),
            TaskStatusRecord {
                task_id: task_id.to_string(),
                status: next,
                progress,
                timestamp: Utc::now(),
                message: message.into(),
            },
        );
        Ok(())
    }

    /// Progress note for a non-terminal task. Ignored once the task is terminal.
    pub async fn update(&self, task_id: &str, progress: f32, message: impl Into<String>) {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(task_id) {
            if record.status.is_terminal() {
                return;
            }
            record.progress = progress.clamp(0.0, 1.0);
            record.message = message.into();
            record.timestamp = Utc::now();
        }
    }

    pub async fn get(&self, task_id: &str) -> Option<TaskStatusRecord> {
        self.records.lock().await.get(task_id).cloned()
    }

    pub async fn count(&self, status: TaskStatus) -> usize {
        self.records
            .lock()
            .await
            .values()
            .filter(|r| r.status == status)
            .count()
    }

    pub async fn forget(&self, task_ids: &[String]) {
        let mut records = self.records.lock().await;
        for id in task_ids {
            records.remove(id);
        }
    }
}
