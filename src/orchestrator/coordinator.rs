// ============================================
// Task Coordinator
// ============================================
//
// Expands (endpoint x matching rule) pairs into scan tasks and runs them
// against scanner nodes. At most `concurrent_limit` RPCs are in flight; each
// task is attempted up to `retry_count` times with `retry_delay` between
// attempts. Stopping a scan suppresses future dispatches and retries but
// never aborts an RPC already on the wire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::aggregator::AggregatorHandle;
use super::registry::TaskRegistry;
use crate::auth::AuthManager;
use crate::config::CoordinatorConfig;
use crate::error::TaskError;
use crate::grpc::ScanDispatcher;
use crate::models::scan::{
    EvidenceCollection, SuccessConditions, TaskInsertionPoint, TaskPayload, TaskTarget,
    TaskValidation,
};
use crate::models::{
    ApiDefinition, AuthType, Endpoint, Finding, ParamLocation, Rule, ScanResult, ScanTask,
    TaskStatus, TaskStatusRecord,
};
use crate::rules::RuleEngine;

/// Status codes a scanner node should treat as a delivered attack
const SUCCESS_STATUS_CODES: [u16; 3] = [200, 201, 202];

/// Response delay that signals a time-based injection
const TIMING_THRESHOLD_SECS: f64 = 5.0;

pub struct TaskCoordinator {
    dispatcher: Arc<dyn ScanDispatcher>,
    auth: Arc<AuthManager>,
    config: CoordinatorConfig,
    semaphore: Arc<Semaphore>,
    registry: Arc<TaskRegistry>,
    cancellations: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl TaskCoordinator {
    pub fn new(
        dispatcher: Arc<dyn ScanDispatcher>,
        auth: Arc<AuthManager>,
        config: CoordinatorConfig,
    ) -> Self {
        let permits = config.concurrent_limit.max(1);
        Self {
            dispatcher,
            auth,
            semaphore: Arc::new(Semaphore::new(permits)),
            registry: Arc::new(TaskRegistry::new()),
            cancellations: Mutex::new(HashMap::new()),
            config,
        }
    }

    // ============================================
    // Task generation
    // ============================================

    /// One task per (endpoint, matching rule) pair, in endpoint then rule order.
    pub fn generate_tasks(
        &self,
        api_def: &ApiDefinition,
        rule_engine: &RuleEngine,
        scan_id: Uuid,
    ) -> Vec<ScanTask> {
        let base_url = api_def.base_url.as_deref().unwrap_or("");
        let mut tasks = Vec::new();

        for endpoint in &api_def.endpoints {
            let rules = rule_engine.match_endpoint(endpoint);
            if rules.is_empty() {
                continue;
            }

            let endpoint = Arc::new(endpoint.clone());
            for rule in rules {
                tasks.push(self.build_task(scan_id, base_url, Arc::clone(&endpoint), rule));
            }
        }

        tracing::info!(
            "Generated {} tasks for scan {} from {} endpoints",
            tasks.len(),
            scan_id,
            api_def.endpoints.len()
        );
        tasks
    }

    fn build_task(
        &self,
        scan_id: Uuid,
        base_url: &str,
        endpoint: Arc<Endpoint>,
        rule: Arc<Rule>,
    ) -> ScanTask {
        let url = format!("{}{}", base_url.trim_end_matches('/'), endpoint.path);

        let auth_types: Vec<AuthType> = endpoint
            .auth_requirements
            .iter()
            .map(|r| r.auth_type)
            .collect();
        let auth_context = self.auth.context_for(&auth_types, &url);

        let time_based = rule.detection.has_active_strategy("time");
        let validation = TaskValidation {
            success_conditions: SuccessConditions {
                status_codes: SUCCESS_STATUS_CODES.to_vec(),
                timing_threshold: if time_based { TIMING_THRESHOLD_SECS } else { 0.0 },
                error_patterns: rule.patterns.clone(),
            },
            evidence_collection: EvidenceCollection {
                save_request: true,
                save_response: true,
                timing_analysis: time_based,
            },
        };

        let insertion_points = insertion_points(&endpoint, &rule);
        let payload = (!insertion_points.is_empty()).then(|| TaskPayload {
            insertion_points,
            ..TaskPayload::default()
        });

        ScanTask {
            id: Uuid::new_v4().to_string(),
            scan_id,
            target: TaskTarget {
                url,
                method: endpoint.method.clone(),
                protocol: endpoint.operation_type.protocol().to_string(),
            },
            endpoint,
            rule,
            auth_context,
            payload,
            validation: Some(validation),
        }
    }

    // ============================================
    // Execution
    // ============================================

    pub async fn execute_tasks(&self, tasks: Vec<ScanTask>) -> Vec<ScanResult> {
        self.execute_tasks_streaming(tasks, None).await
    }

    /// Runs every task, forwarding each result to `sink` as it completes.
    /// Always returns exactly one result per task.
    pub async fn execute_tasks_streaming(
        &self,
        tasks: Vec<ScanTask>,
        sink: Option<&AggregatorHandle>,
    ) -> Vec<ScanResult> {
        let mut workers = JoinSet::new();
        let mut task_ids = HashMap::with_capacity(tasks.len());

        for task in tasks {
            self.registry.register(&task.id).await;
            let worker = TaskWorker {
                dispatcher: Arc::clone(&self.dispatcher),
                registry: Arc::clone(&self.registry),
                semaphore: Arc::clone(&self.semaphore),
                token: self.token_for(task.scan_id).await,
                retry_count: self.config.retry_count.max(1),
                retry_delay: self.config.retry_delay(),
                task_timeout: self.config.task_timeout(),
            };
            let task_id = task.id.clone();
            let handle = workers.spawn(worker.run(task));
            task_ids.insert(handle.id(), task_id);
        }

        let mut results = Vec::with_capacity(task_ids.len());
        while let Some(joined) = workers.join_next_with_id().await {
            let result = match joined {
                Ok((id, result)) => {
                    task_ids.remove(&id);
                    result
                }
                Err(e) => {
                    let task_id = task_ids.remove(&e.id()).unwrap_or_default();
                    tracing::error!("Worker for task {} died: {}", task_id, e);
                    let _ = self
                        .registry
                        .transition(&task_id, TaskStatus::Failed, "worker died")
                        .await;
                    ScanResult::failed(task_id, format!("Task worker died: {}", e), Duration::ZERO, 0)
                }
            };

            if let Some(sink) = sink {
                sink.add_result(result.clone()).await;
            }
            results.push(result);
        }

        results
    }

    // ============================================
    // Cancellation
    // ============================================

    async fn token_for(&self, scan_id: Uuid) -> CancellationToken {
        self.cancellations
            .lock()
            .await
            .entry(scan_id)
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    /// Suppresses further dispatches and retries for `scan_id`.
    pub async fn stop_scan(&self, scan_id: Uuid) {
        tracing::info!("Stopping scan {}", scan_id);
        self.token_for(scan_id).await.cancel();
    }

    pub async fn is_stopped(&self, scan_id: Uuid) -> bool {
        self.cancellations
            .lock()
            .await
            .get(&scan_id)
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Drops per-scan state once a scan has finished.
    pub async fn release_scan(&self, scan_id: Uuid, task_ids: &[String]) {
        self.cancellations.lock().await.remove(&scan_id);
        self.registry.forget(task_ids).await;
    }

    pub async fn task_status(&self, task_id: &str) -> Option<TaskStatusRecord> {
        self.registry.get(task_id).await
    }
}

/// Payload insertion points for one task: every parameter the heuristic
/// flagged or the rule names, crossed with the rule's payload categories.
fn insertion_points(endpoint: &Endpoint, rule: &Rule) -> Vec<TaskInsertionPoint> {
    let locations = &rule.detection.locations;
    let named_by_rule = |name: &str, location: ParamLocation| {
        let declared = match location {
            ParamLocation::Path => &locations.path_parameters,
            ParamLocation::Query => &locations.query_parameters,
            ParamLocation::Header => &locations.headers,
            ParamLocation::Body | ParamLocation::Cookie => return false,
        };
        declared.iter().any(|d| d.eq_ignore_ascii_case(name))
    };

    let mut points = Vec::new();
    for param in &endpoint.parameters {
        if param.insertion_points.is_empty() && !named_by_rule(&param.name, param.location) {
            continue;
        }
        for (category, payloads) in &rule.payloads {
            if payloads.is_empty() {
                continue;
            }
            points.push(TaskInsertionPoint {
                location: format!("{}.{}", param.location, param.name),
                point_type: category.clone(),
                payloads: payloads.clone(),
            });
        }
    }
    points
}

// ============================================
// Per-task worker
// ============================================

struct TaskWorker {
    dispatcher: Arc<dyn ScanDispatcher>,
    registry: Arc<TaskRegistry>,
    semaphore: Arc<Semaphore>,
    token: CancellationToken,
    retry_count: u32,
    retry_delay: Duration,
    task_timeout: Duration,
}

impl TaskWorker {
    async fn run(self, task: ScanTask) -> ScanResult {
        let started = Instant::now();
        let mut status = TaskStatus::Pending;
        let mut failures = 0u32;
        let mut last_error = String::new();

        for attempt in 1..=self.retry_count {
            // Checked before every dispatch, including the first
            let permit = tokio::select! {
                biased;
                _ = self.token.cancelled() => None,
                permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                return self.stop(&task, status, started, failures).await;
            };
            if self.token.is_cancelled() {
                drop(permit);
                return self.stop(&task, status, started, failures).await;
            }

            if status == TaskStatus::Pending {
                self.set_status(&task.id, TaskStatus::Running, "Dispatched").await;
                status = TaskStatus::Running;
            }
            self.registry
                .update(
                    &task.id,
                    (attempt - 1) as f32 / self.retry_count as f32,
                    format!("Attempt {}/{}", attempt, self.retry_count),
                )
                .await;

            let outcome = self.attempt(&task).await;
            drop(permit);

            match outcome {
                Ok(findings) => {
                    tracing::debug!(
                        "Task {} completed on attempt {} with {} findings",
                        task.id,
                        attempt,
                        findings.len()
                    );
                    self.set_status(&task.id, TaskStatus::Completed, "Completed").await;
                    return ScanResult::completed(task.id, findings, started.elapsed(), failures);
                }
                Err(e) => {
                    failures += 1;
                    last_error = e.to_string();
                    tracing::warn!(
                        "Task {} attempt {}/{} failed: {}",
                        task.id,
                        attempt,
                        self.retry_count,
                        last_error
                    );
                }
            }

            if attempt < self.retry_count {
                tokio::select! {
                    _ = self.token.cancelled() => {
                        return self.stop(&task, status, started, failures).await;
                    }
                    _ = tokio::time::sleep(self.retry_delay) => {}
                }
            }
        }

        tracing::error!(
            "Task {} failed after {} attempts: {}",
            task.id,
            self.retry_count,
            last_error
        );
        self.set_status(&task.id, TaskStatus::Failed, last_error.clone()).await;
        ScanResult::failed(task.id, last_error, started.elapsed(), self.retry_count)
    }

    /// One RPC, bounded by the task timeout. A node-reported failure counts
    /// as a failed attempt.
    async fn attempt(&self, task: &ScanTask) -> Result<Vec<Finding>, TaskError> {
        match tokio::time::timeout(self.task_timeout, self.dispatcher.dispatch(task)).await {
            Ok(Ok(remote)) if remote.success => Ok(remote.findings),
            Ok(Ok(remote)) => Err(TaskError::Execution(
                remote
                    .error_details
                    .unwrap_or_else(|| "scanner node reported failure".to_string()),
            )),
            Ok(Err(e)) => Err(TaskError::Comms(e)),
            Err(_) => Err(TaskError::Timeout(self.task_timeout)),
        }
    }

    async fn stop(
        &self,
        task: &ScanTask,
        status: TaskStatus,
        started: Instant,
        failures: u32,
    ) -> ScanResult {
        let message = if status == TaskStatus::Pending {
            "Stopped before dispatch"
        } else {
            "Stopped before retry"
        };
        tracing::info!("Task {}: {}", task.id, message);
        self.set_status(&task.id, TaskStatus::Stopped, message).await;
        ScanResult::stopped(task.id.clone(), started.elapsed(), failures)
    }

    async fn set_status(&self, task_id: &str, next: TaskStatus, message: impl Into<String>) {
        if let Err(e) = self.registry.transition(task_id, next, message).await {
            tracing::error!("{}", e);
        }
    }
}
