// ============================================
// Scan lifecycle
// ============================================
//
// One scan = parse definition -> load rules -> generate tasks -> execute ->
// aggregate. The manager tracks every scan it has seen so status and the
// live summary can be queried while tasks are still running.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::aggregator::{AggregatorHandle, ResultAggregator, ScanReport};
use super::coordinator::TaskCoordinator;
use crate::auth::AuthManager;
use crate::config::Config;
use crate::error::ScanError;
use crate::grpc::ScanDispatcher;
use crate::models::{ScanResult, ScanState, ScanStatus, ScanSummary, ScanTask};
use crate::parser::ApiParser;
use crate::rules::{RuleEngine, RuleFilter};

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub scan_id: Uuid,
    /// Path to a definition file or the definition text itself
    pub definition: String,
    pub rules_dir: PathBuf,
    pub custom_rules_dir: Option<PathBuf>,
    /// Overrides the base URL declared by the definition
    pub target_base_url: Option<String>,
}

impl ScanRequest {
    pub fn new(definition: impl Into<String>, rules_dir: impl Into<PathBuf>) -> Self {
        Self {
            scan_id: Uuid::new_v4(),
            definition: definition.into(),
            rules_dir: rules_dir.into(),
            custom_rules_dir: None,
            target_base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub scan_id: Uuid,
    pub status: ScanStatus,
    pub summary: ScanSummary,
    pub report: ScanReport,
    pub results: Vec<ScanResult>,
}

struct ScanEntry {
    status: ScanStatus,
    aggregator: Option<AggregatorHandle>,
    summary: Option<ScanSummary>,
}

pub struct ScanManager {
    parser: ApiParser,
    rule_filter: RuleFilter,
    coordinator: Arc<TaskCoordinator>,
    scans: RwLock<HashMap<Uuid, ScanEntry>>,
}

impl ScanManager {
    pub fn new(parser: ApiParser, rule_filter: RuleFilter, coordinator: Arc<TaskCoordinator>) -> Self {
        Self {
            parser,
            rule_filter,
            coordinator,
            scans: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config, dispatcher: Arc<dyn ScanDispatcher>) -> Self {
        let coordinator = TaskCoordinator::new(
            dispatcher,
            Arc::new(AuthManager::from_config(&config.auth)),
            config.coordinator.clone(),
        );
        Self::new(
            ApiParser::new(&config.parser),
            RuleFilter {
                enabled_categories: config.rule_engine.enabled_categories.clone(),
                severity_threshold: config.rule_engine.severity_threshold,
            },
            Arc::new(coordinator),
        )
    }

    pub fn coordinator(&self) -> &Arc<TaskCoordinator> {
        &self.coordinator
    }

    pub async fn run_scan(&self, request: ScanRequest) -> Result<ScanOutcome, ScanError> {
        let scan_id = request.scan_id;
        self.scans.write().await.insert(
            scan_id,
            ScanEntry {
                status: ScanStatus::queued(scan_id),
                aggregator: None,
                summary: None,
            },
        );
        tracing::info!("Scan {} queued", scan_id);

        let tasks = match self.prepare(&request) {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!("Scan {} failed during task generation: {}", scan_id, e);
                self.finish(scan_id, ScanState::Failed, Some(e.to_string()), None)
                    .await;
                return Err(e);
            }
        };

        let task_ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        let aggregator = ResultAggregator::new().spawn();
        aggregator.start_scan().await;

        if let Some(entry) = self.scans.write().await.get_mut(&scan_id) {
            entry.status.state = ScanState::Running;
            entry.status.total_tasks = tasks.len();
            entry.aggregator = Some(aggregator.clone());
        }
        tracing::info!("Scan {} running {} tasks", scan_id, tasks.len());

        let results = self
            .coordinator
            .execute_tasks_streaming(tasks, Some(&aggregator))
            .await;

        aggregator.end_scan().await;
        let report = match aggregator.report().await {
            Some(report) => report,
            None => {
                // Actor gone; rebuild from the results we hold
                let mut fallback = ResultAggregator::new();
                for result in &results {
                    fallback.add_result(result.clone());
                }
                fallback.generate_report()
            }
        };

        let state = if self.coordinator.is_stopped(scan_id).await {
            ScanState::Cancelled
        } else {
            ScanState::Completed
        };
        self.coordinator.release_scan(scan_id, &task_ids).await;

        let status = self
            .finish(scan_id, state, None, Some(report.summary.clone()))
            .await;
        tracing::info!(
            "Scan {} {:?}: {} tasks, {} failed, {} findings",
            scan_id,
            state,
            report.summary.total_tasks,
            report.summary.failed_tasks,
            report.summary.total_findings
        );

        Ok(ScanOutcome {
            scan_id,
            status,
            summary: report.summary.clone(),
            report,
            results,
        })
    }

    fn prepare(&self, request: &ScanRequest) -> Result<Vec<ScanTask>, ScanError> {
        let mut definition = self.parser.parse(&request.definition)?;
        if let Some(base_url) = &request.target_base_url {
            definition.base_url = Some(base_url.clone());
        }

        let mut rules = RuleEngine::with_filter(self.rule_filter.clone());
        rules.load_rules(&request.rules_dir)?;
        if let Some(custom) = &request.custom_rules_dir {
            rules.load_rules(custom)?;
        }

        Ok(self
            .coordinator
            .generate_tasks(&definition, &rules, request.scan_id))
    }

    async fn finish(
        &self,
        scan_id: Uuid,
        state: ScanState,
        error_message: Option<String>,
        summary: Option<ScanSummary>,
    ) -> ScanStatus {
        let mut scans = self.scans.write().await;
        let entry = scans.entry(scan_id).or_insert_with(|| ScanEntry {
            status: ScanStatus::queued(scan_id),
            aggregator: None,
            summary: None,
        });

        entry.status.state = state;
        entry.status.error_message = error_message;
        entry.status.completed_at = Some(Utc::now());
        if let Some(summary) = &summary {
            entry.status.finished_tasks = summary.total_tasks;
        }
        if state != ScanState::Failed {
            entry.status.progress = 1.0;
        }
        entry.aggregator = None;
        entry.summary = summary;
        entry.status.clone()
    }

    pub async fn stop_scan(&self, scan_id: Uuid) -> Result<(), ScanError> {
        let state = self
            .scans
            .read()
            .await
            .get(&scan_id)
            .map(|entry| entry.status.state)
            .ok_or(ScanError::NotFound(scan_id))?;

        match state {
            ScanState::Queued | ScanState::Running => {
                self.coordinator.stop_scan(scan_id).await;
            }
            _ => tracing::debug!("Scan {} already finished, nothing to stop", scan_id),
        }
        Ok(())
    }

    /// Current status; progress is computed from results received so far.
    pub async fn scan_status(&self, scan_id: Uuid) -> Result<ScanStatus, ScanError> {
        let (mut status, aggregator) = {
            let scans = self.scans.read().await;
            let entry = scans.get(&scan_id).ok_or(ScanError::NotFound(scan_id))?;
            (entry.status.clone(), entry.aggregator.clone())
        };

        if let Some(summary) = match aggregator {
            Some(handle) => handle.summary().await,
            None => None,
        } {
            status.finished_tasks = summary.total_tasks;
            if status.total_tasks > 0 {
                status.progress = summary.total_tasks as f32 / status.total_tasks as f32;
            }
        }
        Ok(status)
    }

    /// Live summary while running, final summary afterwards.
    pub async fn summary(&self, scan_id: Uuid) -> Result<ScanSummary, ScanError> {
        let (aggregator, stored) = {
            let scans = self.scans.read().await;
            let entry = scans.get(&scan_id).ok_or(ScanError::NotFound(scan_id))?;
            (entry.aggregator.clone(), entry.summary.clone())
        };

        let live = match aggregator {
            Some(handle) => handle.summary().await,
            None => None,
        };
        Ok(live.or(stored).unwrap_or_default())
    }
}
