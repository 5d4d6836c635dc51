// ============================================
// Result Aggregation
// ============================================
//
// `ResultAggregator` tallies per-task results into a running `ScanSummary`.
// Workers finish in any order, so a spawned actor owns the aggregator and
// producers talk to it through a clone-friendly `AggregatorHandle`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::models::{Finding, ScanResult, ScanSummary};

/// Channel buffer size before producers wait on the actor
const CHANNEL_BUFFER: usize = 1_024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResults {
    pub successful: usize,
    pub failed: usize,
    pub findings: Vec<Finding>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub summary: ScanSummary,
    pub findings: Vec<Finding>,
    pub errors: Vec<String>,
    pub metadata: ReportMetadata,
}

#[derive(Debug, Default)]
pub struct ResultAggregator {
    summary: ScanSummary,
    results: Vec<ScanResult>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_scan(&mut self) {
        self.start_time = Some(Utc::now());
        self.end_time = None;
    }

    pub fn end_scan(&mut self) {
        self.end_time = Some(Utc::now());
    }

    pub fn add_result(&mut self, result: ScanResult) {
        self.summary.total_tasks += 1;

        if result.success {
            self.summary.completed_tasks += 1;
            self.summary.total_findings += result.findings.len();
            for finding in &result.findings {
                // Unknown severities are not counted
                if let Some(count) = self
                    .summary
                    .severity_counts
                    .get_mut(&finding.severity.to_lowercase())
                {
                    *count += 1;
                }
            }
        } else {
            self.summary.failed_tasks += 1;
        }

        self.results.push(result);
    }

    /// Snapshot of the running summary. Safe mid-scan.
    pub fn get_summary(&self) -> ScanSummary {
        let mut summary = self.summary.clone();
        summary.execution_time = match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).to_std().unwrap_or_default(),
            _ => std::time::Duration::ZERO,
        };
        summary
    }

    pub fn results(&self) -> &[ScanResult] {
        &self.results
    }

    /// Classifies a batch without touching any running summary.
    pub fn process_results(results: &[ScanResult]) -> AggregatedResults {
        let mut aggregated = AggregatedResults::default();
        for result in results {
            if result.success {
                aggregated.successful += 1;
                aggregated.findings.extend(result.findings.iter().cloned());
            } else {
                aggregated.failed += 1;
                if let Some(error) = &result.error_details {
                    aggregated.errors.push(format!("{}: {}", result.task_id, error));
                }
            }
        }
        aggregated
    }

    pub fn generate_report(&self) -> ScanReport {
        let batch = Self::process_results(&self.results);
        ScanReport {
            summary: self.get_summary(),
            findings: batch.findings,
            errors: batch.errors,
            metadata: ReportMetadata {
                start_time: self.start_time,
                end_time: self.end_time,
            },
        }
    }

    /// Move the aggregator onto its own task. Returns a handle for producers.
    pub fn spawn(self) -> AggregatorHandle {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        tokio::spawn(self.run(rx));
        AggregatorHandle { tx }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Start => self.start_scan(),
                Command::End => self.end_scan(),
                Command::Add(result) => self.add_result(*result),
                Command::Summary(reply) => {
                    let _ = reply.send(self.get_summary());
                }
                Command::Report(reply) => {
                    let _ = reply.send(self.generate_report());
                }
            }
        }
        tracing::debug!("Result aggregator stopped after {} results", self.results.len());
    }
}

// ============================================
// Aggregator Handle (clone-friendly sender)
// ============================================

enum Command {
    Start,
    End,
    Add(Box<ScanResult>),
    Summary(oneshot::Sender<ScanSummary>),
    Report(oneshot::Sender<ScanReport>),
}

#[derive(Clone)]
pub struct AggregatorHandle {
    tx: mpsc::Sender<Command>,
}

impl AggregatorHandle {
    async fn send(&self, command: Command) {
        if self.tx.send(command).await.is_err() {
            tracing::error!("Result aggregator channel closed unexpectedly");
        }
    }

    pub async fn start_scan(&self) {
        self.send(Command::Start).await;
    }

    pub async fn end_scan(&self) {
        self.send(Command::End).await;
    }

    /// Waits for channel capacity; results are never dropped.
    pub async fn add_result(&self, result: ScanResult) {
        self.send(Command::Add(Box::new(result))).await;
    }

    pub async fn summary(&self) -> Option<ScanSummary> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Summary(reply)).await;
        rx.await.ok()
    }

    pub async fn report(&self) -> Option<ScanReport> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Report(reply)).await;
        rx.await.ok()
    }
}
