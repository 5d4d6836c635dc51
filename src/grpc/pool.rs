use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::client::ScannerClient;
use super::proto;
use super::{RemoteResult, ScanDispatcher};
use crate::config::CommsConfig;
use crate::error::CommsError;
use crate::models::ScanTask;

// ============================================
// Circuit Breaker Configuration
// ============================================

/// Number of consecutive failures before circuit opens
const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// Time to wait before letting a probe call through an open circuit
const CIRCUIT_RESET_TIMEOUT_SECS: u64 = 30;

// ============================================
// Circuit Breaker State
// ============================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    threshold: u32,
    reset_timeout: Duration,
    opened_at: RwLock<Option<Instant>>,
    state: RwLock<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            threshold,
            reset_timeout,
            opened_at: RwLock::new(None),
            state: RwLock::new(CircuitState::Closed),
        }
    }

    pub async fn record_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        *self.opened_at.write().await = None;
        *self.state.write().await = CircuitState::Closed;
    }

    pub async fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().await;

        // A failed probe re-opens immediately
        if count >= self.threshold || *state == CircuitState::HalfOpen {
            if *state != CircuitState::Open {
                tracing::warn!("Circuit breaker opened after {} consecutive failures", count);
            }
            *state = CircuitState::Open;
            *self.opened_at.write().await = Some(Instant::now());
        }
    }

    pub async fn can_attempt(&self) -> bool {
        let state = *self.state.read().await;

        match state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self.opened_at.read().await.map(|t| t.elapsed());
                if elapsed.is_some_and(|e| e >= self.reset_timeout) {
                    *self.state.write().await = CircuitState::HalfOpen;
                    tracing::info!("Circuit breaker moving to half-open state");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(
            CIRCUIT_FAILURE_THRESHOLD,
            Duration::from_secs(CIRCUIT_RESET_TIMEOUT_SECS),
        )
    }
}

// ============================================
// Node Pool
// ============================================

struct Node {
    client: ScannerClient,
    breaker: CircuitBreaker,
}

/// Round-robin dispatch over several scanner nodes. A retry of the same task
/// may land on any node; nodes behind an open circuit are skipped.
pub struct NodePool {
    nodes: Vec<Node>,
    next: AtomicUsize,
}

impl NodePool {
    pub fn new(clients: Vec<ScannerClient>) -> Self {
        Self {
            nodes: clients
                .into_iter()
                .map(|client| Node {
                    client,
                    breaker: CircuitBreaker::default(),
                })
                .collect(),
            next: AtomicUsize::new(0),
        }
    }

    /// Connects every configured node. Unreachable nodes are logged and left
    /// out; a security misconfiguration aborts.
    pub async fn connect(config: &CommsConfig) -> Result<Self, CommsError> {
        let mut clients = Vec::with_capacity(config.scanner_nodes.len());
        for address in &config.scanner_nodes {
            match ScannerClient::connect(address, config).await {
                Ok(client) => clients.push(client),
                Err(e @ CommsError::Security(_)) => return Err(e),
                Err(e) => tracing::error!("Scanner node {} left out of pool: {}", address, e),
            }
        }

        if clients.is_empty() {
            return Err(CommsError::NoNodeAvailable);
        }
        tracing::info!("Scanner pool ready with {} nodes", clients.len());
        Ok(Self::new(clients))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    async fn pick(&self) -> Option<&Node> {
        let count = self.nodes.len();
        if count == 0 {
            return None;
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        for offset in 0..count {
            let node = &self.nodes[(start + offset) % count];
            if node.breaker.can_attempt().await {
                return Some(node);
            }
        }
        None
    }

    /// Heartbeat every node; returns the addresses that answered healthy.
    pub async fn probe(&self) -> Vec<String> {
        let mut healthy = Vec::new();
        for node in &self.nodes {
            match node.client.heartbeat("byakugan-orchestrator").await {
                Ok(response) if response.healthy => {
                    node.breaker.record_success().await;
                    healthy.push(node.client.address().to_string());
                }
                Ok(_) => tracing::warn!("Scanner node {} reports unhealthy", node.client.address()),
                Err(e) => {
                    node.breaker.record_failure().await;
                    tracing::warn!("Heartbeat to {} failed: {}", node.client.address(), e);
                }
            }
        }
        healthy
    }
}

#[async_trait]
impl ScanDispatcher for NodePool {
    async fn dispatch(&self, task: &ScanTask) -> Result<RemoteResult, CommsError> {
        let node = self.pick().await.ok_or(CommsError::NoNodeAvailable)?;
        tracing::debug!("Dispatching task {} to {}", task.id, node.client.address());

        match node.client.execute_scan(proto::ScanTask::from(task)).await {
            Ok(result) => {
                node.breaker.record_success().await;
                Ok(RemoteResult::from(result))
            }
            Err(e) => {
                node.breaker.record_failure().await;
                Err(e)
            }
        }
    }
}
