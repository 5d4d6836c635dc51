// gRPC client for remote scanner nodes

use std::future::Future;
use std::time::Duration;

use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};

use super::proto::scanner_service_client::ScannerServiceClient;
use super::proto::{
    HeartbeatRequest, HeartbeatResponse, ScanResult, ScanStatus, ScanTask, StatusRequest,
    StreamAck, TaskStatus, TaskStatusRequest,
};
use crate::config::{CommsConfig, TlsConfig};
use crate::error::CommsError;

/// Timeout for liveness probes, independent of the per-call budget
const HEARTBEAT_TIMEOUT_SECS: u64 = 5;

// ============================================
// Transport setup
// ============================================

fn tls_config(tls: &TlsConfig) -> Result<ClientTlsConfig, CommsError> {
    let read = |path: &std::path::Path, what: &str| {
        std::fs::read(path)
            .map_err(|e| CommsError::Security(format!("Cannot read {} {}: {}", what, path.display(), e)))
    };

    let mut config = ClientTlsConfig::new();
    if let Some(domain) = &tls.domain_name {
        config = config.domain_name(domain.clone());
    }
    if let Some(ca) = &tls.ca_cert {
        config = config.ca_certificate(Certificate::from_pem(read(ca, "CA certificate")?));
    }
    match (&tls.client_cert, &tls.client_key) {
        (Some(cert), Some(key)) => {
            let identity = Identity::from_pem(read(cert, "client certificate")?, read(key, "client key")?);
            config = config.identity(identity);
        }
        (None, None) => {}
        _ => {
            return Err(CommsError::Security(
                "client certificate and key must be configured together".to_string(),
            ));
        }
    }
    Ok(config)
}

fn build_endpoint(address: &str, config: &CommsConfig) -> Result<Endpoint, CommsError> {
    let mut endpoint = Endpoint::from_shared(address.to_string())
        .map_err(|e| CommsError::Connection(format!("Invalid scanner address {}: {}", address, e)))?
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .tcp_keepalive(Some(Duration::from_secs(config.keepalive_interval_secs)))
        .http2_keep_alive_interval(Duration::from_secs(config.keepalive_interval_secs))
        .keep_alive_timeout(Duration::from_secs(config.keepalive_timeout_secs))
        .keep_alive_while_idle(true);

    if config.tls.enabled {
        endpoint = endpoint
            .tls_config(tls_config(&config.tls)?)
            .map_err(|e| CommsError::Security(e.to_string()))?;
    }

    Ok(endpoint)
}

/// A call that ran past its deadline is reported as a timeout; every other
/// status keeps its gRPC code.
fn call_error(status: tonic::Status, timeout: Duration) -> CommsError {
    match status.code() {
        tonic::Code::DeadlineExceeded => CommsError::Timeout(timeout),
        _ => CommsError::from(status),
    }
}

// ============================================
// Client Implementation
// ============================================

#[derive(Debug, Clone)]
pub struct ScannerClient {
    client: ScannerServiceClient<Channel>,
    address: String,
    request_timeout: Duration,
    transport_retries: u32,
    transport_retry_delay: Duration,
}

impl ScannerClient {
    /// Connect to a scanner node.
    ///
    /// The connection is established eagerly and retried `connection_retries`
    /// times. TLS misconfiguration fails immediately with `CommsError::Security`.
    pub async fn connect(address: &str, config: &CommsConfig) -> Result<Self, CommsError> {
        let endpoint = build_endpoint(address, config)?;
        let retry_delay = Duration::from_millis(config.connection_retry_delay_ms);

        let mut attempt = 0;
        let channel = loop {
            match endpoint.connect().await {
                Ok(channel) => break channel,
                Err(e) if attempt < config.connection_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "Failed to connect to scanner node {} (attempt {}/{}): {}",
                        address,
                        attempt,
                        config.connection_retries + 1,
                        e
                    );
                    tokio::time::sleep(retry_delay).await;
                }
                Err(e) => {
                    return Err(CommsError::Connection(format!(
                        "Failed to connect to scanner node {}: {}",
                        address, e
                    )));
                }
            }
        };

        tracing::info!("Connected to scanner node {}", address);
        Ok(Self::from_channel(address, channel, config))
    }

    pub fn from_channel(address: &str, channel: Channel, config: &CommsConfig) -> Self {
        let client = ScannerServiceClient::new(channel)
            .max_decoding_message_size(config.max_message_size)
            .max_encoding_message_size(config.max_message_size);

        Self {
            client,
            address: address.to_string(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            transport_retries: config.transport_retries,
            transport_retry_delay: Duration::from_millis(config.transport_retry_delay_ms),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Runs `call`, retrying only while the node reports `Unavailable`.
    async fn with_transport_retry<T, F, Fut>(&self, method: &str, mut call: F) -> Result<T, CommsError>
    where
        F: FnMut(ScannerServiceClient<Channel>) -> Fut,
        Fut: Future<Output = Result<T, tonic::Status>>,
    {
        let mut attempt = 0;
        loop {
            let err = match call(self.client.clone()).await {
                Ok(value) => return Ok(value),
                Err(status) => call_error(status, self.request_timeout),
            };

            if !err.is_transient() || attempt >= self.transport_retries {
                return Err(err);
            }
            attempt += 1;
            tracing::debug!(
                "{} on {} unavailable, transport retry {}/{}",
                method,
                self.address,
                attempt,
                self.transport_retries
            );
            tokio::time::sleep(self.transport_retry_delay).await;
        }
    }

    fn request<T>(&self, message: T, timeout: Duration) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        request.set_timeout(timeout);
        request
    }

    /// Dispatch one task to the node.
    pub async fn execute_scan(&self, task: ScanTask) -> Result<ScanResult, CommsError> {
        let timeout = self.request_timeout;
        self.with_transport_retry("ExecuteScan", |mut client| {
            let request = self.request(task.clone(), timeout);
            async move { client.execute_scan(request).await.map(|r| r.into_inner()) }
        })
        .await
    }

    /// Push results to the node and collect its acknowledgements.
    pub async fn stream_results(&self, results: Vec<ScanResult>) -> Result<Vec<StreamAck>, CommsError> {
        let mut client = self.client.clone();
        let timeout = self.request_timeout;
        let response = client
            .stream_results(futures::stream::iter(results))
            .await
            .map_err(|status| call_error(status, timeout))?;

        let mut stream = response.into_inner();
        let mut acks = Vec::new();
        while let Some(ack) = stream
            .message()
            .await
            .map_err(|status| call_error(status, timeout))?
        {
            acks.push(ack);
        }
        Ok(acks)
    }

    pub async fn get_task_status(&self, task_id: &str) -> Result<TaskStatus, CommsError> {
        let timeout = self.request_timeout;
        self.with_transport_retry("GetTaskStatus", |mut client| {
            let request = self.request(
                TaskStatusRequest {
                    task_id: task_id.to_string(),
                },
                timeout,
            );
            async move { client.get_task_status(request).await.map(|r| r.into_inner()) }
        })
        .await
    }

    pub async fn get_scan_status(&self, scan_id: &str) -> Result<ScanStatus, CommsError> {
        let timeout = self.request_timeout;
        self.with_transport_retry("GetScanStatus", |mut client| {
            let request = self.request(
                StatusRequest {
                    scan_id: scan_id.to_string(),
                },
                timeout,
            );
            async move { client.get_scan_status(request).await.map(|r| r.into_inner()) }
        })
        .await
    }

    /// Liveness probe. Not retried.
    pub async fn heartbeat(&self, node_id: &str) -> Result<HeartbeatResponse, CommsError> {
        let mut client = self.client.clone();
        let timeout = Duration::from_secs(HEARTBEAT_TIMEOUT_SECS);
        let request = self.request(
            HeartbeatRequest {
                node_id: node_id.to_string(),
                timestamp: chrono::Utc::now().timestamp(),
            },
            timeout,
        );
        let response = client
            .heartbeat(request)
            .await
            .map_err(|status| call_error(status, timeout))?;
        Ok(response.into_inner())
    }
}
