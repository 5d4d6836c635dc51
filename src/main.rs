use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use byakugan::config::{Config, LogFormat};
use byakugan::grpc::NodePool;
use byakugan::orchestrator::{ScanManager, ScanRequest};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::load().context("Failed to load configuration")?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("byakugan={}", config.core.log_level)),
    );
    let registry = tracing_subscriber::registry().with(filter);
    match config.core.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }

    let definition = config
        .scan
        .definition
        .clone()
        .context("scan.definition must be set (BYAKUGAN__SCAN__DEFINITION)")?;

    // Scanner nodes
    let pool = NodePool::connect(&config.comms).await?;
    let healthy = pool.probe().await;
    tracing::info!("{} of {} scanner nodes healthy", healthy.len(), pool.len());

    let manager = ScanManager::from_config(&config, Arc::new(pool));

    let mut request = ScanRequest::new(definition, config.rule_engine.rules_dir.clone());
    request.custom_rules_dir = config.rule_engine.custom_rules_dir.clone();
    request.target_base_url = config.scan.target_base_url.clone();
    let scan_id = request.scan_id;

    let scan = manager.run_scan(request);
    tokio::pin!(scan);

    let outcome = tokio::select! {
        outcome = &mut scan => outcome,
        _ = shutdown_signal() => {
            manager.stop_scan(scan_id).await?;
            tracing::info!("Waiting for in-flight tasks of scan {}", scan_id);
            scan.await
        }
    }?;

    let report = serde_json::to_string_pretty(&outcome.report)?;
    match &config.scan.report_path {
        Some(path) => {
            tokio::fs::write(path, report)
                .await
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            tracing::info!("Report written to {}", path.display());
        }
        None => println!("{}", report),
    }

    tracing::info!("Scan {} finished as {:?}", scan_id, outcome.status.state);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, stopping scan");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, stopping scan");
        },
    }
}
