use anyhow::Context;
use tokio_util::sync::CancellationToken;

use docshift_core::Config;
use docshift_worker::setup::{initialize_worker, shutdown_signal};
use docshift_worker::{telemetry, ConversionRegistry};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;
    telemetry::init_telemetry(config.log_json());
    config
        .validate()
        .context("Configuration validation failed")?;

    tracing::info!(environment = %config.environment, "Starting docshift worker");

    let registry = ConversionRegistry::from_commands(&config.converter_commands)?;
    let shutdown = CancellationToken::new();
    let mut runtime = initialize_worker(&config, registry, shutdown.clone()).await?;

    let fault = tokio::select! {
        _ = shutdown_signal() => None,
        fault = runtime.pool.faults.recv() => fault,
    };

    shutdown.cancel();

    if let Err(e) = runtime.pool.handle.await {
        tracing::error!(error = %e, "Worker pool task failed");
    }
    if let Err(e) = runtime.sweeper.await {
        tracing::error!(error = %e, "Expiry sweeper task failed");
    }
    if let Err(e) = runtime.listener.await {
        tracing::error!(error = %e, "Bus listener task failed");
    }

    if let Some(fault) = fault {
        return Err(anyhow::anyhow!(
            "stopping after inconsistent job {} (client {}): {}",
            fault.job_id,
            fault.client_id,
            fault.error
        ));
    }

    tracing::info!("docshift worker stopped");
    Ok(())
}
