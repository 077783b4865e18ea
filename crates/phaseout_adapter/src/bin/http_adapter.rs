#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{anyhow, Context};
use log::info;

use phaseout_adapter::{http, logging, AdapterConfig, AdapterRuntime};
use phaseout_os::clock::SystemClock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AdapterConfig::from_env().map_err(|err| anyhow!(err))?;
    logging::init_logging(config.log_level, config.log_file.as_deref()).map_err(|err| anyhow!(err))?;

    let runtime = AdapterRuntime::new(&config, Arc::new(SystemClock)).map_err(|err| anyhow!(err))?;
    let counts = runtime.store().counts()?;
    info!(
        "param store ready (param_sets={} capacity_settings={} journal={})",
        counts.param_sets,
        counts.capacity_settings,
        config
            .store_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string())
    );

    let app = http::router(Arc::new(runtime));
    let addr = config.bind;
    info!("phaseout_adapter_http listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("phaseout_adapter_http stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::warn!("ctrl-c handler failed: {err}");
    }
}
