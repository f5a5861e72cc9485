use std::sync::Arc;

use reviewflow::Platform;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod adapters;
mod agent;
mod cancel;
mod client;
mod config;
mod script;

use adapters::AdapterRegistry;
use agent::Agent;
use client::ServerClient;
use config::WorkerConfig;
use script::ScriptAdapter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = WorkerConfig::from_env();

    tracing::info!(
        server = %cfg.server_url,
        worker_id = %cfg.worker_id,
        auth = if cfg.worker_secret.is_some() { "configured" } else { "missing" },
        poll_interval_ms = cfg.poll_interval.as_millis() as u64,
        cancel_check_interval_ms = cfg.cancel_check_interval.as_millis() as u64,
        adapter = cfg.adapter_command.as_deref().unwrap_or("none"),
        "reviewflow worker starting"
    );

    let mut registry = AdapterRegistry::new();
    match cfg
        .adapter_command
        .as_deref()
        .and_then(ScriptAdapter::from_command_line)
    {
        Some(script) => {
            let script = Arc::new(script);
            for platform in Platform::ALL {
                registry.register_with_timeouts(platform, script.clone(), cfg.adapter_timeouts());
            }
        }
        None => tracing::warn!("ADAPTER_COMMAND is not set; no platform adapters available"),
    }

    let client = ServerClient::new(
        cfg.server_url.clone(),
        cfg.worker_secret.clone(),
        cfg.worker_id.clone(),
    )?;
    let agent = Agent::new(
        client,
        Arc::new(registry),
        cfg.poll_interval,
        cfg.cancel_check_interval,
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested; finishing current job");
            signal.cancel();
        }
    });

    agent.run(shutdown).await;
    Ok(())
}
