//! Server-side delivery trigger.
//!
//! Opens the reminder store, sweeps due reminders on a fixed interval and
//! exposes `POST /trigger/sweep` so an external scheduler can force a sweep.
//!
//! Usage: `nudge-trigger [CONFIG_PATH]` (defaults to `~/.config/nudge/config.toml`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use nudge::config::NudgeConfig;
use nudge::server::TriggerServer;
use nudge::store::Store;
use nudge::transport::{GatewayPushTransport, PushTransport};
use nudge::trigger::{DeliveryTrigger, TriggerService};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(NudgeConfig::default_config_path);
    let config = if config_path.exists() {
        NudgeConfig::from_file(&config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?
    } else {
        tracing::info!(path = %config_path.display(), "no config file, using defaults");
        NudgeConfig::default()
    };
    config.validate().context("invalid configuration")?;

    let store = Arc::new(
        Store::open(&config.store.db_path)
            .with_context(|| format!("failed to open {}", config.store.db_path.display()))?,
    );
    let transport: Arc<dyn PushTransport> =
        Arc::new(GatewayPushTransport::new(&config.push).context("push transport")?);
    let trigger = DeliveryTrigger::new(store, transport, &config.trigger);

    tracing::info!(instance_id = trigger.instance_id(), "nudge-trigger starting");

    let cancel = CancellationToken::new();
    let loop_task = if config.trigger.sweep_interval_secs > 0 {
        let service = TriggerService::new(
            trigger.clone(),
            Duration::from_secs(config.trigger.sweep_interval_secs),
            cancel.child_token(),
        );
        Some(tokio::spawn(service.run()))
    } else {
        tracing::info!("scheduled sweeps disabled; serving on-demand sweeps only");
        None
    };

    let server = TriggerServer::start(trigger, &config.trigger)
        .await
        .context("failed to start trigger endpoint")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");

    cancel.cancel();
    server.shutdown();
    if let Some(task) = loop_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "sweep loop ended abnormally");
        }
    }

    tracing::info!(port = server.port(), "nudge-trigger shut down cleanly");
    Ok(())
}
