//! # revu
//!
//! Relays one agent-runtime event feed to any number of browser clients,
//! each scoped to a single session.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use revu_core::source::EventSource;
use revu_runtime::{RetryPolicy, RuntimeClient, RuntimeClientConfig};
use revu_server::{Broadcaster, BroadcasterConfig, ServerConfig, ShutdownCoordinator};
use revu_settings::RevuSettings;
use revu_telemetry::{parse_level, TelemetryConfig};

/// Live session event relay.
#[derive(Parser, Debug)]
#[command(name = "revu", about = "Live session event relay")]
struct Cli {
    /// Settings file (defaults to `~/.revu/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Base URL of the agent runtime (overrides settings).
    #[arg(long)]
    runtime_url: Option<String>,
}

impl Cli {
    fn load_settings(&self) -> Result<RevuSettings> {
        let path = self.config.clone().unwrap_or_else(revu_settings::settings_path);
        let mut settings = revu_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;

        if let Some(host) = &self.host {
            settings.server.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(url) = &self.runtime_url {
            settings.runtime.base_url = url.clone();
        }
        Ok(settings)
    }
}

fn telemetry_config(settings: &RevuSettings) -> Result<TelemetryConfig> {
    let logging = &settings.logging;
    let log_level = parse_level(&logging.level)
        .ok_or_else(|| anyhow!("invalid logging.level: {}", logging.level))?;
    let module_levels = logging
        .modules
        .iter()
        .map(|(module, level)| {
            parse_level(level)
                .map(|level| (module.clone(), level))
                .ok_or_else(|| anyhow!("invalid level for module {module}: {level}"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(TelemetryConfig {
        log_level,
        module_levels,
        json: logging.json,
    })
}

fn runtime_config(settings: &RevuSettings) -> RuntimeClientConfig {
    RuntimeClientConfig {
        base_url: settings.runtime.base_url.clone(),
        event_path: settings.runtime.event_path.clone(),
        connect_timeout: settings.runtime.connect_timeout(),
        idle_timeout: settings.runtime.idle_timeout(),
    }
}

fn broadcaster_config(settings: &RevuSettings) -> BroadcasterConfig {
    let b = &settings.broadcast;
    BroadcasterConfig {
        idle_teardown: b.idle_teardown(),
        retry: RetryPolicy {
            base_delay: b.retry_base_delay(),
            max_delay: b.retry_max_delay(),
            max_attempts: b.max_retry_attempts,
        },
    }
}

fn server_config(settings: &RevuSettings) -> ServerConfig {
    ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        keep_alive_secs: settings.broadcast.keep_alive_secs,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;

    revu_telemetry::init_telemetry(&telemetry_config(&settings)?)
        .context("Failed to initialize logging")?;

    let client = RuntimeClient::new(runtime_config(&settings))
        .context("Failed to build runtime client")?;
    tracing::info!(url = client.event_url(), "runtime event feed configured");
    let source: Arc<dyn EventSource> = Arc::new(client);

    let broadcaster = Broadcaster::new(source, broadcaster_config(&settings));
    let coordinator = ShutdownCoordinator::new(broadcaster.clone());

    let handle = revu_server::start(&server_config(&settings), broadcaster, coordinator.token())
        .await
        .with_context(|| {
            format!(
                "Failed to bind {}:{}",
                settings.server.host, settings.server.port
            )
        })?;
    tracing::info!(port = handle.port(), "revu ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    coordinator
        .graceful_shutdown(vec![handle.into_join_handle()], None)
        .await;
    Ok(())
}
