//! forgepm daemon - game server supervisor

use anyhow::Result;
use forgepm_core::constants;
use forgepm_notify::{NotificationManager, Notifier, NotifyConfig};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod chat;
mod daemon;
mod handlers;
mod mapchange;
mod metrics;
mod players;
mod registry;
mod scheduler;
mod supervisor;
#[cfg(test)]
mod testutil;
mod watchdog;

use daemon::Daemon;

fn notifier() -> Arc<dyn Notifier> {
    match NotificationManager::from_config_file() {
        Ok(manager) => Arc::new(manager),
        Err(e) => {
            warn!("Notifications disabled, config unreadable: {}", e);
            Arc::new(NotificationManager::new(NotifyConfig::default()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "forgepmd=info,forgepm_core=info,forgepm_rcon=info,forgepm_notify=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("forgepm daemon starting...");

    let home = constants::forgepm_home();
    if !home.exists() {
        std::fs::create_dir_all(&home)?;
        info!("Created forgepm home directory: {}", home.display());
    }

    // Binding the socket fails while another daemon still serves it
    let daemon = Daemon::new(&home, notifier()).await?;

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        result = daemon.run() => {
            if let Err(e) = result {
                error!("Daemon error: {}", e);
                daemon.close();
                return Err(e.into());
            }
            info!("Shutdown requested by client");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
        }
    }

    daemon.close();
    info!("Daemon shutdown complete");
    Ok(())
}
