// Copyright 2025
// Licensed under the Elastic License v2.0

#![warn(clippy::all)]

mod config;
mod connectors;
mod core;
mod engine;
mod schema;
mod state_store;
#[cfg(test)]
mod testing;
mod utils;

use std::sync::Arc;

use anyhow::Result;
use dotenvy::dotenv;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::connectors::LoaderConnectors;
use crate::engine::{Fleet, FleetState};
use crate::state_store::StateStore;

/// Exit code after a second shutdown signal.
const FORCED_EXIT_CODE: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenv().ok();

    let config = Config::from_env()?;
    config.print_banner();

    let connectors = Arc::new(LoaderConnectors::new(&config)?);
    let fleet = Fleet::start(
        config.tables.clone(),
        config.stream_settings(),
        StateStore::new(config.state_dir.clone()),
        connectors.clone(),
    );
    spawn_signal_handler(fleet.state());

    let report = fleet.join().await;
    connectors.close().await;

    for (stream, outcome) in &report.outcomes {
        if let Some(reason) = outcome.failure() {
            error!("{} failed: {}", stream, reason);
        }
    }
    std::process::exit(report.exit_code());
}

/// First signal stops the fleet gracefully, the second one exits right away.
fn spawn_signal_handler(state: Arc<FleetState>) {
    tokio::spawn(async move {
        let mut signals = match ShutdownSignals::new() {
            Ok(signals) => signals,
            Err(e) => {
                error!("Failed to listen for shutdown signals: {}", e);
                return;
            }
        };
        loop {
            if let Err(e) = signals.recv().await {
                error!("Failed to listen for shutdown signals: {}", e);
                return;
            }
            if state.request_shutdown() {
                info!("Received shutdown signal, stopping {} streams", state.active_count());
            } else {
                warn!("Slow shutdown detected");
                std::process::exit(FORCED_EXIT_CODE);
            }
        }
    });
}

/// SIGINT and SIGTERM listener, registered once for the life of the process.
struct ShutdownSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    #[cfg(unix)]
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    fn new() -> std::io::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(&mut self) -> std::io::Result<()> {
        tokio::select! {
            _ = self.interrupt.recv() => {}
            _ = self.terminate.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> std::io::Result<()> {
        tokio::signal::ctrl_c().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_signals_wait_without_a_signal() {
        let mut signals = ShutdownSignals::new().unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(20), signals.recv()).await;
        assert!(waited.is_err());
        // the listener stays usable after a wait
        let waited = tokio::time::timeout(Duration::from_millis(20), signals.recv()).await;
        assert!(waited.is_err());
    }
}
