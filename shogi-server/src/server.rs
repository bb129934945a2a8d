//! Listener, shared state and shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::connection;
use crate::game::{GameFactory, RelayGameFactory};
use crate::league::League;
use crate::ratings::RatingTable;

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// State shared by every connection task.
pub struct SharedState {
    pub config: ServerConfig,
    /// Held for one dispatch step at a time, never across an await.
    pub league: Mutex<League>,
}

pub struct Server {
    config: ServerConfig,
    factory: Box<dyn GameFactory>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let factory = Box::new(RelayGameFactory {
            move_time_limit: config.move_time_limit(),
        });
        Self { config, factory }
    }

    /// Create a server running games from a custom engine.
    pub fn with_factory(config: ServerConfig, factory: Box<dyn GameFactory>) -> Self {
        Self { config, factory }
    }

    /// Build SharedState, loading the rating table if one is configured.
    fn build_state(self) -> Result<Arc<SharedState>> {
        let ratings = match &self.config.ratings_file {
            Some(path) => {
                let table = RatingTable::load(path)?;
                tracing::info!("Loaded {} rating records from {}", table.len(), path.display());
                table
            }
            None => RatingTable::default(),
        };
        Ok(Arc::new(SharedState {
            league: Mutex::new(League::new(self.factory, ratings)),
            config: self.config,
        }))
    }

    /// Run the server until SIGINT or SIGTERM, then kill every player.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config.listen_addr))?;
        tracing::info!("Listening on {}", self.config.listen_addr);
        let state = self.build_state()?;

        tokio::select! {
            result = accept_loop(listener, Arc::clone(&state)) => result?,
            signal = shutdown_signal() => {
                signal?;
                tracing::info!("Shutting down, killing all players");
                state.league.lock().kill_all();
                // Give connection tasks a moment to flush their last lines.
                tokio::time::sleep(SHUTDOWN_GRACE).await;
            }
        }
        Ok(())
    }

    /// Start the server and return the bound address + task handle (for testing).
    pub async fn start(self) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        let addr = listener.local_addr()?;
        tracing::info!("Listening on {addr}");

        let state = self.build_state()?;
        let handle = tokio::spawn(accept_loop(listener, state));
        Ok((addr, handle))
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<SharedState>) -> Result<()> {
    loop {
        let (stream, _addr) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = connection::handle(stream, state).await {
                tracing::error!("Connection error: {e}");
            }
        });
    }
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => tracing::info!("Received SIGINT"),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C");
    }
    Ok(())
}
