//! HTTP dispatch layer
//!
//! Exposes the record store and the signal channel over the versioned
//! protocol in [`crate::protocol`]. Handlers only route and (de)serialize;
//! every error kind reaches the client unchanged.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::{net::TcpListener, task::JoinSet, time::MissedTickBehavior};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

mod error;
mod handlers;

use crate::config::ServerConfig;
use crate::protocol::Operation;
use crate::record::FsRecordStore;
use crate::signal::SignalChannel;
use crate::{Error, Result};

/// Shared state of all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Record logs below the configured root
    pub store: Arc<FsRecordStore>,
    /// Signal mailboxes and heartbeats
    pub signals: Arc<SignalChannel>,
}

impl AppState {
    /// Build state for a server configuration.
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            store: Arc::new(FsRecordStore::with_options(
                config.root.clone(),
                config.codec,
                config.sync_writes,
            )),
            signals: Arc::new(SignalChannel::new(config.mailbox_retention)),
        }
    }
}

/// A running logging server.
pub struct Server {
    tasks: JoinSet<std::io::Result<()>>,
    addr: SocketAddr,
    state: AppState,
}

impl Server {
    /// Bind the listener and spawn the server and mailbox sweeper tasks.
    ///
    /// # Errors
    /// Returns [`Error::Serialization`] if the configured codec is not
    /// built in, and [`Error::Unavailable`] if the root cannot be created or
    /// the address cannot be bound.
    pub async fn spawn(config: ServerConfig) -> Result<Self> {
        config.codec.ensure_supported()?;
        tokio::fs::create_dir_all(&config.root).await.map_err(|e| {
            Error::unavailable(format!("failed to create {}", config.root.display()), e)
        })?;

        let state = AppState::new(&config);
        let app = create_app(state.clone(), config.max_body);

        let bind_addr = config.socket_addr();
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| Error::unavailable(format!("failed to bind {bind_addr}"), e))?;
        let addr = listener.local_addr()?;

        let mut tasks = JoinSet::new();
        tasks.spawn(axum::serve(listener, app).into_future());
        tasks.spawn(sweep_mailboxes(
            Arc::clone(&state.signals),
            config.sweep_interval,
        ));
        info!(%addr, root = %config.root.display(), "logging server listening");

        Ok(Self { tasks, addr, state })
    }

    /// Get the bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL clients should be configured with.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Shared state, for in-process inspection.
    #[must_use]
    pub const fn state(&self) -> &AppState {
        &self.state
    }

    /// Shutdown the server and wait for all tasks to complete.
    ///
    /// # Errors
    /// Returns the first task failure, if any.
    pub async fn shutdown(mut self) -> Result<()> {
        self.tasks.abort_all();
        self.run_until_done().await
    }

    /// Wait for all tasks to complete.
    ///
    /// Runs forever unless tasks fail.
    ///
    /// # Errors
    /// Returns the first task failure, if any.
    pub async fn run_until_done(mut self) -> Result<()> {
        let mut final_res = Ok(());
        while let Some(res) = self.tasks.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Err(err) if err.is_cancelled() => {}
                Ok(Err(err)) => {
                    warn!(?err, "task failed");
                    final_res = Err(Error::unavailable("server task failed", err));
                }
                Err(err) => {
                    warn!(?err, "task panicked");
                    final_res = Err(Error::unavailable("server task panicked", err));
                }
            }
        }
        final_res
    }
}

/// Build the router over `state`, accepting bodies up to `max_body` bytes.
pub fn create_app(state: AppState, max_body: usize) -> Router {
    let mut router: Router<AppState> =
        Router::new().route("/healthcheck", get(handlers::healthcheck));
    for op in Operation::ALL {
        let route = match op {
            Operation::Append => post(handlers::append),
            Operation::Overwrite => post(handlers::overwrite),
            Operation::ReadAll => post(handlers::read_all),
            Operation::Remove => post(handlers::remove),
            Operation::Glob => post(handlers::glob),
            Operation::SendSignal => post(handlers::send_signal),
            Operation::Ping => post(handlers::ping),
            Operation::Heartbeats => post(handlers::heartbeats),
        };
        router = router.route(&op.path(), route);
    }
    router
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body))
        .layer(TraceLayer::new_for_http())
}

async fn sweep_mailboxes(signals: Arc<SignalChannel>, every: Duration) -> std::io::Result<()> {
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let evicted = signals.sweep();
        if evicted > 0 {
            info!(evicted, "swept idle mailboxes");
        }
    }
}
