//! Client handle
//!
//! A [`Client`] is configured once with a log directory and an experiment
//! prefix. When the directory is a local path the client writes records
//! itself; when it is an `http(s)://` URL every operation is forwarded to a
//! logging server. Calling code is the same either way.
//!
//! ```rust,no_run
//! use ml_logger::{Client, ClientConfig};
//!
//! # async fn example() -> ml_logger::Result<()> {
//! let config = ClientConfig::new("http://0.0.0.0:8081".parse()?, "runs/lr-sweep/seed-0");
//! let logger = Client::new(config)?;
//!
//! logger.log_params(&serde_json::json!({"lr": 3e-4})).await?;
//! for step in 0..100u64 {
//!     logger.log_metrics(step, &serde_json::json!({"loss": 1.0 / (step + 1) as f64})).await?;
//!     for signal in logger.ping("alive", None).await? {
//!         if signal.name == "stop" {
//!             return Ok(());
//!         }
//!     }
//! }
//! logger.ping("completed", None).await?;
//! # Ok(())
//! # }
//! ```

mod remote;

pub use remote::RemoteClient;

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::config::{ClientConfig, LogDirectory};
use crate::payload::Payload;
use crate::record::{FsRecordStore, RecordStore};
use crate::signal::{Heartbeat, Signal, SignalChannel, SignalValue};
use crate::{Error, Result};

/// Key that [`Client::log_text`] appends to.
pub const OUTPUTS_KEY: &str = "outputs.log";
/// Key that [`Client::log_params`] appends to.
pub const PARAMETERS_KEY: &str = "parameters.pkl";
/// Key that [`Client::log_metrics`] appends to.
pub const METRICS_KEY: &str = "metrics.pkl";

/// Where operations are executed.
#[derive(Debug)]
enum Backend {
    Local {
        store: FsRecordStore,
        signals: Arc<SignalChannel>,
    },
    Remote(RemoteClient),
}

impl RecordStore for Backend {
    async fn append(&self, prefix: &str, key: &str, payload: &Payload) -> Result<()> {
        match self {
            Self::Local { store, .. } => store.append(prefix, key, payload).await,
            Self::Remote(remote) => remote.append(prefix, key, payload).await,
        }
    }

    async fn overwrite(&self, prefix: &str, key: &str, payload: &Payload) -> Result<()> {
        match self {
            Self::Local { store, .. } => store.overwrite(prefix, key, payload).await,
            Self::Remote(remote) => remote.overwrite(prefix, key, payload).await,
        }
    }

    async fn read_all(&self, prefix: &str, key: &str) -> Result<Vec<Payload>> {
        match self {
            Self::Local { store, .. } => store.read_all(prefix, key).await,
            Self::Remote(remote) => remote.read_all(prefix, key).await,
        }
    }

    async fn remove(&self, prefix: &str, key: &str) -> Result<()> {
        match self {
            Self::Local { store, .. } => store.remove(prefix, key).await,
            Self::Remote(remote) => remote.remove(prefix, key).await,
        }
    }

    async fn glob(&self, prefix: &str, pattern: &str, working_dir: &str) -> Result<Vec<String>> {
        match self {
            Self::Local { store, .. } => store.glob(prefix, pattern, working_dir).await,
            Self::Remote(remote) => remote.glob(prefix, pattern, working_dir).await,
        }
    }
}

/// Experiment logging handle.
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    backend: Backend,
    splits: DashMap<String, Instant>,
}

impl Client {
    /// Create a handle for `config`.
    ///
    /// In local mode the handle gets its own signal channel; use
    /// [`Client::with_signals`] to share one between handles.
    ///
    /// # Errors
    /// Returns [`Error::Unavailable`] if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_signals(config, Arc::new(SignalChannel::default()))
    }

    /// Create a handle whose local-mode signals go through `signals`.
    ///
    /// Ignored in remote mode, where the server owns all mailboxes.
    ///
    /// # Errors
    /// Returns [`Error::Unavailable`] if the HTTP client cannot be built.
    pub fn with_signals(config: ClientConfig, signals: Arc<SignalChannel>) -> Result<Self> {
        let backend = match &config.log_directory {
            LogDirectory::Local(root) => Backend::Local {
                store: FsRecordStore::new(root.clone()),
                signals,
            },
            LogDirectory::Remote(url) => {
                Backend::Remote(RemoteClient::new(url.clone(), config.timeout)?)
            }
        };
        Ok(Self {
            config,
            backend,
            splits: DashMap::new(),
        })
    }

    /// Experiment prefix of this handle.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    /// Configured log directory.
    #[must_use]
    pub const fn log_directory(&self) -> &LogDirectory {
        &self.config.log_directory
    }

    /// Append `payload` to `key`.
    ///
    /// # Errors
    /// See [`RecordStore::append`].
    pub async fn append(&self, key: &str, payload: &Payload) -> Result<()> {
        self.backend.append(self.prefix(), key, payload).await
    }

    /// Replace the log at `key` with `payload`.
    ///
    /// # Errors
    /// See [`RecordStore::overwrite`].
    pub async fn overwrite(&self, key: &str, payload: &Payload) -> Result<()> {
        self.backend.overwrite(self.prefix(), key, payload).await
    }

    /// Read every entry of `key`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the key has no log.
    pub async fn read_all(&self, key: &str) -> Result<Vec<Payload>> {
        self.backend.read_all(self.prefix(), key).await
    }

    /// Read every entry of `key`, or `default` if it has no log.
    ///
    /// # Errors
    /// See [`RecordStore::read_all`].
    pub async fn read_all_or(&self, key: &str, default: Vec<Payload>) -> Result<Vec<Payload>> {
        self.backend.read_all_or(self.prefix(), key, default).await
    }

    /// Delete `key`, or everything under the prefix when `key` is empty.
    ///
    /// # Errors
    /// See [`RecordStore::remove`].
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.backend.remove(self.prefix(), key).await
    }

    /// Keys below `working_dir` matching `pattern`, relative to the prefix.
    ///
    /// # Errors
    /// Returns [`Error::InvalidKey`] on a malformed pattern.
    pub async fn glob(&self, pattern: &str, working_dir: &str) -> Result<Vec<String>> {
        self.backend.glob(self.prefix(), pattern, working_dir).await
    }

    /// Append, or overwrite when `overwrite` is set.
    ///
    /// # Errors
    /// See [`RecordStore::append`].
    pub async fn log_data(&self, payload: &Payload, key: &str, overwrite: bool) -> Result<()> {
        if overwrite {
            self.overwrite(key, payload).await
        } else {
            self.append(key, payload).await
        }
    }

    /// Alias of [`Client::read_all`].
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the key has no log.
    pub async fn load(&self, key: &str) -> Result<Vec<Payload>> {
        self.read_all(key).await
    }

    /// Append one line of text to [`OUTPUTS_KEY`].
    ///
    /// # Errors
    /// See [`RecordStore::append`].
    pub async fn log_text(&self, line: impl Into<String>) -> Result<()> {
        self.append(OUTPUTS_KEY, &Payload::Text(line.into())).await
    }

    /// Append a parameters record to [`PARAMETERS_KEY`].
    ///
    /// # Errors
    /// Returns [`Error::Serialization`] if `params` cannot be encoded.
    pub async fn log_params<T: Serialize + ?Sized>(&self, params: &T) -> Result<()> {
        let payload = Payload::json(params)?;
        self.append(PARAMETERS_KEY, &payload).await
    }

    /// Append one metrics row, tagged with `step`, to [`METRICS_KEY`].
    ///
    /// # Errors
    /// Returns [`Error::Serialization`] unless `metrics` encodes to a JSON
    /// object.
    pub async fn log_metrics<T: Serialize + ?Sized>(&self, step: u64, metrics: &T) -> Result<()> {
        let serde_json::Value::Object(mut row) = serde_json::to_value(metrics)? else {
            return Err(Error::Serialization(
                "metrics must serialize to a JSON object".to_string(),
            ));
        };
        row.insert("step".to_string(), step.into());
        self.append(METRICS_KEY, &Payload::Json(row.into())).await
    }

    /// Lap timer keyed by `key`.
    ///
    /// Returns `None` on the first call and the time since the previous call
    /// afterwards.
    pub fn split(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.splits
            .insert(key.to_string(), now)
            .map(|previous| now.duration_since(previous))
    }

    /// Queue a signal for this handle's own prefix.
    ///
    /// # Errors
    /// See [`Client::send_signal_to`].
    pub async fn send_signal(&self, signal: &str, payload: Option<SignalValue>) -> Result<()> {
        self.send_signal_to(self.prefix(), signal, payload).await
    }

    /// Queue a signal for the job running under `prefix`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidKey`] for a prefix outside the root and
    /// [`Error::Unavailable`] if the server cannot be reached.
    pub async fn send_signal_to(
        &self,
        prefix: &str,
        signal: &str,
        payload: Option<SignalValue>,
    ) -> Result<()> {
        match &self.backend {
            Backend::Local { signals, .. } => signals.send_signal(prefix, signal, payload),
            Backend::Remote(remote) => remote.send_signal(prefix, signal, payload).await,
        }
    }

    /// Record a heartbeat under `key` and take every pending signal.
    ///
    /// # Errors
    /// Returns [`Error::Unavailable`] if the server cannot be reached.
    pub async fn ping(&self, key: &str, interval: Option<Duration>) -> Result<Vec<Signal>> {
        match &self.backend {
            Backend::Local { signals, .. } => signals.ping(self.prefix(), key, interval),
            Backend::Remote(remote) => remote.ping(self.prefix(), key, interval).await,
        }
    }

    /// Heartbeats recorded for this handle's prefix.
    ///
    /// # Errors
    /// Returns [`Error::Unavailable`] if the server cannot be reached.
    pub async fn heartbeats(&self) -> Result<Vec<Heartbeat>> {
        match &self.backend {
            Backend::Local { signals, .. } => signals.heartbeats(self.prefix()),
            Backend::Remote(remote) => remote.heartbeats(self.prefix()).await,
        }
    }

    /// Ping until at least one signal arrives or `timeout` elapses.
    ///
    /// Polls with exponential backoff from 50ms up to 1s. `Unavailable`
    /// errors are retried until the deadline; others are returned at once.
    /// Returns an empty vector on timeout.
    ///
    /// # Errors
    /// Returns the first non-retryable error, or the last `Unavailable`
    /// error if the deadline passes while the server is unreachable.
    pub async fn wait_for_signal(&self, key: &str, timeout: Duration) -> Result<Vec<Signal>> {
        const MAX_BACKOFF: Duration = Duration::from_secs(1);

        let deadline = tokio::time::Instant::now() + timeout;
        let mut backoff = Duration::from_millis(50);
        loop {
            let last_err = match self.ping(key, Some(backoff)).await {
                Ok(signals) if !signals.is_empty() => return Ok(signals),
                Ok(_) => None,
                Err(e) if e.is_retryable() => Some(e),
                Err(e) => return Err(e),
            };

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return last_err.map_or_else(|| Ok(Vec::new()), Err);
            }
            tokio::time::sleep(backoff.min(deadline - now)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}
