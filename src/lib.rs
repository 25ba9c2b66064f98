//! # ml-logger: experiment logging and control service
//!
//! Long-running jobs (training runs, sweeps) use ml-logger to persist
//! records under an experiment prefix and to exchange small control
//! signals with whoever is watching them.
//!
//! ## Components
//!
//! - [`path`]: maps `(prefix, key)` onto locations below a root, rejecting
//!   escapes
//! - [`record`]: append-only record logs with atomic overwrite and glob
//!   queries ([`glob`])
//! - [`signal`]: per-prefix mailboxes drained by heartbeat pings
//! - [`server`] / [`protocol`]: the same operations over HTTP
//! - [`client`]: one handle for local directories and remote servers
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use ml_logger::{Client, ClientConfig, Payload};
//!
//! # async fn example() -> ml_logger::Result<()> {
//! let logger = Client::new(ClientConfig::new("/tmp/ml-logger".parse()?, "exp/run-1"))?;
//!
//! logger.append("metrics/loss.pkl", &Payload::Scalar(0.9)).await?;
//! logger.append("metrics/loss.pkl", &Payload::Scalar(0.7)).await?;
//! let losses = logger.read_all("metrics/loss.pkl").await?;
//! assert_eq!(losses.len(), 2);
//!
//! let pickles = logger.glob("*.pkl", "metrics").await?;
//! assert_eq!(pickles, vec!["metrics/loss.pkl".to_string()]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod glob;
pub mod path;
pub mod payload;
pub mod protocol;
pub mod record;
pub mod server;
pub mod signal;

pub use client::Client;
pub use config::{ClientConfig, LogDirectory, ServerConfig};
pub use error::{Error, ErrorKind, Result};
pub use payload::{NumericArray, Payload};
pub use record::RecordStore;
pub use server::Server;
pub use signal::{Heartbeat, MailboxState, Signal, SignalChannel, SignalValue};
