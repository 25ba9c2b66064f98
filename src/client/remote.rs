//! HTTP transport to a logging server.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;
use url::Url;

use crate::payload::Payload;
use crate::protocol::{
    GlobRequest, GlobResponse, Health, HeartbeatsResponse, KeyRequest, Operation, PingRequest,
    PingResponse, PrefixRequest, ReadAllResponse, SendSignalRequest, WireError, WriteRequest,
};
use crate::record::RecordStore;
use crate::signal::{Heartbeat, Signal, SignalValue};
use crate::{Error, Result};

/// Client for the server's wire protocol.
///
/// Every call is one request/response round trip bounded by the configured
/// timeout; a timeout or connection failure surfaces as
/// [`Error::Unavailable`].
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    base: Url,
}

impl RemoteClient {
    /// Create a client for the server at `base`.
    ///
    /// # Errors
    /// Returns [`Error::Unavailable`] if the HTTP client cannot be built.
    pub fn new(mut base: Url, timeout: Duration) -> Result<Self> {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base })
    }

    /// Server base URL.
    #[must_use]
    pub const fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::InvalidKey(format!("invalid endpoint {path:?}: {e}")))
    }

    async fn post<Req: Serialize + Sync>(&self, op: Operation, req: &Req) -> Result<Response> {
        let url = self.endpoint(&op.path())?;
        debug!(op = op.as_str(), %url, "remote call");
        let response = self.http.post(url).json(req).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn call<Req, Resp>(&self, op: Operation, req: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        Ok(self.post(op, req).await?.json().await?)
    }

    async fn call_unit<Req: Serialize + Sync>(&self, op: Operation, req: &Req) -> Result<()> {
        self.post(op, req).await.map(drop)
    }

    /// Queue a signal on the server.
    ///
    /// # Errors
    /// Returns the server's error unchanged, or [`Error::Unavailable`].
    pub async fn send_signal(
        &self,
        prefix: &str,
        signal: &str,
        payload: Option<SignalValue>,
    ) -> Result<()> {
        // JSON would turn a NaN into `null` and the payload would vanish
        if let Some(payload) = &payload {
            payload.validate()?;
        }
        let req = SendSignalRequest {
            prefix: prefix.to_string(),
            signal: signal.to_string(),
            payload,
        };
        self.call_unit(Operation::SendSignal, &req).await
    }

    /// Heartbeat and drain pending signals.
    ///
    /// # Errors
    /// Returns the server's error unchanged, or [`Error::Unavailable`].
    pub async fn ping(
        &self,
        prefix: &str,
        key: &str,
        interval: Option<Duration>,
    ) -> Result<Vec<Signal>> {
        let req = PingRequest {
            prefix: prefix.to_string(),
            key: key.to_string(),
            interval,
        };
        let resp: PingResponse = self.call(Operation::Ping, &req).await?;
        Ok(resp.signals)
    }

    /// Heartbeats recorded for `prefix`.
    ///
    /// # Errors
    /// Returns the server's error unchanged, or [`Error::Unavailable`].
    pub async fn heartbeats(&self, prefix: &str) -> Result<Vec<Heartbeat>> {
        let req = PrefixRequest {
            prefix: prefix.to_string(),
        };
        let resp: HeartbeatsResponse = self.call(Operation::Heartbeats, &req).await?;
        Ok(resp.heartbeats)
    }

    /// Query `GET /healthcheck`.
    ///
    /// # Errors
    /// Returns [`Error::Unavailable`] if the server cannot be reached.
    pub async fn health(&self) -> Result<Health> {
        let url = self.endpoint("healthcheck")?;
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response.json().await?)
    }
}

/// Map a non-success response back onto the error it carries.
async fn error_from_response(response: Response) -> Error {
    let status = response.status();
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => return Error::from(e),
    };
    match serde_json::from_slice::<WireError>(&body) {
        Ok(wire) => wire.into(),
        Err(_) if status == StatusCode::NOT_FOUND => {
            Error::Unavailable {
                message: "server does not speak protocol v1".to_string(),
                source: None,
            }
        }
        Err(_) => Error::Unavailable {
            message: format!("server returned {status}"),
            source: None,
        },
    }
}

impl RecordStore for RemoteClient {
    async fn append(&self, prefix: &str, key: &str, payload: &Payload) -> Result<()> {
        let req = WriteRequest {
            prefix: prefix.to_string(),
            key: key.to_string(),
            payload: payload.clone(),
        };
        self.call_unit(Operation::Append, &req).await
    }

    async fn overwrite(&self, prefix: &str, key: &str, payload: &Payload) -> Result<()> {
        let req = WriteRequest {
            prefix: prefix.to_string(),
            key: key.to_string(),
            payload: payload.clone(),
        };
        self.call_unit(Operation::Overwrite, &req).await
    }

    async fn read_all(&self, prefix: &str, key: &str) -> Result<Vec<Payload>> {
        let req = KeyRequest {
            prefix: prefix.to_string(),
            key: key.to_string(),
        };
        let resp: ReadAllResponse = self.call(Operation::ReadAll, &req).await?;
        Ok(resp.entries)
    }

    async fn remove(&self, prefix: &str, key: &str) -> Result<()> {
        let req = KeyRequest {
            prefix: prefix.to_string(),
            key: key.to_string(),
        };
        self.call_unit(Operation::Remove, &req).await
    }

    async fn glob(&self, prefix: &str, pattern: &str, working_dir: &str) -> Result<Vec<String>> {
        let req = GlobRequest {
            prefix: prefix.to_string(),
            pattern: pattern.to_string(),
            working_dir: working_dir.to_string(),
        };
        let resp: GlobResponse = self.call(Operation::Glob, &req).await?;
        Ok(resp.keys)
    }
}
