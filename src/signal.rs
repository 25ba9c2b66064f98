//! Signal/heartbeat channel
//!
//! One mailbox per experiment prefix. Controllers queue signals with
//! [`SignalChannel::send_signal`]; the running job polls with
//! [`SignalChannel::ping`], which records a heartbeat and drains everything
//! queued since its previous poll. Delivery is at-most-once and `ping` never
//! waits for a signal to arrive.
//!
//! ## Mailbox lifecycle
//!
//! ```text
//! Uninitialized ──send_signal──> Signaled ──ping──> Idle
//!       │                           ▲                 │
//!       └──────────ping───────> Idle └──send_signal───┘
//! ```
//!
//! ## Retention
//!
//! A mailbox that has seen neither a `ping` nor a `send_signal` for the
//! retention window is evicted by [`SignalChannel::sweep`], together with
//! its undelivered signals and heartbeats. A job that keeps polling keeps
//! its mailbox alive indefinitely.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::path::normalize_prefix;
use crate::{Error, Result};

/// Default retention window for idle mailboxes.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Optional value carried by a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    /// Numeric payload, e.g. a new learning rate
    Number(f64),
    /// String payload
    Text(String),
}

impl SignalValue {
    /// Reject numbers JSON cannot carry, so they are never delivered as `null`.
    ///
    /// # Errors
    /// Returns [`Error::Serialization`] for NaN or infinite numbers.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Number(v) if !v.is_finite() => Err(Error::Serialization(format!(
                "signal payload {v} is not finite"
            ))),
            _ => Ok(()),
        }
    }
}

impl From<f64> for SignalValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for SignalValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SignalValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// One queued occurrence of a signal.
///
/// Equality ignores the internal queue position, so a signal compares equal
/// to its copy decoded off the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Signal name, e.g. `stop` or `pause`
    pub name: String,
    /// Optional payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<SignalValue>,
    /// When the signal was queued
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip)]
    seq: u64,
}

impl PartialEq for Signal {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.payload == other.payload
            && self.enqueued_at == other.enqueued_at
    }
}

/// Last heartbeat recorded under a liveness key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Liveness key passed to `ping`, e.g. `alive` or `completed`
    pub key: String,
    /// Time of the most recent ping
    pub last_seen: DateTime<Utc>,
    /// Interval the job declared between pings
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
}

impl Heartbeat {
    /// Whether the job has missed its declared interval as of `now`.
    ///
    /// Always `false` when no interval was declared.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        let Some(interval) = self.interval else {
            return false;
        };
        chrono::Duration::from_std(interval)
            .ok()
            .and_then(|interval| self.last_seen.checked_add_signed(interval))
            .is_some_and(|due| due < now)
    }
}

/// Observable state of a prefix's mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailboxState {
    /// No mailbox exists (never used, or evicted)
    Uninitialized,
    /// Mailbox exists with nothing queued
    Idle,
    /// At least one signal is waiting for the next ping
    Signaled,
}

#[derive(Debug)]
struct Mailbox {
    queues: FxHashMap<String, Vec<Signal>>,
    heartbeats: FxHashMap<String, Heartbeat>,
    last_activity: Instant,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self {
            queues: FxHashMap::default(),
            heartbeats: FxHashMap::default(),
            last_activity: Instant::now(),
        }
    }
}

impl Mailbox {
    fn pending(&self) -> usize {
        self.queues.values().map(Vec::len).sum()
    }

    fn drain(&mut self) -> Vec<Signal> {
        let mut signals: Vec<Signal> = self.queues.drain().flat_map(|(_, q)| q).collect();
        signals.sort_by_key(|s| s.seq);
        signals
    }
}

/// Per-prefix signal mailboxes and heartbeats.
///
/// Each mailbox is a separate map entry; operations on one prefix never
/// wait on another prefix.
#[derive(Debug)]
pub struct SignalChannel {
    mailboxes: DashMap<String, Mailbox>,
    retention: Duration,
    seq: AtomicU64,
}

impl Default for SignalChannel {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl SignalChannel {
    /// Create a channel evicting mailboxes idle for longer than `retention`.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            mailboxes: DashMap::new(),
            retention,
            seq: AtomicU64::new(0),
        }
    }

    /// Configured retention window.
    #[must_use]
    pub const fn retention(&self) -> Duration {
        self.retention
    }

    /// Number of live mailboxes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    /// Check if no mailbox exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }

    /// Queue a signal for the next `ping` on `prefix`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidKey`] if the prefix escapes the root and
    /// [`Error::Serialization`] for a non-finite numeric payload.
    pub fn send_signal(
        &self,
        prefix: &str,
        name: &str,
        payload: Option<SignalValue>,
    ) -> Result<()> {
        let prefix = normalize_prefix(prefix)?;
        if let Some(payload) = &payload {
            payload.validate()?;
        }
        debug!(prefix = %prefix, signal = name, "send_signal");

        // seq is taken under the entry guard so queue order matches seq order
        let mut mailbox = self.mailboxes.entry(prefix).or_default();
        let signal = Signal {
            name: name.to_string(),
            payload,
            enqueued_at: Utc::now(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        mailbox.last_activity = Instant::now();
        mailbox.queues.entry(signal.name.clone()).or_default().push(signal);
        Ok(())
    }

    /// Record a heartbeat and drain every pending signal in queue order.
    ///
    /// Returns immediately; an empty vector means nothing was queued.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidKey`] if the prefix escapes the root.
    pub fn ping(
        &self,
        prefix: &str,
        liveness_key: &str,
        interval: Option<Duration>,
    ) -> Result<Vec<Signal>> {
        let prefix = normalize_prefix(prefix)?;
        let mut mailbox = self.mailboxes.entry(prefix.clone()).or_default();
        mailbox.last_activity = Instant::now();
        mailbox.heartbeats.insert(
            liveness_key.to_string(),
            Heartbeat {
                key: liveness_key.to_string(),
                last_seen: Utc::now(),
                interval,
            },
        );
        let signals = mailbox.drain();
        drop(mailbox);

        debug!(prefix = %prefix, key = liveness_key, delivered = signals.len(), "ping");
        Ok(signals)
    }

    /// Heartbeats recorded for `prefix`, sorted by key.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidKey`] if the prefix escapes the root.
    pub fn heartbeats(&self, prefix: &str) -> Result<Vec<Heartbeat>> {
        let prefix = normalize_prefix(prefix)?;
        let mut beats: Vec<Heartbeat> = self
            .mailboxes
            .get(&prefix)
            .map(|m| m.heartbeats.values().cloned().collect())
            .unwrap_or_default();
        beats.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(beats)
    }

    /// Current mailbox state for `prefix`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidKey`] if the prefix escapes the root.
    pub fn state(&self, prefix: &str) -> Result<MailboxState> {
        let prefix = normalize_prefix(prefix)?;
        Ok(match self.mailboxes.get(&prefix) {
            None => MailboxState::Uninitialized,
            Some(m) if m.pending() == 0 => MailboxState::Idle,
            Some(_) => MailboxState::Signaled,
        })
    }

    /// Evict mailboxes untouched for longer than the retention window.
    ///
    /// Returns the number of evicted mailboxes.
    pub fn sweep(&self) -> usize {
        let before = self.mailboxes.len();
        let retention = self.retention;
        self.mailboxes.retain(|prefix, mailbox| {
            let keep = mailbox.last_activity.elapsed() < retention;
            if !keep {
                info!(prefix = %prefix, dropped = mailbox.pending(), "evicting idle mailbox");
            }
            keep
        });
        before.saturating_sub(self.mailboxes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let channel = SignalChannel::default();
        assert_eq!(channel.state("p").unwrap(), MailboxState::Uninitialized);

        channel.ping("p", "alive", None).unwrap();
        assert_eq!(channel.state("p").unwrap(), MailboxState::Idle);

        channel.send_signal("p", "stop", None).unwrap();
        assert_eq!(channel.state("p").unwrap(), MailboxState::Signaled);

        channel.ping("p", "alive", None).unwrap();
        assert_eq!(channel.state("p").unwrap(), MailboxState::Idle);
    }

    #[test]
    fn test_send_before_ping_creates_mailbox() {
        let channel = SignalChannel::default();
        channel.send_signal("p", "pause", Some(1.0.into())).unwrap();
        assert_eq!(channel.state("p").unwrap(), MailboxState::Signaled);

        let signals = channel.ping("p", "alive", None).unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].payload, Some(SignalValue::Number(1.0)));
    }

    #[test]
    fn test_drain_keeps_global_order_across_names() {
        let channel = SignalChannel::default();
        channel.send_signal("p", "stop", None).unwrap();
        channel.send_signal("p", "pause", None).unwrap();
        channel.send_signal("p", "stop", Some("again".into())).unwrap();

        let names: Vec<_> = channel
            .ping("p", "alive", None)
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["stop", "pause", "stop"]);
    }

    #[test]
    fn test_prefixes_are_normalized() {
        let channel = SignalChannel::default();
        channel.send_signal("exp//run/", "stop", None).unwrap();
        assert_eq!(channel.ping("exp/run", "alive", None).unwrap().len(), 1);
    }

    #[test]
    fn test_sweep_zero_retention_evicts() {
        let channel = SignalChannel::new(Duration::ZERO);
        channel.send_signal("p", "stop", None).unwrap();
        assert_eq!(channel.sweep(), 1);
        assert_eq!(channel.state("p").unwrap(), MailboxState::Uninitialized);
        assert!(channel.ping("p", "alive", None).unwrap().is_empty());
    }

    #[test]
    fn test_sweep_keeps_active_mailboxes() {
        let channel = SignalChannel::new(Duration::from_secs(3600));
        channel.send_signal("p", "stop", None).unwrap();
        assert_eq!(channel.sweep(), 0);
        assert_eq!(channel.len(), 1);
    }

    #[test]
    fn test_heartbeat_overdue() {
        let beat = Heartbeat {
            key: "alive".into(),
            last_seen: Utc::now() - chrono::Duration::seconds(10),
            interval: Some(Duration::from_secs(1)),
        };
        assert!(beat.is_overdue(Utc::now()));

        let no_interval = Heartbeat {
            interval: None,
            ..beat
        };
        assert!(!no_interval.is_overdue(Utc::now()));
    }

    #[test]
    fn test_huge_interval_is_never_overdue() {
        let beat = Heartbeat {
            key: "alive".into(),
            last_seen: Utc::now(),
            interval: Some(Duration::from_secs(10_000_000_000_000)),
        };
        assert!(!beat.is_overdue(Utc::now()));
        assert!(!beat.is_overdue(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn test_non_finite_payload_rejected() {
        let channel = SignalChannel::default();
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = channel.send_signal("p", "lr", Some(value.into())).unwrap_err();
            assert!(matches!(err, Error::Serialization(_)));
        }
        assert_eq!(channel.state("p").unwrap(), MailboxState::Uninitialized);
        assert!(SignalValue::Text("NaN".into()).validate().is_ok());
    }

    #[test]
    fn test_signal_equals_its_wire_copy() {
        let channel = SignalChannel::default();
        channel.send_signal("p", "warmup", None).unwrap();
        channel.send_signal("p", "lr", Some(0.1.into())).unwrap();
        let signals = channel.ping("p", "alive", None).unwrap();

        let wire = serde_json::to_string(&signals[1]).unwrap();
        let decoded: Signal = serde_json::from_str(&wire).unwrap();
        assert_eq!(decoded, signals[1]);
        assert_ne!(decoded, signals[0]);
    }

    #[test]
    fn test_delivery_order_is_monotonic_under_concurrent_sends() {
        let channel = std::sync::Arc::new(SignalChannel::default());
        let senders: Vec<_> = (0..4)
            .map(|t| {
                let channel = std::sync::Arc::clone(&channel);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        channel.send_signal("p", &format!("s{t}-{i}"), None).unwrap();
                    }
                })
            })
            .collect();

        let mut delivered = Vec::new();
        while delivered.len() < 800 {
            delivered.extend(channel.ping("p", "alive", None).unwrap());
            std::thread::yield_now();
        }
        for sender in senders {
            sender.join().unwrap();
        }

        assert!(delivered.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[test]
    fn test_heartbeats_recorded_per_key() {
        let channel = SignalChannel::default();
        channel.ping("p", "alive", Some(Duration::from_millis(100))).unwrap();
        channel.ping("p", "completed", None).unwrap();

        let beats = channel.heartbeats("p").unwrap();
        let keys: Vec<_> = beats.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, vec!["alive", "completed"]);
        assert_eq!(beats[0].interval, Some(Duration::from_millis(100)));
        assert!(channel.heartbeats("other").unwrap().is_empty());
    }
}
