//! In-process broker backend.
//!
//! A complete implementation of the broker seam backed by process-local
//! state: per-connection subscription sets, channel fan-out, Redis-style
//! glob pattern matching, and delivery counts. Multiple sessions connected
//! to one [`MemoryBroker`] exchange messages, which makes it the backend for
//! integration tests and local development.
//!
//! Failure injection (`refuse_connections`, `fail_subscribe`, `fail_publish`,
//! delays, `drop_all_streams`) lets tests drive every error path the session
//! manager has without a real broker.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use globset::{Glob, GlobMatcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use beacon_core::{BrokerError, BrokerEvent, SubscriptionKind};

use super::{Broker, BrokerConnection, EventStream, SubscriptionControl};

/// One connection's subscription stream.
struct StreamState {
    tx: mpsc::UnboundedSender<BrokerEvent>,
    channels: Vec<String>,
    patterns: Vec<(String, GlobMatcher)>,
}

impl StreamState {
    fn active(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }
}

#[derive(Default)]
struct State {
    next_id: u64,
    /// Connections currently open (handshake done, not closed).
    connections: HashSet<u64>,
    /// Subscription streams keyed by connection id.
    streams: HashMap<u64, StreamState>,
    refuse_connections: bool,
    required_password: Option<String>,
    connect_delay: Option<Duration>,
    publish_delay: Option<Duration>,
    fail_publish: bool,
    /// Keys whose (p)subscribe calls the broker rejects.
    fail_subscribe: HashSet<String>,
}

/// In-process broker. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse all further connection attempts.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse_connections = refuse;
    }

    /// Require this password on handshake; mismatch fails with
    /// [`BrokerError::AuthRejected`].
    pub fn require_password(&self, password: impl Into<String>) {
        self.state.lock().required_password = Some(password.into());
    }

    /// Delay handshakes, for driving connect timeouts.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = Some(delay);
    }

    /// Delay publishes, for driving publish timeouts.
    pub fn set_publish_delay(&self, delay: Duration) {
        self.state.lock().publish_delay = Some(delay);
    }

    /// Reject every publish with a protocol error.
    pub fn fail_publish(&self, fail: bool) {
        self.state.lock().fail_publish = fail;
    }

    /// Reject (p)subscribe calls for `key`.
    pub fn fail_subscribe(&self, key: impl Into<String>) {
        let _ = self.state.lock().fail_subscribe.insert(key.into());
    }

    /// Terminate every subscription stream, as a broker-side close would.
    /// Connections stay open; only the streams end.
    pub fn drop_all_streams(&self) {
        let mut state = self.state.lock();
        state.streams.clear();
    }

    /// Number of currently open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }
}

/// Password segment of `scheme://:password@host`, decoded, if present.
fn url_password(url: &str) -> Option<String> {
    let rest = url.split_once("://")?.1;
    let (auth, _) = rest.rsplit_once('@')?;
    let encoded = auth.strip_prefix(':')?;
    Some(
        percent_encoding::percent_decode_str(encoded)
            .decode_utf8_lossy()
            .into_owned(),
    )
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let (delay, refuse, required) = {
            let state = self.state.lock();
            (
                state.connect_delay,
                state.refuse_connections,
                state.required_password.clone(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
            if delay >= timeout {
                return Err(BrokerError::Timeout);
            }
        }
        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(BrokerError::Protocol(format!("unsupported url: {url}")));
        }
        if refuse {
            return Err(BrokerError::Refused);
        }
        if let Some(required) = required {
            if url_password(url).as_deref() != Some(required.as_str()) {
                return Err(BrokerError::AuthRejected);
            }
        }

        let id = {
            let mut state = self.state.lock();
            state.next_id += 1;
            let id = state.next_id;
            let _ = state.connections.insert(id);
            id
        };
        debug!(conn_id = id, url, "memory broker connection opened");
        Ok(Arc::new(MemoryConnection {
            id,
            state: Arc::clone(&self.state),
        }))
    }
}

/// One open connection to a [`MemoryBroker`].
struct MemoryConnection {
    id: u64,
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn subscriber(
        &self,
    ) -> Result<(Arc<dyn SubscriptionControl>, EventStream), BrokerError> {
        let mut state = self.state.lock();
        if !state.connections.contains(&self.id) {
            return Err(BrokerError::ConnectionClosed);
        }
        if state.streams.contains_key(&self.id) {
            return Err(BrokerError::Protocol(
                "subscriber already attached".into(),
            ));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = state.streams.insert(
            self.id,
            StreamState {
                tx,
                channels: Vec::new(),
                patterns: Vec::new(),
            },
        );
        let control = Arc::new(MemoryControl {
            id: self.id,
            state: Arc::clone(&self.state),
        });
        Ok((control, rx))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BrokerError> {
        let delay = self.state.lock().publish_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock();
        if !state.connections.contains(&self.id) {
            return Err(BrokerError::ConnectionClosed);
        }
        if state.fail_publish {
            return Err(BrokerError::Protocol("publish rejected".into()));
        }
        let mut receivers = 0;
        for stream in state.streams.values() {
            if stream.channels.iter().any(|c| c == channel) {
                // A dropped receive half just means the subscriber went away.
                let _ = stream.tx.send(BrokerEvent::Message {
                    channel: channel.to_string(),
                    payload: payload.to_string(),
                });
                receivers += 1;
            }
            for (pattern, matcher) in &stream.patterns {
                if matcher.is_match(channel) {
                    let _ = stream.tx.send(BrokerEvent::PatternMessage {
                        pattern: pattern.clone(),
                        channel: channel.to_string(),
                        payload: payload.to_string(),
                    });
                    receivers += 1;
                }
            }
        }
        Ok(receivers)
    }

    fn close(&self) {
        let mut state = self.state.lock();
        let _ = state.connections.remove(&self.id);
        let _ = state.streams.remove(&self.id);
        debug!(conn_id = self.id, "memory broker connection closed");
    }
}

/// Control half of a [`MemoryConnection`]'s subscription stream.
struct MemoryControl {
    id: u64,
    state: Arc<Mutex<State>>,
}

impl MemoryControl {
    fn with_stream<R>(
        &self,
        f: impl FnOnce(&mut StreamState) -> Result<R, BrokerError>,
    ) -> Result<R, BrokerError> {
        let mut state = self.state.lock();
        if !state.connections.contains(&self.id) {
            return Err(BrokerError::ConnectionClosed);
        }
        let stream = state
            .streams
            .get_mut(&self.id)
            .ok_or(BrokerError::ConnectionClosed)?;
        f(stream)
    }

    fn check_rejected(&self, key: &str) -> Result<(), BrokerError> {
        if self.state.lock().fail_subscribe.contains(key) {
            return Err(BrokerError::Protocol(format!(
                "subscription refused: {key}"
            )));
        }
        Ok(())
    }

    fn ack(stream: &StreamState, kind: SubscriptionKind, key: &str, subscribed: bool) {
        let event = if subscribed {
            BrokerEvent::Subscribed {
                kind,
                key: key.to_string(),
                active: stream.active(),
            }
        } else {
            BrokerEvent::Unsubscribed {
                kind,
                key: key.to_string(),
                active: stream.active(),
            }
        };
        let _ = stream.tx.send(event);
    }
}

#[async_trait]
impl SubscriptionControl for MemoryControl {
    async fn subscribe(&self, channel: &str) -> Result<(), BrokerError> {
        self.check_rejected(channel)?;
        self.with_stream(|stream| {
            if !stream.channels.iter().any(|c| c == channel) {
                stream.channels.push(channel.to_string());
            }
            Self::ack(stream, SubscriptionKind::Channel, channel, true);
            Ok(())
        })
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BrokerError> {
        self.with_stream(|stream| {
            stream.channels.retain(|c| c != channel);
            Self::ack(stream, SubscriptionKind::Channel, channel, false);
            Ok(())
        })
    }

    async fn psubscribe(&self, pattern: &str) -> Result<(), BrokerError> {
        self.check_rejected(pattern)?;
        let matcher = Glob::new(pattern)
            .map_err(|e| BrokerError::Protocol(format!("invalid pattern {pattern:?}: {e}")))?
            .compile_matcher();
        self.with_stream(|stream| {
            if !stream.patterns.iter().any(|(p, _)| p == pattern) {
                stream.patterns.push((pattern.to_string(), matcher));
            }
            Self::ack(stream, SubscriptionKind::Pattern, pattern, true);
            Ok(())
        })
    }

    async fn punsubscribe(&self, pattern: &str) -> Result<(), BrokerError> {
        self.with_stream(|stream| {
            stream.patterns.retain(|(p, _)| p != pattern);
            Self::ack(stream, SubscriptionKind::Pattern, pattern, false);
            Ok(())
        })
    }
}
