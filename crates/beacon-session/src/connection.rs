//! Connection handle — owns the lifetime of one broker connection and its
//! dedicated subscription stream.
//!
//! All state lives under a single `parking_lot::Mutex` that is never held
//! across an `.await`: network round-trips run on `Arc`s cloned out of the
//! lock, so a command call can never block the dispatcher (or another
//! command) through this handle.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use tokio::time::timeout as bounded;
use tracing::{debug, info};

use beacon_core::SessionError;

use crate::broker::{Broker, BrokerConnection, EventStream, SubscriptionControl};
use crate::metrics::CONNECTS_TOTAL;

/// Connection lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No connection; commands fail with `NotConnected`.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected; the subscription stream is live.
    Connected,
}

struct ConnState {
    status: ConnectionStatus,
    conn: Option<Arc<dyn BrokerConnection>>,
    /// Present iff `status == Connected`.
    control: Option<Arc<dyn SubscriptionControl>>,
    /// Bumped on every transition; lets a superseded open attempt or a
    /// stale dispatcher detect that it lost the race.
    generation: u64,
}

/// Owns one broker connection plus its subscription stream.
pub struct ConnectionHandle {
    state: Mutex<ConnState>,
}

impl Default for ConnectionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHandle {
    /// Create a disconnected handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnState {
                status: ConnectionStatus::Disconnected,
                conn: None,
                control: None,
                generation: 0,
            }),
        }
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.state.lock().status
    }

    /// Whether the connection is established.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Establish a connection and its subscription stream.
    ///
    /// Any prior connection is closed first. On success returns the event
    /// stream for the dispatcher plus the generation stamp identifying this
    /// connection. On failure every partially acquired resource is released
    /// and the status returns to `Disconnected`.
    pub async fn open(
        &self,
        broker: &dyn Broker,
        url: &str,
        timeout: Duration,
    ) -> Result<(EventStream, u64), SessionError> {
        let my_gen = {
            let mut state = self.state.lock();
            if let Some(prior) = state.conn.take() {
                prior.close();
            }
            state.control = None;
            state.status = ConnectionStatus::Connecting;
            state.generation += 1;
            state.generation
        };

        let conn = match bounded(timeout, broker.connect(url, timeout)).await {
            Err(_) => {
                self.fail_connect(my_gen);
                return Err(SessionError::Timeout {
                    operation: "connect",
                    after: timeout,
                });
            }
            Ok(Err(source)) => {
                self.fail_connect(my_gen);
                return Err(SessionError::Connect { source });
            }
            Ok(Ok(conn)) => conn,
        };

        let (control, events) = match bounded(timeout, conn.subscriber()).await {
            Err(_) => {
                conn.close();
                self.fail_connect(my_gen);
                return Err(SessionError::Timeout {
                    operation: "connect",
                    after: timeout,
                });
            }
            Ok(Err(source)) => {
                conn.close();
                self.fail_connect(my_gen);
                return Err(SessionError::Connect { source });
            }
            Ok(Ok(pair)) => pair,
        };

        {
            let mut state = self.state.lock();
            if state.generation != my_gen {
                // A concurrent close (or newer open) superseded this attempt.
                drop(state);
                conn.close();
                return Err(SessionError::NotConnected);
            }
            state.conn = Some(conn);
            state.control = Some(control);
            state.status = ConnectionStatus::Connected;
        }
        counter!(CONNECTS_TOTAL).increment(1);
        info!("broker connection established");
        Ok((events, my_gen))
    }

    /// Roll status back to `Disconnected` after a failed attempt, unless a
    /// concurrent transition already moved past this attempt.
    fn fail_connect(&self, my_gen: u64) {
        let mut state = self.state.lock();
        if state.generation == my_gen && state.status == ConnectionStatus::Connecting {
            state.status = ConnectionStatus::Disconnected;
        }
    }

    /// Close the connection if present. Never fails and never suspends;
    /// safe to call at any time, including concurrently with in-flight
    /// commands (they resolve `NotConnected`).
    pub fn close(&self) {
        let conn = {
            let mut state = self.state.lock();
            state.status = ConnectionStatus::Disconnected;
            state.control = None;
            state.generation += 1;
            state.conn.take()
        };
        if let Some(conn) = conn {
            conn.close();
            debug!("broker connection closed");
        }
    }

    /// Clone the subscription control out of the lock for a command call.
    pub fn subscription_control(&self) -> Result<Arc<dyn SubscriptionControl>, SessionError> {
        let state = self.state.lock();
        match (state.status, &state.control) {
            (ConnectionStatus::Connected, Some(control)) => Ok(Arc::clone(control)),
            _ => Err(SessionError::NotConnected),
        }
    }

    /// Publish on the command path with a bounded timeout.
    ///
    /// Concurrent publishes each run on their own cloned handle; none holds
    /// the state lock across the round-trip.
    pub async fn publish(
        &self,
        channel: &str,
        payload: &str,
        timeout: Duration,
    ) -> Result<usize, SessionError> {
        let conn = {
            let state = self.state.lock();
            if state.status != ConnectionStatus::Connected {
                return Err(SessionError::NotConnected);
            }
            state.conn.clone().ok_or(SessionError::NotConnected)?
        };
        match bounded(timeout, conn.publish(channel, payload)).await {
            Err(_) => Err(SessionError::Timeout {
                operation: "publish",
                after: timeout,
            }),
            Ok(Err(source)) => Err(SessionError::Publish {
                channel: channel.to_string(),
                source,
            }),
            Ok(Ok(receivers)) => Ok(receivers),
        }
    }

    /// Record broker-initiated stream termination for `generation`.
    ///
    /// Returns `false` if that connection is no longer current (a user
    /// close or a newer connect already moved on) — the caller must not
    /// touch shared state in that case.
    pub fn mark_stream_closed(&self, generation: u64) -> bool {
        let conn = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return false;
            }
            state.status = ConnectionStatus::Disconnected;
            state.control = None;
            state.generation += 1;
            state.conn.take()
        };
        if let Some(conn) = conn {
            conn.close();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use assert_matches::assert_matches;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn open_establishes_connection() {
        let broker = MemoryBroker::new();
        let handle = ConnectionHandle::new();
        let (_events, generation) = handle
            .open(&broker, "redis://localhost:6379", TIMEOUT)
            .await
            .unwrap();
        assert!(handle.is_open());
        assert_eq!(generation, 1);
        assert!(handle.subscription_control().is_ok());
    }

    #[tokio::test]
    async fn failed_open_leaves_disconnected_and_no_resources() {
        let broker = MemoryBroker::new();
        broker.refuse_connections(true);
        let handle = ConnectionHandle::new();

        let err = handle
            .open(&broker, "redis://localhost:6379", TIMEOUT)
            .await
            .unwrap_err();
        assert_matches!(err, SessionError::Connect { .. });
        assert_eq!(handle.status(), ConnectionStatus::Disconnected);
        assert_eq!(broker.connection_count(), 0);
        assert_matches!(
            handle.subscription_control().err(),
            Some(SessionError::NotConnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_surfaces_timeout_error() {
        let broker = MemoryBroker::new();
        broker.set_connect_delay(Duration::from_secs(30));
        let handle = ConnectionHandle::new();

        let err = handle
            .open(&broker, "redis://localhost:6379", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(handle.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn reopen_closes_prior_connection() {
        let broker = MemoryBroker::new();
        let handle = ConnectionHandle::new();
        let (mut old_events, _) = handle
            .open(&broker, "redis://localhost:6379", TIMEOUT)
            .await
            .unwrap();
        let _ = handle
            .open(&broker, "redis://localhost:6379", TIMEOUT)
            .await
            .unwrap();

        assert_eq!(broker.connection_count(), 1);
        // The superseded stream ends.
        assert!(old_events.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let broker = MemoryBroker::new();
        let handle = ConnectionHandle::new();
        let _ = handle
            .open(&broker, "redis://localhost:6379", TIMEOUT)
            .await
            .unwrap();
        handle.close();
        handle.close();
        assert_eq!(handle.status(), ConnectionStatus::Disconnected);
        assert_eq!(broker.connection_count(), 0);
    }

    #[tokio::test]
    async fn publish_requires_connection() {
        let handle = ConnectionHandle::new();
        assert_matches!(
            handle.publish("c", "p", TIMEOUT).await.err(),
            Some(SessionError::NotConnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn publish_timeout_surfaces_timeout_error() {
        let broker = MemoryBroker::new();
        broker.set_publish_delay(Duration::from_secs(30));
        let handle = ConnectionHandle::new();
        let _ = handle
            .open(&broker, "redis://localhost:6379", TIMEOUT)
            .await
            .unwrap();

        let err = handle
            .publish("c", "p", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn stale_generation_does_not_close_current_connection() {
        let broker = MemoryBroker::new();
        let handle = ConnectionHandle::new();
        let (_e1, gen1) = handle
            .open(&broker, "redis://localhost:6379", TIMEOUT)
            .await
            .unwrap();
        let (_e2, gen2) = handle
            .open(&broker, "redis://localhost:6379", TIMEOUT)
            .await
            .unwrap();
        assert_ne!(gen1, gen2);

        assert!(!handle.mark_stream_closed(gen1));
        assert!(handle.is_open());

        assert!(handle.mark_stream_closed(gen2));
        assert_eq!(handle.status(), ConnectionStatus::Disconnected);
    }
}
