//! Broker collaborator seam.
//!
//! The session manager never speaks the wire protocol itself — it drives a
//! broker client through these traits. A backend must provide:
//!
//! - a handshake ([`Broker::connect`]) with a bounded timeout,
//! - one dedicated subscription stream per connection: a control half for
//!   issuing (p)(un)subscribe commands and a receive half delivering
//!   [`BrokerEvent`]s in broker order,
//! - a command path for `publish` returning the receiver count.
//!
//! [`memory::MemoryBroker`] is the in-process backend used by tests and
//! local development.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use beacon_core::{BrokerError, BrokerEvent};

/// Receive half of a subscription stream.
///
/// Yields events in the order the broker delivered them; the channel closing
/// (`None`) means the broker terminated the stream.
pub type EventStream = mpsc::UnboundedReceiver<BrokerEvent>;

/// Factory for broker connections.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Handshake with the broker at `url`.
    ///
    /// The backend must give up within `timeout`; the session applies its
    /// own bound on top as a backstop.
    async fn connect(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError>;
}

/// One established broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync + std::fmt::Debug {
    /// Open the dedicated subscription stream for this connection.
    ///
    /// At most one stream per connection; a second call fails.
    async fn subscriber(
        &self,
    ) -> Result<(Arc<dyn SubscriptionControl>, EventStream), BrokerError>;

    /// Publish `payload` to `channel`; returns the number of subscribers
    /// (channel plus matching pattern subscriptions) that received it.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BrokerError>;

    /// Tear the connection down. Infallible and non-suspending so that
    /// disconnect always completes.
    fn close(&self);
}

/// Control half of a subscription stream.
#[async_trait]
pub trait SubscriptionControl: Send + Sync {
    /// Subscribe to an exact channel.
    async fn subscribe(&self, channel: &str) -> Result<(), BrokerError>;
    /// Unsubscribe from an exact channel.
    async fn unsubscribe(&self, channel: &str) -> Result<(), BrokerError>;
    /// Subscribe to a glob pattern.
    async fn psubscribe(&self, pattern: &str) -> Result<(), BrokerError>;
    /// Unsubscribe from a glob pattern.
    async fn punsubscribe(&self, pattern: &str) -> Result<(), BrokerError>;
}
