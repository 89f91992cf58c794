//! Session façade — the public operation surface.
//!
//! A [`PubSubSession`] is an explicit object: callers construct it with a
//! broker collaborator and hold the instance, which keeps multiple
//! independent sessions possible and test setup deterministic. It owns all
//! shared state (connection, subscription registry, listener registry);
//! the dispatcher and connection handle only ever see `Arc`s it hands out.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, info};

use beacon_core::{BrokerConfig, SessionError, SubscriptionKey, SubscriptionKind};

use crate::broker::Broker;
use crate::connection::{ConnectionHandle, ConnectionStatus};
use crate::dispatcher;
use crate::metrics::DISCONNECTS_TOTAL;
use crate::registry::{ListenerHandle, ListenerRegistry, SubscriptionRegistry};

/// Session tuning knobs.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Bound applied to connect and publish round-trips.
    pub command_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(5),
        }
    }
}

/// What to connect to: a ready-made URL or structured configuration.
#[derive(Clone, Debug)]
pub enum ConnectTarget {
    /// A complete connection URL.
    Url(String),
    /// Structured fields, assembled via [`BrokerConfig::connection_url`].
    Config(BrokerConfig),
}

impl ConnectTarget {
    fn into_url(self) -> String {
        match self {
            Self::Url(url) => url,
            Self::Config(config) => config.connection_url(),
        }
    }
}

impl From<&str> for ConnectTarget {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<String> for ConnectTarget {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

impl From<BrokerConfig> for ConnectTarget {
    fn from(config: BrokerConfig) -> Self {
        Self::Config(config)
    }
}

/// One pub/sub session: a single multiplexed subscription connection, the
/// set of subscriptions believed active, and the registered listeners.
pub struct PubSubSession {
    broker: Arc<dyn Broker>,
    options: SessionOptions,
    connection: Arc<ConnectionHandle>,
    subscriptions: Arc<SubscriptionRegistry>,
    listeners: Arc<ListenerRegistry>,
}

impl PubSubSession {
    /// Create a disconnected session with default options.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self::with_options(broker, SessionOptions::default())
    }

    /// Create a disconnected session with explicit options.
    #[must_use]
    pub fn with_options(broker: Arc<dyn Broker>, options: SessionOptions) -> Self {
        Self {
            broker,
            options,
            connection: Arc::new(ConnectionHandle::new()),
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            listeners: Arc::new(ListenerRegistry::new()),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Connect to the broker and attach the event dispatcher.
    ///
    /// An existing connection is torn down first (its subscriptions are
    /// gone with it); registered listeners survive a reconnect. On failure
    /// the session is left `Disconnected` with nothing acquired.
    pub async fn connect(&self, target: impl Into<ConnectTarget>) -> Result<(), SessionError> {
        let url = target.into().into_url();
        // Tracked subscriptions belong to the connection being replaced.
        self.subscriptions.clear();
        let (events, generation) = self
            .connection
            .open(self.broker.as_ref(), &url, self.options.command_timeout)
            .await?;
        let _task = dispatcher::spawn(
            Arc::clone(&self.listeners),
            Arc::clone(&self.subscriptions),
            Arc::clone(&self.connection),
            events,
            generation,
        );
        info!("session connected");
        Ok(())
    }

    /// Disconnect and clear both registries.
    ///
    /// Always completes; safe to call when already disconnected and safe to
    /// call concurrently with in-flight operations (they resolve
    /// `NotConnected`).
    pub fn disconnect(&self) {
        let was_open = self.connection.is_open();
        self.connection.close();
        self.subscriptions.clear();
        self.listeners.clear();
        if was_open {
            counter!(DISCONNECTS_TOTAL, "reason" => "requested").increment(1);
            info!("session disconnected");
        }
    }

    // ── Subscription commands ────────────────────────────────────────────

    /// Subscribe to channels, in the supplied order.
    ///
    /// Best-effort per key: the first broker rejection aborts the remaining
    /// keys in this call and is returned naming the failed key; keys already
    /// processed stay subscribed.
    pub async fn subscribe<I, K>(&self, channels: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.change_subscriptions(SubscriptionKind::Channel, true, channels)
            .await
    }

    /// Subscribe to patterns, in the supplied order. Same partial-failure
    /// behavior as [`subscribe`](Self::subscribe).
    pub async fn psubscribe<I, K>(&self, patterns: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.change_subscriptions(SubscriptionKind::Pattern, true, patterns)
            .await
    }

    /// Unsubscribe from channels, in the supplied order.
    ///
    /// Each key is forgotten locally even when the broker call fails —
    /// the caller no longer wants delivery, regardless of transient broker
    /// trouble — but the first error is still surfaced and aborts the
    /// remaining keys.
    pub async fn unsubscribe<I, K>(&self, channels: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.change_subscriptions(SubscriptionKind::Channel, false, channels)
            .await
    }

    /// Unsubscribe from patterns. Same local-forget behavior as
    /// [`unsubscribe`](Self::unsubscribe).
    pub async fn punsubscribe<I, K>(&self, patterns: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.change_subscriptions(SubscriptionKind::Pattern, false, patterns)
            .await
    }

    async fn change_subscriptions<I, K>(
        &self,
        kind: SubscriptionKind,
        subscribing: bool,
        keys: I,
    ) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        // Connection precondition, checked before any broker call.
        let control = self.connection.subscription_control()?;
        for key in keys {
            let key: String = key.into();
            let result = match (kind, subscribing) {
                (SubscriptionKind::Channel, true) => control.subscribe(&key).await,
                (SubscriptionKind::Channel, false) => control.unsubscribe(&key).await,
                (SubscriptionKind::Pattern, true) => control.psubscribe(&key).await,
                (SubscriptionKind::Pattern, false) => control.punsubscribe(&key).await,
            };
            if subscribing {
                match result {
                    Ok(()) => {
                        self.subscriptions.record(kind, &key);
                        debug!(kind = %kind, key, "subscribed");
                    }
                    Err(source) => {
                        return Err(SessionError::Subscription { kind, key, source });
                    }
                }
            } else {
                self.subscriptions.forget(kind, &key);
                match result {
                    Ok(()) => debug!(kind = %kind, key, "unsubscribed"),
                    Err(source) => {
                        return Err(SessionError::Subscription { kind, key, source });
                    }
                }
            }
        }
        Ok(())
    }

    // ── Publish ──────────────────────────────────────────────────────────

    /// Publish `payload` to `channel`; returns the number of subscribers
    /// that received it.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<usize, SessionError> {
        self.connection
            .publish(channel, payload, self.options.command_timeout)
            .await
    }

    // ── Listener management (synchronous, no connection required) ────────

    /// Register a listener for one channel's messages.
    pub fn add_listener(
        &self,
        channel: &str,
        callback: impl Fn(&str, &str) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.listeners.add_channel(channel, Arc::new(callback))
    }

    /// Register a listener for one pattern's messages.
    pub fn add_pattern_listener(
        &self,
        pattern: &str,
        callback: impl Fn(&str, &str, &str) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.listeners.add_pattern(pattern, Arc::new(callback))
    }

    /// Register a session-wide listener receiving every channel message.
    pub fn on_any_message(
        &self,
        callback: impl Fn(&str, &str) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.listeners.add_global_channel(Arc::new(callback))
    }

    /// Register a session-wide listener receiving every pattern message.
    pub fn on_any_pattern_message(
        &self,
        callback: impl Fn(&str, &str, &str) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.listeners.add_global_pattern(Arc::new(callback))
    }

    /// Remove exactly the registration behind `handle`. Returns whether it
    /// was still registered.
    pub fn remove_listener(&self, handle: &ListenerHandle) -> bool {
        self.listeners.remove(handle)
    }

    /// Remove all listeners keyed on one channel.
    pub fn remove_channel_listeners(&self, channel: &str) {
        self.listeners
            .remove_all_for_key(SubscriptionKind::Channel, channel);
    }

    /// Remove all listeners keyed on one pattern.
    pub fn remove_pattern_listeners(&self, pattern: &str) {
        self.listeners
            .remove_all_for_key(SubscriptionKind::Pattern, pattern);
    }

    /// Remove every listener, keyed and global.
    pub fn remove_all_listeners(&self) {
        self.listeners.clear();
    }

    // ── Queries (pure reads) ─────────────────────────────────────────────

    /// Whether the session is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_open()
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    /// Tracked subscription keys of one kind, in subscription order.
    #[must_use]
    pub fn active_subscriptions(&self, kind: SubscriptionKind) -> Vec<String> {
        self.subscriptions.active_keys(kind)
    }

    /// Every tracked subscription, kind-tagged, in subscription order.
    #[must_use]
    pub fn tracked_subscriptions(&self) -> Vec<SubscriptionKey> {
        self.subscriptions.keys()
    }

    /// Number of tracked subscriptions (channels plus patterns).
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Number of registered listeners (keyed plus global).
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}
