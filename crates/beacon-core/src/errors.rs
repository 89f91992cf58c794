//! Error hierarchy for broker and session operations.
//!
//! Two layers: [`BrokerError`] is what the broker collaborator reports;
//! [`SessionError`] is what the session façade surfaces to callers, always
//! wrapped with operation context (which call, which key).

use std::time::Duration;

use crate::keys::SubscriptionKind;

/// Failure reported by the broker client collaborator.
#[derive(Clone, Debug, thiserror::Error)]
pub enum BrokerError {
    /// Connection refused by the broker host.
    #[error("connection refused")]
    Refused,
    /// Authentication rejected during handshake.
    #[error("authentication rejected")]
    AuthRejected,
    /// The broker did not respond within its own deadline.
    #[error("broker timed out")]
    Timeout,
    /// The connection was closed while the operation was in flight.
    #[error("connection closed")]
    ConnectionClosed,
    /// The broker rejected the request (bad pattern, unknown command, ...).
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Transport-level failure.
    #[error("io error: {0}")]
    Io(String),
}

impl BrokerError {
    /// Short classification string for logging/metrics.
    #[must_use]
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Refused => "refused",
            Self::AuthRejected => "auth_rejected",
            Self::Timeout => "timeout",
            Self::ConnectionClosed => "connection_closed",
            Self::Protocol(_) => "protocol",
            Self::Io(_) => "io",
        }
    }
}

/// Failure surfaced by a session operation.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SessionError {
    /// Handshake, auth, or stream setup failed during `connect`.
    #[error("connect failed: {source}")]
    Connect {
        /// Underlying broker failure.
        source: BrokerError,
    },

    /// Operation attempted while the session is not connected.
    #[error("not connected")]
    NotConnected,

    /// The broker rejected a subscribe/unsubscribe call for a key.
    #[error("{kind} subscription call failed for {key:?}: {source}")]
    Subscription {
        /// Channel or pattern subscription.
        kind: SubscriptionKind,
        /// The key the broker rejected.
        key: String,
        /// Underlying broker failure.
        source: BrokerError,
    },

    /// The broker rejected a publish.
    #[error("publish to {channel:?} failed: {source}")]
    Publish {
        /// Target channel.
        channel: String,
        /// Underlying broker failure.
        source: BrokerError,
    },

    /// The bounded operation timeout elapsed.
    ///
    /// Distinguishable from broker-reported errors so callers can decide
    /// to retry.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Which operation timed out.
        operation: &'static str,
        /// The configured deadline.
        after: Duration,
    },
}

impl SessionError {
    /// Short classification string for logging/metrics.
    #[must_use]
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::NotConnected => "not_connected",
            Self::Subscription { .. } => "subscription",
            Self::Publish { .. } => "publish",
            Self::Timeout { .. } => "timeout",
        }
    }

    /// Whether this failure is the bounded-timeout elapse.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The key named by a subscription failure, if any.
    #[must_use]
    pub fn failed_key(&self) -> Option<&str> {
        match self {
            Self::Subscription { key, .. } => Some(key),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn broker_error_kinds() {
        assert_eq!(BrokerError::Refused.error_kind(), "refused");
        assert_eq!(BrokerError::AuthRejected.error_kind(), "auth_rejected");
        assert_eq!(
            BrokerError::Protocol("bad pattern".into()).error_kind(),
            "protocol"
        );
    }

    #[test]
    fn subscription_error_names_the_key() {
        let err = SessionError::Subscription {
            kind: SubscriptionKind::Channel,
            key: "b".into(),
            source: BrokerError::Protocol("rejected".into()),
        };
        assert_eq!(err.failed_key(), Some("b"));
        let msg = err.to_string();
        assert!(msg.contains("\"b\""), "message should name the key: {msg}");
        assert!(msg.contains("channel"));
    }

    #[test]
    fn timeout_is_distinguishable() {
        let err = SessionError::Timeout {
            operation: "publish",
            after: Duration::from_secs(5),
        };
        assert!(err.is_timeout());
        assert_eq!(err.error_kind(), "timeout");

        let other = SessionError::Publish {
            channel: "c".into(),
            source: BrokerError::Timeout,
        };
        assert!(!other.is_timeout());
    }

    #[test]
    fn not_connected_has_no_key() {
        assert_matches!(SessionError::NotConnected.failed_key(), None);
        assert_eq!(SessionError::NotConnected.error_kind(), "not_connected");
    }
}
