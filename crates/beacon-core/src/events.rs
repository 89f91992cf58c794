//! Typed inbound broker events.
//!
//! The subscription stream delivers these in broker order. Message events
//! drive listener fan-out; subscribe/unsubscribe acknowledgements exist for
//! diagnostic logging only and never steer control flow.

use serde::{Deserialize, Serialize};

use crate::keys::SubscriptionKind;

/// An event received on the dedicated subscription stream.
///
/// Pattern deliveries are the structured `(pattern, channel, payload)`
/// triple — the pattern that matched and the concrete channel are always
/// carried separately, never concatenated into the payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BrokerEvent {
    /// A message published to a channel this connection subscribes to.
    #[serde(rename = "message")]
    Message {
        /// Channel the message was published to.
        channel: String,
        /// Message payload.
        payload: String,
    },

    /// A message delivered through a pattern subscription.
    #[serde(rename = "pattern_message")]
    PatternMessage {
        /// The subscribed pattern that matched.
        pattern: String,
        /// The concrete channel the message was published to.
        channel: String,
        /// Message payload.
        payload: String,
    },

    /// Broker acknowledged a subscribe.
    #[serde(rename = "subscribed")]
    Subscribed {
        /// Channel or pattern subscription.
        kind: SubscriptionKind,
        /// The key that was subscribed.
        key: String,
        /// Number of subscriptions active on this connection afterwards.
        active: usize,
    },

    /// Broker acknowledged an unsubscribe.
    #[serde(rename = "unsubscribed")]
    Unsubscribed {
        /// Channel or pattern subscription.
        kind: SubscriptionKind,
        /// The key that was unsubscribed.
        key: String,
        /// Number of subscriptions active on this connection afterwards.
        active: usize,
    },
}

impl BrokerEvent {
    /// Event type string used as a log label.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::PatternMessage { .. } => "pattern_message",
            Self::Subscribed { .. } => "subscribed",
            Self::Unsubscribed { .. } => "unsubscribed",
        }
    }
}
