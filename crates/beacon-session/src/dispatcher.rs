//! Event dispatcher — sole consumer of one connection's subscription stream.
//!
//! One task per connection lifetime. Events are classified and handed to the
//! listener registry synchronously, so per-channel delivery order is exactly
//! broker order. When the stream ends while its connection is still current,
//! the session fails stop: status goes `Disconnected`, the subscription
//! registry is cleared, and no reconnect is attempted — resuming requires an
//! explicit `connect` so callers can react to the gap.

use std::sync::Arc;

use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use beacon_core::BrokerEvent;

use crate::broker::EventStream;
use crate::connection::ConnectionHandle;
use crate::metrics::{
    DISCONNECTS_TOTAL, MESSAGES_DISPATCHED_TOTAL, PATTERN_MESSAGES_DISPATCHED_TOTAL,
};
use crate::registry::{ListenerRegistry, SubscriptionRegistry};

/// Attach a dispatcher to `events` for the connection identified by
/// `generation`.
pub(crate) fn spawn(
    listeners: Arc<ListenerRegistry>,
    subscriptions: Arc<SubscriptionRegistry>,
    connection: Arc<ConnectionHandle>,
    mut events: EventStream,
    generation: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                BrokerEvent::Message { channel, payload } => {
                    counter!(MESSAGES_DISPATCHED_TOTAL).increment(1);
                    debug!(channel, "dispatching channel message");
                    listeners.dispatch_message(&channel, &payload);
                }
                BrokerEvent::PatternMessage {
                    pattern,
                    channel,
                    payload,
                } => {
                    counter!(PATTERN_MESSAGES_DISPATCHED_TOTAL).increment(1);
                    debug!(pattern, channel, "dispatching pattern message");
                    listeners.dispatch_pattern_message(&pattern, &channel, &payload);
                }
                BrokerEvent::Subscribed { kind, key, active } => {
                    debug!(kind = %kind, key, active, "broker acknowledged subscribe");
                }
                BrokerEvent::Unsubscribed { kind, key, active } => {
                    debug!(kind = %kind, key, active, "broker acknowledged unsubscribe");
                }
            }
        }

        // Stream ended. If this connection is still current, the broker
        // terminated it out from under us.
        if connection.mark_stream_closed(generation) {
            subscriptions.clear();
            counter!(DISCONNECTS_TOTAL, "reason" => "stream_closed").increment(1);
            info!("subscription stream closed by broker; session disconnected");
        } else {
            debug!("dispatcher detached after local close");
        }
    })
}
