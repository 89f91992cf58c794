//! Metric name constants to avoid typos across modules.

/// Sessions connected total (counter).
pub const CONNECTS_TOTAL: &str = "pubsub_connects_total";
/// Sessions disconnected total (counter, labels: reason).
pub const DISCONNECTS_TOTAL: &str = "pubsub_disconnects_total";
/// Channel messages dispatched total (counter).
pub const MESSAGES_DISPATCHED_TOTAL: &str = "pubsub_messages_dispatched_total";
/// Pattern messages dispatched total (counter).
pub const PATTERN_MESSAGES_DISPATCHED_TOTAL: &str = "pubsub_pattern_messages_dispatched_total";
/// Listener callbacks that panicked during delivery (counter).
pub const LISTENER_PANICS_TOTAL: &str = "pubsub_listener_panics_total";
/// Subscriptions currently tracked by the registry (gauge).
pub const SUBSCRIPTIONS_ACTIVE: &str = "pubsub_subscriptions_active";
