//! Subscription registry — the authoritative subscription set.
//!
//! A key present here means the broker has acknowledged (or is assumed to
//! have acknowledged) that subscription; absence means no delivery should be
//! expected. Mutated only by successful subscribe round-trips, by explicit
//! unsubscribe intent, and by disconnect/stream-loss clears.

use chrono::{DateTime, Utc};
use metrics::gauge;
use parking_lot::Mutex;

use beacon_core::{SubscriptionKey, SubscriptionKind};

use crate::metrics::SUBSCRIPTIONS_ACTIVE;

/// One tracked subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionRecord {
    /// Channel name or pattern expression.
    pub key: String,
    /// Channel or pattern.
    pub kind: SubscriptionKind,
    /// When the subscription was recorded.
    pub subscribed_at: DateTime<Utc>,
}

/// Insertion-ordered subscription set, disjoint per kind.
#[derive(Default)]
pub struct SubscriptionRegistry {
    records: Mutex<Vec<SubscriptionRecord>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription. Idempotent: re-recording an already-tracked
    /// key keeps the original record (and its `subscribed_at`).
    pub fn record(&self, kind: SubscriptionKind, key: &str) {
        let mut records = self.records.lock();
        if !records.iter().any(|r| r.kind == kind && r.key == key) {
            records.push(SubscriptionRecord {
                key: key.to_string(),
                kind,
                subscribed_at: Utc::now(),
            });
            gauge!(SUBSCRIPTIONS_ACTIVE).set(records.len() as f64);
        }
    }

    /// Forget a subscription. Idempotent.
    pub fn forget(&self, kind: SubscriptionKind, key: &str) {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| !(r.kind == kind && r.key == key));
        if records.len() != before {
            gauge!(SUBSCRIPTIONS_ACTIVE).set(records.len() as f64);
        }
    }

    /// Whether a key is tracked under the given kind.
    #[must_use]
    pub fn contains(&self, kind: SubscriptionKind, key: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|r| r.kind == kind && r.key == key)
    }

    /// Keys of the given kind, in insertion order.
    #[must_use]
    pub fn active_keys(&self, kind: SubscriptionKind) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.key.clone())
            .collect()
    }

    /// All records, in insertion order.
    #[must_use]
    pub fn records(&self) -> Vec<SubscriptionRecord> {
        self.records.lock().clone()
    }

    /// All tracked keys, kind-tagged, in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        self.records
            .lock()
            .iter()
            .map(|r| SubscriptionKey::new(r.kind, r.key.clone()))
            .collect()
    }

    /// Number of tracked subscriptions (both kinds).
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drop everything. Used on disconnect and on stream loss.
    pub fn clear(&self) {
        let mut records = self.records.lock();
        records.clear();
        gauge!(SUBSCRIPTIONS_ACTIVE).set(0.0);
    }
}
