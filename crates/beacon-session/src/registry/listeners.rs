//! Listener registry — keyed and global callback collections.
//!
//! Insertion order within a collection is delivery order. Removal is by
//! handle identity, never callback equality, so two structurally identical
//! callbacks registered twice stay independently removable.
//!
//! Fan-out lives here too: callback lists are snapshotted under the lock
//! and invoked outside it, each call isolated with `catch_unwind` — one
//! listener panicking never prevents delivery to the rest.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

use beacon_core::SubscriptionKind;

use crate::metrics::LISTENER_PANICS_TOTAL;

/// Callback for channel messages: `(channel, payload)`.
pub type ChannelCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;
/// Callback for pattern messages: `(pattern, channel, payload)`.
pub type PatternCallback = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Where a listener is registered.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Slot {
    KeyedChannel(String),
    KeyedPattern(String),
    GlobalChannel,
    GlobalPattern,
}

/// Opaque identity returned on registration; removes exactly that
/// registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerHandle {
    id: Uuid,
    slot: Slot,
}

#[derive(Default)]
struct Inner {
    keyed_channel: HashMap<String, Vec<(Uuid, ChannelCallback)>>,
    keyed_pattern: HashMap<String, Vec<(Uuid, PatternCallback)>>,
    global_channel: Vec<(Uuid, ChannelCallback)>,
    global_pattern: Vec<(Uuid, PatternCallback)>,
}

/// Keyed + global listener collections with isolated fan-out.
#[derive(Default)]
pub struct ListenerRegistry {
    inner: Mutex<Inner>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one channel. Returns its removal handle.
    pub fn add_channel(&self, channel: &str, callback: ChannelCallback) -> ListenerHandle {
        let id = Uuid::now_v7();
        self.inner
            .lock()
            .keyed_channel
            .entry(channel.to_string())
            .or_default()
            .push((id, callback));
        ListenerHandle {
            id,
            slot: Slot::KeyedChannel(channel.to_string()),
        }
    }

    /// Register a listener for one pattern. Returns its removal handle.
    pub fn add_pattern(&self, pattern: &str, callback: PatternCallback) -> ListenerHandle {
        let id = Uuid::now_v7();
        self.inner
            .lock()
            .keyed_pattern
            .entry(pattern.to_string())
            .or_default()
            .push((id, callback));
        ListenerHandle {
            id,
            slot: Slot::KeyedPattern(pattern.to_string()),
        }
    }

    /// Register a session-wide channel-message listener.
    pub fn add_global_channel(&self, callback: ChannelCallback) -> ListenerHandle {
        let id = Uuid::now_v7();
        self.inner.lock().global_channel.push((id, callback));
        ListenerHandle {
            id,
            slot: Slot::GlobalChannel,
        }
    }

    /// Register a session-wide pattern-message listener.
    pub fn add_global_pattern(&self, callback: PatternCallback) -> ListenerHandle {
        let id = Uuid::now_v7();
        self.inner.lock().global_pattern.push((id, callback));
        ListenerHandle {
            id,
            slot: Slot::GlobalPattern,
        }
    }

    /// Remove exactly the registration behind `handle`.
    ///
    /// Returns whether it was still registered. An emptied keyed collection
    /// is dropped entirely.
    pub fn remove(&self, handle: &ListenerHandle) -> bool {
        let mut inner = self.inner.lock();
        match &handle.slot {
            Slot::KeyedChannel(channel) => {
                let Some(entries) = inner.keyed_channel.get_mut(channel) else {
                    return false;
                };
                let before = entries.len();
                entries.retain(|(id, _)| *id != handle.id);
                let removed = entries.len() != before;
                if entries.is_empty() {
                    let _ = inner.keyed_channel.remove(channel);
                }
                removed
            }
            Slot::KeyedPattern(pattern) => {
                let Some(entries) = inner.keyed_pattern.get_mut(pattern) else {
                    return false;
                };
                let before = entries.len();
                entries.retain(|(id, _)| *id != handle.id);
                let removed = entries.len() != before;
                if entries.is_empty() {
                    let _ = inner.keyed_pattern.remove(pattern);
                }
                removed
            }
            Slot::GlobalChannel => {
                let before = inner.global_channel.len();
                inner.global_channel.retain(|(id, _)| *id != handle.id);
                inner.global_channel.len() != before
            }
            Slot::GlobalPattern => {
                let before = inner.global_pattern.len();
                inner.global_pattern.retain(|(id, _)| *id != handle.id);
                inner.global_pattern.len() != before
            }
        }
    }

    /// Remove every listener keyed on `(kind, key)` regardless of handle.
    pub fn remove_all_for_key(&self, kind: SubscriptionKind, key: &str) {
        let mut inner = self.inner.lock();
        match kind {
            SubscriptionKind::Channel => {
                let _ = inner.keyed_channel.remove(key);
            }
            SubscriptionKind::Pattern => {
                let _ = inner.keyed_pattern.remove(key);
            }
        }
    }

    /// Remove everything. Used on disconnect.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.keyed_channel.clear();
        inner.keyed_pattern.clear();
        inner.global_channel.clear();
        inner.global_pattern.clear();
    }

    /// Total registered listeners (keyed + global).
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.keyed_channel.values().map(Vec::len).sum::<usize>()
            + inner.keyed_pattern.values().map(Vec::len).sum::<usize>()
            + inner.global_channel.len()
            + inner.global_pattern.len()
    }

    /// Whether no listeners are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of non-empty keyed collections (both kinds).
    #[must_use]
    pub fn keyed_collection_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.keyed_channel.len() + inner.keyed_pattern.len()
    }

    /// Deliver a channel message: keyed listeners for `channel` first, then
    /// the global channel feed, each isolated.
    pub fn dispatch_message(&self, channel: &str, payload: &str) {
        let targets: Vec<(Uuid, ChannelCallback)> = {
            let inner = self.inner.lock();
            inner
                .keyed_channel
                .get(channel)
                .into_iter()
                .flatten()
                .chain(inner.global_channel.iter())
                .cloned()
                .collect()
        };
        for (id, callback) in targets {
            invoke_isolated(id, channel, || callback(channel, payload));
        }
    }

    /// Deliver a pattern message: keyed listeners for `pattern` first, then
    /// the global pattern feed, each isolated.
    pub fn dispatch_pattern_message(&self, pattern: &str, channel: &str, payload: &str) {
        let targets: Vec<(Uuid, PatternCallback)> = {
            let inner = self.inner.lock();
            inner
                .keyed_pattern
                .get(pattern)
                .into_iter()
                .flatten()
                .chain(inner.global_pattern.iter())
                .cloned()
                .collect()
        };
        for (id, callback) in targets {
            invoke_isolated(id, channel, || callback(pattern, channel, payload));
        }
    }
}

/// Run one callback, swallowing (and logging) a panic.
fn invoke_isolated(id: Uuid, channel: &str, call: impl FnOnce()) {
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(call)) {
        let message = panic
            .downcast_ref::<&str>()
            .copied()
            .map(str::to_owned)
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".into());
        counter!(LISTENER_PANICS_TOTAL).increment(1);
        warn!(listener_id = %id, channel, panic = %message, "listener panicked during delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PMutex;

    fn recorder() -> (Arc<PMutex<Vec<String>>>, ChannelCallback) {
        let log = Arc::new(PMutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        let cb: ChannelCallback =
            Arc::new(move |ch, payload| log2.lock().push(format!("{ch}:{payload}")));
        (log, cb)
    }

    #[test]
    fn keyed_then_global_in_insertion_order() {
        let reg = ListenerRegistry::new();
        let order = Arc::new(PMutex::new(Vec::new()));
        for label in ["keyed1", "keyed2"] {
            let order = Arc::clone(&order);
            let _ = reg.add_channel("c", Arc::new(move |_, _| order.lock().push(label)));
        }
        let order2 = Arc::clone(&order);
        let _ = reg.add_global_channel(Arc::new(move |_, _| order2.lock().push("global")));

        reg.dispatch_message("c", "m");
        assert_eq!(*order.lock(), ["keyed1", "keyed2", "global"]);
    }

    #[test]
    fn identical_callbacks_are_independently_removable() {
        let reg = ListenerRegistry::new();
        let (log, cb) = recorder();
        let h1 = reg.add_channel("c", Arc::clone(&cb));
        let _h2 = reg.add_channel("c", cb);
        assert_eq!(reg.len(), 2);

        assert!(reg.remove(&h1));
        assert_eq!(reg.len(), 1);
        reg.dispatch_message("c", "m");
        assert_eq!(log.lock().len(), 1);

        // Removing the same handle again is a no-op.
        assert!(!reg.remove(&h1));
    }

    #[test]
    fn emptied_keyed_collection_is_dropped() {
        let reg = ListenerRegistry::new();
        let (_log, cb) = recorder();
        let handle = reg.add_channel("c", cb);
        assert_eq!(reg.keyed_collection_count(), 1);
        assert!(reg.remove(&handle));
        assert_eq!(reg.keyed_collection_count(), 0);
    }

    #[test]
    fn remove_all_for_key_is_kind_scoped() {
        let reg = ListenerRegistry::new();
        let (_log, cb) = recorder();
        let _ = reg.add_channel("x", cb);
        let _ = reg.add_pattern("x", Arc::new(|_, _, _| {}));

        reg.remove_all_for_key(SubscriptionKind::Channel, "x");
        assert_eq!(reg.len(), 1);
        reg.remove_all_for_key(SubscriptionKind::Pattern, "x");
        assert!(reg.is_empty());
    }

    #[test]
    fn panicking_listener_does_not_block_the_rest() {
        let reg = ListenerRegistry::new();
        let (log, cb) = recorder();
        let _ = reg.add_channel("c", Arc::new(|_, _| panic!("listener bug")));
        let _ = reg.add_channel("c", cb);
        let seen = Arc::new(PMutex::new(0));
        let seen2 = Arc::clone(&seen);
        let _ = reg.add_global_channel(Arc::new(move |_, _| *seen2.lock() += 1));

        reg.dispatch_message("c", "m1");
        reg.dispatch_message("c", "m2");

        assert_eq!(*log.lock(), ["c:m1", "c:m2"]);
        assert_eq!(*seen.lock(), 2);
    }

    #[test]
    fn pattern_dispatch_carries_the_triple() {
        let reg = ListenerRegistry::new();
        let got = Arc::new(PMutex::new(Vec::new()));
        let got2 = Arc::clone(&got);
        let _ = reg.add_pattern(
            "user:*",
            Arc::new(move |pattern, channel, payload| {
                got2.lock()
                    .push((pattern.to_owned(), channel.to_owned(), payload.to_owned()));
            }),
        );

        reg.dispatch_pattern_message("user:*", "user:42", "ping");
        assert_eq!(
            *got.lock(),
            [("user:*".to_owned(), "user:42".to_owned(), "ping".to_owned())]
        );
    }

    #[test]
    fn channel_listeners_never_see_pattern_traffic() {
        let reg = ListenerRegistry::new();
        let (log, cb) = recorder();
        let _ = reg.add_channel("user:42", cb);

        reg.dispatch_pattern_message("user:*", "user:42", "ping");
        assert!(log.lock().is_empty());
    }

    #[test]
    fn global_handles_are_removable() {
        let reg = ListenerRegistry::new();
        let (_log, cb) = recorder();
        let h = reg.add_global_channel(cb);
        let hp = reg.add_global_pattern(Arc::new(|_, _, _| {}));
        assert_eq!(reg.len(), 2);
        assert!(reg.remove(&h));
        assert!(reg.remove(&hp));
        assert!(reg.is_empty());
    }

    #[test]
    fn clear_removes_everything() {
        let reg = ListenerRegistry::new();
        let (_log, cb) = recorder();
        let _ = reg.add_channel("a", Arc::clone(&cb));
        let _ = reg.add_global_channel(cb);
        let _ = reg.add_pattern("p*", Arc::new(|_, _, _| {}));
        reg.clear();
        assert!(reg.is_empty());
        assert_eq!(reg.keyed_collection_count(), 0);
    }

    #[test]
    fn dispatch_to_unknown_channel_is_a_noop() {
        let reg = ListenerRegistry::new();
        reg.dispatch_message("nobody", "m");
        reg.dispatch_pattern_message("no:*", "no:1", "m");
    }
}
