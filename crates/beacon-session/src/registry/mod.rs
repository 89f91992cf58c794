//! Session-owned registries.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `subscriptions` | Authoritative set of channels/patterns believed subscribed |
//! | `listeners` | Keyed + global callback collections and isolated fan-out |

pub mod listeners;
pub mod subscriptions;

pub use listeners::{ListenerHandle, ListenerRegistry};
pub use subscriptions::{SubscriptionRecord, SubscriptionRegistry};
