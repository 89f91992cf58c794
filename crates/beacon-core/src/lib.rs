//! # beacon-core
//!
//! Foundation types for the beacon pub/sub client: subscription keys,
//! typed broker events, the error hierarchy, and broker configuration.
//!
//! This crate is dependency-light on purpose — the session manager
//! (`beacon-session`) and any broker backend share these types without
//! pulling in the async runtime.

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod events;
pub mod keys;

pub use config::BrokerConfig;
pub use errors::{BrokerError, SessionError};
pub use events::BrokerEvent;
pub use keys::{SubscriptionKey, SubscriptionKind};
