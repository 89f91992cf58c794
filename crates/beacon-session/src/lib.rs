//! # beacon-session
//!
//! Pub/sub session management over a message broker.
//!
//! The crate centers on [`session::PubSubSession`], an explicit session object
//! wrapping one multiplexed subscription connection:
//!
//! - **Broker seam**: [`broker::Broker`] / [`broker::BrokerConnection`] traits
//!   plus [`broker::memory::MemoryBroker`], an in-process broker for tests
//! - **Connection**: [`connection::ConnectionHandle`] with bounded connect and
//!   publish round-trips and generation-stamped lifetimes
//! - **Registries**: [`registry::SubscriptionRegistry`] (channels and patterns
//!   believed active) and [`registry::ListenerRegistry`] (keyed and global
//!   callbacks with panic isolation)
//! - **Dispatcher**: per-connection task fanning broker events out to
//!   listeners in broker order, failing stop when the stream ends
//!
//! ## Crate Position
//!
//! Top-level library crate. Depends on `beacon-core` for keys, events,
//! errors, and configuration.

#![deny(unsafe_code)]

pub mod broker;
pub mod connection;
mod dispatcher;
pub mod metrics;
pub mod registry;
pub mod session;

pub use connection::ConnectionStatus;
pub use registry::{ListenerHandle, SubscriptionRecord};
pub use session::{ConnectTarget, PubSubSession, SessionOptions};
