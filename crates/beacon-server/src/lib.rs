//! # beacon-server
//!
//! Axum HTTP + `WebSocket` relay for token-addressed notifications.
//!
//! - Token registry: at most one subscriber per token, newest wins
//! - Subscriber lifecycle: eviction, close handlers, best-effort delivery
//! - Cross-instance fan-out through the [`Notifier`] trait (local, in-memory
//!   bus, Redis pub/sub)
//! - Public routing: image beacon, redirect beacon, MTA-STS passthrough
//! - Admin listener: health check and Prometheus metrics
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod lifecycle;
pub mod metrics;
pub mod notifier;
pub mod pixel;
pub mod proxy;
pub mod registry;
pub mod routing;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use connection::{CloseReason, Connection, ConnectionId};
pub use errors::{Result, ServerError};
pub use lifecycle::SubscriptionManager;
pub use notifier::{
    LocalNotifier, MemoryBus, MemoryNotifier, Notifier, NotifierError, RedisNotifier,
};
pub use registry::TokenRegistry;
pub use server::{AppState, BeaconServer};
pub use shutdown::{ShutdownCoordinator, wait_for_signal};
