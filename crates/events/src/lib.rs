//! Tempo event bus and notification infrastructure.
//!
//! - [`EventBus`] — in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`, with drop-oldest semantics for slow
//!   subscribers.
//! - [`RunEvent`] / [`EventKind`] — the canonical lifecycle event
//!   envelope streamed to WebSocket clients.
//! - [`delivery`] — outbound email notification for completed runs.

pub mod bus;
pub mod delivery;

pub use bus::{EventBus, EventFilter, EventKind, RunEvent};
pub use delivery::email::{EmailConfig, EmailDelivery};
