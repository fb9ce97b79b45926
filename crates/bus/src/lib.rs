//! In-process publish/subscribe router for the CODECO gateway.
//!
//! Producers publish strongly typed events; consumers subscribe per event
//! kind. Neither side knows about the other. The bus is generic over the
//! event type so the domain crate can define a closed sum type of events
//! (see `codeco::GatewayEvent`) and get exhaustive matching in handlers.
//!
//! ## Delivery model
//!
//! - [`EventBus::publish`] invokes every current subscriber of the event's
//!   kind **concurrently** on the calling task and resolves once every
//!   handler has settled.
//! - A handler returning an error (or panicking) is logged and counted in
//!   the [`PublishReport`]; sibling handlers still run and `publish` never
//!   fails.
//! - [`EventBus::publish_fire_and_forget`] spawns the dispatch onto the
//!   Tokio runtime; the caller does not wait and failures surface only in
//!   logs.
//! - Each publish dispatches to a snapshot of the subscriber list taken
//!   when the publish starts. Unsubscribing mid-flight affects only later
//!   publishes.
//!
//! ## History
//!
//! The last `history_capacity` published events are retained in FIFO
//! order for diagnostics, including events that had no subscribers.
//!
//! ## Architectural Layer
//!
//! **In-process infrastructure.** This crate contains no domain types.

mod event_bus;
mod handler;
mod history;

pub use event_bus::{
    BusConfig, EventBus, PublishReport, Subscription, SubscriptionId, DEFAULT_HISTORY_CAPACITY,
};
pub use handler::{EventHandler, HandlerFuture};
pub use history::EventRecord;

use std::fmt;
use std::hash::Hash;

/// An event that can be routed by an [`EventBus`].
///
/// Implementors are usually closed enums; [`BusEvent::Kind`] is the
/// field-less discriminant used as the subscription key.
pub trait BusEvent: Clone + Send + Sync + 'static {
    /// Subscription key for this event type.
    type Kind: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// Returns the routing key of this event.
    fn kind(&self) -> Self::Kind;
}
