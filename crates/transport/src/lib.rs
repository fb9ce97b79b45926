//! CODECO gateway delivery adapters.
//!
//! Implements [`codeco::Transport`] with three backends:
//!
//! - [`OutboxTransport`] writes each message atomically into a local outbox
//!   directory for pickup by an external file-transfer job.
//! - [`HttpTransport`] uploads each message with an HTTP `PUT`, retrying
//!   transient failures with exponential back-off.
//! - [`SimulatedTransport`] accepts messages for sandbox partners without
//!   sending them anywhere.
//!
//! [`RoutingTransport`] picks the live backend from the partner's configured
//! transport kind. [`DelayedAcknowledgment`] implements
//! [`codeco::AcknowledgmentSource`] by acknowledging after a fixed delay.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** File-system and network details live here. The
//! `codeco` crate sees only the port traits.

mod http;
mod outbox;
mod routing;
mod sandbox;

pub use http::{classify_status, upload_url, HttpTransport, HttpTransportConfig};
pub use outbox::OutboxTransport;
pub use routing::RoutingTransport;
pub use sandbox::{DelayedAcknowledgment, SimulatedTransport};
