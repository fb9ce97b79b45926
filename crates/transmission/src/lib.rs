//! Transmission management for the CODECO gateway.
//!
//! [`TransmissionManager`] turns gate operations into CODECO deliveries and
//! owns the transmission log. [`store`] provides the in-memory and durable
//! log backends; [`AcknowledgmentPoller`] moves delivered entries to
//! `ACKNOWLEDGED` in the background.
//!
//! ## Architectural Layer
//!
//! **Application service.** Depends on the `codeco` domain crate and its
//! port traits; concrete transports are injected by the CLI.

mod manager;
mod poller;
pub mod store;

pub use manager::{ManagerDependencies, TransmissionManager};
pub use poller::{AcknowledgmentPoller, AcknowledgmentPollerConfig};
pub use store::{InMemoryTransmissionStore, JsonLinesTransmissionStore};
