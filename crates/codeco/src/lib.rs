//! Core domain for the CODECO gateway.
//!
//! Turns completed depot gate operations into CODECO EDIFACT messages and
//! defines the bookkeeping for delivering them to trading partners. The
//! crate contains every domain concept, identifier, value type and error used
//! by the gateway. Infrastructure crates implement the traits in [`ports`];
//! they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`ContainerNumber`, `PartnerCode`, `TransmissionId`, etc.) |
//! | [`types`] | Snapshot and value types (`ContainerSnapshot`, `GateOperation`, `Timestamp`, etc.) |
//! | [`edifact`] | Separators, release escaping, segment rendering and tokenizing |
//! | [`encoder`] | The CODECO message builder |
//! | [`partners`] | Partner configuration registry |
//! | [`transmission`] | Transmission log entries and their state machine |
//! | [`events`] | Event bus payloads |
//! | [`ports`] | Transport, acknowledgment and store traits |
//! | [`errors`] | Error and retry-policy types |

pub mod edifact;
pub mod encoder;
pub mod errors;
pub mod events;
pub mod identifiers;
pub mod partners;
pub mod ports;
pub mod transmission;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use encoder::{
    iso_size_type, CodecoEncoder, CodecoMessage, EncodeError, EncodeRequest, EncoderOptions,
    EquipmentDetail, SegmentCountScope, SizeFallback,
};
pub use errors::{RetryPolicy, StoreError, TransmissionError, TransportError};
pub use events::{EventKind, GatewayBus, GatewayEvent};
pub use identifiers::{
    BookingReference, ClientCode, ContainerId, ContainerNumber, DeliveryId, MessageReference,
    OperationId, OperatorId, PartnerCode, TransmissionId, YardId,
};
pub use partners::{
    Credentials, Endpoint, FileNameContext, PartnerConfig, PartnerRegistry, TransportKind,
    DEFAULT_FILE_NAME_TEMPLATE, SANDBOX_SENDER_CODE,
};
pub use ports::{AcknowledgmentSource, OutboundMessage, TransmissionStore, Transport};
pub use transmission::{NewTransmission, TransmissionLogEntry, TransmissionStatus};
pub use types::{
    ContainerSnapshot, GateOperation, LoadStatus, MessageType, OperationKind, Timestamp,
    TransportDetails,
};
