//! Events exchanged over the gateway's event bus.
//!
//! Two inbound events come from the gate-operation collaborator; three
//! outbound events report transmission progress to observers. The set is
//! closed so handlers can match exhaustively.

use serde::{Deserialize, Serialize};

use crate::{
    BookingReference, ContainerSnapshot, GateOperation, MessageType, OperationId, OperationKind,
    TransmissionId,
};

/// Routing key of a [`GatewayEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// See [`GatewayEvent::GateInCompleted`].
    GateInCompleted,
    /// See [`GatewayEvent::GateOutCompleted`].
    GateOutCompleted,
    /// See [`GatewayEvent::EdiTransmissionRequested`].
    EdiTransmissionRequested,
    /// See [`GatewayEvent::EdiTransmissionCompleted`].
    EdiTransmissionCompleted,
    /// See [`GatewayEvent::EdiTransmissionFailed`].
    EdiTransmissionFailed,
}

impl EventKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GateInCompleted => "GATE_IN_COMPLETED",
            Self::GateOutCompleted => "GATE_OUT_COMPLETED",
            Self::EdiTransmissionRequested => "EDI_TRANSMISSION_REQUESTED",
            Self::EdiTransmissionCompleted => "EDI_TRANSMISSION_COMPLETED",
            Self::EdiTransmissionFailed => "EDI_TRANSMISSION_FAILED",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every event the gateway publishes or reacts to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayEvent {
    /// A container entered the depot.
    GateInCompleted {
        /// The container, with its gate-in timestamp set.
        container: ContainerSnapshot,
        /// The committed operation.
        operation: GateOperation,
    },

    /// One or more containers left the depot.
    GateOutCompleted {
        /// The containers, with their gate-out timestamps set.
        containers: Vec<ContainerSnapshot>,
        /// The committed operation.
        operation: GateOperation,
        /// Booking the release was made against.
        #[serde(default)]
        booking_reference: Option<BookingReference>,
    },

    /// A message should be generated and delivered for an operation.
    EdiTransmissionRequested {
        /// Operation to report.
        entity_id: OperationId,
        /// Kind of the operation.
        entity_type: OperationKind,
        /// Message family to produce.
        message_type: MessageType,
    },

    /// A transmission log entry was created and the delivery started.
    EdiTransmissionCompleted {
        /// Operation reported.
        entity_id: OperationId,
        /// Resulting log entry.
        transmission_id: TransmissionId,
    },

    /// A transmission could not be created or its delivery failed.
    EdiTransmissionFailed {
        /// Operation concerned.
        entity_id: OperationId,
        /// Log entry, when one exists.
        #[serde(default)]
        transmission_id: Option<TransmissionId>,
        /// Human-readable error.
        error: String,
    },
}

impl GatewayEvent {
    /// Routing key of the event.
    pub fn event_kind(&self) -> EventKind {
        match self {
            Self::GateInCompleted { .. } => EventKind::GateInCompleted,
            Self::GateOutCompleted { .. } => EventKind::GateOutCompleted,
            Self::EdiTransmissionRequested { .. } => EventKind::EdiTransmissionRequested,
            Self::EdiTransmissionCompleted { .. } => EventKind::EdiTransmissionCompleted,
            Self::EdiTransmissionFailed { .. } => EventKind::EdiTransmissionFailed,
        }
    }

    /// Operation the event is about.
    pub fn operation_id(&self) -> &OperationId {
        match self {
            Self::GateInCompleted { operation, .. } | Self::GateOutCompleted { operation, .. } => {
                &operation.id
            }
            Self::EdiTransmissionRequested { entity_id, .. }
            | Self::EdiTransmissionCompleted { entity_id, .. }
            | Self::EdiTransmissionFailed { entity_id, .. } => entity_id,
        }
    }
}

impl bus::BusEvent for GatewayEvent {
    type Kind = EventKind;

    fn kind(&self) -> EventKind {
        self.event_kind()
    }
}

/// The gateway's event bus.
pub type GatewayBus = bus::EventBus<GatewayEvent>;
