//! Transmission log entries and their delivery state machine.
//!
//! ```text
//! PENDING --(delivery call made)--> SENT --(ack received)--> ACKNOWLEDGED
//!                                   SENT --(delivery error)--> FAILED
//!                                   FAILED --(explicit retry)--> SENT
//! ```
//!
//! Every mutator checks the current state first and leaves the entry
//! untouched when the transition is not allowed.

use serde::{Deserialize, Serialize};

use crate::{
    BookingReference, ContainerNumber, DeliveryId, MessageReference, MessageType, OperationId, OperationKind,
    PartnerCode, Timestamp, TransmissionError, TransmissionId,
};

/// Delivery state of a transmission log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransmissionStatus {
    /// Entry created, delivery not yet started.
    Pending,
    /// Delivery call made; waiting for an acknowledgment.
    Sent,
    /// Partner confirmed receipt.
    Acknowledged,
    /// Delivery failed; only an explicit retry moves it on.
    Failed,
}

impl TransmissionStatus {
    /// Returns `true` if the state machine allows moving to `next`.
    pub fn can_transition_to(self, next: TransmissionStatus) -> bool {
        use TransmissionStatus::*;
        matches!(
            (self, next),
            (Pending, Sent) | (Sent, Acknowledged) | (Sent, Failed) | (Failed, Sent)
        )
    }
}

impl std::fmt::Display for TransmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Acknowledged => "ACKNOWLEDGED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TransmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "SENT" => Ok(Self::Sent),
            "ACKNOWLEDGED" => Ok(Self::Acknowledged),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Invalid transmission status: {s}")),
        }
    }
}

/// One delivery of one CODECO message to one partner.
///
/// Retries mutate the same entry; only status, timestamps, error and retry
/// counter ever change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmissionLogEntry {
    /// Entry identifier.
    pub id: TransmissionId,
    /// Always [`MessageType::Codeco`] today.
    pub message_type: MessageType,
    /// Gate operation the message reports, when known.
    #[serde(default)]
    pub operation_id: Option<OperationId>,
    /// Gate-in or gate-out.
    pub operation: OperationKind,
    /// Booking a gate-out was released against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_reference: Option<BookingReference>,
    /// First container of the message.
    pub container_number: ContainerNumber,
    /// All containers of the message, in equipment order.
    pub container_numbers: Vec<ContainerNumber>,
    /// Generated file name.
    pub file_name: String,
    /// Reference used in `UNH` and `UNB`.
    pub message_reference: MessageReference,
    /// Receiving partner.
    pub partner_code: PartnerCode,
    /// Current state.
    pub status: TransmissionStatus,
    /// When the entry was created.
    pub created_at: Timestamp,
    /// When the last delivery call was made.
    #[serde(default)]
    pub transmitted_at: Option<Timestamp>,
    /// Explicit retries performed so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Last delivery error, cleared on retry.
    #[serde(default)]
    pub error_message: Option<String>,
    /// When the partner acknowledged receipt.
    #[serde(default)]
    pub acknowledged_at: Option<Timestamp>,
    /// Receipt returned by the transport.
    #[serde(default)]
    pub delivery_id: Option<DeliveryId>,
    /// Whether the delivery went to the sandbox.
    #[serde(default)]
    pub sandbox: bool,
    /// Encoded message, redelivered verbatim on retry.
    pub payload: String,
}

/// Fields needed to open a new entry.
#[derive(Debug, Clone)]
pub struct NewTransmission {
    /// Gate operation reported.
    pub operation_id: Option<OperationId>,
    /// Gate-in or gate-out.
    pub operation: OperationKind,
    /// Booking of a gate-out.
    pub booking_reference: Option<BookingReference>,
    /// Containers in equipment order; must not be empty.
    pub container_numbers: Vec<ContainerNumber>,
    /// Generated file name.
    pub file_name: String,
    /// Message reference.
    pub message_reference: MessageReference,
    /// Receiving partner.
    pub partner_code: PartnerCode,
    /// Sandbox delivery.
    pub sandbox: bool,
    /// Encoded message.
    pub payload: String,
}

impl TransmissionLogEntry {
    /// Opens a `PENDING` entry.
    ///
    /// Returns `None` when `new.container_numbers` is empty.
    pub fn pending(new: NewTransmission, created_at: Timestamp) -> Option<Self> {
        let container_number = new.container_numbers.first()?.clone();
        Some(Self {
            id: TransmissionId::new_random(),
            message_type: MessageType::Codeco,
            operation_id: new.operation_id,
            operation: new.operation,
            booking_reference: new.booking_reference,
            container_number,
            container_numbers: new.container_numbers,
            file_name: new.file_name,
            message_reference: new.message_reference,
            partner_code: new.partner_code,
            status: TransmissionStatus::Pending,
            created_at,
            transmitted_at: None,
            retry_count: 0,
            error_message: None,
            acknowledged_at: None,
            delivery_id: None,
            sandbox: new.sandbox,
            payload: new.payload,
        })
    }

    fn guard(&self, next: TransmissionStatus, action: &'static str) -> Result<(), TransmissionError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(TransmissionError::InvalidState {
                id: self.id,
                status: self.status,
                action,
            })
        }
    }

    /// `PENDING → SENT`.
    pub fn mark_sent(&mut self, at: Timestamp) -> Result<(), TransmissionError> {
        if self.status != TransmissionStatus::Pending {
            return Err(TransmissionError::InvalidState {
                id: self.id,
                status: self.status,
                action: "send",
            });
        }
        self.status = TransmissionStatus::Sent;
        self.transmitted_at = Some(at);
        Ok(())
    }

    /// `SENT → FAILED`, recording the error.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), TransmissionError> {
        self.guard(TransmissionStatus::Failed, "fail")?;
        self.status = TransmissionStatus::Failed;
        self.error_message = Some(error.into());
        Ok(())
    }

    /// `SENT → ACKNOWLEDGED`.
    pub fn mark_acknowledged(&mut self, at: Timestamp) -> Result<(), TransmissionError> {
        self.guard(TransmissionStatus::Acknowledged, "acknowledge")?;
        self.status = TransmissionStatus::Acknowledged;
        self.acknowledged_at = Some(at);
        Ok(())
    }

    /// `FAILED → SENT` for an explicit retry.
    ///
    /// Increments the retry counter, clears the previous error and delivery
    /// receipt, and stamps the new transmission time.
    pub fn begin_retry(&mut self, at: Timestamp) -> Result<(), TransmissionError> {
        if self.status != TransmissionStatus::Failed {
            return Err(TransmissionError::InvalidState {
                id: self.id,
                status: self.status,
                action: "retry",
            });
        }
        self.status = TransmissionStatus::Sent;
        self.retry_count += 1;
        self.error_message = None;
        self.delivery_id = None;
        self.transmitted_at = Some(at);
        Ok(())
    }

    /// `true` while the entry waits for an acknowledgment.
    pub fn awaits_acknowledgment(&self) -> bool {
        self.status == TransmissionStatus::Sent && self.acknowledged_at.is_none()
    }
}
