//! Shared value types for the CODECO gateway domain.
//!
//! The container and gate-operation snapshots are owned by the depot
//! collaborator: they arrive already validated and persisted, and the
//! gateway never mutates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    BookingReference, ClientCode, ContainerId, ContainerNumber, OperationId, OperatorId, YardId,
};

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Formats the timestamp with a `strftime`-style pattern.
    pub fn format(self, pattern: &str) -> String {
        self.0.format(pattern).to_string()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// Operation and message kinds
// ---------------------------------------------------------------------------

/// Discriminates the two gate operations the gateway reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    /// A container arrived at the depot.
    GateIn,
    /// A container left the depot.
    GateOut,
}

impl OperationKind {
    /// Token used in document numbers and file names (`GATE_IN` / `GATE_OUT`).
    pub fn token(self) -> &'static str {
        match self {
            Self::GateIn => "GATE_IN",
            Self::GateOut => "GATE_OUT",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GATE_IN" => Ok(Self::GateIn),
            "GATE_OUT" => Ok(Self::GateOut),
            _ => Err(format!("Invalid operation kind: {s}")),
        }
    }
}

/// Outbound EDI message family. Only CODECO is produced today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Container gate-in/gate-out report.
    Codeco,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Codeco => f.write_str("CODECO"),
        }
    }
}

// ---------------------------------------------------------------------------
// Container snapshot
// ---------------------------------------------------------------------------

/// Whether the container is laden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    /// Container carries cargo.
    Full,
    /// Container is empty.
    Empty,
}

/// Immutable view of a container as handed over by the depot system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    /// Depot-side record identifier.
    pub id: ContainerId,
    /// ISO-style container number.
    pub number: ContainerNumber,
    /// Nominal size as recorded by the depot (`"20ft"`, `"40ft"`, ...).
    ///
    /// Kept as free text; the encoder maps it to an ISO size/type code.
    pub size: String,
    /// Depot container type (`"dry"`, `"reefer"`, ...).
    #[serde(rename = "type")]
    pub container_type: String,
    /// Owning client.
    pub client_code: ClientCode,
    /// Laden or empty.
    pub load_status: LoadStatus,
    /// When the container entered the depot.
    #[serde(default)]
    pub gate_in_at: Option<Timestamp>,
    /// When the container left the depot.
    #[serde(default)]
    pub gate_out_at: Option<Timestamp>,
    /// Free-text damage notes recorded at the gate, one per damage.
    #[serde(default)]
    pub damage_notes: Vec<String>,
    /// Seal numbers found on the container.
    #[serde(default)]
    pub seal_numbers: Vec<String>,
    /// Reefer set-point in degrees Celsius.
    #[serde(default)]
    pub temperature_celsius: Option<f64>,
    /// Verified gross mass in kilograms.
    #[serde(default)]
    pub gross_weight_kg: Option<u32>,
}

impl ContainerSnapshot {
    /// Timestamp relevant for `kind`: gate-in time for a gate-in, gate-out
    /// time for a gate-out.
    pub fn timestamp_for(&self, kind: OperationKind) -> Option<Timestamp> {
        match kind {
            OperationKind::GateIn => self.gate_in_at,
            OperationKind::GateOut => self.gate_out_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Gate operation
// ---------------------------------------------------------------------------

/// Road haulage details captured at the gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportDetails {
    /// Haulier (trucking company) code or name.
    #[serde(default)]
    pub haulier: Option<String>,
    /// Truck registration plate.
    #[serde(default)]
    pub vehicle_registration: Option<String>,
}

/// A completed gate-in or gate-out, already committed by the depot system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateOperation {
    /// Operation identifier.
    pub id: OperationId,
    /// Gate-in or gate-out.
    pub kind: OperationKind,
    /// Containers moved by this operation.
    pub container_ids: Vec<ContainerId>,
    /// Operator who completed the operation.
    pub operator: OperatorId,
    /// Yard the operation took place in.
    pub yard: YardId,
    /// When the operation completed.
    pub completed_at: Timestamp,
    /// Booking the gate-out was released against.
    #[serde(default)]
    pub booking_reference: Option<BookingReference>,
    /// Truck details, when recorded.
    #[serde(default)]
    pub transport: Option<TransportDetails>,
}
