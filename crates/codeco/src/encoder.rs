//! CODECO message builder.
//!
//! [`CodecoEncoder::build`] maps a gate operation onto the logical
//! [`CodecoMessage`] structure; [`CodecoMessage::render`] serializes it to
//! EDIFACT text. Both steps are pure: the same request always yields
//! byte-identical output, so the caller supplies every clock value.
//!
//! ## Segment order
//!
//! ```text
//! UNA UNB UNH BGM DTM TDT LOC
//!   { EQD STS [MEA] [DAM...] [SEL...] [TMP] }   one group per container
//! UNT UNZ
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::edifact::{Segment, Separators};
use crate::{
    ContainerNumber, ContainerSnapshot, MessageReference, OperationKind, PartnerCode, Timestamp,
    TransportDetails, YardId,
};

// ---------------------------------------------------------------------------
// Fixed code values
// ---------------------------------------------------------------------------

const MESSAGE_TYPE: &str = "CODECO";
const MESSAGE_VERSION: &str = "D";
const MESSAGE_RELEASE: &str = "95B";
const CONTROLLING_AGENCY: &str = "UN";
const SYNTAX_IDENTIFIER: &str = "UNOA";
const SYNTAX_VERSION: &str = "2";

/// ISO 6346 size/type code for a 20ft general-purpose container.
pub const SIZE_TYPE_20FT: &str = "22G1";
/// ISO 6346 size/type code for a 40ft general-purpose container.
pub const SIZE_TYPE_40FT: &str = "42G1";

// BGM 1001: gate-in report / gate-out report.
const DOCUMENT_GATE_IN: &str = "34";
const DOCUMENT_GATE_OUT: &str = "36";
// BGM 1225: original.
const MESSAGE_FUNCTION_ORIGINAL: &str = "9";

const DTM_ARRIVAL: &str = "132";
const DTM_DEPARTURE: &str = "133";
const DTM_FORMAT_CCYYMMDDHHMM: &str = "203";

// TDT: pre-carriage, road, truck.
const TDT_STAGE_PRE_CARRIAGE: &str = "1";
const TDT_MODE_ROAD: &str = "3";
const TDT_MEANS_TRUCK: &str = "31";

const LOC_PLACE_OF_ACTIVITY: &str = "165";
const LOC_LIST_UNLOCODE: &str = "139";
const LOC_AGENCY_UNECE: &str = "6";

const EQD_CONTAINER: &str = "CN";
const EQD_LIST_ISO6346: &str = "102";
const EQD_AGENCY_ISO: &str = "5";
const FULL_INDICATOR: &str = "5";
const EMPTY_INDICATOR: &str = "4";

const STS_EQUIPMENT_STATUS: &str = "1";
// UN/EDIFACT 8249 equipment status codes.
const STATUS_IMPORT: &str = "3";
const STATUS_EXPORT: &str = "2";

const MEA_PURPOSE_WEIGHT: &str = "AAE";
const MEA_GROSS_WEIGHT: &str = "G";
const UNIT_KILOGRAM: &str = "KGM";

const DAM_QUALIFIER_DAMAGED: &str = "1";
const DAM_TYPE_GENERIC: &str = "DA";
const DAM_AREA_UNSPECIFIED: &str = "ZZZ";
const DAM_COMPONENT_UNSPECIFIED: &str = "ZZZ";
const DAM_EXTENT_UNSPECIFIED: &str = "ZZZ";

const SEAL_ISSUER_CARRIER: &str = "CA";

const TMP_TRANSPORT_TEMPERATURE: &str = "2";
const UNIT_CELSIUS: &str = "CEL";

// ---------------------------------------------------------------------------
// Errors and policy
// ---------------------------------------------------------------------------

/// Reasons a CODECO message cannot be built.
///
/// Always fatal for the attempt; never retried automatically.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum EncodeError {
    /// The operation carried no containers.
    #[error("Operation has no equipment to report")]
    NoEquipment,

    /// A container size has no ISO mapping and the policy is strict.
    #[error("Unknown container size '{size}' for {container}")]
    UnknownContainerSize {
        /// Container whose size was rejected.
        container: ContainerNumber,
        /// The size string as supplied.
        size: String,
    },

    /// A field value cannot be represented in the message.
    #[error("Invalid value for {field}: {reason}")]
    InvalidField {
        /// Logical field name.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl EncodeError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoEquipment => "NO_EQUIPMENT",
            Self::UnknownContainerSize { .. } => "UNKNOWN_CONTAINER_SIZE",
            Self::InvalidField { .. } => "INVALID_FIELD",
        }
    }
}

/// What to do with a container size that has no ISO mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeFallback {
    /// Log a warning and report the container as 40ft (`42G1`).
    #[default]
    Lenient,
    /// Fail with [`EncodeError::UnknownContainerSize`].
    Strict,
}

/// Which segments the `UNT` segment count covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentCountScope {
    /// Every segment preceding `UNZ`, including `UNA` and `UNB`.
    #[default]
    Interchange,
    /// Only `UNH` through `UNT`, as the EDIFACT syntax rules define it.
    Message,
}

/// Encoder configuration shared by all messages of one gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderOptions {
    /// UN/LOCODE of the depot, reported in `LOC+165`.
    pub location_code: String,
    /// Unknown-size policy.
    #[serde(default)]
    pub size_fallback: SizeFallback,
    /// `UNT` counting policy.
    #[serde(default)]
    pub segment_count: SegmentCountScope,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            location_code: "ZZZZZ".to_string(),
            size_fallback: SizeFallback::default(),
            segment_count: SegmentCountScope::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Everything needed to encode one message.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    /// Gate-in or gate-out.
    pub kind: OperationKind,
    /// Containers to report, one equipment block each.
    pub containers: Vec<ContainerSnapshot>,
    /// When the operation happened (drives `DTM` and `BGM`).
    pub occurred_at: Timestamp,
    /// When the message is prepared (drives `UNB`).
    pub prepared_at: Timestamp,
    /// Unique reference of this attempt.
    pub reference: MessageReference,
    /// Interchange sender identification.
    pub sender: String,
    /// Interchange recipient.
    pub recipient: PartnerCode,
    /// Yard the operation took place in.
    pub yard: Option<YardId>,
    /// Truck details.
    pub transport: Option<TransportDetails>,
}

// ---------------------------------------------------------------------------
// Logical message
// ---------------------------------------------------------------------------

/// `UNB`/`UNZ` envelope data.
#[derive(Debug, Clone, PartialEq)]
pub struct InterchangeHeader {
    /// Sender identification.
    pub sender: String,
    /// Recipient identification.
    pub recipient: String,
    /// Preparation date/time.
    pub prepared_at: Timestamp,
    /// Interchange control reference.
    pub control_reference: MessageReference,
}

/// `UNH` content.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageHeader {
    /// Message reference number.
    pub reference: MessageReference,
    /// Message type (`CODECO`).
    pub message_type: &'static str,
    /// Directory version (`D`).
    pub version: &'static str,
    /// Directory release (`95B`).
    pub release: &'static str,
    /// Controlling agency (`UN`).
    pub agency: &'static str,
}

/// `BGM` content.
#[derive(Debug, Clone, PartialEq)]
pub struct BeginningOfMessage {
    /// Document name code (gate-in or gate-out report).
    pub document_code: &'static str,
    /// Operation token + container number + operation date.
    pub document_number: String,
    /// Message function (`9`, original).
    pub function: &'static str,
}

/// `DTM` content.
#[derive(Debug, Clone, PartialEq)]
pub struct DateTimePeriod {
    /// `132` for arrival, `133` for departure.
    pub qualifier: &'static str,
    /// The operation's own timestamp.
    pub value: Timestamp,
}

/// `TDT` content.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportBlock {
    /// Haulier, if known.
    pub carrier: Option<String>,
    /// Truck registration, if known.
    pub vehicle: Option<String>,
}

/// `LOC` content.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationBlock {
    /// Depot UN/LOCODE.
    pub location_code: String,
    /// Yard inside the depot.
    pub yard: Option<String>,
}

/// One `DAM` segment.
#[derive(Debug, Clone, PartialEq)]
pub struct DamageBlock {
    /// Free-text description, escaped on output.
    pub description: String,
}

/// One equipment group (`EQD` and its dependent segments).
#[derive(Debug, Clone, PartialEq)]
pub struct EquipmentDetail {
    /// Container number.
    pub container_number: ContainerNumber,
    /// ISO size/type code.
    pub size_type: &'static str,
    /// Equipment status code (import/export side).
    pub status_code: &'static str,
    /// Full/empty indicator.
    pub full_empty: &'static str,
    /// Gross weight in kilograms.
    pub gross_weight_kg: Option<u32>,
    /// Damage notes.
    pub damages: Vec<DamageBlock>,
    /// Seal numbers.
    pub seals: Vec<String>,
    /// Temperature set-point in degrees Celsius.
    pub temperature_celsius: Option<f64>,
}

/// Structured CODECO message, built fresh per attempt.
///
/// Holds at least one [`EquipmentDetail`]; [`CodecoEncoder::build`] refuses
/// to create one without.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecoMessage {
    /// Envelope.
    pub interchange: InterchangeHeader,
    /// Message header.
    pub header: MessageHeader,
    /// Beginning of message.
    pub beginning: BeginningOfMessage,
    /// Event date/time.
    pub event_time: DateTimePeriod,
    /// Transport details.
    pub transport: TransportBlock,
    /// Location details.
    pub location: LocationBlock,
    /// Equipment groups, one per container.
    pub equipment: Vec<EquipmentDetail>,
    /// `UNT` counting policy.
    pub segment_count_scope: SegmentCountScope,
}

impl CodecoMessage {
    /// Message body segments from `UNH` to the last equipment segment.
    fn body(&self) -> Vec<Segment> {
        let mut segments = vec![
            Segment::new("UNH")
                .simple(self.header.reference.as_str())
                .composite([
                    self.header.message_type,
                    self.header.version,
                    self.header.release,
                    self.header.agency,
                ]),
            Segment::new("BGM")
                .simple(self.beginning.document_code)
                .simple(self.beginning.document_number.clone())
                .simple(self.beginning.function),
            Segment::new("DTM").composite([
                self.event_time.qualifier.to_string(),
                self.event_time.value.format("%Y%m%d%H%M"),
                DTM_FORMAT_CCYYMMDDHHMM.to_string(),
            ]),
            Segment::new("TDT")
                .simple(TDT_STAGE_PRE_CARRIAGE)
                .empty()
                .simple(TDT_MODE_ROAD)
                .simple(TDT_MEANS_TRUCK)
                .optional(self.transport.carrier.clone())
                .empty()
                .empty()
                .optional(self.transport.vehicle.clone()),
            Segment::new("LOC")
                .simple(LOC_PLACE_OF_ACTIVITY)
                .composite([
                    self.location.location_code.as_str(),
                    LOC_LIST_UNLOCODE,
                    LOC_AGENCY_UNECE,
                ])
                .optional(self.location.yard.clone()),
        ];

        for equipment in &self.equipment {
            segments.push(
                Segment::new("EQD")
                    .simple(EQD_CONTAINER)
                    .simple(equipment.container_number.as_str())
                    .composite([equipment.size_type, EQD_LIST_ISO6346, EQD_AGENCY_ISO])
                    .empty()
                    .empty()
                    .simple(equipment.full_empty),
            );
            segments.push(
                Segment::new("STS")
                    .simple(STS_EQUIPMENT_STATUS)
                    .simple(equipment.status_code),
            );
            if let Some(weight) = equipment.gross_weight_kg {
                segments.push(
                    Segment::new("MEA")
                        .simple(MEA_PURPOSE_WEIGHT)
                        .simple(MEA_GROSS_WEIGHT)
                        .composite([UNIT_KILOGRAM.to_string(), weight.to_string()]),
                );
            }
            for damage in &equipment.damages {
                segments.push(
                    Segment::new("DAM")
                        .simple(DAM_QUALIFIER_DAMAGED)
                        .composite([DAM_TYPE_GENERIC, "", "", damage.description.as_str()])
                        .simple(DAM_AREA_UNSPECIFIED)
                        .simple(DAM_COMPONENT_UNSPECIFIED)
                        .simple(DAM_EXTENT_UNSPECIFIED),
                );
            }
            for seal in &equipment.seals {
                segments.push(
                    Segment::new("SEL")
                        .simple(seal.as_str())
                        .simple(SEAL_ISSUER_CARRIER),
                );
            }
            if let Some(celsius) = equipment.temperature_celsius {
                segments.push(
                    Segment::new("TMP")
                        .simple(TMP_TRANSPORT_TEMPERATURE)
                        .composite([format!("{celsius:.1}"), UNIT_CELSIUS.to_string()]),
                );
            }
        }
        segments
    }

    /// Number of segments the `UNT` trailer reports.
    pub fn segment_count(&self) -> usize {
        self.count_for(self.body().len())
    }

    fn count_for(&self, body_len: usize) -> usize {
        // Body plus UNT itself; the interchange scope adds UNA and UNB.
        let message = body_len + 1;
        match self.segment_count_scope {
            SegmentCountScope::Message => message,
            SegmentCountScope::Interchange => message + 2,
        }
    }

    /// Serializes the message to EDIFACT text with standard separators.
    ///
    /// No whitespace is added between segments.
    pub fn render(&self) -> String {
        let separators = Separators::STANDARD;
        let body = self.body();
        let count = self.count_for(body.len());

        let mut out = separators.service_string_advice();
        Segment::new("UNB")
            .composite([SYNTAX_IDENTIFIER, SYNTAX_VERSION])
            .simple(self.interchange.sender.as_str())
            .simple(self.interchange.recipient.as_str())
            .composite([
                self.interchange.prepared_at.format("%y%m%d"),
                self.interchange.prepared_at.format("%H%M"),
            ])
            .simple(self.interchange.control_reference.as_str())
            .render(&separators, &mut out);
        for segment in &body {
            segment.render(&separators, &mut out);
        }
        Segment::new("UNT")
            .simple(count.to_string())
            .simple(self.header.reference.as_str())
            .render(&separators, &mut out);
        Segment::new("UNZ")
            .simple("1")
            .simple(self.interchange.control_reference.as_str())
            .render(&separators, &mut out);
        out
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Maps a recorded container size to its ISO size/type code.
///
/// Accepts `20ft`, `20`, `20'` (and the 40ft equivalents), ignoring case and
/// surrounding whitespace.
pub fn iso_size_type(size: &str) -> Option<&'static str> {
    let normalized = size.trim().to_ascii_lowercase().replace(' ', "");
    let digits = normalized
        .trim_end_matches("ft")
        .trim_end_matches('\'')
        .trim_end_matches("feet");
    match digits {
        "20" => Some(SIZE_TYPE_20FT),
        "40" => Some(SIZE_TYPE_40FT),
        _ => None,
    }
}

/// Pure CODECO encoder.
#[derive(Debug, Clone, Default)]
pub struct CodecoEncoder {
    options: EncoderOptions,
}

impl CodecoEncoder {
    /// Creates an encoder with the given options.
    pub fn new(options: EncoderOptions) -> Self {
        Self { options }
    }

    /// Active options.
    pub fn options(&self) -> &EncoderOptions {
        &self.options
    }

    /// Builds the logical message for `request`.
    pub fn build(&self, request: &EncodeRequest) -> Result<CodecoMessage, EncodeError> {
        let first = request.containers.first().ok_or(EncodeError::NoEquipment)?;

        if request.sender.trim().is_empty() {
            return Err(EncodeError::InvalidField {
                field: "sender".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let (document_code, qualifier, status_code) = match request.kind {
            OperationKind::GateIn => (DOCUMENT_GATE_IN, DTM_ARRIVAL, STATUS_IMPORT),
            OperationKind::GateOut => (DOCUMENT_GATE_OUT, DTM_DEPARTURE, STATUS_EXPORT),
        };

        let equipment = request
            .containers
            .iter()
            .map(|container| self.equipment(container, status_code))
            .collect::<Result<Vec<_>, _>>()?;

        let transport = request.transport.clone().unwrap_or_default();

        Ok(CodecoMessage {
            interchange: InterchangeHeader {
                sender: request.sender.clone(),
                recipient: request.recipient.as_str().to_string(),
                prepared_at: request.prepared_at,
                control_reference: request.reference.clone(),
            },
            header: MessageHeader {
                reference: request.reference.clone(),
                message_type: MESSAGE_TYPE,
                version: MESSAGE_VERSION,
                release: MESSAGE_RELEASE,
                agency: CONTROLLING_AGENCY,
            },
            beginning: BeginningOfMessage {
                document_code,
                document_number: format!(
                    "{}_{}_{}",
                    request.kind.token(),
                    first.number,
                    request.occurred_at.format("%Y%m%d")
                ),
                function: MESSAGE_FUNCTION_ORIGINAL,
            },
            event_time: DateTimePeriod {
                qualifier,
                value: request.occurred_at,
            },
            transport: TransportBlock {
                carrier: transport.haulier,
                vehicle: transport.vehicle_registration,
            },
            location: LocationBlock {
                location_code: self.options.location_code.clone(),
                yard: request.yard.as_ref().map(|y| y.as_str().to_string()),
            },
            equipment,
            segment_count_scope: self.options.segment_count,
        })
    }

    /// Builds and renders `request` in one step.
    pub fn encode(&self, request: &EncodeRequest) -> Result<String, EncodeError> {
        self.build(request).map(|message| message.render())
    }

    fn equipment(
        &self,
        container: &ContainerSnapshot,
        status_code: &'static str,
    ) -> Result<EquipmentDetail, EncodeError> {
        let size_type = match iso_size_type(&container.size) {
            Some(code) => code,
            None => match self.options.size_fallback {
                SizeFallback::Lenient => {
                    warn!(
                        container_number = %container.number,
                        size = %container.size,
                        fallback = SIZE_TYPE_40FT,
                        "Unknown container size; using 40ft size/type code"
                    );
                    SIZE_TYPE_40FT
                }
                SizeFallback::Strict => {
                    return Err(EncodeError::UnknownContainerSize {
                        container: container.number.clone(),
                        size: container.size.clone(),
                    })
                }
            },
        };

        if let Some(celsius) = container.temperature_celsius {
            if !celsius.is_finite() {
                return Err(EncodeError::InvalidField {
                    field: format!("temperature of {}", container.number),
                    reason: "must be a finite number".to_string(),
                });
            }
        }

        Ok(EquipmentDetail {
            container_number: container.number.clone(),
            size_type,
            status_code,
            full_empty: match container.load_status {
                crate::LoadStatus::Full => FULL_INDICATOR,
                crate::LoadStatus::Empty => EMPTY_INDICATOR,
            },
            gross_weight_kg: container.gross_weight_kg,
            damages: container
                .damage_notes
                .iter()
                .filter(|note| !note.trim().is_empty())
                .map(|note| DamageBlock {
                    description: note.trim().to_string(),
                })
                .collect(),
            seals: container
                .seal_numbers
                .iter()
                .filter(|seal| !seal.trim().is_empty())
                .map(|seal| seal.trim().to_string())
                .collect(),
            temperature_celsius: container.temperature_celsius,
        })
    }
}
