//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive, so a [`ClientCode`] cannot be passed where a
//! [`PartnerCode`] is expected even though both are strings under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty
            /// or only whitespace.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.trim().is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers supplied by the gate-operation collaborator
// ---------------------------------------------------------------------------

string_id! {
    /// Identifies a container record in the depot system.
    ///
    /// Opaque to the gateway; only used for correlation in logs and events.
    ContainerId
}

string_id! {
    /// Identifies a completed gate operation (one gate-in or one gate-out).
    ///
    /// Carried as `entity_id` on every outbound transmission event.
    OperationId
}

string_id! {
    /// The depot client (shipping line or lessor) that owns a container.
    ///
    /// Mapped to a [`PartnerCode`] by the partner registry.
    ClientCode
}

string_id! {
    /// The operator who performed the gate operation.
    OperatorId
}

string_id! {
    /// Identifies a yard inside the depot.
    YardId
}

string_id! {
    /// Booking reference supplied with a gate-out.
    BookingReference
}

string_id! {
    /// Opaque receipt returned by a transport for one delivery.
    ///
    /// For the outbox transport this is the written file path; for HTTP it is
    /// the upload URL.
    DeliveryId
}

// ---------------------------------------------------------------------------
// Partner codes
// ---------------------------------------------------------------------------

/// Identifies the external trading partner receiving CODECO messages.
///
/// Partner codes are case-sensitive configuration keys. The reserved code
/// [`PartnerCode::DEFAULT`] names the sandbox fallback configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartnerCode(String);

impl PartnerCode {
    /// Code of the fallback sandbox partner.
    pub const DEFAULT: &'static str = "DEFAULT";

    /// Creates a partner code, returning `None` if the value is blank.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let v = value.into();
        if v.trim().is_empty() {
            None
        } else {
            Some(Self(v))
        }
    }

    /// The reserved `DEFAULT` partner code.
    pub fn default_partner() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    /// Returns `true` for the reserved `DEFAULT` code.
    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PartnerCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Container number
// ---------------------------------------------------------------------------

/// An 11-character ISO 6346 style container number (e.g. `MSKU1234567`).
///
/// Construction upper-cases the input and requires exactly eleven ASCII
/// alphanumeric characters. The check digit is *not* enforced because depots
/// routinely handle legacy equipment with invalid check digits; use
/// [`ContainerNumber::has_valid_check_digit`] when a caller needs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerNumber(String);

impl ContainerNumber {
    /// Required length of a container number.
    pub const LENGTH: usize = 11;

    /// Parses a container number, returning `None` if it is not eleven
    /// ASCII alphanumeric characters.
    pub fn new(value: impl AsRef<str>) -> Option<Self> {
        let normalized = value.as_ref().trim().to_ascii_uppercase();
        let well_formed = normalized.len() == Self::LENGTH
            && normalized.chars().all(|c| c.is_ascii_alphanumeric());
        well_formed.then_some(Self(normalized))
    }

    /// Returns the number as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validates the trailing ISO 6346 check digit.
    pub fn has_valid_check_digit(&self) -> bool {
        let bytes = self.0.as_bytes();
        let mut sum: u32 = 0;
        for (position, &b) in bytes[..10].iter().enumerate() {
            let value = match b {
                b'0'..=b'9' => u32::from(b - b'0'),
                b'A'..=b'Z' => letter_value(b),
                _ => return false,
            };
            sum += value << position;
        }
        let expected = (sum % 11) % 10;
        bytes[10].is_ascii_digit() && u32::from(bytes[10] - b'0') == expected
    }
}

// ISO 6346 letter values skip multiples of 11.
fn letter_value(letter: u8) -> u32 {
    let mut value = 10;
    let mut current = b'A';
    while current < letter {
        value += 1;
        if value % 11 == 0 {
            value += 1;
        }
        current += 1;
    }
    value
}

impl TryFrom<String> for ContainerNumber {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value).ok_or_else(|| format!("invalid container number: {value:?}"))
    }
}

impl From<ContainerNumber> for String {
    fn from(value: ContainerNumber) -> Self {
        value.0
    }
}

impl std::fmt::Display for ContainerNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Message reference
// ---------------------------------------------------------------------------

/// EDIFACT message reference number (UNH 0062, max 14 characters).
///
/// Unique per transmission attempt. Also used as the interchange control
/// reference in `UNB`/`UNZ`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageReference(String);

impl MessageReference {
    /// Maximum length permitted by the EDIFACT syntax.
    pub const MAX_LENGTH: usize = 14;

    /// Creates a reference, returning `None` unless it is 1–14 ASCII
    /// alphanumeric characters.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let v = value.into();
        let valid = !v.is_empty()
            && v.len() <= Self::MAX_LENGTH
            && v.chars().all(|c| c.is_ascii_alphanumeric());
        valid.then_some(Self(v))
    }

    /// Builds `COD` + `MMDDHHMM` of `at` + a three-digit `sequence` suffix.
    ///
    /// The sequence wraps at 1000. Callers supply a counter that keeps
    /// references generated within the same minute distinct, across restarts
    /// as well.
    pub fn generate(at: crate::Timestamp, sequence: u32) -> Self {
        let stamp = at.as_datetime().format("%m%d%H%M");
        Self(format!("COD{stamp}{:03}", sequence % 1000))
    }

    /// Returns the reference as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MessageReference {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value.clone()).ok_or_else(|| format!("invalid message reference: {value:?}"))
    }
}

impl From<MessageReference> for String {
    fn from(value: MessageReference) -> Self {
        value.0
    }
}

impl std::fmt::Display for MessageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Internally generated identifiers
// ---------------------------------------------------------------------------

/// Identifies one Transmission Log Entry.
///
/// Generated when the entry is created; retries keep the same identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransmissionId(Uuid);

impl TransmissionId {
    /// Generates a new random identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::str::FromStr for TransmissionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for TransmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
