//! Error and retry-policy types for the gateway domain.
//!
//! [`crate::EncodeError`] lives next to the encoder. Everything that can go
//! wrong after a message has been built is defined here: delivery failures
//! ([`TransportError`]), persistence failures ([`StoreError`]) and the
//! transmission-level errors returned to callers ([`TransmissionError`]).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{EncodeError, TransmissionId, TransmissionStatus};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether a delivery failure is safe to retry and, if so, after what delay.
///
/// Transports consult this for their own in-attempt retries. A failed
/// transmission log entry is only ever retried by an explicit operator
/// request, whatever the policy says.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The delivery may be attempted again.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// Retrying cannot succeed without a configuration change.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Failures reported by a [`crate::Transport`].
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransportError {
    /// The remote side answered and refused the file.
    #[error("Delivery rejected by {endpoint}: {reason}")]
    Rejected {
        /// Endpoint that refused the delivery.
        endpoint: String,
        /// Status line or message returned by the remote side.
        reason: String,
    },

    /// The remote side could not be reached.
    #[error("Endpoint {endpoint} unreachable: {reason}")]
    Unreachable {
        /// Endpoint that was tried.
        endpoint: String,
        /// Connection error description.
        reason: String,
    },

    /// The remote side asked the sender to slow down.
    #[error("Endpoint {endpoint} throttled the delivery")]
    Throttled {
        /// Endpoint that was tried.
        endpoint: String,
        /// Back-off requested by the remote side, in seconds.
        retry_after_secs: Option<u64>,
    },

    /// The delivery did not complete in time.
    #[error("Delivery to {endpoint} timed out after {elapsed_ms} ms")]
    Timeout {
        /// Endpoint that was tried.
        endpoint: String,
        /// Time spent before giving up.
        elapsed_ms: u64,
    },

    /// A local file-system operation failed.
    #[error("I/O error writing {path}: {reason}")]
    Io {
        /// Path involved.
        path: String,
        /// Underlying error.
        reason: String,
    },

    /// The partner configuration cannot be used by this transport.
    #[error("Invalid partner configuration: {0}")]
    Configuration(String),
}

impl TransportError {
    /// Retry decision for this failure.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Unreachable { .. } | Self::Timeout { .. } => {
                RetryPolicy::Retryable { after: None }
            }
            Self::Throttled {
                retry_after_secs, ..
            } => RetryPolicy::Retryable {
                after: retry_after_secs.map(Duration::from_secs),
            },
            Self::Rejected { .. } | Self::Io { .. } | Self::Configuration(_) => {
                RetryPolicy::NonRetryable
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Failures of the transmission log store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An entry with the same identifier already exists.
    #[error("Transmission {0} already exists")]
    Duplicate(TransmissionId),

    /// The entry to update does not exist.
    #[error("Transmission {0} not found")]
    Missing(TransmissionId),

    /// Reading or writing the backing file failed.
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An entry could not be serialized.
    #[error("Cannot serialize transmission {id}: {reason}")]
    Serialize {
        /// Entry concerned.
        id: TransmissionId,
        /// Encoder message.
        reason: String,
    },

    /// A persisted record could not be decoded.
    #[error("Corrupt store record at line {line}: {reason}")]
    Corrupt {
        /// One-based line number in the backing file.
        line: usize,
        /// Decoder message.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Transmission errors
// ---------------------------------------------------------------------------

/// Errors returned by transmission log operations.
#[derive(Debug, Error)]
pub enum TransmissionError {
    /// No entry with the requested identifier exists.
    #[error("Transmission {0} not found")]
    NotFound(TransmissionId),

    /// The requested transition is not allowed from the entry's state.
    #[error("Transmission {id} is {status}; cannot {action}")]
    InvalidState {
        /// Entry concerned.
        id: TransmissionId,
        /// State the entry is in.
        status: TransmissionStatus,
        /// Requested action, for the message.
        action: &'static str,
    },

    /// A container lacked the timestamp of the operation being reported.
    #[error("Container {container} has no {kind} timestamp")]
    MissingTimestamp {
        /// Container number.
        container: String,
        /// Operation kind token.
        kind: String,
    },

    /// The operation named containers the caller did not supply.
    #[error("Operation references unknown container {0}")]
    UnknownContainer(String),

    /// The message could not be built.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The log could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TransmissionError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::MissingTimestamp { .. } => "MISSING_TIMESTAMP",
            Self::UnknownContainer(_) => "UNKNOWN_CONTAINER",
            Self::Encode(e) => e.code(),
            Self::Store(_) => "STORE_ERROR",
        }
    }
}
