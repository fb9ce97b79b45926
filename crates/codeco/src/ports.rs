//! Port traits implemented by infrastructure crates.
//!
//! The domain defines *what* it needs from the outside world; the
//! `transport` and `transmission` crates supply the implementations and the
//! CLI wires them together.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    DeliveryId, MessageReference, PartnerConfig, StoreError, Timestamp, TransmissionId,
    TransmissionLogEntry, TransportError,
};

/// One encoded message ready for delivery.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Log entry the delivery belongs to.
    pub transmission_id: TransmissionId,
    /// Target file name.
    pub file_name: String,
    /// EDIFACT text.
    pub payload: String,
    /// Message reference, for logging.
    pub message_reference: MessageReference,
    /// Destination settings.
    pub partner: Arc<PartnerConfig>,
}

/// Delivers encoded messages to a partner.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs (`outbox`, `http`, `sandbox`, ...).
    fn name(&self) -> &str;

    /// Delivers `message` and returns a receipt.
    async fn deliver(&self, message: &OutboundMessage) -> Result<DeliveryId, TransportError>;
}

/// Tells the gateway whether a partner has acknowledged a delivery.
#[async_trait]
pub trait AcknowledgmentSource: Send + Sync {
    /// Returns the acknowledgment time for `entry`, or `None` if the partner
    /// has not acknowledged it yet.
    async fn poll(&self, entry: &TransmissionLogEntry) -> Result<Option<Timestamp>, TransportError>;
}

/// Persistence for transmission log entries.
///
/// Only the transmission manager writes through this trait.
#[async_trait]
pub trait TransmissionStore: Send + Sync {
    /// Persists a new entry.
    async fn insert(&self, entry: &TransmissionLogEntry) -> Result<(), StoreError>;

    /// Persists the new state of an existing entry.
    async fn update(&self, entry: &TransmissionLogEntry) -> Result<(), StoreError>;

    /// Loads one entry.
    async fn get(&self, id: TransmissionId) -> Result<Option<TransmissionLogEntry>, StoreError>;

    /// All entries in creation order.
    async fn list(&self) -> Result<Vec<TransmissionLogEntry>, StoreError>;
}
