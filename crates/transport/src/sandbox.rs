//! Sandbox delivery and simulated acknowledgments.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use codeco::{
    AcknowledgmentSource, DeliveryId, OutboundMessage, Timestamp, TransmissionLogEntry, Transport,
    TransportError,
};
use tracing::info;

/// Accepts every message without sending it anywhere.
///
/// Used for sandbox partners and the `DEFAULT` fallback configuration.
#[derive(Debug, Default)]
pub struct SimulatedTransport {
    latency: Duration,
    delivered: AtomicU64,
}

impl SimulatedTransport {
    /// Creates a transport that answers after `latency`.
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            delivered: AtomicU64::new(0),
        }
    }

    /// Messages accepted so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn name(&self) -> &str {
        "sandbox"
    }

    async fn deliver(&self, message: &OutboundMessage) -> Result<DeliveryId, TransportError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        info!(
            transmission_id = %message.transmission_id,
            partner_code = %message.partner.partner_code,
            file_name = %message.file_name,
            bytes = message.payload.len(),
            "Sandbox delivery simulated"
        );
        DeliveryId::new(format!(
            "sandbox://{}/{}",
            message.partner.partner_code, message.file_name
        ))
        .ok_or_else(|| TransportError::Configuration("empty sandbox receipt".to_string()))
    }
}

/// Acknowledges every entry a fixed delay after it was sent.
///
/// Stands in for partner acknowledgments until a real acknowledgment
/// channel exists.
#[derive(Debug, Clone)]
pub struct DelayedAcknowledgment {
    delay: chrono::Duration,
}

impl DelayedAcknowledgment {
    /// Creates a source acknowledging after `delay`.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay: chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX),
        }
    }
}

#[async_trait]
impl AcknowledgmentSource for DelayedAcknowledgment {
    async fn poll(&self, entry: &TransmissionLogEntry) -> Result<Option<Timestamp>, TransportError> {
        let Some(sent) = entry.transmitted_at else {
            return Ok(None);
        };
        let due = sent
            .as_datetime()
            .checked_add_signed(self.delay)
            .map(Timestamp::from_utc);
        let now = Timestamp::now();
        Ok(due.filter(|due| *due <= now).map(|_| now))
    }
}
