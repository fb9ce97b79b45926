//! The two orchestration hops.

use std::sync::Arc;

use async_trait::async_trait;
use bus::EventHandler;
use codeco::{GatewayBus, GatewayEvent, MessageType, OperationId, OperationKind};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use transmission::TransmissionManager;

use crate::{OperationSnapshots, PendingOperation};

async fn report_failure(bus: &GatewayBus, entity_id: OperationId, error: String) {
    bus.publish(GatewayEvent::EdiTransmissionFailed {
        entity_id,
        transmission_id: None,
        error,
    })
    .await;
}

/// First hop: turns a gate completion into a transmission request.
///
/// Keeps the operation snapshot for the second hop and publishes
/// `EDI_TRANSMISSION_REQUESTED`. Contains no protocol logic.
pub struct GateCompletionListener {
    snapshots: Arc<OperationSnapshots>,
    bus: GatewayBus,
}

impl GateCompletionListener {
    /// Creates the listener.
    pub fn new(snapshots: Arc<OperationSnapshots>, bus: GatewayBus) -> Self {
        Self { snapshots, bus }
    }
}

#[async_trait]
impl EventHandler<GatewayEvent> for GateCompletionListener {
    async fn handle(&self, event: GatewayEvent) -> anyhow::Result<()> {
        let event_kind = event.event_kind();
        let (expected, pending) = match event {
            GatewayEvent::GateInCompleted {
                container,
                operation,
            } => (
                OperationKind::GateIn,
                PendingOperation {
                    operation,
                    containers: vec![container],
                },
            ),
            GatewayEvent::GateOutCompleted {
                containers,
                mut operation,
                booking_reference,
            } => {
                if operation.booking_reference.is_none() {
                    operation.booking_reference = booking_reference;
                }
                (
                    OperationKind::GateOut,
                    PendingOperation {
                        operation,
                        containers,
                    },
                )
            }
            _ => {
                debug!(event_kind = %event_kind, "Ignoring event");
                return Ok(());
            }
        };

        let entity_id = pending.operation.id.clone();
        let entity_type = pending.operation.kind;
        if entity_type != expected {
            warn!(
                operation_id = %entity_id,
                operation = %entity_type,
                event_kind = %event_kind,
                "Operation kind does not match its completion event"
            );
            report_failure(
                &self.bus,
                entity_id,
                format!("{event_kind} carries a {entity_type} operation"),
            )
            .await;
            return Ok(());
        }

        if !self.snapshots.admit(pending) {
            warn!(operation_id = %entity_id, "Duplicate completion event ignored");
            return Ok(());
        }

        info!(operation_id = %entity_id, operation = %entity_type, "Requesting EDI transmission");
        self.bus
            .publish(GatewayEvent::EdiTransmissionRequested {
                entity_id,
                entity_type,
                message_type: MessageType::Codeco,
            })
            .await;
        Ok(())
    }

    fn name(&self) -> &str {
        "gate-completion"
    }
}

/// Manager calls started by [`TransmissionRequestListener`] that have not
/// settled yet.
#[derive(Debug, Default)]
pub struct InFlightTransmissions {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl InFlightTransmissions {
    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    /// Waits until every transmission request received so far has published
    /// its outcome.
    pub async fn wait_idle(&self) {
        loop {
            let pending: Vec<_> = std::mem::take(&mut *self.tasks.lock());
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    error!(error = %e, "Transmission request task aborted");
                }
            }
        }
    }
}

/// Second hop: runs the transmission and reports the outcome.
///
/// The manager call runs on its own task and is not subject to the bus
/// handler timeout. Never returns an error to the bus. Every failure becomes an `EDI_TRANSMISSION_FAILED` event, so a
/// failed transmission never reaches back into the gate-operation flow.
pub struct TransmissionRequestListener {
    snapshots: Arc<OperationSnapshots>,
    manager: TransmissionManager,
    bus: GatewayBus,
    in_flight: Arc<InFlightTransmissions>,
}

impl TransmissionRequestListener {
    /// Creates the listener.
    pub fn new(
        snapshots: Arc<OperationSnapshots>,
        manager: TransmissionManager,
        bus: GatewayBus,
        in_flight: Arc<InFlightTransmissions>,
    ) -> Self {
        Self {
            snapshots,
            manager,
            bus,
            in_flight,
        }
    }
}

async fn transmit(
    manager: TransmissionManager,
    bus: GatewayBus,
    entity_id: OperationId,
    pending: PendingOperation,
) {
    match manager
        .process_operation(&pending.operation, &pending.containers)
        .await
    {
        Ok(entry) => {
            info!(
                operation_id = %entity_id,
                transmission_id = %entry.id,
                partner_code = %entry.partner_code,
                "EDI transmission started"
            );
            bus.publish(GatewayEvent::EdiTransmissionCompleted {
                entity_id,
                transmission_id: entry.id,
            })
            .await;
        }
        Err(e) => {
            error!(
                operation_id = %entity_id,
                error = %e,
                code = e.code(),
                "EDI transmission failed"
            );
            report_failure(&bus, entity_id, e.to_string()).await;
        }
    }
}

#[async_trait]
impl EventHandler<GatewayEvent> for TransmissionRequestListener {
    async fn handle(&self, event: GatewayEvent) -> anyhow::Result<()> {
        let GatewayEvent::EdiTransmissionRequested {
            entity_id,
            message_type,
            ..
        } = event
        else {
            return Ok(());
        };

        if message_type != MessageType::Codeco {
            report_failure(
                &self.bus,
                entity_id,
                format!("Unsupported message type {message_type}"),
            )
            .await;
            return Ok(());
        }

        let Some(pending) = self.snapshots.take(&entity_id) else {
            error!(operation_id = %entity_id, "No snapshot for requested transmission");
            report_failure(
                &self.bus,
                entity_id,
                "No operation snapshot available".to_string(),
            )
            .await;
            return Ok(());
        };

        let handle = tokio::spawn(transmit(
            self.manager.clone(),
            self.bus.clone(),
            entity_id,
            pending,
        ));
        self.in_flight.track(handle);
        Ok(())
    }

    fn name(&self) -> &str {
        "transmission-request"
    }
}
