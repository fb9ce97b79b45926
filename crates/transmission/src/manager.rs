//! The [`TransmissionManager`]: the only component that creates or mutates
//! transmission log entries.
//!
//! ## Delivery flow
//!
//! 1. Resolve the partner for the (first) container's client.
//! 2. Encode the message. Encoding errors are returned to the caller and
//!    nothing is logged.
//! 3. Persist a `PENDING` entry, mark it `SENT`, persist again.
//! 4. Spawn the delivery. The caller gets the `SENT` entry back without
//!    waiting; a delivery error later moves the entry to `FAILED` and
//!    publishes `EDI_TRANSMISSION_FAILED`.
//!
//! Sandbox partner configurations always go to the sandbox transport.
//!
//! ## Concurrency
//!
//! Mutations of one entry are serialized by a per-entry async lock;
//! different entries proceed concurrently.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use codeco::{
    AcknowledgmentSource, BookingReference, CodecoEncoder, ContainerSnapshot, EncodeError, EncodeRequest,
    FileNameContext, GateOperation, GatewayBus, GatewayEvent, MessageReference, NewTransmission,
    OperationId, OperationKind, OutboundMessage, PartnerConfig, PartnerRegistry, Timestamp,
    TransmissionError, TransmissionId, TransmissionLogEntry, TransmissionStatus,
    TransmissionStore, Transport, TransportDetails, YardId,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Collaborators the manager is built from.
pub struct ManagerDependencies {
    /// Partner lookups.
    pub registry: PartnerRegistry,
    /// Message encoder.
    pub encoder: CodecoEncoder,
    /// Transport for live partners.
    pub live_transport: Arc<dyn Transport>,
    /// Transport for sandbox partners, including the `DEFAULT` fallback.
    pub sandbox_transport: Arc<dyn Transport>,
    /// Transmission log persistence.
    pub store: Arc<dyn TransmissionStore>,
    /// Acknowledgment lookups.
    pub acknowledgments: Arc<dyn AcknowledgmentSource>,
    /// Bus for asynchronous failure events. `None` disables publishing.
    pub bus: Option<GatewayBus>,
}

/// Everything needed to transmit one message.
struct Transmit {
    kind: OperationKind,
    operation_id: Option<OperationId>,
    booking_reference: Option<BookingReference>,
    containers: Vec<ContainerSnapshot>,
    occurred_at: Timestamp,
    yard: Option<YardId>,
    transport: Option<TransportDetails>,
}

struct Inner {
    registry: PartnerRegistry,
    encoder: CodecoEncoder,
    live_transport: Arc<dyn Transport>,
    sandbox_transport: Arc<dyn Transport>,
    store: Arc<dyn TransmissionStore>,
    acknowledgments: Arc<dyn AcknowledgmentSource>,
    bus: Option<GatewayBus>,
    sequence: AtomicU32,
    sequence_seeded: tokio::sync::OnceCell<()>,
    locks: DashMap<TransmissionId, Arc<tokio::sync::Mutex<()>>>,
    deliveries: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn lock_for(&self, id: TransmissionId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.locks.entry(id).or_default().value())
    }

    fn transport_for(&self, config: &PartnerConfig) -> Arc<dyn Transport> {
        if config.sandbox || config.partner_code.is_default() {
            Arc::clone(&self.sandbox_transport)
        } else {
            Arc::clone(&self.live_transport)
        }
    }

    /// Next message-reference sequence number.
    ///
    /// The first call advances the counter past every entry already in the
    /// store, so a restarted process does not reuse the references of an
    /// earlier run within the same minute.
    async fn next_sequence(&self) -> Result<u32, TransmissionError> {
        self.sequence_seeded
            .get_or_try_init(|| async {
                let recorded = self.store.list().await?.len();
                self.sequence.fetch_add(recorded as u32, Ordering::Relaxed);
                debug!(recorded, "Message reference sequence seeded from the store");
                Ok::<_, TransmissionError>(())
            })
            .await?;
        Ok(self.sequence.fetch_add(1, Ordering::Relaxed))
    }

    async fn load(&self, id: TransmissionId) -> Result<TransmissionLogEntry, TransmissionError> {
        self.store
            .get(id)
            .await?
            .ok_or(TransmissionError::NotFound(id))
    }
}

/// Orchestrates encoding, delivery, logging and acknowledgment tracking.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct TransmissionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TransmissionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransmissionManager")
            .field("live_transport", &self.inner.live_transport.name())
            .field("sandbox_transport", &self.inner.sandbox_transport.name())
            .field("publishes_events", &self.inner.bus.is_some())
            .finish()
    }
}

impl TransmissionManager {
    /// Creates a manager from its collaborators.
    pub fn new(deps: ManagerDependencies) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: deps.registry,
                encoder: deps.encoder,
                live_transport: deps.live_transport,
                sandbox_transport: deps.sandbox_transport,
                store: deps.store,
                acknowledgments: deps.acknowledgments,
                bus: deps.bus,
                sequence: AtomicU32::new(1),
                sequence_seeded: tokio::sync::OnceCell::new(),
                locks: DashMap::new(),
                deliveries: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Partner registry in use.
    pub fn registry(&self) -> &PartnerRegistry {
        &self.inner.registry
    }

    // -----------------------------------------------------------------------
    // Transmission entry points
    // -----------------------------------------------------------------------

    /// Reports a single container gate-in.
    ///
    /// The container must carry its gate-in timestamp.
    pub async fn process_gate_in(
        &self,
        container: &ContainerSnapshot,
    ) -> Result<TransmissionLogEntry, TransmissionError> {
        self.process_single(OperationKind::GateIn, container).await
    }

    /// Reports a single container gate-out.
    ///
    /// The container must carry its gate-out timestamp.
    pub async fn process_gate_out(
        &self,
        container: &ContainerSnapshot,
    ) -> Result<TransmissionLogEntry, TransmissionError> {
        self.process_single(OperationKind::GateOut, container).await
    }

    async fn process_single(
        &self,
        kind: OperationKind,
        container: &ContainerSnapshot,
    ) -> Result<TransmissionLogEntry, TransmissionError> {
        let occurred_at = require_timestamp(container, kind)?;
        self.transmit(Transmit {
            kind,
            operation_id: None,
            booking_reference: None,
            containers: vec![container.clone()],
            occurred_at,
            yard: None,
            transport: None,
        })
        .await
    }

    /// Reports a whole gate operation as one message with one equipment
    /// block per container.
    ///
    /// Containers are taken in the order of `operation.container_ids`; when
    /// the operation lists no ids, `containers` is used as given. The
    /// operation's completion time drives the message dates.
    pub async fn process_operation(
        &self,
        operation: &GateOperation,
        containers: &[ContainerSnapshot],
    ) -> Result<TransmissionLogEntry, TransmissionError> {
        let selected = if operation.container_ids.is_empty() {
            containers.to_vec()
        } else {
            operation
                .container_ids
                .iter()
                .map(|id| {
                    containers
                        .iter()
                        .find(|c| &c.id == id)
                        .cloned()
                        .ok_or_else(|| TransmissionError::UnknownContainer(id.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        for container in &selected {
            require_timestamp(container, operation.kind)?;
        }

        self.transmit(Transmit {
            kind: operation.kind,
            operation_id: Some(operation.id.clone()),
            booking_reference: operation.booking_reference.clone(),
            containers: selected,
            occurred_at: operation.completed_at,
            yard: Some(operation.yard.clone()),
            transport: operation.transport.clone(),
        })
        .await
    }

    #[instrument(skip_all, fields(operation = %request.kind, containers = request.containers.len()))]
    async fn transmit(&self, request: Transmit) -> Result<TransmissionLogEntry, TransmissionError> {
        let first = request.containers.first().ok_or(EncodeError::NoEquipment)?;
        let (partner_code, config) = self.inner.registry.resolve_for_client(&first.client_code);
        if request
            .containers
            .iter()
            .any(|c| c.client_code != first.client_code)
        {
            warn!(
                partner_code = %partner_code,
                "Operation mixes clients; reporting all containers to the first container's partner"
            );
        }
        for container in request
            .containers
            .iter()
            .filter(|c| !c.number.has_valid_check_digit())
        {
            warn!(
                container_number = %container.number,
                "Container number fails the ISO 6346 check digit; reporting it as given"
            );
        }

        let prepared_at = Timestamp::now();
        let sequence = self.inner.next_sequence().await?;
        let reference = MessageReference::generate(prepared_at, sequence);
        let container_numbers: Vec<_> = request.containers.iter().map(|c| c.number.clone()).collect();
        let file_name = config.render_file_name(&FileNameContext {
            occurred_at: request.occurred_at,
            container: &first.number,
            operation: request.kind,
            reference: &reference,
        });

        let payload = self.inner.encoder.encode(&EncodeRequest {
            kind: request.kind,
            containers: request.containers,
            occurred_at: request.occurred_at,
            prepared_at,
            reference: reference.clone(),
            sender: config.sender_code.clone(),
            recipient: partner_code.clone(),
            yard: request.yard,
            transport: request.transport,
        })?;

        let sandbox = config.sandbox || partner_code.is_default();
        let mut entry = TransmissionLogEntry::pending(
            NewTransmission {
                operation_id: request.operation_id,
                operation: request.kind,
                booking_reference: request.booking_reference,
                container_numbers,
                file_name,
                message_reference: reference,
                partner_code,
                sandbox,
                payload,
            },
            prepared_at,
        )
        .ok_or(EncodeError::NoEquipment)?;

        let lock = self.inner.lock_for(entry.id);
        let _guard = lock.lock().await;

        self.inner.store.insert(&entry).await?;
        entry.mark_sent(Timestamp::now())?;
        self.inner.store.update(&entry).await?;

        info!(
            transmission_id = %entry.id,
            partner_code = %entry.partner_code,
            container_number = %entry.container_number,
            file_name = %entry.file_name,
            sandbox = entry.sandbox,
            "CODECO transmission sent"
        );

        self.spawn_delivery(&entry, config);
        Ok(entry)
    }

    /// Retries a `FAILED` entry.
    ///
    /// Increments the retry counter on the same entry, redelivers the stored
    /// message and returns the entry in `SENT`. Any other state is rejected
    /// with `INVALID_STATE` and the entry is left unchanged.
    #[instrument(skip(self), fields(transmission_id = %id))]
    pub async fn retry_failed_transmission(
        &self,
        id: TransmissionId,
    ) -> Result<TransmissionLogEntry, TransmissionError> {
        let lock = self.inner.lock_for(id);
        let _guard = lock.lock().await;

        let mut entry = self.inner.load(id).await?;
        if let Err(e) = entry.begin_retry(Timestamp::now()) {
            warn!(status = %entry.status, "Retry rejected");
            return Err(e);
        }
        self.inner.store.update(&entry).await?;

        info!(
            retry_count = entry.retry_count,
            partner_code = %entry.partner_code,
            "Retrying CODECO transmission"
        );

        let config = self.inner.registry.config(&entry.partner_code);
        self.spawn_delivery(&entry, config);
        Ok(entry)
    }

    fn spawn_delivery(&self, entry: &TransmissionLogEntry, config: Arc<PartnerConfig>) {
        let transport = self.inner.transport_for(&config);
        let message = OutboundMessage {
            transmission_id: entry.id,
            file_name: entry.file_name.clone(),
            payload: entry.payload.clone(),
            message_reference: entry.message_reference.clone(),
            partner: config,
        };
        let entity_id = entity_id_of(entry);
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            let result = transport.deliver(&message).await;
            settle_delivery(&inner, message.transmission_id, entity_id, transport.name(), result)
                .await;
        });

        let mut deliveries = self.inner.deliveries.lock();
        deliveries.retain(|h| !h.is_finished());
        deliveries.push(handle);
    }

    /// Waits for every delivery started so far to settle.
    pub async fn wait_for_deliveries(&self) {
        loop {
            let pending: Vec<_> = std::mem::take(&mut *self.inner.deliveries.lock());
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    error!(error = %e, "Delivery task aborted");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Acknowledgments
    // -----------------------------------------------------------------------

    /// Polls the acknowledgment source for every entry awaiting one and
    /// moves acknowledged entries to `ACKNOWLEDGED`.
    ///
    /// Returns the entries acknowledged by this pass. Poll failures are
    /// logged and leave the entry in `SENT`.
    pub async fn check_pending_acknowledgments(
        &self,
    ) -> Result<Vec<TransmissionLogEntry>, TransmissionError> {
        let waiting: Vec<_> = self
            .inner
            .store
            .list()
            .await?
            .into_iter()
            .filter(TransmissionLogEntry::awaits_acknowledgment)
            .collect();

        let mut acknowledged = Vec::new();
        for entry in waiting {
            match self.inner.acknowledgments.poll(&entry).await {
                Ok(Some(at)) => {
                    if let Some(updated) = self.record_acknowledgment(entry.id, at).await? {
                        acknowledged.push(updated);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(
                    transmission_id = %entry.id,
                    partner_code = %entry.partner_code,
                    error = %e,
                    "Acknowledgment poll failed"
                ),
            }
        }

        if !acknowledged.is_empty() {
            info!(count = acknowledged.len(), "Transmissions acknowledged");
        }
        Ok(acknowledged)
    }

    /// Records a partner acknowledgment for `id`.
    ///
    /// Returns `None`, leaving the entry unchanged, when the entry is not in
    /// `SENT`.
    pub async fn record_acknowledgment(
        &self,
        id: TransmissionId,
        at: Timestamp,
    ) -> Result<Option<TransmissionLogEntry>, TransmissionError> {
        let lock = self.inner.lock_for(id);
        let _guard = lock.lock().await;

        let mut entry = self.inner.load(id).await?;
        if entry.status != TransmissionStatus::Sent {
            debug!(transmission_id = %id, status = %entry.status, "Acknowledgment ignored");
            return Ok(None);
        }
        entry.mark_acknowledged(at)?;
        self.inner.store.update(&entry).await?;
        info!(transmission_id = %id, partner_code = %entry.partner_code, "Transmission acknowledged");
        Ok(Some(entry))
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// One entry.
    pub async fn get_transmission(
        &self,
        id: TransmissionId,
    ) -> Result<TransmissionLogEntry, TransmissionError> {
        self.inner.load(id).await
    }

    /// All entries in creation order.
    pub async fn get_transmission_logs(
        &self,
    ) -> Result<Vec<TransmissionLogEntry>, TransmissionError> {
        Ok(self.inner.store.list().await?)
    }

    /// Entries in `FAILED`.
    pub async fn get_failed_transmissions(
        &self,
    ) -> Result<Vec<TransmissionLogEntry>, TransmissionError> {
        self.filtered(|e| e.status == TransmissionStatus::Failed).await
    }

    /// Entries not yet acknowledged and not failed (`PENDING` or `SENT`).
    pub async fn get_pending_transmissions(
        &self,
    ) -> Result<Vec<TransmissionLogEntry>, TransmissionError> {
        self.filtered(|e| {
            matches!(e.status, TransmissionStatus::Pending | TransmissionStatus::Sent)
        })
        .await
    }

    async fn filtered(
        &self,
        keep: impl Fn(&TransmissionLogEntry) -> bool,
    ) -> Result<Vec<TransmissionLogEntry>, TransmissionError> {
        Ok(self
            .inner
            .store
            .list()
            .await?
            .into_iter()
            .filter(|e| keep(e))
            .collect())
    }
}

fn require_timestamp(
    container: &ContainerSnapshot,
    kind: OperationKind,
) -> Result<Timestamp, TransmissionError> {
    container
        .timestamp_for(kind)
        .ok_or_else(|| TransmissionError::MissingTimestamp {
            container: container.number.to_string(),
            kind: kind.token().to_string(),
        })
}

// Single-container transmissions have no operation; they are reported
// under the container number.
fn entity_id_of(entry: &TransmissionLogEntry) -> Option<OperationId> {
    entry
        .operation_id
        .clone()
        .or_else(|| OperationId::new(entry.container_number.as_str()))
}

async fn settle_delivery(
    inner: &Inner,
    id: TransmissionId,
    entity_id: Option<OperationId>,
    transport: &str,
    result: Result<codeco::DeliveryId, codeco::TransportError>,
) {
    let lock = inner.lock_for(id);
    let _guard = lock.lock().await;

    let mut entry = match inner.load(id).await {
        Ok(entry) => entry,
        Err(e) => {
            error!(transmission_id = %id, error = %e, "Cannot load entry to settle delivery");
            return;
        }
    };

    match result {
        Ok(delivery_id) => {
            debug!(
                transmission_id = %id,
                transport,
                delivery_id = %delivery_id,
                "Delivery completed"
            );
            if entry.status == TransmissionStatus::Sent {
                entry.delivery_id = Some(delivery_id);
                if let Err(e) = inner.store.update(&entry).await {
                    error!(transmission_id = %id, error = %e, "Cannot record delivery receipt");
                }
            }
        }
        Err(transport_error) => {
            let message = transport_error.to_string();
            warn!(
                transmission_id = %id,
                transport,
                partner_code = %entry.partner_code,
                error = %message,
                "Delivery failed"
            );
            if let Err(e) = entry.mark_failed(message.clone()) {
                warn!(transmission_id = %id, error = %e, "Delivery failure ignored");
                return;
            }
            if let Err(e) = inner.store.update(&entry).await {
                error!(transmission_id = %id, error = %e, "Cannot record delivery failure");
                return;
            }
            if let (Some(bus), Some(entity_id)) = (&inner.bus, entity_id) {
                bus.publish_fire_and_forget(GatewayEvent::EdiTransmissionFailed {
                    entity_id,
                    transmission_id: Some(id),
                    error: message,
                });
            }
        }
    }
}
