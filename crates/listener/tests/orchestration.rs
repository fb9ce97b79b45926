use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bus::BusConfig;
use codeco::{
    AcknowledgmentSource, BookingReference, ClientCode, CodecoEncoder, ContainerId,
    ContainerNumber, ContainerSnapshot, DeliveryId, EventKind, GateOperation, GatewayBus,
    GatewayEvent, LoadStatus, MessageType, OperationId, OperationKind, OperatorId,
    OutboundMessage, PartnerRegistry, StoreError, Timestamp, TransmissionId, TransmissionLogEntry,
    TransmissionStatus, TransmissionStore, Transport, TransportError, YardId,
};
use parking_lot::Mutex;
use transmission::{InMemoryTransmissionStore, ManagerDependencies, TransmissionManager};

struct StubTransport {
    fail: bool,
    delivered: Mutex<Vec<String>>,
}

#[async_trait]
impl Transport for StubTransport {
    fn name(&self) -> &str {
        "stub"
    }

    async fn deliver(&self, message: &OutboundMessage) -> Result<DeliveryId, TransportError> {
        self.delivered.lock().push(message.file_name.clone());
        if self.fail {
            return Err(TransportError::Timeout {
                endpoint: "stub".to_string(),
                elapsed_ms: 1,
            });
        }
        Ok(DeliveryId::new(message.file_name.clone()).unwrap())
    }
}

struct NeverAcknowledge;

#[async_trait]
impl AcknowledgmentSource for NeverAcknowledge {
    async fn poll(&self, _entry: &TransmissionLogEntry) -> Result<Option<Timestamp>, TransportError> {
        Ok(None)
    }
}

/// Store whose writes take longer than a short bus handler timeout.
struct SlowStore {
    inner: InMemoryTransmissionStore,
    delay: Duration,
}

#[async_trait]
impl TransmissionStore for SlowStore {
    async fn insert(&self, entry: &TransmissionLogEntry) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.insert(entry).await
    }

    async fn update(&self, entry: &TransmissionLogEntry) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.update(entry).await
    }

    async fn get(&self, id: TransmissionId) -> Result<Option<TransmissionLogEntry>, StoreError> {
        self.inner.get(id).await
    }

    async fn list(&self) -> Result<Vec<TransmissionLogEntry>, StoreError> {
        self.inner.list().await
    }
}

struct Gateway {
    bus: GatewayBus,
    manager: TransmissionManager,
    transport: Arc<StubTransport>,
    listeners: listener::InstalledListeners,
}

impl Gateway {
    /// Waits for the second hop and for every delivery it started.
    async fn settle(&self) {
        self.listeners.wait_idle().await;
        self.manager.wait_for_deliveries().await;
    }
}

fn gateway(fail: bool) -> Gateway {
    gateway_with(
        fail,
        GatewayBus::new(),
        Arc::new(InMemoryTransmissionStore::new()),
    )
}

fn gateway_with(fail: bool, bus: GatewayBus, store: Arc<dyn TransmissionStore>) -> Gateway {
    let transport = Arc::new(StubTransport {
        fail,
        delivered: Mutex::new(Vec::new()),
    });
    let manager = TransmissionManager::new(ManagerDependencies {
        registry: PartnerRegistry::default(),
        encoder: CodecoEncoder::default(),
        live_transport: transport.clone(),
        sandbox_transport: transport.clone(),
        store,
        acknowledgments: Arc::new(NeverAcknowledge),
        bus: Some(bus.clone()),
    });
    let listeners = listener::install(&bus, manager.clone());
    Gateway {
        bus,
        manager,
        transport,
        listeners,
    }
}

fn container(number: &str) -> ContainerSnapshot {
    ContainerSnapshot {
        id: ContainerId::new(format!("c-{number}")).unwrap(),
        number: ContainerNumber::new(number).unwrap(),
        size: "20ft".to_string(),
        container_type: "dry".to_string(),
        client_code: ClientCode::new("MAEU").unwrap(),
        load_status: LoadStatus::Full,
        gate_in_at: Some(Timestamp::now()),
        gate_out_at: Some(Timestamp::now()),
        damage_notes: Vec::new(),
        seal_numbers: Vec::new(),
        temperature_celsius: None,
        gross_weight_kg: None,
    }
}

fn operation(id: &str, kind: OperationKind, containers: &[&ContainerSnapshot]) -> GateOperation {
    GateOperation {
        id: OperationId::new(id).unwrap(),
        kind,
        container_ids: containers.iter().map(|c| c.id.clone()).collect(),
        operator: OperatorId::new("clerk-1").unwrap(),
        yard: YardId::new("Y1").unwrap(),
        completed_at: Timestamp::now(),
        booking_reference: None,
        transport: None,
    }
}

fn gate_in(op_id: &str, number: &str) -> GatewayEvent {
    let c = container(number);
    GatewayEvent::GateInCompleted {
        operation: operation(op_id, OperationKind::GateIn, &[&c]),
        container: c,
    }
}

fn kinds(bus: &GatewayBus) -> Vec<EventKind> {
    bus.history().into_iter().map(|r| r.kind).collect()
}

#[tokio::test]
async fn test_gate_in_flows_to_transmission() {
    let g = gateway(false);

    let report = g.bus.publish(gate_in("op-1", "MSKU1234567")).await;
    g.settle().await;

    assert!(report.all_succeeded());
    assert_eq!(
        kinds(&g.bus),
        vec![
            EventKind::GateInCompleted,
            EventKind::EdiTransmissionRequested,
            EventKind::EdiTransmissionCompleted,
        ]
    );

    let logs = g.manager.get_transmission_logs().await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].operation_id.as_ref().unwrap().as_str(), "op-1");
    assert_eq!(logs[0].status, TransmissionStatus::Sent);

    let history = g.bus.history();
    match &history[1].event {
        GatewayEvent::EdiTransmissionRequested {
            entity_id,
            entity_type,
            message_type,
        } => {
            assert_eq!(entity_id.as_str(), "op-1");
            assert_eq!(*entity_type, OperationKind::GateIn);
            assert_eq!(*message_type, MessageType::Codeco);
        }
        other => panic!("unexpected event {other:?}"),
    }
    match &history[2].event {
        GatewayEvent::EdiTransmissionCompleted {
            transmission_id, ..
        } => assert_eq!(*transmission_id, logs[0].id),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_gate_ins_create_independent_entries() {
    let g = gateway(false);

    let (a, b) = tokio::join!(
        g.bus.publish(gate_in("op-a", "MSKU1234567")),
        g.bus.publish(gate_in("op-b", "TGHU7654321"))
    );
    g.settle().await;

    assert!(a.all_succeeded() && b.all_succeeded());
    let logs = g.manager.get_transmission_logs().await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_ne!(logs[0].id, logs[1].id);
    assert_ne!(logs[0].message_reference, logs[1].message_reference);
    let mut numbers: Vec<_> = logs.iter().map(|e| e.container_number.to_string()).collect();
    numbers.sort();
    assert_eq!(numbers, ["MSKU1234567", "TGHU7654321"]);
    assert_eq!(g.transport.delivered.lock().len(), 2);
}

#[tokio::test]
async fn test_gate_out_with_booking_reference() {
    let g = gateway(false);
    let a = container("MSKU1234567");
    let b = container("TGHU7654321");

    g.bus
        .publish(GatewayEvent::GateOutCompleted {
            operation: operation("op-out", OperationKind::GateOut, &[&a, &b]),
            containers: vec![a.clone(), b.clone()],
            booking_reference: BookingReference::new("BK-1"),
        })
        .await;
    g.settle().await;

    let logs = g.manager.get_transmission_logs().await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].operation, OperationKind::GateOut);
    assert_eq!(logs[0].container_numbers.len(), 2);
    assert_eq!(logs[0].booking_reference, BookingReference::new("BK-1"));
}

#[tokio::test]
async fn test_encoding_failure_becomes_failure_event() {
    let g = gateway(false);

    let report = g
        .bus
        .publish(GatewayEvent::GateOutCompleted {
            operation: operation("op-empty", OperationKind::GateOut, &[]),
            containers: Vec::new(),
            booking_reference: None,
        })
        .await;
    g.settle().await;

    assert!(report.all_succeeded());
    assert!(g.manager.get_transmission_logs().await.unwrap().is_empty());
    let last = g.bus.history().pop().unwrap();
    match last.event {
        GatewayEvent::EdiTransmissionFailed {
            entity_id,
            transmission_id,
            error,
        } => {
            assert_eq!(entity_id.as_str(), "op-empty");
            assert!(transmission_id.is_none());
            assert!(error.contains("no equipment to report"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_duplicate_completion_transmits_once() {
    let g = gateway(false);
    let event = gate_in("op-dup", "MSKU1234567");

    g.bus.publish(event.clone()).await;
    g.bus.publish(event).await;
    g.settle().await;

    assert_eq!(g.manager.get_transmission_logs().await.unwrap().len(), 1);
    let requested = kinds(&g.bus)
        .into_iter()
        .filter(|k| *k == EventKind::EdiTransmissionRequested)
        .count();
    assert_eq!(requested, 1);
}

#[tokio::test]
async fn test_delivery_failure_does_not_block_gate_flow() {
    let g = gateway(true);

    let report = g.bus.publish(gate_in("op-1", "MSKU1234567")).await;
    g.settle().await;

    assert!(report.all_succeeded());
    let failed = g.manager.get_failed_transmissions().await.unwrap();
    assert_eq!(failed.len(), 1);
    let kinds = kinds(&g.bus);
    assert!(kinds.contains(&EventKind::EdiTransmissionCompleted));
    assert_eq!(kinds.last(), Some(&EventKind::EdiTransmissionFailed));
}

#[tokio::test]
async fn test_request_without_snapshot_reports_failure() {
    let g = gateway(false);

    g.bus
        .publish(GatewayEvent::EdiTransmissionRequested {
            entity_id: OperationId::new("ghost").unwrap(),
            entity_type: OperationKind::GateIn,
            message_type: MessageType::Codeco,
        })
        .await;

    assert_eq!(kinds(&g.bus).last(), Some(&EventKind::EdiTransmissionFailed));
    assert!(g.manager.get_transmission_logs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_slow_store_outlives_handler_timeout() {
    let bus = GatewayBus::with_config(BusConfig {
        handler_timeout: Some(Duration::from_millis(20)),
        ..BusConfig::default()
    });
    let store = Arc::new(SlowStore {
        inner: InMemoryTransmissionStore::new(),
        delay: Duration::from_millis(50),
    });
    let g = gateway_with(false, bus, store);

    let report = g.bus.publish(gate_in("op-slow", "MSKU1234567")).await;
    g.settle().await;

    assert!(report.all_succeeded());
    let logs = g.manager.get_transmission_logs().await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, TransmissionStatus::Sent);
    assert_eq!(kinds(&g.bus).last(), Some(&EventKind::EdiTransmissionCompleted));
}

#[tokio::test]
async fn test_operation_kind_mismatch_reports_failure() {
    let g = gateway(false);
    let c = container("MSKU1234567");

    let report = g
        .bus
        .publish(GatewayEvent::GateInCompleted {
            operation: operation("op-wrong", OperationKind::GateOut, &[&c]),
            container: c,
        })
        .await;
    g.settle().await;

    assert!(report.all_succeeded());
    assert!(g.manager.get_transmission_logs().await.unwrap().is_empty());
    assert_eq!(
        kinds(&g.bus),
        vec![EventKind::GateInCompleted, EventKind::EdiTransmissionFailed]
    );
    match g.bus.history().pop().unwrap().event {
        GatewayEvent::EdiTransmissionFailed {
            entity_id, error, ..
        } => {
            assert_eq!(entity_id.as_str(), "op-wrong");
            assert!(error.contains("GATE_OUT"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}
