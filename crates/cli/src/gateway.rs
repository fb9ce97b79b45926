//! Wires configuration into a running gateway.

use std::sync::Arc;

use anyhow::Context;
use codeco::{CodecoEncoder, GatewayBus, TransmissionStore, TransportKind};
use listener::InstalledListeners;
use tracing::info;
use transmission::{
    AcknowledgmentPoller, AcknowledgmentPollerConfig, InMemoryTransmissionStore,
    JsonLinesTransmissionStore, ManagerDependencies, TransmissionManager,
};
use transport::{
    DelayedAcknowledgment, HttpTransport, OutboxTransport, RoutingTransport, SimulatedTransport,
};

use crate::config::GatewayConfig;

/// Event bus, transmission manager and orchestration listeners.
pub struct Gateway {
    bus: GatewayBus,
    manager: TransmissionManager,
    listeners: InstalledListeners,
    poll_interval: std::time::Duration,
}

impl Gateway {
    /// Builds every component from `config` and installs the listeners.
    pub async fn build(config: &GatewayConfig) -> anyhow::Result<Self> {
        let bus = GatewayBus::with_config(config.bus.bus_config());

        let store: Arc<dyn TransmissionStore> = match &config.store.path {
            Some(path) => Arc::new(
                JsonLinesTransmissionStore::open(path)
                    .await
                    .with_context(|| format!("failed to open transmission log {}", path.display()))?,
            ),
            None => Arc::new(InMemoryTransmissionStore::new()),
        };

        let http = HttpTransport::new(config.http.transport_config())
            .context("failed to build HTTP transport")?;
        let live = RoutingTransport::new()
            .with_route(
                TransportKind::Outbox,
                Arc::new(OutboxTransport::new(&config.outbox.directory)),
            )
            .with_route(TransportKind::Http, Arc::new(http));

        let registry = config.registry();
        let manager = TransmissionManager::new(ManagerDependencies {
            registry: registry.clone(),
            encoder: CodecoEncoder::new(config.encoder.options()),
            live_transport: Arc::new(live),
            sandbox_transport: Arc::new(SimulatedTransport::default()),
            store,
            acknowledgments: Arc::new(DelayedAcknowledgment::new(config.simulated_ack_delay())),
            bus: Some(bus.clone()),
        });
        let listeners = listener::install(&bus, manager.clone());

        info!(
            partners = registry.partner_codes().len(),
            durable_log = config.store.path.is_some(),
            outbox = %config.outbox.directory.display(),
            "Gateway ready"
        );

        Ok(Self {
            bus,
            manager,
            listeners,
            poll_interval: config.poll_interval(),
        })
    }

    pub fn bus(&self) -> &GatewayBus {
        &self.bus
    }

    pub fn manager(&self) -> &TransmissionManager {
        &self.manager
    }

    /// A stopped acknowledgment poller for this gateway.
    pub fn poller(&self) -> AcknowledgmentPoller {
        AcknowledgmentPoller::new(
            AcknowledgmentPollerConfig {
                enabled: true,
                polling_interval: self.poll_interval,
            },
            self.manager.clone(),
        )
    }

    /// Waits until every transmission requested so far has been started and
    /// its delivery has settled.
    pub async fn settle(&self) {
        self.listeners.wait_idle().await;
        self.manager.wait_for_deliveries().await;
    }

    /// Settles in-flight work and detaches the listeners.
    pub async fn shutdown(self) {
        self.settle().await;
        self.listeners.uninstall();
    }
}
