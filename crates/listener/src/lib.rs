//! Orchestration listeners for the CODECO gateway.
//!
//! The only bridge between gate-operation completion and EDI transmission.
//! Two event-bus subscribers form a two-hop chain:
//!
//! 1. [`GateCompletionListener`] reacts to `GATE_IN_COMPLETED` and
//!    `GATE_OUT_COMPLETED`, keeps the operation snapshot and publishes
//!    `EDI_TRANSMISSION_REQUESTED`.
//! 2. [`TransmissionRequestListener`] reacts to `EDI_TRANSMISSION_REQUESTED`,
//!    calls the [`transmission::TransmissionManager`] on a spawned task and
//!    publishes `EDI_TRANSMISSION_COMPLETED` or `EDI_TRANSMISSION_FAILED`.
//!    [`InstalledListeners::wait_idle`] waits for those tasks.
//!
//! Replacing the delivery backend means replacing only the second hop; the
//! gate-operation code only ever publishes completion events.
//!
//! ## Architectural Layer
//!
//! **Application wiring.** No protocol logic lives here.

mod listeners;
mod snapshots;

use std::sync::Arc;

use bus::Subscription;
use codeco::{EventKind, GatewayBus, GatewayEvent};
use tracing::info;
use transmission::TransmissionManager;

pub use listeners::{GateCompletionListener, InFlightTransmissions, TransmissionRequestListener};
pub use snapshots::{OperationSnapshots, PendingOperation, DEFAULT_SEEN_CAPACITY};

/// Subscriptions created by [`install`].
///
/// The listeners hold a handle to the bus, so they stay registered until
/// [`InstalledListeners::uninstall`] is called.
#[derive(Debug)]
pub struct InstalledListeners {
    subscriptions: Vec<Subscription<GatewayEvent>>,
    in_flight: Arc<InFlightTransmissions>,
}

impl InstalledListeners {
    /// Waits until every transmission request received so far has published
    /// its outcome. Deliveries are tracked by the manager, not here.
    pub async fn wait_idle(&self) {
        self.in_flight.wait_idle().await;
    }

    /// Removes every listener from the bus.
    pub fn uninstall(self) {
        for subscription in self.subscriptions {
            subscription.unsubscribe();
        }
    }
}

/// Subscribes both orchestration hops to `bus`.
pub fn install(bus: &GatewayBus, manager: TransmissionManager) -> InstalledListeners {
    let snapshots = Arc::new(OperationSnapshots::default());
    let completion = Arc::new(GateCompletionListener::new(snapshots.clone(), bus.clone()));
    let in_flight = Arc::new(InFlightTransmissions::default());
    let request = Arc::new(TransmissionRequestListener::new(
        snapshots,
        manager,
        bus.clone(),
        in_flight.clone(),
    ));

    let subscriptions = vec![
        bus.subscribe(EventKind::GateInCompleted, completion.clone()),
        bus.subscribe(EventKind::GateOutCompleted, completion),
        bus.subscribe(EventKind::EdiTransmissionRequested, request),
    ];
    info!(listeners = subscriptions.len(), "Orchestration listeners installed");

    InstalledListeners {
        subscriptions,
        in_flight,
    }
}
