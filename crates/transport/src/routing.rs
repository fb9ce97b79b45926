//! Dispatches live deliveries by the partner's configured [`TransportKind`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use codeco::{DeliveryId, OutboundMessage, Transport, TransportError, TransportKind};
use tracing::debug;

/// Routes each message to the transport registered for its partner's
/// [`TransportKind`].
#[derive(Default, Clone)]
pub struct RoutingTransport {
    routes: HashMap<TransportKind, Arc<dyn Transport>>,
}

impl std::fmt::Debug for RoutingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes: HashMap<_, _> = self.routes.iter().map(|(k, t)| (*k, t.name())).collect();
        f.debug_struct("RoutingTransport")
            .field("routes", &routes)
            .finish()
    }
}

impl RoutingTransport {
    /// Creates a router with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `transport` for `kind`, replacing any previous route.
    pub fn with_route(mut self, kind: TransportKind, transport: Arc<dyn Transport>) -> Self {
        self.routes.insert(kind, transport);
        self
    }
}

#[async_trait]
impl Transport for RoutingTransport {
    fn name(&self) -> &str {
        "routing"
    }

    async fn deliver(&self, message: &OutboundMessage) -> Result<DeliveryId, TransportError> {
        let kind = message.partner.transport;
        let transport = self.routes.get(&kind).ok_or_else(|| {
            TransportError::Configuration(format!(
                "no transport configured for {kind:?} (partner {})",
                message.partner.partner_code
            ))
        })?;
        debug!(
            transmission_id = %message.transmission_id,
            transport = transport.name(),
            "Routing delivery"
        );
        transport.deliver(message).await
    }
}
