//! Subscriber abstractions.

use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::BusEvent;

/// Boxed future returned by closure-based handlers.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A subscriber that reacts to events of one kind.
///
/// Returning `Err` marks this invocation as failed. The bus logs the error
/// and carries on; it is never propagated to the publisher.
#[async_trait]
pub trait EventHandler<E: BusEvent>: Send + Sync {
    /// Handles one event.
    async fn handle(&self, event: E) -> anyhow::Result<()>;

    /// Name used in log output.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Adapter that turns a closure into an [`EventHandler`].
pub(crate) struct FnHandler<E> {
    name: String,
    callback: Box<dyn Fn(E) -> HandlerFuture + Send + Sync>,
}

impl<E: BusEvent> FnHandler<E> {
    pub(crate) fn new<F, Fut>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            callback: Box::new(move |event| -> HandlerFuture { Box::pin(callback(event)) }),
        }
    }
}

#[async_trait]
impl<E: BusEvent> EventHandler<E> for FnHandler<E> {
    async fn handle(&self, event: E) -> anyhow::Result<()> {
        (self.callback)(event).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
