use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use poise::serenity_prelude::{Context, FullEvent};
use std::fmt::Debug;
use tokio::sync::RwLock;
use tracing::error;

#[async_trait]
pub trait EventHandler: Send + Sync + Debug {
    fn name(&self) -> &str;
    async fn handle(
        &self,
        ctx: &Context,
        event: &FullEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn box_clone(&self) -> Box<dyn EventHandler>;
}

impl Clone for Box<dyn EventHandler> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Fans every gateway event out to the registered handlers, each on its own
/// task. Handler errors and panics are logged and never reach the caller.
#[derive(Debug, Default)]
pub struct EventManager {
    handlers: RwLock<Vec<Box<dyn EventHandler>>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_handler(&self, handler: impl EventHandler + 'static) {
        self.handlers.write().await.push(Box::new(handler));
    }

    pub async fn handle_event(&self, ctx: &Context, event: &FullEvent) {
        let handlers = self.handlers.read().await.clone();
        let mut futures = FuturesUnordered::new();

        for handler in handlers {
            let ctx = ctx.clone();
            let event = event.clone();
            let name = handler.name().to_string();

            let task = tokio::spawn(async move {
                if let Err(e) = handler.handle(&ctx, &event).await {
                    error!("Error in event handler {}: {}", handler.name(), e);
                }
            });
            futures.push(async move { (name, task.await) });
        }

        while let Some((name, result)) = futures.next().await {
            if let Err(e) = result {
                error!("Event handler {} panicked: {}", name, e);
            }
        }
    }
}
