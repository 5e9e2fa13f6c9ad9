use crate::tasks::Task;
use async_trait::async_trait;
use poise::serenity_prelude::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::lifecycle::TempVoice;

/// Periodically reconciles every guild with a hub against the live server.
#[derive(Debug)]
pub struct ReconcileTask {
    service: Arc<TempVoice>,
    interval: Duration,
}

impl ReconcileTask {
    pub fn new(service: Arc<TempVoice>, interval: Duration) -> Self {
        Self { service, interval }
    }
}

#[async_trait]
impl Task for ReconcileTask {
    fn name(&self) -> &str {
        "TempVoiceReconcile"
    }

    fn schedule(&self) -> Option<Duration> {
        Some(self.interval)
    }

    async fn execute(
        &mut self,
        _ctx: &Context,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let start = std::time::Instant::now();
        self.service.reconcile_all().await;
        debug!("Temp voice reconcile completed in {:?}", start.elapsed());
        Ok(())
    }
}
