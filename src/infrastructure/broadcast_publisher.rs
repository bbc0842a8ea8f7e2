// In-process publisher feeding the live status stream
use crate::application::publisher::StatusPublisher;
use crate::domain::metadata::MetaDelta;
use crate::domain::snapshot::Delta;
use async_trait::async_trait;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<Delta>,
}

impl BroadcastPublisher {
    pub fn new(tx: broadcast::Sender<Delta>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl StatusPublisher for BroadcastPublisher {
    async fn publish_values(&self, delta: &Delta) -> anyhow::Result<()> {
        for value in &delta.values {
            tracing::debug!("{}: {} = {}", delta.device_id, value.path, value.value);
        }
        // No subscribers is the normal idle case
        let _ = self.tx.send(delta.clone());
        Ok(())
    }

    async fn publish_meta(&self, meta: &MetaDelta) -> anyhow::Result<()> {
        tracing::debug!(
            "{}: metadata for {} keys",
            meta.device_id,
            meta.meta.len()
        );
        Ok(())
    }
}
