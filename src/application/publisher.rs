// Publisher trait for status egress
use crate::domain::metadata::MetaDelta;
use crate::domain::snapshot::Delta;
use async_trait::async_trait;

#[async_trait]
pub trait StatusPublisher: Send + Sync {
    /// Publish current statistics for one device
    async fn publish_values(&self, delta: &Delta) -> anyhow::Result<()>;

    /// Publish display metadata for the keys a device reports
    async fn publish_meta(&self, meta: &MetaDelta) -> anyhow::Result<()>;
}
