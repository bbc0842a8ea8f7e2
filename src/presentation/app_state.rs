// Application state for HTTP handlers
use crate::application::device_service::DeviceRegistry;
use crate::domain::snapshot::Delta;
use tokio::sync::{broadcast, watch};

#[derive(Clone)]
pub struct AppState {
    pub registry: DeviceRegistry,
    /// Source of live deltas; each stream request subscribes its own receiver
    pub status_tx: broadcast::Sender<Delta>,
    /// Flips to true when the server is stopping, ending open streams
    pub shutdown: watch::Receiver<bool>,
}
