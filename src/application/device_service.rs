// Device service - One writer per device, serializing samples, ticks and queries
use crate::application::clock::Clock;
use crate::application::device_monitor::{DeviceMonitor, TickOutcome};
use crate::application::history::HistoryError;
use crate::application::publisher::StatusPublisher;
use crate::domain::cycle::CycleRecord;
use crate::domain::snapshot::Snapshot;
use crate::infrastructure::checkpoint::CheckpointError;
use crate::infrastructure::ring_buffer::RingBufferError;
use anyhow::anyhow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const COMMAND_CHANNEL_CAPACITY: usize = 64;
const OUTCOME_CHANNEL_CAPACITY: usize = 16;

pub enum DeviceCommand {
    Tick,
    Sample {
        value: f64,
        timestamp_ms: Option<i64>,
        reply: oneshot::Sender<Result<Option<CycleRecord>, RingBufferError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    History {
        start: Option<String>,
        end: Option<String>,
        reply: oneshot::Sender<Result<Vec<CycleRecord>, HistoryError>>,
    },
    ResetBaseline {
        reply: oneshot::Sender<Snapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<(), CheckpointError>>,
    },
}

/// Cheap, cloneable handle to a running device task
#[derive(Clone, Debug)]
pub struct DeviceHandle {
    pub id: String,
    pub name: String,
    tx: mpsc::Sender<DeviceCommand>,
}

impl DeviceHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> DeviceCommand,
    ) -> anyhow::Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| anyhow!("device {} is not running", self.id))?;
        rx.await
            .map_err(|_| anyhow!("device {} stopped before replying", self.id))
    }

    /// Apply a sample; `timestamp_ms` defaults to the device clock's now.
    pub async fn process_sample(
        &self,
        value: f64,
        timestamp_ms: Option<i64>,
    ) -> anyhow::Result<Option<CycleRecord>> {
        let result = self
            .request(|reply| DeviceCommand::Sample {
                value,
                timestamp_ms,
                reply,
            })
            .await?;
        Ok(result?)
    }

    pub async fn snapshot(&self) -> anyhow::Result<Snapshot> {
        self.request(|reply| DeviceCommand::Snapshot { reply }).await
    }

    pub async fn history(
        &self,
        start: Option<String>,
        end: Option<String>,
    ) -> anyhow::Result<Result<Vec<CycleRecord>, HistoryError>> {
        self.request(|reply| DeviceCommand::History { start, end, reply })
            .await
    }

    pub async fn reset_baseline(&self) -> anyhow::Result<Snapshot> {
        self.request(|reply| DeviceCommand::ResetBaseline { reply })
            .await
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let result = self
            .request(|reply| DeviceCommand::Shutdown { reply })
            .await?;
        Ok(result?)
    }
}

/// Owns the monitor on a blocking thread. Ring and checkpoint writes are
/// synced to disk, so they stay off the async workers.
struct DeviceWriter {
    monitor: DeviceMonitor,
    rx: mpsc::Receiver<DeviceCommand>,
    clock: Arc<dyn Clock>,
    outcomes: mpsc::Sender<TickOutcome>,
}

/// Start the tasks owning `monitor`. They run until `shutdown` is called
/// or every handle is dropped, writing a final checkpoint either way.
///
/// The returned task finishes once the final checkpoint is written and
/// pending reports have been published.
pub fn spawn_device(
    monitor: DeviceMonitor,
    heartbeat: Duration,
    clock: Arc<dyn Clock>,
    publishers: Vec<Arc<dyn StatusPublisher>>,
) -> (DeviceHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (outcome_tx, outcome_rx) = mpsc::channel(OUTCOME_CHANNEL_CAPACITY);
    let id = monitor.device().id.clone();
    let handle = DeviceHandle {
        id: id.clone(),
        name: monitor.device().name.clone(),
        tx,
    };

    let ticker = tokio::spawn(run_ticker(handle.tx.downgrade(), heartbeat));
    let writer = DeviceWriter {
        monitor,
        rx,
        clock,
        outcomes: outcome_tx,
    };
    let writer = tokio::task::spawn_blocking(move || writer.run());
    let publisher = tokio::spawn(publish_outcomes(outcome_rx, publishers));

    let task = tokio::spawn(async move {
        if let Err(e) = writer.await {
            tracing::error!("{}: device writer failed: {}", id, e);
        }
        ticker.abort();
        if let Err(e) = publisher.await {
            tracing::error!("{}: publisher task failed: {}", id, e);
        }
    });

    (handle, task)
}

/// Sends a tick every `heartbeat`. Holds only a weak sender so dropping
/// every handle still stops the device.
async fn run_ticker(tx: mpsc::WeakSender<DeviceCommand>, heartbeat: Duration) {
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(tx) = tx.upgrade() else {
            break;
        };
        if tx.send(DeviceCommand::Tick).await.is_err() {
            break;
        }
    }
}

async fn publish_outcomes(
    mut outcomes: mpsc::Receiver<TickOutcome>,
    publishers: Vec<Arc<dyn StatusPublisher>>,
) {
    while let Some(outcome) = outcomes.recv().await {
        if let Some(meta) = &outcome.meta {
            for publisher in &publishers {
                if let Err(e) = publisher.publish_meta(meta).await {
                    tracing::warn!("{}: metadata publish failed: {}", meta.device_id, e);
                }
            }
        }
        if let Some(delta) = &outcome.delta {
            for publisher in &publishers {
                if let Err(e) = publisher.publish_values(delta).await {
                    tracing::warn!("{}: status publish failed: {}", delta.device_id, e);
                }
            }
        }
    }
}

impl DeviceWriter {
    fn run(mut self) {
        let shutdown_reply = loop {
            let Some(command) = self.rx.blocking_recv() else {
                break None;
            };
            let now_ms = self.clock.now_ms();
            match command {
                DeviceCommand::Tick => self.tick(now_ms),
                DeviceCommand::Sample {
                    value,
                    timestamp_ms,
                    reply,
                } => {
                    let result = self.monitor.on_sample(value, timestamp_ms.unwrap_or(now_ms));
                    if let Err(e) = &result {
                        tracing::error!("{}: sample not recorded: {}", self.monitor.device().id, e);
                    }
                    let _ = reply.send(result);
                }
                DeviceCommand::Snapshot { reply } => {
                    let _ = reply.send(self.monitor.snapshot(now_ms));
                }
                DeviceCommand::History { start, end, reply } => {
                    let result = self
                        .monitor
                        .history(start.as_deref(), end.as_deref(), now_ms);
                    let _ = reply.send(result);
                }
                DeviceCommand::ResetBaseline { reply } => {
                    let _ = reply.send(self.monitor.reset_baseline(now_ms));
                }
                DeviceCommand::Shutdown { reply } => break Some(reply),
            }
        };

        let DeviceWriter { monitor, clock, .. } = self;
        let id = monitor.device().id.clone();
        let result = monitor.shutdown(clock.now_ms());
        if let Err(e) = &result {
            tracing::error!("{}: final checkpoint failed: {}", id, e);
        }
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(result);
        }
    }

    fn tick(&mut self, now_ms: i64) {
        let outcome = self.monitor.on_tick(now_ms);
        if outcome.went_offline || outcome.checkpointed {
            tracing::debug!(
                "{}: tick offline={} checkpointed={}",
                self.monitor.device().id,
                outcome.went_offline,
                outcome.checkpointed
            );
        }
        if outcome.delta.is_none() && outcome.meta.is_none() {
            return;
        }
        if let Err(e) = self.outcomes.try_send(outcome) {
            tracing::warn!(
                "{}: publishers are behind, report dropped: {}",
                self.monitor.device().id,
                e
            );
        }
    }
}

/// All running devices, in configuration order
#[derive(Clone, Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceHandle>,
}

impl DeviceRegistry {
    pub fn new(devices: Vec<DeviceHandle>) -> Self {
        Self { devices }
    }

    pub fn get(&self, id: &str) -> Option<&DeviceHandle> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.id.clone()).collect()
    }

    pub async fn shutdown_all(&self) {
        for device in &self.devices {
            if let Err(e) = device.shutdown().await {
                tracing::error!("Error stopping {} ({}): {}", device.name, device.id, e);
            }
        }
    }
}
