// Device monitor - Applies samples and runs the periodic offline/report/checkpoint schedule
use crate::application::accumulator::DutyCycleAccumulator;
use crate::application::history::{HistoryError, query_history};
use crate::domain::cycle::CycleRecord;
use crate::domain::device::Device;
use crate::domain::metadata::{MetaDelta, Zone, ZoneState, last_run_zone, meta_delta};
use crate::domain::snapshot::{Delta, Snapshot};
use crate::domain::status::DeviceStatus;
use crate::infrastructure::checkpoint::CheckpointError;
use crate::infrastructure::config::DeviceConfig;
use crate::infrastructure::ring_buffer::{DurableRingBuffer, RingBufferError};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub timeout_ms: i64,
    pub report_interval_ms: i64,
    pub checkpoint_interval_ms: i64,
}

impl From<&DeviceConfig> for MonitorSettings {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            timeout_ms: config.sec_timeout as i64 * 1000,
            report_interval_ms: config.sec_report_interval as i64 * 1000,
            checkpoint_interval_ms: config.sec_checkpoint as i64 * 1000,
        }
    }
}

/// What a tick did
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub went_offline: bool,
    pub delta: Option<Delta>,
    /// Key metadata, only with the first report
    pub meta: Option<MetaDelta>,
    pub checkpointed: bool,
}

/// One monitored device: its accumulator plus the timers that drive it.
///
/// All methods take `now_ms` explicitly so the schedule can be driven by any
/// clock.
#[derive(Debug)]
pub struct DeviceMonitor {
    device: Device,
    stats_path: String,
    settings: MonitorSettings,
    checkpoint_path: PathBuf,
    accumulator: DutyCycleAccumulator,
    started_ms: i64,
    last_report_ms: Option<i64>,
    last_checkpoint_ms: i64,
}

impl DeviceMonitor {
    /// Open the ring buffer and restore the checkpoint for `config` under `data_dir`.
    pub fn open(config: &DeviceConfig, data_dir: &Path, now_ms: i64) -> Result<Self, CheckpointError> {
        let device = config.device();
        let ring = DurableRingBuffer::open(
            config.history_capacity,
            data_dir.join(format!("{}.dat", device.id)),
        )?;
        let checkpoint_path = data_dir.join(format!("{}.json", device.id));
        let accumulator =
            DutyCycleAccumulator::restore(&checkpoint_path, config.noise_margin, ring, now_ms)?;

        tracing::info!(
            "Device {} ({}) ready with {} cycles of history in {}",
            device.name,
            device.id,
            accumulator.history().len(),
            accumulator.history().path().display()
        );

        Ok(Self {
            device,
            stats_path: config.stats_path(),
            settings: MonitorSettings::from(config),
            checkpoint_path,
            accumulator,
            started_ms: now_ms,
            last_report_ms: None,
            last_checkpoint_ms: now_ms,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn accumulator(&self) -> &DutyCycleAccumulator {
        &self.accumulator
    }

    pub fn on_sample(
        &mut self,
        value: f64,
        timestamp_ms: i64,
    ) -> Result<Option<CycleRecord>, RingBufferError> {
        let completed = self.accumulator.process_sample(value, timestamp_ms)?;
        if let Some(cycle) = &completed {
            tracing::info!(
                "{}: cycle completed after {:.1}s",
                self.device.id,
                cycle.duration_secs
            );
            if let Some(zone) = self.run_alert(cycle) {
                tracing::warn!(
                    "{}: {} ({:.1}s)",
                    self.device.id,
                    zone.message.unwrap_or("Pump run out of range"),
                    cycle.duration_secs
                );
            }
        }
        Ok(completed)
    }

    /// The warn or alarm zone a completed run falls in, if any
    pub fn run_alert(&self, cycle: &CycleRecord) -> Option<Zone> {
        last_run_zone(cycle.duration_secs).filter(|z| z.state != ZoneState::Normal)
    }

    pub fn on_tick(&mut self, now_ms: i64) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        let last_seen = self
            .accumulator
            .state()
            .last_sample_ms
            .unwrap_or(self.started_ms);
        let silent_ms = now_ms.saturating_sub(last_seen);
        if silent_ms >= self.settings.timeout_ms
            && self.accumulator.state().status != DeviceStatus::Offline
        {
            tracing::info!(
                "{}: no sample for {}s, marking offline",
                self.device.id,
                silent_ms / 1000
            );
            self.accumulator.force_offline(now_ms);
            outcome.went_offline = true;
        }

        let report_due = self
            .last_report_ms
            .is_none_or(|t| now_ms.saturating_sub(t) >= self.settings.report_interval_ms);
        if report_due {
            if self.last_report_ms.is_none() {
                outcome.meta = Some(meta_delta(&self.device.id, &self.stats_path));
            }
            let delta = self
                .accumulator
                .snapshot(now_ms)
                .to_delta(&self.device.id, &self.stats_path);
            outcome.delta = Some(delta);
            self.last_report_ms = Some(now_ms);
        }

        if now_ms.saturating_sub(self.last_checkpoint_ms) >= self.settings.checkpoint_interval_ms {
            match self.accumulator.save(&self.checkpoint_path) {
                Ok(()) => {
                    self.last_checkpoint_ms = now_ms;
                    outcome.checkpointed = true;
                }
                Err(e) => {
                    tracing::error!("{}: checkpoint failed, will retry: {}", self.device.id, e);
                }
            }
        }

        outcome
    }

    pub fn snapshot(&self, now_ms: i64) -> Snapshot {
        self.accumulator.snapshot(now_ms)
    }

    pub fn reset_baseline(&mut self, now_ms: i64) -> Snapshot {
        tracing::info!("{}: statistics baseline reset", self.device.id);
        self.accumulator.reset_baseline(now_ms);
        self.accumulator.snapshot(now_ms)
    }

    pub fn history(
        &self,
        start: Option<&str>,
        end: Option<&str>,
        now_ms: i64,
    ) -> Result<Vec<CycleRecord>, HistoryError> {
        tracing::debug!(
            "{} history request for {:?} thru {:?}",
            self.device.id,
            start,
            end
        );
        query_history(self.accumulator.history(), start, end, now_ms)
    }

    /// Write a final checkpoint and close the history file.
    pub fn shutdown(self, now_ms: i64) -> Result<(), CheckpointError> {
        tracing::info!("Stopping {}", self.device.name);
        let snapshot = self.accumulator.snapshot(now_ms);
        tracing::debug!("{}: final status {}", self.device.id, snapshot.status);
        self.accumulator.save(&self.checkpoint_path)?;
        self.accumulator.into_history().close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const T0: i64 = 1_700_000_000_000;

    fn device_config(name: &str) -> DeviceConfig {
        DeviceConfig {
            name: name.to_string(),
            stats_path: String::new(),
            sec_report_interval: 3,
            sec_timeout: 10,
            sec_checkpoint: 60,
            noise_margin: 0.0,
            history_capacity: 10,
        }
    }

    fn monitor(dir: &TempDir) -> DeviceMonitor {
        DeviceMonitor::open(&device_config("test pump"), dir.path(), T0).unwrap()
    }

    #[test]
    fn test_first_tick_reports_with_metadata() {
        let dir = TempDir::new().unwrap();
        let mut monitor = monitor(&dir);

        let outcome = monitor.on_tick(T0);
        assert!(!outcome.went_offline);
        assert!(outcome.meta.is_some());
        let delta = outcome.delta.unwrap();
        assert_eq!(delta.device_id, "testPump");
        assert_eq!(delta.values[0].path, "test pump.status");
        assert_eq!(delta.values[0].value, serde_json::json!("OFFLINE"));

        let outcome = monitor.on_tick(T0 + 2_000);
        assert!(outcome.delta.is_none());
        assert!(outcome.meta.is_none());

        let outcome = monitor.on_tick(T0 + 3_000);
        assert!(outcome.delta.is_some());
        assert!(outcome.meta.is_none());
    }

    #[test]
    fn test_timeout_marks_offline_once() {
        let dir = TempDir::new().unwrap();
        let mut monitor = monitor(&dir);
        monitor.on_sample(0.0, T0 + 1_000).unwrap();
        monitor.on_sample(1.0, T0 + 2_000).unwrap();

        assert!(!monitor.on_tick(T0 + 11_000).went_offline);
        assert!(monitor.on_tick(T0 + 12_000).went_offline);
        assert!(!monitor.on_tick(T0 + 14_000).went_offline);

        let state = monitor.accumulator().state();
        assert_eq!(state.status, DeviceStatus::Offline);
        assert_eq!(state.time_in_state_ms, T0 + 12_000);
        assert_eq!(state.since_cycle_count, 0);
        assert_eq!(state.since_run_time_ms, 0);

        monitor.on_sample(1.0, T0 + 20_000).unwrap();
        assert_eq!(monitor.accumulator().state().status, DeviceStatus::Running);
        monitor.on_sample(0.0, T0 + 21_000).unwrap();
        assert_eq!(monitor.accumulator().state().last_run_time_ms, 19_000);
    }

    #[test]
    fn test_timeout_without_any_sample_counts_from_start() {
        let dir = TempDir::new().unwrap();
        let mut fresh = monitor(&dir);
        assert!(!fresh.on_tick(T0 + 9_999).went_offline);
        // Status starts OFFLINE, so nothing changes when the timeout passes.
        assert!(!fresh.on_tick(T0 + 10_000).went_offline);
        assert_eq!(fresh.accumulator().state().status, DeviceStatus::Offline);
    }

    #[test]
    fn test_checkpoint_cadence() {
        let dir = TempDir::new().unwrap();
        let mut monitor = monitor(&dir);
        let checkpoint = dir.path().join("testPump.json");

        assert!(!monitor.on_tick(T0 + 59_000).checkpointed);
        assert!(!checkpoint.exists());
        assert!(monitor.on_tick(T0 + 60_000).checkpointed);
        assert!(checkpoint.exists());
        assert!(!monitor.on_tick(T0 + 61_000).checkpointed);
        assert!(monitor.on_tick(T0 + 120_000).checkpointed);
    }

    #[test]
    fn test_history_and_restart() {
        let dir = TempDir::new().unwrap();
        let mut monitor = monitor(&dir);
        for i in 0..3 {
            let start = T0 + i * 10_000;
            monitor.on_sample(1.0, start).unwrap();
            monitor.on_sample(0.0, start + 2_000).unwrap();
        }

        let all = monitor.history(None, None, T0 + 60_000).unwrap();
        assert_eq!(all.len(), 3);
        let err = monitor.history(Some("soon"), None, T0).unwrap_err();
        assert_eq!(err.status, 400);

        monitor.shutdown(T0 + 60_000).unwrap();

        let restarted = DeviceMonitor::open(&device_config("test pump"), dir.path(), T0 + 70_000).unwrap();
        let state = restarted.accumulator().state();
        assert_eq!(state.since_cycle_count, 3);
        assert_eq!(state.since_run_time_ms, 6_000);
        assert_eq!(restarted.history(None, None, T0 + 70_000).unwrap(), all);
    }

    #[test]
    fn test_reset_baseline_returns_snapshot() {
        let dir = TempDir::new().unwrap();
        let mut monitor = monitor(&dir);
        monitor.on_sample(1.0, T0).unwrap();
        monitor.on_sample(0.0, T0 + 1_000).unwrap();

        let snapshot = monitor.reset_baseline(T0 + 5_000);
        assert_eq!(snapshot.since, T0 + 5_000);
        assert_eq!(snapshot.since_cycles, 0);
        assert_eq!(snapshot.last_run_time, 1.0);
        assert_eq!(monitor.history(None, None, T0 + 5_000).unwrap().len(), 1);
    }

    #[test]
    fn test_tick_after_extreme_sample_times() {
        let dir = TempDir::new().unwrap();
        let mut monitor = monitor(&dir);
        monitor.on_sample(1.0, i64::MIN).unwrap();

        let outcome = monitor.on_tick(T0);
        assert!(outcome.went_offline);
        assert!(outcome.delta.is_some());

        monitor.on_sample(1.0, i64::MAX).unwrap();
        let outcome = monitor.on_tick(i64::MIN);
        assert!(!outcome.went_offline);
        assert!(outcome.delta.is_none());
        assert!(!outcome.checkpointed);
        assert!(monitor.on_tick(i64::MAX).checkpointed);
    }

    #[test]
    fn test_run_alert_flags_short_and_long_runs() {
        let dir = TempDir::new().unwrap();
        let monitor = monitor(&dir);

        let short = monitor.run_alert(&CycleRecord::new(T0, 0.5)).unwrap();
        assert_eq!(short.state, ZoneState::Alarm);
        let long = monitor.run_alert(&CycleRecord::new(T0, 90.0)).unwrap();
        assert_eq!(long.state, ZoneState::Warn);
        assert_eq!(long.message, Some("Pump run too long"));
        assert!(monitor.run_alert(&CycleRecord::new(T0, 30.0)).is_none());
    }
}
