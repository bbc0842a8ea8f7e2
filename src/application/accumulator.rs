// Duty-cycle accumulator - Edge detection and run statistics from timestamped samples
use crate::domain::cycle::CycleRecord;
use crate::domain::snapshot::{Snapshot, ms_to_secs};
use crate::domain::status::DeviceStatus;
use crate::infrastructure::checkpoint::{Checkpoint, CheckpointError, read_checkpoint, write_checkpoint};
use crate::infrastructure::ring_buffer::{DurableRingBuffer, RingBufferError};
use std::path::Path;

/// Live accumulator state. All timestamps are ms since the Unix epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatorState {
    pub status: DeviceStatus,
    /// Start of the cycle in progress
    pub cycle_start_ms: Option<i64>,
    /// Most recent status transition
    pub time_in_state_ms: i64,
    pub since_baseline_ms: i64,
    pub since_cycle_count: u64,
    pub since_run_time_ms: i64,
    pub last_run_time_ms: i64,
    pub last_off_duration_ms: i64,
    /// Clipped value of the most recent sample, 0.0 means OFF
    pub last_sample_value: f64,
    pub last_sample_ms: Option<i64>,
    /// End of the last completed cycle, or the first OFF sample seen before any cycle
    pub previous_cycle_end_ms: Option<i64>,
}

impl AccumulatorState {
    pub fn new(now_ms: i64) -> Self {
        Self {
            status: DeviceStatus::Offline,
            cycle_start_ms: None,
            time_in_state_ms: now_ms,
            since_baseline_ms: now_ms,
            since_cycle_count: 0,
            since_run_time_ms: 0,
            last_run_time_ms: 0,
            last_off_duration_ms: 0,
            last_sample_value: 0.0,
            last_sample_ms: None,
            previous_cycle_end_ms: None,
        }
    }

    pub fn last_sample_on(&self) -> bool {
        self.last_sample_value != 0.0
    }
}

/// Turns a stream of boolean-ish samples into run statistics and a history
/// of completed cycles.
///
/// Samples are processed immediately. The cumulative run time is the sum of
/// inter-sample intervals that began with an ON sample, so its resolution is
/// the sampling interval.
#[derive(Debug)]
pub struct DutyCycleAccumulator {
    noise_margin: f64,
    state: AccumulatorState,
    cycles: DurableRingBuffer<CycleRecord>,
}

impl DutyCycleAccumulator {
    pub fn new(noise_margin: f64, cycles: DurableRingBuffer<CycleRecord>, now_ms: i64) -> Self {
        let mut state = AccumulatorState::new(now_ms);
        state.previous_cycle_end_ms = cycles.newest().map(CycleRecord::end_ms);
        Self {
            noise_margin: noise_margin.abs(),
            state,
            cycles,
        }
    }

    /// Rebuild from the checkpoint at `path`, or start fresh if there is none.
    ///
    /// The ring buffer file is the authority on cycle history. Checkpointed
    /// cycles are only replayed into it when it is empty.
    pub fn restore(
        path: &Path,
        noise_margin: f64,
        mut cycles: DurableRingBuffer<CycleRecord>,
        now_ms: i64,
    ) -> Result<Self, CheckpointError> {
        let Some(checkpoint) = read_checkpoint(path)? else {
            tracing::info!("No checkpoint at {}, starting fresh", path.display());
            return Ok(Self::new(noise_margin, cycles, now_ms));
        };

        if cycles.is_empty() && !checkpoint.cycles.is_empty() {
            let skip = checkpoint.cycles.len().saturating_sub(cycles.capacity());
            for record in checkpoint.cycles.iter().skip(skip) {
                cycles.push(*record)?;
            }
            tracing::info!(
                "Seeded {} cycles from checkpoint {}",
                cycles.len(),
                path.display()
            );
        }

        let mut state = AccumulatorState::new(now_ms);
        state.since_baseline_ms = checkpoint.since;
        state.since_cycle_count = checkpoint.since_cycles;
        state.since_run_time_ms = checkpoint.since_run_time_ms;
        state.last_run_time_ms = checkpoint.last_run_time_ms;
        state.last_off_duration_ms = checkpoint.last_off_time_ms;
        state.previous_cycle_end_ms = cycles.newest().map(CycleRecord::end_ms);

        Ok(Self {
            noise_margin: noise_margin.abs(),
            state,
            cycles,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        write_checkpoint(path, &self.checkpoint())
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            since: self.state.since_baseline_ms,
            since_cycles: self.state.since_cycle_count,
            since_run_time_ms: self.state.since_run_time_ms,
            last_run_time_ms: self.state.last_run_time_ms,
            last_off_time_ms: self.state.last_off_duration_ms,
            cycles: self.cycles.iter().copied().collect(),
        }
    }

    fn clip(&self, value: f64) -> f64 {
        if value.is_nan() || value.abs() <= self.noise_margin {
            0.0
        } else {
            value
        }
    }

    /// Apply one sample. Returns the cycle it completed, if any.
    ///
    /// If the completed cycle cannot be persisted the sample is not applied
    /// and the error is returned.
    pub fn process_sample(
        &mut self,
        value: f64,
        timestamp_ms: i64,
    ) -> Result<Option<CycleRecord>, RingBufferError> {
        let clipped = self.clip(value);
        let on = clipped != 0.0;
        let was_on = self.state.last_sample_on();

        let mut next = self.state.clone();
        if was_on {
            if let Some(prev) = next.last_sample_ms {
                let elapsed = timestamp_ms.saturating_sub(prev).max(0);
                next.since_run_time_ms = next.since_run_time_ms.saturating_add(elapsed);
            }
        }

        let mut completed = None;
        match (was_on, on) {
            (false, true) => {
                next.cycle_start_ms = Some(timestamp_ms);
                if let Some(end) = next.previous_cycle_end_ms {
                    next.last_off_duration_ms = timestamp_ms.saturating_sub(end).max(0);
                }
                next.status = DeviceStatus::Running;
                next.time_in_state_ms = timestamp_ms;
            }
            (true, false) => {
                let start = next.cycle_start_ms.take().unwrap_or(timestamp_ms);
                let run_ms = timestamp_ms.saturating_sub(start).max(0);
                next.last_run_time_ms = run_ms;
                next.since_cycle_count += 1;
                next.previous_cycle_end_ms = Some(timestamp_ms);
                next.status = DeviceStatus::Stopped;
                next.time_in_state_ms = timestamp_ms;
                completed = Some(CycleRecord::from_run(start, run_ms));
            }
            (_, _) => {
                // A real sample after a timeout resumes the status it implies.
                if next.status == DeviceStatus::Offline {
                    next.status = DeviceStatus::from_sample(on);
                    next.time_in_state_ms = timestamp_ms;
                }
                if !on && next.previous_cycle_end_ms.is_none() {
                    next.previous_cycle_end_ms = Some(timestamp_ms);
                }
            }
        }
        next.last_sample_value = clipped;
        next.last_sample_ms = Some(timestamp_ms);

        if let Some(record) = completed {
            self.cycles.push(record)?;
            tracing::debug!(
                "Cycle completed: started {} ran {:.1}s",
                record.start_ms,
                record.duration_secs
            );
        }
        self.state = next;
        Ok(completed)
    }

    /// Flag the device as not reporting. Cycle accounting is untouched.
    pub fn force_offline(&mut self, timestamp_ms: i64) {
        self.state.status = DeviceStatus::Offline;
        self.state.time_in_state_ms = timestamp_ms;
    }

    pub fn reset_baseline(&mut self, timestamp_ms: i64) {
        self.state.since_cycle_count = 0;
        self.state.since_run_time_ms = 0;
        self.state.since_baseline_ms = timestamp_ms;
    }

    /// Statistics as of `now_ms`. While running, the time since the last
    /// sample is included without being committed.
    pub fn snapshot(&self, now_ms: i64) -> Snapshot {
        let s = &self.state;

        let (since_run_time_ms, current_run_time) = if s.status == DeviceStatus::Running {
            let pending = s.last_sample_ms.map_or(0, |t| now_ms.saturating_sub(t).max(0));
            let current = s
                .cycle_start_ms
                .map(|t| ms_to_secs(now_ms.saturating_sub(t).max(0)));
            (s.since_run_time_ms.saturating_add(pending), current)
        } else {
            (s.since_run_time_ms, None)
        };

        Snapshot {
            status: s.status,
            status_start: ms_to_secs(now_ms.saturating_sub(s.time_in_state_ms).max(0)),
            since: s.since_baseline_ms,
            since_cycles: s.since_cycle_count,
            since_run_time: ms_to_secs(since_run_time_ms),
            last_run_time: ms_to_secs(s.last_run_time_ms),
            last_off_time: ms_to_secs(s.last_off_duration_ms),
            current_run_time,
            moment: now_ms,
        }
    }

    pub fn state(&self) -> &AccumulatorState {
        &self.state
    }

    pub fn history(&self) -> &DurableRingBuffer<CycleRecord> {
        &self.cycles
    }

    pub fn into_history(self) -> DurableRingBuffer<CycleRecord> {
        self.cycles
    }
}
