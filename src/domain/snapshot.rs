// Snapshot of device statistics in user-facing units, and the delta handed to publishers
use super::status::DeviceStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

/// Point-in-time view of an accumulator. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub status: DeviceStatus,
    /// Seconds spent in the current status
    pub status_start: f64,
    /// Baseline timestamp, ms since epoch
    pub since: i64,
    pub since_cycles: u64,
    pub since_run_time: f64,
    pub last_run_time: f64,
    pub last_off_time: f64,
    /// Elapsed time of the cycle in progress, only while running
    pub current_run_time: Option<f64>,
    /// The `now` the snapshot was taken at
    pub moment: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeltaValue {
    pub path: String,
    pub value: Value,
}

/// Flat path/value update for one device
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    pub device_id: String,
    pub values: Vec<DeltaValue>,
}

pub(crate) fn ms_to_secs(ms: i64) -> f64 {
    ms as f64 / 1000.0
}

fn format_timestamp(ms: i64) -> Value {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(t) => Value::String(t.to_rfc3339()),
        None => json!(ms),
    }
}

impl Snapshot {
    /// Key/value pairs in reporting order. Keys match `metadata::meter_keys`.
    pub fn values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("status", json!(self.status.as_str())),
            ("statusStart", json!(self.status_start)),
            ("since", format_timestamp(self.since)),
            ("sinceCycles", json!(self.since_cycles)),
            ("sinceRunTime", json!(self.since_run_time)),
            ("lastRunTime", json!(self.last_run_time)),
            ("lastOffTime", json!(self.last_off_time)),
            ("currentRunTime", json!(self.current_run_time)),
            ("moment", json!(self.moment)),
        ]
    }

    pub fn to_delta(&self, device_id: &str, stats_path: &str) -> Delta {
        let values = self
            .values()
            .into_iter()
            .map(|(key, value)| DeltaValue {
                path: format!("{}.{}", stats_path, key),
                value,
            })
            .collect();

        Delta {
            device_id: device_id.to_string(),
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> Snapshot {
        Snapshot {
            status: DeviceStatus::Running,
            status_start: 2.0,
            since: 0,
            since_cycles: 3,
            since_run_time: 12.5,
            last_run_time: 4.0,
            last_off_time: 60.0,
            current_run_time: Some(2.0),
            moment: 10_000,
        }
    }

    #[test]
    fn test_delta_paths_are_prefixed() {
        let delta = sample_snapshot().to_delta("bilgePump", "electrical.pumps.bilge");

        assert_eq!(delta.device_id, "bilgePump");
        assert_eq!(delta.values[0].path, "electrical.pumps.bilge.status");
        assert_eq!(delta.values[0].value, json!("RUNNING"));
        assert_eq!(delta.values[2].value, json!("1970-01-01T00:00:00+00:00"));
    }

    #[test]
    fn test_current_run_time_null_when_not_running() {
        let mut snapshot = sample_snapshot();
        snapshot.status = DeviceStatus::Stopped;
        snapshot.current_run_time = None;

        let values = snapshot.values();
        let (_, current) = values
            .iter()
            .find(|(k, _)| *k == "currentRunTime")
            .unwrap();
        assert!(current.is_null());
    }
}
