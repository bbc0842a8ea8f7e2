// Display metadata for each reported statistic
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneState {
    Normal,
    Warn,
    Alarm,
}

/// A value range with an alert state. Open-ended when a bound is `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Zone {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
    pub state: ZoneState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

impl Zone {
    fn new(
        lower: Option<f64>,
        upper: Option<f64>,
        state: ZoneState,
        message: Option<&'static str>,
    ) -> Self {
        Self {
            lower,
            upper,
            state,
            message,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower.is_none_or(|l| value >= l) && self.upper.is_none_or(|u| value < u)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMeta {
    #[serde(skip)]
    pub key: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<Zone>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetaEntry {
    pub path: String,
    pub value: KeyMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaDelta {
    pub device_id: String,
    pub meta: Vec<MetaEntry>,
}

fn key(
    key: &'static str,
    display_name: &'static str,
    units: Option<&'static str>,
    description: &'static str,
) -> KeyMeta {
    KeyMeta {
        key,
        display_name,
        description,
        units,
        zones: Vec::new(),
    }
}

fn last_run_time_zones() -> Vec<Zone> {
    use ZoneState::*;
    vec![
        Zone::new(None, Some(1.0), Alarm, Some("Pump run too short (alarm)")),
        Zone::new(Some(1.0), Some(7.0), Warn, Some("Pump run too short")),
        Zone::new(Some(7.0), Some(60.0), Normal, None),
        Zone::new(Some(60.0), Some(120.0), Warn, Some("Pump run too long")),
        Zone::new(Some(120.0), None, Alarm, Some("Pump run too long (alarm)")),
    ]
}

/// The `lastRunTime` zone a run of `secs` falls in
pub fn last_run_zone(secs: f64) -> Option<Zone> {
    last_run_time_zones().into_iter().find(|z| z.contains(secs))
}

/// Metadata for every key a snapshot reports, in reporting order.
pub fn meter_keys() -> Vec<KeyMeta> {
    let mut last_run = key(
        "lastRunTime",
        "Last Run Time",
        Some("s"),
        "Run time of the last completed cycle",
    );
    last_run.zones = last_run_time_zones();

    vec![
        key(
            "status",
            "Status",
            None,
            "OFFLINE, STOPPED or RUNNING",
        ),
        key(
            "statusStart",
            "Time In Status",
            Some("s"),
            "Seconds since the status last changed",
        ),
        key(
            "since",
            "Statistics Start",
            Some("timestamp"),
            "Cycles and run time are counted from this moment",
        ),
        key(
            "sinceCycles",
            "Run Cycles",
            None,
            "On-off duty cycles since statistics start",
        ),
        key(
            "sinceRunTime",
            "Run Time",
            Some("s"),
            "Cumulative run time since statistics start",
        ),
        last_run,
        key(
            "lastOffTime",
            "Last Off Time",
            Some("s"),
            "Length of the idle period before the most recent cycle",
        ),
        key(
            "currentRunTime",
            "Current Run Time",
            Some("s"),
            "Elapsed time of the cycle in progress",
        ),
        key(
            "moment",
            "Moment",
            Some("ms"),
            "Time the statistics were computed",
        ),
    ]
}

pub fn meta_delta(device_id: &str, stats_path: &str) -> MetaDelta {
    let meta = meter_keys()
        .into_iter()
        .map(|m| MetaEntry {
            path: format!("{}.{}", stats_path, m.key),
            value: m,
        })
        .collect();

    MetaDelta {
        device_id: device_id.to_string(),
        meta,
    }
}
