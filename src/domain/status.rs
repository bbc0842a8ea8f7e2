// Device run status
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceStatus {
    /// No sample received within the configured timeout
    Offline,
    Stopped,
    Running,
}

impl DeviceStatus {
    pub fn from_sample(on: bool) -> Self {
        if on {
            DeviceStatus::Running
        } else {
            DeviceStatus::Stopped
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Offline => "OFFLINE",
            DeviceStatus::Stopped => "STOPPED",
            DeviceStatus::Running => "RUNNING",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
