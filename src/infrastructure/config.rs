use crate::domain::device::Device;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct MeterConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Scheduler tick, independent of sampling
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    #[serde(default)]
    pub publish: PublishSettings,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublishSettings {
    /// Base URL deltas are POSTed to; publishing over HTTP is off when unset
    pub url: Option<String>,
    #[serde(default = "default_publish_timeout")]
    pub timeout_secs: u64,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_publish_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    pub name: String,
    /// Prefix for reported keys, defaults to the device name
    #[serde(default)]
    pub stats_path: String,
    #[serde(default = "default_report_interval")]
    pub sec_report_interval: u64,
    #[serde(default = "default_timeout")]
    pub sec_timeout: u64,
    #[serde(default = "default_checkpoint")]
    pub sec_checkpoint: u64,
    #[serde(default)]
    pub noise_margin: f64,
    #[serde(default = "default_capacity")]
    pub history_capacity: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_heartbeat_ms() -> u64 {
    2_000
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_publish_timeout() -> u64 {
    5
}

fn default_report_interval() -> u64 {
    30
}

fn default_timeout() -> u64 {
    300
}

fn default_checkpoint() -> u64 {
    60
}

fn default_capacity() -> usize {
    1000
}

impl DeviceConfig {
    pub fn device(&self) -> Device {
        Device::new(self.name.clone())
    }

    pub fn stats_path(&self) -> String {
        if self.stats_path.is_empty() {
            self.name.clone()
        } else {
            self.stats_path.clone()
        }
    }
}

impl MeterConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_ms == 0 {
            anyhow::bail!("heartbeat_ms must be greater than 0");
        }

        let mut ids = HashSet::new();
        for device in &self.devices {
            let id = device.device().id;
            if id.is_empty() {
                anyhow::bail!("device name {:?} does not produce a usable id", device.name);
            }
            if !ids.insert(id.clone()) {
                anyhow::bail!("duplicate device id {} (from name {:?})", id, device.name);
            }
            if device.history_capacity == 0 {
                anyhow::bail!("device {}: history_capacity must be at least 1", device.name);
            }
            if device.sec_report_interval == 0 || device.sec_timeout == 0 || device.sec_checkpoint == 0 {
                anyhow::bail!("device {}: intervals must be greater than 0", device.name);
            }
            if !device.noise_margin.is_finite() || device.noise_margin < 0.0 {
                anyhow::bail!("device {}: noise_margin must be a non-negative number", device.name);
            }
        }
        Ok(())
    }
}

pub fn load_meter_config() -> anyhow::Result<MeterConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/meter").required(false))
        .add_source(config::Environment::with_prefix("PUMP_METER").separator("__"))
        .build()?;

    let meter: MeterConfig = settings.try_deserialize()?;
    meter.validate()?;
    Ok(meter)
}
