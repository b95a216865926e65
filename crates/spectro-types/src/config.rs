use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Result, SpectroError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub url: String,
    pub probe_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl StreamConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "http://192.168.100.13:81/stream".into(),
            probe_timeout_ms: 2_000,
            read_timeout_ms: 1_000,
            poll_interval_ms: 10,
            reconnect_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub histogram_interval_ms: u64,
    pub intensity_interval_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            histogram_interval_ms: 100,
            intensity_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub capture_dir: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capture_dir: "captures".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsConfig {
    pub log_level: String,
    pub telemetry_dir: String,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            telemetry_dir: "telemetry".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpectroConfig {
    pub stream: StreamConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub ops: OpsConfig,
}

impl SpectroConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            SpectroError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            SpectroError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream.url.trim().is_empty() {
            return Err(SpectroError::Configuration(
                "stream.url must not be empty".into(),
            ));
        }
        if self.stream.probe_timeout_ms == 0 {
            return Err(SpectroError::Configuration(
                "stream.probe_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.stream.read_timeout_ms == 0 {
            return Err(SpectroError::Configuration(
                "stream.read_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.stream.poll_interval_ms == 0 {
            return Err(SpectroError::Configuration(
                "stream.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.stream.reconnect_delay_ms == 0 {
            return Err(SpectroError::Configuration(
                "stream.reconnect_delay_ms must be greater than zero".into(),
            ));
        }
        if self.analysis.histogram_interval_ms == 0 || self.analysis.intensity_interval_ms == 0 {
            return Err(SpectroError::Configuration(
                "analysis intervals must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
