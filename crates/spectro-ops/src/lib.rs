//! Operational helpers: tracing setup and telemetry persistence.

use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex as StdMutex},
};

use chrono::Utc;
use spectro_types::{
    config::OpsConfig, events::SystemEvent, telemetry::AcquisitionMetrics, Result, SpectroError,
};
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

fn env_filter(config: &OpsConfig) -> Result<EnvFilter> {
    EnvFilter::try_new(config.log_level.clone())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| SpectroError::Ops(format!("failed to create log filter: {err}")))
}

pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    fmt()
        .with_env_filter(env_filter(config)?)
        .try_init()
        .map_err(|err| SpectroError::Ops(format!("tracing init error: {err}")))?;
    Ok(())
}

/// Route logs to `<telemetry_dir>/spectro.log` instead of the terminal, for
/// full-screen UIs.
pub fn init_file_tracing(config: &OpsConfig) -> Result<PathBuf> {
    let dir = ensure_telemetry_dir(&config.telemetry_dir)?;
    let path = dir.join("spectro.log");
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| SpectroError::Ops(format!("failed to open log file: {err}")))?;
    fmt()
        .with_env_filter(env_filter(config)?)
        .with_ansi(false)
        .with_writer(StdMutex::new(file))
        .try_init()
        .map_err(|err| SpectroError::Ops(format!("tracing init error: {err}")))?;
    Ok(path)
}

/// In-memory record of session events and metric snapshots.
#[derive(Clone, Default)]
pub struct TelemetryStore {
    events: Arc<Mutex<Vec<SystemEvent>>>,
    metrics: Arc<Mutex<Vec<AcquisitionMetrics>>>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_event(&self, event: SystemEvent) {
        self.events.lock().await.push(event);
    }

    pub async fn record_metrics(&self, metrics: AcquisitionMetrics) {
        self.metrics.lock().await.push(metrics);
    }

    pub async fn snapshot_events(&self) -> Vec<SystemEvent> {
        self.events.lock().await.clone()
    }

    pub async fn last_metrics(&self) -> Option<AcquisitionMetrics> {
        self.metrics.lock().await.last().copied()
    }

    /// Append every recorded event as one JSON line to
    /// `<dir>/events_<date>.jsonl`. Returns the file written.
    pub async fn flush_to(&self, dir: &Path) -> Result<PathBuf> {
        let events = self.events.lock().await.clone();
        fs::create_dir_all(dir)
            .map_err(|err| SpectroError::Ops(format!("failed to create telemetry dir: {err}")))?;
        let path = dir.join(format!("events_{}.jsonl", Utc::now().format("%Y%m%d")));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| SpectroError::Ops(format!("failed to open {}: {err}", path.display())))?;
        write_lines(&mut file, &events)?;
        info!("Flushed {} events to {:?}", events.len(), path);
        Ok(path)
    }
}

fn write_lines(file: &mut File, events: &[SystemEvent]) -> Result<()> {
    for event in events {
        let line = serde_json::to_string(event)
            .map_err(|err| SpectroError::Ops(format!("failed to encode event: {err}")))?;
        writeln!(file, "{line}")
            .map_err(|err| SpectroError::Ops(format!("failed to write event: {err}")))?;
    }
    Ok(())
}

pub fn ensure_telemetry_dir(path: &str) -> Result<PathBuf> {
    let dir = PathBuf::from(path);
    fs::create_dir_all(&dir)
        .map_err(|err| SpectroError::Ops(format!("failed to create telemetry dir: {err}")))?;
    info!("Telemetry directory ready at {:?}", dir);
    Ok(dir)
}
