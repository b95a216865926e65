use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{roi::Roi, session::SessionState};

/// High-level event bus message kinds moving through the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Lifecycle,
    Warning,
    Roi,
    Capture,
}

/// Immutable event envelope for logging, display and telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Lifecycle(LifecycleEvent),
    Warning(WarningEvent),
    Roi(RoiEvent),
    Capture(CaptureEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub from: SessionState,
    pub to: SessionState,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    ResolutionMismatch,
    ConnectionLost,
    Reconnected,
    StartFailed,
    InvalidRoi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarningEvent {
    pub kind: WarningKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoiEvent {
    pub roi: Option<Roi>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureEvent {
    pub path: String,
}

impl SystemEvent {
    pub fn new(payload: EventPayload) -> Self {
        let kind = match &payload {
            EventPayload::Lifecycle(_) => EventKind::Lifecycle,
            EventPayload::Warning(_) => EventKind::Warning,
            EventPayload::Roi(_) => EventKind::Roi,
            EventPayload::Capture(_) => EventKind::Capture,
        };
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn lifecycle(from: SessionState, to: SessionState, details: Option<String>) -> Self {
        Self::new(EventPayload::Lifecycle(LifecycleEvent { from, to, details }))
    }

    pub fn warning(kind: WarningKind, message: impl Into<String>) -> Self {
        Self::new(EventPayload::Warning(WarningEvent {
            kind,
            message: message.into(),
        }))
    }
}
