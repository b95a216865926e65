use thiserror::Error;

use crate::frame::Resolution;

pub type Result<T, E = SpectroError> = std::result::Result<T, E>;

/// Unified error type covering common failure scenarios across subsystems.
#[derive(Debug, Error)]
pub enum SpectroError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("device unreachable at {endpoint}: {reason}")]
    Connectivity { endpoint: String, reason: String },
    #[error("stream failed to open at {endpoint}: {reason}")]
    StreamOpen { endpoint: String, reason: String },
    #[error("transient read failure: {0}")]
    TransientRead(String),
    #[error("frame resolution changed from {expected} to {actual}")]
    ResolutionMismatch {
        expected: Resolution,
        actual: Resolution,
    },
    #[error("invalid region of interest: {0}")]
    InvalidRoi(String),
    #[error("session error: {0}")]
    Session(String),
    #[error("vision error: {0}")]
    Vision(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SpectroError {
    /// Connectivity and open failures leave the session restartable.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            SpectroError::Connectivity { .. }
                | SpectroError::StreamOpen { .. }
                | SpectroError::TransientRead(_)
        )
    }
}

/// Failure to establish a stream connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    /// The reachability probe failed: the device is offline or not on this network.
    #[error("device offline or unreachable at {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },
    /// The device answered the probe but the stream could not be opened.
    #[error("stream open failed at {endpoint}: {reason}")]
    StreamOpen { endpoint: String, reason: String },
}

/// Failure to pull a frame from an open stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReadError {
    /// Nothing usable arrived this time; the connection is still open.
    #[error("no frame available: {0}")]
    NoFrame(String),
    /// The remote end closed the connection.
    #[error("stream closed by remote")]
    Closed,
}

impl From<ConnectError> for SpectroError {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::Unreachable { endpoint, reason } => {
                SpectroError::Connectivity { endpoint, reason }
            }
            ConnectError::StreamOpen { endpoint, reason } => {
                SpectroError::StreamOpen { endpoint, reason }
            }
        }
    }
}

impl From<ReadError> for SpectroError {
    fn from(err: ReadError) -> Self {
        SpectroError::TransientRead(err.to_string())
    }
}
