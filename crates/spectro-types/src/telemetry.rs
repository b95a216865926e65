use serde::{Deserialize, Serialize};

use crate::frame::Resolution;

/// Snapshot of acquisition loop counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AcquisitionMetrics {
    pub frames_published: u64,
    pub transient_failures: u64,
    pub resolution_resets: u64,
    pub reconnects: u64,
    pub native_resolution: Option<Resolution>,
}
