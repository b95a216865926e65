use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Stopped,
}

impl SessionState {
    pub fn can_start(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Stopped)
    }

    /// ROI can only be drawn while no frames are arriving.
    pub fn allows_roi_editing(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Stopped)
    }

    pub fn allows_analysis(self) -> bool {
        self == SessionState::Streaming
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Streaming => "streaming",
            SessionState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_gates_follow_state() {
        assert!(SessionState::Idle.can_start());
        assert!(SessionState::Stopped.can_start());
        assert!(!SessionState::Streaming.can_start());
        assert!(!SessionState::Connecting.can_start());

        assert!(SessionState::Stopped.allows_roi_editing());
        assert!(!SessionState::Streaming.allows_roi_editing());
        assert!(SessionState::Streaming.allows_analysis());
        assert!(!SessionState::Stopped.allows_analysis());
    }
}
