//! Capture session state

use crate::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};

/// Lifecycle of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
    /// Gave up after a device loss or repeated faults; `stop()` returns to Idle
    Failed,
}

/// Session status as a UI shell would display it
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CaptureStatus {
    pub state: SessionState,

    /// Opened input, while running
    pub device_id: Option<String>,

    /// Actual device sample rate, 0 while idle
    pub sample_rate: u32,

    /// Why the session failed
    pub error: Option<String>,

    pub error_kind: Option<ErrorKind>,
}

impl CaptureStatus {
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub(crate) fn failed(error: &Error) -> Self {
        Self {
            state: SessionState::Failed,
            device_id: None,
            sample_rate: 0,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
        }
    }
}
