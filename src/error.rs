//! Error types for audio capture and device handling

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can escape a capture or enumeration operation.
///
/// Per-frame analysis problems never show up here; they are neutralised
/// inside the pipeline (see [`crate::audio::AnalysisFault`]).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Permission to capture audio was denied: {0}")]
    PermissionDenied(String),

    #[error("Audio input not found: {0}")]
    DeviceNotFound(String),

    #[error("Audio input is busy: {0}")]
    DeviceBusy(String),

    #[error("Capture constraints cannot be satisfied: {0}")]
    ConstraintsUnsatisfiable(String),

    #[error("Audio engine failed to initialize: {0}")]
    InitializationError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for capture operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse error category, stable enough for a UI to switch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    DeviceNotFound,
    DeviceBusy,
    ConstraintsUnsatisfiable,
    InitializationError,
    InvalidConfig,
}

impl ErrorKind {
    /// Short, user-actionable remediation text for this kind of failure.
    pub fn remediation_hint(self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => {
                "Grant microphone access to this application and try again."
            }
            ErrorKind::DeviceNotFound => {
                "Connect an audio input device or pick another input from the list."
            }
            ErrorKind::DeviceBusy => {
                "Close other applications that are using the audio input and try again."
            }
            ErrorKind::ConstraintsUnsatisfiable => {
                "The selected input does not support the requested format; pick another input."
            }
            ErrorKind::InitializationError => {
                "The audio engine could not start; reconnect the device or restart the application."
            }
            ErrorKind::InvalidConfig => "Check the analysis configuration values.",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::DeviceNotFound(_) => ErrorKind::DeviceNotFound,
            Error::DeviceBusy(_) => ErrorKind::DeviceBusy,
            Error::ConstraintsUnsatisfiable(_) => ErrorKind::ConstraintsUnsatisfiable,
            Error::InitializationError(_) => ErrorKind::InitializationError,
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }

    pub fn remediation_hint(&self) -> &'static str {
        self.kind().remediation_hint()
    }

    /// Classify a free-form backend message.
    ///
    /// Platform audio layers mostly report failures as strings, so the
    /// category is recovered from well-known wording.
    pub fn from_backend_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if ["permission", "denied", "not allowed", "unauthorized"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            Error::PermissionDenied(message)
        } else if ["busy", "in use", "exclusive"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            Error::DeviceBusy(message)
        } else if ["no such device", "not found", "disconnected"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            Error::DeviceNotFound(message)
        } else {
            Error::InitializationError(message)
        }
    }
}
