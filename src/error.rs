//! Unified error type hierarchy for PlantScan
//!
//! Provides structured error handling with ConfigError, DriverError and the
//! run-level ScanError taxonomy surfaced by the controller.

use std::io;
use thiserror::Error;

use crate::models::Axis;

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Failure reported by a turntable driver or capture adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    /// External command could not be spawned or exited non-zero
    #[error("Command '{cmd}' failed: {reason}")]
    Command { cmd: String, reason: String },

    /// Call exceeded its bounded wait
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// No camera is mapped to the requested port
    #[error("No camera available on port {0}")]
    NoCamera(String),

    /// Hardware is not reachable
    #[error("Device disconnected: {0}")]
    Disconnected(String),

    /// File I/O error (read/write/create)
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for DriverError {
    fn from(e: io::Error) -> Self {
        DriverError::Io(e.to_string())
    }
}

/// Run-level error taxonomy.
///
/// Only `InvalidConfig` and `AlreadyRunning` are returned to callers of
/// `start`. Capture failures are accumulated in the run state, rotation
/// failures end the run, cleanup failures are logged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("A scan is already running")]
    AlreadyRunning,

    #[error("Capture failed at step {step_index} ({axis} on {port}): {reason}")]
    CaptureFailure {
        step_index: usize,
        axis: Axis,
        port: String,
        reason: String,
    },

    #[error("Rotation to {angle:.1}° failed: {reason}")]
    RotationFailure { angle: f64, reason: String },

    #[error("Turntable release failed: {0}")]
    CleanupFailure(String),

    #[error("Too many capture failures: {failed} exceeds limit of {limit}")]
    TooManyCaptureFailures { failed: usize, limit: usize },

    #[error("I/O error: {0}")]
    Io(String),
}

impl ScanError {
    /// Get a user-facing error message suitable for CLI output
    pub fn user_message(&self) -> String {
        match self {
            ScanError::InvalidConfig(msg) => format!("Scan configuration is invalid: {}", msg),
            ScanError::AlreadyRunning => {
                "A scan is already in progress. Stop it first.".to_string()
            }
            ScanError::CaptureFailure {
                step_index,
                axis,
                reason,
                ..
            } => format!("Photo {} on the {} camera needs retaking: {}", step_index, axis, reason),
            ScanError::RotationFailure { reason, .. } => {
                format!("Turntable stopped responding: {}", reason)
            }
            ScanError::CleanupFailure(msg) => format!("Could not release the turntable: {}", msg),
            ScanError::TooManyCaptureFailures { failed, limit } => format!(
                "Scan aborted after {} failed photos (limit {})",
                failed, limit
            ),
            ScanError::Io(msg) => format!("File operation failed: {}", msg),
        }
    }
}

impl From<ConfigError> for ScanError {
    fn from(e: ConfigError) -> Self {
        ScanError::InvalidConfig(e.to_string())
    }
}

impl From<io::Error> for ScanError {
    fn from(e: io::Error) -> Self {
        ScanError::Io(e.to_string())
    }
}

/// Result alias for scan operations.
pub type Result<T> = std::result::Result<T, ScanError>;
