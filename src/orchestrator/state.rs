//! Run State Management and Status Tracking
//!
//! This module provides the state tracking structures used by the scan
//! orchestrator to manage one scan run.
//!
//! **Architecture**:
//! - `RunStatus`: Enum representing discrete run states
//! - `RunState`: Struct tracking current status, progress, and per-step errors
//! - State transitions are validated here and driven by the orchestrator

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::models::Axis;

/// Run status enumeration - discrete states in the scan lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RunStatus {
    /// No active run
    Idle,

    /// Rotating and capturing through the plan
    Running,

    /// Stop requested, finishing the in-flight capture
    Stopping,

    /// Releasing the turntable
    Cleaning,

    /// Ended by a rotation failure or an exceeded error limit
    Failed,

    /// Every step processed
    Completed,
}

impl RunStatus {
    /// Get the human-readable name for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Stopping => "stopping",
            RunStatus::Cleaning => "cleaning",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
        }
    }

    /// Get all valid transitions FROM this status.
    pub fn valid_next(&self) -> Vec<RunStatus> {
        match self {
            RunStatus::Idle => vec![RunStatus::Running],
            RunStatus::Running => vec![RunStatus::Stopping, RunStatus::Cleaning],
            RunStatus::Stopping => vec![RunStatus::Cleaning],
            RunStatus::Cleaning => vec![RunStatus::Completed, RunStatus::Failed, RunStatus::Idle],
            RunStatus::Completed => vec![RunStatus::Idle],
            RunStatus::Failed => vec![RunStatus::Idle],
        }
    }

    /// Check if a transition to the given status is valid.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        self.valid_next().contains(&next)
    }

}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capture that failed after all retries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepError {
    pub step_index: usize,
    pub axis: Axis,
    pub angle: f64,
    pub cause: String,
}

/// Snapshot of one scan run.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub status: RunStatus,

    /// Steps processed so far (captured or failed)
    pub current_step: usize,

    pub total_steps: usize,

    /// Per-step capture failures in the order they happened
    pub errors: Vec<StepError>,

    /// Cause of a Failed run
    pub failure: Option<String>,

    /// Set once an external stop request has been observed
    pub stop_requested: bool,

    pub started_at: Option<DateTime<Local>>,

    pub finished_at: Option<DateTime<Local>>,
}

impl Default for RunState {
    fn default() -> Self {
        RunState {
            status: RunStatus::Idle,
            current_step: 0,
            total_steps: 0,
            errors: Vec::new(),
            failure: None,
            stop_requested: false,
            started_at: None,
            finished_at: None,
        }
    }
}

impl RunState {
    /// Fresh state for a run over `total_steps` steps.
    pub fn new(total_steps: usize) -> Self {
        RunState {
            total_steps,
            ..Default::default()
        }
    }

    /// Attempt to transition to the next status.
    pub fn transition_to(&mut self, next: RunStatus) -> Result<(), String> {
        if !self.status.can_transition_to(next) {
            return Err(format!(
                "Invalid run transition: {} -> {}",
                self.status.as_str(),
                next.as_str()
            ));
        }
        match next {
            RunStatus::Running => self.started_at = Some(Local::now()),
            RunStatus::Completed | RunStatus::Failed | RunStatus::Idle => {
                self.finished_at = Some(Local::now())
            }
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    /// Mark one more step as processed.
    pub fn advance(&mut self) {
        self.current_step = (self.current_step + 1).min(self.total_steps);
    }

    pub fn record_step_error(&mut self, error: StepError) {
        self.errors.push(error);
    }

    /// Progress percentage (0-100).
    pub fn percent(&self) -> u32 {
        if self.total_steps == 0 {
            return 0;
        }
        ((self.current_step * 100) / self.total_steps) as u32
    }
}
