//! PlantScan: turntable photogrammetry scan orchestration
//!
//! Drives a motorised turntable and up to three gphoto2 cameras through a
//! deterministic rotate -> capture plan, with graceful stop and guaranteed
//! turntable release.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Axes, ports, scan config, and plan types
//! - **hardware**: Turntable and camera drivers behind async traits
//! - **config**: JSON configuration file handling
//! - **orchestrator**: Plan builder, run state machine, and scan loop
//! - **controller**: start/stop/cleanup/progress entry points
//! - **log_collector**: Disk-backed logging pipeline

// Core foundational modules
pub mod error;
pub mod models;

// Turntable and camera drivers
pub mod hardware;

// Configuration file handling
pub mod config;

// Robust, decoupled logging system
pub mod log_collector;

// Plan building and run state management
pub mod orchestrator;

// Run controller and event stream
pub mod controller;

// Re-export the log crate for macro usage
pub use log;

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{ConfigError, DriverError, Result, ScanError};

pub use models::{
    Axis, AxisAssignments, CapturePolicy, CaptureStep, PhotoMode, PlanEstimate, PortId,
    ScanConfig, ScanPlan,
};

pub use hardware::{
    CaptureAdapter, DetectedCamera, Gphoto2Camera, SimulatedTurntable, StepperSettings,
    StepperTurntable, TurntableDriver,
};

pub use config::{CameraEntry, ScanSettings};

pub use log_collector::{LogCollector, LogLine};

pub use orchestrator::{build as build_plan, RunState, RunStatus, ScanOrchestrator, StepError};

pub use controller::{RunController, ScanEvent};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constant() {
        assert_eq!(VERSION, "0.1.0");
    }

    #[test]
    fn test_error_reexport() {
        let result: Result<i32> = Err(ScanError::AlreadyRunning);
        assert!(result.is_err());
    }

    #[test]
    fn test_plan_reexport() {
        let axes = AxisAssignments::new().with(Axis::Z, "Fake Camera");
        let plan = build_plan(&ScanConfig::new("lib", 180.0, axes)).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.estimate().total_photos, 2);
    }
}
