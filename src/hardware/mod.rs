//! Hardware seams: turntable and camera traits plus the shipped drivers.
//!
//! The orchestrator only talks to `TurntableDriver` and `CaptureAdapter`.
//! Each driver call is responsible for enforcing its own time bound and
//! returning a `DriverError` instead of hanging.

pub mod camera;
pub mod command;
pub mod turntable;

use futures::future::{BoxFuture, FutureExt};
use std::path::Path;

use crate::error::DriverError;
use crate::models::{PortId, ScanPlan};

pub use camera::{detect_cameras, parse_auto_detect, DetectedCamera, Gphoto2Camera};
pub use turntable::{SimulatedTurntable, StepperSettings, StepperTurntable};

/// Motorized turntable.
pub trait TurntableDriver: Send + Sync {
    /// Rotate by `degrees` (positive is forward).
    fn rotate(&self, degrees: f64) -> BoxFuture<'_, Result<(), DriverError>>;

    /// De-energize the motor. Must be safe to call repeatedly and when the
    /// table never moved.
    fn release(&self) -> BoxFuture<'_, Result<(), DriverError>>;

    /// Return to the position the table had when the driver was created.
    fn reset_position(&self) -> BoxFuture<'_, Result<(), DriverError>> {
        async { Ok(()) }.boxed()
    }
}

/// Camera capture tool.
pub trait CaptureAdapter: Send + Sync {
    /// Take one photo on `port` and store it at `destination`.
    fn capture<'a>(
        &'a self,
        port: &'a PortId,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<(), DriverError>>;

    /// Called once before the first capture of a run.
    fn prepare<'a>(&'a self, _plan: &'a ScanPlan) -> BoxFuture<'a, Result<(), DriverError>> {
        async { Ok(()) }.boxed()
    }

    /// Called once after a completed run.
    fn finalize<'a>(&'a self, _plan: &'a ScanPlan) -> BoxFuture<'a, Result<(), DriverError>> {
        async { Ok(()) }.boxed()
    }
}
