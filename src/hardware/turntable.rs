//! Turntable drivers: stepper motor via helper command, and an in-memory simulation.

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::command::run_bounded;
use super::TurntableDriver;
use crate::error::DriverError;

/// Stepper motor parameters, read from the `turntable` block of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepperSettings {
    /// Helper program that pulses the driver board
    pub command: String,
    pub steps_per_rev: u32,
    pub microsteps: u32,
    /// Seconds between microstep pulses
    pub step_delay: f64,
    /// Allowance on top of the expected move duration
    pub timeout_secs: u64,
}

impl Default for StepperSettings {
    fn default() -> Self {
        StepperSettings {
            command: "turntable-stepper".to_string(),
            steps_per_rev: 200,
            microsteps: 32,
            step_delay: 0.005,
            timeout_secs: 10,
        }
    }
}

impl StepperSettings {
    pub fn steps_per_revolution(&self) -> i64 {
        self.steps_per_rev as i64 * self.microsteps as i64
    }
}

#[derive(Debug, Default)]
struct Position {
    /// Absolute microstep, modulo one revolution
    step: i64,
    /// Requested angle since start, kept fractional so rounding does not drift
    degrees: f64,
}

/// NEMA-style stepper behind a helper command
/// (`<cmd> turn --dir <forward|backward> --steps N --delay S`, `<cmd> stop`).
pub struct StepperTurntable {
    settings: StepperSettings,
    position: Mutex<Position>,
}

impl StepperTurntable {
    pub fn new(settings: StepperSettings) -> Result<Self, DriverError> {
        if settings.steps_per_revolution() <= 0 {
            return Err(DriverError::Disconnected(
                "steps_per_rev and microsteps must be positive".to_string(),
            ));
        }
        log::info!(
            "StepperTurntable initialized (steps/rev={}, microsteps={}, total={}, step_delay={}s)",
            settings.steps_per_rev,
            settings.microsteps,
            settings.steps_per_revolution(),
            settings.step_delay
        );
        Ok(StepperTurntable {
            settings,
            position: Mutex::new(Position::default()),
        })
    }

    /// Current position in degrees relative to start, in `[0, 360)`.
    pub fn position_degrees(&self) -> f64 {
        let step = self.position.lock().map(|p| p.step).unwrap_or(0);
        step as f64 * 360.0 / self.settings.steps_per_revolution() as f64
    }

    /// Microsteps to move so the table reaches `start + degrees` from the
    /// current requested angle.
    fn plan_move(&self, degrees: f64) -> Result<i64, DriverError> {
        let total = self.settings.steps_per_revolution() as f64;
        let position = self
            .position
            .lock()
            .map_err(|e| DriverError::Io(format!("position lock poisoned: {}", e)))?;
        let current = (position.degrees / 360.0 * total).round() as i64;
        let target = ((position.degrees + degrees) / 360.0 * total).round() as i64;
        Ok(target - current)
    }

    fn commit_move(&self, degrees: f64, steps: i64) {
        if let Ok(mut position) = self.position.lock() {
            let total = self.settings.steps_per_revolution();
            position.degrees += degrees;
            position.step = (position.step + steps).rem_euclid(total);
        }
    }

    async fn turn(&self, steps: i64) -> Result<(), DriverError> {
        if steps == 0 {
            return Ok(());
        }
        let direction = if steps > 0 { "forward" } else { "backward" };
        let count = steps.unsigned_abs();
        let expected = Duration::from_secs_f64(count as f64 * self.settings.step_delay.max(0.0));
        let args = vec![
            "turn".to_string(),
            "--dir".to_string(),
            direction.to_string(),
            "--steps".to_string(),
            count.to_string(),
            "--delay".to_string(),
            self.settings.step_delay.to_string(),
        ];
        log::info!("Moving {} microsteps (dir={})", count, direction);
        run_bounded(
            &self.settings.command,
            &args,
            "rotate",
            expected + Duration::from_secs(self.settings.timeout_secs),
        )
        .await?;
        Ok(())
    }
}

impl TurntableDriver for StepperTurntable {
    fn rotate(&self, degrees: f64) -> BoxFuture<'_, Result<(), DriverError>> {
        async move {
            let steps = self.plan_move(degrees)?;
            log::info!("Moving by {} degrees ({} microsteps)", degrees, steps);
            self.turn(steps).await?;
            self.commit_move(degrees, steps);
            Ok(())
        }
        .boxed()
    }

    fn release(&self) -> BoxFuture<'_, Result<(), DriverError>> {
        async move {
            run_bounded(
                &self.settings.command,
                &["stop".to_string()],
                "release",
                Duration::from_secs(self.settings.timeout_secs),
            )
            .await?;
            log::info!("Turntable motor released");
            Ok(())
        }
        .boxed()
    }

    fn reset_position(&self) -> BoxFuture<'_, Result<(), DriverError>> {
        async move {
            let step = self
                .position
                .lock()
                .map(|p| p.step)
                .map_err(|e| DriverError::Io(format!("position lock poisoned: {}", e)))?;
            if step == 0 {
                return Ok(());
            }
            log::info!("Resetting position by {} microsteps", -step);
            self.turn(-step).await?;
            if let Ok(mut position) = self.position.lock() {
                *position = Position::default();
            }
            Ok(())
        }
        .boxed()
    }
}

/// In-memory turntable for dry runs.
#[derive(Debug, Default)]
pub struct SimulatedTurntable {
    degrees: Mutex<f64>,
    rotations: AtomicUsize,
    releases: AtomicUsize,
}

impl SimulatedTurntable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rotations(&self) -> usize {
        self.rotations.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn position_degrees(&self) -> f64 {
        self.degrees.lock().map(|d| *d).unwrap_or(0.0)
    }
}

impl TurntableDriver for SimulatedTurntable {
    fn rotate(&self, degrees: f64) -> BoxFuture<'_, Result<(), DriverError>> {
        async move {
            if let Ok(mut current) = self.degrees.lock() {
                *current = (*current + degrees).rem_euclid(360.0);
            }
            self.rotations.fetch_add(1, Ordering::SeqCst);
            log::debug!("[SIM] rotated {}°, now at {:.1}°", degrees, self.position_degrees());
            Ok(())
        }
        .boxed()
    }

    fn release(&self) -> BoxFuture<'_, Result<(), DriverError>> {
        async move {
            self.releases.fetch_add(1, Ordering::SeqCst);
            log::debug!("[SIM] motor released");
            Ok(())
        }
        .boxed()
    }

    fn reset_position(&self) -> BoxFuture<'_, Result<(), DriverError>> {
        async move {
            if let Ok(mut current) = self.degrees.lock() {
                *current = 0.0;
            }
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stepper() -> StepperTurntable {
        StepperTurntable::new(StepperSettings::default()).unwrap()
    }

    #[test]
    fn test_plan_move_does_not_drift() {
        let table = stepper();
        // 6400 microsteps per rev: 10° is 177.78 steps
        let mut total = 0;
        for _ in 0..36 {
            let steps = table.plan_move(10.0).unwrap();
            table.commit_move(10.0, steps);
            total += steps;
        }
        assert_eq!(total, 6400);
        assert_eq!(table.position_degrees(), 0.0);
    }

    #[test]
    fn test_backward_move_wraps() {
        let table = stepper();
        let steps = table.plan_move(-90.0).unwrap();
        assert_eq!(steps, -1600);
        table.commit_move(-90.0, steps);
        assert_eq!(table.position_degrees(), 270.0);
    }

    #[test]
    fn test_rejects_zero_resolution() {
        let settings = StepperSettings {
            microsteps: 0,
            ..Default::default()
        };
        assert!(StepperTurntable::new(settings).is_err());
    }

    #[tokio::test]
    async fn test_zero_step_move_skips_command() {
        let table = StepperTurntable::new(StepperSettings {
            command: "plantscan-no-such-binary".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert!(table.rotate(0.0).await.is_ok());
        assert!(table.reset_position().await.is_ok());
        assert!(table.rotate(10.0).await.is_err());
    }

    #[tokio::test]
    async fn test_simulated_counts() {
        let table = SimulatedTurntable::new();
        table.rotate(90.0).await.unwrap();
        table.rotate(300.0).await.unwrap();
        assert_eq!(table.rotations(), 2);
        assert_eq!(table.position_degrees(), 30.0);
        table.release().await.unwrap();
        table.release().await.unwrap();
        assert_eq!(table.releases(), 2);
        table.reset_position().await.unwrap();
        assert_eq!(table.position_degrees(), 0.0);
    }
}
