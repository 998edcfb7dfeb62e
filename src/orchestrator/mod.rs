//! Scan Orchestration: drives a scan plan through rotate -> capture cycles.
//!
//! One orchestrator instance executes one run. Stop requests arrive on a
//! `watch` channel and are honoured only at safe points (between steps and
//! during the settle delay), so a capture is never interrupted. Every exit
//! path goes through Cleaning, which releases the turntable exactly once.

pub mod plan;
pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};

pub use plan::build;
pub use state::{RunState, RunStatus, StepError};

use crate::controller::ScanEvent;
use crate::error::{DriverError, ScanError};
use crate::hardware::{CaptureAdapter, TurntableDriver};
use crate::log_parsed;
use crate::models::{CapturePolicy, CaptureStep, ScanConfig, ScanPlan};

/// How the step loop ended.
#[derive(Debug, Clone, PartialEq)]
enum RunEnd {
    Completed,
    Stopped,
    Failed(ScanError),
}

/// Executes one scan run against a turntable and a capture adapter.
pub struct ScanOrchestrator {
    /// Shared with the controller so progress can be read mid-run
    state: Arc<RwLock<RunState>>,

    turntable: Arc<dyn TurntableDriver>,

    camera: Arc<dyn CaptureAdapter>,

    /// Channel for sending scan events to the controller
    event_tx: Option<mpsc::Sender<ScanEvent>>,

    /// Stop signal from the controller
    cancel_rx: watch::Receiver<bool>,

    released: AtomicBool,
}

impl ScanOrchestrator {
    pub fn new(
        state: Arc<RwLock<RunState>>,
        turntable: Arc<dyn TurntableDriver>,
        camera: Arc<dyn CaptureAdapter>,
        event_tx: Option<mpsc::Sender<ScanEvent>>,
        cancel_rx: watch::Receiver<bool>,
    ) -> Self {
        ScanOrchestrator {
            state,
            turntable,
            camera,
            event_tx,
            cancel_rx,
            released: AtomicBool::new(false),
        }
    }

    /// Copy of the current run state.
    pub async fn state_snapshot(&self) -> RunState {
        self.state.read().await.clone()
    }

    fn emit(&self, event: ScanEvent) {
        if let Some(ref tx) = self.event_tx {
            // Events are advisory; a slow consumer can read `progress()` instead
            let _ = tx.try_send(event);
        }
    }

    async fn transition(&self, next: RunStatus) {
        let result = self.state.write().await.transition_to(next);
        match result {
            Ok(()) => {
                log_parsed!("RUN STATUS: {}", next);
                self.emit(ScanEvent::StatusChanged(next));
            }
            Err(e) => log::warn!("[Scan] {}", e),
        }
    }

    fn stop_requested(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Sleep for the settle delay, waking early on a stop request.
    async fn settle(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        let mut cancel_rx = self.cancel_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = async {
                while !*cancel_rx.borrow_and_update() {
                    if cancel_rx.changed().await.is_err() {
                        // Sender gone: no stop can arrive any more
                        std::future::pending::<()>().await;
                    }
                }
            } => {}
        }
    }

    /// Run the whole plan and return the final state.
    ///
    /// `config` supplies timing and policy; `plan` must have been built from it.
    pub async fn run(&self, config: &ScanConfig, plan: &ScanPlan) -> RunState {
        self.transition(RunStatus::Running).await;
        log_parsed!(
            "Starting scan '{}': {} steps at {}° per photo",
            plan.scan_label,
            plan.len(),
            plan.angle_per_photo
        );

        if let Err(e) = self.camera.prepare(plan).await {
            log::warn!("[Scan] Camera preparation failed: {}", e);
        }

        let end = self.drive(config, plan).await;

        // A stop that lands during the final capture still skips the return move
        if end == RunEnd::Completed && config.return_to_start && !self.stop_requested() {
            log::info!("[Scan] Resetting turntable to starting position");
            if let Err(e) = self.turntable.reset_position().await {
                log::error!("[Scan] Turntable reset failed: {}", e);
            }
        }

        if end == RunEnd::Stopped {
            self.enter_stopping().await;
        }
        self.transition(RunStatus::Cleaning).await;
        self.release_turntable().await;

        let final_status = match &end {
            RunEnd::Completed => {
                if let Err(e) = self.camera.finalize(plan).await {
                    log::error!("[Scan] Finalizing captures failed: {}", e);
                }
                RunStatus::Completed
            }
            RunEnd::Stopped => RunStatus::Idle,
            RunEnd::Failed(cause) => {
                log::error!("[Scan] Run failed: {}", cause);
                self.state.write().await.failure = Some(cause.to_string());
                RunStatus::Failed
            }
        };
        self.transition(final_status).await;

        let snapshot = self.state_snapshot().await;
        log_parsed!(
            "Scan '{}' finished: {} ({} of {} steps, {} capture failure(s))",
            plan.scan_label,
            snapshot.status,
            snapshot.current_step,
            snapshot.total_steps,
            snapshot.errors.len()
        );
        self.emit(ScanEvent::Finished(snapshot.clone()));
        snapshot
    }

    async fn enter_stopping(&self) {
        let status = {
            let mut state = self.state.write().await;
            state.stop_requested = true;
            state.status
        };
        if status == RunStatus::Running {
            self.transition(RunStatus::Stopping).await;
        }
    }

    async fn drive(&self, config: &ScanConfig, plan: &ScanPlan) -> RunEnd {
        let mut previous: Option<&CaptureStep> = None;

        for step in &plan.steps {
            let new_group = step.starts_angle_group(previous);

            if new_group && previous.is_some() {
                self.settle(config.step_delay).await;
            }

            // Safe point: the previous capture has finished
            if self.stop_requested() {
                log_parsed!("Scan stopped by user before step {}", step.step_index);
                return RunEnd::Stopped;
            }

            if new_group && previous.is_some() {
                log::info!(
                    "[Scan] Rotating to {:.1}° (group {})",
                    step.cumulative_angle,
                    step.angle_index
                );
                if let Err(e) = self.turntable.rotate(plan.angle_per_photo).await {
                    return RunEnd::Failed(ScanError::RotationFailure {
                        angle: step.cumulative_angle,
                        reason: e.to_string(),
                    });
                }
            }

            if let Err(e) = self.capture_step(step, &config.capture_policy).await {
                let failed = self.record_capture_failure(step, e).await;
                if let Some(limit) = config.capture_policy.max_failed_steps {
                    if failed > limit {
                        self.advance(step).await;
                        return RunEnd::Failed(ScanError::TooManyCaptureFailures { failed, limit });
                    }
                }
            } else {
                log::info!(
                    "[Scan] Captured {} at {:.1}° (step {})",
                    step.axis,
                    step.cumulative_angle,
                    step.step_index
                );
            }

            self.advance(step).await;
            previous = Some(step);
        }

        RunEnd::Completed
    }

    async fn capture_step(&self, step: &CaptureStep, policy: &CapturePolicy) -> Result<(), DriverError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.camera.capture(&step.port, &step.output_path).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt <= policy.max_retries => {
                    log::warn!(
                        "[Scan] Capture attempt {} for {} at {:.1}° failed, retrying: {}",
                        attempt,
                        step.axis,
                        step.cumulative_angle,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Record a failed step and return the failure count so far.
    async fn record_capture_failure(&self, step: &CaptureStep, cause: DriverError) -> usize {
        let error = ScanError::CaptureFailure {
            step_index: step.step_index,
            axis: step.axis,
            port: step.port.to_string(),
            reason: cause.to_string(),
        };
        log::error!("[Scan] {}", error);

        let step_error = StepError {
            step_index: step.step_index,
            axis: step.axis,
            angle: step.cumulative_angle,
            cause: cause.to_string(),
        };
        self.emit(ScanEvent::CaptureFailed(step_error.clone()));

        let mut state = self.state.write().await;
        state.record_step_error(step_error);
        state.errors.len()
    }

    async fn advance(&self, step: &CaptureStep) {
        let (current, total) = {
            let mut state = self.state.write().await;
            state.advance();
            (state.current_step, state.total_steps)
        };
        log::debug!("[Scan] Step {} done ({}/{})", step.step_index, current, total);
        self.emit(ScanEvent::Progress { current, total });
    }

    /// Release the motor once per run. Failures are logged only.
    pub(crate) async fn release_turntable(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.turntable.release().await {
            Ok(()) => log::info!("[Scan] Turntable released"),
            Err(e) => log::error!("[Scan] {}", ScanError::CleanupFailure(e.to_string())),
        }
    }
}
