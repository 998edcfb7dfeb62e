//! RunController: start/stop/cleanup/progress entry points for a scan.
//!
//! Owns the turntable lock, the per-run stop channel, and the shared
//! `RunState`. The orchestrator runs on its own tokio task so callers stay
//! responsive while a scan executes.

use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::error::ScanError;
use crate::hardware::{CaptureAdapter, TurntableDriver};
use crate::log_collector::LogCollector;
use crate::log_parsed;
use crate::models::ScanConfig;
use crate::orchestrator::{self, RunState, RunStatus, ScanOrchestrator, StepError};

/// Discrete events emitted from the background scan task
#[derive(Clone, Debug)]
pub enum ScanEvent {
    StatusChanged(RunStatus),
    Progress { current: usize, total: usize },
    CaptureFailed(StepError),
    Finished(RunState),
}

/// Central run manager shared by the CLI and signal handlers
pub struct RunController {
    state: Arc<RwLock<RunState>>,
    turntable: Arc<dyn TurntableDriver>,
    camera: Arc<dyn CaptureAdapter>,
    /// Held for the lifetime of a run or a standalone cleanup
    turntable_lock: Arc<Mutex<()>>,
    /// Stop channel of the active run
    cancel_tx: std::sync::Mutex<Option<watch::Sender<bool>>>,
    handle: Mutex<Option<JoinHandle<RunState>>>,
    event_tx: Option<mpsc::Sender<ScanEvent>>,
    log_collector: Option<Arc<LogCollector>>,
}

impl RunController {
    pub fn new(
        turntable: Arc<dyn TurntableDriver>,
        camera: Arc<dyn CaptureAdapter>,
        event_tx: Option<mpsc::Sender<ScanEvent>>,
        log_collector: Option<Arc<LogCollector>>,
    ) -> Self {
        RunController {
            state: Arc::new(RwLock::new(RunState::default())),
            turntable,
            camera,
            turntable_lock: Arc::new(Mutex::new(())),
            cancel_tx: std::sync::Mutex::new(None),
            handle: Mutex::new(None),
            event_tx,
            log_collector,
        }
    }

    /// Generate a unique timestamped log filename for a scan session
    fn generate_scan_log_filename(label: &str) -> String {
        let now = chrono::Local::now();
        format!("scan_{}_{}.log", label, now.format("%Y%m%d_%H%M%S%.3f"))
    }

    /// Start a scan in the background.
    ///
    /// Fails with `AlreadyRunning` while another run holds the turntable and
    /// with `InvalidConfig` when no plan can be built; neither changes state.
    pub async fn start(&self, config: ScanConfig) -> Result<(), ScanError> {
        let guard = self
            .turntable_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| ScanError::AlreadyRunning)?;

        let plan = orchestrator::build(&config)?;

        if let Some(ref collector) = self.log_collector {
            let filename = Self::generate_scan_log_filename(&plan.scan_label);
            match collector.start_new_session(&filename) {
                Ok(path) => log::info!("[Controller] Scan log: {}", path.display()),
                Err(e) => log::warn!("[Controller] Failed to start log session: {}", e),
            }
        }
        log_parsed!("Scan plan: {}", plan.estimate());

        *self.state.write().await = RunState::new(plan.len());

        let (cancel_tx, cancel_rx) = watch::channel(false);
        if let Ok(mut slot) = self.cancel_tx.lock() {
            *slot = Some(cancel_tx);
        }

        let orch = Arc::new(ScanOrchestrator::new(
            self.state.clone(),
            self.turntable.clone(),
            self.camera.clone(),
            self.event_tx.clone(),
            cancel_rx,
        ));
        let state = self.state.clone();
        let log_collector = self.log_collector.clone();

        let handle = tokio::spawn(async move {
            let _guard = guard;
            let run_orch = orch.clone();
            let run = tokio::spawn(async move { run_orch.run(&config, &plan).await });

            let final_state = match run.await {
                Ok(state) => state,
                Err(e) => {
                    // No-op when the run already released during Cleaning
                    log::error!("[Controller] Scan task aborted: {}", e);
                    orch.release_turntable().await;
                    let mut state = state.write().await;
                    state.status = RunStatus::Failed;
                    state.failure = Some(format!("scan task aborted: {}", e));
                    state.finished_at = Some(chrono::Local::now());
                    state.clone()
                }
            };

            if let Some(ref collector) = log_collector {
                if let Err(e) = collector.wait_for_empty().await {
                    eprintln!("[Controller] Warning: Log flush failed: {}", e);
                }
            }
            final_state
        });

        *self.handle.lock().await = Some(handle);
        Ok(())
    }

    /// Ask the active run to stop at its next safe point. No-op when idle.
    pub async fn stop(&self) {
        let sent = match self.cancel_tx.lock() {
            Ok(slot) => slot.as_ref().map(|tx| tx.send(true).is_ok()).unwrap_or(false),
            Err(_) => false,
        };
        if !sent {
            log::debug!("[Controller] Stop requested with no active run");
            return;
        }

        let mut state = self.state.write().await;
        state.stop_requested = true;
        if state.status == RunStatus::Running && state.transition_to(RunStatus::Stopping).is_ok() {
            log_parsed!("RUN STATUS: {}", RunStatus::Stopping);
            if let Some(ref tx) = self.event_tx {
                let _ = tx.try_send(ScanEvent::StatusChanged(RunStatus::Stopping));
            }
        }
    }

    /// Release the turntable outside of a run.
    ///
    /// While a run is active this only requests a stop; the run releases the
    /// motor itself during Cleaning. Release failures are logged.
    pub async fn cleanup(&self) {
        let _guard = match self.turntable_lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                log::warn!("[Controller] Cleanup requested during a run; stopping it instead");
                self.stop().await;
                return;
            }
        };

        log_parsed!("Standalone turntable cleanup");
        match self.turntable.release().await {
            Ok(()) => log::info!("[Controller] Turntable released"),
            Err(e) => log::error!("[Controller] {}", ScanError::CleanupFailure(e.to_string())),
        }
    }

    /// Snapshot of the current (or last) run.
    pub async fn progress(&self) -> RunState {
        self.state.read().await.clone()
    }

    /// Whether a run currently holds the turntable.
    pub fn is_running(&self) -> bool {
        self.turntable_lock.try_lock().is_err()
    }

    /// Wait for the active run to finish and return its final state.
    /// Returns the current snapshot when no run was started.
    pub async fn wait(&self) -> RunState {
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(state) => {
                    if let Ok(mut slot) = self.cancel_tx.lock() {
                        *slot = None;
                    }
                    return state;
                }
                Err(e) => log::error!("[Controller] Scan supervisor failed: {}", e),
            }
        }
        self.progress().await
    }

    /// Return a finished run to Idle.
    pub async fn reset(&self) -> Result<(), ScanError> {
        if self.is_running() {
            return Err(ScanError::AlreadyRunning);
        }
        *self.state.write().await = RunState::default();
        Ok(())
    }
}
