use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use plantscan::config::{self, ScanSettings};
use plantscan::error::ConfigError;
use plantscan::hardware::detect_cameras;
use plantscan::log_collector::{ensure_logs_dir_exists, get_global_logs_path, LogKind};
use plantscan::{
    build_plan, CaptureAdapter, Gphoto2Camera, LogCollector, LogLine, RunController, RunStatus,
    ScanEvent, SimulatedTurntable, StepperTurntable, TurntableDriver,
};

const EXIT_FAILED: u8 = 1;
const EXIT_INVALID_CONFIG: u8 = 2;

/// Signal that asked the scan to stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Interrupt {
    CtrlC,
    Terminate,
    Hangup,
}

impl Interrupt {
    /// 128 + signal number, as a shell reports it
    fn exit_code(self) -> u8 {
        match self {
            Interrupt::Hangup => 129,
            Interrupt::CtrlC => 130,
            Interrupt::Terminate => 143,
        }
    }
}

/// Ctrl-C plus, on unix, SIGTERM and SIGHUP.
struct StopSignals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl StopSignals {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(StopSignals {
            terminate: signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?,
            hangup: signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?,
        })
    }

    async fn recv(&mut self) -> Interrupt {
        tokio::select! {
            _ = ctrl_c() => Interrupt::CtrlC,
            _ = self.terminate.recv() => Interrupt::Terminate,
            _ = self.hangup.recv() => Interrupt::Hangup,
        }
    }
}

#[cfg(not(unix))]
impl StopSignals {
    fn install() -> Result<Self> {
        Ok(StopSignals {})
    }

    async fn recv(&mut self) -> Interrupt {
        ctrl_c().await;
        Interrupt::CtrlC
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("[Main] Ctrl-C handler failed: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Process exit code for a finished run.
fn exit_code(status: RunStatus, interrupt: Option<Interrupt>) -> u8 {
    match (status, interrupt) {
        (RunStatus::Completed, _) => 0,
        (RunStatus::Idle, Some(interrupt)) => interrupt.exit_code(),
        _ => EXIT_FAILED,
    }
}

#[derive(Parser)]
#[command(name = "plantscan", version, about = "Turntable multi-camera plant scanner")]
struct Cli {
    /// Config file (default: ~/.config/plantscan/config.json)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Release the turntable motor and exit
    #[arg(long, conflicts_with_all = ["autodetect", "dry_run"])]
    cleanup: bool,
    /// Simulated turntable and fake cameras
    #[arg(long)]
    dry_run: bool,
    /// Detect cameras and write their axis assignments into the config
    #[arg(long, conflicts_with = "dry_run")]
    autodetect: bool,
    /// Echo every log line to the console
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_collector = match init_logging(cli.verbose) {
        Ok(collector) => Some(collector),
        Err(e) => {
            eprintln!("[Main] WARNING: Logging disabled: {:#}", e);
            None
        }
    };

    let code = match run(cli, log_collector.clone()).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            if e.downcast_ref::<ConfigError>().is_some() {
                ExitCode::from(EXIT_INVALID_CONFIG)
            } else {
                ExitCode::from(EXIT_FAILED)
            }
        }
    };

    if let Some(collector) = log_collector {
        if let Err(e) = collector.wait_for_empty().await {
            eprintln!("[Main] WARNING: Log flush failed: {}", e);
        }
    }
    code
}

/// Register the LogCollector as the global `log` backend and echo status
/// lines (plus warnings and errors) to the console.
fn init_logging(verbose: bool) -> Result<Arc<LogCollector>> {
    let log_dir = get_global_logs_path().map_err(anyhow::Error::msg)?;
    ensure_logs_dir_exists(&log_dir).map_err(anyhow::Error::msg)?;

    let (echo_tx, mut echo_rx) = mpsc::channel::<LogLine>(1024);
    let max_level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let collector = Arc::new(LogCollector::new(log_dir, Some(echo_tx), max_level).map_err(anyhow::Error::msg)?);

    log::set_boxed_logger(Box::new((*collector).clone()))
        .map(|()| log::set_max_level(max_level))
        .context("Failed to register LogCollector as global logger")?;

    tokio::spawn(async move {
        while let Some(line) = echo_rx.recv().await {
            let important = line.message.starts_with("[WARN]") || line.message.starts_with("[ERROR]");
            if verbose || important || line.kind == LogKind::Parsed {
                eprintln!("{}", line.message);
            }
        }
    });

    log::info!("PlantScan {} logging initialized", plantscan::VERSION);
    Ok(collector)
}

fn config_path(cli: &Cli) -> Result<PathBuf> {
    match cli.config {
        Some(ref path) => Ok(path.clone()),
        None => Ok(config::get_global_config_path()?),
    }
}

async fn run(cli: Cli, log_collector: Option<Arc<LogCollector>>) -> Result<ExitCode> {
    let path = config_path(&cli)?;

    if cli.autodetect {
        return autodetect(&path).await;
    }

    let mut settings = match config::load_config_from_file(&path) {
        Ok(settings) => settings,
        // Releasing the motor only needs the turntable defaults
        Err(ConfigError::FileNotFound(_)) if cli.cleanup => config::create_default_config(),
        Err(e) => {
            return Err(anyhow::Error::new(e).context(format!("Cannot load config {}", path.display())))
        }
    };
    if cli.dry_run {
        settings = settings.with_fake_cameras();
    }

    let turntable: Arc<dyn TurntableDriver> = if cli.dry_run {
        Arc::new(SimulatedTurntable::new())
    } else {
        Arc::new(
            StepperTurntable::new(settings.turntable.clone())
                .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?,
        )
    };
    let camera: Arc<dyn CaptureAdapter> =
        Arc::new(Gphoto2Camera::new(settings.photo_mode, settings.camera_timeout()));

    let (event_tx, event_rx) = mpsc::channel::<ScanEvent>(256);
    let controller = RunController::new(turntable, camera, Some(event_tx), log_collector);

    if cli.cleanup {
        controller.cleanup().await;
        return Ok(ExitCode::SUCCESS);
    }

    scan(&controller, &settings, event_rx).await
}

async fn autodetect(path: &Path) -> Result<ExitCode> {
    let mut settings = match config::load_config_from_file(path) {
        Ok(settings) => settings,
        Err(ConfigError::FileNotFound(_)) => config::create_default_config(),
        Err(e) => return Err(e.into()),
    };

    let cameras = detect_cameras("gphoto2", settings.camera_timeout())
        .await
        .context("Camera autodetection failed")?;
    if cameras.is_empty() {
        eprintln!("No cameras detected");
    }
    for camera in &cameras {
        println!("Detected {} on {}", camera.model, camera.port);
    }

    settings.apply_detected_cameras(&cameras);
    config::save_config_to_file(&settings, path)?;

    for entry in &settings.cameras {
        println!("  {:<8} -> {}", entry.axis, entry.port);
    }
    println!("Config saved to {}", path.display());
    Ok(ExitCode::SUCCESS)
}

async fn scan(
    controller: &RunController,
    settings: &ScanSettings,
    mut event_rx: mpsc::Receiver<ScanEvent>,
) -> Result<ExitCode> {
    let scan_config = settings.to_scan_config()?;
    let plan = match build_plan(&scan_config) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("{}", e.user_message());
            return Ok(ExitCode::from(EXIT_INVALID_CONFIG));
        }
    };
    println!("Scan '{}': {}", plan.scan_label, plan.estimate());

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                ScanEvent::Progress { current, total } => println!("[{}/{}]", current, total),
                ScanEvent::CaptureFailed(err) => {
                    eprintln!("Capture failed: {} at {:.1}°: {}", err.axis, err.angle, err.cause)
                }
                ScanEvent::StatusChanged(_) | ScanEvent::Finished(_) => {}
            }
        }
    });

    let mut signals = StopSignals::install()?;

    if let Err(e) = controller.start(scan_config).await {
        eprintln!("{}", e.user_message());
        return Ok(ExitCode::from(EXIT_INVALID_CONFIG));
    }

    let mut interrupt = None;
    let wait = controller.wait();
    tokio::pin!(wait);
    let final_state = loop {
        tokio::select! {
            state = &mut wait => break state,
            received = signals.recv(), if interrupt.is_none() => {
                log::warn!("[Main] Received {:?}, stopping scan", received);
                interrupt = Some(received);
                eprintln!("Stopping after the current photo...");
                controller.stop().await;
            }
        }
    };
    // Let the event printer drain
    tokio::time::sleep(Duration::from_millis(20)).await;

    println!(
        "Scan finished: {} ({}/{} steps, {} failed capture(s))",
        final_state.status,
        final_state.current_step,
        final_state.total_steps,
        final_state.errors.len()
    );
    for err in &final_state.errors {
        println!("  step {} {} at {:.1}°: {}", err.step_index, err.axis, err.angle, err.cause);
    }
    if let Some(ref failure) = final_state.failure {
        eprintln!("Failure: {}", failure);
    }

    Ok(ExitCode::from(exit_code(final_state.status, interrupt)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_per_signal() {
        assert_eq!(exit_code(RunStatus::Idle, Some(Interrupt::CtrlC)), 130);
        assert_eq!(exit_code(RunStatus::Idle, Some(Interrupt::Terminate)), 143);
        assert_eq!(exit_code(RunStatus::Idle, Some(Interrupt::Hangup)), 129);
    }

    #[test]
    fn test_exit_code_ignores_late_signal() {
        assert_eq!(exit_code(RunStatus::Completed, None), 0);
        assert_eq!(exit_code(RunStatus::Completed, Some(Interrupt::Terminate)), 0);
        assert_eq!(exit_code(RunStatus::Failed, Some(Interrupt::Hangup)), EXIT_FAILED);
        assert_eq!(exit_code(RunStatus::Failed, None), EXIT_FAILED);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_is_reported_as_terminate() {
        let mut signals = StopSignals::install().unwrap();
        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());
        let received = tokio::time::timeout(Duration::from_secs(5), signals.recv()).await.unwrap();
        assert_eq!(received, Interrupt::Terminate);
    }
}
