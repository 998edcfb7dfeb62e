//! Decoupled logging pipeline for scan runs.
//!
//! Every `log::*` call is routed through [`LogCollector`], which hands lines to
//! a background OS thread over an unbounded crossbeam channel. The thread
//! appends to disk and optionally echoes lines to a bounded tokio channel for
//! live console output.
//!
//! ```text
//! log::info!() / log_parsed!()
//!     |
//! [LogCollector] (non-blocking)
//!     | crossbeam unbounded
//! [writer thread] ---- try_send ----> echo channel (console)
//!     |
//! logs/full/<session>.log     every line
//! logs/parsed/<session>.log   status lines (target "parsed")
//! ```

use chrono::Local;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Log target for high-level scan status lines
pub const PARSED_TARGET: &str = "parsed";

/// Log a high-level status line; also lands in `logs/parsed/`.
#[macro_export]
macro_rules! log_parsed {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        log::info!(target: "parsed", "{}", msg);
    }}
}

enum LogMessage {
    Line(LogLine),
    /// Flush marker; the sender is signalled once everything before it is on disk
    Flush(std::sync::mpsc::Sender<()>),
}

/// Session state with generation tracking so the writer notices session changes
#[derive(Clone, Debug, Default)]
struct SessionState {
    filename: Option<String>,
    generation: u64,
}

/// Get the logs directory relative to the current working directory: ./logs
pub fn get_global_logs_path() -> Result<PathBuf, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Failed to get current working directory: {}", e))?;
    Ok(cwd.join("logs"))
}

/// Ensure the logs directory exists
pub fn ensure_logs_dir_exists(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|e| format!("Failed to create logs directory: {}", e))
}

/// Whether a line goes to the full log only or to the parsed log as well.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogKind {
    Full,
    Parsed,
}

/// A log line with metadata
#[derive(Clone, Debug)]
pub struct LogLine {
    pub message: String,
    pub kind: LogKind,
    /// Wall-clock time the line was produced (HH:MM:SS.mmm)
    pub timestamp: String,
}

impl LogLine {
    pub fn new(message: String) -> Self {
        LogLine {
            message,
            kind: LogKind::Full,
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    pub fn parsed(message: String) -> Self {
        LogLine {
            kind: LogKind::Parsed,
            ..LogLine::new(message)
        }
    }

    fn formatted(&self) -> String {
        format!("[{}] {}\n", self.timestamp, self.message)
    }
}

/// Unified logger: disk persistence plus optional console echo
pub struct LogCollector {
    tx: Sender<LogMessage>,
    log_dir: PathBuf,
    level: LevelFilter,
    session_state: Arc<Mutex<SessionState>>,
}

impl LogCollector {
    /// Create the `full/` and `parsed/` directories and spawn the writer thread.
    pub fn new(
        log_dir: PathBuf,
        echo_tx: Option<tokio::sync::mpsc::Sender<LogLine>>,
        level: LevelFilter,
    ) -> Result<Self, String> {
        for sub in ["full", "parsed"] {
            std::fs::create_dir_all(log_dir.join(sub))
                .map_err(|e| format!("Failed to create {} log dir: {}", sub, e))?;
        }

        // crossbeam, not tokio: lines must arrive even when logged from outside a runtime
        let (tx, rx) = unbounded::<LogMessage>();
        let session_state = Arc::new(Mutex::new(SessionState::default()));

        let writer = DiskWriter {
            log_dir: log_dir.clone(),
            session_state: Arc::clone(&session_state),
            default_name: format!("plantscan_{}.log", Local::now().format("%Y%m%d_%H%M%S")),
            full: None,
            parsed: None,
            generation: 0,
        };
        std::thread::Builder::new()
            .name("plantscan-log".to_string())
            .spawn(move || writer.run(rx, echo_tx))
            .map_err(|e| format!("Failed to spawn log writer: {}", e))?;

        Ok(LogCollector {
            tx,
            log_dir,
            level,
            session_state,
        })
    }

    /// Route subsequent lines to `full/<filename>` and `parsed/<filename>`.
    pub fn start_new_session(&self, filename: &str) -> Result<PathBuf, String> {
        let mut session = self
            .session_state
            .lock()
            .map_err(|e| format!("Failed to lock session state: {}", e))?;
        session.filename = Some(filename.to_string());
        session.generation = session.generation.wrapping_add(1);
        Ok(self.log_dir.join("full").join(filename))
    }

    /// Full-log path of the current session, if one was started
    pub fn get_session_log_path(&self) -> Option<PathBuf> {
        self.session_state
            .lock()
            .ok()
            .and_then(|s| s.filename.clone())
            .map(|name| self.log_dir.join("full").join(name))
    }

    /// Send a log line (never blocks)
    pub fn log(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    pub fn log_str(&self, message: impl Into<String>) {
        self.log(LogLine::new(message.into()));
    }

    pub fn log_parsed(&self, message: impl Into<String>) {
        self.log(LogLine::parsed(message.into()));
    }

    /// Wait until every line sent before this call is on disk.
    ///
    /// Call before reporting a run as finished so its final lines are persisted.
    pub async fn wait_for_empty(&self) -> Result<(), String> {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        rx.recv().map_err(|e| format!("Flush signal interrupted: {}", e))
    }
}

impl Clone for LogCollector {
    fn clone(&self) -> Self {
        LogCollector {
            tx: self.tx.clone(),
            log_dir: self.log_dir.clone(),
            level: self.level,
            session_state: Arc::clone(&self.session_state),
        }
    }
}

/// Wires all `log::info!()`, `log::warn!()`, `log::error!()` calls into the collector
impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = format!("[{}] {}", record.level(), record.args());
        if record.target() == PARSED_TARGET {
            self.log_parsed(message);
        } else {
            self.log_str(message);
        }
    }

    fn flush(&self) {}
}

/// State owned by the background writer thread
struct DiskWriter {
    log_dir: PathBuf,
    session_state: Arc<Mutex<SessionState>>,
    /// File name used until a session is started
    default_name: String,
    full: Option<File>,
    parsed: Option<File>,
    generation: u64,
}

impl DiskWriter {
    fn run(mut self, rx: Receiver<LogMessage>, echo_tx: Option<tokio::sync::mpsc::Sender<LogLine>>) {
        while let Ok(msg) = rx.recv() {
            match msg {
                LogMessage::Line(line) => {
                    self.refresh_session();
                    self.write(&line);
                    if let Some(ref echo) = echo_tx {
                        // Disk first; the console may drop lines under pressure
                        let _ = echo.try_send(line);
                    }
                }
                LogMessage::Flush(done) => {
                    for file in [self.full.as_mut(), self.parsed.as_mut()].into_iter().flatten() {
                        let _ = file.flush();
                    }
                    let _ = done.send(());
                }
            }
        }
    }

    fn current_name(&self) -> String {
        self.session_state
            .lock()
            .ok()
            .and_then(|s| s.filename.clone())
            .unwrap_or_else(|| self.default_name.clone())
    }

    /// Drop cached handles when a new session has been started
    fn refresh_session(&mut self) {
        let generation = self.session_state.lock().map(|s| s.generation).unwrap_or(self.generation);
        if generation != self.generation {
            self.full = None;
            self.parsed = None;
            self.generation = generation;
        }
    }

    fn open(&self, sub: &str) -> Option<File> {
        let path = self.log_dir.join(sub).join(self.current_name());
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("[Log] Failed to open {}: {}", path.display(), e);
                None
            }
        }
    }

    fn write(&mut self, line: &LogLine) {
        let formatted = line.formatted();
        if self.full.is_none() {
            self.full = self.open("full");
        }
        if let Some(file) = self.full.as_mut() {
            let _ = file.write_all(formatted.as_bytes());
        }

        if line.kind == LogKind::Parsed {
            if self.parsed.is_none() {
                self.parsed = self.open("parsed");
            }
            if let Some(file) = self.parsed.as_mut() {
                let _ = file.write_all(formatted.as_bytes());
            }
        }
    }
}
