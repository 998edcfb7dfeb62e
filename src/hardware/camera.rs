//! gphoto2-backed capture adapter and camera autodetection.

use futures::future::{BoxFuture, FutureExt};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::command::run_bounded;
use super::CaptureAdapter;
use crate::error::DriverError;
use crate::models::{PhotoMode, PortId, ScanPlan};

/// Camera reported by `gphoto2 --auto-detect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedCamera {
    pub model: String,
    pub port: String,
}

/// Parse `gphoto2 --auto-detect` output.
///
/// The first two lines are the table header; each remaining row is
/// `<model>  <port>` separated by two or more spaces.
pub fn parse_auto_detect(stdout: &str) -> Vec<DetectedCamera> {
    let separator = match Regex::new(r"\s{2,}") {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };

    stdout
        .lines()
        .skip(2)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = separator.split(line).collect();
            match parts.as_slice() {
                [model, port] => Some(DetectedCamera {
                    model: model.to_string(),
                    port: port.to_string(),
                }),
                _ => {
                    log::debug!("Skipping unrecognised auto-detect row: {}", line);
                    None
                }
            }
        })
        .collect()
}

/// Run `gphoto2 --auto-detect` and parse its table.
pub async fn detect_cameras(program: &str, timeout: Duration) -> Result<Vec<DetectedCamera>, DriverError> {
    let output = run_bounded(program, &["--auto-detect".to_string()], "auto-detect", timeout).await?;
    let cameras = parse_auto_detect(&String::from_utf8_lossy(&output.stdout));
    log::info!("Detected {} camera(s)", cameras.len());
    Ok(cameras)
}

/// Capture adapter that shells out to gphoto2.
pub struct Gphoto2Camera {
    program: String,
    mode: PhotoMode,
    timeout: Duration,
}

impl Gphoto2Camera {
    pub fn new(mode: PhotoMode, timeout: Duration) -> Self {
        Gphoto2Camera {
            program: "gphoto2".to_string(),
            mode,
            timeout,
        }
    }

    /// Use a different gphoto2 binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn capture_args(&self, port: &PortId, destination: &Path) -> Vec<String> {
        match self.mode {
            PhotoMode::Immediate => vec![
                format!("--port={}", port),
                "--capture-image-and-download".to_string(),
                format!("--filename={}", destination.display()),
                "--force-overwrite".to_string(),
            ],
            PhotoMode::Sdcard => vec![format!("--port={}", port), "--capture-image".to_string()],
        }
    }

    /// Pull every file off one camera's card and move them onto the plan's
    /// paths for that port, in capture order.
    async fn download_port(&self, plan: &ScanPlan, port: &PortId) -> Result<(), DriverError> {
        let targets: Vec<&PathBuf> = plan
            .steps
            .iter()
            .filter(|s| &s.port == port)
            .map(|s| &s.output_path)
            .collect();

        let staging = tempfile::Builder::new()
            .prefix(&format!("{}_", plan.scan_label))
            .tempdir()?;

        log::info!(
            "Downloading all files from camera {} to {}",
            port,
            staging.path().display()
        );
        run_bounded(
            &self.program,
            &[
                format!("--port={}", port),
                "--get-all-files".to_string(),
                format!("--filename={}/%f", staging.path().display()),
            ],
            "download",
            self.timeout * targets.len().max(1) as u32,
        )
        .await?;

        let mut images: Vec<PathBuf> = std::fs::read_dir(staging.path())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        images.sort();

        if images.len() != targets.len() {
            log::warn!(
                "Camera {} returned {} files for {} planned photos; mapping in order",
                port,
                images.len(),
                targets.len()
            );
        }

        for (image, target) in images.iter().zip(targets) {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            // rename fails across filesystems, fall back to copy
            if std::fs::rename(image, target).is_err() {
                std::fs::copy(image, target)?;
                std::fs::remove_file(image)?;
            }
            log::info!("Moved and renamed: {} -> {}", image.display(), target.display());
        }

        let delete = run_bounded(
            &self.program,
            &[
                format!("--port={}", port),
                "--recurse".to_string(),
                "--delete-all-files".to_string(),
            ],
            "delete",
            self.timeout,
        )
        .await;
        if let Err(e) = delete {
            log::error!("Failed to delete files from camera {}: {}", port, e);
        }
        Ok(())
    }
}

fn ensure_parent(destination: &Path) -> Result<(), DriverError> {
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn distinct_ports(plan: &ScanPlan) -> BTreeSet<&PortId> {
    plan.steps
        .iter()
        .map(|s| &s.port)
        .filter(|p| !p.is_fake())
        .collect()
}

impl CaptureAdapter for Gphoto2Camera {
    fn capture<'a>(
        &'a self,
        port: &'a PortId,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<(), DriverError>> {
        async move {
            ensure_parent(destination)?;

            if port.is_fake() {
                log::info!("[FAKE CAMERA] Simulating photo at {}", destination.display());
                tokio::fs::write(destination, format!("FAKE PHOTO from {}\n", port)).await?;
                return Ok(());
            }

            let args = self.capture_args(port, destination);
            log::info!("Capturing photo on port {} -> {}", port, destination.display());
            run_bounded(&self.program, &args, "capture", self.timeout).await?;
            if self.mode == PhotoMode::Immediate {
                log::info!("Photo saved: {}", destination.display());
            }
            Ok(())
        }
        .boxed()
    }

    fn prepare<'a>(&'a self, plan: &'a ScanPlan) -> BoxFuture<'a, Result<(), DriverError>> {
        async move {
            if self.mode != PhotoMode::Sdcard {
                return Ok(());
            }
            for port in distinct_ports(plan) {
                let args = vec![
                    format!("--port={}", port),
                    "--set-config".to_string(),
                    "capturetarget=1".to_string(),
                ];
                match run_bounded(&self.program, &args, "set-config", self.timeout).await {
                    Ok(_) => log::info!("Camera {} set to store on SD card", port),
                    Err(e) => log::warn!("Could not set SD storage for {}: {}", port, e),
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn finalize<'a>(&'a self, plan: &'a ScanPlan) -> BoxFuture<'a, Result<(), DriverError>> {
        async move {
            if self.mode != PhotoMode::Sdcard {
                return Ok(());
            }
            let mut first_error = None;
            for port in distinct_ports(plan) {
                if let Err(e) = self.download_port(plan, port).await {
                    log::error!("Download failed for camera {}: {}", port, e);
                    first_error.get_or_insert(e);
                }
            }
            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const AUTO_DETECT: &str = "\
Model                          Port
----------------------------------------------------------
Canon EOS 2000D                usb:001,004
Nikon DSC D3500                usb:001,007

";

    #[test]
    fn test_parse_auto_detect() {
        let cameras = parse_auto_detect(AUTO_DETECT);
        assert_eq!(
            cameras,
            vec![
                DetectedCamera {
                    model: "Canon EOS 2000D".to_string(),
                    port: "usb:001,004".to_string()
                },
                DetectedCamera {
                    model: "Nikon DSC D3500".to_string(),
                    port: "usb:001,007".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_parse_auto_detect_empty_table() {
        let header_only = "Model                          Port\n------------------\n";
        assert!(parse_auto_detect(header_only).is_empty());
        assert!(parse_auto_detect("").is_empty());
    }

    #[test]
    fn test_capture_args_by_mode() {
        let port = PortId::parse("usb:001,004").unwrap();
        let dest = Path::new("scan/Z/a.jpg");
        let immediate = Gphoto2Camera::new(PhotoMode::Immediate, Duration::from_secs(5));
        let args = immediate.capture_args(&port, dest);
        assert!(args.contains(&"--capture-image-and-download".to_string()));
        assert!(args.contains(&"--filename=scan/Z/a.jpg".to_string()));

        let sdcard = Gphoto2Camera::new(PhotoMode::Sdcard, Duration::from_secs(5));
        assert_eq!(
            sdcard.capture_args(&port, dest),
            vec!["--port=usb:001,004".to_string(), "--capture-image".to_string()]
        );
    }

    #[tokio::test]
    async fn test_fake_camera_writes_placeholder() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("plant/Z/frame.jpg");
        let camera = Gphoto2Camera::new(PhotoMode::Immediate, Duration::from_secs(5))
            .with_program("plantscan-no-such-binary");
        let port = PortId::parse(PortId::FAKE_CAMERA).unwrap();

        camera.capture(&port, &dest).await.unwrap();
        let content = std::fs::read_to_string(&dest).unwrap();
        assert!(content.starts_with("FAKE PHOTO"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_capture_error() {
        let dir = TempDir::new().unwrap();
        let camera = Gphoto2Camera::new(PhotoMode::Immediate, Duration::from_secs(5))
            .with_program("plantscan-no-such-binary");
        let port = PortId::parse("usb:001,004").unwrap();
        let result = camera.capture(&port, &dir.path().join("x.jpg")).await;
        assert!(matches!(result, Err(DriverError::Command { .. })));
    }
}
