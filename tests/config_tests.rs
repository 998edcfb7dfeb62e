//! Integration tests for the config module and the dry-run path
//!
//! - Loading the JSON layout written by camera autodetection
//! - Saving regenerates the `cameras` list from `axes`
//! - Settings -> ScanConfig -> plan, including invalid values
//! - A full dry run with the simulated turntable and fake cameras

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use plantscan::config::{self, ScanSettings};
use plantscan::error::ConfigError;
use plantscan::hardware::{parse_auto_detect, Gphoto2Camera, SimulatedTurntable};
use plantscan::models::{Axis, PhotoMode};
use plantscan::orchestrator::{build, RunStatus};
use plantscan::{RunController, ScanError};

const AUTODETECT_CONFIG: &str = r#"{
  "scan_label": "my_plant_scan",
  "angle_per_photo": 10,
  "axes": {
    "Z": "usb:001,004",
    "Y": "usb:001,005"
  },
  "cameras": [
    {"axis": "Z", "port": "usb:001,004"},
    {"axis": "Y", "port": "usb:001,005"}
  ],
  "step_delay": 0.1,
  "photos_per_camera": 36,
  "total_photos": 72
}"#;

fn write_config(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("config.json");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_load_autodetect_layout() {
    let temp = TempDir::new().unwrap();
    let path = write_config(temp.path(), AUTODETECT_CONFIG);

    let settings = config::load_config_from_file(&path).unwrap();
    assert_eq!(settings.scan_label, "my_plant_scan");
    assert!(settings.axes.get(Axis::Oblique).is_none());
    assert_eq!(settings.cameras.len(), 2);
    assert_eq!(settings.photos_per_camera, Some(36));
    // fields absent from the file fall back to defaults
    assert_eq!(settings.photo_mode, PhotoMode::Immediate);
    assert_eq!(settings.camera_timeout_secs, 30);

    let plan = build(&settings.to_scan_config().unwrap()).unwrap();
    assert_eq!(plan.len(), 72);
    assert_eq!(plan.rotation_count(), 35);
}

#[test]
fn test_zero_angle_is_invalid_config() {
    let temp = TempDir::new().unwrap();
    let path = write_config(
        temp.path(),
        r#"{"scan_label": "x", "angle_per_photo": 0, "axes": {"Z": "usb:1"}}"#,
    );
    let settings = config::load_config_from_file(&path).unwrap();
    let result = build(&settings.to_scan_config().unwrap());
    assert!(matches!(result, Err(ScanError::InvalidConfig(_))));
}

#[test]
fn test_config_error_converts_to_invalid_config() {
    let err: ScanError = ConfigError::ValidationFailed("bad".to_string()).into();
    assert!(matches!(err, ScanError::InvalidConfig(_)));
}

#[test]
fn test_autodetect_round_trip_through_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("plantscan/config.json");
    let stdout = "Model                          Port\n\
                  ----------------------------------------------------------\n\
                  Canon EOS 2000D                usb:001,004\n";

    let mut settings = config::create_default_config();
    settings.apply_detected_cameras(&parse_auto_detect(stdout));
    config::save_config_to_file(&settings, &path).unwrap();

    let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["axes"]["Z"], "usb:001,004");
    assert_eq!(raw["axes"]["Y"], "None");
    assert_eq!(raw["cameras"][0]["axis"], "Z");
    assert_eq!(raw["total_photos"], 36);

    let loaded = config::load_config_from_file(&path).unwrap();
    assert_eq!(loaded.axes, settings.axes);
}

#[tokio::test]
async fn test_dry_run_writes_placeholder_photos() {
    let temp = TempDir::new().unwrap();
    let settings = ScanSettings {
        scan_label: "dry".to_string(),
        angle_per_photo: 90.0,
        step_delay: 0.0,
        output_root: temp.path().to_path_buf(),
        ..serde_json::from_str::<ScanSettings>(AUTODETECT_CONFIG).unwrap()
    }
    .with_fake_cameras();

    let table = Arc::new(SimulatedTurntable::new());
    let camera = Arc::new(Gphoto2Camera::new(settings.photo_mode, Duration::from_secs(5)));
    let controller = RunController::new(table.clone(), camera, None, None);

    controller.start(settings.to_scan_config().unwrap()).await.unwrap();
    let state = controller.wait().await;

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.current_step, 8);
    assert_eq!(table.rotations(), 3);
    assert_eq!(table.releases(), 1);
    // returned to start after completion
    assert_eq!(table.position_degrees(), 0.0);

    let z_dir = temp.path().join("dry/Z");
    let y_dir = temp.path().join("dry/Y");
    assert_eq!(fs::read_dir(&z_dir).unwrap().count(), 4);
    assert_eq!(fs::read_dir(&y_dir).unwrap().count(), 4);
    assert!(z_dir.join("camera1_Z_frame003_angle270.0.jpg").exists());
}
