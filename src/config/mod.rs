//! Scan configuration file handling.
//!
//! `ScanSettings` is the on-disk JSON shape; it is lenient (unknown fields are
//! ignored, missing fields take defaults) and converts into the strictly
//! typed [`ScanConfig`] the planner consumes.
//!
//! # Module Structure
//!
//! - `loader`: reading, writing and locating the JSON file

pub mod loader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::hardware::{DetectedCamera, StepperSettings};
use crate::models::{Axis, AxisAssignments, CapturePolicy, PhotoMode, PortId, ScanConfig};
use crate::orchestrator::plan::{photos_per_camera, step_count};

pub use loader::{
    create_default_config, get_global_config_path, load_config_from_file, save_config_to_file,
    validate_config_path,
};

/// One entry of the flattened `cameras` list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraEntry {
    pub axis: Axis,
    pub port: String,
}

/// Contents of the scan configuration file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub scan_label: String,
    pub angle_per_photo: f64,
    pub axes: AxisAssignments,
    /// Mirror of `axes`, regenerated on every save
    pub cameras: Vec<CameraEntry>,
    /// Seconds to wait after each angle group
    pub step_delay: f64,
    pub photo_mode: PhotoMode,
    pub capture_retries: u32,
    pub max_failed_steps: Option<usize>,
    pub return_to_start: bool,
    pub output_root: PathBuf,
    pub camera_timeout_secs: u64,
    pub turntable: StepperSettings,

    // Informational, written by autodetect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photos_per_camera: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_photos: Option<usize>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        ScanSettings {
            scan_label: "my_plant_scan".to_string(),
            angle_per_photo: 10.0,
            axes: AxisAssignments::new(),
            cameras: Vec::new(),
            step_delay: 0.1,
            photo_mode: PhotoMode::Immediate,
            capture_retries: CapturePolicy::default().max_retries,
            max_failed_steps: None,
            return_to_start: true,
            output_root: PathBuf::from("."),
            camera_timeout_secs: 30,
            turntable: StepperSettings::default(),
            photos_per_camera: None,
            total_photos: None,
        }
    }
}

impl ScanSettings {
    /// Convert into the typed scan config. Fails on values that cannot be
    /// represented (negative or non-finite delay); plan-level checks happen
    /// in `ScanConfig::validate`.
    pub fn to_scan_config(&self) -> Result<ScanConfig, ConfigError> {
        let step_delay = Duration::try_from_secs_f64(self.step_delay).map_err(|_| {
            ConfigError::ValidationFailed(format!(
                "step_delay must be a non-negative number of seconds, got {}",
                self.step_delay
            ))
        })?;

        let mut config = ScanConfig::new(&self.scan_label, self.angle_per_photo, self.axes.clone());
        config.step_delay = step_delay;
        config.photo_mode = self.photo_mode;
        config.output_root = self.output_root.clone();
        config.return_to_start = self.return_to_start;
        config.capture_policy = CapturePolicy {
            max_retries: self.capture_retries,
            max_failed_steps: self.max_failed_steps,
        };
        Ok(config)
    }

    pub fn camera_timeout(&self) -> Duration {
        Duration::from_secs(self.camera_timeout_secs)
    }

    /// Regenerate `cameras` from `axes`.
    pub fn sync_cameras(&mut self) {
        self.cameras = self
            .axes
            .assigned()
            .into_iter()
            .map(|(axis, port)| CameraEntry {
                axis,
                port: port.to_string(),
            })
            .collect();
    }

    /// Assign detected cameras to Z, Y, Oblique in detection order.
    /// Extra cameras are ignored; axes without a camera become unassigned.
    pub fn apply_detected_cameras(&mut self, detected: &[DetectedCamera]) {
        let mut axes = AxisAssignments::new();
        for (axis, camera) in Axis::ALL.iter().zip(detected) {
            axes.set(*axis, PortId::parse(&camera.port));
        }
        if detected.len() > Axis::ALL.len() {
            log::warn!(
                "Detected {} cameras, only the first {} are assigned",
                detected.len(),
                Axis::ALL.len()
            );
        }
        self.axes = axes;
        self.sync_cameras();

        if self.angle_per_photo.is_finite() && self.angle_per_photo > 0.0 {
            self.photos_per_camera = Some(photos_per_camera(self.angle_per_photo));
            self.total_photos = step_count(self.angle_per_photo, self.cameras.len());
        }
    }

    /// Replace every assigned port with the fake camera.
    pub fn with_fake_cameras(mut self) -> Self {
        for axis in Axis::ALL {
            if self.axes.get(axis).is_some() {
                self.axes.set(axis, PortId::parse(PortId::FAKE_CAMERA));
            }
        }
        if self.axes.assigned_count() == 0 {
            self.axes.set(Axis::Z, PortId::parse(PortId::FAKE_CAMERA));
        }
        self.sync_cameras();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detected(ports: &[&str]) -> Vec<DetectedCamera> {
        ports
            .iter()
            .enumerate()
            .map(|(i, p)| DetectedCamera {
                model: format!("Camera {}", i),
                port: p.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_none_sentinel_maps_to_unassigned() {
        let json = r#"{
            "scan_label": "basil",
            "angle_per_photo": 10,
            "axes": {"Z": "usb:001,004", "Y": "None", "Oblique": "usb:001,007"},
            "some_future_field": true
        }"#;
        let settings: ScanSettings = serde_json::from_str(json).unwrap();
        assert!(settings.axes.get(Axis::Y).is_none());
        assert_eq!(settings.axes.get(Axis::Z).unwrap().as_str(), "usb:001,004");
        assert_eq!(settings.step_delay, 0.1);

        let config = settings.to_scan_config().unwrap();
        assert_eq!(config.axes.assigned_count(), 2);
        assert_eq!(config.step_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_unassigned_axes_serialize_as_none() {
        let mut settings = ScanSettings::default();
        settings.axes.set(Axis::Z, PortId::parse("usb:001,004"));
        let value = serde_json::to_value(&settings).unwrap();
        assert_eq!(value["axes"]["Y"], "None");
        assert_eq!(value["axes"]["Z"], "usb:001,004");
        assert!(value.get("photos_per_camera").is_none());
    }

    #[test]
    fn test_negative_step_delay_rejected() {
        let settings = ScanSettings {
            step_delay: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            settings.to_scan_config(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_apply_detected_cameras_in_axis_order() {
        let mut settings = ScanSettings::default();
        settings.apply_detected_cameras(&detected(&["usb:1", "usb:2"]));

        assert_eq!(settings.axes.get(Axis::Z).unwrap().as_str(), "usb:1");
        assert_eq!(settings.axes.get(Axis::Y).unwrap().as_str(), "usb:2");
        assert!(settings.axes.get(Axis::Oblique).is_none());
        assert_eq!(
            settings.cameras,
            vec![
                CameraEntry { axis: Axis::Z, port: "usb:1".to_string() },
                CameraEntry { axis: Axis::Y, port: "usb:2".to_string() },
            ]
        );
        assert_eq!(settings.photos_per_camera, Some(36));
        assert_eq!(settings.total_photos, Some(72));
    }

    #[test]
    fn test_extra_cameras_ignored() {
        let mut settings = ScanSettings::default();
        settings.apply_detected_cameras(&detected(&["a", "b", "c", "d"]));
        assert_eq!(settings.cameras.len(), 3);
        assert_eq!(settings.axes.get(Axis::Oblique).unwrap().as_str(), "c");
    }

    #[test]
    fn test_tiny_angle_detection_does_not_overflow() {
        let mut settings = ScanSettings {
            angle_per_photo: 1e-300,
            ..Default::default()
        };
        settings.apply_detected_cameras(&detected(&["a", "b", "c"]));
        assert_eq!(settings.photos_per_camera, Some(usize::MAX));
        assert_eq!(settings.total_photos, None);
        assert!(matches!(
            crate::orchestrator::build(&settings.to_scan_config().unwrap()),
            Err(crate::error::ScanError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_fake_cameras_keep_axis_layout() {
        let mut settings = ScanSettings::default();
        settings.axes.set(Axis::Y, PortId::parse("usb:9"));
        let fake = settings.with_fake_cameras();
        assert_eq!(fake.axes.assigned_count(), 1);
        assert!(fake.axes.get(Axis::Y).unwrap().is_fake());

        let fallback = ScanSettings::default().with_fake_cameras();
        assert!(fallback.axes.get(Axis::Z).unwrap().is_fake());
    }
}
