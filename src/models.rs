//! Core data types for PlantScan.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ScanError;
use crate::orchestrator::plan;

/// Sentinel used by the config file for an axis without a camera.
pub const NO_PORT_SENTINEL: &str = "None";

/// Camera mounting position around the subject.
///
/// Declaration order is the capture order within an angle group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    Z,
    Y,
    Oblique,
}

impl Axis {
    /// All axes in capture order.
    pub const ALL: [Axis; 3] = [Axis::Z, Axis::Y, Axis::Oblique];

    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Z => "Z",
            Axis::Y => "Y",
            Axis::Oblique => "Oblique",
        }
    }

    /// Stable 1-based camera number used in output file names.
    pub fn camera_ordinal(&self) -> usize {
        match self {
            Axis::Z => 1,
            Axis::Y => 2,
            Axis::Oblique => 3,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Axis {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "z" => Ok(Axis::Z),
            "y" => Ok(Axis::Y),
            "oblique" => Ok(Axis::Oblique),
            other => Err(ScanError::InvalidConfig(format!(
                "Unknown axis '{}' (expected Z, Y or Oblique)",
                other
            ))),
        }
    }
}

/// Identifier of a camera port as understood by the capture tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortId(String);

impl PortId {
    /// Port name that makes the capture adapter write placeholder files.
    pub const FAKE_CAMERA: &'static str = "Fake Camera";

    /// Parse a port from config text; the "None" sentinel and blank text mean no port.
    pub fn parse(raw: &str) -> Option<PortId> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == NO_PORT_SENTINEL {
            None
        } else {
            Some(PortId(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_fake(&self) -> bool {
        self.0 == Self::FAKE_CAMERA
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Axis to port mapping with an explicit absent state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AxisAssignments {
    z: Option<PortId>,
    y: Option<PortId>,
    oblique: Option<PortId>,
}

impl AxisAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style assignment.
    pub fn with(mut self, axis: Axis, port: &str) -> Self {
        self.set(axis, PortId::parse(port));
        self
    }

    pub fn get(&self, axis: Axis) -> Option<&PortId> {
        match axis {
            Axis::Z => self.z.as_ref(),
            Axis::Y => self.y.as_ref(),
            Axis::Oblique => self.oblique.as_ref(),
        }
    }

    pub fn set(&mut self, axis: Axis, port: Option<PortId>) {
        match axis {
            Axis::Z => self.z = port,
            Axis::Y => self.y = port,
            Axis::Oblique => self.oblique = port,
        }
    }

    /// Assigned axes in capture order.
    pub fn assigned(&self) -> Vec<(Axis, &PortId)> {
        Axis::ALL
            .iter()
            .filter_map(|axis| self.get(*axis).map(|port| (*axis, port)))
            .collect()
    }

    pub fn assigned_count(&self) -> usize {
        Axis::ALL.iter().filter(|a| self.get(**a).is_some()).count()
    }
}

impl Serialize for AxisAssignments {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(Axis::ALL.len()))?;
        for axis in Axis::ALL {
            let value = self
                .get(axis)
                .map(|p| p.as_str())
                .unwrap_or(NO_PORT_SENTINEL);
            map.serialize_entry(axis.as_str(), value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for AxisAssignments {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        // Missing axes and explicit nulls are both treated as unassigned
        let raw: BTreeMap<String, Option<String>> = BTreeMap::deserialize(deserializer)?;
        let mut assignments = AxisAssignments::new();
        for (key, value) in raw {
            let axis = Axis::from_str(&key).map_err(|e| D::Error::custom(e.to_string()))?;
            assignments.set(axis, value.as_deref().and_then(PortId::parse));
        }
        Ok(assignments)
    }
}

/// Where photos live until the scan ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoMode {
    /// Capture and download after each shot
    #[default]
    Immediate,
    /// Trigger the shutter only, download everything once the scan completes
    Sdcard,
}

/// Bounded tolerance for capture failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturePolicy {
    /// Extra attempts after the first failed capture of a step
    pub max_retries: u32,
    /// Abort the run once more than this many steps have failed
    pub max_failed_steps: Option<usize>,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        CapturePolicy {
            max_retries: 1,
            max_failed_steps: None,
        }
    }
}

/// Validated, strictly typed scan configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub scan_label: String,
    pub angle_per_photo: f64,
    pub axes: AxisAssignments,
    /// Settle time after each angle group
    pub step_delay: Duration,
    pub photo_mode: PhotoMode,
    /// Directory the `<label>/<axis>/` tree is created under
    pub output_root: PathBuf,
    /// Rotate back to the start position after a completed scan
    pub return_to_start: bool,
    pub capture_policy: CapturePolicy,
}

impl ScanConfig {
    /// Create a config with default timing and policy settings.
    pub fn new(scan_label: impl Into<String>, angle_per_photo: f64, axes: AxisAssignments) -> Self {
        ScanConfig {
            scan_label: scan_label.into(),
            angle_per_photo,
            axes,
            step_delay: Duration::from_millis(100),
            photo_mode: PhotoMode::Immediate,
            output_root: PathBuf::new(),
            return_to_start: true,
            capture_policy: CapturePolicy::default(),
        }
    }

    /// Check the invariants a scan needs before it can be planned.
    pub fn validate(&self) -> Result<(), ScanError> {
        if !self.angle_per_photo.is_finite()
            || self.angle_per_photo <= 0.0
            || self.angle_per_photo > 360.0
        {
            return Err(ScanError::InvalidConfig(format!(
                "angle_per_photo must be in (0, 360], got {}",
                self.angle_per_photo
            )));
        }

        if self.axes.assigned_count() == 0 {
            return Err(ScanError::InvalidConfig(
                "At least one axis must have a camera assigned".to_string(),
            ));
        }

        match plan::step_count(self.angle_per_photo, self.axes.assigned_count()) {
            Some(steps) if steps <= plan::MAX_PLAN_STEPS => {}
            _ => {
                return Err(ScanError::InvalidConfig(format!(
                    "angle_per_photo {} needs more than {} captures",
                    self.angle_per_photo,
                    plan::MAX_PLAN_STEPS
                )))
            }
        }

        let label = self.scan_label.trim();
        if label.is_empty() {
            return Err(ScanError::InvalidConfig(
                "scan_label cannot be empty".to_string(),
            ));
        }
        if label.contains('/') || label.contains('\\') || label == "." || label == ".." {
            return Err(ScanError::InvalidConfig(format!(
                "scan_label '{}' must be a plain directory name",
                self.scan_label
            )));
        }

        Ok(())
    }
}

/// One capture at one turntable position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureStep {
    pub step_index: usize,
    /// Index of the angle group this step belongs to
    pub angle_index: usize,
    pub cumulative_angle: f64,
    pub axis: Axis,
    pub port: PortId,
    pub output_path: PathBuf,
}

impl CaptureStep {
    /// First capture of its angle group.
    pub fn starts_angle_group(&self, previous: Option<&CaptureStep>) -> bool {
        previous.map_or(true, |p| p.angle_index != self.angle_index)
    }
}

/// Deterministic ordered list of capture steps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanPlan {
    pub scan_label: String,
    pub angle_per_photo: f64,
    pub photos_per_camera: usize,
    pub steps: Vec<CaptureStep>,
}

/// Size and duration estimate shown before a scan starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanEstimate {
    pub photos_per_camera: usize,
    pub total_photos: usize,
    pub estimated: Duration,
}

impl fmt::Display for PlanEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.estimated.as_secs();
        write!(
            f,
            "{} photos per camera, {} total, ~{}h {}m {}s",
            self.photos_per_camera,
            self.total_photos,
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        )
    }
}
