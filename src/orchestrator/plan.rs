//! Scan plan construction: config -> ordered capture steps.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ScanError;
use crate::models::{Axis, CaptureStep, PlanEstimate, ScanConfig, ScanPlan};

/// Estimated wall time per photo, including rotation settle and download.
pub const PHOTO_TIME: Duration = Duration::from_secs(5);

/// Float slack so that e.g. 360 / 0.1 does not round up to 3601 groups.
const GROUP_EPSILON: f64 = 1e-9;

/// Largest plan a config may produce.
pub const MAX_PLAN_STEPS: usize = 1_000_000;

/// Number of angle groups needed to cover a full revolution.
pub fn photos_per_camera(angle_per_photo: f64) -> usize {
    (360.0 / angle_per_photo - GROUP_EPSILON).ceil().max(1.0) as usize
}

/// Total captures for `cameras` assigned axes, `None` on overflow.
pub fn step_count(angle_per_photo: f64, cameras: usize) -> Option<usize> {
    photos_per_camera(angle_per_photo).checked_mul(cameras)
}

/// Output file for one capture. Depends only on its arguments so reruns overwrite
/// the same files.
pub fn output_path(
    root: &Path,
    scan_label: &str,
    axis: Axis,
    angle_index: usize,
    angle_per_photo: f64,
) -> PathBuf {
    let degrees = angle_index as f64 * angle_per_photo;
    root.join(scan_label).join(axis.as_str()).join(format!(
        "camera{}_{}_frame{:03}_angle{:05.1}.jpg",
        axis.camera_ordinal(),
        axis.as_str(),
        angle_index,
        degrees
    ))
}

/// Build the capture plan for a config.
///
/// Steps are grouped by angle, and within a group ordered Z, Y, Oblique with
/// unassigned axes skipped.
pub fn build(config: &ScanConfig) -> Result<ScanPlan, ScanError> {
    config.validate()?;

    let groups = photos_per_camera(config.angle_per_photo);
    let assigned = config.axes.assigned();
    let label = config.scan_label.trim();

    let total = step_count(config.angle_per_photo, assigned.len())
        .filter(|n| *n <= MAX_PLAN_STEPS)
        .ok_or_else(|| ScanError::InvalidConfig(format!("plan exceeds {} steps", MAX_PLAN_STEPS)))?;

    let mut steps = Vec::with_capacity(total);
    for angle_index in 0..groups {
        let cumulative_angle = angle_index as f64 * config.angle_per_photo;
        for (axis, port) in &assigned {
            steps.push(CaptureStep {
                step_index: steps.len(),
                angle_index,
                cumulative_angle,
                axis: *axis,
                port: (*port).clone(),
                output_path: output_path(
                    &config.output_root,
                    label,
                    *axis,
                    angle_index,
                    config.angle_per_photo,
                ),
            });
        }
    }

    log::debug!(
        "Built scan plan '{}': {} groups x {} cameras = {} steps",
        label,
        groups,
        assigned.len(),
        steps.len()
    );

    Ok(ScanPlan {
        scan_label: label.to_string(),
        angle_per_photo: config.angle_per_photo,
        photos_per_camera: groups,
        steps,
    })
}

impl ScanPlan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of rotations a full run issues.
    pub fn rotation_count(&self) -> usize {
        self.photos_per_camera.saturating_sub(1)
    }

    /// Steps captured by one axis, in angle order.
    pub fn steps_for_axis(&self, axis: Axis) -> impl Iterator<Item = &CaptureStep> {
        self.steps.iter().filter(move |s| s.axis == axis)
    }

    pub fn estimate(&self) -> PlanEstimate {
        PlanEstimate {
            photos_per_camera: self.photos_per_camera,
            total_photos: self.steps.len(),
            estimated: PHOTO_TIME * self.steps.len() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AxisAssignments;
    use proptest::prelude::*;

    fn two_camera_config(angle: f64) -> ScanConfig {
        let axes = AxisAssignments::new()
            .with(Axis::Z, "p1")
            .with(Axis::Y, "None")
            .with(Axis::Oblique, "p2");
        ScanConfig::new("plant", angle, axes)
    }

    #[test]
    fn test_reference_plan_length() {
        let plan = build(&two_camera_config(10.0)).unwrap();
        assert_eq!(plan.photos_per_camera, 36);
        assert_eq!(plan.len(), 72);
        assert_eq!(plan.rotation_count(), 35);
    }

    #[test]
    fn test_group_ordering() {
        let axes = AxisAssignments::new()
            .with(Axis::Oblique, "p3")
            .with(Axis::Z, "p1")
            .with(Axis::Y, "p2");
        let plan = build(&ScanConfig::new("plant", 90.0, axes)).unwrap();
        let order: Vec<(usize, Axis)> = plan.steps.iter().map(|s| (s.angle_index, s.axis)).collect();
        assert_eq!(&order[..4], &[(0, Axis::Z), (0, Axis::Y), (0, Axis::Oblique), (1, Axis::Z)]);
        assert_eq!(plan.steps[3].cumulative_angle, 90.0);
        for (i, step) in plan.steps.iter().enumerate() {
            assert_eq!(step.step_index, i);
        }
    }

    #[test]
    fn test_non_divisor_angle_rounds_up() {
        let plan = build(&two_camera_config(7.0)).unwrap();
        assert_eq!(plan.photos_per_camera, 52);
        assert_eq!(plan.steps.last().unwrap().cumulative_angle, 357.0);
    }

    #[test]
    fn test_fractional_angle_not_over_counted() {
        assert_eq!(photos_per_camera(0.1), 3600);
        assert_eq!(photos_per_camera(360.0), 1);
    }

    #[test]
    fn test_output_paths_deterministic_and_unique() {
        let first = build(&two_camera_config(0.5)).unwrap();
        let second = build(&two_camera_config(0.5)).unwrap();
        let a: Vec<_> = first.steps.iter().map(|s| s.output_path.clone()).collect();
        let b: Vec<_> = second.steps.iter().map(|s| s.output_path.clone()).collect();
        assert_eq!(a, b);

        let mut unique = a.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), a.len());
    }

    #[test]
    fn test_output_path_layout() {
        let path = output_path(Path::new("/scans"), "basil", Axis::Oblique, 2, 10.0);
        assert_eq!(
            path,
            PathBuf::from("/scans/basil/Oblique/camera3_Oblique_frame002_angle020.0.jpg")
        );
    }

    #[test]
    fn test_estimate() {
        let plan = build(&two_camera_config(10.0)).unwrap();
        let estimate = plan.estimate();
        assert_eq!(estimate.total_photos, 72);
        assert_eq!(estimate.estimated, Duration::from_secs(360));
        assert_eq!(plan.steps_for_axis(Axis::Oblique).count(), 36);
        assert_eq!(plan.steps_for_axis(Axis::Y).count(), 0);
    }

    #[test]
    fn test_tiny_angle_rejected() {
        for angle in [1e-300, 1e-6, 0.0001] {
            let result = build(&two_camera_config(angle));
            assert!(matches!(result, Err(ScanError::InvalidConfig(_))), "angle {}", angle);
        }
        assert!(build(&two_camera_config(0.01)).is_ok());
        assert_eq!(step_count(1e-300, 2), None);
    }

    proptest! {
        #[test]
        fn prop_plan_length(angle in 0.5f64..=360.0, mask in 1u8..8) {
            let mut axes = AxisAssignments::new();
            for (bit, axis) in Axis::ALL.iter().enumerate() {
                if mask & (1 << bit) != 0 {
                    axes = axes.with(*axis, &format!("usb:00{}", bit));
                }
            }
            let config = ScanConfig::new("prop", angle, axes);
            let plan = build(&config).unwrap();
            let expected = photos_per_camera(angle) * mask.count_ones() as usize;
            prop_assert_eq!(plan.len(), expected);
            prop_assert!(plan.photos_per_camera as f64 * angle >= 360.0 - 1e-6);
        }

        #[test]
        fn prop_invalid_angles_rejected(angle in prop_oneof![-720.0f64..=0.0, 360.0001f64..1e6]) {
            let config = two_camera_config(angle);
            prop_assert!(matches!(build(&config), Err(ScanError::InvalidConfig(_))));
        }
    }
}
