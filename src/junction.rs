//! Anatomical junction location in the superior frame.
//!
//! The junction between the two abutting fields is anchored at the lower of
//! the two paired-organ landmarks (classically the inferior kidney poles),
//! with the transverse coordinate taken from the center of the patient
//! surface.

use anyhow::{bail, Result};
use nalgebra::Point3;

use crate::kernel::{Frame, Kernel};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{DoseGrid, Orientation, RegionKind};
    use crate::phantom::PhantomHost;
    use nalgebra::Vector3;

    fn organ_frame(left_z: f64, right_z: f64) -> (PhantomHost, Frame) {
        let frame = Frame {
            id: "CT_SUP".to_string(),
            orientation: Orientation::HeadFirst,
        };
        let mut host = PhantomHost::new();
        host.add_frame(
            "CT_SUP",
            2.0,
            DoseGrid {
                corner: Point3::new(-200.0, -200.0, -200.0),
                voxel: Vector3::new(2.0, 2.0, 2.0),
                shape: [200, 200, 200],
            },
        );
        host.add_box_region(
            "CT_SUP",
            "External",
            RegionKind::External,
            Point3::new(10.0, -20.0, 0.0),
            Vector3::new(300.0, 200.0, 380.0),
        )
        .unwrap();
        host.add_box_region(
            "CT_SUP",
            "Kidney_L",
            RegionKind::Organ,
            Point3::new(60.0, 0.0, left_z + 50.0),
            Vector3::new(60.0, 60.0, 100.0),
        )
        .unwrap();
        host.add_box_region(
            "CT_SUP",
            "Kidney_R",
            RegionKind::Organ,
            Point3::new(-60.0, 0.0, right_z + 50.0),
            Vector3::new(60.0, 60.0, 100.0),
        )
        .unwrap();
        (host, frame)
    }

    #[test]
    fn junction_at_lower_landmark() {
        let (host, frame) = organ_frame(-80.0, -40.0);
        let junction = locate(&host, &frame, "Kidney_L", "Kidney_R", "External").unwrap();
        assert_eq!(junction.z, -80.0);
        // x/y come from the external bounding-box center.
        assert_eq!(junction.x, 10.0);
        assert_eq!(junction.y, -20.0);
    }

    #[test]
    fn junction_symmetric_under_organ_swap() {
        let (host, frame) = organ_frame(-80.0, -40.0);
        let a = locate(&host, &frame, "Kidney_L", "Kidney_R", "External").unwrap();
        let b = locate(&host, &frame, "Kidney_R", "Kidney_L", "External").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn junction_deterministic() {
        let (host, frame) = organ_frame(-60.0, -90.0);
        let a = locate(&host, &frame, "Kidney_L", "Kidney_R", "External").unwrap();
        let b = locate(&host, &frame, "Kidney_L", "Kidney_R", "External").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.z, -90.0);
    }

    #[test]
    fn missing_organ_is_fatal_and_named() {
        let (host, frame) = organ_frame(-80.0, -40.0);
        let err = locate(&host, &frame, "Kidney_L", "Spleen", "External").unwrap_err();
        assert!(err.to_string().contains("Spleen"));
        assert!(err.to_string().contains("CT_SUP"));
    }
}

/// The single junction coordinate in the superior frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JunctionPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl JunctionPoint {
    pub fn point(&self) -> Point3<f64> {
        Point3::new(self.x, self.y, self.z)
    }

    pub fn from_point(p: Point3<f64>) -> Self {
        Self {
            x: p.x,
            y: p.y,
            z: p.z,
        }
    }
}

/// Locates the junction in `frame`: z is the more inferior of the two
/// paired-organ landmark extents, x/y the center of the patient surface.
///
/// Fails, naming the missing structure, if either organ or the external
/// boundary has no contours in the frame.
pub fn locate<K: Kernel>(
    kernel: &K,
    frame: &Frame,
    organ_a: &str,
    organ_b: &str,
    external: &str,
) -> Result<JunctionPoint> {
    let extent_a = landmark_extent(kernel, frame, organ_a)?;
    let extent_b = landmark_extent(kernel, frame, organ_b)?;
    let z = frame.orientation.more_inferior(extent_a, extent_b);

    if !kernel.has_contours(&frame.id, external) {
        bail!(
            "external boundary '{}' has no contours in frame '{}'",
            external,
            frame.id
        );
    }
    let center = kernel.bounding_box(&frame.id, external)?.center();

    Ok(JunctionPoint {
        x: center.x,
        y: center.y,
        z,
    })
}

/// Boundary coordinate of an organ nearest the patient's inferior direction.
fn landmark_extent<K: Kernel>(kernel: &K, frame: &Frame, organ: &str) -> Result<f64> {
    if !kernel.has_contours(&frame.id, organ) {
        bail!("organ '{}' has no contours in frame '{}'", organ, frame.id);
    }
    let bbox = kernel.bounding_box(&frame.id, organ)?;
    Ok(frame.orientation.inferior_extent(&bbox))
}
