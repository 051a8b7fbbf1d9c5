//! Target-slab decomposition of the junction region.
//!
//! Each ladder level gets one fixed-thickness slab anchored relative to the
//! junction point. The donor frame counts anchors down from the far end of
//! the ladder and the recipient frame counts up from the junction, so the two
//! frames tile the same physical interval with complementary dose labels: for
//! a 10-percent-step ladder the donor's d% slab coincides with the
//! recipient's (100-d)% slab.

use anyhow::{anyhow, bail, Result};
use nalgebra::{Point3, Vector3};

use crate::junction::JunctionPoint;
use crate::kernel::{Frame, Kernel, Margins, RegionExpr, RegionKind};
use crate::ladder::DoseLadder;
use crate::settings::{Settings, PATIENT_WIDTH_MARGIN_MM, SLAB_OVERLAP_FACTOR};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_slabs_leave_no_gap() {
        // Anchors of adjacent ladder indices sit one thickness apart; the
        // overlap factor must stretch each box far enough to cover the seam.
        let t = 20.0;
        for sign in [1.0, -1.0] {
            for i in 0..8usize {
                let a = slab_box_z(-55.0, sign, t, anchor_offset(FrameRole::Donor, i, 9));
                let b = slab_box_z(-55.0, sign, t, anchor_offset(FrameRole::Donor, i + 1, 9));
                let overlap = a.1.min(b.1) - a.0.max(b.0);
                assert!(overlap > 0.0, "gap between slabs {} and {}", i, i + 1);
            }
        }
    }

    #[test]
    fn donor_and_recipient_tile_complementary() {
        // Donor slab for level 10*(i+1) and recipient slab for the
        // complementary level occupy the same z interval.
        let t = 20.0;
        let n = 9;
        for i in 0..n {
            let donor = slab_box_z(0.0, 1.0, t, anchor_offset(FrameRole::Donor, i, n));
            let recipient = slab_box_z(
                0.0,
                1.0,
                t,
                anchor_offset(FrameRole::Recipient, n - 1 - i, n),
            );
            assert!((donor.0 - recipient.0).abs() < 1e-9);
            assert!((donor.1 - recipient.1).abs() < 1e-9);
        }
    }

    #[test]
    fn ladder_spans_junction_interval() {
        // The union of all donor slabs covers [junction - n*t, junction].
        let t = 20.0;
        let n = 9;
        let j = 100.0;
        let lo = (0..n)
            .map(|i| slab_box_z(j, 1.0, t, anchor_offset(FrameRole::Donor, i, n)).0)
            .fold(f64::INFINITY, f64::min);
        let hi = (0..n)
            .map(|i| slab_box_z(j, 1.0, t, anchor_offset(FrameRole::Donor, i, n)).1)
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(lo <= j - n as f64 * t);
        assert!(hi >= j);
    }
}

/// Which side of the junction a frame plays in the feathering scheme.
///
/// The donor is the frame whose computed dose seeds the isodose pass; the
/// recipient receives the mapped bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRole {
    Donor,
    Recipient,
}

/// Ladder anchor offset, in slab thicknesses, for ladder index `i` of `n`.
pub fn anchor_offset(role: FrameRole, i: usize, n: usize) -> f64 {
    match role {
        FrameRole::Donor => (n - i) as f64,
        FrameRole::Recipient => (i + 1) as f64,
    }
}

/// The z interval spanned by a slab box at the given anchor offset.
pub fn slab_box_z(junction_z: f64, sign: f64, thickness: f64, offset: f64) -> (f64, f64) {
    let z_start = junction_z - sign * thickness * offset;
    let center = z_start + sign * thickness / 2.0;
    let half = thickness * SLAB_OVERLAP_FACTOR / 2.0;
    (center - half, center + half)
}

/// Builds one target slab per ladder level in `frame`, anchored at the
/// frame-local junction point, and retypes each as a treatable target.
/// Returns the created slab names in ascending ladder order.
pub fn build_slabs<K: Kernel>(
    kernel: &mut K,
    frame: &Frame,
    role: FrameRole,
    junction: &JunctionPoint,
    ladder: &DoseLadder,
    settings: &Settings,
) -> Result<Vec<String>> {
    if !kernel.has_contours(&frame.id, &settings.external) {
        bail!(
            "external boundary '{}' has no contours in frame '{}'",
            settings.external,
            frame.id
        );
    }
    let width = kernel.bounding_box(&frame.id, &settings.external)?.span();
    let sign = frame.orientation.sign();
    let thickness = settings.slab_thickness_mm;
    let n = ladder.len();

    let mut names = Vec::with_capacity(n);
    for (i, level) in ladder.ascending() {
        let offset = anchor_offset(role, i, n);
        let (z_lo, z_hi) = slab_box_z(junction.z, sign, thickness, offset);
        let center = Point3::new(junction.x, junction.y, (z_lo + z_hi) / 2.0);
        let span = Vector3::new(width.x, width.y, z_hi - z_lo);

        // Patient width margin is applied transversally only; the z extent is
        // fixed by the ladder geometry.
        let margins = Margins {
            x_neg: PATIENT_WIDTH_MARGIN_MM,
            x_pos: PATIENT_WIDTH_MARGIN_MM,
            y_neg: PATIENT_WIDTH_MARGIN_MM,
            y_pos: PATIENT_WIDTH_MARGIN_MM,
            z_neg: 0.0,
            z_pos: 0.0,
        };
        let expr = RegionExpr::box_at(center, span)
            .with_margin(margins)
            .and(RegionExpr::named(&settings.external));

        let name = DoseLadder::slab_name(level);
        kernel.create_region(&frame.id, &name, &expr)?;
        kernel.set_region_kind(&frame.id, &name, RegionKind::Target)?;
        names.push(name);
    }
    Ok(names)
}

/// Creates the junction envelope, the union of the frame's slabs, used by the
/// isodose pass to confine thresholded candidates. The caller owns its
/// lifetime and deletes it with the other transients.
pub fn build_envelope<K: Kernel>(
    kernel: &mut K,
    frame: &Frame,
    slabs: &[String],
    name: &str,
) -> Result<()> {
    let mut iter = slabs.iter();
    let first = iter
        .next()
        .ok_or_else(|| anyhow!("no slabs to form a junction envelope"))?;
    let expr = iter.fold(RegionExpr::named(first), |acc, slab| {
        acc.or(RegionExpr::named(slab))
    });
    kernel.create_region(&frame.id, name, &expr)
}
