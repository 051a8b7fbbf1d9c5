//! Dose-grid reconciliation and the weighted composite dose.
//!
//! Before the two fields are summed, each frame's dose grid is grown (never
//! shrunk, voxel size held fixed) until it covers every support, target and
//! external structure on that frame. The composite is then the sum of the
//! per-fraction doses weighted by the number of fractions each field
//! delivers, which supports asymmetric fractionation between the fields.

use anyhow::Result;
use ndarray_stats::QuantileExt;

use crate::kernel::{BoundingBox, DoseField, DoseGrid, Frame, Kernel, RegionKind};


/// Grows a dose grid until it covers every given bounding box.
///
/// The voxel size is held fixed and growth happens in whole voxels, so the
/// existing voxel lattice is preserved; the result never has a corner above
/// or an extent below the input grid's.
pub fn expand_to_cover(grid: &DoseGrid, boxes: &[BoundingBox]) -> DoseGrid {
    let mut needed = BoundingBox::new(grid.corner, grid.far_corner());
    for b in boxes {
        needed = needed.union(b);
    }

    let far = grid.far_corner();
    let mut corner = grid.corner;
    let mut shape = grid.shape;
    for axis in 0..3 {
        let voxel = grid.voxel[axis];
        let below = ((grid.corner[axis] - needed.min[axis]) / voxel).ceil().max(0.0) as usize;
        let above = ((needed.max[axis] - far[axis]) / voxel).ceil().max(0.0) as usize;
        corner[axis] -= below as f64 * voxel;
        shape[axis] += below + above;
    }

    DoseGrid {
        corner,
        voxel: grid.voxel,
        shape,
    }
}

/// Reconciles one frame's dose grid with the anatomy it must cover: the
/// bounding boxes of every contoured support, target and external structure
/// on the frame. Runs independently per frame; the frame's voxel size is
/// never changed.
pub fn reconcile_frame_grid<K: Kernel>(kernel: &mut K, frame: &Frame) -> Result<DoseGrid> {
    let kinds = [RegionKind::Support, RegionKind::Target, RegionKind::External];
    let names = kernel.regions_of_kind(&frame.id, &kinds);

    let mut boxes = Vec::with_capacity(names.len());
    for name in &names {
        if kernel.has_contours(&frame.id, name) {
            boxes.push(kernel.bounding_box(&frame.id, name)?);
        }
    }

    let grid = kernel.dose_grid(&frame.id)?;
    let expanded = expand_to_cover(&grid, &boxes);
    if expanded != grid {
        log::info!(
            "dose grid of frame '{}' grown from {:?} to {:?} voxels to cover anatomy",
            frame.id,
            grid.shape,
            expanded.shape
        );
        kernel.set_dose_grid(&frame.id, &expanded)?;
    }
    Ok(expanded)
}

/// The fraction-weighted sum of the two per-frame doses, on the primary
/// frame's grid.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeDose {
    pub field: DoseField,
    /// Fraction counts of the (primary, secondary) fields.
    pub weights: (u32, u32),
}

impl CompositeDose {
    pub fn max_cgy(&self) -> f64 {
        self.field.data.max().map(|v| *v as f64).unwrap_or(0.0)
    }

    pub fn mean_cgy(&self) -> f64 {
        self.field.data.mean().map(|v| v as f64).unwrap_or(0.0)
    }
}

/// Builds the composite dose: reconcile both grids, bring both frame doses
/// up to date, resample the secondary onto the primary grid, and sum with
/// fraction-count weights.
pub fn composite<K: Kernel>(
    kernel: &mut K,
    primary: &Frame,
    secondary: &Frame,
    weights: (u32, u32),
) -> Result<CompositeDose> {
    reconcile_frame_grid(kernel, primary)?;
    reconcile_frame_grid(kernel, secondary)?;

    kernel.compute_dose(&primary.id)?;
    kernel.compute_dose(&secondary.id)?;

    let base = kernel.frame_dose(&primary.id)?;
    let resampled = kernel.resample_dose(&secondary.id, &primary.id)?;

    let data = &base.data * weights.0 as f32 + &resampled.data * weights.1 as f32;
    Ok(CompositeDose {
        field: DoseField {
            grid: base.grid,
            data,
        },
        weights,
    })
}
