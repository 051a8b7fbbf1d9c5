//! Port to the external planning host's geometry and dose services.
//!
//! The host application owns all persistent state: structures, registrations,
//! dose grids and computed dose. The planning core only ever holds plain data
//! (frame identifiers, coordinates, region-name strings) and calls through the
//! [`Kernel`] trait, so that the same workflow runs against the real host or
//! against the in-memory phantom used by the test suite.

use anyhow::Result;
use nalgebra::{Matrix4, Point3, Vector3};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_union() {
        let a = BoundingBox::new(Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 10.0, 10.0));
        let b = BoundingBox::new(Point3::new(-5.0, 2.0, 3.0), Point3::new(5.0, 20.0, 8.0));
        let u = a.union(&b);
        assert_eq!(u.min, Point3::new(-5.0, 0.0, 0.0));
        assert_eq!(u.max, Point3::new(10.0, 20.0, 10.0));
    }

    #[test]
    fn bounding_box_center() {
        let b = BoundingBox::new(Point3::new(-10.0, 0.0, 20.0), Point3::new(10.0, 40.0, 30.0));
        assert_eq!(b.center(), Point3::new(0.0, 20.0, 25.0));
    }

    #[test]
    fn inferior_extent_follows_orientation() {
        let b = BoundingBox::new(Point3::new(0.0, 0.0, -120.0), Point3::new(0.0, 0.0, 80.0));
        assert_eq!(Orientation::HeadFirst.inferior_extent(&b), -120.0);
        assert_eq!(Orientation::FeetFirst.inferior_extent(&b), 80.0);
    }

    #[test]
    fn grid_far_corner() {
        let grid = DoseGrid {
            corner: Point3::new(-100.0, -100.0, -200.0),
            voxel: Vector3::new(2.5, 2.5, 2.5),
            shape: [80, 80, 160],
        };
        assert_eq!(grid.far_corner(), Point3::new(100.0, 100.0, 200.0));
    }

    #[test]
    fn field_sample_outside_is_zero() {
        let grid = DoseGrid {
            corner: Point3::origin(),
            voxel: Vector3::new(1.0, 1.0, 1.0),
            shape: [2, 2, 2],
        };
        let field = DoseField {
            grid,
            data: Array3::from_elem((2, 2, 2), 1.5),
        };
        assert_eq!(field.sample(&Point3::new(0.5, 0.5, 0.5)), 1.5);
        assert_eq!(field.sample(&Point3::new(10.0, 0.5, 0.5)), 0.0);
        assert_eq!(field.sample(&Point3::new(0.5, -0.5, 0.5)), 0.0);
    }
}

/// Patient orientation of an acquired image volume.
///
/// Head-first scans place the patient's inferior direction at decreasing z;
/// feet-first scans flip it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Orientation {
    HeadFirst,
    FeetFirst,
}

impl Orientation {
    /// Direction convention for slab anchoring: +1 head-first, -1 feet-first.
    pub fn sign(&self) -> f64 {
        match self {
            Orientation::HeadFirst => 1.0,
            Orientation::FeetFirst => -1.0,
        }
    }

    /// The bounding-box z coordinate nearest the patient's inferior direction.
    pub fn inferior_extent(&self, bbox: &BoundingBox) -> f64 {
        match self {
            Orientation::HeadFirst => bbox.min.z,
            Orientation::FeetFirst => bbox.max.z,
        }
    }

    /// The more inferior of two z coordinates in this orientation.
    pub fn more_inferior(&self, a: f64, b: f64) -> f64 {
        match self {
            Orientation::HeadFirst => a.min(b),
            Orientation::FeetFirst => a.max(b),
        }
    }
}

/// One of the two independently-acquired image volumes and its coordinate
/// system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub id: String,
    pub orientation: Orientation,
}

/// Semantic type of a structure in the host's data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionKind {
    Organ,
    External,
    Target,
    Support,
    Control,
}

/// Axis-aligned bounding box in frame coordinates (mm).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl BoundingBox {
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn span(&self) -> Vector3<f64> {
        self.max - self.min
    }

    /// Componentwise union of two boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }
}

/// Per-direction expansion (positive) or contraction (negative) margins in mm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margins {
    pub x_neg: f64,
    pub x_pos: f64,
    pub y_neg: f64,
    pub y_pos: f64,
    pub z_neg: f64,
    pub z_pos: f64,
}

impl Margins {
    pub fn uniform(mm: f64) -> Self {
        Self {
            x_neg: mm,
            x_pos: mm,
            y_neg: mm,
            y_pos: mm,
            z_neg: mm,
            z_pos: mm,
        }
    }
}

/// Boolean expression over source regions, evaluated by the host's geometry
/// kernel when a derived region is created.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionExpr {
    /// An existing structure, referenced by name.
    Named(String),
    /// An axis-aligned box, given by center and full span.
    Box {
        center: Point3<f64>,
        span: Vector3<f64>,
    },
    And(Box<RegionExpr>, Box<RegionExpr>),
    Or(Box<RegionExpr>, Box<RegionExpr>),
    Sub(Box<RegionExpr>, Box<RegionExpr>),
    Margin {
        inner: Box<RegionExpr>,
        margins: Margins,
    },
}

impl RegionExpr {
    pub fn named(name: &str) -> Self {
        RegionExpr::Named(name.to_string())
    }

    pub fn box_at(center: Point3<f64>, span: Vector3<f64>) -> Self {
        RegionExpr::Box { center, span }
    }

    pub fn and(self, other: RegionExpr) -> Self {
        RegionExpr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: RegionExpr) -> Self {
        RegionExpr::Or(Box::new(self), Box::new(other))
    }

    pub fn minus(self, other: RegionExpr) -> Self {
        RegionExpr::Sub(Box::new(self), Box::new(other))
    }

    pub fn with_margin(self, margins: Margins) -> Self {
        RegionExpr::Margin {
            inner: Box::new(self),
            margins,
        }
    }
}

/// Extent and resolution of a dose grid: corner, per-axis voxel size and
/// per-axis voxel counts.
#[derive(Debug, Clone, PartialEq)]
pub struct DoseGrid {
    pub corner: Point3<f64>,
    pub voxel: Vector3<f64>,
    pub shape: [usize; 3],
}

impl DoseGrid {
    /// Corner diagonally opposite [`DoseGrid::corner`].
    pub fn far_corner(&self) -> Point3<f64> {
        self.corner
            + Vector3::new(
                self.voxel.x * self.shape[0] as f64,
                self.voxel.y * self.shape[1] as f64,
                self.voxel.z * self.shape[2] as f64,
            )
    }

    /// World coordinate of a voxel center.
    pub fn voxel_center(&self, i: usize, j: usize, k: usize) -> Point3<f64> {
        self.corner
            + Vector3::new(
                (i as f64 + 0.5) * self.voxel.x,
                (j as f64 + 0.5) * self.voxel.y,
                (k as f64 + 0.5) * self.voxel.z,
            )
    }
}

/// A scalar dose field (cGy) sampled on a [`DoseGrid`].
#[derive(Debug, Clone, PartialEq)]
pub struct DoseField {
    pub grid: DoseGrid,
    pub data: Array3<f32>,
}

impl DoseField {
    pub fn zeros(grid: DoseGrid) -> Self {
        let data = Array3::zeros((grid.shape[0], grid.shape[1], grid.shape[2]));
        Self { grid, data }
    }

    /// Nearest-voxel sample; points outside the grid read as zero dose.
    pub fn sample(&self, p: &Point3<f64>) -> f32 {
        let rel = p - self.grid.corner;
        let i = (rel.x / self.grid.voxel.x).floor();
        let j = (rel.y / self.grid.voxel.y).floor();
        let k = (rel.z / self.grid.voxel.z).floor();
        if i < 0.0 || j < 0.0 || k < 0.0 {
            return 0.0;
        }
        let (i, j, k) = (i as usize, j as usize, k as usize);
        if i >= self.grid.shape[0] || j >= self.grid.shape[1] || k >= self.grid.shape[2] {
            return 0.0;
        }
        self.data[[i, j, k]]
    }
}

/// The in-process interface to the host's geometry and dose services.
///
/// Regions are addressed by `(frame id, region name)`; creating a region under
/// an existing name replaces it. All queries are side-effect free.
pub trait Kernel {
    // --- session/state queries ---

    /// Whether the named region exists and has at least one contour.
    fn has_contours(&self, frame: &str, region: &str) -> bool;

    /// Semantic type of a region, if it exists.
    fn region_kind(&self, frame: &str, region: &str) -> Option<RegionKind>;

    /// Names of all regions on the frame whose type is one of `kinds`.
    fn regions_of_kind(&self, frame: &str, kinds: &[RegionKind]) -> Vec<String>;

    // --- region algebra ---

    /// Create (or replace) a region from a boolean expression.
    fn create_region(&mut self, frame: &str, name: &str, expr: &RegionExpr) -> Result<()>;

    /// Create (or replace) a region from the frame's current dose field,
    /// thresholded at `dose_cgy`.
    fn threshold_dose(&mut self, frame: &str, name: &str, dose_cgy: f64) -> Result<()>;

    fn bounding_box(&self, frame: &str, region: &str) -> Result<BoundingBox>;

    fn volume_cc(&self, frame: &str, region: &str) -> Result<f64>;

    /// Drop connected components whose volume falls outside `[min_cc, max_cc]`.
    fn keep_components_within(
        &mut self,
        frame: &str,
        region: &str,
        min_cc: f64,
        max_cc: f64,
    ) -> Result<()>;

    fn set_region_kind(&mut self, frame: &str, region: &str, kind: RegionKind) -> Result<()>;

    fn delete_region(&mut self, frame: &str, region: &str) -> Result<()>;

    // --- transform services ---

    /// The registration matrix mapping `from`-frame coordinates into the `to`
    /// frame, if the host has one recorded for that ordered pair.
    fn registration(&self, from: &str, to: &str) -> Option<Matrix4<f64>>;

    /// Instantiate `region` of the `from` frame in the `to` frame under
    /// `new_name`, applying the rigid transform. The source is not modified.
    fn transport_region(
        &mut self,
        from: &str,
        region: &str,
        transform: &Matrix4<f64>,
        to: &str,
        new_name: &str,
    ) -> Result<()>;

    // --- dose services ---

    fn dose_grid(&self, frame: &str) -> Result<DoseGrid>;

    /// Replace the frame's dose grid. Existing dose becomes stale.
    fn set_dose_grid(&mut self, frame: &str, grid: &DoseGrid) -> Result<()>;

    /// Recompute any beam doses on the frame that are not current. Blocking.
    fn compute_dose(&mut self, frame: &str) -> Result<()>;

    /// The frame's current per-fraction dose on its own grid.
    fn frame_dose(&self, frame: &str) -> Result<DoseField>;

    /// The frame's current dose resampled onto the `onto` frame's grid, in
    /// `onto`-frame coordinates. The host applies its recorded registration.
    fn resample_dose(&self, frame: &str, onto: &str) -> Result<DoseField>;
}
