//! In-memory voxel host used by the test suite and the demo driver.
//!
//! Stands in for the planning host behind the [`Kernel`] port: regions are
//! voxel sets on a per-frame lattice, dose fields live on per-frame grids,
//! and registrations are plain matrices. Geometry here is deliberately
//! blocky; the point is faithful semantics for boolean algebra, margins,
//! thresholding, component cleanup, transport and resampling, not clinical
//! realism.
//!
//! Frames are expected to keep their dose-grid voxel size equal to the
//! region lattice spacing so threshold regions land exactly on the lattice.

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{bail, Result};
use nalgebra::{Matrix4, Point3, Vector3};
use ndarray::Array3;

use crate::kernel::{
    BoundingBox, DoseField, DoseGrid, Kernel, Margins, RegionExpr, RegionKind,
};
use crate::settings::Settings;


type Voxel = [i32; 3];

#[derive(Debug, Clone)]
struct PhantomRegion {
    voxels: HashSet<Voxel>,
    kind: RegionKind,
}

#[derive(Debug, Clone)]
struct PhantomFrame {
    voxel_mm: f64,
    grid: DoseGrid,
    regions: HashMap<String, PhantomRegion>,
    dose: Option<DoseField>,
    dose_current: bool,
    /// Peak of the synthetic falloff dose, cGy per fraction. Zero means
    /// synthesis produces a zero field.
    ramp_peak_cgy: f64,
    /// z at which the synthetic dose reaches its peak / falls to zero.
    ramp_full_z: f64,
    ramp_zero_z: f64,
}

/// The in-memory host. Build frames and structures with the `add_*` methods,
/// then drive it through the [`Kernel`] port.
#[derive(Debug, Clone, Default)]
pub struct PhantomHost {
    frames: HashMap<String, PhantomFrame>,
    registrations: HashMap<(String, String), Matrix4<f64>>,
}

impl PhantomHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_frame(&mut self, id: &str, voxel_mm: f64, grid: DoseGrid) {
        self.frames.insert(
            id.to_string(),
            PhantomFrame {
                voxel_mm,
                grid,
                regions: HashMap::new(),
                dose: None,
                dose_current: false,
                ramp_peak_cgy: 0.0,
                ramp_full_z: 0.0,
                ramp_zero_z: 1.0,
            },
        );
    }

    /// Adds a box-shaped structure with the given semantic type.
    pub fn add_box_region(
        &mut self,
        frame: &str,
        name: &str,
        kind: RegionKind,
        center: Point3<f64>,
        span: Vector3<f64>,
    ) -> Result<()> {
        self.create_region(frame, name, &RegionExpr::box_at(center, span))?;
        self.set_region_kind(frame, name, kind)
    }

    /// Records a rigid registration for the ordered frame pair.
    pub fn set_registration(&mut self, from: &str, to: &str, matrix: Matrix4<f64>) {
        self.registrations
            .insert((from.to_string(), to.to_string()), matrix);
    }

    /// Injects a computed dose field for a frame, marking it current.
    pub fn set_dose(&mut self, frame: &str, field: DoseField) -> Result<()> {
        let f = self.frame_mut(frame)?;
        f.dose = Some(field);
        f.dose_current = true;
        Ok(())
    }

    /// Configures the synthetic dose model: a linear longitudinal falloff
    /// from `peak_cgy` at `full_z` down to zero at `zero_z`.
    pub fn set_dose_ramp(&mut self, frame: &str, peak_cgy: f64, full_z: f64, zero_z: f64) -> Result<()> {
        let f = self.frame_mut(frame)?;
        f.ramp_peak_cgy = peak_cgy;
        f.ramp_full_z = full_z;
        f.ramp_zero_z = zero_z;
        Ok(())
    }

    fn frame(&self, id: &str) -> Result<&PhantomFrame> {
        match self.frames.get(id) {
            Some(frame) => Ok(frame),
            None => bail!("unknown frame '{}'", id),
        }
    }

    fn frame_mut(&mut self, id: &str) -> Result<&mut PhantomFrame> {
        match self.frames.get_mut(id) {
            Some(frame) => Ok(frame),
            None => bail!("unknown frame '{}'", id),
        }
    }

    fn evaluate(frame: &PhantomFrame, expr: &RegionExpr) -> Result<HashSet<Voxel>> {
        match expr {
            RegionExpr::Named(name) => match frame.regions.get(name) {
                Some(region) => Ok(region.voxels.clone()),
                None => bail!("no region named '{}'", name),
            },
            RegionExpr::Box { center, span } => {
                Ok(box_voxels(frame.voxel_mm, center, span))
            }
            RegionExpr::And(a, b) => {
                let a = Self::evaluate(frame, a)?;
                let b = Self::evaluate(frame, b)?;
                Ok(a.intersection(&b).copied().collect())
            }
            RegionExpr::Or(a, b) => {
                let a = Self::evaluate(frame, a)?;
                let b = Self::evaluate(frame, b)?;
                Ok(a.union(&b).copied().collect())
            }
            RegionExpr::Sub(a, b) => {
                let a = Self::evaluate(frame, a)?;
                let b = Self::evaluate(frame, b)?;
                Ok(a.difference(&b).copied().collect())
            }
            RegionExpr::Margin { inner, margins } => {
                let inner = Self::evaluate(frame, inner)?;
                Ok(apply_margins(&inner, margins, frame.voxel_mm))
            }
        }
    }
}

/// Voxels whose centers fall inside the closed box.
fn box_voxels(voxel_mm: f64, center: &Point3<f64>, span: &Vector3<f64>) -> HashSet<Voxel> {
    let lo = center - span / 2.0;
    let hi = center + span / 2.0;
    let mut voxels = HashSet::new();
    let first = |v: f64| (v / voxel_mm).floor() as i32;
    for x in first(lo.x)..=first(hi.x) {
        for y in first(lo.y)..=first(hi.y) {
            for z in first(lo.z)..=first(hi.z) {
                let c = voxel_center(voxel_mm, [x, y, z]);
                if c.x >= lo.x
                    && c.x <= hi.x
                    && c.y >= lo.y
                    && c.y <= hi.y
                    && c.z >= lo.z
                    && c.z <= hi.z
                {
                    voxels.insert([x, y, z]);
                }
            }
        }
    }
    voxels
}

fn voxel_center(voxel_mm: f64, v: Voxel) -> Point3<f64> {
    Point3::new(
        (v[0] as f64 + 0.5) * voxel_mm,
        (v[1] as f64 + 0.5) * voxel_mm,
        (v[2] as f64 + 0.5) * voxel_mm,
    )
}

fn world_to_voxel(voxel_mm: f64, p: &Point3<f64>) -> Voxel {
    [
        (p.x / voxel_mm).floor() as i32,
        (p.y / voxel_mm).floor() as i32,
        (p.z / voxel_mm).floor() as i32,
    ]
}

/// Box erosion (negative margin components) followed by box dilation
/// (positive components), in whole voxel steps.
fn apply_margins(voxels: &HashSet<Voxel>, margins: &Margins, voxel_mm: f64) -> HashSet<Voxel> {
    let steps = |mm: f64| (mm / voxel_mm).round().max(0.0) as i32;
    let grow = [
        steps(margins.x_neg),
        steps(margins.x_pos),
        steps(margins.y_neg),
        steps(margins.y_pos),
        steps(margins.z_neg),
        steps(margins.z_pos),
    ];
    let shrink = [
        steps(-margins.x_neg),
        steps(-margins.x_pos),
        steps(-margins.y_neg),
        steps(-margins.y_pos),
        steps(-margins.z_neg),
        steps(-margins.z_pos),
    ];

    let mut result: HashSet<Voxel> = if shrink.iter().any(|&s| s > 0) {
        voxels
            .iter()
            .filter(|v| {
                for dx in -shrink[0]..=shrink[1] {
                    for dy in -shrink[2]..=shrink[3] {
                        for dz in -shrink[4]..=shrink[5] {
                            if !voxels.contains(&[v[0] + dx, v[1] + dy, v[2] + dz]) {
                                return false;
                            }
                        }
                    }
                }
                true
            })
            .copied()
            .collect()
    } else {
        voxels.clone()
    };

    if grow.iter().any(|&g| g > 0) {
        let mut grown = HashSet::with_capacity(result.len());
        for v in &result {
            for dx in -grow[0]..=grow[1] {
                for dy in -grow[2]..=grow[3] {
                    for dz in -grow[4]..=grow[5] {
                        grown.insert([v[0] + dx, v[1] + dy, v[2] + dz]);
                    }
                }
            }
        }
        result = grown;
    }
    result
}

/// 6-connected components of a voxel set.
fn components(voxels: &HashSet<Voxel>) -> Vec<HashSet<Voxel>> {
    let mut unvisited: HashSet<Voxel> = voxels.clone();
    let mut components = Vec::new();
    while !unvisited.is_empty() {
        let start = *unvisited.iter().next().unwrap();
        unvisited.remove(&start);
        let mut component = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(v) = queue.pop_front() {
            component.insert(v);
            for (axis, step) in [(0, 1), (0, -1), (1, 1), (1, -1), (2, 1), (2, -1)] {
                let mut n = v;
                n[axis] += step;
                if unvisited.remove(&n) {
                    queue.push_back(n);
                }
            }
        }
        components.push(component);
    }
    components
}

impl Kernel for PhantomHost {
    fn has_contours(&self, frame: &str, region: &str) -> bool {
        self.frames
            .get(frame)
            .and_then(|f| f.regions.get(region))
            .is_some_and(|r| !r.voxels.is_empty())
    }

    fn region_kind(&self, frame: &str, region: &str) -> Option<RegionKind> {
        self.frames
            .get(frame)
            .and_then(|f| f.regions.get(region))
            .map(|r| r.kind)
    }

    fn regions_of_kind(&self, frame: &str, kinds: &[RegionKind]) -> Vec<String> {
        let mut names: Vec<String> = match self.frames.get(frame) {
            Some(f) => f
                .regions
                .iter()
                .filter(|(_, r)| kinds.contains(&r.kind))
                .map(|(name, _)| name.clone())
                .collect(),
            None => Vec::new(),
        };
        names.sort();
        names
    }

    fn create_region(&mut self, frame: &str, name: &str, expr: &RegionExpr) -> Result<()> {
        let f = self.frame(frame)?;
        let voxels = Self::evaluate(f, expr)?;
        let kind = f
            .regions
            .get(name)
            .map(|r| r.kind)
            .unwrap_or(RegionKind::Control);
        self.frame_mut(frame)?
            .regions
            .insert(name.to_string(), PhantomRegion { voxels, kind });
        Ok(())
    }

    fn threshold_dose(&mut self, frame: &str, name: &str, dose_cgy: f64) -> Result<()> {
        let f = self.frame(frame)?;
        let field = match (&f.dose, f.dose_current) {
            (Some(field), true) => field.clone(),
            _ => bail!("dose has not been computed for frame '{}'", frame),
        };
        let voxel_mm = f.voxel_mm;

        let mut voxels = HashSet::new();
        for ((i, j, k), &value) in field.data.indexed_iter() {
            if f64::from(value) >= dose_cgy {
                let center = field.grid.voxel_center(i, j, k);
                voxels.insert(world_to_voxel(voxel_mm, &center));
            }
        }
        self.frame_mut(frame)?.regions.insert(
            name.to_string(),
            PhantomRegion {
                voxels,
                kind: RegionKind::Control,
            },
        );
        Ok(())
    }

    fn bounding_box(&self, frame: &str, region: &str) -> Result<BoundingBox> {
        let f = self.frame(frame)?;
        let voxels = match f.regions.get(region) {
            Some(r) if !r.voxels.is_empty() => &r.voxels,
            _ => bail!("region '{}' in frame '{}' has no contours", region, frame),
        };
        let mut min = [i32::MAX; 3];
        let mut max = [i32::MIN; 3];
        for v in voxels {
            for axis in 0..3 {
                min[axis] = min[axis].min(v[axis]);
                max[axis] = max[axis].max(v[axis]);
            }
        }
        Ok(BoundingBox::new(
            Point3::new(
                min[0] as f64 * f.voxel_mm,
                min[1] as f64 * f.voxel_mm,
                min[2] as f64 * f.voxel_mm,
            ),
            Point3::new(
                (max[0] + 1) as f64 * f.voxel_mm,
                (max[1] + 1) as f64 * f.voxel_mm,
                (max[2] + 1) as f64 * f.voxel_mm,
            ),
        ))
    }

    fn volume_cc(&self, frame: &str, region: &str) -> Result<f64> {
        let f = self.frame(frame)?;
        match f.regions.get(region) {
            Some(r) => Ok(r.voxels.len() as f64 * f.voxel_mm.powi(3) / 1000.0),
            None => bail!("no region named '{}' in frame '{}'", region, frame),
        }
    }

    fn keep_components_within(
        &mut self,
        frame: &str,
        region: &str,
        min_cc: f64,
        max_cc: f64,
    ) -> Result<()> {
        let f = self.frame(frame)?;
        let voxel_cc = f.voxel_mm.powi(3) / 1000.0;
        let voxels = match f.regions.get(region) {
            Some(r) => r.voxels.clone(),
            None => bail!("no region named '{}' in frame '{}'", region, frame),
        };

        let mut kept = HashSet::with_capacity(voxels.len());
        for component in components(&voxels) {
            let cc = component.len() as f64 * voxel_cc;
            if cc >= min_cc && cc <= max_cc {
                kept.extend(component);
            }
        }
        if let Some(r) = self.frame_mut(frame)?.regions.get_mut(region) {
            r.voxels = kept;
        }
        Ok(())
    }

    fn set_region_kind(&mut self, frame: &str, region: &str, kind: RegionKind) -> Result<()> {
        match self.frame_mut(frame)?.regions.get_mut(region) {
            Some(r) => {
                r.kind = kind;
                Ok(())
            }
            None => bail!("no region named '{}' in frame '{}'", region, frame),
        }
    }

    fn delete_region(&mut self, frame: &str, region: &str) -> Result<()> {
        match self.frame_mut(frame)?.regions.remove(region) {
            Some(_) => Ok(()),
            None => bail!("no region named '{}' in frame '{}' to delete", region, frame),
        }
    }

    fn registration(&self, from: &str, to: &str) -> Option<Matrix4<f64>> {
        self.registrations
            .get(&(from.to_string(), to.to_string()))
            .copied()
    }

    fn transport_region(
        &mut self,
        from: &str,
        region: &str,
        transform: &Matrix4<f64>,
        to: &str,
        new_name: &str,
    ) -> Result<()> {
        let source = self.frame(from)?;
        let (voxels, kind) = match source.regions.get(region) {
            Some(r) => (r.voxels.clone(), r.kind),
            None => bail!("no region named '{}' in frame '{}'", region, from),
        };
        let source_mm = source.voxel_mm;
        let target_mm = self.frame(to)?.voxel_mm;

        let moved: HashSet<Voxel> = voxels
            .iter()
            .map(|&v| {
                let p = transform.transform_point(&voxel_center(source_mm, v));
                world_to_voxel(target_mm, &p)
            })
            .collect();
        self.frame_mut(to)?
            .regions
            .insert(new_name.to_string(), PhantomRegion { voxels: moved, kind });
        Ok(())
    }

    fn dose_grid(&self, frame: &str) -> Result<DoseGrid> {
        Ok(self.frame(frame)?.grid.clone())
    }

    fn set_dose_grid(&mut self, frame: &str, grid: &DoseGrid) -> Result<()> {
        let f = self.frame_mut(frame)?;
        if f.grid != *grid {
            f.grid = grid.clone();
            f.dose = None;
            f.dose_current = false;
        }
        Ok(())
    }

    fn compute_dose(&mut self, frame: &str) -> Result<()> {
        let f = self.frame_mut(frame)?;
        if f.dose.is_none() {
            let grid = f.grid.clone();
            let mut data = Array3::zeros((grid.shape[0], grid.shape[1], grid.shape[2]));
            if f.ramp_peak_cgy > 0.0 {
                let slope = f.ramp_full_z - f.ramp_zero_z;
                for ((i, j, k), value) in data.indexed_iter_mut() {
                    let z = grid.voxel_center(i, j, k).z;
                    let frac = ((z - f.ramp_zero_z) / slope).clamp(0.0, 1.0);
                    *value = (f.ramp_peak_cgy * frac) as f32;
                }
            }
            f.dose = Some(DoseField { grid, data });
        }
        f.dose_current = true;
        Ok(())
    }

    fn frame_dose(&self, frame: &str) -> Result<DoseField> {
        let f = self.frame(frame)?;
        match (&f.dose, f.dose_current) {
            (Some(field), true) => Ok(field.clone()),
            _ => bail!("dose has not been computed for frame '{}'", frame),
        }
    }

    fn resample_dose(&self, frame: &str, onto: &str) -> Result<DoseField> {
        let source = self.frame_dose(frame)?;
        let target_grid = self.frame(onto)?.grid.clone();

        let to_source = if frame == onto {
            Matrix4::identity()
        } else if let Some(m) = self.registration(onto, frame) {
            m
        } else if let Some(m) = self.registration(frame, onto) {
            match m.try_inverse() {
                Some(inverse) => inverse,
                None => bail!(
                    "registration from '{}' to '{}' is not invertible",
                    frame,
                    onto
                ),
            }
        } else {
            bail!(
                "no registration between frames '{}' and '{}' in either direction",
                frame,
                onto
            )
        };

        let mut data = Array3::zeros((
            target_grid.shape[0],
            target_grid.shape[1],
            target_grid.shape[2],
        ));
        for ((i, j, k), value) in data.indexed_iter_mut() {
            let p = target_grid.voxel_center(i, j, k);
            *value = source.sample(&to_source.transform_point(&p));
        }
        Ok(DoseField {
            grid: target_grid,
            data,
        })
    }
}

/// Builds the bundled demonstration session: a superior and an inferior
/// acquisition of the same block phantom, kidneys in the superior frame, a
/// couch surface in the inferior frame, and a registration recorded in the
/// inferior-to-superior direction only.
pub fn demo_session(settings: &Settings) -> PhantomHost {
    let sup = settings.superior.id.as_str();
    let inf = settings.inferior.id.as_str();
    let mut host = PhantomHost::new();

    host.add_frame(
        sup,
        5.0,
        DoseGrid {
            corner: Point3::new(-200.0, -150.0, -350.0),
            voxel: Vector3::new(5.0, 5.0, 5.0),
            shape: [80, 60, 130],
        },
    );
    host.add_frame(
        inf,
        5.0,
        DoseGrid {
            corner: Point3::new(-200.0, -150.0, -300.0),
            voxel: Vector3::new(5.0, 5.0, 5.0),
            shape: [80, 60, 120],
        },
    );

    host.add_box_region(
        sup,
        &settings.external,
        RegionKind::External,
        Point3::new(0.0, 0.0, -30.0),
        Vector3::new(320.0, 240.0, 600.0),
    )
    .expect("demo superior external");
    host.add_box_region(
        sup,
        &settings.paired_organs[0],
        RegionKind::Organ,
        Point3::new(55.0, 10.0, -60.0),
        Vector3::new(70.0, 50.0, 110.0),
    )
    .expect("demo organ");
    host.add_box_region(
        sup,
        &settings.paired_organs[1],
        RegionKind::Organ,
        Point3::new(-55.0, 10.0, -75.0),
        Vector3::new(70.0, 50.0, 110.0),
    )
    .expect("demo organ");

    host.add_box_region(
        inf,
        &settings.external,
        RegionKind::External,
        Point3::new(0.0, 0.0, -50.0),
        Vector3::new(320.0, 240.0, 600.0),
    )
    .expect("demo inferior external");
    host.add_box_region(
        inf,
        "CouchSurface",
        RegionKind::Support,
        Point3::new(0.0, -140.0, -50.0),
        Vector3::new(360.0, 40.0, 600.0),
    )
    .expect("demo couch");

    // Junction lands at the lower kidney pole, z = -130 in the superior
    // frame; the inferior scan sees the same plane at z = 250.
    let mut inf_to_sup = Matrix4::identity();
    inf_to_sup[(2, 3)] = -380.0;
    host.set_registration(inf, sup, inf_to_sup);

    // Superior field falls off across the ladder below the junction; the
    // inferior field mirrors it from the other side.
    let rx = settings.prescription_cgy_per_fraction;
    let ladder_span = settings.slab_thickness_mm * settings.ladder.len() as f64;
    host.set_dose_ramp(sup, rx, -130.0, -130.0 - ladder_span)
        .expect("demo ramp");
    host.set_dose_ramp(inf, rx, 250.0 - ladder_span, 250.0)
        .expect("demo ramp");

    host
}
