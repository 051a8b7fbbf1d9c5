//! Rigid coordinate correspondence between the two scan frames.
//!
//! The host records one rigid registration per ordered frame pair. When the
//! requested direction is missing but the reverse exists, the pipeline inverts
//! the reverse matrix rather than failing; when neither direction exists the
//! workflow has no basis for spatial correspondence and must stop.

use anyhow::{anyhow, bail, Result};
use nalgebra::{Matrix4, Point3};

use crate::kernel::{Frame, Kernel};


/// The rigid transform mapping `from`-frame coordinates into the `to` frame.
///
/// Falls back to inverting the reverse registration when only that direction
/// is recorded; the inversion is logged as a compensating step, not silent.
pub fn get_transform<K: Kernel>(kernel: &K, from: &Frame, to: &Frame) -> Result<Matrix4<f64>> {
    if let Some(m) = kernel.registration(&from.id, &to.id) {
        return Ok(m);
    }
    if let Some(m) = kernel.registration(&to.id, &from.id) {
        let inverted = m.try_inverse().ok_or_else(|| {
            anyhow!(
                "registration from '{}' to '{}' is not invertible",
                to.id,
                from.id
            )
        })?;
        log::info!(
            "no registration from '{}' to '{}'; inverting the reverse registration",
            from.id,
            to.id
        );
        return Ok(inverted);
    }
    bail!(
        "no registration between frames '{}' and '{}' in either direction",
        from.id,
        to.id
    )
}

/// Applies the transform to a single coordinate (homogeneous multiply, first
/// three components kept).
pub fn map_point(transform: &Matrix4<f64>, p: &Point3<f64>) -> Point3<f64> {
    transform.transform_point(p)
}

/// Instantiates the named regions of the `from` frame in the `to` frame,
/// returning the identifiers created there. Frame-local state in `from` is
/// never mutated.
pub fn map_regions<K: Kernel>(
    kernel: &mut K,
    names: &[String],
    from: &Frame,
    to: &Frame,
) -> Result<Vec<String>> {
    let transform = get_transform(kernel, from, to)?;
    let mut created = Vec::with_capacity(names.len());
    for name in names {
        kernel.transport_region(&from.id, name, &transform, &to.id, name)?;
        created.push(name.clone());
    }
    Ok(created)
}
