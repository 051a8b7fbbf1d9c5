//! Isodose-band decomposition of the donor frame's computed dose.
//!
//! The ladder is walked from the highest dose level down. Each level is
//! thresholded out of the dose field, confined to the junction envelope and
//! the patient surface, and stripped of every band already accepted at a
//! higher level, so the accepted bands partition the junction into mutually
//! exclusive dose intervals `[d, next-higher)`.
//!
//! An empty result does not abandon the level: the engine retries once at the
//! fallback level one step lower, cleans volume outliers, and accepts that
//! region under the original ladder label, logging the substitution. A level
//! whose fallback is also empty is omitted from the accepted set; junctions
//! are robust to a missing dose band.
//!
//! Every raw threshold region created during the walk is transient. The
//! engine returns the transient names so the caller can delete them, and
//! deletes them itself before propagating a mid-walk error.

use anyhow::Result;

use crate::kernel::{Frame, Kernel, RegionExpr};
use crate::ladder::DoseLadder;
use crate::settings::{COMPONENT_VOLUME_MAX_CC, COMPONENT_VOLUME_MIN_CC};


/// A dose band accepted by the ladder walk. `slot_percent` is the ladder
/// label the band answers to; `used_percent` is the threshold that actually
/// produced it (lower than the slot only after a fallback).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedBand {
    pub name: String,
    pub slot_percent: u32,
    pub used_percent: u32,
}

/// Record of one fallback substitution, for the report and the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Substitution {
    pub slot_percent: u32,
    pub used_percent: u32,
}

/// Result of one decomposition pass over the ladder.
#[derive(Debug, Clone, PartialEq)]
pub struct IsodoseOutcome {
    /// Accepted bands, ordered from the highest ladder slot down.
    pub accepted: Vec<AcceptedBand>,
    /// Which slots were filled by their fallback level.
    pub substitutions: Vec<Substitution>,
    /// Raw threshold regions created during the walk; the caller deletes
    /// these once the accepted bands have been consumed.
    pub transients: Vec<String>,
}

/// Decomposes the frame's computed dose into mutually exclusive bands, one
/// per ladder slot, walking the ladder from the top down.
pub fn decompose<K: Kernel>(
    kernel: &mut K,
    frame: &Frame,
    envelope: &str,
    external: &str,
    ladder: &DoseLadder,
    prescription_cgy: f64,
) -> Result<IsodoseOutcome> {
    let mut transients = Vec::new();
    match walk(
        kernel,
        frame,
        envelope,
        external,
        ladder,
        prescription_cgy,
        &mut transients,
    ) {
        Ok((accepted, substitutions)) => Ok(IsodoseOutcome {
            accepted,
            substitutions,
            transients,
        }),
        Err(err) => {
            // A failed walk must not leak its intermediate regions.
            discard_regions(kernel, frame, &transients);
            Err(err)
        }
    }
}

fn walk<K: Kernel>(
    kernel: &mut K,
    frame: &Frame,
    envelope: &str,
    external: &str,
    ladder: &DoseLadder,
    prescription_cgy: f64,
    transients: &mut Vec<String>,
) -> Result<(Vec<AcceptedBand>, Vec<Substitution>)> {
    let mut accepted: Vec<AcceptedBand> = Vec::new();
    let mut substitutions = Vec::new();

    for slot in ladder.descending() {
        let band = DoseLadder::band_name(slot);
        let mut filled = false;

        for level in DoseLadder::fallback_candidates(slot) {
            let raw = DoseLadder::raw_name(level);
            if !transients.contains(&raw) {
                kernel.threshold_dose(&frame.id, &raw, prescription_cgy * level as f64 / 100.0)?;
                transients.push(raw.clone());
            }

            let mut expr = RegionExpr::named(&raw)
                .and(RegionExpr::named(envelope))
                .and(RegionExpr::named(external));
            for higher in &accepted {
                expr = expr.minus(RegionExpr::named(&higher.name));
            }
            kernel.create_region(&frame.id, &band, &expr)?;
            kernel.keep_components_within(
                &frame.id,
                &band,
                COMPONENT_VOLUME_MIN_CC,
                COMPONENT_VOLUME_MAX_CC,
            )?;

            if kernel.has_contours(&frame.id, &band) {
                if level != slot {
                    log::info!(
                        "isodose level {}% empty in frame '{}'; accepted {}% under its label",
                        slot,
                        frame.id,
                        level
                    );
                    substitutions.push(Substitution {
                        slot_percent: slot,
                        used_percent: level,
                    });
                }
                accepted.push(AcceptedBand {
                    name: band.clone(),
                    slot_percent: slot,
                    used_percent: level,
                });
                filled = true;
                break;
            }
            kernel.delete_region(&frame.id, &band)?;
        }

        if !filled {
            log::warn!(
                "isodose level {}% and its fallback are both empty in frame '{}'; band omitted",
                slot,
                frame.id
            );
        }
    }

    Ok((accepted, substitutions))
}

/// Best-effort deletion of a set of regions; failures are logged, never
/// propagated, so cleanup can run on error paths.
pub fn discard_regions<K: Kernel>(kernel: &mut K, frame: &Frame, names: &[String]) {
    for name in names {
        if let Err(err) = kernel.delete_region(&frame.id, name) {
            log::warn!(
                "failed to delete transient region '{}' in frame '{}': {}",
                name,
                frame.id,
                err
            );
        }
    }
}
