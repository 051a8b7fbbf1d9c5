//! The ordered dose-level ladder shared by the slab and isodose passes.

use anyhow::{bail, Result};
use itertools::Itertools;

use crate::settings::FALLBACK_STEP_PERCENT;


/// Ordered list of target dose levels, as percentages of prescription.
///
/// The same ladder names both the target slabs and the isodose bands, so a
/// level's label and its numeric percentage can never diverge between the two
/// passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoseLadder {
    levels: Vec<u32>,
}

impl DoseLadder {
    /// Builds a ladder from percentages, which must be strictly ascending and
    /// strictly between 0 and 100.
    pub fn new(levels: Vec<u32>) -> Result<Self> {
        if levels.is_empty() {
            bail!("dose ladder has no levels");
        }
        if !levels.iter().tuple_windows().all(|(a, b)| a < b) {
            bail!("dose ladder levels must be strictly ascending: {:?}", levels);
        }
        if levels.first().is_some_and(|&l| l == 0) || levels.last().is_some_and(|&l| l >= 100) {
            bail!(
                "dose ladder levels must lie strictly between 0 and 100: {:?}",
                levels
            );
        }
        Ok(Self { levels })
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn levels(&self) -> &[u32] {
        &self.levels
    }

    /// Ladder walk in ascending dose order, with the 0-based ladder index.
    pub fn ascending(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.levels.iter().copied().enumerate()
    }

    /// Ladder walk from the highest dose level down.
    pub fn descending(&self) -> impl Iterator<Item = u32> + '_ {
        self.levels.iter().rev().copied()
    }

    /// Structure name of the target slab for a ladder level.
    pub fn slab_name(level: u32) -> String {
        format!("zJnc{}", level)
    }

    /// Structure name of the accepted dose band labeled under a ladder slot.
    /// The slot keeps its name even when the fallback level filled it.
    pub fn band_name(slot: u32) -> String {
        format!("doseBand{}", slot)
    }

    /// Name of the transient raw threshold region for a dose level.
    pub fn raw_name(level: u32) -> String {
        format!("doseRaw{}", level)
    }

    /// Threshold levels to try for a ladder slot, in order: the slot itself,
    /// then one fallback step lower.
    pub fn fallback_candidates(slot: u32) -> Vec<u32> {
        let mut candidates = vec![slot];
        if slot > FALLBACK_STEP_PERCENT {
            candidates.push(slot - FALLBACK_STEP_PERCENT);
        }
        candidates
    }
}
