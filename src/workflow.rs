//! Junction planning workflow orchestration.
//!
//! The workflow is single-threaded, synchronous and staged: junction
//! location, slab construction, external dose computation, isodose
//! decomposition, cross-frame mapping, dose summation. Each stage depends
//! strictly on the previous one and a failed precondition stops the session
//! before any dose work, naming the missing entity so the operator can
//! correct the inputs and re-run from the start.
//!
//! The host's geometry model is the only shared resource. Every transient
//! region this workflow creates (the junction envelope, raw threshold
//! regions, consumed dose bands) is deleted before the stage returns, on
//! success and on failure, so no caller ever observes intermediate
//! artifacts.

use anyhow::{bail, Result};

use crate::{
    isodose::{self, IsodoseOutcome},
    junction::{self, JunctionPoint},
    kernel::Kernel,
    ladder::DoseLadder,
    mapping,
    report::{self, BandReport, CompositeReport, PlanReport},
    settings::{Settings, JUNCTION_ENVELOPE},
    slab::{self, FrameRole},
    summation, transform,
};

/// A junction planning session against a host kernel.
pub struct JunctionPlan<K: Kernel> {
    pub kernel: K,
    pub settings: Settings, // runtime settings
    pub report: PlanReport, // results of the session
}

impl<K: Kernel> JunctionPlan<K> {
    pub fn new(kernel: K, settings: Settings) -> Self {
        Self {
            kernel,
            settings,
            report: PlanReport::default(),
        }
    }

    /// Runs the full feathering workflow.
    pub fn run(&mut self) -> Result<()> {
        let ladder = DoseLadder::new(self.settings.ladder.clone())?;
        self.preflight()?;

        let junction = junction::locate(
            &self.kernel,
            &self.settings.superior,
            &self.settings.paired_organs[0],
            &self.settings.paired_organs[1],
            &self.settings.external,
        )?;
        self.report.junction_mm = [junction.x, junction.y, junction.z];

        // Spatial correspondence must exist before any dose work starts.
        let forward = transform::get_transform(
            &self.kernel,
            &self.settings.superior,
            &self.settings.inferior,
        )?;
        let junction_inferior =
            JunctionPoint::from_point(transform::map_point(&forward, &junction.point()));

        let superior_slabs = slab::build_slabs(
            &mut self.kernel,
            &self.settings.superior,
            FrameRole::Donor,
            &junction,
            &ladder,
            &self.settings,
        )?;
        let inferior_slabs = slab::build_slabs(
            &mut self.kernel,
            &self.settings.inferior,
            FrameRole::Recipient,
            &junction_inferior,
            &ladder,
            &self.settings,
        )?;
        slab::build_envelope(
            &mut self.kernel,
            &self.settings.superior,
            &superior_slabs,
            JUNCTION_ENVELOPE,
        )?;
        self.report.superior_slabs = superior_slabs;
        self.report.inferior_slabs = inferior_slabs;

        // The donor field is planned and dosed by the host before its dose
        // can be decomposed.
        self.kernel.compute_dose(&self.settings.superior.id)?;

        let outcome = isodose::decompose(
            &mut self.kernel,
            &self.settings.superior,
            JUNCTION_ENVELOPE,
            &self.settings.external,
            &ladder,
            self.settings.prescription_cgy_per_fraction,
        )?;

        // Record volumes and map while the bands still exist, then delete
        // every transient of this stage whatever the outcome was.
        let bands = self.record_bands(&outcome);
        let mapped = mapping::map_nonempty(
            &mut self.kernel,
            &outcome.accepted,
            &self.settings.superior,
            &self.settings.inferior,
        );

        let mut doomed = outcome.transients.clone();
        doomed.push(JUNCTION_ENVELOPE.to_string());
        doomed.extend(outcome.accepted.iter().map(|band| band.name.clone()));
        isodose::discard_regions(&mut self.kernel, &self.settings.superior, &doomed);

        self.report.bands = bands?;
        self.report.mapped = mapped?;
        self.report.substitutions = outcome.substitutions.clone();

        let composite = summation::composite(
            &mut self.kernel,
            &self.settings.superior,
            &self.settings.inferior,
            (
                self.settings.fractions_superior,
                self.settings.fractions_inferior,
            ),
        )?;
        self.report.composite = Some(CompositeReport::from_composite(&composite));

        Ok(())
    }

    /// Checks every structure the workflow depends on before touching the
    /// host's geometry model.
    fn preflight(&self) -> Result<()> {
        for organ in &self.settings.paired_organs {
            if !self.kernel.has_contours(&self.settings.superior.id, organ) {
                bail!(
                    "organ '{}' has no contours in frame '{}'",
                    organ,
                    self.settings.superior.id
                );
            }
        }
        for frame in [&self.settings.superior, &self.settings.inferior] {
            if !self.kernel.has_contours(&frame.id, &self.settings.external) {
                bail!(
                    "external boundary '{}' has no contours in frame '{}'",
                    self.settings.external,
                    frame.id
                );
            }
        }
        Ok(())
    }

    fn record_bands(&self, outcome: &IsodoseOutcome) -> Result<Vec<BandReport>> {
        let mut bands = Vec::with_capacity(outcome.accepted.len());
        for band in &outcome.accepted {
            let volume_cc = self
                .kernel
                .volume_cc(&self.settings.superior.id, &band.name)?;
            bands.push(BandReport {
                name: band.name.clone(),
                slot_percent: band.slot_percent,
                used_percent: band.used_percent,
                volume_cc,
            });
        }
        Ok(bands)
    }

    /// Prints the session summary and writes the JSON report.
    pub fn writeup(&self) {
        self.report.print();
        if let Err(err) = report::write_report(&self.report, &self.settings.directory) {
            println!("Failed to write junction report: {}", err);
        }
    }
}
