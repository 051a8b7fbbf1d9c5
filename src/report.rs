use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use crate::isodose::Substitution;
use crate::summation::CompositeDose;

/// Summary of one junction planning session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanReport {
    /// Junction coordinate in the superior frame (mm).
    pub junction_mm: [f64; 3],
    pub superior_slabs: Vec<String>,
    pub inferior_slabs: Vec<String>,
    /// Accepted dose bands in the donor frame, highest ladder slot first.
    pub bands: Vec<BandReport>,
    /// Ladder slots that were filled by their fallback level.
    pub substitutions: Vec<Substitution>,
    /// Band names instantiated in the recipient frame.
    pub mapped: Vec<String>,
    pub composite: Option<CompositeReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BandReport {
    pub name: String,
    pub slot_percent: u32,
    pub used_percent: u32,
    pub volume_cc: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompositeReport {
    pub weights: (u32, u32),
    pub grid_shape: [usize; 3],
    pub max_cgy: f64,
    pub mean_cgy: f64,
}

impl CompositeReport {
    pub fn from_composite(composite: &CompositeDose) -> Self {
        Self {
            weights: composite.weights,
            grid_shape: composite.field.grid.shape,
            max_cgy: composite.max_cgy(),
            mean_cgy: composite.mean_cgy(),
        }
    }
}

impl PlanReport {
    /// Prints a human-readable session summary.
    pub fn print(&self) {
        println!(
            "Junction at ({:.1}, {:.1}, {:.1}) mm",
            self.junction_mm[0], self.junction_mm[1], self.junction_mm[2]
        );
        println!(
            "Slabs: {} superior, {} inferior",
            self.superior_slabs.len(),
            self.inferior_slabs.len()
        );
        for band in &self.bands {
            if band.used_percent == band.slot_percent {
                println!(
                    "  {}: {:.1} cc at {}%",
                    band.name, band.volume_cc, band.used_percent
                );
            } else {
                println!(
                    "  {}: {:.1} cc at {}% (substituted for {}%)",
                    band.name, band.volume_cc, band.used_percent, band.slot_percent
                );
            }
        }
        println!("Mapped {} bands into the recipient frame", self.mapped.len());
        if let Some(composite) = &self.composite {
            println!(
                "Composite dose: max {:.1} cGy, mean {:.1} cGy, weights {}:{}",
                composite.max_cgy, composite.mean_cgy, composite.weights.0, composite.weights.1
            );
        }
    }
}

/// Writes the session report as JSON into the output directory.
pub fn write_report(report: &PlanReport, directory: &str) -> Result<()> {
    std::fs::create_dir_all(directory)?;
    let path = Path::new(directory).join("junction_report.json");
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)?;
    Ok(())
}
