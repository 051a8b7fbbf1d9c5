use anyhow::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;

use crate::kernel::Frame;

/// Step, in percentage points of prescription, taken below an empty isodose
/// level before the one retry.
pub const FALLBACK_STEP_PERCENT: u32 = 5;
/// Connected components below this volume (cc) are discarded from accepted dose bands.
pub const COMPONENT_VOLUME_MIN_CC: f64 = 1.0;
/// Connected components above this volume (cc) are discarded from accepted dose bands.
pub const COMPONENT_VOLUME_MAX_CC: f64 = 200_000.0;
/// Ratio of slab z-span to slab thickness. Must exceed 1 so adjacent slabs overlap and the ladder leaves no z-gap.
pub const SLAB_OVERLAP_FACTOR: f64 = 1.2;
/// Transversal margin (mm) added around the patient extent when building slab boxes.
pub const PATIENT_WIDTH_MARGIN_MM: f64 = 25.0;
/// Absolute tolerance for comparing transformed coordinates.
pub const TRANSFORM_TOLERANCE: f64 = 1e-6;
/// Name of the transient junction envelope region in the donor frame.
pub const JUNCTION_ENVELOPE: &str = "zJunction";

/// Runtime configuration for a junction planning session.
///
/// Everything the excluded orchestration layer supplies to the core: the two
/// frames with their declared orientations, the paired landmark organs, the
/// dose ladder, the slab thickness and the prescription/fractionation.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    pub superior: Frame,
    pub inferior: Frame,
    pub paired_organs: [String; 2],
    pub external: String,
    pub ladder: Vec<u32>,
    pub slab_thickness_mm: f64,
    pub prescription_cgy_per_fraction: f64,
    pub fractions_superior: u32,
    pub fractions_inferior: u32,
    #[serde(default = "default_directory")]
    pub directory: String,
}

fn default_directory() -> String {
    "out".to_string()
}

pub fn load_default_config() -> Result<Settings> {
    let root = retrieve_project_root();
    let default_config_file = root.join("config/default.toml");

    let settings: Config = Config::builder()
        .add_source(File::from(default_config_file).required(true))
        .build()
        .unwrap_or_else(|err| {
            eprintln!("Error loading configuration: {}", err);
            std::process::exit(1);
        });

    let config: Settings = settings.try_deserialize().unwrap_or_else(|err| {
        eprintln!("Error deserializing configuration: {}", err);
        std::process::exit(1);
    });

    validate_config(&config);

    Ok(config)
}

pub fn load_config() -> Result<Settings> {
    let root = retrieve_project_root();

    let default_config_file = root.join("config/default.toml");
    let local_config = root.join("config/local.toml");

    // Check if local config exists, if not use default
    let config_file = if local_config.exists() {
        println!("Using local configuration: {:?}", local_config);
        local_config
    } else {
        println!("Using default configuration: {:?}", default_config_file);
        default_config_file
    };

    let settings: Config = Config::builder()
        .add_source(File::from(config_file).required(true))
        .add_source(Environment::with_prefix("seam"))
        .build()
        .unwrap_or_else(|err| {
            eprintln!("Error loading configuration: {}", err);
            std::process::exit(1);
        });

    let config: Settings = settings.try_deserialize().unwrap_or_else(|err| {
        eprintln!("Error deserializing configuration: {}", err);
        std::process::exit(1);
    });

    validate_config(&config);

    Ok(config)
}

/// Retrieve the project root directory.
/// This function tries to find the project root directory in different ways:
/// 1. If the CARGO_MANIFEST_DIR environment variable is set, use it.
/// 2. If the SEAM_ROOT_DIR environment variable is set, use it.
/// 3. If the "config" subdirectory is found in the executable directory or any of its parents, use it.
/// If none of these methods work, the function will panic.
fn retrieve_project_root() -> std::path::PathBuf {
    if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
        // When running through cargo (e.g. cargo run, cargo test)
        std::path::PathBuf::from(manifest_dir)
    } else if let Ok(path) = env::var("SEAM_ROOT_DIR") {
        // Allow explicit configuration via environment variable
        std::path::PathBuf::from(path)
    } else {
        // Fallback: walk upward from the executable directory until a
        // "config" subdirectory is found
        let exe_path = env::current_exe().expect("Failed to get current executable path");
        let mut current_dir = exe_path
            .parent()
            .expect("Failed to get executable directory")
            .to_path_buf();
        let mut found = false;

        while !found && current_dir.parent().is_some() {
            if current_dir.join("config").is_dir() {
                found = true;
            } else {
                current_dir = current_dir.parent().unwrap().to_path_buf();
            }
        }

        if found {
            current_dir
        } else {
            panic!("Could not find project root directory");
        }
    }
}

/// Checks a configuration can drive a planning session; a bad protocol is
/// unrecoverable, so violations panic with a clear message.
pub fn validate_config(config: &Settings) {
    assert!(
        config.superior.id != config.inferior.id,
        "Superior and inferior frames must differ"
    );
    assert!(
        !config.ladder.is_empty(),
        "Dose ladder must contain at least one level"
    );
    assert!(
        config.slab_thickness_mm > 0.0,
        "Slab thickness must be greater than 0"
    );
    assert!(
        config.prescription_cgy_per_fraction > 0.0,
        "Prescription must be greater than 0"
    );
    assert!(
        config.fractions_superior >= 1 && config.fractions_inferior >= 1,
        "Each field must deliver at least one fraction"
    );
}
