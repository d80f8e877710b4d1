//! Built-in simulated drivers.
//!
//! This directory doubles as a driver source directory: the scanner reads these files
//! the same way it reads third-party driver sources, and this module (skipped by the
//! scanner as the package initializer) registers the compiled plugins.
//!
//! | Module | Type | Simulates |
//! |--------|------|-----------|
//! | `sim_wavemeter` | `SimWavemeter` | Multi-channel wavelength meter |
//! | `sim_synth` | `SimSynth` | Two-channel RF synthesizer |
//! | `sim_dac` | `SimDac` | Analog/digital output board |

pub mod sim_dac;
pub mod sim_synth;
pub mod sim_wavemeter;

use crate::driver::{DriverCatalog, DriverPlugin};
use std::path::PathBuf;

/// Plugins for every built-in driver.
pub fn builtin_plugins() -> Vec<DriverPlugin> {
    vec![
        sim_wavemeter::plugin(),
        sim_synth::plugin(),
        sim_dac::plugin(),
    ]
}

/// Catalog holding the built-in drivers.
pub fn builtin_catalog(library_paths: Vec<PathBuf>) -> DriverCatalog {
    let mut catalog = DriverCatalog::with_library_paths(library_paths);
    for plugin in builtin_plugins() {
        catalog.register(plugin);
    }
    catalog
}

/// Location of the built-in driver sources in the crate checkout.
pub fn source_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src").join("drivers")
}
