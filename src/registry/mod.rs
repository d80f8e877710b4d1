//! Driver Registry
//!
//! In-memory index of scanned drivers keyed by their derived id, plus the persisted
//! mirror of that index in the [`RegistryDocument`].
//!
//! # Rebuild
//!
//! ```text
//! scan_directory(dir) ──► derive ids ──► fresh DriverIndex + driver table
//!                                              │
//!              previous table (keyed by module)┘──► old id → new id remaps
//!                                                        │
//!                               InstrumentConfig.driverId ◄┘ (batch rewrite)
//! ```
//!
//! The driver table is always replaced wholesale; nothing survives a rebuild unless
//! the scan produced it again. Rebuilding twice without file changes yields the same
//! table and no remaps.

pub mod store;

use crate::driver::DriverCatalog;
use crate::identity;
use crate::scanner::{self, ScannedDriver};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

pub use store::{
    CapabilityCall, DriverMeta, DriverRecord, InitMeta, InstrumentConfig, InstrumentStateRecord,
    RegistryDocument, RegistryStore,
};

/// Runtime view of one driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverEntry {
    /// Module (file stem)
    pub module: String,
    /// File name inside the driver directory
    pub file: String,
    /// Driver type name
    pub class_name: String,
    /// Exposed function names
    pub functions: Vec<String>,
}

/// Driver id → entry.
#[derive(Debug, Clone, Default)]
pub struct DriverIndex {
    entries: HashMap<String, DriverEntry>,
}

impl DriverIndex {
    /// Entry for driver `id`.
    pub fn get(&self, id: &str) -> Option<&DriverEntry> {
        self.entries.get(id)
    }

    /// Whether driver `id` is indexed.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of indexed drivers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no driver is indexed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index mirroring a persisted driver table.
    pub fn from_records(records: &[DriverRecord]) -> Self {
        let entries = records
            .iter()
            .map(|r| {
                (
                    r.id.clone(),
                    DriverEntry {
                        module: r.module.clone(),
                        file: r.file.clone(),
                        class_name: r.name.clone(),
                        functions: r.function.clone(),
                    },
                )
            })
            .collect();
        Self { entries }
    }
}

/// Old driver id → new driver id for one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdRemap {
    /// Module whose id changed
    pub module: String,
    /// Id recorded before the rebuild
    pub old_id: String,
    /// Id derived from the current scan
    pub new_id: String,
}

/// Result of [`rebuild`].
#[derive(Debug, Clone, Default)]
pub struct RebuildOutcome {
    /// Index after the rebuild
    pub index: DriverIndex,
    /// Driver ids that changed
    pub remaps: Vec<IdRemap>,
    /// Instruments whose `driverId` was rewritten
    pub remapped_instruments: usize,
}

/// Converts one scan result into its persisted record.
pub fn driver_record(scanned: &ScannedDriver, namespace: &str, catalog: &DriverCatalog) -> DriverRecord {
    let availability = catalog.availability(&scanned.module);
    DriverRecord {
        id: identity::driver_id(namespace, &scanned.module),
        file: scanned.file.clone(),
        module: scanned.module.clone(),
        name: scanned.class_name.clone(),
        function: scanned.function_names(),
        meta: DriverMeta {
            class_doc: scanned.class_doc.clone(),
            init: InitMeta {
                positional_args: scanned.init_positional.clone(),
                keyword_args: scanned.init_keyword.clone(),
            },
            functions: scanned.functions.clone(),
        },
        available: availability.is_ready(),
        unavailable_reason: availability.reason().map(str::to_string),
    }
}

/// Replaces the driver table of `doc` with `scanned` and remaps instrument driver ids.
///
/// A file defining several driver types yields one record per type, all sharing the
/// module-derived id; the first in declaration order wins the index slot.
pub fn rebuild(
    doc: &mut RegistryDocument,
    scanned: &[ScannedDriver],
    namespace: &str,
    catalog: &DriverCatalog,
) -> RebuildOutcome {
    let previous: HashMap<String, String> = doc
        .driver
        .iter()
        .map(|d| (d.module.clone(), d.id.clone()))
        .collect();

    let mut table: Vec<DriverRecord> = Vec::with_capacity(scanned.len());
    let mut index = DriverIndex::default();
    for s in scanned {
        let record = driver_record(s, namespace, catalog);
        index
            .entries
            .entry(record.id.clone())
            .or_insert_with(|| DriverEntry {
                module: record.module.clone(),
                file: record.file.clone(),
                class_name: record.name.clone(),
                functions: record.function.clone(),
            });
        table.push(record);
    }

    let mut remaps: Vec<IdRemap> = Vec::new();
    for record in &table {
        if let Some(old_id) = previous.get(&record.module) {
            if *old_id != record.id && !remaps.iter().any(|r| r.old_id == *old_id) {
                remaps.push(IdRemap {
                    module: record.module.clone(),
                    old_id: old_id.clone(),
                    new_id: record.id.clone(),
                });
            }
        }
    }

    let mut remapped_instruments = 0;
    for inst in &mut doc.instrument {
        if let Some(remap) = remaps.iter().find(|r| r.old_id == inst.driver_id) {
            inst.driver_id = remap.new_id.clone();
            remapped_instruments += 1;
        }
    }

    for remap in &remaps {
        info!(
            module = %remap.module,
            "Driver id changed {} -> {}", remap.old_id, remap.new_id
        );
    }
    debug!("Driver table rebuilt with {} entries", table.len());

    doc.driver = table;
    RebuildOutcome {
        index,
        remaps,
        remapped_instruments,
    }
}

/// Scans `dir` and applies [`rebuild`] to `doc`.
pub fn rescan(
    doc: &mut RegistryDocument,
    dir: &Path,
    namespace: &str,
    catalog: &DriverCatalog,
) -> RebuildOutcome {
    let scanned = scanner::scan_directory(dir);
    rebuild(doc, &scanned, namespace, catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYNTH_V1: &str = r#"
pub struct Synth;
impl Synth {
    pub fn set_frequency(&self, hz: f64) {}
}
impl Driver for Synth {
    fn initialize(&self) -> InitReport { InitReport::ok("") }
    fn shutdown(&self) {}
    fn is_opened(&self) -> bool { true }
}
"#;

    fn scanned(module: &str, class_name: &str) -> ScannedDriver {
        let src = SYNTH_V1.replace("Synth", class_name);
        scanner::scan_source(&format!("{module}.rs"), module, &src).remove(0)
    }

    fn instrument(name: &str, driver_id: &str) -> InstrumentConfig {
        let mut cfg = InstrumentConfig::new(name, driver_id);
        cfg.id = Some(identity::instrument_id(name, driver_id));
        cfg
    }

    #[test]
    fn rebuild_fills_table_and_index() {
        let mut doc = RegistryDocument::default();
        let catalog = DriverCatalog::new();
        let out = rebuild(&mut doc, &[scanned("synth", "Synth")], "drivers", &catalog);

        let id = identity::driver_id("drivers", "synth");
        assert_eq!(doc.driver.len(), 1);
        assert_eq!(doc.driver[0].id, id);
        assert_eq!(doc.driver[0].function, vec!["set_frequency".to_string()]);
        assert!(!doc.driver[0].available);
        assert_eq!(out.index.get(&id).map(|e| e.class_name.as_str()), Some("Synth"));
        assert!(out.remaps.is_empty());
    }

    #[test]
    fn type_rename_keeps_id_and_causes_no_remap() {
        let mut doc = RegistryDocument::default();
        let catalog = DriverCatalog::new();
        rebuild(&mut doc, &[scanned("synth", "Synth")], "drivers", &catalog);
        let before = doc.driver[0].id.clone();

        let out = rebuild(&mut doc, &[scanned("synth", "RfSynth")], "drivers", &catalog);
        assert_eq!(doc.driver[0].id, before);
        assert_eq!(doc.driver[0].name, "RfSynth");
        assert!(out.remaps.is_empty());
    }

    #[test]
    fn namespace_change_remaps_instruments() {
        let mut doc = RegistryDocument::default();
        let catalog = DriverCatalog::new();
        rebuild(&mut doc, &[scanned("synth", "Synth")], "drivers", &catalog);
        let old_id = doc.driver[0].id.clone();
        doc.instrument.push(instrument("SG1", &old_id));
        doc.instrument.push(instrument("other", "unrelated"));

        let out = rebuild(&mut doc, &[scanned("synth", "Synth")], "lab.drivers", &catalog);
        let new_id = identity::driver_id("lab.drivers", "synth");
        assert_eq!(out.remaps.len(), 1);
        assert_eq!(out.remapped_instruments, 1);
        assert_eq!(doc.instrument[0].driver_id, new_id);
        assert_eq!(doc.instrument[1].driver_id, "unrelated");
        // instrument ids are never recomputed
        assert_eq!(doc.instrument[0].id, Some(identity::instrument_id("SG1", &old_id)));
    }

    #[test]
    fn rebuild_is_idempotent() {
        let mut doc = RegistryDocument::default();
        let catalog = DriverCatalog::new();
        let scan = vec![scanned("synth", "Synth"), scanned("dac", "Dac")];
        rebuild(&mut doc, &scan, "drivers", &catalog);
        let first = doc.clone();
        let out = rebuild(&mut doc, &scan, "drivers", &catalog);
        assert_eq!(doc, first);
        assert!(out.remaps.is_empty());
    }

    #[test]
    fn vanished_module_drops_out_of_the_table() {
        let mut doc = RegistryDocument::default();
        let catalog = DriverCatalog::new();
        rebuild(&mut doc, &[scanned("synth", "Synth"), scanned("dac", "Dac")], "drivers", &catalog);
        let out = rebuild(&mut doc, &[scanned("dac", "Dac")], "drivers", &catalog);
        assert_eq!(doc.driver.len(), 1);
        assert!(!out.index.contains(&identity::driver_id("drivers", "synth")));
    }
}
