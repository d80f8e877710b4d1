//! Gateway aggregate.
//!
//! One [`Gateway`] owns everything that used to be process-global: the registry
//! document store, the in-memory driver index, and the lifecycle manager with its live
//! driver objects. It is built once at startup, shared behind an `Arc`, and torn down
//! with [`Gateway::shutdown`].
//!
//! All management operations live here; the network front end and the RPC dispatcher
//! are thin layers over them.
//!
//! # Document access
//!
//! Every read or change of the registry document is one load/modify/save cycle under
//! the document mutex. Those cycles (and the rescans inside them) do file I/O and
//! source parsing, so they run on the blocking pool via `spawn_blocking`; the mutex is
//! never held on an async worker and never across an `.await`. Driver calls happen
//! outside it.

use crate::config::GatewayConfig;
use crate::driver::DriverCatalog;
use crate::drivers;
use crate::error::{AppResult, GatewayError};
use crate::identity;
use crate::lifecycle::{ConnectPlan, InstrumentManager, ObservedState};
use crate::registry::{
    self, DriverIndex, DriverRecord, IdRemap, InstrumentConfig, InstrumentStateRecord,
    RegistryDocument, RegistryStore,
};
use crate::scanner::PACKAGE_INITIALIZERS;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a driver rescan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    /// The rebuilt driver table
    pub drivers: Vec<DriverRecord>,
    /// Modules whose id changed
    pub remaps: Vec<IdRemap>,
}

/// One instrument as reported by [`Gateway::list_instruments`].
///
/// `connect` carries the live check result rather than the configured desired state.
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentView {
    /// Persisted configuration, flattened into the view
    #[serde(flatten)]
    pub config: InstrumentConfig,
    /// Function names of the instrument's driver
    pub allowed_capabilities: Vec<String>,
    /// Live state from this listing's liveness check
    pub observed: ObservedState,
    /// Row of the refreshed state table
    pub state: Option<InstrumentStateRecord>,
}

/// Counts reported by the `health` operation.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Configured application name
    pub name: String,
    /// Rows in the driver table
    pub drivers: usize,
    /// Configured instruments
    pub instruments: usize,
    /// Instruments holding a live handle
    pub connected: usize,
}

/// Paths and namespace the gateway works with.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Application name reported by `health`
    pub name: String,
    /// Directory of driver sources
    pub driver_dir: PathBuf,
    /// Namespace driver ids are derived under
    pub namespace: String,
    /// Registry document path
    pub registry_file: PathBuf,
}

impl From<&GatewayConfig> for GatewaySettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            name: config.application.name.clone(),
            driver_dir: config.drivers.directory.clone(),
            namespace: config.drivers.namespace.clone(),
            registry_file: config.registry.file.clone(),
        }
    }
}

/// Document store, driver index and catalog; shared with blocking tasks.
struct RegistryState {
    settings: GatewaySettings,
    store: RegistryStore,
    document: Mutex<()>,
    index: RwLock<DriverIndex>,
    catalog: Arc<DriverCatalog>,
}

impl RegistryState {
    fn read(&self) -> AppResult<RegistryDocument> {
        let _guard = self.document.lock();
        self.store.load()
    }

    /// One load/modify/save cycle. Nothing is written when `f` fails.
    fn update<T>(
        &self,
        f: impl FnOnce(&Self, &mut RegistryDocument) -> AppResult<T>,
    ) -> AppResult<T> {
        let _guard = self.document.lock();
        let mut doc = self.store.load()?;
        let out = f(self, &mut doc)?;
        self.store.save(&doc)?;
        Ok(out)
    }

    /// Rescan inside an open document cycle.
    fn rescan_into(&self, doc: &mut RegistryDocument) -> ScanSummary {
        let outcome = registry::rescan(
            doc,
            &self.settings.driver_dir,
            &self.settings.namespace,
            &self.catalog,
        );
        *self.index.write() = outcome.index;
        ScanSummary {
            drivers: doc.driver.clone(),
            remaps: outcome.remaps,
        }
    }

    fn functions_of(&self, driver_id: &str) -> Option<Vec<String>> {
        self.index
            .read()
            .get(driver_id)
            .map(|entry| entry.functions.clone())
    }

    fn plan_for(&self, config: &InstrumentConfig) -> ConnectPlan {
        ConnectPlan {
            driver_id: config.driver_id.clone(),
            module: self
                .index
                .read()
                .get(&config.driver_id)
                .map(|entry| entry.module.clone()),
            init: config.init_call_args(),
            capabilities: config.capabilities.clone(),
        }
    }
}

/// Runs file I/O and parsing on the blocking pool.
async fn offload<T, F>(f: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> AppResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| GatewayError::Io(std::io::Error::other(format!("registry task failed: {e}"))))?
}

/// Owner of the registry and every live instrument.
pub struct Gateway {
    registry: Arc<RegistryState>,
    manager: InstrumentManager,
}

impl Gateway {
    /// Gateway over `catalog`; the driver index is seeded from the persisted table.
    pub fn new(settings: GatewaySettings, catalog: DriverCatalog) -> AppResult<Self> {
        let store = RegistryStore::new(&settings.registry_file);
        let doc = store.load()?;
        let catalog = Arc::new(catalog);
        Ok(Self {
            registry: Arc::new(RegistryState {
                index: RwLock::new(DriverIndex::from_records(&doc.driver)),
                store,
                document: Mutex::new(()),
                catalog: catalog.clone(),
                settings,
            }),
            manager: InstrumentManager::new(catalog),
        })
    }

    /// Gateway with the built-in drivers, configured from `config`.
    pub fn from_config(config: &GatewayConfig) -> AppResult<Self> {
        let catalog = drivers::builtin_catalog(config.drivers.library_paths.clone());
        Self::new(GatewaySettings::from(config), catalog)
    }

    /// Paths and namespace in use.
    pub fn settings(&self) -> &GatewaySettings {
        &self.registry.settings
    }

    /// Lifecycle manager holding the live handles.
    pub fn manager(&self) -> &InstrumentManager {
        &self.manager
    }

    /// Snapshot of the persisted document.
    pub async fn read_document(&self) -> AppResult<RegistryDocument> {
        let registry = self.registry.clone();
        offload(move || registry.read()).await
    }

    async fn update_document<T, F>(&self, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&RegistryState, &mut RegistryDocument) -> AppResult<T> + Send + 'static,
    {
        let registry = self.registry.clone();
        offload(move || registry.update(f)).await
    }

    // ---------------------------------------------------------------------
    // Startup / shutdown
    // ---------------------------------------------------------------------

    /// Rescans drivers and connects every instrument whose desired state is connected.
    ///
    /// Failures are recorded per instrument and never abort startup. Capability calls
    /// naming functions the driver does not expose are skipped.
    pub async fn start(&self) -> AppResult<()> {
        let summary = self
            .update_document(|reg, doc| Ok(reg.rescan_into(doc)))
            .await?;
        info!(
            "Discovered {} driver(s) in {}",
            summary.drivers.len(),
            self.registry.settings.driver_dir.display()
        );

        let doc = self.read_document().await?;
        for inst in doc.instrument.iter().filter(|it| it.connect) {
            let Some(id) = inst.id.clone() else {
                continue;
            };
            let mut plan = self.registry.plan_for(inst);
            if let Some(functions) = self.registry.functions_of(&inst.driver_id) {
                plan.capabilities.retain(|cap| {
                    let known = functions.contains(&cap.driver);
                    if !known {
                        warn!(instrument = %id, "Skipping unknown capability '{}'", cap.driver);
                    }
                    known
                });
            }
            if let Err(e) = self.manager.connect(&id, &plan).await {
                warn!(instrument = %id, "Auto-connect failed: {}", e);
            }
        }

        self.refresh_state_table().await?;
        Ok(())
    }

    /// Disconnects every live handle and records the final state.
    pub async fn shutdown(&self) {
        self.manager.shutdown_all().await;
        if let Err(e) = self.refresh_state_table().await {
            warn!("Could not write final instrument state: {}", e);
        }
    }

    /// Registry counts and the number of live handles.
    pub async fn health(&self) -> AppResult<HealthReport> {
        let doc = self.read_document().await?;
        Ok(HealthReport {
            name: self.registry.settings.name.clone(),
            drivers: doc.driver.len(),
            instruments: doc.instrument.len(),
            connected: self.manager.live_ids().len(),
        })
    }

    // ---------------------------------------------------------------------
    // Drivers
    // ---------------------------------------------------------------------

    /// The persisted driver table.
    pub async fn list_drivers(&self) -> AppResult<Vec<DriverRecord>> {
        Ok(self.read_document().await?.driver)
    }

    /// Rebuilds the driver table from the driver directory.
    pub async fn scan_drivers(&self) -> AppResult<ScanSummary> {
        let summary = self
            .update_document(|reg, doc| Ok(reg.rescan_into(doc)))
            .await?;
        self.refresh_state_table().await?;
        Ok(summary)
    }

    /// Writes a driver source file into the driver directory and rescans.
    pub async fn put_driver_file(&self, filename: &str, content: &str) -> AppResult<ScanSummary> {
        validate_driver_filename(filename)?;
        let dir = self.registry.settings.driver_dir.clone();
        let path = dir.join(filename);
        let content = content.to_string();
        offload(move || {
            std::fs::create_dir_all(&dir)?;
            std::fs::write(&path, content)?;
            Ok(())
        })
        .await?;
        info!("Driver file {} written", filename);
        self.scan_drivers().await
    }

    /// Removes a driver record, and its source file when `delete_file` is set.
    ///
    /// The table is rebuilt from the directory afterwards, so a driver whose file is
    /// kept comes straight back.
    pub async fn delete_driver(&self, driver_id: &str, delete_file: bool) -> AppResult<ScanSummary> {
        let driver_id = driver_id.to_string();
        let summary = self
            .update_document(move |reg, doc| {
                if doc.instrument.iter().any(|it| it.driver_id == driver_id) {
                    return Err(GatewayError::DriverInUse(driver_id));
                }
                let target = doc
                    .find_driver(&driver_id)
                    .cloned()
                    .ok_or_else(|| GatewayError::NotFound("Driver".to_string()))?;
                doc.driver.retain(|d| d.id != driver_id);

                if delete_file {
                    let path = reg.settings.driver_dir.join(&target.file);
                    match std::fs::remove_file(&path) {
                        Ok(()) => info!("Deleted driver file {}", path.display()),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(reg.rescan_into(doc))
            })
            .await?;
        self.refresh_state_table().await?;
        Ok(summary)
    }

    // ---------------------------------------------------------------------
    // Instruments
    // ---------------------------------------------------------------------

    /// Resolves an instrument reference by id first, then by name.
    pub async fn resolve(&self, id_or_name: &str) -> AppResult<String> {
        self.read_document()
            .await?
            .resolve_instrument(id_or_name)
            .ok_or_else(|| GatewayError::NotFound("Instrument".to_string()))
    }

    /// Connect plan for a configured instrument id.
    pub async fn connect_plan(&self, id: &str) -> AppResult<ConnectPlan> {
        let doc = self.read_document().await?;
        let config = doc
            .find_instrument(id)
            .ok_or_else(|| GatewayError::NotFound("Instrument".to_string()))?;
        Ok(self.registry.plan_for(config))
    }

    /// Configured instruments with their allowed capabilities and live state.
    ///
    /// Each instrument is checked once; the same result feeds the state table and the
    /// view.
    pub async fn list_instruments(&self) -> AppResult<Vec<InstrumentView>> {
        let doc = self.read_document().await?;
        let observed = self.observe_all(&doc.instrument).await;
        let states = self.write_state_table(&doc.instrument, &observed).await?;

        let mut out = Vec::with_capacity(doc.instrument.len());
        for inst in doc.instrument {
            let id = inst.id.clone().unwrap_or_default();
            let allowed_capabilities = doc
                .driver
                .iter()
                .find(|d| d.id == inst.driver_id)
                .map(|d| d.function.clone())
                .unwrap_or_default();
            let state = states.iter().find(|s| s.nameid == id).cloned();
            let mut config = inst;
            config.connect = state.as_ref().map(|s| s.connect).unwrap_or(false);
            out.push(InstrumentView {
                config,
                allowed_capabilities,
                observed: observed.get(&id).copied().unwrap_or(ObservedState::NotFound),
                state,
            });
        }
        Ok(out)
    }

    /// Observable state of an instrument reference; unknown references are `NotFound`.
    pub async fn observed_state(&self, id_or_name: &str) -> AppResult<ObservedState> {
        match self.read_document().await?.resolve_instrument(id_or_name) {
            Some(id) => Ok(self.manager.observed_state(&id).await),
            None => Ok(ObservedState::NotFound),
        }
    }

    /// Creates or updates an instrument, then brings the runtime in line with its
    /// desired `connect` state.
    ///
    /// Validation happens before anything is written. A failed reconnect does not fail
    /// the upsert; it shows up as the instrument's last error.
    pub async fn upsert_instrument(&self, mut config: InstrumentConfig) -> AppResult<InstrumentConfig> {
        let functions = self.registry.functions_of(&config.driver_id).ok_or_else(|| {
            GatewayError::Configuration(format!("Unknown driverId: {}", config.driver_id))
        })?;
        if let Some(cap) = config.capabilities.iter().find(|c| !functions.contains(&c.driver)) {
            return Err(GatewayError::Configuration(format!(
                "Capability '{}' not in driver functions",
                cap.driver
            )));
        }

        let stored = self
            .update_document(move |_, doc| {
                let clash = doc.instrument.iter().any(|it| {
                    it.name == config.name && (config.id.is_none() || it.id != config.id)
                });
                if clash {
                    return Err(GatewayError::NameConflict(config.name.clone()));
                }
                if config.id.is_none() {
                    config.id = Some(identity::instrument_id(&config.name, &config.driver_id));
                }
                config.apply_port_mapping();

                match doc.instrument.iter_mut().find(|it| it.id == config.id) {
                    Some(existing) => *existing = config.clone(),
                    None => doc.instrument.push(config.clone()),
                }
                Ok(config)
            })
            .await?;

        let id = stored.id.clone().unwrap_or_default();
        info!(instrument = %id, name = %stored.name, "Instrument configuration saved");
        self.manager.disconnect(&id).await;
        if stored.connect {
            if let Err(e) = self.manager.connect(&id, &self.registry.plan_for(&stored)).await {
                warn!(instrument = %id, "Connect after upsert failed: {}", e);
            }
        }

        self.refresh_state_table().await?;
        Ok(stored)
    }

    /// Deletes an instrument, force-disconnecting it first.
    pub async fn remove_instrument(&self, id_or_name: &str) -> AppResult<()> {
        let id = self.resolve(id_or_name).await?;
        self.manager.disconnect(&id).await;
        let target = id.clone();
        self.update_document(move |_, doc| {
            let before = doc.instrument.len();
            doc.instrument.retain(|it| it.id.as_deref() != Some(target.as_str()));
            if doc.instrument.len() == before {
                return Err(GatewayError::NotFound("Instrument".to_string()));
            }
            Ok(())
        })
        .await?;
        self.manager.forget(&id).await;
        info!(instrument = %id, "Instrument removed");
        self.refresh_state_table().await?;
        Ok(())
    }

    /// Explicit connect; failures surface as `Connection` errors.
    pub async fn connect(&self, id_or_name: &str) -> AppResult<ObservedState> {
        let id = self.resolve(id_or_name).await?;
        let plan = self.connect_plan(&id).await?;
        let result = self.manager.connect(&id, &plan).await;
        self.refresh_state_table().await?;
        result?;
        Ok(self.manager.observed_state(&id).await)
    }

    /// Releases the live handle; repeatable.
    pub async fn disconnect(&self, id_or_name: &str) -> AppResult<ObservedState> {
        let id = self.resolve(id_or_name).await?;
        self.manager.disconnect(&id).await;
        self.refresh_state_table().await?;
        Ok(self.manager.observed_state(&id).await)
    }

    /// Disconnect followed by an explicit connect.
    pub async fn reconnect(&self, id_or_name: &str) -> AppResult<ObservedState> {
        let id = self.resolve(id_or_name).await?;
        self.manager.disconnect(&id).await;
        self.connect(&id).await
    }

    /// Most recent error recorded for an instrument reference.
    pub async fn last_error(&self, id_or_name: &str) -> AppResult<Option<String>> {
        let id = self.resolve(id_or_name).await?;
        Ok(self.manager.last_error(&id))
    }

    /// Rewrites `instrument_state` from liveness checks and returns it.
    pub async fn refresh_state_table(&self) -> AppResult<Vec<InstrumentStateRecord>> {
        let instruments = self.read_document().await?.instrument;
        let observed = self.observe_all(&instruments).await;
        self.write_state_table(&instruments, &observed).await
    }

    /// One liveness check per configured instrument.
    async fn observe_all(&self, instruments: &[InstrumentConfig]) -> HashMap<String, ObservedState> {
        let mut observed = HashMap::with_capacity(instruments.len());
        for id in instruments.iter().filter_map(|inst| inst.id.as_ref()) {
            observed.insert(id.clone(), self.manager.observed_state(id).await);
        }
        observed
    }

    async fn write_state_table(
        &self,
        instruments: &[InstrumentConfig],
        observed: &HashMap<String, ObservedState>,
    ) -> AppResult<Vec<InstrumentStateRecord>> {
        let table: Vec<InstrumentStateRecord> = instruments
            .iter()
            .filter_map(|inst| {
                let id = inst.id.clone()?;
                let state = observed.get(&id).copied()?;
                Some(InstrumentStateRecord {
                    driverid: inst.driver_id.clone(),
                    connect: state.is_connected(),
                    last_error: self.manager.last_error(&id),
                    nameid: id,
                })
            })
            .collect();

        self.update_document(move |_, doc| {
            doc.instrument_state = table
                .into_iter()
                .filter(|s| doc.find_instrument(&s.nameid).is_some())
                .collect();
            Ok(doc.instrument_state.clone())
        })
        .await
    }
}

/// Only bare `*.rs` names that are not package initializers are accepted.
fn validate_driver_filename(filename: &str) -> AppResult<()> {
    let bare = !filename.is_empty()
        && !filename.contains(['/', '\\'])
        && filename != ".."
        && !filename.starts_with('.');
    if !bare {
        return Err(GatewayError::Configuration(format!(
            "Invalid driver file name '{filename}'"
        )));
    }
    if !filename.ends_with(".rs") || filename.len() <= ".rs".len() {
        return Err(GatewayError::Configuration(
            "Only .rs files are allowed".to_string(),
        ));
    }
    if PACKAGE_INITIALIZERS.contains(&filename) {
        return Err(GatewayError::Configuration(format!(
            "'{filename}' is a package initializer, not a driver"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings(root: &std::path::Path) -> GatewaySettings {
        GatewaySettings {
            name: "Test Gateway".to_string(),
            driver_dir: root.join("drivers"),
            namespace: "drivers".to_string(),
            registry_file: root.join("registry.json"),
        }
    }

    #[tokio::test]
    async fn document_cycles_leave_the_runtime_free() {
        let root = tempfile::tempdir().unwrap();
        let gateway = Arc::new(Gateway::new(settings(root.path()), DriverCatalog::new()).unwrap());

        let guard = gateway.registry.document.lock();
        let reader = tokio::spawn({
            let gateway = gateway.clone();
            async move { gateway.read_document().await }
        });

        // The single runtime thread keeps running while the read waits on the mutex.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reader.is_finished());

        drop(guard);
        let doc = reader.await.unwrap().unwrap();
        assert!(doc.instrument.is_empty());
    }

    #[test]
    fn driver_file_names_are_restricted() {
        assert!(validate_driver_filename("sim_laser.rs").is_ok());
        for bad in ["", "../evil.rs", "a/b.rs", "a\\b.rs", ".hidden.rs", "notes.txt", ".rs", "mod.rs", "lib.rs"] {
            let err = validate_driver_filename(bad).unwrap_err();
            assert_eq!(err.status(), 400, "{bad}");
        }
    }
}
