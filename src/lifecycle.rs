//! Instrument Lifecycle Manager
//!
//! Owns the live driver objects and drives them through
//! `disconnected → connecting → connected | connect_failed`.
//!
//! ## Locking
//!
//! Every instrument id gets an [`InstrumentSlot`] holding an async gate and the current
//! driver object. The gate is held for the full duration of a connect, a disconnect or
//! an RPC call, so transitions and calls on one instrument never interleave, while
//! different instruments never contend. Liveness checks read the driver object without taking
//! the gate.
//!
//! ## Blocking calls
//!
//! Driver methods perform hardware I/O and block. They run on the blocking pool via
//! `spawn_blocking`; a panic inside a driver comes back as a `JoinError` and is
//! handled exactly like a returned [`DriverError`].

use crate::driver::{CallArgs, DriverCatalog, Instrument};
use crate::error::{AppResult, DriverError, DriverErrorKind, GatewayError};
use crate::registry::CapabilityCall;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Observable state of a configured instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservedState {
    /// No instrument with that id
    NotFound,
    /// Configured but not connected
    Disconnected,
    /// Live handle reports open
    Connected,
    /// Last connect failed or the handle stopped responding
    ConnectFailed,
}

impl ObservedState {
    /// True only for [`ObservedState::Connected`].
    pub fn is_connected(self) -> bool {
        self == ObservedState::Connected
    }
}

/// Result of asking a live driver whether it is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveCheck {
    /// No live handle
    Absent,
    /// Driver reports open
    Opened,
    /// Driver reports closed
    Closed,
    /// The check itself panicked
    Faulted(String),
}

/// Everything needed to bring an instrument up.
#[derive(Debug, Clone)]
pub struct ConnectPlan {
    /// Driver the instrument is configured with
    pub driver_id: String,
    /// Module behind `driver_id`; `None` when the id is not in the driver index
    pub module: Option<String>,
    /// Constructor arguments after port mapping
    pub init: CallArgs,
    /// Applied in order after `initialize`
    pub capabilities: Vec<CapabilityCall>,
}

struct InstrumentSlot {
    gate: tokio::sync::Mutex<()>,
    device: RwLock<Option<Arc<dyn Instrument>>>,
}

impl InstrumentSlot {
    fn new() -> Self {
        Self {
            gate: tokio::sync::Mutex::new(()),
            device: RwLock::new(None),
        }
    }

    fn current(&self) -> Option<Arc<dyn Instrument>> {
        self.device.read().clone()
    }
}

/// Runtime owner of all instrument handles.
pub struct InstrumentManager {
    catalog: Arc<DriverCatalog>,
    slots: Mutex<HashMap<String, Arc<InstrumentSlot>>>,
    errors: Mutex<HashMap<String, String>>,
    failed: Mutex<HashSet<String>>,
}

impl InstrumentManager {
    /// Manager instantiating drivers from `catalog`.
    pub fn new(catalog: Arc<DriverCatalog>) -> Self {
        Self {
            catalog,
            slots: Mutex::new(HashMap::new()),
            errors: Mutex::new(HashMap::new()),
            failed: Mutex::new(HashSet::new()),
        }
    }

    /// Plugins available to this manager.
    pub fn catalog(&self) -> &DriverCatalog {
        &self.catalog
    }

    fn slot(&self, id: &str) -> Arc<InstrumentSlot> {
        self.slots
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(InstrumentSlot::new()))
            .clone()
    }

    fn existing_slot(&self, id: &str) -> Option<Arc<InstrumentSlot>> {
        self.slots.lock().get(id).cloned()
    }

    fn record_error(&self, id: &str, message: impl Into<String>) {
        self.errors.lock().insert(id.to_string(), message.into());
    }

    /// Most recent error recorded for `id`.
    pub fn last_error(&self, id: &str) -> Option<String> {
        self.errors.lock().get(id).cloned()
    }

    /// True when a live handle exists for `id`.
    pub fn is_live(&self, id: &str) -> bool {
        self.existing_slot(id)
            .map(|slot| slot.current().is_some())
            .unwrap_or(false)
    }

    /// Ids that currently hold a live handle.
    pub fn live_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.current().is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Tears down any existing handle and connects `id` according to `plan`.
    pub async fn connect(&self, id: &str, plan: &ConnectPlan) -> AppResult<()> {
        let slot = self.slot(id);
        let _gate = slot.gate.lock().await;
        self.connect_locked(id, &slot, plan)
            .await
            .map(|_| ())
            .map_err(GatewayError::Connection)
    }

    /// Connect transition; the caller holds the slot gate.
    async fn connect_locked(
        &self,
        id: &str,
        slot: &InstrumentSlot,
        plan: &ConnectPlan,
    ) -> Result<Arc<dyn Instrument>, String> {
        self.teardown(id, slot).await;
        self.failed.lock().remove(id);

        let device = match self.instantiate(plan).await {
            Ok(device) => device,
            Err(message) => {
                warn!(instrument = %id, "Driver construction failed: {}", message);
                self.mark_failed(id, &message);
                return Err(message);
            }
        };

        let init_target = device.clone();
        let report = match blocking(device.driver_module(), move || init_target.initialize()).await {
            Ok(report) => report,
            Err(e) => {
                let message = e.to_string();
                warn!(instrument = %id, "initialize() panicked: {}", message);
                self.mark_failed(id, &message);
                return Err(message);
            }
        };
        if !report.ok {
            warn!(instrument = %id, "initialize() failed: {}", report.message);
            self.mark_failed(id, &report.message);
            return Err(report.message);
        }

        *slot.device.write() = Some(device.clone());
        self.errors.lock().remove(id);
        info!(instrument = %id, module = %device.driver_module(), "Instrument connected");

        for cap in &plan.capabilities {
            let target = device.clone();
            let name = cap.driver.clone();
            let args = cap.call_args();
            let outcome = blocking(device.driver_module(), move || target.call(&name, &args))
                .await
                .and_then(|result| result);
            if let Err(e) = outcome {
                let message = format!("Capability '{}' failed: {}", cap.driver, e);
                warn!(instrument = %id, "{}", message);
                self.record_error(id, message);
            }
        }

        Ok(device)
    }

    async fn instantiate(&self, plan: &ConnectPlan) -> Result<Arc<dyn Instrument>, String> {
        let module = plan
            .module
            .clone()
            .ok_or_else(|| format!("Driver {} not found", plan.driver_id))?;
        let catalog = self.catalog.clone();
        let init = plan.init.clone();
        let target = module.clone();
        blocking(&module, move || catalog.instantiate(&target, &init))
            .await
            .and_then(|result| result)
            .map_err(|e| e.message)
    }

    fn mark_failed(&self, id: &str, message: &str) {
        self.record_error(id, message);
        self.failed.lock().insert(id.to_string());
    }

    /// Shuts down and drops the handle held in `slot`, if any.
    async fn teardown(&self, id: &str, slot: &InstrumentSlot) {
        let taken = slot.device.write().take();
        let Some(device) = taken else {
            return;
        };
        let module = device.driver_module().to_string();
        if let Err(e) = blocking(&module, move || device.shutdown()).await {
            warn!(instrument = %id, "shutdown() panicked, handle dropped anyway: {}", e);
        }
        debug!(instrument = %id, "Instrument handle released");
    }

    /// Releases the live handle. Repeatable; a missing handle is a no-op.
    pub async fn disconnect(&self, id: &str) {
        let Some(slot) = self.existing_slot(id) else {
            return;
        };
        let _gate = slot.gate.lock().await;
        self.teardown(id, &slot).await;
        self.failed.lock().remove(id);
    }

    /// Disconnects and forgets everything known about `id`.
    pub async fn forget(&self, id: &str) {
        self.disconnect(id).await;
        self.slots.lock().remove(id);
        self.errors.lock().remove(id);
        self.failed.lock().remove(id);
    }

    /// Asks the live driver whether it is open. Does not take the gate.
    pub async fn check_live(&self, id: &str) -> LiveCheck {
        let Some(device) = self.existing_slot(id).and_then(|slot| slot.current()) else {
            return LiveCheck::Absent;
        };
        let module = device.driver_module().to_string();
        match blocking(&module, move || device.is_opened()).await {
            Ok(true) => LiveCheck::Opened,
            Ok(false) => LiveCheck::Closed,
            Err(e) => {
                self.record_error(id, e.message.clone());
                LiveCheck::Faulted(e.message)
            }
        }
    }

    /// Live observable state of a configured instrument.
    pub async fn observed_state(&self, id: &str) -> ObservedState {
        match self.check_live(id).await {
            LiveCheck::Opened => ObservedState::Connected,
            LiveCheck::Faulted(_) => ObservedState::ConnectFailed,
            LiveCheck::Absent | LiveCheck::Closed => {
                if self.failed.lock().contains(id) {
                    ObservedState::ConnectFailed
                } else {
                    ObservedState::Disconnected
                }
            }
        }
    }

    /// Calls `command` on the instrument, connecting it first when no handle is live.
    pub async fn invoke(
        &self,
        id: &str,
        plan: &ConnectPlan,
        command: &str,
        args: CallArgs,
    ) -> AppResult<Value> {
        let slot = self.slot(id);
        let _gate = slot.gate.lock().await;

        let device = match slot.current() {
            Some(device) => device,
            None => {
                debug!(instrument = %id, "No live handle, reconnecting for RPC");
                self.connect_locked(id, &slot, plan)
                    .await
                    .map_err(GatewayError::ServiceUnavailable)?
            }
        };

        if !device.has_command(command) {
            return Err(GatewayError::CommandNotFound(command.to_string()));
        }

        let target = device.clone();
        let name = command.to_string();
        match blocking(device.driver_module(), move || target.call(&name, &args)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) | Err(e) => {
                warn!(instrument = %id, command, "RPC failed: {}", e);
                self.record_error(id, e.message.clone());
                Err(GatewayError::Execution(e.message))
            }
        }
    }

    /// Disconnects every live handle.
    pub async fn shutdown_all(&self) {
        for id in self.live_ids() {
            self.disconnect(&id).await;
        }
        info!("All instruments disconnected");
    }
}

/// Runs a blocking driver call, turning a panic into a [`DriverError`].
async fn blocking<T, F>(module: &str, f: F) -> Result<T, DriverError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        let message = if e.is_panic() {
            panic_message(e.into_panic())
        } else {
            "driver call cancelled".to_string()
        };
        DriverError::new(module, DriverErrorKind::Panicked, message)
    })
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "driver panicked".to_string()
    }
}
