//! Persisted registry document.
//!
//! The whole registry (driver table, instrument list, derived state table) lives in a
//! single JSON document. Every change is a whole-document read/modify/write; the write
//! goes to a sibling temp file first and is renamed into place so readers never see a
//! half-written file.

use crate::driver::CallArgs;
use crate::error::AppResult;
use crate::scanner::{ParamMeta, ScannedFunction};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Root of the persisted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryDocument {
    /// Driver table
    #[serde(default)]
    pub driver: Vec<DriverRecord>,
    /// Configured instruments
    #[serde(default)]
    pub instrument: Vec<InstrumentConfig>,
    /// Derived state table
    #[serde(default)]
    pub instrument_state: Vec<InstrumentStateRecord>,
}

impl RegistryDocument {
    /// Instrument by id.
    pub fn find_instrument(&self, id: &str) -> Option<&InstrumentConfig> {
        self.instrument.iter().find(|it| it.id.as_deref() == Some(id))
    }

    /// Driver record by id.
    pub fn find_driver(&self, id: &str) -> Option<&DriverRecord> {
        self.driver.iter().find(|d| d.id == id)
    }

    /// Resolves an instrument reference: id membership first, then the name index.
    pub fn resolve_instrument(&self, id_or_name: &str) -> Option<String> {
        if self.find_instrument(id_or_name).is_some() {
            return Some(id_or_name.to_string());
        }
        self.instrument
            .iter()
            .find(|it| it.name == id_or_name)
            .and_then(|it| it.id.clone())
    }
}

/// One row of the driver table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRecord {
    /// UUIDv5 of namespace and module
    pub id: String,
    /// File name inside the driver directory
    pub file: String,
    /// Module (file stem)
    pub module: String,
    /// Type name of the driver
    pub name: String,
    /// Exposed function names
    pub function: Vec<String>,
    /// Scanned constructor and method metadata
    pub meta: DriverMeta,
    /// False when the catalog cannot instantiate the module
    #[serde(default = "default_available")]
    pub available: bool,
    /// Why the module is unavailable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable_reason: Option<String>,
}

fn default_available() -> bool {
    true
}

/// Scanned metadata stored with a driver record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverMeta {
    /// Doc comment of the driver type
    pub class_doc: Option<String>,
    /// Constructor parameters
    pub init: InitMeta,
    /// Exposed methods
    pub functions: Vec<ScannedFunction>,
}

/// Constructor parameters split by binding style.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitMeta {
    /// Required parameters
    pub positional_args: Vec<ParamMeta>,
    /// Optional parameters
    pub keyword_args: Vec<ParamMeta>,
}

/// A method call applied right after a successful connect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCall {
    /// Method name on the driver
    pub driver: String,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl CapabilityCall {
    /// Arguments for the capability call.
    pub fn call_args(&self) -> CallArgs {
        CallArgs::new(self.args.clone(), self.kwargs.clone())
    }
}

/// One configured instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Assigned from name and driver on first upsert
    #[serde(default)]
    pub id: Option<String>,
    /// Unique display name
    pub name: String,
    /// Driver the instrument is built from
    #[serde(rename = "driverId")]
    pub driver_id: String,
    /// Device path or address, mapped onto `devpath`/`port`
    #[serde(default)]
    pub port: Option<String>,
    /// Extra positional constructor arguments
    #[serde(default)]
    pub init_args: Vec<Value>,
    /// Extra keyword constructor arguments
    #[serde(default)]
    pub init_kwargs: Map<String, Value>,
    /// Desired state; connected at startup when true
    #[serde(default = "default_connect")]
    pub connect: bool,
    /// Calls applied after each connect
    #[serde(default)]
    pub capabilities: Vec<CapabilityCall>,
}

fn default_connect() -> bool {
    true
}

impl InstrumentConfig {
    /// Instrument with no port, arguments or capabilities.
    pub fn new(name: impl Into<String>, driver_id: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            driver_id: driver_id.into(),
            port: None,
            init_args: Vec::new(),
            init_kwargs: Map::new(),
            connect: true,
            capabilities: Vec::new(),
        }
    }

    /// Maps `port` onto the conventional constructor keywords without overwriting
    /// anything the caller supplied.
    pub fn apply_port_mapping(&mut self) {
        if let Some(port) = &self.port {
            for key in ["devpath", "port"] {
                self.init_kwargs
                    .entry(key)
                    .or_insert_with(|| Value::String(port.clone()));
            }
        }
    }

    /// Constructor arguments after port mapping.
    pub fn init_call_args(&self) -> CallArgs {
        let mut mapped = self.clone();
        mapped.apply_port_mapping();
        CallArgs::new(mapped.init_args, mapped.init_kwargs)
    }
}

/// Derived state row, rewritten on every state-affecting operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentStateRecord {
    /// Instrument id
    pub nameid: String,
    /// Driver id
    pub driverid: String,
    /// Live connection state
    pub connect: bool,
    /// Most recent connect or liveness failure
    pub last_error: Option<String>,
}

/// File-backed home of the [`RegistryDocument`].
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    /// Store backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document; a missing file is an empty registry.
    pub fn load(&self) -> AppResult<RegistryDocument> {
        if !self.path.exists() {
            return Ok(RegistryDocument::default());
        }
        let bytes = std::fs::read(&self.path)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(RegistryDocument::default());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Writes the whole document.
    pub fn save(&self, doc: &RegistryDocument) -> AppResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(doc)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_file_loads_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("instrument_gateway.json"));
        assert_eq!(store.load().unwrap(), RegistryDocument::default());
    }

    #[test]
    fn partial_document_gets_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(
            &path,
            r#"{"instrument": [{"id": "i1", "name": "HF1", "driverId": "d1"}]}"#,
        )
        .unwrap();
        let doc = RegistryStore::new(&path).load().unwrap();
        assert!(doc.driver.is_empty());
        assert!(doc.instrument_state.is_empty());
        let inst = &doc.instrument[0];
        assert!(inst.connect);
        assert!(inst.capabilities.is_empty());
    }

    #[test]
    fn save_writes_wire_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("nested").join("registry.json"));
        let mut doc = RegistryDocument::default();
        let mut inst = InstrumentConfig::new("HF1", "d1");
        inst.id = Some("i1".into());
        doc.instrument.push(inst);
        doc.instrument_state.push(InstrumentStateRecord {
            nameid: "i1".into(),
            driverid: "d1".into(),
            connect: false,
            last_error: None,
        });
        store.save(&doc).unwrap();

        let raw: Value = serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["instrument"][0]["driverId"], json!("d1"));
        assert_eq!(raw["instrument_state"][0]["nameid"], json!("i1"));
        assert_eq!(store.load().unwrap(), doc);
    }

    #[test]
    fn port_mapping_never_overwrites_caller_values() {
        let mut inst = InstrumentConfig::new("SG", "d1");
        inst.port = Some("/dev/ttyUSB0".into());
        inst.init_kwargs.insert("devpath".into(), json!("/dev/ttyACM3"));
        inst.apply_port_mapping();
        assert_eq!(inst.init_kwargs["devpath"], json!("/dev/ttyACM3"));
        assert_eq!(inst.init_kwargs["port"], json!("/dev/ttyUSB0"));
    }

    #[test]
    fn resolve_prefers_id_over_name() {
        let mut doc = RegistryDocument::default();
        let mut a = InstrumentConfig::new("alpha", "d1");
        a.id = Some("beta".into());
        let mut b = InstrumentConfig::new("beta", "d1");
        b.id = Some("b-id".into());
        doc.instrument = vec![a, b];

        assert_eq!(doc.resolve_instrument("beta").as_deref(), Some("beta"));
        assert_eq!(doc.resolve_instrument("alpha").as_deref(), Some("beta"));
        assert_eq!(doc.resolve_instrument("b-id").as_deref(), Some("b-id"));
        assert_eq!(doc.resolve_instrument("gamma"), None);
    }
}
