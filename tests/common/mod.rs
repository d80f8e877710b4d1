//! Shared fixtures for the gateway integration tests.
//!
//! Each test gets its own temp directory holding a driver source directory and a
//! registry file, plus a private catalog with a compiled `bench_rig` stub whose command
//! table matches the source written to disk.

#![allow(dead_code)]

use instrument_gateway::driver::{reply, CommandTable, Driver, DriverCatalog, DriverPlugin, InitReport};
use instrument_gateway::error::DriverError;
use instrument_gateway::gateway::{Gateway, GatewaySettings};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const RIG_MODULE: &str = "bench_rig";
pub const RIG_FILE: &str = "bench_rig.rs";

/// Source text of the stub driver as a driver author would write it.
pub const RIG_SOURCE: &str = r#"
/// Bench rig used by the integration tests.
pub struct BenchRig {
    port: Option<String>,
}

impl BenchRig {
    pub fn new(port: Option<String>, healthy: Option<bool>) -> Self {
        Self { port }
    }

    pub fn initialize(&self) {}
    pub fn shutdown(&self) {}
    pub fn is_opened(&self) -> bool { true }

    /// Liveness check.
    pub fn ping(&self) -> String {
        "pong".to_string()
    }

    /// Busy-waits for `millis`.
    pub fn hold(&self, millis: u64) {}

    pub fn set_level(&self, level: f64) {}

    pub fn get_port(&self) -> Option<String> {
        self.port.clone()
    }
}
"#;

/// Same driver with its type renamed; the module (and so the id) is unchanged.
pub fn renamed_rig_source() -> String {
    RIG_SOURCE.replace("BenchRig", "TestBench")
}

/// Concurrency bookkeeping shared by every `bench_rig` object of one harness.
#[derive(Default)]
pub struct RigStats {
    active: AtomicUsize,
    pub peak: AtomicUsize,
    pub constructed: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub is_opened_calls: AtomicUsize,
}

impl RigStats {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct BenchRig {
    port: Option<String>,
    healthy: bool,
    open: AtomicBool,
    stats: Arc<RigStats>,
}

impl Driver for BenchRig {
    fn initialize(&self) -> InitReport {
        if self.healthy {
            self.open.store(true, Ordering::SeqCst);
            InitReport::ok("bench rig ready")
        } else {
            InitReport::failed("no hardware")
        }
    }

    fn shutdown(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.stats.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_opened(&self) -> bool {
        self.stats.is_opened_calls.fetch_add(1, Ordering::SeqCst);
        self.open.load(Ordering::SeqCst)
    }
}

impl BenchRig {
    fn hold(&self, millis: u64) {
        let now = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(millis));
        self.stats.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn rig_plugin(stats: Arc<RigStats>) -> DriverPlugin {
    let table = CommandTable::new()
        .command("ping", &[], |_: &BenchRig, _| reply("pong"))
        .command("hold", &["millis"], |rig: &BenchRig, args| {
            rig.hold(args.required(0, "millis")?);
            Ok(Value::Null)
        })
        .command("set_level", &["level"], |_: &BenchRig, args| {
            let level: f64 = args.required(0, "level")?;
            if level < 0.0 {
                return Err(DriverError::invalid_parameter("level must be non-negative"));
            }
            Ok(Value::Null)
        })
        .command("get_port", &[], |rig: &BenchRig, _| reply(rig.port.clone()));

    DriverPlugin::new(RIG_MODULE, "BenchRig", table, move |args| {
        stats.constructed.fetch_add(1, Ordering::SeqCst);
        Ok(BenchRig {
            port: args.optional(0, "port")?,
            healthy: args.optional(1, "healthy")?.unwrap_or(true),
            open: AtomicBool::new(false),
            stats: stats.clone(),
        })
    })
}

/// A gateway over a temp directory.
pub struct Harness {
    pub root: TempDir,
    pub stats: Arc<RigStats>,
}

impl Harness {
    /// Fresh directory with the stub driver source in place.
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("Failed to create temp dir");
        std::fs::create_dir_all(root.path().join("drivers")).expect("Failed to create driver dir");
        std::fs::write(root.path().join("drivers").join(RIG_FILE), RIG_SOURCE)
            .expect("Failed to write driver source");
        Self {
            root,
            stats: Arc::new(RigStats::default()),
        }
    }

    pub fn driver_dir(&self) -> PathBuf {
        self.root.path().join("drivers")
    }

    pub fn registry_file(&self) -> PathBuf {
        self.root.path().join("registry.json")
    }

    pub fn settings(&self, namespace: &str) -> GatewaySettings {
        GatewaySettings {
            name: "Test Gateway".to_string(),
            driver_dir: self.driver_dir(),
            namespace: namespace.to_string(),
            registry_file: self.registry_file(),
        }
    }

    /// Gateway with the default namespace, already started.
    pub async fn gateway(&self) -> Gateway {
        self.gateway_in("drivers").await
    }

    pub async fn gateway_in(&self, namespace: &str) -> Gateway {
        let mut catalog = DriverCatalog::new();
        catalog.register(rig_plugin(self.stats.clone()));
        let gateway = Gateway::new(self.settings(namespace), catalog).expect("Failed to build gateway");
        gateway.start().await.expect("Failed to start gateway");
        gateway
    }
}

/// Id of the stub driver in the default namespace.
pub fn rig_driver_id() -> String {
    instrument_gateway::identity::driver_id("drivers", RIG_MODULE)
}
