//! Plugin catalog of compiled drivers.
//!
//! The scanner describes drivers from their source; the catalog is what actually builds
//! them. Each driver module registers a [`DriverPlugin`] at startup (see
//! `drivers::builtin_catalog`). A plugin declares the vendor libraries it depends on;
//! those are located once, at registration, and a plugin whose libraries are missing is
//! kept but marked unavailable instead of failing later inside a method body.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut catalog = DriverCatalog::with_library_paths(vec!["/opt/vendor/lib".into()]);
//! catalog.register(sim_synth::plugin());
//! catalog.register(high_finesse::plugin().requires_library("wlmData"));
//!
//! let device = catalog.instantiate("sim_synth", &CallArgs::default())?;
//! ```

use super::{CallArgs, CommandTable, Device, Driver, Instrument};
use crate::error::{DriverError, DriverErrorKind};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Something a plugin needs from the host before it can run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// A shared library by base name (`wlmData` matches `libwlmData.so`, `wlmData.dll`, ...)
    Library(String),
}

/// Whether a module can be instantiated on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    /// Every requirement is met
    Ready,
    /// A requirement is missing; the text says which
    Unavailable(String),
}

impl Availability {
    /// True when the module can be instantiated.
    pub fn is_ready(&self) -> bool {
        matches!(self, Availability::Ready)
    }

    /// Reason text for unavailable modules.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Availability::Ready => None,
            Availability::Unavailable(reason) => Some(reason),
        }
    }
}

type Constructor =
    Arc<dyn Fn(&CallArgs) -> Result<Arc<dyn Instrument>, DriverError> + Send + Sync>;

/// Registration record of one compiled driver.
pub struct DriverPlugin {
    module: String,
    class_name: String,
    requirements: Vec<Requirement>,
    commands: Vec<(&'static str, &'static [&'static str])>,
    construct: Constructor,
}

impl DriverPlugin {
    /// Plugin for driver type `D` living in `module`.
    pub fn new<D, F>(module: &str, class_name: &str, commands: CommandTable<D>, construct: F) -> Self
    where
        D: Driver,
        F: Fn(&CallArgs) -> Result<D, DriverError> + Send + Sync + 'static,
    {
        let signatures = commands.signatures();
        let table = Arc::new(commands);
        let module_name = module.to_string();
        let construct: Constructor = Arc::new(move |args: &CallArgs| {
            let driver = construct(args).map_err(|e| e.in_driver(&module_name))?;
            let device: Arc<dyn Instrument> =
                Arc::new(Device::new(module_name.clone(), driver, table.clone()));
            Ok(device)
        });

        Self {
            module: module.to_string(),
            class_name: class_name.to_string(),
            requirements: Vec::new(),
            commands: signatures,
            construct,
        }
    }

    /// Declares a vendor shared library the driver links against.
    pub fn requires_library(mut self, name: &str) -> Self {
        self.requirements.push(Requirement::Library(name.to_string()));
        self
    }

    /// Module (file stem) the plugin serves.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Driver type name.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Host requirements declared by the plugin.
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Names in the plugin's command table.
    pub fn command_names(&self) -> Vec<&'static str> {
        self.commands.iter().map(|(name, _)| *name).collect()
    }

    /// Declared parameter names of one command.
    pub fn command_params(&self, name: &str) -> Option<&'static [&'static str]> {
        self.commands
            .iter()
            .find(|(existing, _)| *existing == name)
            .map(|(_, params)| *params)
    }
}

struct RegisteredPlugin {
    plugin: DriverPlugin,
    availability: Availability,
}

/// Module name → compiled driver plugin.
#[derive(Default)]
pub struct DriverCatalog {
    plugins: HashMap<String, RegisteredPlugin>,
    library_paths: Vec<PathBuf>,
}

impl DriverCatalog {
    /// Empty catalog with no extra library paths.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog that also searches `paths` when locating vendor libraries.
    pub fn with_library_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            plugins: HashMap::new(),
            library_paths: paths,
        }
    }

    /// Adds a plugin, evaluating its requirements now. Replaces a plugin registered for
    /// the same module.
    pub fn register(&mut self, plugin: DriverPlugin) {
        let availability = self.evaluate(plugin.requirements());
        match &availability {
            Availability::Ready => debug!("Registered driver plugin '{}'", plugin.module),
            Availability::Unavailable(reason) => warn!(
                module = %plugin.module,
                "Driver plugin registered but unavailable: {}", reason
            ),
        }
        self.plugins.insert(
            plugin.module.clone(),
            RegisteredPlugin {
                plugin,
                availability,
            },
        );
    }

    fn evaluate(&self, requirements: &[Requirement]) -> Availability {
        let missing: Vec<&str> = requirements
            .iter()
            .filter_map(|req| match req {
                Requirement::Library(name) => {
                    locate_library(name, &self.library_paths).is_none().then_some(name.as_str())
                }
            })
            .collect();
        if missing.is_empty() {
            Availability::Ready
        } else {
            Availability::Unavailable(format!(
                "backing library not found: {}",
                missing.join(", ")
            ))
        }
    }

    /// Registered plugin for `module`.
    pub fn get(&self, module: &str) -> Option<&DriverPlugin> {
        self.plugins.get(module).map(|r| &r.plugin)
    }

    /// Availability of `module`; modules without a plugin are unavailable.
    pub fn availability(&self, module: &str) -> Availability {
        match self.plugins.get(module) {
            Some(registered) => registered.availability.clone(),
            None => Availability::Unavailable(format!(
                "no compiled plugin for module '{module}'"
            )),
        }
    }

    /// Registered module names, sorted.
    pub fn modules(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Builds a driver object from constructor arguments.
    pub fn instantiate(
        &self,
        module: &str,
        args: &CallArgs,
    ) -> Result<Arc<dyn Instrument>, DriverError> {
        let registered = self.plugins.get(module).ok_or_else(|| {
            DriverError::new(
                module,
                DriverErrorKind::Unavailable,
                format!("no compiled plugin for module '{module}'"),
            )
        })?;
        if let Availability::Unavailable(reason) = &registered.availability {
            return Err(DriverError::new(
                module,
                DriverErrorKind::Unavailable,
                format!("driver '{module}' unavailable: {reason}"),
            ));
        }
        (registered.plugin.construct)(args)
    }
}

/// Searches `extra` and the platform library path variables for `name`.
pub fn locate_library(name: &str, extra: &[PathBuf]) -> Option<PathBuf> {
    let candidates = [
        format!("lib{name}.so"),
        format!("{name}.so"),
        format!("lib{name}.dylib"),
        format!("{name}.dll"),
    ];

    let mut dirs: Vec<PathBuf> = extra.to_vec();
    for var in ["LD_LIBRARY_PATH", "DYLD_LIBRARY_PATH", "PATH"] {
        if let Some(value) = std::env::var_os(var) {
            dirs.extend(std::env::split_paths(&value));
        }
    }
    dirs.extend(["/usr/lib", "/usr/local/lib"].iter().map(PathBuf::from));

    dirs.iter()
        .flat_map(|dir| candidates.iter().map(move |c| dir.join(c)))
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{reply, InitReport};

    struct Stub;

    impl Driver for Stub {
        fn initialize(&self) -> InitReport {
            InitReport::ok("ok")
        }
        fn shutdown(&self) {}
        fn is_opened(&self) -> bool {
            true
        }
    }

    fn stub_plugin() -> DriverPlugin {
        DriverPlugin::new(
            "stub",
            "Sampler",
            CommandTable::new().command("ping", &[], |_: &Stub, _| reply("pong")),
            |_| Ok(Stub),
        )
    }

    #[test]
    fn registered_plugin_instantiates() {
        let mut catalog = DriverCatalog::new();
        catalog.register(stub_plugin());
        assert!(catalog.availability("stub").is_ready());
        assert_eq!(catalog.get("stub").map(|p| p.command_names()), Some(vec!["ping"]));

        let dev = catalog.instantiate("stub", &CallArgs::default()).unwrap();
        assert_eq!(dev.driver_module(), "stub");
        assert!(dev.initialize().ok);
    }

    #[test]
    fn unknown_module_is_unavailable() {
        let catalog = DriverCatalog::new();
        assert!(!catalog.availability("ghost").is_ready());
        let err = catalog.instantiate("ghost", &CallArgs::default()).err().unwrap();
        assert_eq!(err.kind, DriverErrorKind::Unavailable);
    }

    #[test]
    fn missing_library_marks_plugin_unavailable() {
        let mut catalog = DriverCatalog::new();
        catalog.register(stub_plugin().requires_library("definitely_not_a_vendor_sdk_4711"));
        let availability = catalog.availability("stub");
        assert!(availability
            .reason()
            .unwrap()
            .contains("definitely_not_a_vendor_sdk_4711"));
        assert!(catalog.instantiate("stub", &CallArgs::default()).is_err());
    }

    #[test]
    fn library_found_in_extra_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("libfakesdk.so"), b"").unwrap();
        let mut catalog = DriverCatalog::with_library_paths(vec![dir.path().to_path_buf()]);
        catalog.register(stub_plugin().requires_library("fakesdk"));
        assert!(catalog.availability("stub").is_ready());
    }
}
