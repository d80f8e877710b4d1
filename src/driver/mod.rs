//! Driver contract and command tables.
//!
//! Every hardware driver implements [`Driver`], the three-method lifecycle contract, and
//! publishes its callable methods through a [`CommandTable`]: a map from method name to a
//! typed handler closure that binds JSON arguments and calls the driver's own method.
//! The RPC dispatcher only ever looks commands up in that table.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 DriverCatalog (catalog.rs)                   │
//! │  module name -> DriverPlugin { constructor, CommandTable }   │
//! └──────────────────────────────────────────────────────────────┘
//!                               │ instantiate(CallArgs)
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │        Device<D: Driver>  (type-erased as dyn Instrument)    │
//! │  initialize / shutdown / is_opened / call(name, CallArgs)    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Thread Safety
//!
//! Drivers are `Send + Sync` and take `&self`; state that changes lives behind interior
//! mutability. Calls into a driver block (hardware I/O), so the lifecycle manager runs
//! them on the blocking thread pool.

pub mod catalog;

use crate::error::{DriverError, DriverErrorKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

pub use catalog::{Availability, DriverCatalog, DriverPlugin, Requirement};

/// Outcome of [`Driver::initialize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitReport {
    /// Whether the device opened
    pub ok: bool,
    /// Human-readable outcome
    pub message: String,
}

impl InitReport {
    /// Successful initialization.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    /// Initialization failed; `message` becomes the instrument's last error.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Lifecycle contract every driver satisfies.
///
/// # Contract
/// - `initialize` opens the hardware and reports the outcome; it does not panic on
///   ordinary hardware faults.
/// - `shutdown` is idempotent and never fails.
/// - `is_opened` never fails; any internal fault reads as `false`.
pub trait Driver: Send + Sync + 'static {
    /// Open the device.
    fn initialize(&self) -> InitReport;

    /// Release the device.
    fn shutdown(&self);

    /// Responsiveness check.
    fn is_opened(&self) -> bool;
}

/// Positional and keyword arguments exactly as a caller supplied them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    /// Positional values in call order
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword values by parameter name
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl CallArgs {
    /// Arguments from their parts.
    pub fn new(args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self { args, kwargs }
    }

    /// Looks a parameter up by position first, then by keyword.
    fn lookup(&self, index: usize, name: &str) -> Result<Option<&Value>, DriverError> {
        match (self.args.get(index), self.kwargs.get(name)) {
            (Some(_), Some(_)) => Err(DriverError::invalid_parameter(format!(
                "got multiple values for argument '{name}'"
            ))),
            (Some(value), None) | (None, Some(value)) => Ok(Some(value)),
            (None, None) => Ok(None),
        }
    }

    /// A parameter the call cannot do without.
    pub fn required<T: DeserializeOwned>(&self, index: usize, name: &str) -> Result<T, DriverError> {
        match self.lookup(index, name)? {
            Some(value) => decode(name, value),
            None => Err(DriverError::invalid_parameter(format!(
                "missing required argument '{name}'"
            ))),
        }
    }

    /// A parameter that may be absent or `null`.
    pub fn optional<T: DeserializeOwned>(
        &self,
        index: usize,
        name: &str,
    ) -> Result<Option<T>, DriverError> {
        match self.lookup(index, name)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => decode(name, value).map(Some),
        }
    }

    /// Rejects arguments `command` does not declare: positional values beyond
    /// `params.len()`, unknown keywords, and keywords that repeat a positional value.
    ///
    /// Constructors skip this check; `port` mapping supplies both `devpath` and `port`.
    pub fn expect_only(&self, command: &str, params: &[&str]) -> Result<(), DriverError> {
        if self.args.len() > params.len() {
            return Err(DriverError::invalid_parameter(format!(
                "{command}() takes {} positional argument(s) but {} were given",
                params.len(),
                self.args.len()
            )));
        }
        for key in self.kwargs.keys() {
            match params.iter().position(|p| p == key) {
                None => {
                    return Err(DriverError::invalid_parameter(format!(
                        "{command}() got an unexpected keyword argument '{key}'"
                    )))
                }
                Some(index) if index < self.args.len() => {
                    return Err(DriverError::invalid_parameter(format!(
                        "{command}() got multiple values for argument '{key}'"
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// A keyword-only parameter.
    pub fn keyword<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, DriverError> {
        match self.kwargs.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => decode(name, value).map(Some),
        }
    }
}

fn decode<T: DeserializeOwned>(name: &str, value: &Value) -> Result<T, DriverError> {
    serde_json::from_value(value.clone())
        .map_err(|e| DriverError::invalid_parameter(format!("argument '{name}': {e}")))
}

/// Serializes a handler's return value.
pub fn reply<T: Serialize>(value: T) -> Result<Value, DriverError> {
    serde_json::to_value(value).map_err(|e| {
        DriverError::new("", DriverErrorKind::Communication, format!("unserializable result: {e}"))
    })
}

/// Handler bound to a method name.
pub type CommandHandler<D> = Box<dyn Fn(&D, &CallArgs) -> Result<Value, DriverError> + Send + Sync>;

/// One registered command: its parameter names, in declaration order, and its handler.
pub struct Command<D> {
    /// Method name
    pub name: &'static str,
    /// Parameter names the method declares, excluding the receiver
    pub params: &'static [&'static str],
    handler: CommandHandler<D>,
}

impl<D> Command<D> {
    /// Checks `args` against the declared parameters, then runs the handler.
    pub fn invoke(&self, driver: &D, args: &CallArgs) -> Result<Value, DriverError> {
        args.expect_only(self.name, self.params)?;
        (self.handler)(driver, args)
    }
}

/// Method name → command, in declaration order.
pub struct CommandTable<D> {
    entries: Vec<Command<D>>,
}

impl<D> Default for CommandTable<D> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<D> CommandTable<D> {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name` with the method's parameter names; a later
    /// registration replaces an earlier one.
    pub fn command<F>(mut self, name: &'static str, params: &'static [&'static str], handler: F) -> Self
    where
        F: Fn(&D, &CallArgs) -> Result<Value, DriverError> + Send + Sync + 'static,
    {
        self.entries.retain(|existing| existing.name != name);
        self.entries.push(Command {
            name,
            params,
            handler: Box::new(handler),
        });
        self
    }

    /// Command registered under `name`.
    pub fn get(&self, name: &str) -> Option<&Command<D>> {
        self.entries.iter().find(|existing| existing.name == name)
    }

    /// True when `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered names, in declaration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|c| c.name).collect()
    }

    /// Name and parameter list of every command, in declaration order.
    pub fn signatures(&self) -> Vec<(&'static str, &'static [&'static str])> {
        self.entries.iter().map(|c| (c.name, c.params)).collect()
    }
}

/// Type-erased, callable driver object held by the lifecycle manager.
pub trait Instrument: Send + Sync {
    /// Module the driver was built from.
    fn driver_module(&self) -> &str;
    /// Opens the wrapped driver.
    fn initialize(&self) -> InitReport;
    /// Releases the wrapped driver.
    fn shutdown(&self);
    /// Asks the wrapped driver whether it is open.
    fn is_opened(&self) -> bool;
    /// True when the command table has `name`.
    fn has_command(&self, name: &str) -> bool;
    /// Runs the named command; unknown names fail with `InvalidParameter`.
    fn call(&self, name: &str, args: &CallArgs) -> Result<Value, DriverError>;
}

/// A driver paired with its command table.
pub struct Device<D: Driver> {
    module: String,
    driver: D,
    commands: Arc<CommandTable<D>>,
}

impl<D: Driver> Device<D> {
    /// Wraps `driver` with the command table shared by its plugin.
    pub fn new(module: impl Into<String>, driver: D, commands: Arc<CommandTable<D>>) -> Self {
        Self {
            module: module.into(),
            driver,
            commands,
        }
    }

    /// The wrapped driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }
}

impl<D: Driver> Instrument for Device<D> {
    fn driver_module(&self) -> &str {
        &self.module
    }

    fn initialize(&self) -> InitReport {
        self.driver.initialize()
    }

    fn shutdown(&self) {
        self.driver.shutdown()
    }

    fn is_opened(&self) -> bool {
        self.driver.is_opened()
    }

    fn has_command(&self, name: &str) -> bool {
        self.commands.contains(name)
    }

    fn call(&self, name: &str, args: &CallArgs) -> Result<Value, DriverError> {
        let command = self.commands.get(name).ok_or_else(|| {
            DriverError::invalid_parameter(format!("Command {name} not found"))
        })?;
        command
            .invoke(&self.driver, args)
            .map_err(|e| e.in_driver(&self.module))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Lamp {
        on: AtomicBool,
    }

    impl Lamp {
        fn set(&self, on: bool) {
            self.on.store(on, Ordering::SeqCst);
        }
    }

    impl Driver for Lamp {
        fn initialize(&self) -> InitReport {
            InitReport::ok("lamp ready")
        }
        fn shutdown(&self) {}
        fn is_opened(&self) -> bool {
            true
        }
    }

    fn lamp_device() -> Device<Lamp> {
        let table = CommandTable::new()
            .command("set", &["on"], |lamp: &Lamp, args| {
                lamp.set(args.required(0, "on")?);
                reply(())
            })
            .command("is_on", &[], |lamp: &Lamp, _| reply(lamp.on.load(Ordering::SeqCst)));
        Device::new(
            "lamp",
            Lamp {
                on: AtomicBool::new(false),
            },
            Arc::new(table),
        )
    }

    fn args(positional: Value, keyword: Value) -> CallArgs {
        let args = positional.as_array().cloned().unwrap_or_default();
        let kwargs = keyword.as_object().cloned().unwrap_or_default();
        CallArgs::new(args, kwargs)
    }

    #[test]
    fn positional_then_keyword_binding() {
        let by_pos = args(json!([3, "nm"]), json!({}));
        assert_eq!(by_pos.required::<u32>(0, "channel").unwrap(), 3);
        assert_eq!(by_pos.required::<String>(1, "unit").unwrap(), "nm");

        let by_kw = args(json!([]), json!({"channel": 5}));
        assert_eq!(by_kw.required::<u32>(0, "channel").unwrap(), 5);
        assert_eq!(by_kw.optional::<String>(1, "unit").unwrap(), None);
    }

    #[test]
    fn duplicate_and_missing_arguments_are_rejected() {
        let dup = args(json!([1]), json!({"channel": 2}));
        let err = dup.required::<u32>(0, "channel").unwrap_err();
        assert!(err.message.contains("multiple values"));

        let missing = args(json!([]), json!({}));
        let err = missing.required::<u32>(0, "channel").unwrap_err();
        assert!(err.message.contains("missing required argument 'channel'"));
    }

    #[test]
    fn null_optional_reads_as_none() {
        let a = args(json!([null]), json!({}));
        assert_eq!(a.optional::<u32>(0, "channel").unwrap(), None);
    }

    #[test]
    fn type_mismatch_names_the_argument() {
        let a = args(json!(["three"]), json!({}));
        let err = a.required::<u32>(0, "channel").unwrap_err();
        assert!(err.message.starts_with("argument 'channel'"));
    }

    #[test]
    fn device_routes_calls_through_the_table() {
        let dev = lamp_device();
        assert!(dev.has_command("set"));
        assert!(!dev.has_command("initialize"));
        dev.call("set", &args(json!([true]), json!({}))).unwrap();
        assert_eq!(dev.call("is_on", &CallArgs::default()).unwrap(), json!(true));
    }

    #[test]
    fn device_errors_carry_the_module() {
        let dev = lamp_device();
        let err = dev.call("set", &CallArgs::default()).unwrap_err();
        assert_eq!(err.driver, "lamp");
        assert_eq!(err.kind, DriverErrorKind::InvalidParameter);
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let table: CommandTable<Lamp> = CommandTable::new()
            .command("a", &[], |_, _| reply(1))
            .command("b", &["x"], |_, _| reply(2))
            .command("a", &["y"], |_, _| reply(3));
        assert_eq!(table.names(), vec!["b", "a"]);
        assert_eq!(table.signatures()[1], ("a", &["y"][..]));
    }

    #[test]
    fn undeclared_arguments_are_rejected_before_the_handler_runs() {
        let dev = lamp_device();

        let err = dev.call("set", &args(json!([true, false]), json!({}))).unwrap_err();
        assert!(err.message.contains("takes 1 positional argument(s) but 2 were given"));

        let err = dev.call("set", &args(json!([]), json!({"onn": true}))).unwrap_err();
        assert!(err.message.contains("unexpected keyword argument 'onn'"));

        let err = dev.call("set", &args(json!([true]), json!({"on": false}))).unwrap_err();
        assert!(err.message.contains("multiple values for argument 'on'"));

        let err = dev.call("is_on", &args(json!([1]), json!({}))).unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::InvalidParameter);
        assert_eq!(err.driver, "lamp");

        // Nothing reached the driver.
        assert_eq!(dev.call("is_on", &CallArgs::default()).unwrap(), json!(false));
    }
}
