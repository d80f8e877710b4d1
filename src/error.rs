//! Custom error types for the gateway.
//!
//! This module defines the primary error type, `GatewayError`, and the driver-side
//! `DriverError`. Using the `thiserror` crate, it provides a centralized and consistent
//! way to classify failures, from configuration and identity conflicts to hardware
//! problems reported by a driver.
//!
//! ## Error Hierarchy
//!
//! `GatewayError` consolidates every failure an operation can report to its caller:
//!
//! - **`NotFound`**: An instrument or driver reference resolves to nothing.
//! - **`NameConflict`** / **`DriverInUse`**: Identity conflicts, rejected before any
//!   state is touched.
//! - **`Configuration`**: Unknown driver ids, capability names outside the driver's
//!   function list, illegal driver file names.
//! - **`Connection`**: A driver could not be constructed or its `initialize()` failed
//!   during an explicit connect.
//! - **`ServiceUnavailable`**: The implicit reconnect performed by an RPC call failed.
//! - **`CommandNotFound`** / **`Execution`**: RPC dispatch failures.
//! - **`Io`** / **`Json`** / **`Settings`**: Internal failures wrapped with `#[from]`.
//!
//! Each variant maps to a numeric status and a stable `kind` string through
//! [`GatewayError::status`] and [`GatewayError::kind`]; the network front end puts both
//! on the wire so that callers can tell the classes apart.

use thiserror::Error;

/// Convenience alias for results using the gateway error type.
pub type AppResult<T> = std::result::Result<T, GatewayError>;

/// Every failure the gateway reports to callers.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Unknown instrument or driver
    #[error("{0} not found")]
    NotFound(String),

    /// Instrument name already used by another id
    #[error("Instrument name '{0}' already exists")]
    NameConflict(String),

    /// Driver still referenced by an instrument
    #[error("Driver {0} is in use by an instrument")]
    DriverInUse(String),

    /// Invalid configuration or request
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Driver constructor or initialize failed
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Reconnect could not bring the instrument back
    #[error("Reconnect failed: {0}")]
    ServiceUnavailable(String),

    /// Live driver has no such command
    #[error("Command {0} not found")]
    CommandNotFound(String),

    /// Driver raised while running a command
    #[error("Execution error: {0}")]
    Execution(String),

    /// Registry or driver file I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed registry document
    #[error("Registry document error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be loaded
    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),
}

impl GatewayError {
    /// Status signal carried to the caller (HTTP-style numbering).
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::NotFound(_) => 404,
            GatewayError::NameConflict(_) | GatewayError::DriverInUse(_) => 409,
            GatewayError::Configuration(_) | GatewayError::CommandNotFound(_) => 400,
            GatewayError::Connection(_) => 502,
            GatewayError::ServiceUnavailable(_) => 503,
            GatewayError::Execution(_)
            | GatewayError::Io(_)
            | GatewayError::Json(_)
            | GatewayError::Settings(_) => 500,
        }
    }

    /// Stable machine-readable failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::NotFound(_) => "not_found",
            GatewayError::NameConflict(_) | GatewayError::DriverInUse(_) => "conflict",
            GatewayError::Configuration(_) => "configuration",
            GatewayError::Connection(_) => "connection_error",
            GatewayError::ServiceUnavailable(_) => "service_unavailable",
            GatewayError::CommandNotFound(_) => "command_not_found",
            GatewayError::Execution(_) => "execution_error",
            GatewayError::Io(_) | GatewayError::Json(_) | GatewayError::Settings(_) => "internal",
        }
    }
}

impl From<figment::Error> for GatewayError {
    fn from(value: figment::Error) -> Self {
        GatewayError::Settings(Box::new(value))
    }
}

/// Category of a failure reported by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Constructor or `initialize` failure
    Initialization,
    /// Bad constructor arguments
    Configuration,
    /// Link to the device failed
    Communication,
    /// Device reported a fault
    Hardware,
    /// Caller arguments were rejected
    InvalidParameter,
    /// Vendor library or device not present
    Unavailable,
    /// Driver code panicked
    Panicked,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unavailable => "unavailable",
            DriverErrorKind::Panicked => "panic",
        };
        write!(f, "{}", label)
    }
}

/// Failure raised by driver code (constructor, capability call, RPC body).
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct DriverError {
    /// Module the failing driver was built from
    pub driver: String,
    /// What went wrong
    pub kind: DriverErrorKind,
    /// Driver-supplied description
    pub message: String,
}

impl DriverError {
    /// Error raised by `driver`.
    pub fn new(
        driver: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver: driver.into(),
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for argument binding failures.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new("", DriverErrorKind::InvalidParameter, message)
    }

    /// Shorthand for hardware faults raised inside a driver method.
    pub fn hardware(driver: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(driver, DriverErrorKind::Hardware, message)
    }

    /// Fills in the driver name when the error was raised without one.
    pub fn in_driver(mut self, driver: &str) -> Self {
        if self.driver.is_empty() {
            self.driver = driver.to_string();
        }
        self
    }
}
