//! Gateway Configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults (`GatewayConfig::default()`)
//! 2. `config/gateway.toml` (optional)
//! 3. Environment variables prefixed with `INSTRUMENT_GATEWAY_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use instrument_gateway::config::GatewayConfig;
//!
//! let config = GatewayConfig::load()?;
//! println!("Serving on {}:{}", config.server.bind_address, config.server.port);
//! # Ok::<(), instrument_gateway::error::GatewayError>(())
//! ```

use crate::error::{AppResult, GatewayError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/gateway.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "INSTRUMENT_GATEWAY_";

/// Top-level gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Network front end
    pub server: ServerConfig,
    /// Driver discovery
    pub drivers: DriversConfig,
    /// Persisted registry document
    pub registry: RegistryConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

/// Front-end listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to listen on
    pub bind_address: String,
    /// TCP port
    pub port: u16,
}

/// Driver discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriversConfig {
    /// Directory of driver source files
    pub directory: PathBuf,
    /// Namespace prefix that driver ids are derived under
    pub namespace: String,
    /// Extra directories searched for vendor libraries
    #[serde(default)]
    pub library_paths: Vec<PathBuf>,
}

/// Registry persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Path of the JSON registry document
    pub file: PathBuf,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig {
                name: "Instrument Gateway".to_string(),
                log_level: "info".to_string(),
                log_format: "pretty".to_string(),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8765,
            },
            drivers: DriversConfig {
                directory: PathBuf::from("src/drivers"),
                namespace: "drivers".to_string(),
                library_paths: Vec::new(),
            },
            registry: RegistryConfig {
                file: PathBuf::from("instrument_gateway.json"),
            },
        }
    }
}

impl GatewayConfig {
    /// Load from `config/gateway.toml` and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file; a missing file leaves the defaults in place.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// The provider stack, exposed for tests and embedding.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(GatewayConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(GatewayError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(GatewayError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.drivers.namespace.trim().is_empty() {
            return Err(GatewayError::Configuration(
                "drivers.namespace must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// `bind_address:port` for the TCP listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }
}
