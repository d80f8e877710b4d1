//! # Instrument Gateway Library
//!
//! This crate is the core of the `instrument-gateway` service: it discovers hardware
//! drivers from their source files, keeps a persisted registry of drivers and configured
//! instruments under identifiers that survive edits and renames, connects and
//! disconnects driver objects on demand, and invokes arbitrary driver commands by name.
//!
//! ## Crate Structure
//!
//! - **`scanner`**: Syntax-only analysis of a driver directory (`syn`), producing driver
//!   descriptors with constructor and method metadata. Never compiles or runs drivers.
//! - **`identity`**: Deterministic UUIDv5 identifiers for drivers and instruments.
//! - **`registry`**: The persisted JSON document, the in-memory driver index, and the
//!   rebuild that remaps instrument driver ids when a driver's id changes.
//! - **`driver`**: The `Driver` lifecycle contract, command tables, argument binding and
//!   the plugin catalog that instantiates compiled drivers.
//! - **`drivers`**: Built-in simulated drivers (wavemeter, RF synthesizer, DAC board).
//! - **`lifecycle`**: Per-instrument handles, locking, connect/disconnect transitions,
//!   capability application and observable state.
//! - **`rpc`**: Resolution of instrument references and command dispatch.
//! - **`gateway`**: The `Gateway` aggregate tying all of the above together.
//! - **`network`**: Newline-delimited JSON front end over TCP.
//! - **`config`** / **`logging`** / **`error`**: Figment configuration, tracing setup and
//!   the `GatewayError` type.

pub mod config;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod lifecycle;
pub mod logging;
pub mod network;
pub mod registry;
pub mod rpc;
pub mod scanner;

pub use error::{AppResult, DriverError, GatewayError};
pub use gateway::Gateway;
