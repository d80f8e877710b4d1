//! RPC Dispatcher
//!
//! Invokes a named command on a configured instrument:
//!
//! 1. resolve the reference (id, then name) → `not_found`
//! 2. no live handle → implicit connect from the persisted config →
//!    `service_unavailable` on failure
//! 3. command absent from the driver's command table → `command_not_found`
//! 4. run the handler under the instrument's lock → `execution_error` on failure
//!
//! Arguments are passed through exactly as the caller supplied them.

use crate::driver::CallArgs;
use crate::error::AppResult;
use crate::gateway::Gateway;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// A remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Instrument id or name
    pub instrument: String,
    /// Method to run
    pub command: String,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl RpcRequest {
    /// Call with no arguments.
    pub fn new(instrument: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            command: command.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// Appends a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Adds a keyword argument.
    pub fn kwarg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.to_string(), value.into());
        self
    }
}

/// Successful call result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Always true for a returned response
    pub ok: bool,
    /// Command return value
    pub result: Value,
}

/// Dispatches `request` against `gateway`.
pub async fn dispatch(gateway: &Gateway, request: RpcRequest) -> AppResult<RpcResponse> {
    let id = gateway.resolve(&request.instrument).await?;
    let plan = gateway.connect_plan(&id).await?;
    let was_live = gateway.manager().is_live(&id);

    debug!(instrument = %id, command = %request.command, "Dispatching RPC");
    let outcome = gateway
        .manager()
        .invoke(
            &id,
            &plan,
            &request.command,
            CallArgs::new(request.args, request.kwargs),
        )
        .await;

    if !was_live {
        if let Err(e) = gateway.refresh_state_table().await {
            warn!(instrument = %id, "Could not record state after reconnect: {}", e);
        }
    }

    outcome.map(|result| RpcResponse { ok: true, result })
}
