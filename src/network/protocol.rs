//! Wire protocol of the gateway front end.
//!
//! Newline-delimited JSON: every request is one line, tagged by `op`, and gets exactly
//! one response line.
//!
//! ```text
//! → {"op":"rpc","instrument":"HF1","command":"ping"}
//! ← {"ok":true,"result":"pong"}
//! → {"op":"connect","instrument":"nope"}
//! ← {"ok":false,"status":404,"kind":"not_found","message":"Instrument not found"}
//! ```

use crate::error::GatewayError;
use crate::registry::InstrumentConfig;
use crate::rpc::RpcRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One request line, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Registry summary
    Health,
    /// Driver table
    ListDrivers,
    /// Rescan the driver directory and rebuild the registry
    ScanDrivers,
    /// Write a driver source file, then rescan
    PutDriverFile {
        /// File name inside the driver directory
        filename: String,
        /// Source text
        content: String,
    },
    /// Remove a driver record
    DeleteDriver {
        /// Driver to remove
        driver_id: String,
        /// Also delete the source file
        #[serde(default)]
        delete_file: bool,
    },
    /// Configured instruments with live state
    ListInstruments,
    /// Add or replace an instrument
    UpsertInstrument(InstrumentConfig),
    /// Disconnect and forget an instrument
    RemoveInstrument {
        /// Instrument id or name
        instrument: String,
    },
    /// Bring an instrument up
    Connect {
        /// Instrument id or name
        instrument: String,
    },
    /// Take an instrument down
    Disconnect {
        /// Instrument id or name
        instrument: String,
    },
    /// Disconnect, then connect
    Reconnect {
        /// Instrument id or name
        instrument: String,
    },
    /// Observable state of one instrument
    State {
        /// Instrument id or name
        instrument: String,
    },
    /// Run a driver command
    Rpc(RpcRequest),
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Whether the request succeeded
    pub ok: bool,
    /// Value of a successful request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Status signal of a failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Error class of a failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Error text of a failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    /// Successful response carrying `result`.
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            status: None,
            kind: None,
            message: None,
        }
    }

    /// Failure response built from `error`.
    pub fn failure(error: &GatewayError) -> Self {
        Self {
            ok: false,
            result: None,
            status: Some(error.status()),
            kind: Some(error.kind().to_string()),
            message: Some(error.to_string()),
        }
    }

    /// The line could not be decoded as a request.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            status: Some(400),
            kind: Some("bad_request".to_string()),
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_are_tagged_by_op() {
        let req: Request =
            serde_json::from_str(r#"{"op":"rpc","instrument":"HF1","command":"ping"}"#).unwrap();
        assert_eq!(req, Request::Rpc(RpcRequest::new("HF1", "ping")));

        let req: Request =
            serde_json::from_str(r#"{"op":"delete_driver","driver_id":"d1"}"#).unwrap();
        assert_eq!(
            req,
            Request::DeleteDriver {
                driver_id: "d1".into(),
                delete_file: false
            }
        );

        let req: Request = serde_json::from_str(
            r#"{"op":"upsert_instrument","name":"SG","driverId":"d1","port":"/dev/ttyUSB0"}"#,
        )
        .unwrap();
        let Request::UpsertInstrument(cfg) = req else {
            panic!("expected upsert");
        };
        assert_eq!(cfg.port.as_deref(), Some("/dev/ttyUSB0"));
        assert!(cfg.connect);
    }

    #[test]
    fn success_line_has_only_ok_and_result() {
        let line = serde_json::to_value(Response::success(json!("pong"))).unwrap();
        assert_eq!(line, json!({"ok": true, "result": "pong"}));
    }

    #[test]
    fn failure_line_carries_status_and_kind() {
        let line =
            serde_json::to_value(Response::failure(&GatewayError::NotFound("Instrument".into())))
                .unwrap();
        assert_eq!(
            line,
            json!({"ok": false, "status": 404, "kind": "not_found", "message": "Instrument not found"})
        );
    }

    #[test]
    fn unknown_op_is_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"op":"fly"}"#).is_err());
    }
}
