//! TCP front end.
//!
//! One task per client connection; requests on a connection are handled in order, each
//! to completion. A line that does not decode gets a `bad_request` response and the
//! connection stays open.

use crate::error::AppResult;
use crate::gateway::Gateway;
use crate::network::protocol::{Request, Response};
use crate::rpc;
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// JSON-lines TCP front end of a [`Gateway`].
pub struct GatewayServer {
    listener: TcpListener,
    gateway: Arc<Gateway>,
}

impl GatewayServer {
    /// Binds `addr` and logs the bound address.
    pub async fn bind(addr: &str, gateway: Arc<Gateway>) -> AppResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Gateway listening on {}", listener.local_addr()?);
        Ok(Self { listener, gateway })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts clients until `shutdown` resolves.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> AppResult<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let gateway = self.gateway.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_client(socket, addr, gateway).await {
                                    warn!("Client {} error: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                _ = &mut shutdown => {
                    info!("Front end stopped accepting connections");
                    return Ok(());
                }
            }
        }
    }

    /// Accepts clients forever.
    pub async fn run(self) -> AppResult<()> {
        self.run_until(std::future::pending()).await
    }
}

async fn handle_client(
    socket: TcpStream,
    addr: SocketAddr,
    gateway: Arc<Gateway>,
) -> std::io::Result<()> {
    info!("Client connected: {}", addr);
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle_request(&gateway, request).await,
            Err(e) => {
                debug!("Undecodable request from {}: {}", addr, e);
                Response::bad_request(format!("Failed to decode request: {e}"))
            }
        };
        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
    }

    info!("Client {} disconnected", addr);
    Ok(())
}

/// Runs one request against the gateway and wraps the outcome.
pub async fn handle_request(gateway: &Gateway, request: Request) -> Response {
    match execute(gateway, request).await {
        Ok(value) => Response::success(value),
        Err(e) => {
            debug!(kind = e.kind(), "Request failed: {}", e);
            Response::failure(&e)
        }
    }
}

async fn execute(gateway: &Gateway, request: Request) -> AppResult<Value> {
    let value = match request {
        Request::Health => serde_json::to_value(gateway.health().await?)?,
        Request::ListDrivers => serde_json::to_value(gateway.list_drivers().await?)?,
        Request::ScanDrivers => serde_json::to_value(gateway.scan_drivers().await?)?,
        Request::PutDriverFile { filename, content } => {
            serde_json::to_value(gateway.put_driver_file(&filename, &content).await?)?
        }
        Request::DeleteDriver {
            driver_id,
            delete_file,
        } => serde_json::to_value(gateway.delete_driver(&driver_id, delete_file).await?)?,
        Request::ListInstruments => serde_json::to_value(gateway.list_instruments().await?)?,
        Request::UpsertInstrument(config) => {
            serde_json::to_value(gateway.upsert_instrument(config).await?)?
        }
        Request::RemoveInstrument { instrument } => {
            gateway.remove_instrument(&instrument).await?;
            Value::Bool(true)
        }
        Request::Connect { instrument } => serde_json::to_value(gateway.connect(&instrument).await?)?,
        Request::Disconnect { instrument } => {
            serde_json::to_value(gateway.disconnect(&instrument).await?)?
        }
        Request::Reconnect { instrument } => {
            serde_json::to_value(gateway.reconnect(&instrument).await?)?
        }
        Request::State { instrument } => {
            serde_json::to_value(gateway.observed_state(&instrument).await?)?
        }
        Request::Rpc(request) => rpc::dispatch(gateway, request).await?.result,
    };
    Ok(value)
}
