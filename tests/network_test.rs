//! Integration tests for the newline-delimited JSON front end.

mod common;

use common::{rig_driver_id, Harness};
use instrument_gateway::network::GatewayServer;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

struct Client {
    lines: tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("Failed to connect");
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send_line(&mut self, line: &str) -> Value {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("Failed to send");
        let reply = self
            .lines
            .next_line()
            .await
            .expect("Failed to read")
            .expect("Connection closed");
        serde_json::from_str(&reply).expect("Reply is not JSON")
    }

    async fn send(&mut self, request: Value) -> Value {
        self.send_line(&request.to_string()).await
    }
}

#[tokio::test]
async fn test_requests_over_tcp() {
    let harness = Harness::new();
    let gateway = Arc::new(harness.gateway().await);

    let server = GatewayServer::bind("127.0.0.1:0", gateway.clone())
        .await
        .expect("Failed to bind");
    let addr = server.local_addr().expect("No local address");
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run_until(async move {
        let _ = stop_rx.await;
    }));

    let mut client = Client::connect(addr).await;

    let reply = client
        .send(json!({"op": "upsert_instrument", "name": "HF1", "driverId": rig_driver_id()}))
        .await;
    assert_eq!(reply["ok"], json!(true));
    assert_eq!(reply["result"]["name"], json!("HF1"));

    let reply = client
        .send(json!({"op": "rpc", "instrument": "HF1", "command": "ping"}))
        .await;
    assert_eq!(reply, json!({"ok": true, "result": "pong"}));

    let reply = client.send(json!({"op": "state", "instrument": "HF1"})).await;
    assert_eq!(reply["result"], json!("connected"));

    let reply = client.send(json!({"op": "connect", "instrument": "nope"})).await;
    assert_eq!(
        reply,
        json!({"ok": false, "status": 404, "kind": "not_found", "message": "Instrument not found"})
    );

    // Garbage gets an answer and the connection stays usable.
    let reply = client.send_line("this is not json").await;
    assert_eq!(reply["ok"], json!(false));
    assert_eq!(reply["status"], json!(400));
    assert_eq!(reply["kind"], json!("bad_request"));

    let reply = client.send(json!({"op": "list_instruments"})).await;
    let listed = reply["result"].as_array().expect("list result");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["connect"], json!(true));
    assert_eq!(listed[0]["observed"], json!("connected"));
    assert_eq!(
        listed[0]["allowed_capabilities"],
        json!(["ping", "hold", "set_level", "get_port"])
    );

    let reply = client.send(json!({"op": "health"})).await;
    assert_eq!(reply["result"]["connected"], json!(1));

    stop_tx.send(()).expect("Server already gone");
    handle.await.expect("Server task panicked").expect("Server failed");
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_clients_are_served_independently() {
    let harness = Harness::new();
    let gateway = Arc::new(harness.gateway().await);
    let server = GatewayServer::bind("127.0.0.1:0", gateway.clone())
        .await
        .expect("Failed to bind");
    let addr = server.local_addr().expect("No local address");
    tokio::spawn(server.run());

    let mut first = Client::connect(addr).await;
    let mut second = Client::connect(addr).await;

    let reply = first.send(json!({"op": "list_drivers"})).await;
    assert_eq!(reply["result"][0]["id"], json!(rig_driver_id()));

    drop(first);
    let reply = second.send(json!({"op": "scan_drivers"})).await;
    assert_eq!(reply["ok"], json!(true));
    assert_eq!(reply["result"]["remaps"], json!([]));
}
