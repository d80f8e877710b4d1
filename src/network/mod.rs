//! Newline-delimited JSON front end over TCP.

pub mod protocol;
pub mod server;

pub use protocol::{Request, Response};
pub use server::{handle_request, GatewayServer};
