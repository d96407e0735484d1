//! WebSocket gateway
//!
//! Hosts the platform's connections and feeds their frames into the
//! handler table. Reverse connections are accepted on `/{path}`; forward
//! connections are dialed to configured upstreams. Either way the socket
//! is wrapped in a [`WsTransport`](crate::transport::WsTransport) and
//! driven by the same connection loop.

mod client;
mod connection;
mod server;

pub use server::{Gateway, GatewayBuilder, GatewayState, GatewayStatus};
