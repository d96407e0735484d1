//! Tasker - Chat-Platform Protocol Adapter
//!
//! Tasker sits between a bot host and a chat platform that speaks a
//! JSON-over-WebSocket action protocol. It compiles loosely shaped outbound
//! messages into platform segments, resolves file references into inline
//! payloads, correlates requests with their responses, and routes inbound
//! frames back to the host.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Bot Host                               │
//! │   send_friend_message / send_group_message / recall_message      │
//! └───────────────┬──────────────────────────────────▲───────────────┘
//!                 │                                  │ InboundEvent
//! ┌───────────────▼──────────────────────────────────┴───────────────┐
//! │                         Tasker Adapter                           │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌────────────────┐  │
//! │  │ Message Compiler │─▶│ Send Dispatcher  │─▶│ RequestChannel │  │
//! │  │ + File Resolver  │  │ forward, direct  │  │ echo, timeout  │  │
//! │  └──────────────────┘  └──────────────────┘  └───────┬────────┘  │
//! └──────────────────────────────────────────────────────┼───────────┘
//!                   frames ▲                             │ {action, params, echo}
//! ┌────────────────────────┴─────────────────────────────▼───────────┐
//! │                     Gateway (HandlerTable)                       │
//! │      reverse WS server /{path}     forward WS client upstreams   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`segment`]: Segment model, file materializer, and message compiler
//! - [`rpc`]: Correlated request channel and wire envelopes
//! - [`transport`]: Duplex transport abstraction and handler table
//! - [`adapter`]: Tasker adapter, send dispatcher, and adapter lifecycle
//! - [`gateway`]: WebSocket server and upstream client
//! - [`logging`]: Logging sink with payload redaction
//! - [`config`]: Configuration management

pub mod adapter;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod rpc;
pub mod segment;
pub mod transport;

pub use adapter::Tasker;
pub use config::TaskerConfig;
pub use error::{Error, Result};
