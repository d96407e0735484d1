//! Duplex transports and the per-path handler table
//!
//! A [`Transport`] is one live connection to the platform. The host
//! process owns the connections and feeds every inbound frame to the
//! handlers registered in the [`HandlerTable`] under the connection's path.

mod handler;
#[cfg(test)]
pub(crate) mod mock;
mod ws;

pub use handler::{FrameHandler, HandlerTable};
pub use ws::{WsPump, WsTransport};

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// One duplex connection to a platform
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connection identifier used in logs
    fn id(&self) -> &str;

    /// Whether this transport can carry outbound frames.
    ///
    /// Requests issued on a transport without write capability are still
    /// registered and wait for their timeout or an external resolution.
    fn can_write(&self) -> bool {
        true
    }

    /// Write one JSON frame
    async fn send_frame(&self, frame: &Value) -> Result<()>;

    /// Forcefully close the connection
    fn terminate(&self);

    /// Whether the connection has been closed
    fn is_closed(&self) -> bool;
}
