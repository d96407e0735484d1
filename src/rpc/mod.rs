//! Correlated request/response over a shared transport
//!
//! Provides the `{action, params, echo}` request envelope, the merged
//! response view, and the channel that pairs them up.

mod channel;
mod protocol;

pub use channel::{RequestChannel, DEFAULT_TIMEOUT};
pub use protocol::{new_echo, ApiRequest, ApiResponse, SUCCESS_CODES};
