//! Platform adapters
//!
//! The [`Tasker`] adapter, the send dispatcher it builds on, and the
//! lifecycle contract the host uses to load and tear adapters down.

mod dispatch;
mod registry;
mod tasker;

pub use dispatch::{dispatch, SendResult, SendTarget};
pub use registry::{Adapter, AdapterRegistry, AdapterState};
pub use tasker::{InboundEvent, RecallOutcome, Target, Tasker};
