//! In-memory transport for tests

use super::Transport;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Records written frames and terminate calls
pub struct MockTransport {
    id: String,
    writable: bool,
    fail_writes: bool,
    frames: Mutex<Vec<Value>>,
    terminated: AtomicUsize,
    closed: AtomicBool,
}

impl MockTransport {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            writable: true,
            fail_writes: false,
            frames: Mutex::new(Vec::new()),
            terminated: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// A transport with no write capability
    pub fn read_only(id: &str) -> Self {
        Self {
            writable: false,
            ..Self::new(id)
        }
    }

    /// A transport whose writes always fail
    pub fn broken(id: &str) -> Self {
        Self {
            fail_writes: true,
            ..Self::new(id)
        }
    }

    pub fn frames(&self) -> Vec<Value> {
        self.frames.lock().unwrap().clone()
    }

    pub fn last_frame(&self) -> Option<Value> {
        self.frames.lock().unwrap().last().cloned()
    }

    pub fn terminate_count(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn can_write(&self) -> bool {
        self.writable
    }

    async fn send_frame(&self, frame: &Value) -> Result<()> {
        if self.fail_writes {
            return Err(Error::Transport("mock write failure".to_string()));
        }
        self.frames.lock().unwrap().push(frame.clone());
        Ok(())
    }

    fn terminate(&self) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
