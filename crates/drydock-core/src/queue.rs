//! Work-queue contract and the in-process queue used by the CLI and tests.
//!
//! Messages are consumed asynchronously by out-of-scope workers; producers
//! treat delivery as best-effort once the related persistent write has
//! committed.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Ask a worker to regenerate a unit's app environment and start it.
pub const REGENERATE_ENV_AND_START: &str = "regenerate-app-env-and-start";
/// Ask a worker to bind a unit to the app's provisioned services.
pub const BIND_SERVICE: &str = "bind-service";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub action: String,
    pub args: Vec<String>,
}

impl Message {
    pub fn new(action: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            action: action.into(),
            args,
        }
    }
}

pub trait WorkQueue: Send + Sync {
    fn enqueue(&self, messages: &[Message]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// LocalQueue
// ---------------------------------------------------------------------------

/// An in-process queue bounded only by memory.
#[derive(Debug, Default)]
pub struct LocalQueue {
    messages: Mutex<VecDeque<Message>>,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every queued message, oldest first.
    pub fn drain(&self) -> Vec<Message> {
        self.messages.lock().unwrap().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().unwrap().is_empty()
    }
}

impl WorkQueue for LocalQueue {
    fn enqueue(&self, messages: &[Message]) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .extend(messages.iter().cloned());
        Ok(())
    }
}
