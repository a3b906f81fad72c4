//! Re-armable one-shot signal

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::abort::AbortSignal;
use crate::error::{McpError, McpResult};

/// Starts unset. [`Event::wait`] suspends until [`Event::set`] is called;
/// [`Event::clear`] re-arms it for new waiters.
#[derive(Clone)]
pub struct Event {
    sender: Arc<watch::Sender<bool>>,
}

impl Event {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Wake all current and future waiters until the next `clear`
    pub fn set(&self) {
        self.sender.send_replace(true);
    }

    pub fn clear(&self) {
        self.sender.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.sender.borrow()
    }

    pub async fn wait(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = receiver.wait_for(|set| *set).await;
    }

    pub async fn wait_with_timeout(&self, timeout: Duration) -> McpResult<()> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| McpError::timeout("event was not set in time", timeout))
    }

    /// Wait for the event unless `signal` fires first
    pub async fn wait_or_abort(&self, signal: &AbortSignal) -> McpResult<()> {
        signal.race(self.wait()).await
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event").field("set", &self.is_set()).finish()
    }
}
