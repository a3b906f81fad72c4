//! Cancellation broadcaster
//!
//! An [`AbortController`] issues [`AbortSignal`]s to any number of consumers.
//! Firing the controller wakes every `race`/`sleep`/`cancelled` point built on
//! its signals with a cancellation error. Cleanup callbacks registered on the
//! controller run exactly once, on the first of abort, dispose or drop.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{McpError, McpResult};

/// Why a signal fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortReason {
    /// Cancelled explicitly by the owner
    UserCancelled,
    /// A time bound elapsed
    Timeout,
    /// The owning component is shutting down
    Shutdown,
    /// A sibling unit of work failed
    SiblingFailed,
    /// The parent signal fired
    ParentAborted,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserCancelled => write!(f, "cancelled by user"),
            Self::Timeout => write!(f, "timed out"),
            Self::Shutdown => write!(f, "cancelled due to shutdown"),
            Self::SiblingFailed => write!(f, "cancelled after a sibling task failed"),
            Self::ParentAborted => write!(f, "parent operation was cancelled"),
        }
    }
}

type Cleanup = Box<dyn FnOnce() + Send>;

struct AbortState {
    reason: Option<AbortReason>,
    cleanups: Vec<Cleanup>,
    cleaned_up: bool,
}

struct AbortInner {
    token: CancellationToken,
    parent: Option<AbortSignal>,
    state: Mutex<AbortState>,
}

impl AbortInner {
    fn run_cleanups(&self) {
        let cleanups = {
            let mut state = self.state.lock();
            if state.cleaned_up {
                return;
            }
            state.cleaned_up = true;
            std::mem::take(&mut state.cleanups)
        };
        for cleanup in cleanups {
            cleanup();
        }
    }
}

/// Read side of a cancellation token. Cheap to clone.
#[derive(Clone)]
pub struct AbortSignal {
    inner: Arc<AbortInner>,
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .field("reason", &self.reason())
            .finish()
    }
}

impl AbortSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        AbortController::new().signal()
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Reason the signal fired, inherited from the parent when it fired first
    pub fn reason(&self) -> Option<AbortReason> {
        if !self.is_aborted() {
            return None;
        }
        let own = self.inner.state.lock().reason;
        own.or_else(|| {
            self.inner
                .parent
                .as_ref()
                .and_then(|p| p.reason())
                .map(|_| AbortReason::ParentAborted)
        })
    }

    /// Wait until the signal fires
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    pub fn throw_if_aborted(&self) -> McpResult<()> {
        if self.is_aborted() {
            return Err(self.to_error());
        }
        Ok(())
    }

    /// Race `fut` against this signal
    pub async fn race<F: Future>(&self, fut: F) -> McpResult<F::Output> {
        self.throw_if_aborted()?;
        tokio::select! {
            biased;
            _ = self.inner.token.cancelled() => Err(self.to_error()),
            out = fut => Ok(out),
        }
    }

    /// Sleep for `duration` unless the signal fires first
    pub async fn sleep(&self, duration: Duration) -> McpResult<()> {
        self.race(tokio::time::sleep(duration)).await
    }

    fn to_error(&self) -> McpError {
        let reason = self.reason().unwrap_or(AbortReason::UserCancelled);
        McpError::cancelled(
            format!("operation aborted: {}", reason),
            Some(reason.to_string()),
        )
    }
}

/// Write side of a cancellation token
pub struct AbortController {
    inner: Arc<AbortInner>,
}

impl AbortController {
    pub fn new() -> Self {
        Self::build(CancellationToken::new(), None)
    }

    fn build(token: CancellationToken, parent: Option<AbortSignal>) -> Self {
        Self {
            inner: Arc::new(AbortInner {
                token,
                parent,
                state: Mutex::new(AbortState {
                    reason: None,
                    cleanups: Vec::new(),
                    cleaned_up: false,
                }),
            }),
        }
    }

    /// Controller whose signal also fires when `parent` fires
    pub fn child_of(parent: &AbortSignal) -> Self {
        Self::build(parent.inner.token.child_token(), Some(parent.clone()))
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Fire the signal. Returns false if it had already fired.
    pub fn abort(&self, reason: AbortReason) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.reason.is_some() || self.inner.token.is_cancelled() {
                return false;
            }
            state.reason = Some(reason);
        }
        tracing::debug!(%reason, "abort signal fired");
        self.inner.token.cancel();
        self.inner.run_cleanups();
        true
    }

    /// Register a callback run exactly once when the controller is aborted or
    /// disposed. Runs immediately if that already happened.
    pub fn on_cleanup(&self, cleanup: impl FnOnce() + Send + 'static) {
        let mut state = self.inner.state.lock();
        if state.cleaned_up {
            drop(state);
            cleanup();
            return;
        }
        state.cleanups.push(Box::new(cleanup));
    }

    /// Run the cleanup callbacks without firing the signal
    pub fn dispose(&self) {
        self.inner.run_cleanups();
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AbortController {
    fn drop(&mut self) {
        self.inner.run_cleanups();
    }
}
