//! Cooperative task group
//!
//! A [`TaskGroup`] runs units of work that all observe one shared
//! [`AbortSignal`]. Units may be capped in concurrency and bounded by a
//! per-task timeout. The group timeout is measured from group creation.
//! [`TaskGroup::wait_for_all`] settles every background unit and never fails
//! because an individual unit did.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::abort::{AbortController, AbortReason, AbortSignal};
use crate::error::{McpError, McpErrorCode, McpResult};

/// Identifier of a background unit, unique within its group
pub type TaskId = u64;

/// Options for a [`TaskGroup`]
#[derive(Debug, Clone, Default)]
pub struct TaskGroupOptions {
    /// Maximum number of units running at once. `None` means unbounded.
    pub max_concurrency: Option<usize>,
    /// Bound applied to each unit individually
    pub task_timeout: Option<Duration>,
    /// Bound applied to the whole group, measured from creation
    pub group_timeout: Option<Duration>,
    /// Abort every other unit once one fails
    pub abort_on_first_error: bool,
}

/// Outcome of one background unit
#[derive(Debug)]
pub enum SettledResult<T> {
    Fulfilled { id: TaskId, value: T },
    Rejected { id: TaskId, error: McpError },
}

impl<T> SettledResult<T> {
    pub fn id(&self) -> TaskId {
        match self {
            Self::Fulfilled { id, .. } | Self::Rejected { id, .. } => *id,
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    pub fn into_result(self) -> McpResult<T> {
        match self {
            Self::Fulfilled { value, .. } => Ok(value),
            Self::Rejected { error, .. } => Err(error),
        }
    }
}

#[derive(Clone)]
struct UnitContext {
    signal: AbortSignal,
    controller: Arc<AbortController>,
    limiter: Option<Arc<Semaphore>>,
    task_timeout: Option<Duration>,
    abort_on_first_error: bool,
    active: Arc<AtomicUsize>,
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl UnitContext {
    async fn run<T, F, Fut>(self, f: F) -> McpResult<T>
    where
        F: FnOnce(AbortSignal) -> Fut,
        Fut: Future<Output = McpResult<T>>,
    {
        let _permit = match &self.limiter {
            Some(limiter) => Some(
                self.signal
                    .race(Arc::clone(limiter).acquire_owned())
                    .await?
                    .map_err(|_| McpError::cancelled("task group closed", None))?,
            ),
            None => None,
        };
        self.signal.throw_if_aborted()?;

        self.active.fetch_add(1, Ordering::SeqCst);
        let _active = ActiveGuard(Arc::clone(&self.active));

        let unit = self.signal.race(f(self.signal.clone()));
        let result = match self.task_timeout {
            Some(limit) => match tokio::time::timeout(limit, unit).await {
                Ok(out) => out.and_then(|r| r),
                Err(_) => Err(McpError::timeout("task exceeded its time bound", limit)),
            },
            None => unit.await.and_then(|r| r),
        };

        if let Err(err) = &result {
            if self.abort_on_first_error && !err.is_cancelled() {
                tracing::debug!(error = %err, "task failed, aborting group");
                self.controller.abort(AbortReason::SiblingFailed);
            }
        }
        result
    }
}

/// A group of units sharing one cancellation signal
pub struct TaskGroup<T> {
    options: TaskGroupOptions,
    controller: Arc<AbortController>,
    limiter: Option<Arc<Semaphore>>,
    next_id: AtomicU64,
    tasks: Mutex<Vec<(TaskId, JoinHandle<McpResult<T>>)>>,
    active: Arc<AtomicUsize>,
    created_at: Instant,
}

impl<T: Send + 'static> TaskGroup<T> {
    pub fn new(options: TaskGroupOptions) -> Self {
        Self::build(options, AbortController::new())
    }

    /// Group that is also aborted when `parent` fires
    pub fn with_parent(options: TaskGroupOptions, parent: &AbortSignal) -> Self {
        Self::build(options, AbortController::child_of(parent))
    }

    fn build(options: TaskGroupOptions, controller: AbortController) -> Self {
        let limiter = options
            .max_concurrency
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        Self {
            options,
            controller: Arc::new(controller),
            limiter,
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(Vec::new()),
            active: Arc::new(AtomicUsize::new(0)),
            created_at: Instant::now(),
        }
    }

    fn context(&self) -> UnitContext {
        UnitContext {
            signal: self.controller.signal(),
            controller: Arc::clone(&self.controller),
            limiter: self.limiter.clone(),
            task_timeout: self.options.task_timeout,
            abort_on_first_error: self.options.abort_on_first_error,
            active: Arc::clone(&self.active),
        }
    }

    /// Signal shared by every unit of this group
    pub fn signal(&self) -> AbortSignal {
        self.controller.signal()
    }

    /// Run one unit to completion on the current task and return its result
    pub async fn start<F, Fut>(&self, f: F) -> McpResult<T>
    where
        F: FnOnce(AbortSignal) -> Fut,
        Fut: Future<Output = McpResult<T>>,
    {
        self.context().run(f).await
    }

    /// Spawn one unit and track it for [`TaskGroup::wait_for_all`]
    pub fn start_in_background<F, Fut>(&self, f: F) -> TaskId
    where
        F: FnOnce(AbortSignal) -> Fut + Send + 'static,
        Fut: Future<Output = McpResult<T>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let context = self.context();
        let handle = tokio::spawn(context.run(f));
        self.tasks.lock().push((id, handle));
        id
    }

    /// Settle every background unit started so far, in start order
    pub async fn wait_for_all(&self) -> Vec<SettledResult<T>> {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let deadline = self.options.group_timeout.map(|t| self.created_at + t);

        let mut settled = Vec::with_capacity(tasks.len());
        for (id, mut handle) in tasks {
            let joined = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        if self.controller.abort(AbortReason::Timeout) {
                            tracing::warn!("task group timed out, aborting remaining tasks");
                        }
                        handle.await
                    }
                },
                None => handle.await,
            };

            settled.push(match joined {
                Ok(Ok(value)) => SettledResult::Fulfilled { id, value },
                Ok(Err(error)) => SettledResult::Rejected { id, error },
                Err(join_error) => SettledResult::Rejected {
                    id,
                    error: McpError::server(
                        McpErrorCode::InternalError.code(),
                        format!("task {} did not complete: {}", id, join_error),
                        None,
                    ),
                },
            });
        }
        settled
    }

    /// Cancel every running unit
    pub fn abort(&self, reason: AbortReason) {
        self.controller.abort(reason);
    }

    pub fn is_aborted(&self) -> bool {
        self.controller.is_aborted()
    }

    /// Units currently past the concurrency gate and running
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl<T> Drop for TaskGroup<T> {
    fn drop(&mut self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            return;
        }
        self.controller.abort(AbortReason::Shutdown);
        for (_, handle) in tasks {
            handle.abort();
        }
    }
}
