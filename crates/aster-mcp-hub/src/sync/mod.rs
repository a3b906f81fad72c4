//! Coordination primitives
//!
//! Everything above this module suspends through these building blocks:
//!
//! - [`Lock`]: FIFO async mutual exclusion with timeout and scoped use
//! - [`Event`]: re-armable signal that waiters can await
//! - [`TaskGroup`]: concurrent units of work sharing one abort signal
//! - [`AbortController`] / [`AbortSignal`]: cancellation broadcaster

pub mod abort;
pub mod event;
pub mod lock;
pub mod task_group;

pub use abort::{AbortController, AbortReason, AbortSignal};
pub use event::Event;
pub use lock::{Lock, LockGuard};
pub use task_group::{SettledResult, TaskGroup, TaskGroupOptions, TaskId};
