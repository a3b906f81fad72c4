use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::{
    HealthCheckResult, HealthEvent, HealthEventKind, HealthMetrics, HealthMonitorOptions,
    HealthStatus, HealthTarget, MonitorState,
};
use crate::error::{McpError, McpResult};
use crate::sync::{AbortController, AbortReason, AbortSignal, Event};

/// Replaces the target's own check
pub type CustomCheck = Arc<dyn Fn() -> BoxFuture<'static, McpResult<()>> + Send + Sync>;

pub type HealthListener = Arc<dyn Fn(&HealthEvent) + Send + Sync>;

const HEALTH_EVENT_CAPACITY: usize = 64;

struct MonitorInner {
    target: Arc<dyn HealthTarget>,
    custom_check: Option<CustomCheck>,
    options: HealthMonitorOptions,
    metrics: Mutex<HealthMetrics>,
    status: Mutex<HealthStatus>,
    state: Mutex<MonitorState>,
    /// Set while checks may run, cleared while paused
    running: Event,
    recovering: AtomicBool,
    listeners: RwLock<HashMap<HealthEventKind, Vec<HealthListener>>>,
    events: broadcast::Sender<HealthEvent>,
    abort: AbortController,
}

/// Periodic health checks and recovery for one target
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(target: Arc<dyn HealthTarget>, options: HealthMonitorOptions) -> Self {
        Self::build(target, options, None)
    }

    /// Monitor that runs `check` instead of the target's own check
    pub fn with_custom_check(
        target: Arc<dyn HealthTarget>,
        options: HealthMonitorOptions,
        check: CustomCheck,
    ) -> Self {
        Self::build(target, options, Some(check))
    }

    fn build(
        target: Arc<dyn HealthTarget>,
        options: HealthMonitorOptions,
        custom_check: Option<CustomCheck>,
    ) -> Self {
        let (events, _) = broadcast::channel(HEALTH_EVENT_CAPACITY);
        Self {
            inner: Arc::new(MonitorInner {
                target,
                custom_check,
                options,
                metrics: Mutex::new(HealthMetrics::default()),
                status: Mutex::new(HealthStatus::Healthy),
                state: Mutex::new(MonitorState::Pending),
                running: Event::new(),
                recovering: AtomicBool::new(false),
                listeners: RwLock::new(HashMap::new()),
                events,
                abort: AbortController::new(),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn target_name(&self) -> &str {
        self.inner.target.name()
    }

    /// Start the check loop. Only a pending monitor can be started.
    pub fn start(&self) -> McpResult<()> {
        {
            let mut state = self.inner.state.lock();
            if *state != MonitorState::Pending {
                return Err(McpError::validation(
                    format!("health monitor for '{}' already started", self.target_name()),
                    vec![format!("state is {:?}", *state)],
                ));
            }
            *state = MonitorState::Running;
        }
        self.inner.running.set();

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let signal = inner.abort.signal();
            inner.run_loop(&signal).await;
            tracing::debug!(target_name = %inner.target.name(), "health monitor loop exited");
        });
        *self.task.lock() = Some(handle);
        tracing::debug!(target_name = %self.target_name(), "health monitor started");
        Ok(())
    }

    pub fn pause(&self) {
        let mut state = self.inner.state.lock();
        if *state == MonitorState::Running {
            *state = MonitorState::Paused;
            self.inner.running.clear();
        }
    }

    pub fn resume(&self) {
        let mut state = self.inner.state.lock();
        if *state == MonitorState::Paused {
            *state = MonitorState::Running;
            self.inner.running.set();
        }
    }

    /// Abort the loop and wait for it to exit
    pub async fn stop(&self) {
        *self.inner.state.lock() = MonitorState::Stopped;
        self.inner.abort.abort(AbortReason::Shutdown);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!(target_name = %self.target_name(), "health monitor loop panicked");
                }
            }
        }
    }

    /// Stop and drop every listener
    pub async fn dispose(&self) {
        self.stop().await;
        self.inner.listeners.write().clear();
    }

    /// Run one check now, with the same bookkeeping as a scheduled one
    pub async fn check_now(&self) -> HealthCheckResult {
        let signal = self.inner.abort.signal();
        self.inner.check_and_apply(&signal).await
    }

    pub fn on(&self, kind: HealthEventKind, listener: impl Fn(&HealthEvent) + Send + Sync + 'static) {
        self.inner
            .listeners
            .write()
            .entry(kind)
            .or_default()
            .push(Arc::new(listener));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.inner.events.subscribe()
    }

    pub fn metrics(&self) -> HealthMetrics {
        self.inner.metrics.lock().clone()
    }

    pub fn reset_metrics(&self) {
        self.inner.metrics.lock().reset();
    }

    pub fn status(&self) -> HealthStatus {
        *self.inner.status.lock()
    }

    pub fn state(&self) -> MonitorState {
        *self.inner.state.lock()
    }

    pub fn is_recovering(&self) -> bool {
        self.inner.recovering.load(Ordering::SeqCst)
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.inner.abort.abort(AbortReason::Shutdown);
    }
}

impl MonitorInner {
    async fn run_loop(&self, signal: &AbortSignal) {
        if !self.options.grace_period.is_zero() && signal.sleep(self.options.grace_period).await.is_err() {
            return;
        }
        loop {
            if self.running.wait_or_abort(signal).await.is_err() {
                return;
            }
            self.check_and_apply(signal).await;
            if signal.sleep(self.options.check_interval).await.is_err() {
                return;
            }
        }
    }

    async fn run_check(&self) -> HealthCheckResult {
        let started = Instant::now();
        let run = async {
            if let Some(check) = &self.custom_check {
                return check().await;
            }
            match self.target.perform_health_check().await {
                Some(result) => result,
                None if self.target.is_healthy() => Ok(()),
                None => Err(McpError::server_unavailable(self.target.name())),
            }
        };
        let outcome =
            tokio::time::timeout(self.options.check_timeout, AssertUnwindSafe(run).catch_unwind())
                .await;

        let elapsed = started.elapsed();
        match outcome {
            Ok(Ok(Ok(()))) => HealthCheckResult::success(elapsed),
            Ok(Ok(Err(e))) => HealthCheckResult::failure(elapsed, e.to_string()),
            Ok(Err(panic)) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                HealthCheckResult::failure(elapsed, format!("health check panicked: {}", message))
            }
            Err(_) => HealthCheckResult::failure(
                elapsed,
                format!(
                    "health check timed out after {:?}",
                    self.options.check_timeout
                ),
            ),
        }
    }

    fn record(&self, result: &HealthCheckResult) -> u32 {
        let mut metrics = self.metrics.lock();
        metrics.record(result);
        metrics.consecutive_failures
    }

    async fn check_and_apply(&self, signal: &AbortSignal) -> HealthCheckResult {
        let result = self.run_check().await;
        let consecutive_failures = self.record(&result);
        let target = self.target.name().to_string();

        let event = {
            let mut status = self.status.lock();
            match (*status, result.healthy) {
                (HealthStatus::Unhealthy, true) => {
                    *status = HealthStatus::Healthy;
                    Some(HealthEvent::Healthy {
                        target,
                        result: result.clone(),
                    })
                }
                (HealthStatus::Healthy, false) => {
                    *status = HealthStatus::Unhealthy;
                    Some(HealthEvent::Unhealthy {
                        target,
                        result: result.clone(),
                    })
                }
                (HealthStatus::Unhealthy, false) => Some(HealthEvent::CheckFailed {
                    target,
                    result: result.clone(),
                    consecutive_failures,
                }),
                _ => None,
            }
        };
        if let Some(event) = event {
            if !result.healthy {
                tracing::warn!(
                    target_name = %self.target.name(),
                    consecutive_failures,
                    error = result.error.as_deref().unwrap_or_default(),
                    "health check failed"
                );
            }
            self.emit(event);
        }

        if !result.healthy && consecutive_failures >= self.options.max_consecutive_failures {
            self.recover(signal).await;
        }
        result
    }

    async fn recover(&self, signal: &AbortSignal) {
        if self
            .recovering
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let target = self.target.name().to_string();
        *self.status.lock() = HealthStatus::Recovering;
        tracing::info!(target_name = %target, "starting recovery");
        self.emit(HealthEvent::RecoveryStarted {
            target: target.clone(),
        });

        let max_attempts = self.options.max_recovery_attempts;
        let mut attempts = 0;
        let mut recovered = false;
        let mut cancelled = false;
        for attempt in 1..=max_attempts {
            if attempt > 1 && signal.sleep(self.options.recovery_delay).await.is_err() {
                cancelled = true;
                break;
            }
            attempts = attempt;
            if let Err(e) = self.target.reset_error_state().await {
                tracing::warn!(target_name = %target, attempt, error = %e, "failed to reset target");
            }
            let result = self.run_check().await;
            self.record(&result);
            if result.healthy {
                recovered = true;
                break;
            }
        }

        if recovered {
            *self.status.lock() = HealthStatus::Healthy;
            tracing::info!(target_name = %target, attempts, "target recovered");
            self.emit(HealthEvent::Recovered { target, attempts });
        } else if cancelled {
            *self.status.lock() = HealthStatus::Unhealthy;
            tracing::info!(target_name = %target, attempts, "recovery cancelled");
        } else {
            *self.status.lock() = HealthStatus::Unhealthy;
            tracing::error!(target_name = %target, attempts, "recovery failed");
            self.emit(HealthEvent::RecoveryFailed { target, attempts });
        }
        self.recovering.store(false, Ordering::SeqCst);
    }

    fn emit(&self, event: HealthEvent) {
        let listeners = self
            .listeners
            .read()
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        for listener in listeners {
            if std::panic::catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                tracing::error!(target_name = %event.target(), kind = ?event.kind(), "health listener panicked");
            }
        }
        let _ = self.events.send(event);
    }
}
