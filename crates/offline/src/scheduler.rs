//! Delayed task scheduling with cancellable handles.
//!
//! The engine schedules retries and background passes through
//! [`RetryScheduler`] so hosts can swap the Tokio timer for a deterministic
//! driver.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::AbortHandle;

/// A boxed unit of deferred work.
pub type ScheduledTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs a task once `delay` has elapsed.
pub trait RetryScheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> RetryHandle;
}

/// Cancels a scheduled task that has not started yet.
#[derive(Debug, Clone)]
pub struct RetryHandle {
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl RetryHandle {
    fn new(cancelled: Arc<AtomicBool>, abort: Option<AbortHandle>) -> Self {
        Self { cancelled, abort }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Sleeps on the Tokio timer in a spawned task.
///
/// Must be used from within a Tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl RetryScheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> RetryHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::SeqCst) {
                task.await;
            }
        });
        RetryHandle::new(cancelled, Some(join.abort_handle()))
    }
}

struct Pending {
    delay: Duration,
    task: ScheduledTask,
    cancelled: Arc<AtomicBool>,
}

/// Queues tasks until the caller fires them; time never passes on its own.
#[derive(Default)]
pub struct ManualScheduler {
    pending: Mutex<VecDeque<Pending>>,
    history: Mutex<Vec<Duration>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay ever requested, in scheduling order.
    pub fn delays(&self) -> Vec<Duration> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Scheduled tasks not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|p| !p.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Run the oldest live task to completion, returning its delay.
    /// Cancelled tasks are discarded along the way.
    pub async fn fire_next(&self) -> Option<Duration> {
        loop {
            let next = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()?;
            if next.cancelled.load(Ordering::SeqCst) {
                continue;
            }
            next.task.await;
            return Some(next.delay);
        }
    }
}

impl RetryScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> RetryHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(delay);
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Pending {
                delay,
                task,
                cancelled: Arc::clone(&cancelled),
            });
        RetryHandle::new(cancelled, None)
    }
}
