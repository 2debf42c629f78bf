//! Clock and one-shot timers used for cache expiry.
//!
//! The client never reaches for ambient time or timer services directly; it
//! asks its [`Scheduler`]. [`TokioScheduler`] is the production
//! implementation, [`ManualScheduler`] advances only when told to.

use chrono::Utc;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

/// A task handed to a scheduler.
pub type Task = Box<dyn FnOnce() + Send>;

/// Schedulable, cancelable timer capability.
pub trait Scheduler: Send + Sync {
  /// Current time in epoch milliseconds.
  fn now(&self) -> i64;

  /// Run `task` once after `delay`.
  fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;
}

/// Pending timer. Cancelling it before it fires prevents the task from running.
pub struct TimerHandle {
  cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
  pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
    Self {
      cancel: Some(Box::new(cancel)),
    }
  }

  pub fn cancel(mut self) {
    if let Some(cancel) = self.cancel.take() {
      cancel();
    }
  }
}

impl fmt::Debug for TimerHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TimerHandle").finish_non_exhaustive()
  }
}

/// Wall clock plus `tokio::time::sleep` timers. Requires a running tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
  fn now(&self) -> i64 {
    Utc::now().timestamp_millis()
  }

  fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
    let handle = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      task();
    });
    TimerHandle::new(move || handle.abort())
  }
}

struct PendingTask {
  id: u64,
  due: i64,
  task: Task,
}

#[derive(Default)]
struct ManualState {
  now: i64,
  next_id: u64,
  pending: Vec<PendingTask>,
}

/// Deterministic scheduler: time only moves through [`ManualScheduler::advance`].
#[derive(Clone, Default)]
pub struct ManualScheduler {
  state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
  pub fn new(now: i64) -> Self {
    Self {
      state: Arc::new(Mutex::new(ManualState {
        now,
        ..ManualState::default()
      })),
    }
  }

  /// Move the clock forward and run every task that became due, in due order.
  pub fn advance(&self, by: Duration) {
    let due = {
      let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
      state.now += by.as_millis() as i64;
      let now = state.now;

      let (mut due, pending): (Vec<_>, Vec<_>) =
        state.pending.drain(..).partition(|task| task.due <= now);
      state.pending = pending;
      due.sort_by_key(|task| (task.due, task.id));
      due
    };

    for pending in due {
      (pending.task)();
    }
  }

  /// Number of armed timers.
  pub fn pending(&self) -> usize {
    self
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .pending
      .len()
  }
}

impl Scheduler for ManualScheduler {
  fn now(&self) -> i64 {
    self.state.lock().unwrap_or_else(PoisonError::into_inner).now
  }

  fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    state.next_id += 1;
    let id = state.next_id;
    let due = state.now + delay.as_millis() as i64;
    state.pending.push(PendingTask { id, due, task });

    let weak: Weak<Mutex<ManualState>> = Arc::downgrade(&self.state);
    TimerHandle::new(move || {
      if let Some(state) = weak.upgrade() {
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        state.pending.retain(|task| task.id != id);
      }
    })
  }
}

impl fmt::Debug for ManualScheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ManualScheduler")
      .field("now", &self.now())
      .field("pending", &self.pending())
      .finish()
  }
}
