// ── Polling engine ──
//
// Runs cancellable periodic tasks on the tokio runtime. Each task waits,
// runs its action to completion, then waits again, so two ticks of the
// same task never overlap. Tasks of different things run in parallel.
// A panicking tick is logged and the loop carries on at its interval.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// What the engine does after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reschedule {
    /// Wait the task's regular interval.
    Regular,
    /// Wait this long instead, once.
    After(Duration),
}

// ── PollTask ─────────────────────────────────────────────────────────

/// Handle to one periodic task. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PollTask {
    inner: Arc<TaskState>,
}

#[derive(Debug)]
struct TaskState {
    id: u64,
    name: String,
    interval: Duration,
    next_deadline: Mutex<Instant>,
    cancel: CancellationToken,
}

impl PollTask {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// When the next tick is due. Meaningless while a tick is running.
    pub fn next_deadline(&self) -> Instant {
        *self
            .inner
            .next_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Stop future ticks. A running tick finishes; it sees the flag
    /// through the token handed to its action.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    fn set_deadline(&self, deadline: Instant) {
        *self
            .inner
            .next_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = deadline;
    }
}

// ── PollingEngine ────────────────────────────────────────────────────

/// Scheduler for periodic tasks. Cheaply cloneable.
#[derive(Clone, Default)]
pub struct PollingEngine {
    inner: Arc<EngineInner>,
}

#[derive(Default)]
struct EngineInner {
    cancel: CancellationToken,
    tasks: DashMap<u64, (PollTask, JoinHandle<()>)>,
    next_id: AtomicU64,
}

impl PollingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `action` after `initial_delay`, then every `interval` after
    /// each tick completes, until cancelled.
    ///
    /// The action receives the task's cancellation token and should check
    /// it between network calls.
    pub fn start<F, Fut>(
        &self,
        name: impl Into<String>,
        initial_delay: Duration,
        interval: Duration,
        mut action: F,
    ) -> PollTask
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Reschedule> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let task = PollTask {
            inner: Arc::new(TaskState {
                id,
                name: name.into(),
                interval,
                next_deadline: Mutex::new(Instant::now() + initial_delay),
                cancel: self.inner.cancel.child_token(),
            }),
        };

        let handle = {
            let task = task.clone();
            tokio::spawn(async move {
                let cancel = task.inner.cancel.clone();
                let mut delay = initial_delay;
                debug!(task = task.name(), ?interval, "poll task started");
                loop {
                    task.set_deadline(Instant::now() + delay);
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                    trace!(task = task.name(), "tick");
                    let outcome = match AssertUnwindSafe(action(cancel.clone()))
                        .catch_unwind()
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(panic) => {
                            error!(
                                task = task.name(),
                                panic = %panic_message(panic.as_ref()),
                                "tick panicked"
                            );
                            Reschedule::Regular
                        }
                    };
                    if cancel.is_cancelled() {
                        break;
                    }
                    delay = match outcome {
                        Reschedule::Regular => interval,
                        Reschedule::After(custom) => custom,
                    };
                }
                debug!(task = task.name(), "poll task stopped");
            })
        };

        self.inner.tasks.insert(id, (task.clone(), handle));
        task
    }

    /// Cancel one task and forget it.
    pub fn cancel(&self, task: &PollTask) {
        task.cancel();
        self.inner.tasks.remove(&task.inner.id);
    }

    /// Number of tasks that have not finished.
    pub fn active(&self) -> usize {
        self.inner
            .tasks
            .iter()
            .filter(|entry| !entry.value().1.is_finished())
            .count()
    }

    /// Cancel every task and wait for running ticks to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let ids: Vec<u64> = self.inner.tasks.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, (task, handle))) = self.inner.tasks.remove(&id) {
                if let Err(e) = handle.await {
                    warn!(task = task.name(), error = %e, "poll task ended abnormally");
                }
            }
        }
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_after_initial_delay_then_every_interval() {
        let engine = PollingEngine::new();
        let ticks = counter();
        let seen = Arc::clone(&ticks);
        let _task = engine.start("t", Duration::from_secs(5), Duration::from_secs(10), move |_| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Reschedule::Regular
            }
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ticks_never_overlap() {
        let engine = PollingEngine::new();
        let running = counter();
        let max = counter();
        let (r, m) = (Arc::clone(&running), Arc::clone(&max));
        let _task = engine.start("slow", Duration::ZERO, Duration::from_secs(1), move |_| {
            let (r, m) = (Arc::clone(&r), Arc::clone(&m));
            async move {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                r.fetch_sub(1, Ordering::SeqCst);
                Reschedule::Regular
            }
        });

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(max.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_lets_running_tick_finish() {
        let engine = PollingEngine::new();
        let finished = counter();
        let done = Arc::clone(&finished);
        let task = engine.start("c", Duration::ZERO, Duration::from_secs(10), move |_| {
            let done = Arc::clone(&done);
            async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Reschedule::Regular
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        engine.cancel(&task);
        assert!(task.is_cancelled());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_after_overrides_interval_once() {
        let engine = PollingEngine::new();
        let ticks = counter();
        let seen = Arc::clone(&ticks);
        let task = engine.start("r", Duration::ZERO, Duration::from_secs(100), move |_| {
            let seen = Arc::clone(&seen);
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    Reschedule::After(Duration::from_secs(5))
                } else {
                    Reschedule::Regular
                }
            }
        });

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
        assert!(task.next_deadline() > Instant::now() + Duration::from_secs(90));
        assert_eq!(task.interval(), Duration::from_secs(100));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_tick_keeps_the_loop_alive() {
        let engine = PollingEngine::new();
        let ticks = counter();
        let seen = Arc::clone(&ticks);
        let task = engine.start("p", Duration::ZERO, Duration::from_secs(10), move |_| {
            let seen = Arc::clone(&seen);
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("garbage payload");
                }
                Reschedule::Regular
            }
        });

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(!task.is_cancelled());
        assert_eq!(engine.active(), 1);
        engine.shutdown().await;
    }

    #[test]
    fn panic_payloads_render_as_text() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("boom"));
        let literal: Box<dyn Any + Send> = Box::new("bang");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(owned.as_ref()), "boom");
        assert_eq!(panic_message(literal.as_ref()), "bang");
        assert_eq!(panic_message(other.as_ref()), "panic");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_everything() {
        let engine = PollingEngine::new();
        for name in ["a", "b"] {
            engine.start(name, Duration::ZERO, Duration::from_secs(1), |_| async {
                Reschedule::Regular
            });
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.active(), 2);
        engine.shutdown().await;
        assert_eq!(engine.active(), 0);
    }
}
