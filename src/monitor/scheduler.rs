//! Recurring-task scheduling for the monitor engine
//!
//! The engine only needs "run this cycle now, then again `interval` after each completion, until cancelled". The
//! [`Scheduler`] trait captures exactly that so the engine can run on a tokio runtime ([`TokioScheduler`]) or be
//! driven by hand ([`ManualScheduler`]).
//!
//! Schedules are fixed-delay: the next cycle is due `interval` after the previous one finished, so a slow cycle
//! pushes the schedule back instead of queueing catch-up runs.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Body of one sampling cycle
pub type CycleFn = Arc<dyn Fn() + Send + Sync>;

/// Creates recurring tasks
pub trait Scheduler: Send + Sync + fmt::Debug {
    /// Schedule `cycle` to run immediately and then `interval` after each completion.
    ///
    /// Called with the engine lock held, so implementations must not invoke `cycle` before returning.
    fn schedule(&self, interval: Duration, cycle: CycleFn) -> Box<dyn ScheduledTask>;
}

/// Handle to a scheduled recurring task
pub trait ScheduledTask: Send + Sync + fmt::Debug {
    /// Prevent further cycles from starting. A cycle already running completes.
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;
}

/// Runs cycles on a tokio runtime.
///
/// Each cycle executes on the blocking thread pool because samplers and listeners are synchronous and may block.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Uses the runtime the caller is currently running in
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| Error::not_available(format!("no tokio runtime available for scheduling: {}", e)))
    }

    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, interval: Duration, cycle: CycleFn) -> Box<dyn ScheduledTask> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let task = self.handle.spawn(async move {
            while !flag.load(Ordering::SeqCst) {
                let cycle = Arc::clone(&cycle);
                if let Err(e) = tokio::task::spawn_blocking(move || cycle()).await {
                    if e.is_cancelled() {
                        break;
                    }
                    tracing::error!(error = %e, "sampling cycle task failed");
                }

                if flag.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        });

        Box::new(TokioTask { cancelled, task })
    }
}

#[derive(Debug)]
struct TokioTask {
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ScheduledTask for TokioTask {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Aborting only stops the loop; a cycle already handed to the blocking pool runs to completion.
        self.task.abort();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Scheduler that runs one cycle per [`tick`](ManualScheduler::tick).
///
/// Useful when the host application already owns a loop, and for deterministic tests. Clones share the same slot.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    slot: Arc<Mutex<Option<ManualEntry>>>,
    ticks: Arc<AtomicUsize>,
}

struct ManualEntry {
    interval: Duration,
    cycle: CycleFn,
    cancelled: Arc<AtomicBool>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the scheduled cycle once. Returns `false` if nothing live is scheduled.
    pub fn tick(&self) -> bool {
        let cycle = {
            let slot = self.slot.lock();
            match slot.as_ref() {
                Some(entry) if !entry.cancelled.load(Ordering::SeqCst) => Arc::clone(&entry.cycle),
                _ => return false,
            }
        };

        cycle();
        self.ticks.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Ticks up to `n` times, stopping early once the task is cancelled; returns the number of cycles run
    pub fn tick_n(&self, n: usize) -> usize {
        (0..n).take_while(|_| self.tick()).count()
    }

    /// Whether a live (not cancelled) task is scheduled
    pub fn is_scheduled(&self) -> bool {
        self.slot.lock().as_ref().is_some_and(|entry| !entry.cancelled.load(Ordering::SeqCst))
    }

    /// Interval requested by the live task
    pub fn interval(&self) -> Option<Duration> {
        self.slot.lock().as_ref().filter(|e| !e.cancelled.load(Ordering::SeqCst)).map(|e| e.interval)
    }

    /// Total cycles run through this scheduler
    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, interval: Duration, cycle: CycleFn) -> Box<dyn ScheduledTask> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let previous = self.slot.lock().replace(ManualEntry { interval, cycle, cancelled: Arc::clone(&cancelled) });
        if let Some(previous) = previous {
            previous.cancelled.store(true, Ordering::SeqCst);
        }
        Box::new(ManualTask { cancelled })
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("scheduled", &self.is_scheduled())
            .field("ticks", &self.ticks())
            .finish()
    }
}

#[derive(Debug)]
struct ManualTask {
    cancelled: Arc<AtomicBool>,
}

impl ScheduledTask for ManualTask {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
