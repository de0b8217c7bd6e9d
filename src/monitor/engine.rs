use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::MonitorConfig;
use crate::diagnostics::{tracing_sink_factory, DiagnosticSink, Severity, SinkFactory};
use crate::error::{panic_message, Error, Result};
use crate::memory::constants::{DEFAULT_MEMORY_LOW_TRIGGER, DEFAULT_UPDATE_INTERVAL_MS};
use crate::memory::sampler::Sampler;
use crate::memory::types::{MemorySnapshot, MemoryState};
use crate::monitor::hysteresis::{HysteresisTracker, Transition};
use crate::monitor::listener::{FnListener, ListenerRegistry, ListenerResult, MemoryListener, MonitorEvent};
use crate::monitor::scheduler::{CycleFn, ScheduledTask, Scheduler, TokioScheduler};

/// Source of per-instance ids; ids are never reused within a process.
static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Everything guarded by the engine lock
struct State {
    running: bool,
    /// Bumped by every successful `start`
    generation: u64,
    task: Option<Box<dyn ScheduledTask>>,
    last_snapshot: Option<MemorySnapshot>,
    hysteresis: HysteresisTracker,
    sink: Option<Box<dyn DiagnosticSink>>,
}

struct Inner {
    instance_id: u64,
    interval: Duration,
    reclaim_before_sample: bool,
    sampler: Arc<dyn Sampler>,
    scheduler: Arc<dyn Scheduler>,
    sink_factory: SinkFactory,
    listeners: ListenerRegistry,
    state: Mutex<State>,
    /// Held for the whole of a sampling cycle so cycles of consecutive runs never overlap. A listener must not drive
    /// the scheduler (e.g. `ManualScheduler::tick`) from inside a cycle.
    cycle: Mutex<()>,
}

/// Periodic memory monitor.
///
/// The engine samples memory every `interval`, keeps the latest [`MemorySnapshot`], tracks whether available memory
/// is below the low-memory trigger and notifies registered [`MemoryListener`]s about snapshots and Low/Normal
/// transitions.
///
/// # Locking
///
/// All mutable state sits behind one mutex. Listener callbacks are always invoked with that mutex released, so a
/// listener may freely call back into the engine (including [`stop`](Self::stop)). The diagnostic sink and its
/// factory are invoked with the lock held and must not call back into the engine.
///
/// # Failure handling
///
/// A listener that returns an error or panics is logged to the diagnostic sink and skipped; the remaining listeners
/// still receive the event. A sampler failure (or a panic anywhere in cycle bookkeeping) is fatal: it is recorded,
/// delivered to listeners as [`MonitorEvent::Error`], and the engine stops. Monitoring only resumes when the owner
/// calls [`start`](Self::start) again.
///
/// `MonitorEngine` is a cheap handle; clones share the same engine.
#[derive(Clone)]
pub struct MonitorEngine {
    inner: Arc<Inner>,
}

impl MonitorEngine {
    pub fn builder() -> MonitorEngineBuilder {
        MonitorEngineBuilder::new()
    }

    /// Creates an engine scheduled on the current tokio runtime with tracing-backed diagnostics
    pub fn new<S>(sampler: S, memory_low_trigger: f64, interval: Duration) -> Result<Self>
    where
        S: Sampler + 'static,
    {
        Self::builder().sampler(sampler).memory_low_trigger(memory_low_trigger).interval(interval).build()
    }

    /// Creates an engine from a [`MonitorConfig`]
    pub fn from_config<S>(config: &MonitorConfig, sampler: S) -> Result<Self>
    where
        S: Sampler + 'static,
    {
        Self::builder().config(config).sampler(sampler).build()
    }

    /// Starts monitoring. Returns `false` if the engine was already running.
    ///
    /// Listeners receive [`MonitorEvent::Started`] before this returns; the first sampling cycle is due right after.
    ///
    /// The schedule is created once `Started` has been dispatched, not before, so no cycle event can precede
    /// `Started`. While that dispatch runs the engine already reports running but holds no schedule yet; a listener
    /// that stops (or stops and restarts) the engine from `Started` leaves no schedule behind for this call.
    pub fn start(&self) -> bool {
        let generation = {
            let mut state = self.inner.state.lock();
            if state.running {
                return false;
            }
            state.running = true;
            state.generation += 1;
            state.generation
        };

        tracing::info!(
            instance = self.inner.instance_id,
            interval_ms = self.inner.interval.as_millis() as u64,
            memory_low_trigger = self.memory_low_trigger(),
            "memory monitoring started"
        );
        self.inner.dispatch(&MonitorEvent::Started);

        let mut state = self.inner.state.lock();
        if state.running && state.generation == generation && state.task.is_none() {
            let weak = Arc::downgrade(&self.inner);
            state.task = Some(self.inner.scheduler.schedule(self.inner.interval, cycle_fn(weak, generation)));
        }
        true
    }

    /// Stops monitoring. Returns `false` if the engine was not running.
    ///
    /// Future cycles are cancelled; a cycle already in flight completes. Listeners receive
    /// [`MonitorEvent::Stopped`], then the diagnostic sink (if one was opened) is flushed and closed.
    pub fn stop(&self) -> bool {
        self.inner.stop()
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    /// Most recent snapshot.
    ///
    /// May lag the actual memory situation by up to one interval. Fails with [`Error::NotRunning`] while stopped and
    /// with [`Error::NoSnapshot`] before the first cycle has completed.
    pub fn last_snapshot(&self) -> Result<MemorySnapshot> {
        let state = self.inner.state.lock();
        if !state.running {
            return Err(Error::NotRunning);
        }
        state.last_snapshot.ok_or(Error::NoSnapshot)
    }

    /// Whether the last hysteresis decision left the engine in the Low state.
    ///
    /// Fails with [`Error::NotRunning`] while stopped.
    pub fn is_memory_low(&self) -> Result<bool> {
        self.memory_state().map(|state| state == MemoryState::Low)
    }

    pub fn memory_state(&self) -> Result<MemoryState> {
        let state = self.inner.state.lock();
        if !state.running {
            return Err(Error::NotRunning);
        }
        Ok(state.hysteresis.state())
    }

    /// Registers `listener`; returns `false` if that exact listener is already registered
    pub fn add_listener(&self, listener: Arc<dyn MemoryListener>) -> bool {
        self.inner.listeners.add(listener)
    }

    /// Unregisters `listener`; returns whether it was registered
    pub fn remove_listener(&self, listener: &Arc<dyn MemoryListener>) -> bool {
        self.inner.listeners.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Registers a closure receiving every event; the returned handle can be passed to
    /// [`remove_listener`](Self::remove_listener)
    pub fn on_event<F>(&self, callback: F) -> Arc<dyn MemoryListener>
    where
        F: Fn(&MonitorEvent) -> ListenerResult + Send + Sync + 'static,
    {
        let listener: Arc<dyn MemoryListener> = Arc::new(FnListener::new(callback));
        self.inner.listeners.add(Arc::clone(&listener));
        listener
    }

    /// Process-wide unique id of this engine, also used to name its diagnostic log
    pub fn instance_id(&self) -> u64 {
        self.inner.instance_id
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn memory_low_trigger(&self) -> f64 {
        self.inner.state.lock().hysteresis.memory_low_trigger()
    }
}

impl fmt::Debug for MonitorEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("MonitorEngine");
        debug
            .field("instance_id", &self.inner.instance_id)
            .field("interval", &self.inner.interval)
            .field("scheduler", &self.inner.scheduler)
            .field("listeners", &self.inner.listeners);
        match self.inner.state.try_lock() {
            Some(state) => debug
                .field("running", &state.running)
                .field("memory_state", &state.hysteresis.state())
                .field("last_snapshot", &state.last_snapshot)
                .field("sink_open", &state.sink.is_some()),
            None => debug.field("state", &"<locked>"),
        };
        debug.finish()
    }
}

/// Cycle body bound to the run started as `generation`
fn cycle_fn(engine: Weak<Inner>, generation: u64) -> CycleFn {
    Arc::new(move || {
        // A dead engine cancels its own schedule from Drop
        if let Some(inner) = engine.upgrade() {
            inner.run_cycle(generation);
        }
    })
}

/// Runs foreign code, turning a panic into [`Error::Panicked`]
fn contained<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(Error::from_panic(payload)))
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    fn run_cycle(&self, generation: u64) {
        let _cycle = self.cycle.lock();
        {
            let state = self.state.lock();
            if !state.running || state.generation != generation {
                return;
            }
        }

        let started = Instant::now();
        scopeguard::defer! {
            tracing::debug!(
                instance = self.instance_id,
                elapsed_us = started.elapsed().as_micros() as u64,
                "sampling cycle finished"
            );
        }

        if let Err(error) = contained(|| self.sample_and_notify(generation)) {
            self.fail(generation, error);
        }
    }

    /// One cycle of run `generation`. Once the engine has been restarted the cycle belongs to a finished run and
    /// its results are dropped; a plain stop lets it complete.
    fn sample_and_notify(&self, generation: u64) -> Result<()> {
        if self.reclaim_before_sample {
            self.sampler.reclaim()?;
        }
        let snapshot = self.sampler.measure()?;

        {
            let mut state = self.state.lock();
            if state.generation != generation {
                tracing::debug!(instance = self.instance_id, "dropping snapshot taken by a previous run");
                return Ok(());
            }
            state.last_snapshot = Some(snapshot);
        }
        self.dispatch(&MonitorEvent::Snapshot(snapshot));

        let transition = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return Ok(());
            }
            state.hysteresis.observe(&snapshot)
        };
        match transition {
            Some(Transition::BecameLow) => {
                tracing::warn!(
                    instance = self.instance_id,
                    available_ratio = snapshot.available_ratio(),
                    "memory became low"
                );
                self.dispatch(&MonitorEvent::MemoryLow(snapshot));
            },
            Some(Transition::BecameNormal) => {
                tracing::info!(
                    instance = self.instance_id,
                    available_ratio = snapshot.available_ratio(),
                    "memory back to normal"
                );
                self.dispatch(&MonitorEvent::MemoryNormal(snapshot));
            },
            None => {},
        }

        let mut state = self.state.lock();
        if state.generation == generation {
            if let Some(sink) = state.sink.as_mut() {
                sink.flush()?;
            }
        }
        Ok(())
    }

    /// Fatal path: record, notify, then stop. `stop` closes the sink, so it must come last.
    ///
    /// A failure of a previous run's cycle is only logged; it never touches the current run.
    fn fail(&self, generation: u64, error: Error) {
        if !self.is_current(generation) {
            tracing::warn!(instance = self.instance_id, error = %error, "sampling cycle of a previous run failed");
            return;
        }
        tracing::error!(instance = self.instance_id, error = %error, "sampling cycle failed, stopping memory monitor");
        self.record(Severity::Error, &format!("sampling cycle failed: {}", error));
        self.dispatch(&MonitorEvent::Error(Arc::new(error)));
        self.stop_run(Some(generation));
    }

    fn stop(&self) -> bool {
        self.stop_run(None)
    }

    /// Stops the engine; with `Some(generation)` only if that run is still the live one
    fn stop_run(&self, generation: Option<u64>) -> bool {
        {
            let mut state = self.state.lock();
            if !state.running || generation.is_some_and(|g| g != state.generation) {
                return false;
            }
            if let Some(task) = state.task.take() {
                task.cancel();
            }
            state.running = false;
        }

        tracing::info!(instance = self.instance_id, "memory monitoring stopped");
        self.dispatch(&MonitorEvent::Stopped);

        // A listener may have restarted the engine; the sink then belongs to the new run.
        let sink = {
            let mut state = self.state.lock();
            if state.running {
                None
            } else {
                state.sink.take()
            }
        };
        if let Some(sink) = sink {
            release_sink(self.instance_id, sink);
        }
        true
    }

    /// Delivers `event` to a copy of the listener set with no engine lock held
    fn dispatch(&self, event: &MonitorEvent) {
        for listener in self.listeners.snapshot_for_dispatch() {
            let failure = match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };
            tracing::warn!(instance = self.instance_id, event = ?event.kind(), "listener failed: {}", failure);
            self.record(Severity::Warning, &format!("listener failed while handling {}: {}", event, failure));
        }
    }

    /// Writes to the diagnostic sink, opening it on first use while running
    fn record(&self, severity: Severity, message: &str) {
        let mut state = self.state.lock();
        if state.sink.is_none() {
            if !state.running {
                tracing::warn!(instance = self.instance_id, "diagnostic sink unavailable while stopped: {}", message);
                return;
            }
            match contained(|| (self.sink_factory)(self.instance_id)) {
                Ok(sink) => state.sink = Some(sink),
                Err(e) => {
                    tracing::warn!(instance = self.instance_id, error = %e, "failed to open diagnostic sink: {}", message);
                    return;
                },
            }
        }

        if let Some(sink) = state.sink.as_mut() {
            if let Err(e) = contained(|| sink.write(severity, message)) {
                tracing::warn!(instance = self.instance_id, error = %e, "diagnostic sink write failed: {}", message);
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(task) = state.task.take() {
            task.cancel();
        }
        if let Some(sink) = state.sink.take() {
            release_sink(self.instance_id, sink);
        }
    }
}

fn release_sink(instance: u64, mut sink: Box<dyn DiagnosticSink>) {
    if let Err(e) = contained(|| sink.flush().and_then(|_| sink.close())) {
        tracing::warn!(instance, error = %e, "failed to release diagnostic sink");
    }
}

/// Builder for [`MonitorEngine`]
pub struct MonitorEngineBuilder {
    sampler: Option<Arc<dyn Sampler>>,
    memory_low_trigger: f64,
    interval: Duration,
    scheduler: Option<Arc<dyn Scheduler>>,
    sink_factory: Option<SinkFactory>,
    reclaim_before_sample: bool,
}

impl Default for MonitorEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorEngineBuilder {
    pub fn new() -> Self {
        Self {
            sampler: None,
            memory_low_trigger: DEFAULT_MEMORY_LOW_TRIGGER,
            interval: Duration::from_millis(DEFAULT_UPDATE_INTERVAL_MS),
            scheduler: None,
            sink_factory: None,
            reclaim_before_sample: false,
        }
    }

    pub fn sampler<S>(mut self, sampler: S) -> Self
    where
        S: Sampler + 'static,
    {
        self.sampler = Some(Arc::new(sampler));
        self
    }

    pub fn shared_sampler(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Ratio of available memory below which the engine reports Low
    pub fn memory_low_trigger(mut self, memory_low_trigger: f64) -> Self {
        self.memory_low_trigger = memory_low_trigger;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Scheduler driving the sampling cycle. Defaults to the current tokio runtime.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Factory for the diagnostic sink. Defaults to [`TracingSink`](crate::diagnostics::TracingSink).
    pub fn diagnostics(mut self, factory: SinkFactory) -> Self {
        self.sink_factory = Some(factory);
        self
    }

    /// Ask the sampler to reclaim memory before every measurement
    pub fn reclaim_before_sample(mut self, reclaim: bool) -> Self {
        self.reclaim_before_sample = reclaim;
        self
    }

    /// Applies trigger, interval, reclaim flag and diagnostics from `config`
    pub fn config(self, config: &MonitorConfig) -> Self {
        self.memory_low_trigger(config.memory_low_trigger)
            .interval(config.interval())
            .reclaim_before_sample(config.reclaim_before_sample)
            .diagnostics(config.diagnostics.sink_factory())
    }

    pub fn build(self) -> Result<MonitorEngine> {
        let sampler = self.sampler.ok_or_else(|| Error::invalid_argument("A sampler is required", "none"))?;
        let hysteresis = HysteresisTracker::new(self.memory_low_trigger)?;
        if self.interval.is_zero() {
            return Err(Error::invalid_argument(
                "Sampling interval must be positive",
                format!("{:?}", self.interval),
            ));
        }
        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(TokioScheduler::current()?),
        };

        let instance_id = NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed);
        Ok(MonitorEngine {
            inner: Arc::new(Inner {
                instance_id,
                interval: self.interval,
                reclaim_before_sample: self.reclaim_before_sample,
                sampler,
                scheduler,
                sink_factory: self.sink_factory.unwrap_or_else(tracing_sink_factory),
                listeners: ListenerRegistry::new(),
                cycle: Mutex::new(()),
                state: Mutex::new(State {
                    running: false,
                    generation: 0,
                    task: None,
                    last_snapshot: None,
                    hysteresis,
                    sink: None,
                }),
            }),
        })
    }
}
