//! Periodic memory monitoring
//!
//! [`MonitorEngine`] drives a [`Sampler`](crate::memory::Sampler) on a fixed-delay schedule, remembers the latest
//! snapshot and notifies [`MemoryListener`]s. Low/Normal notifications are edge-triggered: a listener hears about
//! each crossing of the low-memory trigger exactly once.
//!
//! # Examples
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use memwatch::memory::SystemSampler;
//! use memwatch::monitor::{MonitorEngine, MonitorEvent};
//!
//! #[tokio::main]
//! async fn main() -> memwatch::Result<()> {
//!     let engine = MonitorEngine::new(SystemSampler::new(), 0.20, Duration::from_secs(1))?;
//!     engine.on_event(|event: &MonitorEvent| {
//!         if let MonitorEvent::MemoryLow(snapshot) = event {
//!             eprintln!("running low on memory: {}", snapshot);
//!         }
//!         Ok(())
//!     });
//!
//!     engine.start();
//!     tokio::time::sleep(Duration::from_secs(10)).await;
//!     engine.stop();
//!     Ok(())
//! }
//! ```

mod engine;

/// Low/Normal edge detection
pub mod hysteresis;

/// Listener trait, events and registry
pub mod listener;

/// Recurring-task scheduling
pub mod scheduler;

pub use engine::{MonitorEngine, MonitorEngineBuilder};
pub use hysteresis::{HysteresisTracker, Transition};
pub use listener::{
    EventKind, FnListener, ListenerError, ListenerRegistry, ListenerResult, MemoryListener, MonitorEvent,
};
pub use scheduler::{CycleFn, ManualScheduler, ScheduledTask, Scheduler, TokioScheduler};
