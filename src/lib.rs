//! memwatch - periodic memory monitoring with edge-triggered low-memory notifications
//!
//! This crate samples memory on a fixed schedule, keeps the latest reading available for cheap queries, and tells
//! interested parties when available memory drops below (or recovers above) a configurable fraction of the maximum.
//!
//! # Features
//!
//! - **Monitor engine**: start/stop lifecycle, latest snapshot, Low/Normal state
//! - **Listeners**: trait objects or closures, isolated from each other's failures
//! - **Samplers**: host-wide and per-process memory probes (feature `system`, enabled by default)
//! - **Diagnostics**: internal failures recorded to `tracing` or a per-instance log file
//! - **Configuration**: serde/JSON model of every engine setting
//!
//! # Examples
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use memwatch::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let engine = MonitorEngine::new(SystemSampler::new(), 0.20, Duration::from_millis(500))?;
//!     engine.on_event(|event: &MonitorEvent| {
//!         println!("{}", event);
//!         Ok(())
//!     });
//!
//!     engine.start();
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     println!("low: {}", engine.is_memory_low()?);
//!     engine.stop();
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! All fallible operations return [`Result`] with the crate's [`Error`]:
//!
//! ```rust
//! use memwatch::{Error, Result};
//!
//! fn check(engine_running: bool) -> Result<()> {
//!     if !engine_running {
//!         return Err(Error::NotRunning);
//!     }
//!     Ok(())
//! }
//! # assert!(check(false).is_err());
//! ```
//!
//! # Thread Safety
//!
//! [`MonitorEngine`](monitor::MonitorEngine) is `Send + Sync` and cheap to clone. Sampling cycles run on the tokio
//! blocking pool by default; listener callbacks run there too, with no engine lock held.

#![doc(html_root_url = "https://docs.rs/memwatch/0.1.0")]

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod memory;
pub mod monitor;

pub use error::{Error, Result};

/// Re-export common types for convenience
pub mod prelude {
    pub use crate::config::{DiagnosticsConfig, MonitorConfig};
    pub use crate::memory::{MemorySnapshot, MemoryState, Sampler};
    #[cfg(feature = "system")]
    pub use crate::memory::{ProcessSampler, SystemSampler};
    pub use crate::monitor::{MemoryListener, MonitorEngine, MonitorEvent};
    pub use crate::Error;
    pub use crate::Result;
}
