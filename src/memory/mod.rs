//! Memory measurement types and samplers
//!
//! This module holds everything the monitor engine consumes but does not own: the [`MemorySnapshot`] value type,
//! the [`Sampler`] capability that produces snapshots, and the built-in samplers.
//!
//! # Examples
//!
//! ```no_run
//! use memwatch::memory::{Sampler, SystemSampler};
//!
//! fn main() -> memwatch::Result<()> {
//!     let snapshot = SystemSampler::new().measure()?;
//!     println!("Available: {:.1}%", snapshot.available_ratio() * 100.0);
//!     Ok(())
//! }
//! ```

/// Memory monitoring constants
pub mod constants;

/// Samplers producing memory snapshots
pub mod sampler;

/// Memory data types
pub mod types;

pub use sampler::*;
pub use types::*;
