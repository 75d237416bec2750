//! Profiling support for the Marten VM.
//!
//! Provides atomic counters for the adaptive dispatch machinery: message
//! sends, inline-cache behavior, meta-object resolutions, and assumption
//! invalidations. Counters are cheap enough to stay enabled in production
//! builds and are the basis for the VM's zero-overhead guarantees being
//! testable at all.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod stats;

pub use stats::{DispatchStats, DispatchStatsSnapshot};
