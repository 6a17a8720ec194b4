//! Per-core timing engine for a multicore simulator with processing-in-memory offload.
//!
//! Each simulated core turns a serialized stream of instrumentation events into cycle
//! accounting: basic blocks advance the clock by their issue cost, memory accesses add
//! cache latency classified by coherence domain, and a contention window reconciles the
//! core's clock with congestion observed across the system.

pub mod access;
pub mod bbl;
pub mod cache;
pub mod clock;
pub mod config;
pub mod contention;
pub mod core;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod offload;
pub mod recorder;
pub mod scheduler;
pub mod simulator;
pub mod state;
pub mod thread;
pub mod timing_core;
pub mod tlb;
pub mod workload;

pub use crate::error::SimError;
pub use crate::timing_core::{CoreKind, InstrumentationHooks, TimingCore};
