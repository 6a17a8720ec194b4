//! Error types. Every `SimError` is fatal to the simulation run.

use crate::core::{Address, CoreId, Cycle, ThreadId};
use thiserror::Error;

/// Failure reported by a cache/coherence collaborator.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("shared memory state is poisoned")]
    Poisoned,
    #[error("line {line:#x} has no sharer after access by {core}")]
    MissingSharer { line: Address, core: CoreId },
}

/// Failure reported by a TLB collaborator.
#[derive(Debug, Error)]
pub enum TlbError {
    #[error("page table state is poisoned")]
    Poisoned,
    #[error("out of physical frames translating vpn {vpn:#x} (limit {limit})")]
    OutOfFrames { vpn: u64, limit: u64 },
    #[error("cannot remap onto frame {ppn:#x}: it already backs another page")]
    FrameInUse { ppn: u64 },
}

/// Failure reported by the contention model.
#[derive(Debug, Error)]
pub enum ContentionError {
    #[error("no contention estimate available for {core} at cycle {cycle}")]
    NoEstimate { core: CoreId, cycle: Cycle },
    #[error("contention model state is poisoned")]
    Poisoned,
}

/// Errors that terminate a simulation run.
///
/// Protocol variants name the core (and thread, when one is bound) and the invariant
/// that failed.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("{core} {gid}: offload-begin while already offloaded")]
    NestedOffload { core: CoreId, gid: ThreadId },

    #[error("{core} {gid}: offload-end outside an offload region")]
    UnmatchedOffloadEnd { core: CoreId, gid: ThreadId },

    #[error("{core} {gid}: thread left while inside an offload region")]
    LeaveWhileOffloaded { core: CoreId, gid: ThreadId },

    #[error("{core} {gid}: context switch while inside an offload region")]
    SwitchWhileOffloaded { core: CoreId, gid: ThreadId },

    #[error("{core}: no thread attached")]
    NoThreadAttached { core: CoreId },

    #[error("{core}: join of {incoming} while {current} is still attached")]
    ThreadAlreadyAttached {
        core: CoreId,
        current: ThreadId,
        incoming: ThreadId,
    },

    #[error("{core}: contention window opened twice")]
    ContentionWindowOpen { core: CoreId },

    #[error("{core}: contention window closed without being opened")]
    ContentionWindowClosed { core: CoreId },

    #[error("{core}: clock would move backward from {from} to {to}")]
    ClockRegression { core: CoreId, from: Cycle, to: Cycle },

    #[error("{core}: cache collaborator failed: {source}")]
    Cache {
        core: CoreId,
        #[source]
        source: CacheError,
    },

    #[error("{core}: TLB collaborator failed: {source}")]
    Tlb {
        core: CoreId,
        #[source]
        source: TlbError,
    },

    #[error("{core}: contention model failed: {source}")]
    Contention {
        core: CoreId,
        #[source]
        source: ContentionError,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
