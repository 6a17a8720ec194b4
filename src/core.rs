//! Core vocabulary: cycles, identifiers, basic-block descriptors, and instrumentation events.

use serde::Serialize;
use std::fmt;

/// Simulated cycle counter (discrete time).
pub type Cycle = u64;

/// Virtual or physical byte address.
pub type Address = u64;

/// Identifies a simulated physical core (0..N).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CoreId(pub usize);

/// Identifies a simulated OS thread by its thread-group id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ThreadId(pub u32);

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core-{}", self.0)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gid-{}", self.0)
    }
}

/// Which path an access takes through the core's memory interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum AccessKind {
    /// Instruction fetch (instruction TLB and cache).
    Fetch,
    Load,
    Store,
}

impl AccessKind {
    pub fn is_write(self) -> bool {
        matches!(self, AccessKind::Store)
    }
}

/// Sharing status of a cache line at access time, as reported by the coherence collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum SharingClass {
    /// Only this core has touched the line.
    Private,
    /// Several cores hold the line and none has written it.
    SharedReadOnly,
    /// Several cores hold the line and at least one has written it.
    SharedReadWrite,
}

/// Static descriptor of a basic block, produced by the instrumentation collaborator.
///
/// Carries the block's instruction count and its estimated issue cost under each
/// execution mode; the core variant decides which estimate applies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicBlock {
    /// Address of the first instruction.
    pub address: Address,
    /// Size of the block's encoding in bytes (drives instruction fetch).
    pub bytes: u32,
    /// Number of instructions in the block.
    pub instrs: u32,
    /// Estimated issue cycles when executed on the host core.
    pub host_cycles: u32,
    /// Estimated issue cycles when executed by the in-memory processing unit.
    pub offload_cycles: u32,
}

impl BasicBlock {
    /// A block whose issue cost is the same in both modes.
    pub fn new(address: Address, bytes: u32, instrs: u32, cycles: u32) -> Self {
        Self {
            address,
            bytes,
            instrs,
            host_cycles: cycles,
            offload_cycles: cycles,
        }
    }

    pub fn with_offload_cycles(mut self, offload_cycles: u32) -> Self {
        self.offload_cycles = offload_cycles;
        self
    }
}

/// A single data access as delivered by instrumentation. Transient: consumed, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryAccess {
    pub kind: AccessKind,
    pub address: Address,
    /// Access width in bytes.
    pub size: u32,
    /// Predicate-satisfied flag. Always true for unpredicated forms.
    pub predicate: bool,
}

impl MemoryAccess {
    pub fn load(address: Address, size: u32) -> Self {
        Self {
            kind: AccessKind::Load,
            address,
            size,
            predicate: true,
        }
    }

    pub fn store(address: Address, size: u32) -> Self {
        Self {
            kind: AccessKind::Store,
            address,
            size,
            predicate: true,
        }
    }

    pub fn with_predicate(mut self, predicate: bool) -> Self {
        self.predicate = predicate;
        self
    }
}

/// One instrumentation event for the currently bound thread of a core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceEvent {
    BasicBlock(BasicBlock),
    Load { address: Address, size: u32 },
    Store { address: Address, size: u32 },
    PredLoad { address: Address, size: u32, predicate: bool },
    PredStore { address: Address, size: u32, predicate: bool },
    OffloadBegin,
    OffloadEnd,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::BasicBlock(bbl) => {
                write!(f, "bbl@{:#x}[{} instrs]", bbl.address, bbl.instrs)
            }
            TraceEvent::Load { address, size } => write!(f, "load {:#x}/{}", address, size),
            TraceEvent::Store { address, size } => write!(f, "store {:#x}/{}", address, size),
            TraceEvent::PredLoad {
                address,
                size,
                predicate,
            } => write!(f, "pred-load {:#x}/{} ({})", address, size, predicate),
            TraceEvent::PredStore {
                address,
                size,
                predicate,
            } => write!(f, "pred-store {:#x}/{} ({})", address, size, predicate),
            TraceEvent::OffloadBegin => write!(f, "offload-begin"),
            TraceEvent::OffloadEnd => write!(f, "offload-end"),
        }
    }
}
