//! Per-core timing state: clock, instruction counters, and coherence-domain stall buckets.

use crate::clock::PhaseClock;
use crate::core::{CoreId, Cycle, SharingClass};
use serde::Serialize;

/// Instruction counters. `mem == reads + writes` always holds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InstrCounters {
    /// Instructions of every executed basic block.
    pub total: u64,
    /// Subset of `total` executed inside offload regions.
    pub offloaded: u64,
    pub reads: u64,
    pub writes: u64,
    pub mem: u64,
    pub fetches: u64,
}

/// Memory-stall cycles split by the sharing status of the accessed line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StallBuckets {
    pub private: Cycle,
    pub shared_read_only: Cycle,
    pub shared_read_write: Cycle,
}

impl StallBuckets {
    pub fn add(&mut self, class: SharingClass, cycles: Cycle) {
        match class {
            SharingClass::Private => self.private += cycles,
            SharingClass::SharedReadOnly => self.shared_read_only += cycles,
            SharingClass::SharedReadWrite => self.shared_read_write += cycles,
        }
    }

    pub fn get(&self, class: SharingClass) -> Cycle {
        match class {
            SharingClass::Private => self.private,
            SharingClass::SharedReadOnly => self.shared_read_only,
            SharingClass::SharedReadWrite => self.shared_read_write,
        }
    }

    pub fn total(&self) -> Cycle {
        self.private + self.shared_read_only + self.shared_read_write
    }
}

/// All timing state of one simulated core. Lives for the whole simulation.
#[derive(Clone, Debug)]
pub struct CoreTimingState {
    pub clock: PhaseClock,
    pub counters: InstrCounters,
    pub stalls: StallBuckets,
    /// Every stall cycle ever classified; must equal `stalls.total()`.
    pub stall_cycles_added: Cycle,
    /// Instruction-fetch latency, kept out of the data stall buckets.
    pub fetch_stall_cycles: Cycle,
}

impl CoreTimingState {
    pub fn new(core: CoreId, phase_length: Cycle) -> Self {
        Self {
            clock: PhaseClock::new(core, phase_length),
            counters: InstrCounters::default(),
            stalls: StallBuckets::default(),
            stall_cycles_added: 0,
            fetch_stall_cycles: 0,
        }
    }

    /// Attributes `cycles` of memory stall to `class` and advances the clock by the same amount.
    pub fn add_stall(&mut self, class: SharingClass, cycles: Cycle) {
        self.stalls.add(class, cycles);
        self.stall_cycles_added += cycles;
        self.clock.advance(cycles);
    }
}
