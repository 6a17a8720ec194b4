//! Memory access recorder: loads, stores, and their predicated forms.
//!
//! Every executed access is translated through the TLB, timed by the cache, and its
//! latency is added to the clock and to the stall bucket of the line's sharing class.
//! A predicated access whose predicate is false is skipped without touching any state.

use crate::cache::CacheModel;
use crate::core::{AccessKind, Address, CoreId, Cycle, MemoryAccess, SharingClass};
use crate::error::SimError;
use crate::recorder::{EventRecorder, TimingEvent};
use crate::state::CoreTimingState;
use crate::tlb::Tlb;

/// One side (instruction or data) of a core's memory interface.
pub struct MemoryPath<'a> {
    pub core: CoreId,
    pub tlb: &'a mut dyn Tlb,
    pub cache: &'a mut dyn CacheModel,
}

/// Timing of one access through a [`MemoryPath`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathTiming {
    pub line: Address,
    pub latency: Cycle,
    pub sharing: SharingClass,
    pub hit: bool,
}

impl MemoryPath<'_> {
    /// Translates `vaddr`, times the access at `cycle`, and logs it to `events`.
    ///
    /// Translations are re-queried on every access; nothing is cached here across a
    /// TLB flush or remap.
    pub fn access(
        &mut self,
        vaddr: Address,
        kind: AccessKind,
        cycle: Cycle,
        events: &mut EventRecorder,
    ) -> Result<PathTiming, SimError> {
        let core = self.core;
        let ppn = self
            .tlb
            .translate(vaddr)
            .map_err(|source| SimError::Tlb { core, source })?;
        let paddr = self.tlb.physical_address(vaddr, ppn);
        let outcome = self
            .cache
            .access(paddr, kind, cycle)
            .map_err(|source| SimError::Cache { core, source })?;
        let line = paddr / self.cache.line_size().max(1);
        events.record(TimingEvent {
            kind,
            line,
            start: cycle,
            latency: outcome.latency,
            hit: outcome.hit,
        });
        Ok(PathTiming {
            line,
            latency: outcome.latency,
            sharing: outcome.sharing,
            hit: outcome.hit,
        })
    }
}

/// What happened to one load/store event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessRecord {
    /// Predicate was false; nothing was counted.
    Skipped,
    /// The access executed. `latency` may be zero.
    Recorded {
        latency: Cycle,
        sharing: SharingClass,
        hit: bool,
    },
}

impl AccessRecord {
    pub fn is_skipped(&self) -> bool {
        matches!(self, AccessRecord::Skipped)
    }

    pub fn latency(&self) -> Cycle {
        match self {
            AccessRecord::Skipped => 0,
            AccessRecord::Recorded { latency, .. } => *latency,
        }
    }
}

/// Records one data access against `state`.
pub fn record(
    state: &mut CoreTimingState,
    data: &mut MemoryPath<'_>,
    events: &mut EventRecorder,
    access: MemoryAccess,
) -> Result<AccessRecord, SimError> {
    if !access.predicate {
        return Ok(AccessRecord::Skipped);
    }
    let timing = data.access(access.address, access.kind, state.clock.cycle(), events)?;
    match access.kind {
        AccessKind::Store => state.counters.writes += 1,
        AccessKind::Load | AccessKind::Fetch => state.counters.reads += 1,
    }
    state.counters.mem += 1;
    state.add_stall(timing.sharing, timing.latency);
    log::trace!(
        "{:?} {:#x}: {} cycles ({:?})",
        access.kind,
        access.address,
        timing.latency,
        timing.sharing
    );
    Ok(AccessRecord::Recorded {
        latency: timing.latency,
        sharing: timing.sharing,
        hit: timing.hit,
    })
}

pub fn record_load(
    state: &mut CoreTimingState,
    data: &mut MemoryPath<'_>,
    events: &mut EventRecorder,
    address: Address,
    size: u32,
) -> Result<AccessRecord, SimError> {
    record(state, data, events, MemoryAccess::load(address, size))
}

pub fn record_store(
    state: &mut CoreTimingState,
    data: &mut MemoryPath<'_>,
    events: &mut EventRecorder,
    address: Address,
    size: u32,
) -> Result<AccessRecord, SimError> {
    record(state, data, events, MemoryAccess::store(address, size))
}

pub fn record_pred_load(
    state: &mut CoreTimingState,
    data: &mut MemoryPath<'_>,
    events: &mut EventRecorder,
    address: Address,
    size: u32,
    predicate: bool,
) -> Result<AccessRecord, SimError> {
    record(
        state,
        data,
        events,
        MemoryAccess::load(address, size).with_predicate(predicate),
    )
}

pub fn record_pred_store(
    state: &mut CoreTimingState,
    data: &mut MemoryPath<'_>,
    events: &mut EventRecorder,
    address: Address,
    size: u32,
    predicate: bool,
) -> Result<AccessRecord, SimError> {
    record(
        state,
        data,
        events,
        MemoryAccess::store(address, size).with_predicate(predicate),
    )
}
