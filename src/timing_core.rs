//! Timing cores: the capability interface the simulator drives, and its variants.
//!
//! All variants share one engine, [`Core`], and differ only in their [`IssueModel`]:
//! [`SimpleCore`] issues one instruction per cycle, [`PimCore`] uses the descriptor's host
//! or offload estimate depending on the thread's offload state, and [`OutOfOrderCore`]
//! spreads the host estimate over several issue slots.
//!
//! Events for the bound thread go through [`BoundThread`], a callback object that holds
//! direct references to the core's timing state and the thread's offload status for the
//! duration of the binding.

use crate::access::{self, AccessRecord, MemoryPath};
use crate::bbl::{self, BlockTiming, InOrderIssue, IssueModel, OutOfOrderIssue, PimIssue};
use crate::cache::{CacheModel, FilterCache};
use crate::config::{CoreConfig, MAX_CORES};
use crate::contention::ContentionModel;
use crate::core::{Address, BasicBlock, CoreId, Cycle, MemoryAccess, SharingClass, ThreadId, TraceEvent};
use crate::error::SimError;
use crate::memory::SharedMemory;
use crate::metrics::CoreStats;
use crate::offload::OffloadState;
use crate::recorder::{CoreRecorder, EventRecorder};
use crate::state::CoreTimingState;
use crate::thread::{ThreadSlot, ThreadStatus};
use crate::tlb::{PageTable, PageTlb, Tlb};
use serde::Deserialize;
use std::sync::{Arc, Mutex};

/// Result of dispatching one instrumentation event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    Block(BlockTiming),
    Access(AccessRecord),
    Offload(OffloadState),
}

/// Event handlers the instrumentation collaborator calls for the bound thread.
pub trait InstrumentationHooks {
    fn basic_block(&mut self, bbl: &BasicBlock) -> Result<BlockTiming, SimError>;
    fn load(&mut self, address: Address, size: u32) -> Result<AccessRecord, SimError>;
    fn store(&mut self, address: Address, size: u32) -> Result<AccessRecord, SimError>;
    fn pred_load(&mut self, address: Address, size: u32, predicate: bool)
        -> Result<AccessRecord, SimError>;
    fn pred_store(&mut self, address: Address, size: u32, predicate: bool)
        -> Result<AccessRecord, SimError>;
    fn offload_begin(&mut self) -> Result<(), SimError>;
    fn offload_end(&mut self) -> Result<(), SimError>;

    fn dispatch(&mut self, event: &TraceEvent) -> Result<EventOutcome, SimError> {
        Ok(match *event {
            TraceEvent::BasicBlock(ref bbl) => EventOutcome::Block(self.basic_block(bbl)?),
            TraceEvent::Load { address, size } => EventOutcome::Access(self.load(address, size)?),
            TraceEvent::Store { address, size } => {
                EventOutcome::Access(self.store(address, size)?)
            }
            TraceEvent::PredLoad {
                address,
                size,
                predicate,
            } => EventOutcome::Access(self.pred_load(address, size, predicate)?),
            TraceEvent::PredStore {
                address,
                size,
                predicate,
            } => EventOutcome::Access(self.pred_store(address, size, predicate)?),
            TraceEvent::OffloadBegin => {
                self.offload_begin()?;
                EventOutcome::Offload(OffloadState::Offloaded)
            }
            TraceEvent::OffloadEnd => {
                self.offload_end()?;
                EventOutcome::Offload(OffloadState::Host)
            }
        })
    }
}

/// A core's event interface while a thread is bound to it.
pub struct BoundThread<'a> {
    core: CoreId,
    model: &'a dyn IssueModel,
    state: &'a mut CoreTimingState,
    thread: &'a mut ThreadStatus,
    itlb: &'a mut dyn Tlb,
    l1i: &'a mut dyn CacheModel,
    dtlb: &'a mut dyn Tlb,
    l1d: &'a mut dyn CacheModel,
    events: &'a mut EventRecorder,
}

impl BoundThread<'_> {
    pub fn gid(&self) -> ThreadId {
        self.thread.gid()
    }

    fn access(&mut self, access: MemoryAccess) -> Result<AccessRecord, SimError> {
        let mut data = MemoryPath {
            core: self.core,
            tlb: &mut *self.dtlb,
            cache: &mut *self.l1d,
        };
        access::record(&mut *self.state, &mut data, &mut *self.events, access)
    }
}

impl InstrumentationHooks for BoundThread<'_> {
    fn basic_block(&mut self, bbl: &BasicBlock) -> Result<BlockTiming, SimError> {
        let mut fetch = MemoryPath {
            core: self.core,
            tlb: &mut *self.itlb,
            cache: &mut *self.l1i,
        };
        bbl::account_block(
            self.model,
            &mut *self.state,
            &mut *self.thread,
            &mut fetch,
            &mut *self.events,
            bbl,
        )
    }

    fn load(&mut self, address: Address, size: u32) -> Result<AccessRecord, SimError> {
        self.access(MemoryAccess::load(address, size))
    }

    fn store(&mut self, address: Address, size: u32) -> Result<AccessRecord, SimError> {
        self.access(MemoryAccess::store(address, size))
    }

    fn pred_load(
        &mut self,
        address: Address,
        size: u32,
        predicate: bool,
    ) -> Result<AccessRecord, SimError> {
        self.access(MemoryAccess::load(address, size).with_predicate(predicate))
    }

    fn pred_store(
        &mut self,
        address: Address,
        size: u32,
        predicate: bool,
    ) -> Result<AccessRecord, SimError> {
        self.access(MemoryAccess::store(address, size).with_predicate(predicate))
    }

    fn offload_begin(&mut self) -> Result<(), SimError> {
        let gid = self.thread.gid();
        self.thread
            .tracker_mut()
            .begin()
            .map_err(|_| SimError::NestedOffload { core: self.core, gid })?;
        log::debug!("{} {}: offload begin at {}", self.core, gid, self.state.clock.cycle());
        Ok(())
    }

    fn offload_end(&mut self) -> Result<(), SimError> {
        let gid = self.thread.gid();
        self.thread
            .tracker_mut()
            .end()
            .map_err(|_| SimError::UnmatchedOffloadEnd { core: self.core, gid })?;
        log::debug!("{} {}: offload end at {}", self.core, gid, self.state.clock.cycle());
        Ok(())
    }
}

/// Which core variant to build.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CoreKind {
    Simple,
    #[default]
    Pim,
    Ooo,
}

impl CoreKind {
    /// Builds a core with real caches and TLBs. Rejects an invalid `config` or a core id
    /// the sharing directory cannot track.
    pub fn build(
        self,
        id: CoreId,
        config: &CoreConfig,
        memory: Arc<SharedMemory>,
        page_table: Arc<Mutex<PageTable>>,
    ) -> Result<Box<dyn TimingCore>, SimError> {
        config.validate()?;
        if id.0 >= MAX_CORES {
            return Err(SimError::Config(format!(
                "{id}: the sharing directory tracks at most {MAX_CORES} cores"
            )));
        }
        let parts = CoreParts {
            l1i: Box::new(FilterCache::new(id, config.l1i.clone(), memory.clone())),
            l1d: Box::new(FilterCache::new(id, config.l1d.clone(), memory)),
            itlb: Box::new(PageTlb::new(config.tlb.clone(), page_table.clone())),
            dtlb: Box::new(PageTlb::new(config.tlb.clone(), page_table)),
        };
        let name = format!("{}-{}", self.label(), id.0);
        Ok(match self {
            CoreKind::Simple => Box::new(Core::new(id, name, InOrderIssue, config, parts)),
            CoreKind::Pim => Box::new(Core::new(id, name, PimIssue, config, parts)),
            CoreKind::Ooo => Box::new(Core::new(
                id,
                name,
                OutOfOrderIssue::new(config.issue_width),
                config,
                parts,
            )),
        })
    }

    pub fn label(self) -> &'static str {
        match self {
            CoreKind::Simple => "simple",
            CoreKind::Pim => "pim",
            CoreKind::Ooo => "ooo",
        }
    }
}

/// Capability interface the simulator drives, independent of the core variant.
pub trait TimingCore: Send {
    fn id(&self) -> CoreId;
    fn name(&self) -> &str;

    /// Adds `cycles` to the core's clock.
    fn advance(&mut self, cycles: Cycle);
    /// Records one data access for the bound thread.
    fn record_access(&mut self, access: MemoryAccess) -> Result<AccessRecord, SimError>;
    /// Unhalted cycles.
    fn cycles(&self) -> Cycle;
    /// Instructions of every executed basic block.
    fn instrs(&self) -> u64;

    fn dispatch(&mut self, event: &TraceEvent) -> Result<EventOutcome, SimError>;

    fn join(&mut self, status: ThreadStatus) -> Result<(), SimError>;
    fn leave(&mut self) -> Result<ThreadStatus, SimError>;
    fn context_switch(&mut self, incoming: ThreadStatus) -> Result<ThreadStatus, SimError>;
    fn bound_thread(&self) -> Option<&ThreadStatus>;

    fn begin_phase(&mut self, start: Cycle);
    fn halt_until(&mut self, cycle: Cycle);
    fn past_bound(&self) -> bool;
    fn cur_cycle(&self) -> Cycle;
    fn phase_cycles(&self) -> Cycle;
    fn bound_cycles(&self) -> Cycle;

    fn c_sim_start(&mut self, model: &mut dyn ContentionModel) -> Result<Cycle, SimError>;
    fn c_sim_end(&mut self, model: &mut dyn ContentionModel) -> Result<Cycle, SimError>;
    fn event_recorder(&self) -> &EventRecorder;

    fn flush_tlb(&mut self);
    fn update_tlb(&mut self, old_ppn: u64, new_ppn: u64) -> Result<(), SimError>;
    fn clflush_page(&mut self, ppn: u64, start: Cycle) -> Cycle;
    /// Stall cycles attributed directly by the memory hierarchy.
    fn inc_mem_access_latency(&mut self, cycles: Cycle, class: SharingClass);

    fn stats(&self) -> CoreStats;
}

/// Private caches and TLBs of one core.
pub struct CoreParts {
    pub l1i: Box<dyn CacheModel>,
    pub l1d: Box<dyn CacheModel>,
    pub itlb: Box<dyn Tlb>,
    pub dtlb: Box<dyn Tlb>,
}

/// Timing engine shared by every core variant.
pub struct Core<M> {
    id: CoreId,
    name: String,
    model: M,
    state: CoreTimingState,
    l1i: Box<dyn CacheModel>,
    l1d: Box<dyn CacheModel>,
    itlb: Box<dyn Tlb>,
    dtlb: Box<dyn Tlb>,
    recorder: CoreRecorder,
    slot: ThreadSlot,
    clflush_line_cycles: Cycle,
}

pub type SimpleCore = Core<InOrderIssue>;
pub type PimCore = Core<PimIssue>;
pub type OutOfOrderCore = Core<OutOfOrderIssue>;

impl<M: IssueModel> Core<M> {
    pub fn new(id: CoreId, name: String, model: M, config: &CoreConfig, parts: CoreParts) -> Self {
        Self {
            id,
            name,
            model,
            state: CoreTimingState::new(id, config.phase_length),
            l1i: parts.l1i,
            l1d: parts.l1d,
            itlb: parts.itlb,
            dtlb: parts.dtlb,
            recorder: CoreRecorder::new(id),
            slot: ThreadSlot::new(id),
            clflush_line_cycles: config.clflush_line_cycles as Cycle,
        }
    }

    /// Binds the event interface to the attached thread.
    pub fn bind(&mut self) -> Result<BoundThread<'_>, SimError> {
        let thread = self.slot.current_mut()?;
        Ok(BoundThread {
            core: self.id,
            model: &self.model,
            state: &mut self.state,
            thread,
            itlb: self.itlb.as_mut(),
            l1i: self.l1i.as_mut(),
            dtlb: self.dtlb.as_mut(),
            l1d: self.l1d.as_mut(),
            events: self.recorder.event_recorder_mut(),
        })
    }

    pub fn state(&self) -> &CoreTimingState {
        &self.state
    }

    pub fn offload_instrs(&self) -> u64 {
        self.state.counters.offloaded
    }

    pub fn host_instrs(&self) -> u64 {
        self.state.counters.total - self.state.counters.offloaded
    }

    pub fn mem_instrs(&self) -> u64 {
        self.state.counters.mem
    }

    pub fn ins_tlb(&self) -> &dyn Tlb {
        self.itlb.as_ref()
    }

    pub fn data_tlb(&self) -> &dyn Tlb {
        self.dtlb.as_ref()
    }

    pub fn ins_cache(&self) -> &dyn CacheModel {
        self.l1i.as_ref()
    }

    pub fn data_cache(&self) -> &dyn CacheModel {
        self.l1d.as_ref()
    }

    pub fn core_recorder(&self) -> &CoreRecorder {
        &self.recorder
    }
}

impl<M: IssueModel> TimingCore for Core<M> {
    fn id(&self) -> CoreId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn advance(&mut self, cycles: Cycle) {
        self.state.clock.advance(cycles);
    }

    fn record_access(&mut self, access: MemoryAccess) -> Result<AccessRecord, SimError> {
        self.bind()?.access(access)
    }

    fn cycles(&self) -> Cycle {
        self.state.clock.unhalted_cycles()
    }

    fn instrs(&self) -> u64 {
        self.state.counters.total
    }

    fn dispatch(&mut self, event: &TraceEvent) -> Result<EventOutcome, SimError> {
        log::trace!("{}: {}", self.name, event);
        self.bind()?.dispatch(event)
    }

    fn join(&mut self, status: ThreadStatus) -> Result<(), SimError> {
        self.slot.join(status)
    }

    fn leave(&mut self) -> Result<ThreadStatus, SimError> {
        self.slot.leave()
    }

    fn context_switch(&mut self, incoming: ThreadStatus) -> Result<ThreadStatus, SimError> {
        self.slot.context_switch(incoming)
    }

    fn bound_thread(&self) -> Option<&ThreadStatus> {
        self.slot.current().ok()
    }

    fn begin_phase(&mut self, start: Cycle) {
        self.state.clock.begin_phase(start);
    }

    fn halt_until(&mut self, cycle: Cycle) {
        self.state.clock.halt_until(cycle);
    }

    fn past_bound(&self) -> bool {
        self.state.clock.past_bound()
    }

    fn cur_cycle(&self) -> Cycle {
        self.state.clock.cycle()
    }

    fn phase_cycles(&self) -> Cycle {
        self.state.clock.phase_cycles()
    }

    fn bound_cycles(&self) -> Cycle {
        self.state.clock.bound_cycles()
    }

    fn c_sim_start(&mut self, model: &mut dyn ContentionModel) -> Result<Cycle, SimError> {
        self.recorder.c_sim_start(&mut self.state.clock, model)
    }

    fn c_sim_end(&mut self, model: &mut dyn ContentionModel) -> Result<Cycle, SimError> {
        self.recorder.c_sim_end(&mut self.state.clock, model)
    }

    fn event_recorder(&self) -> &EventRecorder {
        self.recorder.event_recorder()
    }

    fn flush_tlb(&mut self) {
        self.itlb.flush();
        self.dtlb.flush();
    }

    fn update_tlb(&mut self, old_ppn: u64, new_ppn: u64) -> Result<(), SimError> {
        let core = self.id;
        self.itlb
            .update_page(old_ppn, new_ppn)
            .and_then(|()| self.dtlb.update_page(old_ppn, new_ppn))
            .map_err(|source| SimError::Tlb { core, source })
    }

    fn clflush_page(&mut self, ppn: u64, start: Cycle) -> Cycle {
        let done = self
            .dtlb
            .clflush_page(ppn, start)
            .max(self.itlb.clflush_page(ppn, start));
        let page_bits = self.dtlb.page_bits();
        let lines = self.l1d.invalidate_page(ppn, page_bits) + self.l1i.invalidate_page(ppn, page_bits);
        done + lines * self.clflush_line_cycles
    }

    fn inc_mem_access_latency(&mut self, cycles: Cycle, class: SharingClass) {
        self.state.add_stall(class, cycles);
    }

    fn stats(&self) -> CoreStats {
        CoreStats::collect(
            self.id,
            &self.name,
            &self.state,
            self.recorder.event_recorder().total_recorded(),
            self.slot.switches(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::tests::{FlatTlb, ScriptedCache};
    use crate::contention::FixedContention;

    fn pim_core(data: &[(Cycle, SharingClass)]) -> PimCore {
        let parts = CoreParts {
            l1i: Box::new(ScriptedCache::default()),
            l1d: Box::new(ScriptedCache::new(data)),
            itlb: Box::new(FlatTlb),
            dtlb: Box::new(FlatTlb),
        };
        Core::new(CoreId(0), "pim-0".into(), PimIssue, &CoreConfig::default(), parts)
    }

    #[test]
    fn events_require_a_bound_thread() {
        let mut core = pim_core(&[]);
        let err = core.dispatch(&TraceEvent::OffloadBegin).unwrap_err();
        assert!(matches!(err, SimError::NoThreadAttached { core: CoreId(0) }));
    }

    #[test]
    fn offload_region_routes_instructions_not_memory_timing() {
        let mut core = pim_core(&[(5, SharingClass::SharedReadWrite)]);
        core.join(ThreadStatus::new(ThreadId(1))).unwrap();
        {
            let mut hooks = core.bind().unwrap();
            hooks.offload_begin().unwrap();
            hooks
                .basic_block(&BasicBlock::new(0x1000, 4, 1, 1))
                .unwrap();
            hooks.store(0x8000, 8).unwrap();
            hooks.offload_end().unwrap();
        }
        assert_eq!(core.offload_instrs(), 1);
        assert_eq!(core.host_instrs(), 0);
        assert_eq!(core.state().counters.writes, 1);
        assert_eq!(core.state().stalls.shared_read_write, 5);
        let status = core.leave().unwrap();
        assert_eq!(status.offload_instrs(), 1);
        assert_eq!(status.tracker().regions(), 1);
    }

    #[test]
    fn nested_offload_is_fatal() {
        let mut core = pim_core(&[]);
        core.join(ThreadStatus::new(ThreadId(2))).unwrap();
        core.dispatch(&TraceEvent::OffloadBegin).unwrap();
        let err = core.dispatch(&TraceEvent::OffloadBegin).unwrap_err();
        assert!(matches!(
            err,
            SimError::NestedOffload {
                core: CoreId(0),
                gid: ThreadId(2)
            }
        ));
    }

    #[test]
    fn unmatched_offload_end_is_fatal() {
        let mut core = pim_core(&[]);
        core.join(ThreadStatus::new(ThreadId(2))).unwrap();
        assert!(matches!(
            core.dispatch(&TraceEvent::OffloadEnd),
            Err(SimError::UnmatchedOffloadEnd { .. })
        ));
    }

    #[test]
    fn contention_window_is_attributed_to_bridge() {
        let mut core = pim_core(&[]);
        core.join(ThreadStatus::new(ThreadId(0))).unwrap();
        core.dispatch(&TraceEvent::BasicBlock(BasicBlock::new(0, 0, 10, 8)))
            .unwrap();
        let mut model = FixedContention::new(20);
        core.c_sim_start(&mut model).unwrap();
        core.c_sim_end(&mut model).unwrap();
        assert_eq!(core.cur_cycle(), 28);
        assert_eq!(core.stats().contention_cycles, 20);
        assert_eq!(core.state().stalls.total(), 0);
    }

    #[test]
    fn context_switch_preserves_clock() {
        let mut core = pim_core(&[]);
        core.join(ThreadStatus::new(ThreadId(0))).unwrap();
        core.dispatch(&TraceEvent::BasicBlock(BasicBlock::new(0, 0, 3, 3)))
            .unwrap();
        let out = core.context_switch(ThreadStatus::new(ThreadId(1))).unwrap();
        assert_eq!(out.instrs(), 3);
        assert_eq!(core.cur_cycle(), 3);
        assert_eq!(core.bound_thread().map(|t| t.gid()), Some(ThreadId(1)));
    }

    #[test]
    fn external_latency_lands_in_bucket() {
        let mut core = pim_core(&[]);
        core.inc_mem_access_latency(7, SharingClass::SharedReadOnly);
        assert_eq!(core.state().stalls.shared_read_only, 7);
        assert_eq!(core.state().stall_cycles_added, 7);
        assert_eq!(core.cur_cycle(), 7);
    }

    #[test]
    fn built_core_uses_real_collaborators() {
        let config = CoreConfig::default();
        let memory = SharedMemory::new(Default::default());
        let table = PageTable::shared(config.tlb.max_frames);
        let mut core = CoreKind::Pim.build(CoreId(0), &config, memory, table).unwrap();
        core.join(ThreadStatus::new(ThreadId(0))).unwrap();
        let first = core.record_access(MemoryAccess::load(0x1000, 8)).unwrap();
        let second = core.record_access(MemoryAccess::load(0x1008, 8)).unwrap();
        assert!(first.latency() > 0);
        assert_eq!(second.latency(), 0);
        assert_eq!(core.stats().mem_instrs, 2);
        let done = core.clflush_page(0, 100);
        assert!(done > 100);
    }

    fn last_line(core: &dyn TimingCore) -> u64 {
        core.event_recorder().events().last().map(|e| e.line).unwrap()
    }

    #[test]
    fn remapped_page_is_retranslated_on_next_access() {
        let config = CoreConfig::default();
        let memory = SharedMemory::new(Default::default());
        let table = PageTable::shared(config.tlb.max_frames);
        let mut core = CoreKind::Pim.build(CoreId(0), &config, memory, table).unwrap();
        core.join(ThreadStatus::new(ThreadId(0))).unwrap();

        core.record_access(MemoryAccess::load(0x1040, 8)).unwrap();
        let warm = core.record_access(MemoryAccess::load(0x1040, 8)).unwrap();
        assert_eq!(warm.latency(), 0);
        let old_line = last_line(core.as_ref());
        assert_eq!(old_line, 1);

        core.update_tlb(0, 7).unwrap();
        let moved = core.record_access(MemoryAccess::load(0x1040, 8)).unwrap();
        assert!(moved.latency() > 0);
        let new_line = last_line(core.as_ref());
        assert_ne!(new_line, old_line);
        assert_eq!(new_line, (7 << 12 | 0x40) / 64);

        core.flush_tlb();
        let after_flush = core.record_access(MemoryAccess::load(0x1040, 8)).unwrap();
        assert_eq!(after_flush.latency(), 0);
        assert_eq!(last_line(core.as_ref()), new_line);
    }

    #[test]
    fn build_rejects_untrackable_core_id() {
        let config = CoreConfig::default();
        let memory = SharedMemory::new(Default::default());
        let table = PageTable::shared(config.tlb.max_frames);
        let result = CoreKind::Simple.build(CoreId(64), &config, memory, table);
        assert!(matches!(result, Err(SimError::Config(_))));
    }

    #[test]
    fn build_rejects_cache_without_sets() {
        let mut config = CoreConfig::default();
        config.l1d.associativity = 0;
        let memory = SharedMemory::new(Default::default());
        let table = PageTable::shared(config.tlb.max_frames);
        assert!(CoreKind::Ooo.build(CoreId(0), &config, memory, table).is_err());
    }
}
