//! Basic-block accountant: instruction counts, issue cost, and instruction fetch.

use crate::access::MemoryPath;
use crate::core::{AccessKind, BasicBlock, Cycle};
use crate::error::SimError;
use crate::recorder::EventRecorder;
use crate::state::CoreTimingState;
use crate::thread::ThreadStatus;

/// Issue-cost model of a core variant.
pub trait IssueModel: Send {
    fn name(&self) -> &'static str;

    /// Cycles to issue `bbl`, excluding fetch and memory stalls.
    fn block_cycles(&self, bbl: &BasicBlock, offloaded: bool) -> Cycle;

    /// Whether the block's instructions are fetched through the host instruction cache.
    fn fetches_through_host(&self, _offloaded: bool) -> bool {
        true
    }
}

/// One instruction per cycle, whatever the descriptor estimates.
///
/// A block's `host_cycles` only matter to [`PimIssue`] and [`OutOfOrderIssue`]; a
/// 10-instruction block estimated at 8 cycles still costs 10 here.
#[derive(Clone, Copy, Debug, Default)]
pub struct InOrderIssue;

impl IssueModel for InOrderIssue {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn block_cycles(&self, bbl: &BasicBlock, _offloaded: bool) -> Cycle {
        bbl.instrs as Cycle
    }
}

/// Host blocks use the host estimate; offloaded blocks use the in-memory unit's estimate
/// and are fed from the unit's own instruction buffer.
#[derive(Clone, Copy, Debug, Default)]
pub struct PimIssue;

impl IssueModel for PimIssue {
    fn name(&self) -> &'static str {
        "pim"
    }

    fn block_cycles(&self, bbl: &BasicBlock, offloaded: bool) -> Cycle {
        if offloaded {
            bbl.offload_cycles as Cycle
        } else {
            bbl.host_cycles as Cycle
        }
    }

    fn fetches_through_host(&self, offloaded: bool) -> bool {
        !offloaded
    }
}

/// Superscalar issue: the host estimate divided across `width` issue slots.
#[derive(Clone, Copy, Debug)]
pub struct OutOfOrderIssue {
    width: u32,
}

impl OutOfOrderIssue {
    pub fn new(width: u32) -> Self {
        Self {
            width: width.max(1),
        }
    }
}

impl IssueModel for OutOfOrderIssue {
    fn name(&self) -> &'static str {
        "ooo"
    }

    fn block_cycles(&self, bbl: &BasicBlock, _offloaded: bool) -> Cycle {
        bbl.host_cycles.div_ceil(self.width) as Cycle
    }
}

/// Cycles one block added, split by cause.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockTiming {
    pub issue_cycles: Cycle,
    pub fetch_cycles: Cycle,
}

/// Accounts one dynamic execution of `bbl` for the bound thread.
pub fn account_block<M: IssueModel + ?Sized>(
    model: &M,
    state: &mut CoreTimingState,
    thread: &mut ThreadStatus,
    fetch: &mut MemoryPath<'_>,
    events: &mut EventRecorder,
    bbl: &BasicBlock,
) -> Result<BlockTiming, SimError> {
    let offloaded = thread.is_offloaded();
    let instrs = bbl.instrs as u64;

    state.counters.total += instrs;
    state.counters.fetches += instrs;
    if offloaded {
        state.counters.offloaded += instrs;
    }
    thread.count_block(instrs, offloaded);

    let issue_cycles = model.block_cycles(bbl, offloaded);
    state.clock.advance(issue_cycles);

    let mut fetch_cycles = 0;
    if bbl.bytes > 0 && model.fetches_through_host(offloaded) {
        let line_size = fetch.cache.line_size().max(1);
        let mask = !(line_size - 1);
        // Blocks at the top of the address space stop at the last addressable byte.
        let last_line = bbl.address.saturating_add(bbl.bytes as u64 - 1) & mask;
        let mut line_addr = bbl.address & mask;
        loop {
            let timing = fetch.access(line_addr, AccessKind::Fetch, state.clock.cycle(), events)?;
            state.clock.advance(timing.latency);
            fetch_cycles += timing.latency;
            match line_addr.checked_add(line_size) {
                Some(next) if next <= last_line => line_addr = next,
                _ => break,
            }
        }
        state.fetch_stall_cycles += fetch_cycles;
    }

    log::trace!(
        "{} bbl {:#x}: {} instrs, {} issue + {} fetch cycles{}",
        model.name(),
        bbl.address,
        instrs,
        issue_cycles,
        fetch_cycles,
        if offloaded { " (offloaded)" } else { "" }
    );
    Ok(BlockTiming {
        issue_cycles,
        fetch_cycles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::tests::{FlatTlb, ScriptedCache};
    use crate::core::{CoreId, SharingClass, ThreadId};

    fn run(
        model: &dyn IssueModel,
        thread: &mut ThreadStatus,
        cache: &mut ScriptedCache,
        bbl: &BasicBlock,
    ) -> (CoreTimingState, BlockTiming) {
        let mut state = CoreTimingState::new(CoreId(0), 1000);
        let mut tlb = FlatTlb;
        let mut events = EventRecorder::new();
        let mut fetch = MemoryPath {
            core: CoreId(0),
            tlb: &mut tlb,
            cache,
        };
        let timing = account_block(model, &mut state, thread, &mut fetch, &mut events, bbl).unwrap();
        (state, timing)
    }

    #[test]
    fn ten_instruction_block_costing_eight() {
        let mut thread = ThreadStatus::new(ThreadId(0));
        let mut cache = ScriptedCache::default();
        let bbl = BasicBlock::new(0x1000, 40, 10, 8);
        let (state, timing) = run(&PimIssue, &mut thread, &mut cache, &bbl);
        assert_eq!(state.counters.total, 10);
        assert_eq!(state.counters.fetches, 10);
        assert_eq!(state.clock.cycle(), 8);
        assert_eq!(timing.issue_cycles, 8);
        assert_eq!(state.stalls.total(), 0);
        assert_eq!(cache.accesses, 1);
    }

    #[test]
    fn fetch_misses_advance_clock_outside_stall_buckets() {
        let mut thread = ThreadStatus::new(ThreadId(0));
        let mut cache =
            ScriptedCache::new(&[(30, SharingClass::Private), (30, SharingClass::Private)]);
        // 0x1030..0x1050 straddles two 64-byte lines.
        let bbl = BasicBlock::new(0x1030, 32, 8, 8);
        let (state, timing) = run(&InOrderIssue, &mut thread, &mut cache, &bbl);
        assert_eq!(timing.fetch_cycles, 60);
        assert_eq!(state.fetch_stall_cycles, 60);
        assert_eq!(state.clock.cycle(), 68);
        assert_eq!(state.stalls.total(), 0);
    }

    #[test]
    fn offloaded_block_uses_offload_estimate() {
        let mut thread = ThreadStatus::new(ThreadId(1));
        thread.tracker_mut().begin().unwrap();
        let mut cache = ScriptedCache::default();
        let bbl = BasicBlock::new(0x2000, 16, 4, 12).with_offload_cycles(2);
        let (state, _) = run(&PimIssue, &mut thread, &mut cache, &bbl);
        assert_eq!(state.clock.cycle(), 2);
        assert_eq!(state.counters.total, 4);
        assert_eq!(state.counters.offloaded, 4);
        assert_eq!(thread.offload_instrs(), 4);
        assert_eq!(cache.accesses, 0);
    }

    #[test]
    fn block_at_top_of_address_space_fetches_without_overflow() {
        let mut thread = ThreadStatus::new(ThreadId(0));
        let mut cache = ScriptedCache::new(&[(7, SharingClass::Private)]);
        let bbl = BasicBlock::new(u64::MAX - 15, 16, 4, 4);
        let (state, timing) = run(&PimIssue, &mut thread, &mut cache, &bbl);
        assert_eq!(cache.accesses, 1);
        assert_eq!(timing.fetch_cycles, 7);
        assert_eq!(state.clock.cycle(), 11);
        assert_eq!(state.counters.total, 4);
    }

    #[test]
    fn block_ending_on_line_boundary_fetches_one_line() {
        let mut thread = ThreadStatus::new(ThreadId(0));
        let mut cache = ScriptedCache::default();
        let bbl = BasicBlock::new(0x1000, 64, 16, 16);
        run(&PimIssue, &mut thread, &mut cache, &bbl);
        assert_eq!(cache.accesses, 1);
    }

    #[test]
    fn in_order_ignores_descriptor_estimate() {
        let mut thread = ThreadStatus::new(ThreadId(0));
        let mut cache = ScriptedCache::default();
        let bbl = BasicBlock::new(0x1000, 0, 10, 8);
        let (state, _) = run(&InOrderIssue, &mut thread, &mut cache, &bbl);
        assert_eq!(state.clock.cycle(), 10);
        let (state, _) = run(&PimIssue, &mut thread, &mut cache, &bbl);
        assert_eq!(state.clock.cycle(), 8);
    }

    #[test]
    fn out_of_order_divides_across_width() {
        let model = OutOfOrderIssue::new(4);
        let bbl = BasicBlock::new(0, 0, 10, 10);
        assert_eq!(model.block_cycles(&bbl, false), 3);
        assert_eq!(OutOfOrderIssue::new(0).block_cycles(&bbl, false), 10);
        assert_eq!(InOrderIssue.block_cycles(&bbl, true), 10);
    }
}
