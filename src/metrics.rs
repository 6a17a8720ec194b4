//! Statistics: read-only per-core snapshots and their system-wide aggregate.

use crate::core::{CoreId, Cycle};
use crate::state::CoreTimingState;
use serde::Serialize;
use std::collections::BTreeMap;

/// Snapshot of one core's counters, taken for periodic aggregation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CoreStats {
    pub core: usize,
    pub name: String,
    pub instrs: u64,
    pub offload_instrs: u64,
    pub host_instrs: u64,
    pub read_instrs: u64,
    pub write_instrs: u64,
    pub mem_instrs: u64,
    pub instruction_fetches: u64,
    pub cycles: Cycle,
    pub unhalted_cycles: Cycle,
    pub halted_cycles: Cycle,
    pub phase_cycles: Cycle,
    pub contention_cycles: Cycle,
    pub fetch_stall_cycles: Cycle,
    pub private_access_cycles: Cycle,
    pub shared_ro_access_cycles: Cycle,
    pub shared_rw_access_cycles: Cycle,
    pub events_recorded: u64,
    pub context_switches: u64,
}

impl CoreStats {
    pub fn collect(
        core: CoreId,
        name: &str,
        state: &CoreTimingState,
        events_recorded: u64,
        context_switches: u64,
    ) -> Self {
        let c = &state.counters;
        Self {
            core: core.0,
            name: name.to_string(),
            instrs: c.total,
            offload_instrs: c.offloaded,
            host_instrs: c.total - c.offloaded,
            read_instrs: c.reads,
            write_instrs: c.writes,
            mem_instrs: c.mem,
            instruction_fetches: c.fetches,
            cycles: state.clock.cycle(),
            unhalted_cycles: state.clock.unhalted_cycles(),
            halted_cycles: state.clock.halted_cycles(),
            phase_cycles: state.clock.phase_cycles(),
            contention_cycles: state.clock.contention_cycles(),
            fetch_stall_cycles: state.fetch_stall_cycles,
            private_access_cycles: state.stalls.private,
            shared_ro_access_cycles: state.stalls.shared_read_only,
            shared_rw_access_cycles: state.stalls.shared_read_write,
            events_recorded,
            context_switches,
        }
    }

    pub fn memory_stall_cycles(&self) -> Cycle {
        self.private_access_cycles + self.shared_ro_access_cycles + self.shared_rw_access_cycles
    }

    pub fn ipc(&self) -> f64 {
        if self.unhalted_cycles == 0 {
            return 0.0;
        }
        self.instrs as f64 / self.unhalted_cycles as f64
    }
}

/// System-wide aggregate.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Metrics {
    /// Global cycle at which the run finished.
    pub total_cycles: Cycle,
    pub phases: u64,
    pub instrs: u64,
    pub offload_instrs: u64,
    pub mem_instrs: u64,
    pub memory_stall_cycles: Cycle,
    pub contention_cycles: Cycle,
    pub per_core: BTreeMap<usize, CoreStats>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot of one core and recomputes the totals.
    pub fn record_core(&mut self, stats: CoreStats) {
        self.per_core.insert(stats.core, stats);
        self.instrs = self.per_core.values().map(|s| s.instrs).sum();
        self.offload_instrs = self.per_core.values().map(|s| s.offload_instrs).sum();
        self.mem_instrs = self.per_core.values().map(|s| s.mem_instrs).sum();
        self.memory_stall_cycles = self
            .per_core
            .values()
            .map(CoreStats::memory_stall_cycles)
            .sum();
        self.contention_cycles = self.per_core.values().map(|s| s.contention_cycles).sum();
    }

    /// Fraction of instructions executed inside offload regions.
    pub fn offload_fraction(&self) -> f64 {
        if self.instrs == 0 {
            return 0.0;
        }
        self.offload_instrs as f64 / self.instrs as f64
    }

    /// Share of memory-stall cycles spent on lines shared by several cores.
    pub fn shared_stall_fraction(&self) -> f64 {
        if self.memory_stall_cycles == 0 {
            return 0.0;
        }
        let shared: Cycle = self
            .per_core
            .values()
            .map(|s| s.shared_ro_access_cycles + s.shared_rw_access_cycles)
            .sum();
        shared as f64 / self.memory_stall_cycles as f64
    }

    /// Slowdown = (actual_cycles - baseline_cycles) / baseline_cycles, or 0 if baseline is 0.
    pub fn slowdown_vs(&self, baseline_cycles: Cycle) -> f64 {
        if baseline_cycles == 0 || self.total_cycles <= baseline_cycles {
            return 0.0;
        }
        (self.total_cycles - baseline_cycles) as f64 / baseline_cycles as f64
    }

    /// Speedup of this run over a baseline that took `baseline_cycles`.
    pub fn speedup_vs(&self, baseline_cycles: Cycle) -> f64 {
        if self.total_cycles == 0 {
            return 0.0;
        }
        baseline_cycles as f64 / self.total_cycles as f64
    }
}
