//! Synthetic trace generator: per-thread instrumentation event streams.
//!
//! Threads execute a loop of basic blocks over a small code footprint. Memory operations
//! target a per-thread private region, a read-only region shared by every thread, or a
//! read-write shared region. Selected blocks are wrapped in offload regions.

use crate::core::{Address, BasicBlock, TraceEvent};
use serde::Deserialize;

const CODE_BASE: Address = 0x0040_0000;
const PRIVATE_BASE: Address = 0x1000_0000;
const PRIVATE_STRIDE: Address = 0x0100_0000;
const SHARED_RO_BASE: Address = 0x4000_0000;
const SHARED_RW_BASE: Address = 0x5000_0000;

/// Workload configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkloadConfig {
    pub blocks_per_thread: usize,
    pub instrs_per_block: u32,
    pub mem_ops_per_block: u32,
    /// Distinct blocks in the code loop.
    pub code_blocks: usize,
    /// Fraction of memory operations that are stores.
    pub store_fraction: f64,
    /// Fraction of memory operations that go to shared regions.
    pub shared_fraction: f64,
    /// Fraction of shared operations that go to the read-write region.
    pub shared_write_fraction: f64,
    /// Fraction of memory operations that are predicated; half of those are false.
    pub predicated_fraction: f64,
    /// Fraction of blocks executed inside offload regions.
    pub offload_fraction: f64,
    /// Issue-cost divisor for blocks run by the in-memory unit.
    pub offload_speedup: u32,
    pub private_lines: usize,
    pub shared_lines: usize,
    pub line_size: usize,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            blocks_per_thread: 2000,
            instrs_per_block: 8,
            mem_ops_per_block: 2,
            code_blocks: 32,
            store_fraction: 0.3,
            shared_fraction: 0.2,
            shared_write_fraction: 0.5,
            predicated_fraction: 0.1,
            offload_fraction: 0.0,
            offload_speedup: 4,
            private_lines: 256,
            shared_lines: 64,
            line_size: 64,
        }
    }
}

fn percent(fraction: f64) -> usize {
    ((fraction * 100.0).round() as usize).min(100)
}

/// Generates the event stream of one thread.
pub struct WorkloadGenerator {
    config: WorkloadConfig,
    thread: usize,
    /// Next block index.
    index: usize,
    /// Next memory-operation index.
    op: usize,
    offloaded: bool,
}

impl WorkloadGenerator {
    pub fn new(config: WorkloadConfig, thread: usize) -> Self {
        Self {
            config,
            thread,
            index: 0,
            op: 0,
            offloaded: false,
        }
    }

    fn block(&self, index: usize) -> BasicBlock {
        let cfg = &self.config;
        let bytes = cfg.instrs_per_block * 4;
        let address = CODE_BASE + ((index % cfg.code_blocks.max(1)) as Address) * bytes as Address;
        let host = cfg.instrs_per_block;
        BasicBlock::new(address, bytes, cfg.instrs_per_block, host)
            .with_offload_cycles(host.div_ceil(cfg.offload_speedup.max(1)))
    }

    fn wants_offload(&self, index: usize) -> bool {
        (index % 100) < percent(self.config.offload_fraction)
    }

    fn next_address(&self, op: usize) -> (Address, bool) {
        let cfg = &self.config;
        let line = cfg.line_size as Address;
        let slot = op % 100;
        let store = (op * 7 % 100) < percent(cfg.store_fraction);
        if slot < percent(cfg.shared_fraction) {
            let shared_slot = (op * 13) % 100;
            let idx = (op % cfg.shared_lines.max(1)) as Address;
            if shared_slot < percent(cfg.shared_write_fraction) {
                (SHARED_RW_BASE + idx * line, store)
            } else {
                // Read-only region: never stored to.
                (SHARED_RO_BASE + idx * line, false)
            }
        } else {
            let idx = (op % cfg.private_lines.max(1)) as Address;
            let base = PRIVATE_BASE + self.thread as Address * PRIVATE_STRIDE;
            (base + idx * line, store)
        }
    }

    /// Appends the events of the next block (and any offload bracket) to `out`.
    /// Returns false once the thread's blocks are exhausted.
    pub fn next_block(&mut self, out: &mut Vec<TraceEvent>) -> bool {
        if self.index >= self.config.blocks_per_thread {
            if self.offloaded {
                out.push(TraceEvent::OffloadEnd);
                self.offloaded = false;
            }
            return false;
        }
        let index = self.index;
        self.index += 1;

        let offload = self.wants_offload(index);
        if offload != self.offloaded {
            out.push(if offload {
                TraceEvent::OffloadBegin
            } else {
                TraceEvent::OffloadEnd
            });
            self.offloaded = offload;
        }

        out.push(TraceEvent::BasicBlock(self.block(index)));
        let pred_pct = percent(self.config.predicated_fraction);
        for _ in 0..self.config.mem_ops_per_block {
            let op = self.op;
            self.op += 1;
            let (address, store) = self.next_address(op);
            let predicated = (op * 31 % 100) < pred_pct;
            let predicate = op % 2 == 0;
            out.push(match (store, predicated) {
                (false, false) => TraceEvent::Load { address, size: 8 },
                (true, false) => TraceEvent::Store { address, size: 8 },
                (false, true) => TraceEvent::PredLoad {
                    address,
                    size: 8,
                    predicate,
                },
                (true, true) => TraceEvent::PredStore {
                    address,
                    size: 8,
                    predicate,
                },
            });
        }
        true
    }

    pub fn remaining(&self) -> usize {
        self.config.blocks_per_thread.saturating_sub(self.index)
    }

    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }
}

/// Build a full workload: one event stream per thread.
pub fn build_workload(num_threads: usize, config: &WorkloadConfig) -> Vec<Vec<TraceEvent>> {
    (0..num_threads)
        .map(|t| {
            let mut gen = WorkloadGenerator::new(config.clone(), t);
            let mut events = Vec::new();
            while gen.next_block(&mut events) {}
            events
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count<F: Fn(&TraceEvent) -> bool>(events: &[TraceEvent], f: F) -> usize {
        events.iter().filter(|e| f(e)).count()
    }

    #[test]
    fn workload_block_count() {
        let config = WorkloadConfig {
            blocks_per_thread: 10,
            ..WorkloadConfig::default()
        };
        let streams = build_workload(2, &config);
        assert_eq!(streams.len(), 2);
        let blocks = count(&streams[0], |e| matches!(e, TraceEvent::BasicBlock(_)));
        assert_eq!(blocks, 10);
    }

    #[test]
    fn offload_regions_are_balanced() {
        let config = WorkloadConfig {
            blocks_per_thread: 250,
            offload_fraction: 0.4,
            ..WorkloadConfig::default()
        };
        let events = &build_workload(1, &config)[0];
        let begins = count(events, |e| *e == TraceEvent::OffloadBegin);
        let ends = count(events, |e| *e == TraceEvent::OffloadEnd);
        assert!(begins > 0);
        assert_eq!(begins, ends);
        let mut depth = 0i32;
        for e in events {
            match e {
                TraceEvent::OffloadBegin => depth += 1,
                TraceEvent::OffloadEnd => depth -= 1,
                _ => {}
            }
            assert!((0..=1).contains(&depth));
        }
    }

    #[test]
    fn offload_ends_even_when_last_block_is_offloaded() {
        let config = WorkloadConfig {
            blocks_per_thread: 3,
            offload_fraction: 1.0,
            ..WorkloadConfig::default()
        };
        let events = &build_workload(1, &config)[0];
        assert_eq!(events.first(), Some(&TraceEvent::OffloadBegin));
        assert_eq!(events.last(), Some(&TraceEvent::OffloadEnd));
    }

    #[test]
    fn read_only_region_is_never_stored() {
        let config = WorkloadConfig {
            blocks_per_thread: 500,
            shared_fraction: 1.0,
            store_fraction: 1.0,
            predicated_fraction: 0.0,
            ..WorkloadConfig::default()
        };
        let events = &build_workload(1, &config)[0];
        for e in events {
            if let TraceEvent::Store { address, .. } = e {
                assert!(*address >= SHARED_RW_BASE);
            }
        }
        assert!(count(events, |e| matches!(e, TraceEvent::Load { .. })) > 0);
    }

    #[test]
    fn private_regions_do_not_overlap() {
        let config = WorkloadConfig {
            blocks_per_thread: 50,
            shared_fraction: 0.0,
            ..WorkloadConfig::default()
        };
        let streams = build_workload(2, &config);
        let max0 = streams[0]
            .iter()
            .filter_map(|e| match e {
                TraceEvent::Load { address, .. } | TraceEvent::Store { address, .. } => {
                    Some(*address)
                }
                _ => None,
            })
            .max()
            .unwrap();
        assert!(max0 < PRIVATE_BASE + PRIVATE_STRIDE);
    }
}
