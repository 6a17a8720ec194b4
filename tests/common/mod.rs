//! Stub collaborators shared by the integration tests.

#![allow(dead_code)]

use pim_timing_sim::cache::{CacheModel, CacheOutcome};
use pim_timing_sim::config::CoreConfig;
use pim_timing_sim::core::{AccessKind, Address, CoreId, Cycle, SharingClass};
use pim_timing_sim::error::{CacheError, TlbError};
use pim_timing_sim::timing_core::{Core, CoreParts, PimCore};
use pim_timing_sim::bbl::PimIssue;
use pim_timing_sim::tlb::Tlb;
use std::collections::VecDeque;

/// Identity-mapped TLB with 4 KiB pages.
pub struct FlatTlb;

impl Tlb for FlatTlb {
    fn translate(&mut self, vaddr: Address) -> Result<u64, TlbError> {
        Ok(vaddr >> 12)
    }
    fn flush(&mut self) {}
    fn update_page(&mut self, _old: u64, _new: u64) -> Result<(), TlbError> {
        Ok(())
    }
    fn clflush_page(&mut self, _ppn: u64, start: Cycle) -> Cycle {
        start
    }
    fn page_bits(&self) -> u32 {
        12
    }
}

/// Replays scripted `(latency, sharing)` outcomes, then returns zero-latency private hits.
#[derive(Default)]
pub struct ScriptedCache {
    outcomes: VecDeque<(Cycle, SharingClass)>,
}

impl ScriptedCache {
    pub fn new(outcomes: &[(Cycle, SharingClass)]) -> Self {
        Self {
            outcomes: outcomes.iter().copied().collect(),
        }
    }
}

impl CacheModel for ScriptedCache {
    fn access(
        &mut self,
        _paddr: Address,
        _kind: AccessKind,
        _cycle: Cycle,
    ) -> Result<CacheOutcome, CacheError> {
        let (latency, sharing) = self
            .outcomes
            .pop_front()
            .unwrap_or((0, SharingClass::Private));
        Ok(CacheOutcome {
            latency,
            sharing,
            hit: latency == 0,
        })
    }
    fn invalidate_page(&mut self, _ppn: u64, _page_bits: u32) -> u64 {
        0
    }
    fn line_size(&self) -> u64 {
        64
    }
}

/// A PIM core whose data cache replays `data` and whose fetches are free.
pub fn pim_core(data: &[(Cycle, SharingClass)]) -> PimCore {
    let parts = CoreParts {
        l1i: Box::new(ScriptedCache::default()),
        l1d: Box::new(ScriptedCache::new(data)),
        itlb: Box::new(FlatTlb),
        dtlb: Box::new(FlatTlb),
    };
    Core::new(CoreId(0), "pim-0".into(), PimIssue, &CoreConfig::default(), parts)
}
