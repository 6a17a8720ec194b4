//! L1 filter cache: set-associative with LRU replacement, backed by the shared-memory directory.
//!
//! The timing engine only sees [`CacheModel`]: an access returns a latency and the line's
//! sharing status at access time.

use crate::core::{AccessKind, Address, CoreId, Cycle, SharingClass};
use crate::error::CacheError;
use crate::memory::SharedMemory;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;

/// Result of a cache access as seen by the timing engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheOutcome {
    /// Stall cycles for this access. Zero for a hit absorbed by the pipeline.
    pub latency: Cycle,
    pub sharing: SharingClass,
    pub hit: bool,
}

/// Latency-returning cache service consumed by the timing engine.
pub trait CacheModel: Send {
    fn access(
        &mut self,
        paddr: Address,
        kind: AccessKind,
        cycle: Cycle,
    ) -> Result<CacheOutcome, CacheError>;

    /// Drops every line of physical page `ppn`. Returns the number of lines dropped.
    fn invalidate_page(&mut self, ppn: u64, page_bits: u32) -> u64;

    fn line_size(&self) -> u64;
}

/// Configuration for an L1 cache.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Total cache size in bytes.
    pub size_bytes: usize,
    /// Line size in bytes.
    pub line_size: usize,
    /// Associativity (number of ways per set).
    pub associativity: usize,
    /// Latency in cycles for a hit.
    pub hit_latency_cycles: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size_bytes: 32 * 1024,
            line_size: 64,
            associativity: 8,
            hit_latency_cycles: 0,
        }
    }
}

impl CacheConfig {
    pub fn num_sets(&self) -> usize {
        (self.size_bytes / self.line_size) / self.associativity
    }
}

#[derive(Clone, Debug)]
struct CacheLine {
    tag: u64,
    valid: bool,
    /// Directory version of the line when it was last filled or touched.
    version: u64,
}

/// One set: multiple ways with LRU ordering.
struct CacheSet {
    lines: Vec<CacheLine>,
    /// Front = most recently used, back = least recently used.
    lru_order: VecDeque<usize>,
}

impl CacheSet {
    fn new(associativity: usize) -> Self {
        let lines = (0..associativity)
            .map(|_| CacheLine {
                tag: 0,
                valid: false,
                version: 0,
            })
            .collect();
        let lru_order = (0..associativity).collect();
        Self { lines, lru_order }
    }

    fn lookup(&self, tag: u64) -> Option<usize> {
        self.lines
            .iter()
            .position(|line| line.valid && line.tag == tag)
    }

    fn allocate(&mut self, tag: u64, version: u64) {
        if let Some(&victim_way) = self.lru_order.back() {
            let line = &mut self.lines[victim_way];
            line.tag = tag;
            line.valid = true;
            line.version = version;
            self.touch(victim_way);
        }
    }

    fn touch(&mut self, way: usize) {
        if let Some(pos) = self.lru_order.iter().position(|&w| w == way) {
            self.lru_order.remove(pos);
            self.lru_order.push_front(way);
        }
    }
}

/// Private L1 cache for one core.
pub struct FilterCache {
    core: CoreId,
    config: CacheConfig,
    sets: Vec<CacheSet>,
    memory: Arc<SharedMemory>,
    /// Mask to derive set index from a line address.
    set_mask: u64,
    set_bits: u32,
    /// log2(line_size).
    line_bits: u32,
    hits: u64,
    misses: u64,
    coherence_misses: u64,
}

impl FilterCache {
    /// # Panics
    ///
    /// If `config` yields no sets or `core` is beyond the directory's 64 sharers.
    /// [`CoreKind::build`](crate::timing_core::CoreKind::build) checks both first.
    pub fn new(core: CoreId, config: CacheConfig, memory: Arc<SharedMemory>) -> Self {
        let num_sets = config.num_sets();
        assert!(num_sets > 0, "cache must have at least one set");
        assert!(core.0 < 64, "sharing directory tracks at most 64 cores");
        let sets = (0..num_sets)
            .map(|_| CacheSet::new(config.associativity))
            .collect();
        let line_bits = config.line_size.trailing_zeros();
        let set_bits = (num_sets as u64).trailing_zeros();
        let set_mask = (1u64 << set_bits) - 1;
        Self {
            core,
            config,
            sets,
            memory,
            set_mask,
            set_bits,
            line_bits,
            hits: 0,
            misses: 0,
            coherence_misses: 0,
        }
    }

    /// Returns (set_index, tag) for a line address.
    fn line_to_set_and_tag(&self, line_addr: u64) -> (usize, u64) {
        let set_index = (line_addr & self.set_mask) as usize;
        let tag = line_addr >> self.set_bits;
        (set_index, tag)
    }

    pub fn hit_latency_cycles(&self) -> Cycle {
        self.config.hit_latency_cycles as Cycle
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn num_sets(&self) -> usize {
        self.sets.len()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Misses caused by another core writing a line this cache still held.
    pub fn coherence_misses(&self) -> u64 {
        self.coherence_misses
    }
}

impl CacheModel for FilterCache {
    fn access(
        &mut self,
        paddr: Address,
        kind: AccessKind,
        _cycle: Cycle,
    ) -> Result<CacheOutcome, CacheError> {
        let line_addr = paddr >> self.line_bits;
        let obs = self
            .memory
            .observe(line_addr, self.core, kind.is_write())?;
        let (set_idx, tag) = self.line_to_set_and_tag(line_addr);
        let hit_latency = self.hit_latency_cycles();
        let memory_latency = self.memory.access_latency_cycles();
        let penalty = self.memory.coherence_penalty_cycles();
        let set = &mut self.sets[set_idx];

        let (hit, latency) = match set.lookup(tag) {
            Some(way) if set.lines[way].version == obs.version_before => {
                set.lines[way].version = obs.version_after;
                set.touch(way);
                (true, hit_latency)
            }
            Some(way) => {
                // Stale copy: a remote write bumped the version since we filled it.
                set.lines[way].version = obs.version_after;
                set.touch(way);
                self.coherence_misses += 1;
                (false, memory_latency + penalty)
            }
            None => {
                set.allocate(tag, obs.version_after);
                (false, memory_latency)
            }
        };
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        Ok(CacheOutcome {
            latency,
            sharing: obs.sharing,
            hit,
        })
    }

    fn invalidate_page(&mut self, ppn: u64, page_bits: u32) -> u64 {
        let shift = page_bits.saturating_sub(self.line_bits);
        let set_bits = self.set_bits;
        let mut dropped = 0;
        for (set_idx, set) in self.sets.iter_mut().enumerate() {
            for line in set.lines.iter_mut().filter(|l| l.valid) {
                let line_addr = (line.tag << set_bits) | set_idx as u64;
                if line_addr >> shift == ppn {
                    line.valid = false;
                    dropped += 1;
                }
            }
        }
        dropped
    }

    fn line_size(&self) -> u64 {
        self.config.line_size as u64
    }
}
