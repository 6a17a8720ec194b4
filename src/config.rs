//! Simulation configuration, deserialised from JSON. Every field has a default, so a
//! config file only needs to name what it overrides.

use crate::cache::CacheConfig;
use crate::contention::ContentionConfig;
use crate::core::Cycle;
use crate::error::SimError;
use crate::memory::MemoryConfig;
use crate::timing_core::CoreKind;
use crate::tlb::TlbConfig;
use crate::workload::WorkloadConfig;
use serde::Deserialize;
use std::path::Path;

mod defaults {
    /// Cycles per lockstep phase.
    pub const PHASE_LENGTH: u64 = 10_000;

    /// Issue slots of the out-of-order variant.
    pub const ISSUE_WIDTH: u32 = 4;

    /// Cost of writing back and dropping one line during a page flush.
    pub const CLFLUSH_LINE_CYCLES: u32 = 2;

    /// Upper bound on simulated phases before the run is cut off.
    pub const MAX_PHASES: u64 = 1_000_000;
}

/// The sharing directory keeps one bit per core.
pub const MAX_CORES: usize = 64;

/// Per-core configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoreConfig {
    pub kind: CoreKind,
    pub phase_length: Cycle,
    pub issue_width: u32,
    pub clflush_line_cycles: u32,
    pub l1i: CacheConfig,
    pub l1d: CacheConfig,
    pub tlb: TlbConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            kind: CoreKind::default(),
            phase_length: defaults::PHASE_LENGTH,
            issue_width: defaults::ISSUE_WIDTH,
            clflush_line_cycles: defaults::CLFLUSH_LINE_CYCLES,
            l1i: CacheConfig::default(),
            l1d: CacheConfig::default(),
            tlb: TlbConfig::default(),
        }
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimConfig {
    pub num_cores: usize,
    pub num_threads: usize,
    /// Phases a thread runs before the scheduler may rotate it off its core.
    pub quantum_phases: u64,
    pub max_phases: u64,
    pub core: CoreConfig,
    pub memory: MemoryConfig,
    pub contention: ContentionConfig,
    pub workload: WorkloadConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            num_cores: 2,
            num_threads: 2,
            quantum_phases: 4,
            max_phases: defaults::MAX_PHASES,
            core: CoreConfig::default(),
            memory: MemoryConfig::default(),
            contention: ContentionConfig::default(),
            workload: WorkloadConfig::default(),
        }
    }
}

fn check_cache(name: &str, c: &CacheConfig) -> Result<(), SimError> {
    if !c.line_size.is_power_of_two() {
        return Err(SimError::Config(format!(
            "{name}: line_size {} is not a power of two",
            c.line_size
        )));
    }
    if c.associativity == 0 || c.size_bytes < c.line_size * c.associativity {
        return Err(SimError::Config(format!(
            "{name}: {} bytes cannot hold {} ways of {}-byte lines",
            c.size_bytes, c.associativity, c.line_size
        )));
    }
    if !c.num_sets().is_power_of_two() {
        return Err(SimError::Config(format!(
            "{name}: set count {} is not a power of two",
            c.num_sets()
        )));
    }
    Ok(())
}

impl CoreConfig {
    pub fn validate(&self) -> Result<(), SimError> {
        if self.phase_length == 0 {
            return Err(SimError::Config("phase_length must be non-zero".into()));
        }
        check_cache("l1i", &self.l1i)?;
        check_cache("l1d", &self.l1d)?;
        let page_bits = self.tlb.page_bits;
        if !(6..=30).contains(&page_bits) {
            return Err(SimError::Config(format!(
                "page_bits {page_bits} outside 6..=30"
            )));
        }
        if (1usize << page_bits) < self.l1d.line_size.max(self.l1i.line_size) {
            return Err(SimError::Config("page smaller than a cache line".into()));
        }
        Ok(())
    }
}

impl SimConfig {
    pub fn from_json_str(json: &str) -> Result<Self, SimError> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.num_cores == 0 || self.num_cores > MAX_CORES {
            return Err(SimError::Config(format!(
                "num_cores must be in 1..={}, got {}",
                MAX_CORES,
                self.num_cores
            )));
        }
        if self.quantum_phases == 0 {
            return Err(SimError::Config("quantum_phases must be non-zero".into()));
        }
        self.core.validate()?;
        if self.contention.channels == 0 {
            return Err(SimError::Config("contention needs at least one channel".into()));
        }
        if !self.workload.line_size.is_power_of_two() {
            return Err(SimError::Config(format!(
                "workload line_size {} is not a power of two",
                self.workload.line_size
            )));
        }
        Ok(())
    }
}
