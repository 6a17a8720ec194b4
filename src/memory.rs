//! Shared memory behind the private caches: access latency plus a line-sharing directory.

use crate::core::{Address, CoreId, Cycle, SharingClass};
use crate::error::CacheError;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Configuration for shared memory.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Latency in cycles for a memory access (miss penalty).
    pub access_latency_cycles: u32,
    /// Extra cycles on a miss caused by another core's write to the line.
    pub coherence_penalty_cycles: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            access_latency_cycles: 100,
            coherence_penalty_cycles: 20,
        }
    }
}

/// Directory entry for one cache line.
#[derive(Clone, Debug, Default)]
struct LineEntry {
    /// Bit `i` set when core `i` has touched the line.
    sharers: u64,
    written: bool,
    /// Bumped on every write; caches compare it to detect remote invalidation.
    version: u64,
    last_writer: Option<CoreId>,
}

/// What the directory saw for one access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineObservation {
    pub sharing: SharingClass,
    /// Line version before this access.
    pub version_before: u64,
    /// Line version after this access (differs only for writes).
    pub version_after: u64,
    /// Last core to write the line before this access, if any.
    pub prior_writer: Option<CoreId>,
}

/// Sharing directory keyed by physical line address.
#[derive(Debug, Default)]
pub struct Directory {
    lines: HashMap<Address, LineEntry>,
}

impl Directory {
    /// Records that `core` touched `line`, returning its sharing status including this access.
    pub fn observe(&mut self, line: Address, core: CoreId, write: bool) -> LineObservation {
        let entry = self.lines.entry(line).or_default();
        let version_before = entry.version;
        let prior_writer = entry.last_writer;
        entry.sharers |= 1u64 << core.0;
        if write {
            entry.written = true;
            entry.version += 1;
            entry.last_writer = Some(core);
        }
        let sharing = if entry.sharers.count_ones() <= 1 {
            SharingClass::Private
        } else if entry.written {
            SharingClass::SharedReadWrite
        } else {
            SharingClass::SharedReadOnly
        };
        LineObservation {
            sharing,
            version_before,
            version_after: entry.version,
            prior_writer,
        }
    }

    /// Sharing status of `line` without recording an access.
    pub fn classify(&self, line: Address) -> Option<SharingClass> {
        self.lines.get(&line).map(|e| {
            if e.sharers.count_ones() <= 1 {
                SharingClass::Private
            } else if e.written {
                SharingClass::SharedReadWrite
            } else {
                SharingClass::SharedReadOnly
            }
        })
    }

    pub fn version(&self, line: Address) -> u64 {
        self.lines.get(&line).map_or(0, |e| e.version)
    }

    pub fn tracked_lines(&self) -> usize {
        self.lines.len()
    }
}

/// Shared memory subsystem. Models latency and sharing only (no data storage).
#[derive(Debug)]
pub struct SharedMemory {
    config: MemoryConfig,
    directory: Mutex<Directory>,
}

impl SharedMemory {
    pub fn new(config: MemoryConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            directory: Mutex::new(Directory::default()),
        })
    }

    /// Returns the number of cycles a memory access takes (stall duration).
    pub fn access_latency_cycles(&self) -> Cycle {
        self.config.access_latency_cycles as Cycle
    }

    pub fn coherence_penalty_cycles(&self) -> Cycle {
        self.config.coherence_penalty_cycles as Cycle
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn observe(
        &self,
        line: Address,
        core: CoreId,
        write: bool,
    ) -> Result<LineObservation, CacheError> {
        let mut dir = self.directory.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(dir.observe(line, core, write))
    }

    pub fn classify(&self, line: Address) -> Result<Option<SharingClass>, CacheError> {
        let dir = self.directory.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(dir.classify(line))
    }
}
