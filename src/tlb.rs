//! TLB collaborator: per-core translation caches over a shared first-touch page table.

use crate::core::{Address, Cycle};
use crate::error::TlbError;
use serde::Deserialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Translation service consumed by the timing engine.
pub trait Tlb: Send {
    /// Translates a virtual address to its physical page number.
    fn translate(&mut self, vaddr: Address) -> Result<u64, TlbError>;

    /// Drops every cached translation.
    fn flush(&mut self);

    /// Remaps every virtual page backed by `old_ppn` onto `new_ppn`.
    fn update_page(&mut self, old_ppn: u64, new_ppn: u64) -> Result<(), TlbError>;

    /// Flushes physical page `ppn` starting at `start`; returns the completion cycle.
    fn clflush_page(&mut self, ppn: u64, start: Cycle) -> Cycle;

    fn page_bits(&self) -> u32;

    /// Physical address of `vaddr` given its translated page.
    fn physical_address(&self, vaddr: Address, ppn: u64) -> Address {
        let bits = self.page_bits();
        (ppn << bits) | (vaddr & ((1u64 << bits) - 1))
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TlbConfig {
    /// Cached translations per TLB.
    pub entries: usize,
    /// log2(page size).
    pub page_bits: u32,
    /// Physical frames available to the page table.
    pub max_frames: u64,
    /// Fixed cost of a page flush.
    pub flush_latency_cycles: u32,
}

impl Default for TlbConfig {
    fn default() -> Self {
        Self {
            entries: 64,
            page_bits: 12,
            max_frames: 1 << 20,
            flush_latency_cycles: 200,
        }
    }
}

/// Virtual-to-physical map shared by every core; frames are handed out on first touch.
#[derive(Debug, Default)]
pub struct PageTable {
    map: HashMap<u64, u64>,
    /// Frames currently backing at least one virtual page.
    used: HashSet<u64>,
    next_frame: u64,
    max_frames: u64,
}

impl PageTable {
    pub fn shared(max_frames: u64) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            map: HashMap::new(),
            used: HashSet::new(),
            next_frame: 0,
            max_frames,
        }))
    }

    pub fn walk(&mut self, vpn: u64) -> Result<u64, TlbError> {
        if let Some(&ppn) = self.map.get(&vpn) {
            return Ok(ppn);
        }
        while self.used.contains(&self.next_frame) {
            self.next_frame += 1;
        }
        if self.next_frame >= self.max_frames {
            return Err(TlbError::OutOfFrames {
                vpn,
                limit: self.max_frames,
            });
        }
        let ppn = self.next_frame;
        self.next_frame += 1;
        self.map.insert(vpn, ppn);
        self.used.insert(ppn);
        Ok(ppn)
    }

    /// Moves every page mapped to `old_ppn` onto `new_ppn`. Returns how many virtual pages
    /// were moved; zero when nothing maps `old_ppn` (e.g. another core already remapped it).
    pub fn remap(&mut self, old_ppn: u64, new_ppn: u64) -> Result<usize, TlbError> {
        if old_ppn == new_ppn || !self.used.contains(&old_ppn) {
            return Ok(0);
        }
        if self.used.contains(&new_ppn) {
            return Err(TlbError::FrameInUse { ppn: new_ppn });
        }
        let mut moved = 0;
        for ppn in self.map.values_mut().filter(|p| **p == old_ppn) {
            *ppn = new_ppn;
            moved += 1;
        }
        self.used.remove(&old_ppn);
        self.used.insert(new_ppn);
        Ok(moved)
    }

    pub fn mapped_pages(&self) -> usize {
        self.map.len()
    }
}

/// FIFO-replaced translation cache for one core.
pub struct PageTlb {
    config: TlbConfig,
    page_table: Arc<Mutex<PageTable>>,
    entries: HashMap<u64, u64>,
    fifo: VecDeque<u64>,
    hits: u64,
    misses: u64,
}

impl PageTlb {
    pub fn new(config: TlbConfig, page_table: Arc<Mutex<PageTable>>) -> Self {
        Self {
            config,
            page_table,
            entries: HashMap::new(),
            fifo: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    fn insert(&mut self, vpn: u64, ppn: u64) {
        if self.config.entries == 0 {
            return;
        }
        while self.entries.len() >= self.config.entries {
            match self.fifo.pop_front() {
                Some(victim) => {
                    self.entries.remove(&victim);
                }
                None => break,
            }
        }
        self.entries.insert(vpn, ppn);
        self.fifo.push_back(vpn);
    }

    fn drop_ppn(&mut self, ppn: u64) {
        self.entries.retain(|_, p| *p != ppn);
        let entries = &self.entries;
        self.fifo.retain(|vpn| entries.contains_key(vpn));
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn cached_entries(&self) -> usize {
        self.entries.len()
    }
}

impl Tlb for PageTlb {
    fn translate(&mut self, vaddr: Address) -> Result<u64, TlbError> {
        let vpn = vaddr >> self.config.page_bits;
        if let Some(&ppn) = self.entries.get(&vpn) {
            self.hits += 1;
            return Ok(ppn);
        }
        self.misses += 1;
        let ppn = {
            let mut table = self.page_table.lock().map_err(|_| TlbError::Poisoned)?;
            table.walk(vpn)?
        };
        self.insert(vpn, ppn);
        Ok(ppn)
    }

    fn flush(&mut self) {
        self.entries.clear();
        self.fifo.clear();
    }

    fn update_page(&mut self, old_ppn: u64, new_ppn: u64) -> Result<(), TlbError> {
        let moved = {
            let mut table = self.page_table.lock().map_err(|_| TlbError::Poisoned)?;
            table.remap(old_ppn, new_ppn)?
        };
        log::debug!("remapped ppn {:#x} -> {:#x} ({} pages)", old_ppn, new_ppn, moved);
        self.drop_ppn(old_ppn);
        Ok(())
    }

    fn clflush_page(&mut self, ppn: u64, start: Cycle) -> Cycle {
        self.drop_ppn(ppn);
        start + self.config.flush_latency_cycles as Cycle
    }

    fn page_bits(&self) -> u32 {
        self.config.page_bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tlb(entries: usize) -> PageTlb {
        PageTlb::new(
            TlbConfig {
                entries,
                page_bits: 12,
                max_frames: 8,
                flush_latency_cycles: 10,
            },
            PageTable::shared(8),
        )
    }

    #[test]
    fn first_touch_allocates_frames_in_order() {
        let mut t = tlb(4);
        assert_eq!(t.translate(0x5000).unwrap(), 0);
        assert_eq!(t.translate(0x9000).unwrap(), 1);
        assert_eq!(t.translate(0x5abc).unwrap(), 0);
        assert_eq!(t.hits(), 1);
        assert_eq!(t.misses(), 2);
        assert_eq!(t.physical_address(0x5abc, 0), 0xabc);
    }

    #[test]
    fn capacity_evicts_oldest_translation() {
        let mut t = tlb(2);
        t.translate(0x1000).unwrap();
        t.translate(0x2000).unwrap();
        t.translate(0x3000).unwrap();
        assert_eq!(t.cached_entries(), 2);
        t.translate(0x1000).unwrap();
        assert_eq!(t.misses(), 4);
    }

    #[test]
    fn update_page_is_visible_after_flush() {
        let table = PageTable::shared(8);
        let config = TlbConfig::default();
        let mut a = PageTlb::new(config.clone(), table.clone());
        let mut b = PageTlb::new(config, table);
        assert_eq!(a.translate(0x7000).unwrap(), 0);
        assert_eq!(b.translate(0x7000).unwrap(), 0);

        a.update_page(0, 5).unwrap();
        assert_eq!(a.translate(0x7000).unwrap(), 5);
        // `b` still caches the old frame until told otherwise.
        assert_eq!(b.translate(0x7000).unwrap(), 0);
        b.flush();
        assert_eq!(b.translate(0x7000).unwrap(), 5);
    }

    #[test]
    fn remapped_frame_is_not_handed_out_again() {
        let table = PageTable::shared(8);
        let mut t = PageTlb::new(TlbConfig::default(), table.clone());
        assert_eq!(t.translate(0x1000).unwrap(), 0);
        t.update_page(0, 1).unwrap();
        assert_eq!(t.translate(0x1000).unwrap(), 1);
        let fresh = t.translate(0x2000).unwrap();
        assert_ne!(fresh, 1);
        assert_eq!(fresh, 2);
        // The vacated frame stays behind the allocation cursor.
        assert_eq!(t.translate(0x3000).unwrap(), 3);
        assert_eq!(table.lock().unwrap().mapped_pages(), 3);
    }

    #[test]
    fn remap_onto_a_mapped_frame_is_rejected() {
        let table = PageTable::shared(8);
        let mut t = PageTlb::new(TlbConfig::default(), table.clone());
        t.translate(0x1000).unwrap();
        t.translate(0x2000).unwrap();
        assert!(matches!(
            t.update_page(0, 1),
            Err(TlbError::FrameInUse { ppn: 1 })
        ));
        assert_eq!(t.translate(0x1000).unwrap(), 0);
        // A second core repeating a finished remap is a no-op.
        t.update_page(0, 5).unwrap();
        assert_eq!(table.lock().unwrap().remap(0, 5).unwrap(), 0);
    }

    #[test]
    fn clflush_returns_completion_cycle() {
        let mut t = tlb(4);
        let ppn = t.translate(0x1000).unwrap();
        assert_eq!(t.clflush_page(ppn, 100), 110);
        assert_eq!(t.cached_entries(), 0);
    }

    #[test]
    fn out_of_frames_is_an_error() {
        let mut t = PageTlb::new(
            TlbConfig {
                max_frames: 1,
                ..TlbConfig::default()
            },
            PageTable::shared(1),
        );
        t.translate(0).unwrap();
        assert!(matches!(
            t.translate(0x10_0000),
            Err(TlbError::OutOfFrames { limit: 1, .. })
        ));
    }
}
