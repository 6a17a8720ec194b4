//! Lockstep multicore driver: phases, contention reconciliation, thread rotation, metrics.
//!
//! Each phase, every core with a bound thread consumes that thread's event stream until
//! its clock reaches the phase bound. Cores are then reconciled with the contention model
//! one at a time, idle cores are halted up to the next phase start, and the scheduler may
//! rotate parked threads in.

use crate::config::SimConfig;
use crate::contention::ContentionModel;
use crate::core::{CoreId, Cycle, ThreadId, TraceEvent};
use crate::error::SimError;
use crate::memory::SharedMemory;
use crate::metrics::Metrics;
use crate::scheduler::Scheduler;
use crate::timing_core::TimingCore;
use crate::tlb::PageTable;
use std::sync::{Arc, Mutex};

/// Event stream of one thread and how far it has been consumed.
#[derive(Debug, Default)]
struct ThreadStream {
    events: Vec<TraceEvent>,
    pos: usize,
}

impl ThreadStream {
    fn next(&mut self) -> Option<&TraceEvent> {
        let event = self.events.get(self.pos)?;
        self.pos += 1;
        Some(event)
    }

    fn done(&self) -> bool {
        self.pos >= self.events.len()
    }
}

pub struct Simulator {
    config: SimConfig,
    cores: Vec<Box<dyn TimingCore>>,
    contention: Box<dyn ContentionModel>,
    scheduler: Scheduler,
    streams: Vec<ThreadStream>,
    memory: Arc<SharedMemory>,
    page_table: Arc<Mutex<PageTable>>,
    pub metrics: Metrics,
    phase: u64,
}

impl Simulator {
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        let memory = SharedMemory::new(config.memory.clone());
        let page_table = PageTable::shared(config.core.tlb.max_frames);
        let cores = (0..config.num_cores)
            .map(|c| {
                config.core.kind.build(
                    CoreId(c),
                    &config.core,
                    memory.clone(),
                    page_table.clone(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let scheduler = Scheduler::new(config.num_cores, config.num_threads, config.quantum_phases);
        let contention = config.contention.build();
        log::info!(
            "{} {} cores, {} threads, phase length {}",
            config.num_cores,
            config.core.kind.label(),
            config.num_threads,
            config.core.phase_length
        );
        Ok(Self {
            streams: (0..config.num_threads).map(|_| ThreadStream::default()).collect(),
            config,
            cores,
            contention,
            scheduler,
            memory,
            page_table,
            metrics: Metrics::new(),
            phase: 0,
        })
    }

    /// Replaces the contention model, e.g. with a custom [`ContentionModel`].
    pub fn with_contention(mut self, model: Box<dyn ContentionModel>) -> Self {
        self.contention = model;
        self
    }

    /// Load workload per thread: thread_workloads[gid] = the thread's event stream.
    pub fn load_workload(&mut self, thread_workloads: Vec<Vec<TraceEvent>>) -> Result<(), SimError> {
        if thread_workloads.len() != self.config.num_threads {
            return Err(SimError::Config(format!(
                "workload has {} streams for {} threads",
                thread_workloads.len(),
                self.config.num_threads
            )));
        }
        for (stream, events) in self.streams.iter_mut().zip(thread_workloads) {
            *stream = ThreadStream { events, pos: 0 };
        }
        Ok(())
    }

    fn stream_done(&self, gid: ThreadId) -> bool {
        self.streams
            .get(gid.0 as usize)
            .map_or(true, ThreadStream::done)
    }

    /// Retires finished threads, fills idle cores and rotates on quantum expiry.
    fn schedule(&mut self) -> Result<(), SimError> {
        let rotate = self.scheduler.quantum_expired(self.phase);
        for c in 0..self.cores.len() {
            let id = CoreId(c);
            let bound = self.cores[c].bound_thread().map(|t| (t.gid(), t.is_offloaded()));
            match bound {
                Some((gid, _)) if self.stream_done(gid) => {
                    let status = self.cores[c].leave()?;
                    log::info!(
                        "{}: {} finished ({} instrs, {} offloaded)",
                        id,
                        gid,
                        status.instrs(),
                        status.offload_instrs()
                    );
                    self.scheduler.retire(status);
                }
                Some((gid, offloaded)) if rotate && self.scheduler.has_waiting(id) => {
                    if offloaded {
                        log::warn!("{}: {} is offloaded, deferring context switch", id, gid);
                        continue;
                    }
                    if let Some(incoming) = self.scheduler.next_for(id) {
                        let outgoing = self.cores[c].context_switch(incoming)?;
                        self.scheduler.park(outgoing);
                    }
                    continue;
                }
                _ => {}
            }
            if self.cores[c].bound_thread().is_none() {
                if let Some(status) = self.scheduler.next_for(id) {
                    self.cores[c].join(status)?;
                }
            }
        }
        Ok(())
    }

    /// Feeds the bound thread's events to one core until it reaches the phase bound.
    fn run_core(&mut self, c: usize) -> Result<(), SimError> {
        let core = &mut self.cores[c];
        let Some(gid) = core.bound_thread().map(|t| t.gid()) else {
            return Ok(());
        };
        let Some(stream) = self.streams.get_mut(gid.0 as usize) else {
            return Ok(());
        };
        while !core.past_bound() {
            let Some(event) = stream.next() else {
                break;
            };
            core.dispatch(event)?;
        }
        Ok(())
    }

    /// Runs one lockstep phase. Returns false once every thread has finished.
    pub fn run_phase(&mut self) -> Result<bool, SimError> {
        self.schedule()?;
        if self.cores.iter().all(|c| c.bound_thread().is_none()) {
            return Ok(false);
        }

        for c in 0..self.cores.len() {
            self.run_core(c)?;
        }

        for core in self.cores.iter_mut() {
            core.c_sim_start(self.contention.as_mut())?;
            core.c_sim_end(self.contention.as_mut())?;
        }

        self.phase += 1;
        let next_start = self.phase * self.config.core.phase_length;
        for core in self.cores.iter_mut() {
            core.halt_until(next_start);
            core.begin_phase(next_start);
        }
        log::debug!("phase {} done, next start {}", self.phase, next_start);
        Ok(true)
    }

    /// Runs phases until every stream is consumed or the phase limit is hit.
    pub fn run_to_completion(&mut self) -> Result<&Metrics, SimError> {
        while self.phase < self.config.max_phases {
            if !self.run_phase()? {
                break;
            }
        }
        if self.phase >= self.config.max_phases {
            log::warn!("stopped at phase limit {}", self.config.max_phases);
        }
        self.collect();
        log::info!(
            "finished after {} phases, {} cycles, {} instrs",
            self.metrics.phases,
            self.metrics.total_cycles,
            self.metrics.instrs
        );
        Ok(&self.metrics)
    }

    /// Refreshes the aggregate from every core's snapshot.
    pub fn collect(&mut self) {
        for core in &self.cores {
            self.metrics.record_core(core.stats());
        }
        self.metrics.phases = self.phase;
        self.metrics.total_cycles = self.cores.iter().map(|c| c.cur_cycle()).max().unwrap_or(0);
    }

    /// Moves every mapping of `old_ppn` to `new_ppn` and drops stale translations.
    pub fn remap_page(&mut self, old_ppn: u64, new_ppn: u64) -> Result<(), SimError> {
        for core in self.cores.iter_mut() {
            core.update_tlb(old_ppn, new_ppn)?;
        }
        Ok(())
    }

    /// Flushes `ppn` from every core starting at `start`; returns when the last core is done.
    pub fn flush_page(&mut self, ppn: u64, start: Cycle) -> Cycle {
        self.cores
            .iter_mut()
            .map(|c| c.clflush_page(ppn, start))
            .max()
            .unwrap_or(start)
    }

    pub fn flush_tlbs(&mut self) {
        for core in self.cores.iter_mut() {
            core.flush_tlb();
        }
    }

    pub fn cores(&self) -> &[Box<dyn TimingCore>] {
        &self.cores
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    pub fn mapped_pages(&self) -> usize {
        self.page_table.lock().map_or(0, |t| t.mapped_pages())
    }

    pub fn phase(&self) -> u64 {
        self.phase
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn num_cores(&self) -> usize {
        self.cores.len()
    }
}
