//! Thread scheduling model: round-robin assignment of threads to cores, time-sliced by phase.
//!
//! Thread `T` always runs on core `T % N`. When a core has more threads than one, the
//! scheduler parks the others' [`ThreadStatus`] handles in that core's run queue and
//! rotates them in every `quantum_phases` phases.

use crate::core::{CoreId, ThreadId};
use crate::thread::ThreadStatus;
use std::collections::VecDeque;

pub struct Scheduler {
    num_cores: usize,
    num_threads: usize,
    quantum_phases: u64,
    /// Parked threads per core, in run order.
    queues: Vec<VecDeque<ThreadStatus>>,
    /// Threads whose streams have ended.
    retired: Vec<ThreadStatus>,
}

impl Scheduler {
    pub fn new(num_cores: usize, num_threads: usize, quantum_phases: u64) -> Self {
        let mut queues: Vec<VecDeque<ThreadStatus>> =
            (0..num_cores).map(|_| VecDeque::new()).collect();
        for t in 0..num_threads {
            queues[t % num_cores].push_back(ThreadStatus::new(ThreadId(t as u32)));
        }
        Self {
            num_cores,
            num_threads,
            quantum_phases: quantum_phases.max(1),
            queues,
            retired: Vec::new(),
        }
    }

    /// Returns the core that runs the given thread (round-robin).
    pub fn thread_to_core(&self, thread_id: ThreadId) -> CoreId {
        CoreId(thread_id.0 as usize % self.num_cores)
    }

    /// Takes the next parked thread for `core`.
    pub fn next_for(&mut self, core: CoreId) -> Option<ThreadStatus> {
        self.queues.get_mut(core.0)?.pop_front()
    }

    /// Parks a descheduled thread at the back of its core's queue.
    pub fn park(&mut self, status: ThreadStatus) {
        let core = self.thread_to_core(status.gid());
        self.queues[core.0].push_back(status);
    }

    pub fn retire(&mut self, status: ThreadStatus) {
        self.retired.push(status);
    }

    pub fn has_waiting(&self, core: CoreId) -> bool {
        self.queues.get(core.0).is_some_and(|q| !q.is_empty())
    }

    /// Whether phase `phase` ends a scheduling quantum.
    pub fn quantum_expired(&self, phase: u64) -> bool {
        phase > 0 && phase % self.quantum_phases == 0
    }

    pub fn retired(&self) -> &[ThreadStatus] {
        &self.retired
    }

    pub fn num_cores(&self) -> usize {
        self.num_cores
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }
}
