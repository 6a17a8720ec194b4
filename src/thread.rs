//! Thread lifecycle: binding a simulated OS thread's status to a physical core.
//!
//! A [`ThreadStatus`] is a value handle. `join` moves it into the core, `leave` and
//! `context_switch` hand it back, so the status of a descheduled thread lives wherever
//! the scheduler parks it and never inside a core it is not running on.

use crate::core::{CoreId, ThreadId};
use crate::error::SimError;
use crate::offload::{OffloadState, OffloadTracker};

/// Per-thread offload status and the thread-local accounting that follows it across cores.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadStatus {
    gid: ThreadId,
    tracker: OffloadTracker,
    instrs: u64,
    offload_instrs: u64,
}

impl ThreadStatus {
    pub fn new(gid: ThreadId) -> Self {
        Self {
            gid,
            tracker: OffloadTracker::new(),
            instrs: 0,
            offload_instrs: 0,
        }
    }

    pub fn gid(&self) -> ThreadId {
        self.gid
    }

    pub fn tracker(&self) -> &OffloadTracker {
        &self.tracker
    }

    pub fn state(&self) -> OffloadState {
        self.tracker.state()
    }

    pub fn is_offloaded(&self) -> bool {
        self.tracker.is_offloaded()
    }

    /// Instructions this thread executed, on any core.
    pub fn instrs(&self) -> u64 {
        self.instrs
    }

    pub fn offload_instrs(&self) -> u64 {
        self.offload_instrs
    }

    pub(crate) fn tracker_mut(&mut self) -> &mut OffloadTracker {
        &mut self.tracker
    }

    pub(crate) fn count_block(&mut self, instrs: u64, offloaded: bool) {
        self.instrs += instrs;
        if offloaded {
            self.offload_instrs += instrs;
        }
    }
}

/// The single thread slot of a core.
#[derive(Debug)]
pub struct ThreadSlot {
    core: CoreId,
    bound: Option<ThreadStatus>,
    switches: u64,
}

impl ThreadSlot {
    pub fn new(core: CoreId) -> Self {
        Self {
            core,
            bound: None,
            switches: 0,
        }
    }

    pub fn join(&mut self, status: ThreadStatus) -> Result<(), SimError> {
        if let Some(current) = &self.bound {
            return Err(SimError::ThreadAlreadyAttached {
                core: self.core,
                current: current.gid,
                incoming: status.gid,
            });
        }
        log::debug!("{}: join {}", self.core, status.gid);
        self.bound = Some(status);
        Ok(())
    }

    /// Detaches the bound thread. It must not be inside an offload region.
    pub fn leave(&mut self) -> Result<ThreadStatus, SimError> {
        let current = self.current()?;
        if current.is_offloaded() {
            return Err(SimError::LeaveWhileOffloaded {
                core: self.core,
                gid: current.gid,
            });
        }
        let status = self.bound.take().ok_or(SimError::NoThreadAttached { core: self.core })?;
        log::debug!("{}: leave {}", self.core, status.gid);
        Ok(status)
    }

    /// Swaps the bound thread for `incoming` and returns the outgoing status.
    ///
    /// Either both halves happen or neither does.
    pub fn context_switch(&mut self, incoming: ThreadStatus) -> Result<ThreadStatus, SimError> {
        let current = self.current()?;
        if current.is_offloaded() {
            return Err(SimError::SwitchWhileOffloaded {
                core: self.core,
                gid: current.gid,
            });
        }
        let incoming_gid = incoming.gid;
        let outgoing = self
            .bound
            .replace(incoming)
            .ok_or(SimError::NoThreadAttached { core: self.core })?;
        self.switches += 1;
        log::debug!("{}: context switch {} -> {}", self.core, outgoing.gid, incoming_gid);
        Ok(outgoing)
    }

    pub fn current(&self) -> Result<&ThreadStatus, SimError> {
        self.bound
            .as_ref()
            .ok_or(SimError::NoThreadAttached { core: self.core })
    }

    pub fn current_mut(&mut self) -> Result<&mut ThreadStatus, SimError> {
        self.bound
            .as_mut()
            .ok_or(SimError::NoThreadAttached { core: self.core })
    }

    pub fn bound_gid(&self) -> Option<ThreadId> {
        self.bound.as_ref().map(|s| s.gid)
    }

    pub fn is_idle(&self) -> bool {
        self.bound.is_none()
    }

    pub fn switches(&self) -> u64 {
        self.switches
    }
}
