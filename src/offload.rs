//! Offload tracker: whether a thread is currently executing inside an offload region.

use std::fmt;

/// Execution mode of a thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OffloadState {
    #[default]
    Host,
    Offloaded,
}

impl fmt::Display for OffloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffloadState::Host => write!(f, "Host"),
            OffloadState::Offloaded => write!(f, "Offloaded"),
        }
    }
}

/// Offload protocol violation. The caller attaches core and thread before escalating.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OffloadViolation {
    /// Begin while already offloaded (regions do not nest).
    Nested,
    /// End while on the host.
    Unmatched,
}

/// Two-state machine `Host <-> Offloaded`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OffloadTracker {
    state: OffloadState,
    /// Completed or in-progress regions entered.
    regions: u64,
}

impl OffloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self) -> Result<(), OffloadViolation> {
        match self.state {
            OffloadState::Host => {
                self.state = OffloadState::Offloaded;
                self.regions += 1;
                Ok(())
            }
            OffloadState::Offloaded => Err(OffloadViolation::Nested),
        }
    }

    pub fn end(&mut self) -> Result<(), OffloadViolation> {
        match self.state {
            OffloadState::Offloaded => {
                self.state = OffloadState::Host;
                Ok(())
            }
            OffloadState::Host => Err(OffloadViolation::Unmatched),
        }
    }

    pub fn state(&self) -> OffloadState {
        self.state
    }

    pub fn is_offloaded(&self) -> bool {
        self.state == OffloadState::Offloaded
    }

    /// Nesting depth, always 0 or 1.
    pub fn depth(&self) -> u32 {
        match self.state {
            OffloadState::Host => 0,
            OffloadState::Offloaded => 1,
        }
    }

    pub fn regions(&self) -> u64 {
        self.regions
    }
}
