//! Core recorder: the contention bridge between a core's clock and the contention model.
//!
//! The core appends a [`TimingEvent`] for every fetch and data access to its
//! [`EventRecorder`]. At the end of a phase the driver opens a contention window with
//! [`CoreRecorder::c_sim_start`], during which the model reads the recorded events and may
//! push the core's clock forward, and closes it with [`CoreRecorder::c_sim_end`].

use crate::clock::PhaseClock;
use crate::contention::ContentionModel;
use crate::core::{AccessKind, Address, CoreId, Cycle};
use crate::error::SimError;

/// One timed access generated by this core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimingEvent {
    pub kind: AccessKind,
    /// Physical line address.
    pub line: Address,
    pub start: Cycle,
    pub latency: Cycle,
    pub hit: bool,
}

/// Opaque log of this core's events, read by the contention model.
#[derive(Clone, Debug, Default)]
pub struct EventRecorder {
    events: Vec<TimingEvent>,
    total_recorded: u64,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: TimingEvent) {
        self.events.push(event);
        self.total_recorded += 1;
    }

    pub fn events(&self) -> &[TimingEvent] {
        &self.events
    }

    /// Removes and returns the pending events.
    pub fn drain(&mut self) -> Vec<TimingEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events recorded since creation, including drained ones.
    pub fn total_recorded(&self) -> u64 {
        self.total_recorded
    }
}

/// Contention window state for one core.
#[derive(Debug)]
pub struct CoreRecorder {
    core: CoreId,
    window_open: bool,
    events: EventRecorder,
    windows: u64,
}

impl CoreRecorder {
    pub fn new(core: CoreId) -> Self {
        Self {
            core,
            window_open: false,
            events: EventRecorder::new(),
            windows: 0,
        }
    }

    pub fn event_recorder(&self) -> &EventRecorder {
        &self.events
    }

    pub fn event_recorder_mut(&mut self) -> &mut EventRecorder {
        &mut self.events
    }

    pub fn window_open(&self) -> bool {
        self.window_open
    }

    /// Completed contention windows.
    pub fn windows(&self) -> u64 {
        self.windows
    }

    /// Opens the contention window and applies the model's congestion estimate to `clock`.
    pub fn c_sim_start(
        &mut self,
        clock: &mut PhaseClock,
        model: &mut dyn ContentionModel,
    ) -> Result<Cycle, SimError> {
        if self.window_open {
            return Err(SimError::ContentionWindowOpen { core: self.core });
        }
        self.window_open = true;
        let from = clock.cycle();
        let to = model
            .window_start(self.core, from, &mut self.events)
            .map_err(|source| SimError::Contention {
                core: self.core,
                source,
            })?;
        let added = clock.rebase(to)?;
        log::debug!("{}: contention window start {} -> {} (+{})", self.core, from, to, added);
        Ok(clock.cycle())
    }

    /// Closes the contention window; the model may add trailing delay.
    pub fn c_sim_end(
        &mut self,
        clock: &mut PhaseClock,
        model: &mut dyn ContentionModel,
    ) -> Result<Cycle, SimError> {
        if !self.window_open {
            return Err(SimError::ContentionWindowClosed { core: self.core });
        }
        let from = clock.cycle();
        let to = model
            .window_end(self.core, from, &mut self.events)
            .map_err(|source| SimError::Contention {
                core: self.core,
                source,
            })?;
        clock.rebase(to)?;
        self.window_open = false;
        self.windows += 1;
        log::debug!("{}: contention window end at {}", self.core, clock.cycle());
        Ok(clock.cycle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contention::FixedContention;

    fn event(start: Cycle) -> TimingEvent {
        TimingEvent {
            kind: AccessKind::Load,
            line: 1,
            start,
            latency: 100,
            hit: false,
        }
    }

    #[test]
    fn event_recorder_drains() {
        let mut rec = EventRecorder::new();
        rec.record(event(0));
        rec.record(event(5));
        assert_eq!(rec.len(), 2);
        assert_eq!(rec.drain().len(), 2);
        assert!(rec.is_empty());
        assert_eq!(rec.total_recorded(), 2);
    }

    #[test]
    fn window_applies_congestion() {
        let mut clock = PhaseClock::new(CoreId(0), 1000);
        clock.advance(40);
        let mut model = FixedContention::new(20);
        let mut rec = CoreRecorder::new(CoreId(0));
        assert_eq!(rec.c_sim_start(&mut clock, &mut model).unwrap(), 60);
        assert!(rec.window_open());
        assert_eq!(rec.c_sim_end(&mut clock, &mut model).unwrap(), 60);
        assert_eq!(clock.contention_cycles(), 20);
        assert_eq!(rec.windows(), 1);
    }

    #[test]
    fn double_start_is_fatal() {
        let mut clock = PhaseClock::new(CoreId(1), 1000);
        let mut model = FixedContention::new(0);
        let mut rec = CoreRecorder::new(CoreId(1));
        rec.c_sim_start(&mut clock, &mut model).unwrap();
        assert!(matches!(
            rec.c_sim_start(&mut clock, &mut model),
            Err(SimError::ContentionWindowOpen { core: CoreId(1) })
        ));
    }

    #[test]
    fn end_without_start_is_fatal() {
        let mut clock = PhaseClock::new(CoreId(2), 1000);
        let mut model = FixedContention::new(0);
        let mut rec = CoreRecorder::new(CoreId(2));
        assert!(matches!(
            rec.c_sim_end(&mut clock, &mut model),
            Err(SimError::ContentionWindowClosed { core: CoreId(2) })
        ));
    }
}
