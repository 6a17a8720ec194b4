//! Phase clock: the core's simulated cycle counter and the bound of the current phase.

use crate::core::{CoreId, Cycle};
use crate::error::SimError;

/// Tracks simulated time for one core.
///
/// The cycle only moves forward. Accounting components call [`PhaseClock::advance`];
/// the contention bridge calls [`PhaseClock::rebase`], which may jump forward but fails
/// if asked to go back.
#[derive(Clone, Debug)]
pub struct PhaseClock {
    core: CoreId,
    cycle: Cycle,
    phase_start: Cycle,
    phase_end: Cycle,
    phase_length: Cycle,
    /// Cycles skipped while no thread was running on the core.
    halted_cycles: Cycle,
    /// Cycles added by contention rebases.
    contention_cycles: Cycle,
}

impl PhaseClock {
    pub fn new(core: CoreId, phase_length: Cycle) -> Self {
        Self {
            core,
            cycle: 0,
            phase_start: 0,
            phase_end: phase_length,
            phase_length,
            halted_cycles: 0,
            contention_cycles: 0,
        }
    }

    pub fn advance(&mut self, cycles: Cycle) {
        self.cycle += cycles;
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    /// Cycles elapsed since the start of the current phase.
    pub fn phase_cycles(&self) -> Cycle {
        self.cycle.saturating_sub(self.phase_start)
    }

    /// Cycle cap for the current phase; the lockstep driver stops feeding the core here.
    pub fn bound_cycles(&self) -> Cycle {
        self.phase_end
    }

    pub fn phase_length(&self) -> Cycle {
        self.phase_length
    }

    /// Whether the core has consumed its share of the current phase.
    pub fn past_bound(&self) -> bool {
        self.cycle >= self.phase_end
    }

    pub fn unhalted_cycles(&self) -> Cycle {
        self.cycle - self.halted_cycles
    }

    pub fn halted_cycles(&self) -> Cycle {
        self.halted_cycles
    }

    pub fn contention_cycles(&self) -> Cycle {
        self.contention_cycles
    }

    /// Moves the clock to `to` on behalf of the contention model.
    ///
    /// Returns the cycles added. Moving backward is a consistency failure.
    pub fn rebase(&mut self, to: Cycle) -> Result<Cycle, SimError> {
        if to < self.cycle {
            return Err(SimError::ClockRegression {
                core: self.core,
                from: self.cycle,
                to,
            });
        }
        let delta = to - self.cycle;
        self.cycle = to;
        self.contention_cycles += delta;
        Ok(delta)
    }

    /// Skips an idle core forward to `cycle`; the skipped span counts as halted.
    pub fn halt_until(&mut self, cycle: Cycle) {
        if cycle > self.cycle {
            self.halted_cycles += cycle - self.cycle;
            self.cycle = cycle;
        }
    }

    /// Starts the global phase `[start, start + phase_length)`.
    pub fn begin_phase(&mut self, start: Cycle) {
        self.phase_start = start;
        self.phase_end = start + self.phase_length;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_and_phase_queries() {
        let mut clock = PhaseClock::new(CoreId(0), 100);
        clock.advance(30);
        assert_eq!(clock.cycle(), 30);
        assert_eq!(clock.phase_cycles(), 30);
        assert_eq!(clock.bound_cycles(), 100);
        assert!(!clock.past_bound());
        clock.advance(70);
        assert!(clock.past_bound());
    }

    #[test]
    fn rebase_forward_counts_contention() {
        let mut clock = PhaseClock::new(CoreId(0), 100);
        clock.advance(10);
        assert_eq!(clock.rebase(30).unwrap(), 20);
        assert_eq!(clock.cycle(), 30);
        assert_eq!(clock.contention_cycles(), 20);
    }

    #[test]
    fn rebase_backward_is_fatal() {
        let mut clock = PhaseClock::new(CoreId(4), 100);
        clock.advance(50);
        let err = clock.rebase(49).unwrap_err();
        assert!(matches!(
            err,
            SimError::ClockRegression {
                core: CoreId(4),
                from: 50,
                to: 49
            }
        ));
        assert_eq!(clock.cycle(), 50);
    }

    #[test]
    fn halted_time_is_excluded_from_unhalted() {
        let mut clock = PhaseClock::new(CoreId(0), 100);
        clock.advance(20);
        clock.halt_until(100);
        clock.begin_phase(100);
        clock.advance(5);
        assert_eq!(clock.cycle(), 105);
        assert_eq!(clock.halted_cycles(), 80);
        assert_eq!(clock.unhalted_cycles(), 25);
        assert_eq!(clock.phase_cycles(), 5);
        assert_eq!(clock.bound_cycles(), 200);
    }

    #[test]
    fn halt_until_never_moves_backward() {
        let mut clock = PhaseClock::new(CoreId(0), 100);
        clock.advance(150);
        clock.halt_until(100);
        assert_eq!(clock.cycle(), 150);
        assert_eq!(clock.halted_cycles(), 0);
    }
}
