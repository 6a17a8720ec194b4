//! Contention models: turn the events cores recorded during a phase into queueing delay.

use crate::core::{CoreId, Cycle};
use crate::error::ContentionError;
use crate::recorder::EventRecorder;
use serde::Deserialize;

/// External contention model driven by the core recorder's window.
///
/// Both calls return the cycle the core's clock should move to; returning a cycle
/// earlier than `cycle` is a fatal consistency error on the core's side.
pub trait ContentionModel: Send {
    fn window_start(
        &mut self,
        core: CoreId,
        cycle: Cycle,
        events: &mut EventRecorder,
    ) -> Result<Cycle, ContentionError>;

    fn window_end(
        &mut self,
        core: CoreId,
        cycle: Cycle,
        events: &mut EventRecorder,
    ) -> Result<Cycle, ContentionError>;
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentionKind {
    /// No congestion: windows never move the clock.
    None,
    /// A constant delay per window.
    Fixed,
    /// Miss traffic serialised through shared memory channels.
    #[default]
    Queueing,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContentionConfig {
    pub kind: ContentionKind,
    /// Delay per window for [`ContentionKind::Fixed`].
    pub fixed_delay_cycles: u64,
    /// Independent memory channels for [`ContentionKind::Queueing`].
    pub channels: usize,
    /// Channel occupancy per miss.
    pub service_cycles: u64,
}

impl Default for ContentionConfig {
    fn default() -> Self {
        Self {
            kind: ContentionKind::Queueing,
            fixed_delay_cycles: 0,
            channels: 4,
            service_cycles: 8,
        }
    }
}

impl ContentionConfig {
    pub fn build(&self) -> Box<dyn ContentionModel> {
        match self.kind {
            ContentionKind::None => Box::new(FixedContention::new(0)),
            ContentionKind::Fixed => Box::new(FixedContention::new(self.fixed_delay_cycles)),
            ContentionKind::Queueing => {
                Box::new(QueueingContention::new(self.channels, self.service_cycles))
            }
        }
    }
}

/// Reports the same congestion for every window.
#[derive(Clone, Debug)]
pub struct FixedContention {
    delay: Cycle,
}

impl FixedContention {
    pub fn new(delay: Cycle) -> Self {
        Self { delay }
    }
}

impl ContentionModel for FixedContention {
    fn window_start(
        &mut self,
        _core: CoreId,
        cycle: Cycle,
        _events: &mut EventRecorder,
    ) -> Result<Cycle, ContentionError> {
        Ok(cycle + self.delay)
    }

    fn window_end(
        &mut self,
        _core: CoreId,
        cycle: Cycle,
        events: &mut EventRecorder,
    ) -> Result<Cycle, ContentionError> {
        events.drain();
        Ok(cycle)
    }
}

/// Deterministic queueing model: every miss occupies one of `channels` memory channels
/// for `service_cycles`. Channel occupancy persists across cores and phases, so a core
/// reconciled after a busy neighbour sees that neighbour's traffic as delay.
#[derive(Clone, Debug)]
pub struct QueueingContention {
    free_at: Vec<Cycle>,
    service_cycles: Cycle,
    total_delay: Cycle,
}

impl QueueingContention {
    pub fn new(channels: usize, service_cycles: Cycle) -> Self {
        Self {
            free_at: vec![0; channels],
            service_cycles,
            total_delay: 0,
        }
    }

    /// Delay handed out to all cores so far.
    pub fn total_delay(&self) -> Cycle {
        self.total_delay
    }
}

impl ContentionModel for QueueingContention {
    fn window_start(
        &mut self,
        core: CoreId,
        cycle: Cycle,
        events: &mut EventRecorder,
    ) -> Result<Cycle, ContentionError> {
        if self.free_at.is_empty() {
            return Err(ContentionError::NoEstimate { core, cycle });
        }
        let channels = self.free_at.len() as u64;
        let mut delay = 0;
        for ev in events.events().iter().filter(|e| !e.hit) {
            let ch = (ev.line % channels) as usize;
            let arrival = ev.start + delay;
            let begin = arrival.max(self.free_at[ch]);
            delay += begin - arrival;
            self.free_at[ch] = begin + self.service_cycles;
        }
        self.total_delay += delay;
        log::trace!("{}: {} events queued, +{} cycles", core, events.len(), delay);
        Ok(cycle + delay)
    }

    fn window_end(
        &mut self,
        _core: CoreId,
        cycle: Cycle,
        events: &mut EventRecorder,
    ) -> Result<Cycle, ContentionError> {
        events.drain();
        Ok(cycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AccessKind;
    use crate::recorder::TimingEvent;

    fn miss(line: u64, start: Cycle) -> TimingEvent {
        TimingEvent {
            kind: AccessKind::Load,
            line,
            start,
            latency: 100,
            hit: false,
        }
    }

    #[test]
    fn fixed_model_adds_constant() {
        let mut m = FixedContention::new(20);
        let mut rec = EventRecorder::new();
        rec.record(miss(0, 0));
        assert_eq!(m.window_start(CoreId(0), 100, &mut rec).unwrap(), 120);
        assert_eq!(m.window_end(CoreId(0), 120, &mut rec).unwrap(), 120);
        assert!(rec.is_empty());
    }

    #[test]
    fn queueing_serialises_same_channel() {
        let mut m = QueueingContention::new(1, 10);
        let mut rec = EventRecorder::new();
        rec.record(miss(0, 0));
        rec.record(miss(1, 0));
        rec.record(miss(2, 0));
        // Second waits 10; third arrives shifted by that and waits another 10.
        let end = m.window_start(CoreId(0), 500, &mut rec).unwrap();
        assert_eq!(end, 500 + 10 + 10);
        assert_eq!(m.total_delay(), 20);
    }

    #[test]
    fn neighbour_traffic_delays_later_core() {
        let mut m = QueueingContention::new(2, 10);
        let mut a = EventRecorder::new();
        a.record(miss(0, 0));
        let mut b = EventRecorder::new();
        b.record(miss(2, 5));
        assert_eq!(m.window_start(CoreId(0), 100, &mut a).unwrap(), 100);
        assert_eq!(m.window_start(CoreId(1), 100, &mut b).unwrap(), 105);
    }

    #[test]
    fn hits_do_not_occupy_channels() {
        let mut m = QueueingContention::new(1, 10);
        let mut rec = EventRecorder::new();
        rec.record(TimingEvent {
            hit: true,
            ..miss(0, 0)
        });
        rec.record(miss(0, 0));
        assert_eq!(m.window_start(CoreId(0), 0, &mut rec).unwrap(), 0);
    }

    #[test]
    fn zero_channels_has_no_estimate() {
        let mut m = QueueingContention::new(0, 10);
        let mut rec = EventRecorder::new();
        assert!(matches!(
            m.window_start(CoreId(3), 7, &mut rec),
            Err(ContentionError::NoEstimate { core: CoreId(3), cycle: 7 })
        ));
    }
}
