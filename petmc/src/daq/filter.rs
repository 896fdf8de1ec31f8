//! Energy gating.

use super::{Process, ProcessStats};
use crate::event::Interaction;
use crate::rng::Rng;

#[derive(Clone, Copy, Debug)]
enum FilterKind {
    EnergyGateLow(f64),
    EnergyGateHigh(f64),
}

/// Drops events whose energy falls outside the gate.
#[derive(Clone, Copy, Debug)]
pub struct FilterProcess {
    kind: FilterKind,
}

impl FilterProcess {
    /// Keeps events with energy at or above `threshold`.
    #[must_use]
    pub const fn energy_gate_low(threshold: f64) -> Self {
        Self {
            kind: FilterKind::EnergyGateLow(threshold),
        }
    }

    /// Keeps events with energy at or below `threshold`.
    #[must_use]
    pub const fn energy_gate_high(threshold: f64) -> Self {
        Self {
            kind: FilterKind::EnergyGateHigh(threshold),
        }
    }

    fn keep(&self, event: &Interaction) -> bool {
        match self.kind {
            FilterKind::EnergyGateLow(threshold) => event.energy >= threshold,
            FilterKind::EnergyGateHigh(threshold) => event.energy <= threshold,
        }
    }
}

impl Process for FilterProcess {
    fn process(
        &self,
        events: &mut [Interaction],
        _rng: &mut Rng,
        stats: &mut ProcessStats,
    ) -> usize {
        for event in events.iter_mut().filter(|e| !e.dropped) {
            if self.keep(event) {
                stats.no_kept += 1;
            } else {
                event.dropped = true;
                stats.no_dropped += 1;
            }
        }
        events.len()
    }

    fn stop(&self, events: &mut [Interaction], rng: &mut Rng, stats: &mut ProcessStats) {
        self.process(events, rng, stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daq::sort::tests::event_at;

    fn with_energy(energy: f64) -> Interaction {
        let mut event = event_at(0.0);
        event.energy = energy;
        event
    }

    #[test]
    fn low_gate_drops_below_threshold() {
        let filter = FilterProcess::energy_gate_low(0.400);
        let mut events = vec![with_energy(0.350), with_energy(0.450), with_energy(0.511)];
        let mut stats = ProcessStats::default();
        let mut rng = Rng::with_seed(0);
        let ready = filter.process(&mut events, &mut rng, &mut stats);
        assert_eq!(ready, 3);
        assert!(events[0].dropped);
        assert!(!events[1].dropped);
        assert!(!events[2].dropped);
        assert_eq!(stats.no_dropped, 1);
        assert_eq!(stats.no_kept, 2);
    }

    #[test]
    fn high_gate_drops_above_threshold() {
        let filter = FilterProcess::energy_gate_high(0.600);
        let mut events = vec![with_energy(0.511), with_energy(1.157)];
        let mut stats = ProcessStats::default();
        let mut rng = Rng::with_seed(0);
        filter.process(&mut events, &mut rng, &mut stats);
        assert!(!events[0].dropped);
        assert!(events[1].dropped);
    }

    #[test]
    fn already_dropped_events_are_not_recounted() {
        let filter = FilterProcess::energy_gate_low(0.400);
        let mut events = vec![with_energy(0.1)];
        events[0].dropped = true;
        let mut stats = ProcessStats::default();
        let mut rng = Rng::with_seed(0);
        filter.process(&mut events, &mut rng, &mut stats);
        assert_eq!(stats.no_dropped, 0);
        assert_eq!(stats.no_kept, 0);
    }
}
