//! Per-component detector deadtime.

use super::{Process, ProcessStats};
use crate::event::Interaction;
use crate::rng::Rng;
use std::collections::BTreeMap;

/// Drops events arriving within the deadtime of the previous event at the
/// same component.  Paralyzable deadtime extends on every arrival,
/// accepted or not; non-paralyzable deadtime is counted from the last
/// accepted event only.
#[derive(Clone, Debug)]
pub struct DeadtimeProcess {
    id_lookup: Vec<i32>,
    deadtime: f64,
    paralyzable: bool,
}

impl DeadtimeProcess {
    /// Creates a deadtime stage over the component map `id_lookup`.
    #[must_use]
    pub const fn new(id_lookup: Vec<i32>, deadtime: f64, paralyzable: bool) -> Self {
        Self {
            id_lookup,
            deadtime,
            paralyzable,
        }
    }

    fn mapped_id(&self, event: &Interaction) -> i32 {
        usize::try_from(event.det_id)
            .ok()
            .and_then(|det| self.id_lookup.get(det).copied())
            .unwrap_or(-1)
    }

    fn apply(&self, events: &mut [Interaction], stats: &mut ProcessStats) {
        // The process is strictly causal over single events, so the whole
        // range finalizes in one pass; the reference times per component
        // are rebuilt from the range itself.
        let mut last_time: BTreeMap<i32, f64> = BTreeMap::new();
        for event in events.iter_mut().filter(|e| !e.dropped) {
            let component = self.mapped_id(event);
            if component < 0 {
                stats.no_kept += 1;
                continue;
            }
            match last_time.get(&component) {
                Some(&reference) if event.time - reference < self.deadtime => {
                    event.dropped = true;
                    stats.no_dropped += 1;
                    if self.paralyzable {
                        // Dead interval extends from every arrival.
                        last_time.insert(component, event.time);
                    }
                }
                _ => {
                    stats.no_kept += 1;
                    last_time.insert(component, event.time);
                }
            }
        }
    }
}

impl Process for DeadtimeProcess {
    fn process(
        &self,
        events: &mut [Interaction],
        _rng: &mut Rng,
        stats: &mut ProcessStats,
    ) -> usize {
        self.apply(events, stats);
        events.len()
    }

    fn stop(&self, events: &mut [Interaction], _rng: &mut Rng, stats: &mut ProcessStats) {
        self.apply(events, stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daq::sort::tests::event_at;
    use crate::event::Interaction;

    fn stream(times: &[f64]) -> Vec<Interaction> {
        times
            .iter()
            .map(|&t| {
                let mut e = event_at(t);
                e.det_id = 0;
                e
            })
            .collect()
    }

    #[test]
    fn nonparalyzable_accepted_interarrival_is_at_least_tau() {
        let deadtime = DeadtimeProcess::new(vec![0], 1.0, false);
        let mut events = stream(&[0.0, 0.4, 0.8, 1.2, 1.9, 2.5]);
        let mut stats = ProcessStats::default();
        let mut rng = Rng::with_seed(0);
        let ready = deadtime.process(&mut events, &mut rng, &mut stats);
        assert_eq!(ready, events.len());

        let accepted: Vec<f64> = events
            .iter()
            .filter(|e| !e.dropped)
            .map(|e| e.time)
            .collect();
        // 0.0 accepted; 0.4, 0.8 dead; 1.2 accepted; 1.9 dead; 2.5 accepted.
        assert_eq!(accepted, vec![0.0, 1.2, 2.5]);
        assert!(accepted.windows(2).all(|w| w[1] - w[0] >= 1.0));
        assert_eq!(stats.no_dropped, 3);
    }

    #[test]
    fn paralyzable_deadtime_extends_on_every_arrival() {
        let deadtime = DeadtimeProcess::new(vec![0], 1.0, true);
        let mut events = stream(&[0.0, 0.8, 1.6, 2.4, 4.0]);
        let mut stats = ProcessStats::default();
        let mut rng = Rng::with_seed(0);
        deadtime.process(&mut events, &mut rng, &mut stats);

        let accepted: Vec<f64> = events
            .iter()
            .filter(|e| !e.dropped)
            .map(|e| e.time)
            .collect();
        // Each arrival within tau of the previous one extends the dead
        // interval, so only the long gap at 4.0 recovers.
        assert_eq!(accepted, vec![0.0, 4.0]);
        // Every dropped event has a predecessor within tau.
        for (idx, event) in events.iter().enumerate() {
            if event.dropped {
                assert!(event.time - events[idx - 1].time < 1.0);
            }
        }
    }

    #[test]
    fn components_are_independent() {
        let deadtime = DeadtimeProcess::new(vec![0, 1], 1.0, false);
        let mut events = stream(&[0.0, 0.1]);
        events[1].det_id = 1;
        let mut stats = ProcessStats::default();
        let mut rng = Rng::with_seed(0);
        deadtime.process(&mut events, &mut rng, &mut stats);
        assert!(events.iter().all(|e| !e.dropped));
        assert_eq!(stats.no_kept, 2);
    }
}
