//! Time sorting of the nearly sorted event stream.

use super::{Process, ProcessStats};
use crate::event::Interaction;
use crate::rng::Rng;

/// Insertion-sorts the buffer by event time.  Insertion sort is the right
/// fit because the input is nearly sorted, and it is stable so ties keep
/// their emission order.
#[derive(Clone, Copy, Debug)]
pub struct SortProcess {
    max_wait_time: f64,
}

impl SortProcess {
    /// Creates a sorter that holds events back until they are at least
    /// `max_wait_time` older than the newest event seen.
    #[must_use]
    pub const fn new(max_wait_time: f64) -> Self {
        Self { max_wait_time }
    }
}

fn insertion_sort(events: &mut [Interaction]) {
    for ii in 1..events.len() {
        let time = events[ii].time;
        let index = events[..ii].partition_point(|e| e.time <= time);
        events[index..=ii].rotate_right(1);
    }
}

impl Process for SortProcess {
    fn process(
        &self,
        events: &mut [Interaction],
        _rng: &mut Rng,
        stats: &mut ProcessStats,
    ) -> usize {
        // The timeout detection below needs a non-empty range.
        if events.is_empty() {
            return 0;
        }
        insertion_sort(events);

        // Everything at least the wait window older than the newest
        // event is final: anything younger could still be displaced by a
        // not-yet-seen event.
        let out_time = events[events.len() - 1].time - self.max_wait_time;
        let ready = events.partition_point(|e| e.time <= out_time);
        stats.no_kept +=
            i64::try_from(events[..ready].iter().filter(|e| !e.dropped).count()).unwrap_or(0);
        ready
    }

    fn stop(&self, events: &mut [Interaction], _rng: &mut Rng, stats: &mut ProcessStats) {
        insertion_sort(events);
        stats.no_kept +=
            i64::try_from(events.iter().filter(|e| !e.dropped).count()).unwrap_or(0);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::event::{Color, Interaction, Kind, NuclearDecay};
    use crate::vecmath::Vector3;

    pub(crate) fn event_at(time: f64) -> Interaction {
        let decay = NuclearDecay::new(0, time, 0, Vector3::ZERO, 0.0);
        let mut event = Interaction::from_decay(&decay, 0);
        event.kind = Kind::Photoelectric;
        event.color = Color::Blue;
        event
    }

    #[test]
    fn near_sorted_stream_gets_a_monotonic_ready_prefix() {
        let times = [0.0, 2.0, 1.0, 3.0, 5.0, 4.0, 10.0, 9.5];
        let mut events: Vec<Interaction> = times.iter().map(|&t| event_at(t)).collect();
        let sorter = SortProcess::new(1.0);
        let mut stats = ProcessStats::default();
        let mut rng = Rng::with_seed(0);

        let ready = sorter.process(&mut events, &mut rng, &mut stats);

        // The ready prefix is sorted and every element is at least the
        // wait window older than the newest event.
        assert!(events[..ready].windows(2).all(|w| w[0].time <= w[1].time));
        let newest = events.last().unwrap().time;
        assert!(events[..ready].iter().all(|e| e.time <= newest - 1.0));
        // The pending suffix is bounded by the events within the window
        // of the maximum time seen.
        assert!(events[ready..].iter().all(|e| e.time > newest - 1.0));
        assert_eq!(stats.no_kept, i64::try_from(ready).unwrap());
    }

    #[test]
    fn stop_finalizes_everything_in_order() {
        let mut events: Vec<Interaction> =
            [3.0, 1.0, 2.0].iter().map(|&t| event_at(t)).collect();
        let sorter = SortProcess::new(10.0);
        let mut stats = ProcessStats::default();
        let mut rng = Rng::with_seed(0);

        let ready = sorter.process(&mut events, &mut rng, &mut stats);
        assert_eq!(ready, 0);

        sorter.stop(&mut events, &mut rng, &mut stats);
        assert!(events.windows(2).all(|w| w[0].time <= w[1].time));
        assert_eq!(stats.no_kept, 3);
    }

    #[test]
    fn empty_range_is_a_no_op() {
        let sorter = SortProcess::new(1.0);
        let mut stats = ProcessStats::default();
        let mut rng = Rng::with_seed(0);
        assert_eq!(sorter.process(&mut [], &mut rng, &mut stats), 0);
    }
}
