//! Prompt and delayed coincidence sorting over the singles stream.

use super::ProcessStats;
use crate::event::{Interaction, COINC_REJECTED, COINC_UNTOUCHED};
use crate::rng::Rng;

/// Tags events with coincidence group ids.  Coincidence processors never
/// mutate the stream except to stamp `coinc_id`, and they rerun from
/// scratch over each batch because several of them may share the buffer.
///
/// A delayed window uses a non-zero `window_offset`; its accepted
/// coincidences estimate the accidental rate.
#[derive(Clone, Copy, Debug)]
pub struct CoincProcess {
    coinc_window: f64,
    window_offset: f64,
    reject_multiples: bool,
    paralyzable: bool,
}

impl CoincProcess {
    /// Creates a coincidence sorter.
    #[must_use]
    pub const fn new(
        coinc_window: f64,
        reject_multiples: bool,
        paralyzable: bool,
        window_offset: f64,
    ) -> Self {
        Self {
            coinc_window,
            window_offset,
            reject_multiples,
            paralyzable,
        }
    }

    /// Runs over the singles-ready range, returning the resume offset:
    /// the first event whose window could not be closed without events at
    /// or past the end.
    pub fn process(
        &self,
        events: &mut [Interaction],
        _rng: &mut Rng,
        stats: &mut ProcessStats,
    ) -> usize {
        self.process_optional_stop(events, stats, false)
    }

    /// Like [`Self::process`] under the promise that no further events
    /// will arrive.
    pub fn stop(&self, events: &mut [Interaction], _rng: &mut Rng, stats: &mut ProcessStats) {
        self.process_optional_stop(events, stats, true);
    }

    fn process_optional_stop(
        &self,
        events: &mut [Interaction],
        stats: &mut ProcessStats,
        stopping: bool,
    ) -> usize {
        // An untouched event has coinc_id -1; -2 is rejected; zero or
        // higher is an accepted group.  Other coincidence processors may
        // overwrite the tags, so the pass starts from a clean slate.
        for event in events.iter_mut() {
            event.coinc_id = COINC_UNTOUCHED;
        }

        // `cur` is where the next call would pick up: the end when
        // everything timed out or we are stopping, otherwise the first
        // event whose window ran off the end of the range.
        let mut cur = 0;
        while cur < events.len() {
            if events[cur].dropped || events[cur].coinc_id != COINC_UNTOUCHED {
                cur += 1;
                continue;
            }
            let current_time = events[cur].time;

            // The first untouched, undropped event at or after the
            // window's start.  With a delayed window the opening is not
            // contiguous with the current event.
            let mut window_start = cur + 1;
            while window_start < events.len() {
                let event = &events[window_start];
                if !event.dropped
                    && event.coinc_id == COINC_UNTOUCHED
                    && event.time - current_time >= self.window_offset
                {
                    break;
                }
                window_start += 1;
            }

            // Walk to the window's end; a paralyzable window pushes the
            // closing time out with every event accepted into it.
            let mut window_end_time = self.window_offset + self.coinc_window;
            let mut window_end = window_start;
            while window_end < events.len() {
                let event = &events[window_end];
                if !event.dropped && event.coinc_id == COINC_UNTOUCHED {
                    let delta = event.time - current_time;
                    if delta >= window_end_time {
                        break;
                    }
                    if self.paralyzable {
                        window_end_time = delta + self.coinc_window;
                    }
                }
                window_end += 1;
            }

            if window_end == events.len() && !stopping {
                break;
            }

            let no_events = 1 + events[window_start..window_end]
                .iter()
                .filter(|e| !e.dropped)
                .count();
            let no_events_i64 = i64::try_from(no_events).unwrap_or(0);

            let keep_events = if no_events == 2 {
                stats.no_coinc_pair_events += no_events_i64;
                true
            } else if no_events > 2 {
                stats.no_coinc_multiples_events += no_events_i64;
                !self.reject_multiples
            } else {
                stats.no_coinc_single_events += no_events_i64;
                false
            };

            let tag = if keep_events {
                stats.no_coinc_events
            } else {
                COINC_REJECTED
            };
            for event in events[window_start..window_end]
                .iter_mut()
                .filter(|e| !e.dropped)
            {
                event.coinc_id = tag;
            }
            events[cur].coinc_id = tag;
            if keep_events {
                stats.no_coinc_events += 1;
                stats.no_kept += no_events_i64;
            } else {
                stats.no_dropped += no_events_i64;
            }
            cur += 1;
        }
        cur
    }
}
