//! Pile-up merging of events within the same readout component.

use super::{Process, ProcessStats};
use crate::error::{Error, Result};
use crate::event::Interaction;
use crate::rng::Rng;

#[derive(Clone, Debug)]
enum MergeKind {
    /// The earlier event wins and absorbs the energy.
    First,
    /// The higher-energy event wins and absorbs the energy.
    Max,
    /// Anger logic: the earlier event wins the sum, but its detector id
    /// is relocated to the energy-weighted block centroid.
    Anger {
        bx: Vec<i32>,
        by: Vec<i32>,
        bz: Vec<i32>,
        no_bx: i32,
        no_by: i32,
        no_bz: i32,
        /// `(block, bx, by, bz)` packed index to detector id.
        reverse_map: Vec<i32>,
    },
}

/// Merges events that land in the same component within the time window.
#[derive(Clone, Debug)]
pub struct MergeProcess {
    id_lookup: Vec<i32>,
    time_window: f64,
    kind: MergeKind,
}

impl MergeProcess {
    /// First-wins merging over the component map `id_lookup`.
    #[must_use]
    pub const fn first(id_lookup: Vec<i32>, time_window: f64) -> Self {
        Self {
            id_lookup,
            time_window,
            kind: MergeKind::First,
        }
    }

    /// Max-energy-wins merging over the component map `id_lookup`.
    #[must_use]
    pub const fn max(id_lookup: Vec<i32>, time_window: f64) -> Self {
        Self {
            id_lookup,
            time_window,
            kind: MergeKind::Max,
        }
    }

    /// Anger-logic merging.  `id_lookup` maps detectors to blocks and
    /// `bx`/`by`/`bz` to the block-local coordinates; the reverse map is
    /// built here and ambiguous coordinates are a construction error.
    ///
    /// # Errors
    ///
    /// Fails when two detectors share the same block coordinates.
    pub fn anger(
        id_lookup: Vec<i32>,
        time_window: f64,
        bx: Vec<i32>,
        by: Vec<i32>,
        bz: Vec<i32>,
    ) -> Result<Self> {
        let max_of = |v: &[i32]| v.iter().copied().max().unwrap_or(-1) + 1;
        let no_blk = max_of(&id_lookup);
        let no_bx = max_of(&bx);
        let no_by = max_of(&by);
        let no_bz = max_of(&bz);
        let size = usize::try_from(no_blk * no_bx * no_by * no_bz)
            .map_err(|err| Error::General(err.to_string()))?;
        let mut reverse_map = vec![-1_i32; size];
        for det in 0..id_lookup.len() {
            let index = pack_index(
                id_lookup[det],
                bx[det],
                by[det],
                bz[det],
                no_bx,
                no_by,
                no_bz,
            );
            let slot = &mut reverse_map[usize::try_from(index).unwrap()];
            if *slot != -1 {
                return Err(Error::General(format!(
                    "duplicate anger block coordinates for detector {det}"
                )));
            }
            *slot = i32::try_from(det).map_err(|err| Error::General(err.to_string()))?;
        }
        Ok(Self {
            id_lookup,
            time_window,
            kind: MergeKind::Anger {
                bx,
                by,
                bz,
                no_bx,
                no_by,
                no_bz,
                reverse_map,
            },
        })
    }

    /// The component an event belongs to; unmapped detectors never merge.
    fn mapped_id(&self, event: &Interaction) -> i32 {
        usize::try_from(event.det_id)
            .ok()
            .and_then(|det| self.id_lookup.get(det).copied())
            .unwrap_or(-1)
    }

    /// Combines `winner_first` (earlier) and the later event; exactly one
    /// of the two survives with the summed energy.
    fn merge_pair(&self, earlier: &mut Interaction, later: &mut Interaction) {
        let sum = earlier.energy + later.energy;
        match &self.kind {
            MergeKind::First => {
                earlier.energy = sum;
                later.dropped = true;
            }
            MergeKind::Max => {
                if earlier.energy >= later.energy {
                    earlier.energy = sum;
                    later.dropped = true;
                } else {
                    later.energy = sum;
                    earlier.dropped = true;
                }
            }
            MergeKind::Anger {
                bx,
                by,
                bz,
                no_bx,
                no_by,
                no_bz,
                reverse_map,
            } => {
                let d0 = usize::try_from(earlier.det_id).unwrap();
                let d1 = usize::try_from(later.det_id).unwrap();
                let weighted = |map: &[i32]| {
                    let centroid = (f64::from(map[d0]) * earlier.energy
                        + f64::from(map[d1]) * later.energy)
                        / sum;
                    #[allow(clippy::cast_possible_truncation)]
                    {
                        centroid.round() as i32
                    }
                };
                let index = pack_index(
                    self.id_lookup[d0],
                    weighted(bx),
                    weighted(by),
                    weighted(bz),
                    *no_bx,
                    *no_by,
                    *no_bz,
                );
                earlier.det_id = reverse_map[usize::try_from(index).unwrap()];
                earlier.energy = sum;
                later.dropped = true;
            }
        }
    }

    fn merge_pass(&self, events: &mut [Interaction], stats: &mut ProcessStats) {
        for ii in 0..events.len() {
            if events[ii].dropped {
                continue;
            }
            let component = self.mapped_id(&events[ii]);
            if component < 0 {
                continue;
            }
            for jj in ii + 1..events.len() {
                if events[jj].time - events[ii].time >= self.time_window {
                    break;
                }
                if events[jj].dropped || self.mapped_id(&events[jj]) != component {
                    continue;
                }
                let (head, tail) = events.split_at_mut(jj);
                self.merge_pair(&mut head[ii], &mut tail[0]);
                stats.no_dropped += 1;
                if head[ii].dropped {
                    break;
                }
            }
        }
    }
}

fn pack_index(blk: i32, bx: i32, by: i32, bz: i32, no_bx: i32, no_by: i32, no_bz: i32) -> i32 {
    ((blk * no_bx + bx) * no_by + by) * no_bz + bz
}

impl Process for MergeProcess {
    fn process(
        &self,
        events: &mut [Interaction],
        _rng: &mut Rng,
        stats: &mut ProcessStats,
    ) -> usize {
        if events.is_empty() {
            return 0;
        }
        self.merge_pass(events, stats);

        // Final up to the last event whose merge window has closed
        // against the newest time in the buffer.
        let out_time = events[events.len() - 1].time - self.time_window;
        let ready = events.partition_point(|e| e.time <= out_time);
        stats.no_kept +=
            i64::try_from(events[..ready].iter().filter(|e| !e.dropped).count()).unwrap_or(0);
        ready
    }

    fn stop(&self, events: &mut [Interaction], _rng: &mut Rng, stats: &mut ProcessStats) {
        self.merge_pass(events, stats);
        stats.no_kept +=
            i64::try_from(events.iter().filter(|e| !e.dropped).count()).unwrap_or(0);
    }
}
