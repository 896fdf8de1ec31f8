//! Gaussian energy and time blurring.

use super::{Process, ProcessStats};
use crate::event::Interaction;
use crate::rng::Rng;

#[derive(Clone, Copy, Debug)]
enum BlurKind {
    /// Fractional FWHM applied at every energy.
    Energy { fwhm_frac: f64 },
    /// Fractional FWHM quoted at a reference energy, scaling with
    /// 1/sqrt(E).
    EnergyReferenced { fwhm_frac: f64, ref_energy: f64 },
    /// Time FWHM with the perturbation capped by rejection.
    Time { fwhm: f64, max_blur: f64 },
}

/// A pure in-place transform; every event is final as soon as it is seen.
#[derive(Clone, Copy, Debug)]
pub struct BlurProcess {
    kind: BlurKind,
}

impl BlurProcess {
    /// Energy blur with fractional FWHM `fwhm_frac`.
    #[must_use]
    pub const fn energy(fwhm_frac: f64) -> Self {
        Self {
            kind: BlurKind::Energy { fwhm_frac },
        }
    }

    /// Energy blur whose fractional FWHM is quoted at `ref_energy`.
    #[must_use]
    pub const fn energy_referenced(fwhm_frac: f64, ref_energy: f64) -> Self {
        Self {
            kind: BlurKind::EnergyReferenced {
                fwhm_frac,
                ref_energy,
            },
        }
    }

    /// Time blur of the given FWHM, capped at `max_blur` either side.
    #[must_use]
    pub const fn time(fwhm: f64, max_blur: f64) -> Self {
        Self {
            kind: BlurKind::Time { fwhm, max_blur },
        }
    }

    /// A time blur reorders events, so the chain needs a sorter behind it
    /// covering twice the blur cap.  `None` for energy blurs.
    #[must_use]
    pub const fn time_sort_window(&self) -> Option<f64> {
        match self.kind {
            BlurKind::Time { max_blur, .. } => Some(2.0 * max_blur),
            _ => None,
        }
    }

    fn blur(&self, event: &mut Interaction, rng: &mut Rng) {
        match self.kind {
            BlurKind::Energy { fwhm_frac } => {
                event.energy = rng.gaussian_energy_blur(event.energy, fwhm_frac);
            }
            BlurKind::EnergyReferenced {
                fwhm_frac,
                ref_energy,
            } => {
                event.energy =
                    rng.gaussian_energy_blur_inverse_sqrt(event.energy, fwhm_frac, ref_energy);
            }
            BlurKind::Time { fwhm, max_blur } => {
                event.time = rng.gaussian_blur_time_trunc(event.time, fwhm, max_blur);
            }
        }
    }
}

impl Process for BlurProcess {
    fn process(
        &self,
        events: &mut [Interaction],
        rng: &mut Rng,
        stats: &mut ProcessStats,
    ) -> usize {
        for event in events.iter_mut().filter(|e| !e.dropped) {
            self.blur(event, rng);
            stats.no_kept += 1;
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
    use float_cmp::assert_approx_eq;

    #[test]
    fn energy_blur_keeps_the_mean_and_spreads() {
        let blur = BlurProcess::energy(0.10);
        let mut rng = Rng::with_seed(7);
        let mut stats = ProcessStats::default();
        let mut events: Vec<_> = (0..4000)
            .map(|_| {
                let mut e = event_at(0.0);
                e.energy = 0.511;
                e
            })
            .collect();
        let ready = blur.process(&mut events, &mut rng, &mut stats);
        assert_eq!(ready, 4000);

        let mean: f64 = events.iter().map(|e| e.energy).sum::<f64>() / 4000.0;
        assert_approx_eq!(f64, mean, 0.511, epsilon = 2e-3);
        assert!(events.iter().any(|e| e.energy != 0.511));
    }

    #[test]
    fn time_blur_is_capped() {
        let fwhm = 300e-12;
        let blur = BlurProcess::time(fwhm, 3.0 * fwhm);
        assert_approx_eq!(f64, blur.time_sort_window().unwrap(), 6.0 * fwhm);

        let mut rng = Rng::with_seed(7);
        let mut stats = ProcessStats::default();
        let mut events: Vec<_> = (0..2000).map(|_| event_at(1.0)).collect();
        blur.process(&mut events, &mut rng, &mut stats);
        assert!(events.iter().all(|e| (e.time - 1.0).abs() <= 3.0 * fwhm));
    }

    #[test]
    fn dropped_events_are_left_untouched() {
        let blur = BlurProcess::energy(0.5);
        let mut rng = Rng::with_seed(7);
        let mut stats = ProcessStats::default();
        let mut events = vec![event_at(0.0)];
        events[0].energy = 0.511;
        events[0].dropped = true;
        blur.process(&mut events, &mut rng, &mut stats);
        assert_approx_eq!(f64, events[0].energy, 0.511);
        assert_eq!(stats.no_kept, 0);
    }
}
