//! Decay models: positron emitters and calibration beams.

use crate::event::{Color, NuclearDecay, Photon};
use crate::physics;
use crate::rng::Rng;
use crate::vecmath::Vector3;
use enum_dispatch::enum_dispatch;

/// Marker energy attributed to a positron decay record, in MeV.
const POSITRON_DECAY_ENERGY: f64 = 0.120;

/// The behavior every decay model provides.  Models are polymorphic only
/// at construction; the hot path dispatches over the closed [`Isotope`]
/// sum.
#[enum_dispatch]
pub trait IsotopeModel {
    /// Half life in seconds; infinite for constant activity.
    fn half_life(&self) -> f64;
    /// Expected photons per decay, used for time splitting.
    fn expected_no_photons(&self) -> f64;
    /// Produces one decay at the given position and time.
    fn decay(
        &self,
        decay_id: i64,
        time: f64,
        src_id: i32,
        position: &Vector3,
        rng: &mut Rng,
    ) -> NuclearDecay;
}

/// The closed set of decay models.
#[enum_dispatch(IsotopeModel)]
#[derive(Clone, Debug)]
pub enum Isotope {
    /// A positron emitter.
    Positron,
    /// A uniform-cone calibration beam.
    Beam,
    /// A Gaussian-profile calibration beam.
    GaussianBeam,
}

/// How far a positron travels before annihilating.
#[derive(Clone, Copy, Debug, Default)]
pub enum PositronRange {
    /// Annihilate at the decay point.
    #[default]
    None,
    /// Truncated Gaussian range profile.
    Gaussian {
        /// Sigma of the range distribution, cm.
        sigma_cm: f64,
        /// Largest allowed range, cm.
        max_cm: f64,
    },
    /// The Levin truncated double-exponential range profile.
    LevinExp {
        /// Probability of drawing from the `k1` exponential, after
        /// rescaling for Monte Carlo sampling.
        c_prime: f64,
        /// First exponential rate, 1/cm.
        k1: f64,
        /// Second exponential rate, 1/cm.
        k2: f64,
        /// Largest allowed range, cm.
        max_cm: f64,
    },
}

/// A positron emitter, optionally with a prompt gamma from an excited
/// daughter state.
#[derive(Clone, Debug)]
pub struct Positron {
    half_life: f64,
    /// Acolinearity sigma in radians.
    acolinearity: f64,
    gamma_decay_energy: f64,
    positron_emission_prob: f64,
    emit_gamma: bool,
    range: PositronRange,
}

impl Positron {
    /// Creates an emitter.  The acolinearity is quoted as a FWHM in
    /// degrees, the prompt gamma energy in MeV (zero disables it).
    #[must_use]
    pub fn new(
        acolinearity_deg_fwhm: f64,
        half_life: f64,
        positron_emission_prob: f64,
        gamma_decay_energy_mev: f64,
    ) -> Self {
        Self {
            half_life,
            acolinearity: acolinearity_deg_fwhm / 180.0
                * std::f64::consts::PI
                * physics::FWHM_TO_SIGMA,
            gamma_decay_energy: gamma_decay_energy_mev,
            positron_emission_prob,
            emit_gamma: gamma_decay_energy_mev > 0.0,
            range: PositronRange::None,
        }
    }

    /// Switches to a truncated Gaussian positron range, parameters in mm.
    pub fn set_range_gaussian(&mut self, fwhm_mm: f64, max_mm: f64) {
        self.range = PositronRange::Gaussian {
            sigma_cm: fwhm_mm * physics::MM_TO_CM * physics::FWHM_TO_SIGMA,
            max_cm: max_mm * physics::MM_TO_CM,
        };
    }

    /// Switches to the Levin double-exponential positron range.  `k1` and
    /// `k2` are quoted in 1/mm and `max_mm` in mm.
    pub fn set_range_levin_exp(&mut self, c: f64, k1: f64, k2: f64, max_mm: f64) {
        // Rescale the mixing constant so the distribution can be sampled
        // as a two-component exponential mixture.
        self.range = PositronRange::LevinExp {
            c_prime: c / (k1 / k2).mul_add(1.0 - c, c),
            k1: k1 / physics::MM_TO_CM,
            k2: k2 / physics::MM_TO_CM,
            max_cm: max_mm * physics::MM_TO_CM,
        };
    }
}

impl IsotopeModel for Positron {
    fn half_life(&self) -> f64 {
        self.half_life
    }

    fn expected_no_photons(&self) -> f64 {
        let mut expected = 2.0 * self.positron_emission_prob;
        if self.emit_gamma {
            expected += 1.0;
        }
        expected
    }

    fn decay(
        &self,
        decay_id: i64,
        time: f64,
        src_id: i32,
        position: &Vector3,
        rng: &mut Rng,
    ) -> NuclearDecay {
        let mut anni_position = *position;
        match self.range {
            PositronRange::None => {}
            PositronRange::Gaussian { sigma_cm, max_cm } => {
                let range = rng.truncated_gaussian(sigma_cm, max_cm);
                anni_position += rng.uniform_sphere() * range;
            }
            PositronRange::LevinExp {
                c_prime,
                k1,
                k2,
                max_cm,
            } => {
                let range = rng.truncated_levin_double_exp(c_prime, k1, k2, max_cm);
                anni_position += rng.uniform_sphere() * range;
            }
        }

        let mut decay =
            NuclearDecay::new(decay_id, time, src_id, anni_position, POSITRON_DECAY_ENERGY);

        if self.emit_gamma {
            decay.add_photon(Photon::new(
                *position,
                rng.uniform_sphere(),
                self.gamma_decay_energy,
                time,
                decay_id,
                Color::Yellow,
                src_id,
            ));
        }

        if rng.selection(self.positron_emission_prob) {
            let dir = rng.uniform_sphere();
            decay.add_photon(Photon::new(
                anni_position,
                dir,
                physics::ENERGY_511,
                time,
                decay_id,
                Color::Blue,
                src_id,
            ));
            decay.add_photon(Photon::new(
                anni_position,
                rng.acolinearity(&dir, self.acolinearity),
                physics::ENERGY_511,
                time,
                decay_id,
                Color::Red,
                src_id,
            ));
        }

        decay
    }
}

/// A back-to-back photon beam with a uniform cone profile.
#[derive(Clone, Debug)]
pub struct Beam {
    axis: Vector3,
    angle_max: f64,
    energy: f64,
}

impl Beam {
    /// Creates a beam along `axis` with a cone half-angle in degrees.
    #[must_use]
    pub fn new(axis: Vector3, angle_max_deg: f64, energy: f64) -> Self {
        Self {
            axis: axis.normalized(),
            angle_max: angle_max_deg / 180.0 * std::f64::consts::PI,
            energy,
        }
    }
}

impl IsotopeModel for Beam {
    fn half_life(&self) -> f64 {
        f64::INFINITY
    }

    fn expected_no_photons(&self) -> f64 {
        2.0
    }

    fn decay(
        &self,
        decay_id: i64,
        time: f64,
        src_id: i32,
        position: &Vector3,
        rng: &mut Rng,
    ) -> NuclearDecay {
        let mut decay = NuclearDecay::new(decay_id, time, src_id, *position, 0.0);
        let dir = if self.angle_max == 0.0 {
            self.axis
        } else {
            rng.deflection_uniform(&self.axis, self.angle_max)
        };
        decay.add_photon(Photon::new(
            *position,
            dir,
            self.energy,
            time,
            decay_id,
            Color::Blue,
            src_id,
        ));
        decay.add_photon(Photon::new(
            *position,
            -dir,
            self.energy,
            time,
            decay_id,
            Color::Red,
            src_id,
        ));
        decay
    }
}

/// A back-to-back photon beam with a Gaussian angular profile.
#[derive(Clone, Debug)]
pub struct GaussianBeam {
    axis: Vector3,
    /// Angular sigma in radians.
    angle_sigma: f64,
    energy: f64,
}

impl GaussianBeam {
    /// Creates a beam along `axis` with a FWHM angular spread in degrees.
    #[must_use]
    pub fn new(axis: Vector3, angle_deg_fwhm: f64, energy: f64) -> Self {
        Self {
            axis: axis.normalized(),
            angle_sigma: angle_deg_fwhm / 180.0 * std::f64::consts::PI * physics::FWHM_TO_SIGMA,
            energy,
        }
    }
}

impl IsotopeModel for GaussianBeam {
    fn half_life(&self) -> f64 {
        f64::INFINITY
    }

    fn expected_no_photons(&self) -> f64 {
        2.0
    }

    fn decay(
        &self,
        decay_id: i64,
        time: f64,
        src_id: i32,
        position: &Vector3,
        rng: &mut Rng,
    ) -> NuclearDecay {
        let mut decay = NuclearDecay::new(decay_id, time, src_id, *position, 0.0);
        let dir = if self.angle_sigma == 0.0 {
            self.axis
        } else {
            -rng.acolinearity(&self.axis, self.angle_sigma)
        };
        decay.add_photon(Photon::new(
            *position,
            dir,
            self.energy,
            time,
            decay_id,
            Color::Blue,
            src_id,
        ));
        decay.add_photon(Photon::new(
            *position,
            -dir,
            self.energy,
            time,
            decay_id,
            Color::Red,
            src_id,
        ));
        decay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn positron_pair_is_roughly_antiparallel() {
        let isotope = Positron::new(0.57, f64::INFINITY, 1.0, 0.0);
        let mut rng = Rng::with_seed(21);
        let decay = isotope.decay(1, 0.0, 0, &Vector3::ZERO, &mut rng);
        assert_eq!(decay.no_photons(), 2);
        let blue = &decay.photons()[0];
        let red = &decay.photons()[1];
        assert_eq!(blue.color, Color::Blue);
        assert_eq!(red.color, Color::Red);
        // 0.57 degrees FWHM leaves the pair within a degree of opposite.
        assert!(blue.dir.dot(&red.dir) < -0.999);
        assert_approx_eq!(f64, blue.energy, physics::ENERGY_511);
    }

    #[test]
    fn prompt_gamma_adds_a_yellow_photon() {
        let isotope = Positron::new(0.0, f64::INFINITY, 1.0, 1.157);
        let mut rng = Rng::with_seed(3);
        let decay = isotope.decay(1, 0.0, 0, &Vector3::ZERO, &mut rng);
        assert_eq!(decay.no_photons(), 3);
        assert_eq!(decay.photons()[0].color, Color::Yellow);
        assert_approx_eq!(f64, decay.photons()[0].energy, 1.157);
        assert_approx_eq!(f64, isotope.expected_no_photons(), 3.0);
    }

    #[test]
    fn zero_probability_emits_no_pair() {
        let isotope = Positron::new(0.0, f64::INFINITY, 0.0, 0.0);
        let mut rng = Rng::with_seed(3);
        let decay = isotope.decay(1, 0.0, 0, &Vector3::ZERO, &mut rng);
        assert_eq!(decay.no_photons(), 0);
        assert_approx_eq!(f64, isotope.expected_no_photons(), 0.0);
    }

    #[test]
    fn positron_range_displaces_annihilation_but_not_too_far() {
        let mut isotope = Positron::new(0.0, f64::INFINITY, 1.0, 0.0);
        isotope.set_range_levin_exp(0.519, 27.9, 2.91, 3.0);
        let mut rng = Rng::with_seed(9);
        for _ in 0..100 {
            let decay = isotope.decay(1, 0.0, 0, &Vector3::ZERO, &mut rng);
            assert!(decay.position.norm() <= 0.3 + 1e-12);
        }
    }

    #[test]
    fn beam_with_zero_angle_is_exactly_axial() {
        let isotope = Beam::new(Vector3::UNIT_Z, 0.0, physics::ENERGY_511);
        let mut rng = Rng::with_seed(1);
        let decay = isotope.decay(1, 0.0, 0, &Vector3::ZERO, &mut rng);
        let blue = &decay.photons()[0];
        let red = &decay.photons()[1];
        assert_approx_eq!(f64, blue.dir.dot(&Vector3::UNIT_Z), 1.0);
        assert_approx_eq!(f64, red.dir.dot(&Vector3::UNIT_Z), -1.0);
        assert!(isotope.half_life().is_infinite());
    }

    #[test]
    fn gaussian_beam_stays_near_axis() {
        let isotope = GaussianBeam::new(Vector3::UNIT_Z, 3.0, physics::ENERGY_511);
        let mut rng = Rng::with_seed(1);
        for _ in 0..50 {
            let decay = isotope.decay(1, 0.0, 0, &Vector3::ZERO, &mut rng);
            // Within ten sigma of the axis.
            assert!(decay.photons()[0].dir.dot(&Vector3::UNIT_Z) > 0.98);
        }
    }
}
