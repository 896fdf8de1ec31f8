//! The per-worker random number facade.
//!
//! Every sampler the simulation uses goes through [`Rng`], and each derived
//! sampler documents how many facade-level draws (uniforms and gaussians)
//! it consumes.  Reproducibility within one worker is defined by that draw
//! sequence, so the backing generator can be swapped for any other
//! [`rand::RngCore`] implementation without touching call sites.

use crate::physics;
use crate::vecmath::{RigidMap, Vector3};
use rand::{Rng as _, SeedableRng};
use rand_distr::{Distribution, Exp, Poisson, StandardNormal};
use rand_pcg::Pcg64Mcg;

/// A seeded random number generator plus the derived samplers of the
/// simulation.  One instance per worker; never shared.
#[derive(Clone, Debug)]
pub struct Rng {
    generator: Pcg64Mcg,
}

impl Rng {
    /// Creates a generator from a worker seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            generator: Pcg64Mcg::seed_from_u64(seed),
        }
    }

    /// A uniform draw from `[0, 1)`.
    pub fn uniform(&mut self) -> f64 {
        self.generator.gen::<f64>()
    }

    /// A standard normal draw.
    pub fn gaussian(&mut self) -> f64 {
        StandardNormal.sample(&mut self.generator)
    }

    /// An exponential draw with rate `lambda`.
    ///
    /// # Panics
    ///
    /// Panics if `lambda` is negative.
    pub fn exponential(&mut self, lambda: f64) -> f64 {
        Exp::new(lambda).unwrap().sample(&mut self.generator)
    }

    /// A Poisson draw with mean `lambda`.
    ///
    /// # Panics
    ///
    /// Panics if `lambda` is not positive.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn poisson(&mut self, lambda: f64) -> u64 {
        let value: f64 = Poisson::new(lambda).unwrap().sample(&mut self.generator);
        value as u64
    }

    /// A boolean which is true with the given probability.  Consumes one
    /// uniform unless the probability is degenerate.
    pub fn selection(&mut self, probability: f64) -> bool {
        if probability <= 0.0 {
            false
        } else if probability >= 1.0 {
            true
        } else {
            self.uniform() < probability
        }
    }

    /// A direction uniformly distributed over the unit sphere.  Two
    /// uniforms: the azimuth and the cosine of the polar angle.
    pub fn uniform_sphere(&mut self) -> Vector3 {
        let theta = 2.0 * std::f64::consts::PI * self.uniform();
        let cos_phi = 2.0f64.mul_add(self.uniform(), -1.0);
        let sin_phi = cos_phi.mul_add(-cos_phi, 1.0).sqrt();
        Vector3::new(sin_phi * theta.cos(), sin_phi * theta.sin(), cos_phi)
    }

    /// A point uniformly distributed inside the unit ball.  Three uniforms:
    /// two for the direction and one for the radius.
    pub fn uniform_sphere_filled(&mut self) -> Vector3 {
        let dir = self.uniform_sphere();
        dir * self.uniform().cbrt()
    }

    /// A direction deflected from `reference` by an angle with the given
    /// cosine, with the azimuth around `reference` uniform.  One uniform.
    pub fn deflection(&mut self, reference: &Vector3, cos_theta: f64) -> Vector3 {
        let phi = 2.0 * std::f64::consts::PI * self.uniform();
        let w = reference.normalized();
        let pick = if w.x.abs() > 0.9 {
            Vector3::UNIT_Y
        } else {
            Vector3::UNIT_X
        };
        let u = w.cross(&pick).normalized();
        let v = w.cross(&u);
        let sin_theta = cos_theta.mul_add(-cos_theta, 1.0).max(0.0).sqrt();
        w * cos_theta + (u * phi.cos() + v * phi.sin()) * sin_theta
    }

    /// A direction deflected from `reference` by an angle uniform on
    /// `[0, theta_max]` radians.  Two uniforms.
    pub fn deflection_uniform(&mut self, reference: &Vector3, theta_max: f64) -> Vector3 {
        let cos_theta = (theta_max * self.uniform()).cos();
        self.deflection(reference, cos_theta)
    }

    /// The direction of the second annihilation photon: roughly opposite
    /// `reference` with a Gaussian angular deviation of `sigma_radians`.
    /// One uniform (the azimuth) and one gaussian (the deflection).
    pub fn acolinearity(&mut self, reference: &Vector3, sigma_radians: f64) -> Vector3 {
        let phi = 2.0 * std::f64::consts::PI * self.uniform();
        // Rotate around an axis perpendicular to the reference, then spin
        // that deflection around the reference by the uniform azimuth.
        let rot_axis = if *reference == Vector3::UNIT_Y {
            Vector3::UNIT_X
        } else {
            reference.cross(&Vector3::UNIT_Y).normalized()
        };
        let theta = self.gaussian() * sigma_radians;
        let deflected = RigidMap::rotation(&rot_axis, theta).transform_vector(reference);
        -RigidMap::rotation(reference, phi).transform_vector(&deflected)
    }

    /// A point uniform inside a z-aligned cylinder centered at the origin.
    /// Three uniforms: radius squared, azimuth, height.
    pub fn uniform_cylinder(&mut self, height: f64, radius: f64) -> Vector3 {
        let r = radius * self.uniform().sqrt();
        let theta = 2.0 * std::f64::consts::PI * self.uniform();
        let z = height * (self.uniform() - 0.5);
        Vector3::new(r * theta.cos(), r * theta.sin(), z)
    }

    /// A point uniform on the lateral boundary of a z-aligned cylinder.
    /// Two uniforms: azimuth and height.
    pub fn uniform_annulus_cylinder(&mut self, height: f64, radius: f64) -> Vector3 {
        let theta = 2.0 * std::f64::consts::PI * self.uniform();
        let z = height * (self.uniform() - 0.5);
        Vector3::new(radius * theta.cos(), radius * theta.sin(), z)
    }

    /// A point uniform in a box of the given size centered at the origin.
    /// Three uniforms.
    pub fn uniform_rectangle(&mut self, size: &Vector3) -> Vector3 {
        Vector3::new(
            size.x * (self.uniform() - 0.5),
            size.y * (self.uniform() - 0.5),
            size.z * (self.uniform() - 0.5),
        )
    }

    /// Blurs an energy with a Gaussian of fractional FWHM `eres`.  One
    /// gaussian.
    pub fn gaussian_energy_blur(&mut self, energy: f64, eres: f64) -> f64 {
        energy * (eres * physics::FWHM_TO_SIGMA).mul_add(self.gaussian(), 1.0)
    }

    /// Blurs an energy with a fractional FWHM referenced to `ref_energy`,
    /// scaling as the inverse square root of the energy.  One gaussian.
    pub fn gaussian_energy_blur_inverse_sqrt(
        &mut self,
        energy: f64,
        eres: f64,
        ref_energy: f64,
    ) -> f64 {
        let fwhm = eres * (ref_energy / energy).sqrt();
        energy * (fwhm * physics::FWHM_TO_SIGMA).mul_add(self.gaussian(), 1.0)
    }

    /// Blurs a time with a Gaussian of the given FWHM, redrawing until the
    /// perturbation magnitude is within `max_blur`.  One gaussian per
    /// attempt.
    pub fn gaussian_blur_time_trunc(&mut self, time: f64, tres: f64, max_blur: f64) -> f64 {
        loop {
            let blur = tres * physics::FWHM_TO_SIGMA * self.gaussian();
            if blur.abs() <= max_blur {
                return time + blur;
            }
        }
    }

    /// The Levin positron-range double exponential: an exponential with
    /// rate `k1` with probability `c`, else rate `k2`.  One uniform plus
    /// one exponential.
    pub fn levin_double_exp(&mut self, c: f64, k1: f64, k2: f64) -> f64 {
        let rate = if self.selection(c) { k1 } else { k2 };
        self.exponential(rate)
    }

    /// [`Self::levin_double_exp`] redrawn until the range is at most `max`.
    pub fn truncated_levin_double_exp(&mut self, c: f64, k1: f64, k2: f64, max: f64) -> f64 {
        loop {
            let range = self.levin_double_exp(c, k1, k2);
            if range <= max {
                return range;
            }
        }
    }

    /// A zero-mean Gaussian of the given sigma, redrawn until it is at most
    /// `max`.  One gaussian per attempt.
    pub fn truncated_gaussian(&mut self, sigma: f64, max: f64) -> f64 {
        loop {
            let range = self.gaussian() * sigma;
            if range <= max {
                return range;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn same_seed_reproduces_stream() {
        let mut a = Rng::with_seed(42);
        let mut b = Rng::with_seed(42);
        for _ in 0..100 {
            assert_eq!(a.uniform().to_bits(), b.uniform().to_bits());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = Rng::with_seed(1);
        let mut b = Rng::with_seed(2);
        assert_ne!(a.uniform().to_bits(), b.uniform().to_bits());
    }

    #[test]
    fn uniform_sphere_is_unit_length() {
        let mut rng = Rng::with_seed(7);
        for _ in 0..100 {
            assert_approx_eq!(f64, rng.uniform_sphere().norm(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn deflection_has_requested_angle() {
        let mut rng = Rng::with_seed(7);
        let reference = Vector3::new(0.3, -0.8, 0.5).normalized();
        for _ in 0..50 {
            let out = rng.deflection(&reference, 0.25);
            assert_approx_eq!(f64, out.norm(), 1.0, epsilon = 1e-12);
            assert_approx_eq!(f64, out.dot(&reference), 0.25, epsilon = 1e-12);
        }
    }

    #[test]
    fn acolinearity_with_zero_sigma_is_antiparallel() {
        let mut rng = Rng::with_seed(7);
        let reference = Vector3::new(0.0, 0.0, 1.0);
        let out = rng.acolinearity(&reference, 0.0);
        assert_approx_eq!(f64, out.dot(&reference), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn truncated_blur_respects_cap() {
        let mut rng = Rng::with_seed(7);
        for _ in 0..200 {
            let t = rng.gaussian_blur_time_trunc(0.0, 1e-9, 3e-9 * physics::FWHM_TO_SIGMA);
            assert!(t.abs() <= 3e-9 * physics::FWHM_TO_SIGMA);
        }
    }

    #[test]
    fn selection_handles_degenerate_probabilities() {
        let mut rng = Rng::with_seed(7);
        assert!(!rng.selection(0.0));
        assert!(rng.selection(1.0));
    }
}
