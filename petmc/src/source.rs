//! Geometric activity distributions and the time-ordered decay generator.

use crate::error::{Error, Result};
use crate::event::NuclearDecay;
use crate::isotope::{Isotope, IsotopeModel};
use crate::mathutil;
use crate::physics;
use crate::rng::Rng;
use crate::scene::{Frame, Scene};
use crate::vecmath::{Aabb, Vector3};
use ndarray::Array3;
use std::collections::BTreeMap;

/// Resolution of the precomputed ellipse arc-length table.
const ELLIPSE_ARC_POINTS: usize = 1024;

/// Attempts to redraw a decay position vetoed by a negative source before
/// giving up on the veto.
const MAX_REJECT_COUNTER: usize = 100_000;

/// The geometric sampling region of one source.
#[derive(Clone, Debug)]
pub enum SourceKind {
    /// All decays at one point.
    Point {
        /// The emission point.
        position: Vector3,
    },
    /// Uniform inside a sphere.
    Sphere {
        /// Center.
        center: Vector3,
        /// Radius.
        radius: f64,
    },
    /// Uniform inside an axis-aligned box.
    Rect {
        /// Center.
        center: Vector3,
        /// Local frame of the box.
        frame: Frame,
        /// Full edge lengths.
        size: Vector3,
    },
    /// Uniform inside a finite cylinder.
    Cylinder {
        /// Center.
        center: Vector3,
        /// Local frame; `w` is the axis.
        frame: Frame,
        /// Radius.
        radius: f64,
        /// Full axial length.
        length: f64,
    },
    /// Uniform inside an elliptic cylinder.
    EllipticCylinder {
        /// Center.
        center: Vector3,
        /// Local frame; `w` is the axis.
        frame: Frame,
        /// Semi-axis along local `u`.
        radius1: f64,
        /// Semi-axis along local `v`.
        radius2: f64,
        /// Full axial length.
        length: f64,
    },
    /// Uniform on the lateral boundary of a cylinder.
    AnnulusCylinder {
        /// Center.
        center: Vector3,
        /// Local frame; `w` is the axis.
        frame: Frame,
        /// Radius.
        radius: f64,
        /// Full axial length.
        length: f64,
    },
    /// Uniform (by arc length) on the lateral boundary of an elliptic
    /// cylinder.
    AnnulusEllipticCylinder {
        /// Center.
        center: Vector3,
        /// Local frame; `w` is the axis.
        frame: Frame,
        /// Semi-axis along local `u`.
        radius1: f64,
        /// Semi-axis along local `v`.
        radius2: f64,
        /// Full axial length.
        length: f64,
        /// Normalized cumulative arc length over the angle grid.
        arc_cdf: Vec<f64>,
        /// Angle grid of the arc-length table.
        angles: Vec<f64>,
    },
    /// Uniform inside a triaxial ellipsoid.
    Ellipsoid {
        /// Center.
        center: Vector3,
        /// Local frame of the principal axes.
        frame: Frame,
        /// Semi-axes.
        radii: Vector3,
    },
    /// Activity proportional to a voxelized weight image.
    Voxel {
        /// World position of the grid's low corner.
        origin: Vector3,
        /// Local frame of the grid axes.
        frame: Frame,
        /// Edge lengths of one voxel.
        voxel_size: Vector3,
        /// Non-negative weights per voxel.
        weights: Array3<f64>,
        /// Cumulative weights in logical iteration order.
        cumulative: Vec<f64>,
    },
    /// Uniform inside a closed tessellated region, by rejection against
    /// a child scene of triangles.
    Vector {
        /// The triangle mesh as a child scene.
        mesh: Scene,
        /// Bounding box of the mesh.
        bounds: Aabb,
    },
}

impl SourceKind {
    /// An annulus elliptic cylinder with its arc-length inversion table
    /// built up front.
    #[must_use]
    pub fn annulus_elliptic_cylinder(
        center: Vector3,
        frame: Frame,
        radius1: f64,
        radius2: f64,
        length: f64,
    ) -> Self {
        let angles = mathutil::linspace(0.0, 2.0 * std::f64::consts::PI, ELLIPSE_ARC_POINTS);
        // Perimeter speed |d/dphi (r1 cos, r2 sin)|; its normalized
        // cumulative integral is the incomplete elliptic arc length.
        let speed: Vec<f64> = angles
            .iter()
            .map(|&phi| (radius1 * phi.sin()).hypot(radius2 * phi.cos()))
            .collect();
        let arc_cdf = mathutil::pdf_to_cdf(&angles, &speed);
        Self::AnnulusEllipticCylinder {
            center,
            frame,
            radius1,
            radius2,
            length,
            arc_cdf,
            angles,
        }
    }

    /// A voxel source; weights must be non-negative with a positive sum.
    ///
    /// # Errors
    ///
    /// Fails when the weight image has no activity.
    pub fn voxel(
        origin: Vector3,
        frame: Frame,
        voxel_size: Vector3,
        weights: Array3<f64>,
    ) -> Result<Self> {
        let mut cumulative = Vec::with_capacity(weights.len());
        let mut total = 0.0;
        for &w in &weights {
            total += w;
            cumulative.push(total);
        }
        if total <= 0.0 {
            return Err(Error::General(
                "voxel source has no positive weights".to_string(),
            ));
        }
        Ok(Self::Voxel {
            origin,
            frame,
            voxel_size,
            weights,
            cumulative,
        })
    }

    /// A tessellated source from a child scene of triangles.
    ///
    /// # Errors
    ///
    /// Propagates failures building the mesh's acceleration tree.
    pub fn vector(mut mesh: Scene) -> Result<Self> {
        mesh.build_tree(crate::kdtree::SplitAlgorithm::MacDonaldBooth)?;
        let bounds = *mesh.bounding_box();
        Ok(Self::Vector { mesh, bounds })
    }

    /// The centroid used when establishing the source's material stack.
    #[must_use]
    pub fn position(&self) -> Vector3 {
        match self {
            Self::Point { position } => *position,
            Self::Sphere { center, .. }
            | Self::Rect { center, .. }
            | Self::Cylinder { center, .. }
            | Self::EllipticCylinder { center, .. }
            | Self::AnnulusCylinder { center, .. }
            | Self::AnnulusEllipticCylinder { center, .. }
            | Self::Ellipsoid { center, .. } => *center,
            Self::Voxel {
                origin,
                frame,
                voxel_size,
                weights,
                ..
            } => {
                let dims = weights.dim();
                let half = Vector3::new(
                    voxel_size.x * crate::convert::f64_from_usize(dims.0) * 0.5,
                    voxel_size.y * crate::convert::f64_from_usize(dims.1) * 0.5,
                    voxel_size.z * crate::convert::f64_from_usize(dims.2) * 0.5,
                );
                *origin + frame.u * half.x + frame.v * half.y + frame.w * half.z
            }
            Self::Vector { bounds, .. } => (*bounds.min() + *bounds.max()) * 0.5,
        }
    }

    /// Draws one decay position.
    pub fn sample(&self, rng: &mut Rng) -> Vector3 {
        match self {
            Self::Point { position } => *position,
            Self::Sphere { center, radius } => loop {
                // Rejection in the enclosing cube keeps the radial
                // distribution exactly uniform.
                let v = Vector3::new(
                    2.0f64.mul_add(rng.uniform(), -1.0),
                    2.0f64.mul_add(rng.uniform(), -1.0),
                    2.0f64.mul_add(rng.uniform(), -1.0),
                );
                if v.norm_squared() <= 1.0 {
                    return *center + v * *radius;
                }
            },
            Self::Rect {
                center,
                frame,
                size,
            } => {
                let local = rng.uniform_rectangle(size);
                *center + frame.u * local.x + frame.v * local.y + frame.w * local.z
            }
            Self::Cylinder {
                center,
                frame,
                radius,
                length,
            } => {
                let local = rng.uniform_cylinder(*length, *radius);
                *center + frame.u * local.x + frame.v * local.y + frame.w * local.z
            }
            Self::EllipticCylinder {
                center,
                frame,
                radius1,
                radius2,
                length,
            } => {
                let r = rng.uniform().sqrt();
                let theta = 2.0 * std::f64::consts::PI * rng.uniform();
                let z = *length * (rng.uniform() - 0.5);
                *center
                    + frame.u * (radius1 * r * theta.cos())
                    + frame.v * (radius2 * r * theta.sin())
                    + frame.w * z
            }
            Self::AnnulusCylinder {
                center,
                frame,
                radius,
                length,
            } => {
                let local = rng.uniform_annulus_cylinder(*length, *radius);
                *center + frame.u * local.x + frame.v * local.y + frame.w * local.z
            }
            Self::AnnulusEllipticCylinder {
                center,
                frame,
                radius1,
                radius2,
                length,
                arc_cdf,
                angles,
            } => {
                // Invert the arc-length table so boundary points are
                // uniform per unit length, not per unit angle.
                let phi = mathutil::interpolate(arc_cdf, angles, rng.uniform());
                let z = *length * (rng.uniform() - 0.5);
                *center
                    + frame.u * (radius1 * phi.cos())
                    + frame.v * (radius2 * phi.sin())
                    + frame.w * z
            }
            Self::Ellipsoid {
                center,
                frame,
                radii,
            } => {
                let unit = rng.uniform_sphere_filled();
                *center
                    + frame.u * (radii.x * unit.x)
                    + frame.v * (radii.y * unit.y)
                    + frame.w * (radii.z * unit.z)
            }
            Self::Voxel {
                origin,
                frame,
                voxel_size,
                weights,
                cumulative,
            } => {
                let total = cumulative[cumulative.len() - 1];
                let draw = total * rng.uniform();
                let linear = cumulative.partition_point(|&c| c <= draw).min(cumulative.len() - 1);
                let dims = weights.dim();
                let iz = linear % dims.2;
                let iy = (linear / dims.2) % dims.1;
                let ix = linear / (dims.1 * dims.2);
                let local = Vector3::new(
                    voxel_size.x * (crate::convert::f64_from_usize(ix) + rng.uniform()),
                    voxel_size.y * (crate::convert::f64_from_usize(iy) + rng.uniform()),
                    voxel_size.z * (crate::convert::f64_from_usize(iz) + rng.uniform()),
                );
                *origin + frame.u * local.x + frame.v * local.y + frame.w * local.z
            }
            Self::Vector { mesh, bounds } => {
                let size = *bounds.max() - *bounds.min();
                loop {
                    let candidate = *bounds.min()
                        + Vector3::new(
                            size.x * rng.uniform(),
                            size.y * rng.uniform(),
                            size.z * rng.uniform(),
                        );
                    if vector_inside(mesh, &candidate) {
                        return candidate;
                    }
                }
            }
        }
    }

    /// True when `pos` lies inside the source region; must agree with
    /// [`Self::sample`].
    #[must_use]
    pub fn inside(&self, pos: &Vector3) -> bool {
        match self {
            Self::Point { .. }
            | Self::AnnulusCylinder { .. }
            | Self::AnnulusEllipticCylinder { .. } => false,
            Self::Sphere { center, radius } => {
                (*pos - *center).norm_squared() < radius * radius
            }
            Self::Rect {
                center,
                frame,
                size,
            } => {
                let p = frame.to_local(&(*pos - *center));
                p.x.abs() < 0.5 * size.x && p.y.abs() < 0.5 * size.y && p.z.abs() < 0.5 * size.z
            }
            Self::Cylinder {
                center,
                frame,
                radius,
                length,
            } => {
                let p = frame.to_local(&(*pos - *center));
                p.z.abs() < 0.5 * length && p.x.hypot(p.y) < *radius
            }
            Self::EllipticCylinder {
                center,
                frame,
                radius1,
                radius2,
                length,
            } => {
                let p = frame.to_local(&(*pos - *center));
                p.z.abs() < 0.5 * length && (p.x / radius1).hypot(p.y / radius2) < 1.0
            }
            Self::Ellipsoid {
                center,
                frame,
                radii,
            } => {
                let p = frame.to_local(&(*pos - *center));
                (p.x / radii.x).hypot(p.y / radii.y).hypot(p.z / radii.z) < 1.0
            }
            Self::Voxel {
                origin,
                frame,
                voxel_size,
                weights,
                ..
            } => {
                let p = frame.to_local(&(*pos - *origin));
                let dims = weights.dim();
                let ix = (p.x / voxel_size.x).floor();
                let iy = (p.y / voxel_size.y).floor();
                let iz = (p.z / voxel_size.z).floor();
                if ix < 0.0 || iy < 0.0 || iz < 0.0 {
                    return false;
                }
                let (ix, iy, iz) = (
                    crate::convert::usize_from_f64(ix),
                    crate::convert::usize_from_f64(iy),
                    crate::convert::usize_from_f64(iz),
                );
                ix < dims.0 && iy < dims.1 && iz < dims.2 && weights[[ix, iy, iz]] > 0.0
            }
            Self::Vector { mesh, bounds } => {
                bounds.contains(pos) && vector_inside(mesh, pos)
            }
        }
    }
}

/// Inside test for a closed triangle mesh: the nearest surface along a
/// probe ray shows its back face exactly when the point is interior.
fn vector_inside(mesh: &Scene, pos: &Vector3) -> bool {
    mesh.seek_intersection(pos, &Vector3::UNIT_X, f64::MAX)
        .is_some_and(|point| !point.front_face)
}

/// One activity distribution with its stamped isotope.
#[derive(Clone, Debug)]
pub struct Source {
    kind: SourceKind,
    isotope: Isotope,
    /// Activity at time zero in microcuries; negative marks a
    /// subtraction region.
    activity_uci: f64,
    src_id: i32,
}

impl Source {
    /// Creates a source.  Negative activity marks a subtraction region.
    #[must_use]
    pub const fn new(kind: SourceKind, isotope: Isotope, activity_uci: f64) -> Self {
        Self {
            kind,
            isotope,
            activity_uci,
            src_id: 0,
        }
    }

    /// The stamped isotope.
    #[must_use]
    pub const fn isotope(&self) -> &Isotope {
        &self.isotope
    }

    /// The geometric region.
    #[must_use]
    pub const fn kind(&self) -> &SourceKind {
        &self.kind
    }

    /// True for subtraction regions.
    #[must_use]
    pub const fn is_negative(&self) -> bool {
        self.activity_uci < 0.0
    }

    /// Decays per second at simulation time `time`.
    #[must_use]
    pub fn activity(&self, time: f64) -> f64 {
        let half_life = self.isotope.half_life();
        let decay = if half_life.is_infinite() {
            1.0
        } else {
            (-time / half_life).exp2()
        };
        self.activity_uci * physics::DECAYS_PER_MICROCURIE * decay
    }

    /// Expected number of decays in `[start, start + duration)`.
    #[must_use]
    pub fn expected_decays(&self, start: f64, duration: f64) -> f64 {
        let half_life = self.isotope.half_life();
        let a0 = self.activity(0.0);
        if half_life.is_infinite() {
            return a0 * duration;
        }
        let lambda = std::f64::consts::LN_2 / half_life;
        a0 / lambda * ((-lambda * start).exp() - (-lambda * (start + duration)).exp())
    }

    /// Expected number of photons in `[start, start + duration)`.
    #[must_use]
    pub fn expected_photons(&self, start: f64, duration: f64) -> f64 {
        self.expected_decays(start, duration) * self.isotope.expected_no_photons()
    }

    /// The centroid used for material-stack construction.
    #[must_use]
    pub fn position(&self) -> Vector3 {
        self.kind.position()
    }
}

/// The collection of sources: owns the isotope prototypes, schedules the
/// decay times, and applies negative-source subtraction.
#[derive(Clone, Debug, Default)]
pub struct SourceList {
    isotopes: BTreeMap<String, Isotope>,
    current_isotope: Option<Isotope>,
    sources: Vec<Source>,
    negative_sources: Vec<Source>,
    decay_number: i64,
    start_time: f64,
    simulation_time: f64,
    current_time: f64,
}

impl SourceList {
    /// An empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an isotope prototype under a name.  An isotope flagged as
    /// default in the physics file should also be made current.
    pub fn add_isotope(&mut self, name: &str, isotope: Isotope) {
        self.isotopes.insert(name.to_string(), isotope);
    }

    /// Makes a registered isotope the one stamped onto new sources.
    ///
    /// # Errors
    ///
    /// Fails for unknown isotope names.
    pub fn set_current_isotope(&mut self, name: &str) -> Result<()> {
        let isotope = self
            .isotopes
            .get(name)
            .ok_or_else(|| Error::General(format!("unknown isotope: {name}")))?;
        self.current_isotope = Some(isotope.clone());
        Ok(())
    }

    /// Makes an ad-hoc isotope (e.g. a parsed beam) current without
    /// registering it.
    pub fn set_current_isotope_value(&mut self, isotope: Isotope) {
        self.current_isotope = Some(isotope);
    }

    /// Adds a source, stamping the current isotope onto it.
    ///
    /// # Errors
    ///
    /// Fails when no isotope has been made current.
    pub fn add_source(&mut self, kind: SourceKind, activity_uci: f64) -> Result<()> {
        let isotope = self
            .current_isotope
            .clone()
            .ok_or_else(|| Error::General("no current isotope set".to_string()))?;
        let mut source = Source::new(kind, isotope, activity_uci);
        if source.is_negative() {
            self.negative_sources.push(source);
        } else {
            source.src_id = i32::try_from(self.sources.len())
                .map_err(|err| Error::General(err.to_string()))?;
            self.sources.push(source);
        }
        Ok(())
    }

    /// The positive sources, in id order.
    #[must_use]
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Centroids of the positive sources, for material-stack building.
    #[must_use]
    pub fn source_positions(&self) -> Vec<Vector3> {
        self.sources.iter().map(Source::position).collect()
    }

    /// Sets the simulated acquisition duration.
    pub fn set_simulation_time(&mut self, time: f64) {
        self.simulation_time = time;
    }

    /// Sets the acquisition start time.
    pub fn set_start_time(&mut self, time: f64) {
        self.start_time = time;
    }

    /// The simulated acquisition duration.
    #[must_use]
    pub const fn simulation_time(&self) -> f64 {
        self.simulation_time
    }

    /// The acquisition start time.
    #[must_use]
    pub const fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Simulated time elapsed since the acquisition start.
    #[must_use]
    pub fn elapsed_time(&self) -> f64 {
        self.current_time - self.start_time
    }

    /// Resets the clock to the start time.  Call once before decays are
    /// drawn.
    pub fn init(&mut self) {
        self.current_time = self.start_time;
        self.decay_number = 0;
    }

    /// Expected photons from all positive sources in
    /// `[start, start + duration)`.
    #[must_use]
    pub fn expected_photons(&self, start: f64, duration: f64) -> f64 {
        self.sources
            .iter()
            .map(|s| s.expected_photons(start, duration))
            .sum()
    }

    /// Finds the absolute time `t` in `[start, start + duration]` at which
    /// the expected photon count since `start` reaches `target`, to a
    /// relative tolerance of 1e-5.
    #[must_use]
    pub fn search_split_time(&self, start: f64, duration: f64, target: f64) -> f64 {
        let total = self.expected_photons(start, duration);
        if target >= total {
            return start + duration;
        }
        let mut lo = 0.0;
        let mut hi = duration;
        for _ in 0..100 {
            let mid = 0.5 * (lo + hi);
            let photons = self.expected_photons(start, mid);
            if (photons - target).abs() <= 1e-5 * total {
                return start + mid;
            }
            if photons < target {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        start + 0.5 * (lo + hi)
    }

    /// Reassigns this list's time window to worker `rank` of `world`,
    /// partitioning the acquisition into intervals of equal expected
    /// photon count.
    pub fn adjust_time_for_split(&mut self, rank: usize, world: usize) {
        let total = self.expected_photons(self.start_time, self.simulation_time);
        let lo = self.search_split_time(
            self.start_time,
            self.simulation_time,
            total * crate::convert::f64_from_usize(rank) / crate::convert::f64_from_usize(world),
        );
        let hi = self.search_split_time(
            self.start_time,
            self.simulation_time,
            total * crate::convert::f64_from_usize(rank + 1)
                / crate::convert::f64_from_usize(world),
        );
        self.start_time = lo;
        self.simulation_time = hi - lo;
    }

    /// True while the simulated clock is inside the acquisition window.
    #[must_use]
    pub fn simulation_incomplete(&self) -> bool {
        self.current_time < self.start_time + self.simulation_time
    }

    /// Draws the next decay: advances the clock by an exponential
    /// inter-arrival drawn from the summed positive activity, picks the
    /// emitting source, and rejection-tests the sampled point against the
    /// negative sources.  Returns `None` when no activity remains.
    pub fn decay(&mut self, rng: &mut Rng) -> Option<NuclearDecay> {
        let activities: Vec<f64> = self
            .sources
            .iter()
            .map(|s| s.activity(self.current_time))
            .collect();
        let total: f64 = activities.iter().sum();
        if total <= 0.0 {
            self.current_time = self.start_time + self.simulation_time;
            return None;
        }
        self.current_time += rng.exponential(total);

        let draw = total * rng.uniform();
        let mut acc = 0.0;
        let mut chosen = self.sources.len() - 1;
        for (idx, activity) in activities.iter().enumerate() {
            acc += activity;
            if draw < acc {
                chosen = idx;
                break;
            }
        }
        let decay_id = self.decay_number;
        self.decay_number += 1;

        let source = &self.sources[chosen];
        let mut position = source.kind.sample(rng);
        for _ in 0..MAX_REJECT_COUNTER {
            if !self
                .negative_sources
                .iter()
                .any(|neg| neg.kind.inside(&position))
            {
                break;
            }
            position = source.kind.sample(rng);
        }

        Some(
            source
                .isotope
                .decay(decay_id, self.current_time, source.src_id, &position, rng),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isotope::Positron;
    use float_cmp::assert_approx_eq;

    fn one_curie_sphere(half_life: f64) -> Source {
        let act_uci = 1.0 / physics::DECAYS_PER_MICROCURIE;
        Source::new(
            SourceKind::Sphere {
                center: Vector3::ZERO,
                radius: 1.0,
            },
            Isotope::from(Positron::new(0.0, half_life, 1.0, 0.0)),
            act_uci,
        )
    }

    #[test]
    fn activity_decays_with_half_life() {
        let source = one_curie_sphere(f64::INFINITY);
        assert_approx_eq!(f64, source.activity(0.0), 1.0);
        assert_approx_eq!(f64, source.activity(1.0), 1.0);
        assert_approx_eq!(f64, source.activity(f64::MAX), 1.0);

        let source = one_curie_sphere(1.0);
        assert_approx_eq!(f64, source.activity(0.0), 1.0);
        assert_approx_eq!(f64, source.activity(1.0), 0.5);
        assert_approx_eq!(f64, source.activity(2.0), 0.25);
        assert_approx_eq!(f64, source.activity(f64::MAX), 0.0);
    }

    #[test]
    fn expected_decays_integrate_the_activity() {
        let source = one_curie_sphere(f64::INFINITY);
        assert_approx_eq!(f64, source.expected_decays(0.0, 0.0), 0.0);
        assert_approx_eq!(f64, source.expected_decays(0.0, 1.0), 1.0);
        assert_approx_eq!(f64, source.expected_decays(0.0, 2.0), 2.0);

        let source = one_curie_sphere(1.0);
        assert_approx_eq!(
            f64,
            source.expected_decays(0.0, 1.0),
            0.721348,
            epsilon = 1e-6
        );
        assert_approx_eq!(
            f64,
            source.expected_decays(1.0, 1.0),
            0.360674,
            epsilon = 1e-6
        );
        // Two photons per decay at unit emission probability.
        assert_approx_eq!(
            f64,
            source.expected_photons(0.0, 1.0),
            2.0 * 0.721348,
            epsilon = 1e-6
        );
    }

    #[test]
    fn search_split_time_halves_the_expected_photons() {
        let mut list = SourceList::new();
        list.add_isotope("test", Isotope::from(Positron::new(0.0, 1.0, 1.0, 0.0)));
        list.set_current_isotope("test").unwrap();
        list.add_source(
            SourceKind::Sphere {
                center: Vector3::ZERO,
                radius: 1.0,
            },
            1.0 / physics::DECAYS_PER_MICROCURIE,
        )
        .unwrap();
        list.set_simulation_time(2.0);

        let total = list.expected_photons(0.0, 2.0);
        assert_approx_eq!(f64, total, 1.0820212 * 2.0, epsilon = 1e-6);

        assert_approx_eq!(f64, list.search_split_time(0.0, 2.0, total), 2.0);

        let time = list.search_split_time(0.0, 2.0, total / 2.0);
        assert!(time < 1.0);
        assert_approx_eq!(
            f64,
            list.expected_photons(0.0, time),
            total / 2.0,
            epsilon = 1e-4
        );
        assert_approx_eq!(
            f64,
            list.expected_photons(time, 2.0 - time),
            total / 2.0,
            epsilon = 1e-4
        );
    }

    #[test]
    fn time_split_partitions_cover_the_window() {
        let mut base = SourceList::new();
        base.add_isotope("test", Isotope::from(Positron::new(0.0, 1.0, 1.0, 0.0)));
        base.set_current_isotope("test").unwrap();
        base.add_source(
            SourceKind::Sphere {
                center: Vector3::ZERO,
                radius: 1.0,
            },
            1.0 / physics::DECAYS_PER_MICROCURIE,
        )
        .unwrap();
        base.set_simulation_time(2.0);

        let world = 4;
        let mut expected = Vec::new();
        let mut end_of_previous = 0.0;
        for rank in 0..world {
            let mut list = base.clone();
            list.adjust_time_for_split(rank, world);
            assert_approx_eq!(f64, list.start_time, end_of_previous, epsilon = 1e-4);
            end_of_previous = list.start_time + list.simulation_time();
            expected.push(list.expected_photons(list.start_time, list.simulation_time()));
        }
        assert_approx_eq!(f64, end_of_previous, 2.0, epsilon = 1e-4);
        // Every worker sees the same expected photon count.
        for pair in expected.windows(2) {
            assert_approx_eq!(f64, pair[0], pair[1], epsilon = 1e-3);
        }
    }

    #[test]
    fn sphere_samples_land_inside_and_agree_with_inside() {
        let kind = SourceKind::Sphere {
            center: Vector3::new(1.0, 2.0, 3.0),
            radius: 0.5,
        };
        let mut rng = Rng::with_seed(4);
        for _ in 0..200 {
            let p = kind.sample(&mut rng);
            assert!(kind.inside(&p));
            assert!((p - Vector3::new(1.0, 2.0, 3.0)).norm() <= 0.5);
        }
    }

    #[test]
    fn annulus_elliptic_samples_stay_on_the_boundary() {
        let kind = SourceKind::annulus_elliptic_cylinder(
            Vector3::ZERO,
            Frame {
                u: Vector3::UNIT_X,
                v: Vector3::UNIT_Y,
                w: Vector3::UNIT_Z,
            },
            2.0,
            1.0,
            4.0,
        );
        let mut rng = Rng::with_seed(4);
        for _ in 0..200 {
            let p = kind.sample(&mut rng);
            assert_approx_eq!(
                f64,
                (p.x / 2.0).hypot(p.y / 1.0),
                1.0,
                epsilon = 1e-9
            );
            assert!(p.z.abs() <= 2.0);
        }
    }

    #[test]
    fn voxel_sampler_respects_weights() {
        let mut weights = Array3::<f64>::zeros((2, 1, 1));
        weights[[1, 0, 0]] = 1.0;
        let kind = SourceKind::voxel(
            Vector3::ZERO,
            Frame {
                u: Vector3::UNIT_X,
                v: Vector3::UNIT_Y,
                w: Vector3::UNIT_Z,
            },
            Vector3::new(1.0, 1.0, 1.0),
            weights,
        )
        .unwrap();
        let mut rng = Rng::with_seed(4);
        for _ in 0..100 {
            let p = kind.sample(&mut rng);
            // Only the second voxel in x carries weight.
            assert!(p.x >= 1.0 && p.x <= 2.0);
            assert!(kind.inside(&p));
        }
        assert!(!kind.inside(&Vector3::new(0.5, 0.5, 0.5)));
    }

    #[test]
    fn negative_source_vetoes_decays_inside_it() {
        let mut list = SourceList::new();
        list.add_isotope(
            "test",
            Isotope::from(Positron::new(0.0, f64::INFINITY, 1.0, 0.0)),
        );
        list.set_current_isotope("test").unwrap();
        list.add_source(
            SourceKind::Sphere {
                center: Vector3::ZERO,
                radius: 1.0,
            },
            1.0,
        )
        .unwrap();
        // Subtract the inner half-radius ball.
        list.add_source(
            SourceKind::Sphere {
                center: Vector3::ZERO,
                radius: 0.5,
            },
            -1.0,
        )
        .unwrap();
        list.set_simulation_time(1.0);
        list.init();

        let mut rng = Rng::with_seed(12);
        for _ in 0..200 {
            let decay = list.decay(&mut rng).unwrap();
            assert!(decay.position.norm() >= 0.5);
        }
    }

    #[test]
    fn decay_times_are_nondecreasing_and_complete() {
        let mut list = SourceList::new();
        list.add_isotope(
            "test",
            Isotope::from(Positron::new(0.0, f64::INFINITY, 1.0, 0.0)),
        );
        list.set_current_isotope("test").unwrap();
        list.add_source(
            SourceKind::Sphere {
                center: Vector3::ZERO,
                radius: 1.0,
            },
            10.0,
        )
        .unwrap();
        list.set_simulation_time(1e-3);
        list.init();

        let mut rng = Rng::with_seed(12);
        let mut last = 0.0;
        let mut decays = 0;
        while list.simulation_incomplete() {
            let decay = list.decay(&mut rng).unwrap();
            assert!(decay.time >= last);
            last = decay.time;
            decays += 1;
        }
        assert!(decays > 0);
    }
}
