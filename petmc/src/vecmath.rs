//! Three-vectors, rigid maps, and axis-aligned bounding boxes.
//!
//! Everything here works in the simulation's world units: centimeters for
//! lengths, radians for angles.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Index, Mul, Neg, Sub};

/// One of the three coordinate axes.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Axis {
    /// The x axis.
    X,
    /// The y axis.
    Y,
    /// The z axis.
    Z,
}

impl Axis {
    /// All three axes, in index order.
    pub const ALL: [Self; 3] = [Self::X, Self::Y, Self::Z];
}

/// A vector in R^3.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Vector3 {
    /// x component.
    pub x: f64,
    /// y component.
    pub y: f64,
    /// z component.
    pub z: f64,
}

impl Vector3 {
    /// The zero vector.
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);
    /// The x unit vector.
    pub const UNIT_X: Self = Self::new(1.0, 0.0, 0.0);
    /// The y unit vector.
    pub const UNIT_Y: Self = Self::new(0.0, 1.0, 0.0);
    /// The z unit vector.
    pub const UNIT_Z: Self = Self::new(0.0, 0.0, 1.0);

    /// Creates a vector from its components.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Dot product.
    #[must_use]
    pub fn dot(&self, rhs: &Self) -> f64 {
        self.z.mul_add(rhs.z, self.x.mul_add(rhs.x, self.y * rhs.y))
    }

    /// Cross product.
    #[must_use]
    pub fn cross(&self, rhs: &Self) -> Self {
        Self::new(
            self.y.mul_add(rhs.z, -(self.z * rhs.y)),
            self.z.mul_add(rhs.x, -(self.x * rhs.z)),
            self.x.mul_add(rhs.y, -(self.y * rhs.x)),
        )
    }

    /// Squared Euclidean norm.
    #[must_use]
    pub fn norm_squared(&self) -> f64 {
        self.dot(self)
    }

    /// Euclidean norm.
    #[must_use]
    pub fn norm(&self) -> f64 {
        self.norm_squared().sqrt()
    }

    /// Returns this vector scaled to unit length.
    #[must_use]
    pub fn normalized(&self) -> Self {
        *self * (1.0 / self.norm())
    }

    /// Componentwise reciprocal, used for ray slab tests.  Zero components
    /// map to infinities, which the slab test tolerates.
    #[must_use]
    pub fn recip(&self) -> Self {
        Self::new(1.0 / self.x, 1.0 / self.y, 1.0 / self.z)
    }

    /// Componentwise minimum.
    #[must_use]
    pub fn min(&self, rhs: &Self) -> Self {
        Self::new(self.x.min(rhs.x), self.y.min(rhs.y), self.z.min(rhs.z))
    }

    /// Componentwise maximum.
    #[must_use]
    pub fn max(&self, rhs: &Self) -> Self {
        Self::new(self.x.max(rhs.x), self.y.max(rhs.y), self.z.max(rhs.z))
    }
}

impl Index<Axis> for Vector3 {
    type Output = f64;

    fn index(&self, axis: Axis) -> &f64 {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }
}

impl Add for Vector3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vector3 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vector3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vector3 {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vector3 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// A proper rotation, stored as a 3x3 matrix.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct RotationMap {
    rows: [[f64; 3]; 3],
}

impl RotationMap {
    /// The identity rotation.
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            rows: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// Rotation by `angle` radians around `axis` (Rodrigues' formula).
    /// The axis need not be normalized.
    #[must_use]
    pub fn from_axis_angle(axis: &Vector3, angle: f64) -> Self {
        let u = axis.normalized();
        let (sin, cos) = angle.sin_cos();
        let omc = 1.0 - cos;
        let rows = [
            [
                cos + u.x * u.x * omc,
                u.x * u.y * omc - u.z * sin,
                u.x * u.z * omc + u.y * sin,
            ],
            [
                u.y * u.x * omc + u.z * sin,
                cos + u.y * u.y * omc,
                u.y * u.z * omc - u.x * sin,
            ],
            [
                u.z * u.x * omc - u.y * sin,
                u.z * u.y * omc + u.x * sin,
                cos + u.z * u.z * omc,
            ],
        ];
        Self { rows }
    }

    /// Applies the rotation to a vector.
    #[must_use]
    pub fn apply(&self, v: &Vector3) -> Vector3 {
        let r = &self.rows;
        Vector3::new(
            r[0][2].mul_add(v.z, r[0][0].mul_add(v.x, r[0][1] * v.y)),
            r[1][2].mul_add(v.z, r[1][0].mul_add(v.x, r[1][1] * v.y)),
            r[2][2].mul_add(v.z, r[2][0].mul_add(v.x, r[2][1] * v.y)),
        )
    }

    /// Matrix product `self * rhs`, i.e. `rhs` is applied first.
    #[must_use]
    pub fn compose(&self, rhs: &Self) -> Self {
        let mut rows = [[0.0; 3]; 3];
        for (i, row) in rows.iter_mut().enumerate() {
            for (j, entry) in row.iter_mut().enumerate() {
                *entry = (0..3).map(|k| self.rows[i][k] * rhs.rows[k][j]).sum();
            }
        }
        Self { rows }
    }
}

/// A rigid transform: rotation followed by translation.  Scene geometry and
/// sources are mapped through the active transform stack at load time.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct RigidMap {
    rotation: RotationMap,
    translation: Vector3,
}

impl RigidMap {
    /// The identity map.
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            rotation: RotationMap::identity(),
            translation: Vector3::ZERO,
        }
    }

    /// A pure translation.
    #[must_use]
    pub const fn translation(offset: Vector3) -> Self {
        Self {
            rotation: RotationMap::identity(),
            translation: offset,
        }
    }

    /// A pure rotation around `axis` by `angle` radians.
    #[must_use]
    pub fn rotation(axis: &Vector3, angle: f64) -> Self {
        Self {
            rotation: RotationMap::from_axis_angle(axis, angle),
            translation: Vector3::ZERO,
        }
    }

    /// `self ∘ rhs`: applies `rhs` first, then `self`.
    #[must_use]
    pub fn compose(&self, rhs: &Self) -> Self {
        Self {
            rotation: self.rotation.compose(&rhs.rotation),
            translation: self.rotation.apply(&rhs.translation) + self.translation,
        }
    }

    /// Maps a point.
    #[must_use]
    pub fn transform_point(&self, p: &Vector3) -> Vector3 {
        self.rotation.apply(p) + self.translation
    }

    /// Maps a direction (no translation).
    #[must_use]
    pub fn transform_vector(&self, v: &Vector3) -> Vector3 {
        self.rotation.apply(v)
    }
}

impl Default for RigidMap {
    fn default() -> Self {
        Self::identity()
    }
}

/// An axis-aligned bounding box.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Aabb {
    min: Vector3,
    max: Vector3,
}

impl Aabb {
    /// An empty box, ready to be grown with [`Self::enclose_point`].
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            min: Vector3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Vector3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// A box from its extreme corners.
    #[must_use]
    pub const fn new(min: Vector3, max: Vector3) -> Self {
        Self { min, max }
    }

    /// Lower corner.
    #[must_use]
    pub const fn min(&self) -> &Vector3 {
        &self.min
    }

    /// Upper corner.
    #[must_use]
    pub const fn max(&self) -> &Vector3 {
        &self.max
    }

    /// Grows the box to include `p`.
    pub fn enclose_point(&mut self, p: &Vector3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Grows the box to include all of `other`.
    pub fn enclose(&mut self, other: &Self) {
        self.min = self.min.min(&other.min);
        self.max = self.max.max(&other.max);
    }

    /// Surface area of the box.
    #[must_use]
    pub fn surface_area(&self) -> f64 {
        let d = self.max - self.min;
        2.0 * d.y.mul_add(d.z, d.x.mul_add(d.y, d.x * d.z))
    }

    /// True if the box has zero extent on `axis`.
    #[must_use]
    pub fn is_flat(&self, axis: Axis) -> bool {
        self.min[axis] >= self.max[axis]
    }

    /// True if `p` lies inside or on the box.
    #[must_use]
    pub fn contains(&self, p: &Vector3) -> bool {
        Axis::ALL
            .iter()
            .all(|&axis| self.min[axis] <= p[axis] && p[axis] <= self.max[axis])
    }

    /// Clips the box so that `axis` does not extend below `value`.
    pub fn set_axis_min(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::X => self.min.x = value,
            Axis::Y => self.min.y = value,
            Axis::Z => self.min.z = value,
        }
    }

    /// Clips the box so that `axis` does not extend above `value`.
    pub fn set_axis_max(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::X => self.max.x = value,
            Axis::Y => self.max.y = value,
            Axis::Z => self.max.z = value,
        }
    }

    /// Intersection of two boxes; `None` when they are disjoint.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let min = self.min.max(&other.min);
        let max = self.max.min(&other.max);
        Axis::ALL
            .iter()
            .all(|&axis| min[axis] <= max[axis])
            .then_some(Self { min, max })
    }

    /// Slab test of a ray against the box.  `dir_inv` is the componentwise
    /// reciprocal of the direction; zero components become infinities and
    /// the resulting NaNs are suppressed by the min/max folds.  Returns the
    /// entry and exit distances of the overlap with `[tmin, tmax]`.
    #[must_use]
    pub fn ray_intersect(
        &self,
        origin: &Vector3,
        dir_inv: &Vector3,
        tmin: f64,
        tmax: f64,
    ) -> Option<(f64, f64)> {
        let mut entry = tmin;
        let mut exit = tmax;
        for &axis in &Axis::ALL {
            let t0 = (self.min[axis] - origin[axis]) * dir_inv[axis];
            let t1 = (self.max[axis] - origin[axis]) * dir_inv[axis];
            let (near, far) = if dir_inv[axis] < 0.0 { (t1, t0) } else { (t0, t1) };
            entry = entry.max(near);
            exit = exit.min(far);
        }
        (entry <= exit).then_some((entry, exit))
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}
