//! The scene: materials, viewable primitives, and the k-d tree that
//! accelerates ray queries against them.
//!
//! Primitives are closed solids (plus one-sided triangles) with a
//! front/back face convention: a front-face hit enters the solid, a
//! back-face hit leaves it.  The photon transport layer turns those
//! crossings into material-stack pushes and pops.

use crate::error::{Error, Result};
use crate::kdtree::{KdTree, SplitAlgorithm};
use crate::material::Material;
use crate::vecmath::{Aabb, Vector3};

/// Geometric nudge applied after every boundary crossing so the next ray
/// does not re-hit the primitive it just left.
pub const RAY_TRACE_EPSILON: f64 = 1e-10;

/// A ray-primitive intersection as reported to the transport loop.
#[derive(Clone, Copy, Debug)]
pub struct VisiblePoint {
    /// Distance along the ray.
    pub dist: f64,
    /// World position of the hit.
    pub pos: Vector3,
    /// True when the ray enters the solid here.
    pub front_face: bool,
    /// Material of the solid that was hit.
    pub mat_id: i32,
    /// Detector id of the solid; negative for non-sensitive geometry.
    pub det_id: i32,
    /// Index of the viewable that was hit.
    pub object_id: usize,
}

/// An orthonormal local frame for oriented primitives.
#[derive(Clone, Copy, Debug)]
pub struct Frame {
    /// First lateral axis.
    pub u: Vector3,
    /// Second lateral axis.
    pub v: Vector3,
    /// Main (long) axis.
    pub w: Vector3,
}

impl Frame {
    /// A frame whose main axis is `w`; the lateral axes are arbitrary.
    #[must_use]
    pub fn from_axis(w: &Vector3) -> Self {
        let w = w.normalized();
        let pick = if w.x.abs() > 0.9 {
            Vector3::UNIT_Y
        } else {
            Vector3::UNIT_X
        };
        let u = w.cross(&pick).normalized();
        let v = w.cross(&u);
        Self { u, v, w }
    }

    /// World vector to local coordinates.
    #[must_use]
    pub fn to_local(&self, world: &Vector3) -> Vector3 {
        Vector3::new(world.dot(&self.u), world.dot(&self.v), world.dot(&self.w))
    }
}

/// The closed solids (and one-sided triangles) the scene is made of.
#[derive(Clone, Debug)]
pub enum Shape {
    /// A sphere.
    Sphere {
        /// Center position.
        center: Vector3,
        /// Radius.
        radius: f64,
    },
    /// A finite circular cylinder.
    Cylinder {
        /// Center of the cylinder.
        center: Vector3,
        /// Local frame; `w` is the cylinder axis.
        frame: Frame,
        /// Radius.
        radius: f64,
        /// Half of the axial length.
        half_length: f64,
    },
    /// A finite cylinder with an elliptical cross section.
    EllipticCylinder {
        /// Center of the cylinder.
        center: Vector3,
        /// Local frame; `w` is the cylinder axis.
        frame: Frame,
        /// Semi-axis along the local `u` direction.
        radius1: f64,
        /// Semi-axis along the local `v` direction.
        radius2: f64,
        /// Half of the axial length.
        half_length: f64,
    },
    /// A triaxial ellipsoid.
    Ellipsoid {
        /// Center position.
        center: Vector3,
        /// Local frame of the three principal axes.
        frame: Frame,
        /// Semi-axes along the local `u`, `v`, `w` directions.
        radii: Vector3,
    },
    /// An oriented box, used for detector crystals.
    Parallelepiped {
        /// Center position.
        center: Vector3,
        /// Local frame of the box edges.
        frame: Frame,
        /// Half extents along the local axes.
        half: Vector3,
    },
    /// A one-sided triangle; polygons arrive fan-triangulated.
    Triangle {
        /// First vertex.
        v0: Vector3,
        /// Second vertex.
        v1: Vector3,
        /// Third vertex.
        v2: Vector3,
    },
}

impl Shape {
    /// The entry/exit interval of the ray with the solid, when it exists.
    /// Triangles return a degenerate interval at the hit distance.
    fn intersect_interval(&self, origin: &Vector3, dir: &Vector3) -> Option<(f64, f64)> {
        match self {
            Self::Sphere { center, radius } => {
                let oc = *origin - *center;
                quadratic_interval(
                    dir.norm_squared(),
                    2.0 * oc.dot(dir),
                    radius.mul_add(-*radius, oc.norm_squared()),
                )
            }
            Self::Cylinder {
                center,
                frame,
                radius,
                half_length,
            } => {
                let o = frame.to_local(&(*origin - *center));
                let d = frame.to_local(dir);
                cylinder_interval(&o, &d, *radius, *radius, *half_length)
            }
            Self::EllipticCylinder {
                center,
                frame,
                radius1,
                radius2,
                half_length,
            } => {
                let o = frame.to_local(&(*origin - *center));
                let d = frame.to_local(dir);
                cylinder_interval(&o, &d, *radius1, *radius2, *half_length)
            }
            Self::Ellipsoid {
                center,
                frame,
                radii,
            } => {
                // Affine map to the unit sphere.
                let o = frame.to_local(&(*origin - *center));
                let d = frame.to_local(dir);
                let o = Vector3::new(o.x / radii.x, o.y / radii.y, o.z / radii.z);
                let d = Vector3::new(d.x / radii.x, d.y / radii.y, d.z / radii.z);
                quadratic_interval(d.norm_squared(), 2.0 * o.dot(&d), o.norm_squared() - 1.0)
            }
            Self::Parallelepiped {
                center,
                frame,
                half,
            } => {
                let o = frame.to_local(&(*origin - *center));
                let d = frame.to_local(dir);
                let aabb = Aabb::new(-*half, *half);
                aabb.ray_intersect(&o, &d.recip(), f64::NEG_INFINITY, f64::INFINITY)
            }
            Self::Triangle { v0, v1, v2 } => {
                triangle_hit(v0, v1, v2, origin, dir).map(|t| (t, t))
            }
        }
    }

    /// Closest hit beyond `t_min` and before `t_max`, with facing.  For
    /// solids the entry hit is front-facing and the exit hit back-facing;
    /// for triangles facing comes from the winding normal.
    #[must_use]
    pub fn intersect(
        &self,
        origin: &Vector3,
        dir: &Vector3,
        t_min: f64,
        t_max: f64,
    ) -> Option<(f64, bool)> {
        let (entry, exit) = self.intersect_interval(origin, dir)?;
        if entry.is_nan() || exit.is_nan() {
            return None;
        }
        if let Self::Triangle { v0, v1, v2 } = self {
            if entry <= t_min || entry >= t_max {
                return None;
            }
            let normal = (*v1 - *v0).cross(&(*v2 - *v0));
            return Some((entry, dir.dot(&normal) < 0.0));
        }
        if entry > t_min && entry < t_max {
            Some((entry, true))
        } else if exit > t_min && exit < t_max {
            Some((exit, false))
        } else {
            None
        }
    }

    /// World-space bounding box.
    #[must_use]
    pub fn bounds(&self) -> Aabb {
        match self {
            Self::Sphere { center, radius } => {
                let r = Vector3::new(*radius, *radius, *radius);
                Aabb::new(*center - r, *center + r)
            }
            Self::Cylinder {
                center,
                frame,
                radius,
                half_length,
            } => oriented_bounds(center, frame, *radius, *radius, *half_length),
            Self::EllipticCylinder {
                center,
                frame,
                radius1,
                radius2,
                half_length,
            } => oriented_bounds(center, frame, *radius1, *radius2, *half_length),
            Self::Ellipsoid {
                center,
                frame,
                radii,
            } => {
                let extent = |e: &Vector3| {
                    (radii.x * frame.u.dot(e)).hypot(radii.y * frame.v.dot(e))
                        .hypot(radii.z * frame.w.dot(e))
                };
                let half = Vector3::new(
                    extent(&Vector3::UNIT_X),
                    extent(&Vector3::UNIT_Y),
                    extent(&Vector3::UNIT_Z),
                );
                Aabb::new(*center - half, *center + half)
            }
            Self::Parallelepiped {
                center,
                frame,
                half,
            } => {
                let extent = |e: &Vector3| {
                    (half.x * frame.u.dot(e)).abs()
                        + (half.y * frame.v.dot(e)).abs()
                        + (half.z * frame.w.dot(e)).abs()
                };
                let half = Vector3::new(
                    extent(&Vector3::UNIT_X),
                    extent(&Vector3::UNIT_Y),
                    extent(&Vector3::UNIT_Z),
                );
                Aabb::new(*center - half, *center + half)
            }
            Self::Triangle { v0, v1, v2 } => {
                let mut aabb = Aabb::empty();
                aabb.enclose_point(v0);
                aabb.enclose_point(v1);
                aabb.enclose_point(v2);
                aabb
            }
        }
    }

    /// True if `pos` is inside the solid.  Triangles contain nothing.
    #[must_use]
    pub fn inside(&self, pos: &Vector3) -> bool {
        match self {
            Self::Sphere { center, radius } => (*pos - *center).norm_squared() < radius * radius,
            Self::Cylinder {
                center,
                frame,
                radius,
                half_length,
            } => {
                let p = frame.to_local(&(*pos - *center));
                p.z.abs() < *half_length && p.x.hypot(p.y) < *radius
            }
            Self::EllipticCylinder {
                center,
                frame,
                radius1,
                radius2,
                half_length,
            } => {
                let p = frame.to_local(&(*pos - *center));
                p.z.abs() < *half_length
                    && (p.x / radius1).hypot(p.y / radius2) < 1.0
            }
            Self::Ellipsoid {
                center,
                frame,
                radii,
            } => {
                let p = frame.to_local(&(*pos - *center));
                (p.x / radii.x).hypot(p.y / radii.y).hypot(p.z / radii.z) < 1.0
            }
            Self::Parallelepiped {
                center,
                frame,
                half,
            } => {
                let p = frame.to_local(&(*pos - *center));
                p.x.abs() < half.x && p.y.abs() < half.y && p.z.abs() < half.z
            }
            Self::Triangle { .. } => false,
        }
    }
}

/// Solution interval of `a t^2 + b t + c <= 0`.
fn quadratic_interval(a: f64, b: f64, c: f64) -> Option<(f64, f64)> {
    let disc = b.mul_add(b, -4.0 * a * c);
    if disc <= 0.0 {
        return None;
    }
    let sqrt_disc = disc.sqrt();
    Some(((-b - sqrt_disc) / (2.0 * a), (-b + sqrt_disc) / (2.0 * a)))
}

/// Entry/exit of a ray with a finite (possibly elliptic) cylinder in its
/// local frame: the lateral quadric intersected with the axial slab.
fn cylinder_interval(
    o: &Vector3,
    d: &Vector3,
    radius1: f64,
    radius2: f64,
    half_length: f64,
) -> Option<(f64, f64)> {
    let (ox, dx) = (o.x / radius1, d.x / radius1);
    let (oy, dy) = (o.y / radius2, d.y / radius2);
    let a = dx.mul_add(dx, dy * dy);
    let lateral = if a == 0.0 {
        // Parallel to the axis: inside or outside for the whole ray.
        (ox.mul_add(ox, oy * oy) < 1.0).then_some((f64::NEG_INFINITY, f64::INFINITY))
    } else {
        quadratic_interval(a, 2.0 * dx.mul_add(ox, dy * oy), oy.mul_add(oy, ox.mul_add(ox, -1.0)))
    }?;

    let slab = if d.z == 0.0 {
        (o.z.abs() < half_length).then_some((f64::NEG_INFINITY, f64::INFINITY))
    } else {
        let t0 = (-half_length - o.z) / d.z;
        let t1 = (half_length - o.z) / d.z;
        Some((t0.min(t1), t0.max(t1)))
    }?;

    let entry = lateral.0.max(slab.0);
    let exit = lateral.1.min(slab.1);
    (entry < exit).then_some((entry, exit))
}

/// Möller–Trumbore ray/triangle hit distance.
fn triangle_hit(
    v0: &Vector3,
    v1: &Vector3,
    v2: &Vector3,
    origin: &Vector3,
    dir: &Vector3,
) -> Option<f64> {
    let edge1 = *v1 - *v0;
    let edge2 = *v2 - *v0;
    let pvec = dir.cross(&edge2);
    let det = edge1.dot(&pvec);
    if det.abs() < 1e-14 {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = *origin - *v0;
    let u = tvec.dot(&pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let qvec = tvec.cross(&edge1);
    let v = dir.dot(&qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    Some(edge2.dot(&qvec) * inv_det)
}

fn oriented_bounds(
    center: &Vector3,
    frame: &Frame,
    radius1: f64,
    radius2: f64,
    half_length: f64,
) -> Aabb {
    let extent = |e: &Vector3| {
        (radius1 * frame.u.dot(e)).hypot(radius2 * frame.v.dot(e))
            + (half_length * frame.w.dot(e)).abs()
    };
    let half = Vector3::new(
        extent(&Vector3::UNIT_X),
        extent(&Vector3::UNIT_Y),
        extent(&Vector3::UNIT_Z),
    );
    Aabb::new(*center - half, *center + half)
}

/// A shape placed in the scene with its material and sensitivity.
#[derive(Clone, Debug)]
pub struct Viewable {
    /// The geometry.
    pub shape: Shape,
    /// Material of the solid's interior.
    pub mat_id: i32,
    /// Detector id; negative for non-sensitive geometry.
    pub det_id: i32,
}

/// The simulated world: materials, viewables, and the acceleration tree.
/// Everything is owned by value; the tree refers to viewables by index.
#[derive(Clone, Debug)]
pub struct Scene {
    materials: Vec<Material>,
    viewables: Vec<Viewable>,
    tree: Option<KdTree>,
}

impl Scene {
    /// Creates a scene whose first material is the ambient default.
    ///
    /// # Panics
    ///
    /// Panics if `materials` is empty.
    #[must_use]
    pub fn new(materials: Vec<Material>) -> Self {
        assert!(!materials.is_empty());
        Self {
            materials,
            viewables: Vec::new(),
            tree: None,
        }
    }

    /// The ambient material every photon starts in.
    #[must_use]
    pub fn default_material(&self) -> &Material {
        &self.materials[0]
    }

    /// Looks a material up by scene index.
    ///
    /// # Panics
    ///
    /// Panics if `mat_id` is not a valid index.
    #[must_use]
    pub fn material(&self, mat_id: i32) -> &Material {
        &self.materials[usize::try_from(mat_id).unwrap()]
    }

    /// Looks a material index up by name.
    #[must_use]
    pub fn material_id(&self, name: &str) -> Option<i32> {
        self.materials
            .iter()
            .position(|m| m.name == name)
            .and_then(|idx| i32::try_from(idx).ok())
    }

    /// All materials, in index order.
    #[must_use]
    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    /// Adds a viewable; invalidates a previously built tree.
    pub fn add_viewable(&mut self, viewable: Viewable) {
        self.viewables.push(viewable);
        self.tree = None;
    }

    /// The scene's viewables, in insertion order.
    #[must_use]
    pub fn viewables(&self) -> &[Viewable] {
        &self.viewables
    }

    /// Number of distinct detector ids assigned to viewables.
    #[must_use]
    pub fn no_detectors(&self) -> usize {
        self.viewables
            .iter()
            .filter(|v| v.det_id >= 0)
            .map(|v| v.det_id)
            .max()
            .map_or(0, |max| usize::try_from(max + 1).unwrap_or(0))
    }

    /// Builds the k-d tree over the current viewables.
    ///
    /// # Errors
    ///
    /// Propagates tree construction failures.
    pub fn build_tree(&mut self, algorithm: SplitAlgorithm) -> Result<()> {
        if self.viewables.is_empty() {
            return Err(Error::General("scene has no viewables".to_string()));
        }
        let viewables = &self.viewables;
        let tree = KdTree::build(
            viewables.len(),
            algorithm,
            |ii| viewables[ii].shape.bounds(),
            |ii, clip| viewables[ii].shape.bounds().intersection(clip),
        )?;
        self.tree = Some(tree);
        Ok(())
    }

    /// The box enclosing the whole scene.
    ///
    /// # Panics
    ///
    /// Panics if the tree has not been built.
    #[must_use]
    pub fn bounding_box(&self) -> &Aabb {
        self.tree.as_ref().unwrap().bounding_box()
    }

    /// Finds the closest front- or back-face crossing along the ray within
    /// `max_dist`.  Returns `None` when nothing further is hit.
    ///
    /// # Panics
    ///
    /// Panics if the tree has not been built.
    #[must_use]
    pub fn seek_intersection(
        &self,
        pos: &Vector3,
        dir: &Vector3,
        max_dist: f64,
    ) -> Option<VisiblePoint> {
        let tree = self.tree.as_ref().unwrap();
        let viewables = &self.viewables;
        let mut best: Option<VisiblePoint> = None;
        tree.traverse(pos, dir, max_dist, |object, stop_dist| {
            viewables[object]
                .shape
                .intersect(pos, dir, 0.0, *stop_dist)
                .is_some_and(|(dist, front_face)| {
                    *stop_dist = dist;
                    best = Some(VisiblePoint {
                        dist,
                        pos: *pos + *dir * dist,
                        front_face,
                        mat_id: viewables[object].mat_id,
                        det_id: viewables[object].det_id,
                        object_id: object,
                    });
                    true
                })
        });
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::GammaStats;
    use float_cmp::assert_approx_eq;

    fn test_scene(viewables: Vec<Viewable>) -> Scene {
        let materials = vec![
            Material {
                name: "vacuum".to_string(),
                index: 0,
                stats: GammaStats::disabled(),
            },
            Material {
                name: "water".to_string(),
                index: 1,
                stats: GammaStats::disabled(),
            },
        ];
        let mut scene = Scene::new(materials);
        for viewable in viewables {
            scene.add_viewable(viewable);
        }
        scene.build_tree(SplitAlgorithm::MacDonaldBooth).unwrap();
        scene
    }

    #[test]
    fn sphere_front_and_back_faces() {
        let scene = test_scene(vec![Viewable {
            shape: Shape::Sphere {
                center: Vector3::ZERO,
                radius: 1.0,
            },
            mat_id: 1,
            det_id: -1,
        }]);

        let hit = scene
            .seek_intersection(&Vector3::new(-5.0, 0.0, 0.0), &Vector3::UNIT_X, f64::MAX)
            .unwrap();
        assert!(hit.front_face);
        assert_approx_eq!(f64, hit.dist, 4.0, epsilon = 1e-12);

        let hit = scene
            .seek_intersection(&Vector3::ZERO, &Vector3::UNIT_X, f64::MAX)
            .unwrap();
        assert!(!hit.front_face);
        assert_approx_eq!(f64, hit.dist, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn nearest_of_two_spheres_wins() {
        let sphere = |x: f64| Viewable {
            shape: Shape::Sphere {
                center: Vector3::new(x, 0.0, 0.0),
                radius: 0.5,
            },
            mat_id: 1,
            det_id: -1,
        };
        let scene = test_scene(vec![sphere(2.0), sphere(5.0)]);
        let hit = scene
            .seek_intersection(&Vector3::new(0.0, 0.0, 0.0), &Vector3::UNIT_X, f64::MAX)
            .unwrap();
        assert_eq!(hit.object_id, 0);
        assert_approx_eq!(f64, hit.dist, 1.5, epsilon = 1e-12);
    }

    #[test]
    fn cylinder_interval_and_inside_agree() {
        let shape = Shape::Cylinder {
            center: Vector3::ZERO,
            frame: Frame::from_axis(&Vector3::UNIT_Z),
            radius: 1.0,
            half_length: 2.0,
        };
        assert!(shape.inside(&Vector3::new(0.5, 0.0, 1.0)));
        assert!(!shape.inside(&Vector3::new(0.5, 0.0, 3.0)));
        assert!(!shape.inside(&Vector3::new(1.5, 0.0, 0.0)));

        // Entering through the cap.
        let (dist, front) = shape
            .intersect(&Vector3::new(0.0, 0.0, 5.0), &(-Vector3::UNIT_Z), 0.0, f64::MAX)
            .unwrap();
        assert!(front);
        assert_approx_eq!(f64, dist, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn parallelepiped_respects_orientation() {
        let shape = Shape::Parallelepiped {
            center: Vector3::ZERO,
            frame: Frame {
                u: Vector3::UNIT_X,
                v: Vector3::UNIT_Y,
                w: Vector3::UNIT_Z,
            },
            half: Vector3::new(1.0, 2.0, 3.0),
        };
        assert!(shape.inside(&Vector3::new(0.9, 1.9, 2.9)));
        assert!(!shape.inside(&Vector3::new(1.1, 0.0, 0.0)));
        let bounds = shape.bounds();
        assert_approx_eq!(f64, bounds.max().y, 2.0);
    }

    #[test]
    fn triangle_facing_follows_winding() {
        let shape = Shape::Triangle {
            v0: Vector3::new(-1.0, -1.0, 0.0),
            v1: Vector3::new(1.0, -1.0, 0.0),
            v2: Vector3::new(0.0, 1.0, 0.0),
        };
        // Winding normal points +z; a ray travelling -z sees the front.
        let (_, front) = shape
            .intersect(&Vector3::new(0.0, 0.0, 5.0), &(-Vector3::UNIT_Z), 0.0, f64::MAX)
            .unwrap();
        assert!(front);
        let (_, front) = shape
            .intersect(&Vector3::new(0.0, 0.0, -5.0), &Vector3::UNIT_Z, 0.0, f64::MAX)
            .unwrap();
        assert!(!front);
    }

    #[test]
    fn ellipsoid_bounds_enclose_surface() {
        let shape = Shape::Ellipsoid {
            center: Vector3::ZERO,
            frame: Frame::from_axis(&Vector3::UNIT_Z),
            radii: Vector3::new(1.0, 2.0, 3.0),
        };
        let bounds = shape.bounds();
        assert!(bounds.contains(&Vector3::new(0.0, 0.0, 3.0)));
        assert!(shape.inside(&Vector3::new(0.0, 0.0, 2.9)) || shape.inside(&Vector3::new(0.0, 2.9, 0.0)));
    }
}
