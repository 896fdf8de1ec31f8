//! Photon transport: the per-decay Monte Carlo loop and the material
//! stacks that track nested volume containment.

use crate::error::{Error, Result};
use crate::event::{Interaction, Kind, NuclearDecay, Photon};
use crate::physics;
use crate::rng::Rng;
use crate::scene::{Scene, RAY_TRACE_EPSILON};
use crate::vecmath::Vector3;
use std::fmt;

/// Hard limit on the number of steps a single photon may take.
const MAX_TRACE_DEPTH: usize = 500;

/// Counters accumulated over a worker's transport.
#[derive(Clone, Copy, Debug, Default)]
pub struct TraceStats {
    /// Decays traced.
    pub decays: u64,
    /// Photons traced.
    pub photons: u64,
    /// Photons that left the scene without interacting further.
    pub no_interaction: u64,
    /// Photoelectric absorptions.
    pub photoelectric: u64,
    /// K-shell fluorescence escapes.
    pub xray_escape: u64,
    /// Compton scatters.
    pub compton: u64,
    /// Rayleigh scatters.
    pub rayleigh: u64,
    /// Photoelectric absorptions inside sensitive volumes.
    pub photoelectric_sensitive: u64,
    /// X-ray escapes inside sensitive volumes.
    pub xray_escape_sensitive: u64,
    /// Compton scatters inside sensitive volumes.
    pub compton_sensitive: u64,
    /// Rayleigh scatters inside sensitive volumes.
    pub rayleigh_sensitive: u64,
    /// Abandoned photons: empty stack, face mismatch, or depth exhausted.
    pub error: u64,
}

impl fmt::Display for TraceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "decays: {}", self.decays)?;
        writeln!(f, "photons: {}", self.photons)?;
        writeln!(f, "no_interaction: {}", self.no_interaction)?;
        writeln!(f, "photoelectric: {}", self.photoelectric)?;
        writeln!(f, "xray_escape: {}", self.xray_escape)?;
        writeln!(f, "compton: {}", self.compton)?;
        writeln!(f, "rayleigh: {}", self.rayleigh)?;
        writeln!(f, "photoelectric_sensitive: {}", self.photoelectric_sensitive)?;
        writeln!(f, "xray_escape_sensitive: {}", self.xray_escape_sensitive)?;
        writeln!(f, "compton_sensitive: {}", self.compton_sensitive)?;
        writeln!(f, "rayleigh_sensitive: {}", self.rayleigh_sensitive)?;
        writeln!(f, "error: {}", self.error)
    }
}

/// Which interaction records the tracer emits.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogPolicy {
    /// Log interactions that deposit no energy (Rayleigh).
    pub nondepositing: bool,
    /// Log the nuclear decays themselves as marker records.
    pub nuclear_decays: bool,
    /// Log interactions outside sensitive volumes.
    pub nonsensitive: bool,
    /// Log error records for abandoned photons.
    pub errors: bool,
}

/// The per-photon stack of material ids.  The base is always the ambient
/// material; the top is the material the photon currently traverses.
type MaterialStack = Vec<i32>;

/// The photon transport engine for one worker.  Holds the per-source
/// material stacks built once from the scene.
pub struct GammaRayTrace<'a> {
    scene: &'a Scene,
    source_positions: Vec<Vector3>,
    source_stacks: Vec<MaterialStack>,
    log: LogPolicy,
}

impl<'a> GammaRayTrace<'a> {
    /// Ray-casts each source centroid to establish its enclosing material
    /// stack.
    ///
    /// # Errors
    ///
    /// Returns an error when the crossings along a probe ray cannot be
    /// folded into a consistent stack, which indicates overlapping
    /// geometry.
    pub fn new(
        scene: &'a Scene,
        source_positions: Vec<Vector3>,
        log: LogPolicy,
    ) -> Result<Self> {
        let source_stacks = source_positions
            .iter()
            .map(|pos| build_stack(scene, pos))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            scene,
            source_positions,
            source_stacks,
            log,
        })
    }

    /// Material at the centroid of source `src_id`.
    #[must_use]
    pub fn source_material(&self, src_id: usize) -> i32 {
        *self.source_stacks[src_id].last().unwrap_or(&0)
    }

    /// Traces every photon of one decay, appending the produced
    /// interaction records to `interactions`.
    pub fn trace_decay(
        &self,
        decay: &NuclearDecay,
        interactions: &mut Vec<Interaction>,
        rng: &mut Rng,
        stats: &mut TraceStats,
    ) {
        stats.decays += 1;
        let src_id = usize::try_from(decay.src_id).unwrap_or(0);
        if self.log.nuclear_decays {
            interactions.push(Interaction::from_decay(decay, self.source_material(src_id)));
        }
        for photon in decay.photons() {
            stats.photons += 1;
            let stack = self.decay_stack(src_id, &photon.pos);
            self.trace_photon(*photon, stack, interactions, rng, stats);
        }
    }

    /// The material stack for a photon born at `pos`, corrected from the
    /// source centroid's stack when positron range displaced the decay.
    fn decay_stack(&self, src_id: usize, pos: &Vector3) -> MaterialStack {
        update_stack(
            self.scene,
            &self.source_positions[src_id],
            pos,
            &self.source_stacks[src_id],
        )
    }

    fn trace_photon(
        &self,
        mut photon: Photon,
        mut stack: MaterialStack,
        interactions: &mut Vec<Interaction>,
        rng: &mut Rng,
        stats: &mut TraceStats,
    ) {
        for _ in 0..MAX_TRACE_DEPTH {
            let Some(&mat_id) = stack.last() else {
                // The ambient material should always remain at the bottom
                // of the stack; popping it means a back face arrived
                // without its matching front face.
                if self.log.errors {
                    interactions.push(Interaction::error(Kind::ErrorEmptyStack, &photon));
                }
                stats.error += 1;
                return;
            };
            let material = &self.scene.material(mat_id).stats;

            let Some(point) = self.scene.seek_intersection(&photon.pos, &photon.dir, f64::MAX)
            else {
                // Nothing further in the environment to hit.
                stats.no_interaction += 1;
                return;
            };

            let interaction_dist = material.distance(photon.energy, rng);
            if interaction_dist >= point.dist {
                // No interaction before the boundary: cross it.
                photon.pos += photon.dir * point.dist;
                photon.time += point.dist * physics::INVERSE_SPEED_OF_LIGHT;
                if point.front_face {
                    // Entering a volume; its detector id decides whether
                    // later scatters count as detector or phantom.
                    photon.det_id = point.det_id;
                    stack.push(point.mat_id);
                } else {
                    if stack.last() != Some(&point.mat_id) {
                        if self.log.errors {
                            interactions.push(Interaction::error(Kind::ErrorMatch, &photon));
                        }
                        stats.error += 1;
                        return;
                    }
                    photon.det_id = -1;
                    stack.pop();
                }
                // Step past the surface so the next query does not re-hit it.
                photon.pos += photon.dir * RAY_TRACE_EPSILON;
                continue;
            }

            photon.pos += photon.dir * interaction_dist;
            photon.time += interaction_dist * physics::INVERSE_SPEED_OF_LIGHT;

            let energy_before = photon.energy;
            let mut kind = material.interact(&mut photon, rng);
            if kind == Kind::Photoelectric {
                if let Some(xray) = material.xray_escape() {
                    if energy_before > xray.binding_energy
                        && rng.selection(xray.fluorescence_yield)
                    {
                        // The K X-ray escapes the absorption site: keep
                        // tracing it isotropically at the binding energy.
                        kind = Kind::XrayEscape;
                        photon.energy = xray.binding_energy;
                        photon.dir = rng.uniform_sphere();
                        photon.xray_flouresence = true;
                    }
                }
            }
            let deposit = energy_before - photon.energy;

            let is_sensitive = photon.is_sensitive();
            let mut log_interact = self.log.nonsensitive || is_sensitive;
            match kind {
                Kind::Photoelectric => {
                    stats.photoelectric += 1;
                    if is_sensitive {
                        stats.photoelectric_sensitive += 1;
                    }
                }
                Kind::XrayEscape => {
                    stats.xray_escape += 1;
                    if is_sensitive {
                        stats.xray_escape_sensitive += 1;
                    }
                }
                Kind::Compton => {
                    stats.compton += 1;
                    if is_sensitive {
                        stats.compton_sensitive += 1;
                    }
                }
                Kind::Rayleigh => {
                    log_interact &= self.log.nondepositing;
                    stats.rayleigh += 1;
                    if is_sensitive {
                        stats.rayleigh_sensitive += 1;
                    }
                }
                _ => unreachable!("material interaction produced {kind:?}"),
            }
            if log_interact {
                interactions.push(Interaction::from_photon(kind, &photon, mat_id, deposit));
            }
            if photon.energy <= 0.0 {
                return;
            }
        }

        if self.log.errors {
            interactions.push(Interaction::error(Kind::ErrorTraceDepth, &photon));
        }
        stats.error += 1;
    }
}

/// Establishes the stack of materials enclosing `pos` by ray-casting in a
/// fixed direction and folding the crossings from the outside in: a
/// back-face crossing seen from inside is a volume containing the point,
/// a front-face crossing cancels the matching back face beyond it.
fn build_stack(scene: &Scene, pos: &Vector3) -> Result<MaterialStack> {
    let dir = Vector3::UNIT_X;
    let mut crossings = Vec::new();

    let mut probe = *pos + dir * RAY_TRACE_EPSILON;
    while let Some(point) = scene.seek_intersection(&probe, &dir, f64::MAX) {
        crossings.push((point.mat_id, point.front_face));
        probe = point.pos + dir * RAY_TRACE_EPSILON;
    }

    let mut stack = vec![0];
    for &(mat_id, front_face) in crossings.iter().rev() {
        if front_face {
            stack.pop();
            if stack.is_empty() {
                return Err(Error::General(
                    "unable to determine source materials: potential object overlap".to_string(),
                ));
            }
        } else {
            stack.push(mat_id);
        }
    }
    Ok(stack)
}

/// Corrects `base` for a photon whose start position moved from the source
/// centroid, ray-casting only between the two points.  Inconsistencies
/// along the way (which overlapping geometry can produce) leave the stack
/// as-is from that point on.
fn update_stack(
    scene: &Scene,
    src_pos: &Vector3,
    pos: &Vector3,
    base: &MaterialStack,
) -> MaterialStack {
    let mut stack = base.clone();
    if src_pos == pos {
        return stack;
    }
    let offset = *pos - *src_pos;
    let mut remaining = offset.norm();
    let dir = offset * (1.0 / remaining);

    let mut probe = *src_pos + dir * RAY_TRACE_EPSILON;
    while let Some(point) = scene.seek_intersection(&probe, &dir, remaining) {
        remaining -= point.dist + RAY_TRACE_EPSILON;
        if point.front_face {
            stack.push(point.mat_id);
        } else {
            if stack.is_empty() || stack.last() != Some(&point.mat_id) {
                break;
            }
            stack.pop();
        }
        probe = point.pos + dir * RAY_TRACE_EPSILON;
    }
    stack
}

/// Samples points inside the scene's bounding box and rebuilds their
/// material stacks, failing when any probe detects overlapping geometry.
///
/// # Errors
///
/// Returns the first overlap found.
pub fn test_overlap(scene: &Scene, rng: &mut Rng, no_points: usize) -> Result<()> {
    let bounds = *scene.bounding_box();
    let size = *bounds.max() - *bounds.min();
    for _ in 0..no_points {
        let probe = *bounds.min()
            + Vector3::new(
                size.x * rng.uniform(),
                size.y * rng.uniform(),
                size.z * rng.uniform(),
            );
        build_stack(scene, &probe)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Color;
    use crate::kdtree::SplitAlgorithm;
    use crate::material::{GammaStats, Material, MaterialTables};
    use crate::scene::{Shape, Viewable};

    fn dense_material() -> GammaStats {
        GammaStats::new(
            MaterialTables {
                energy: vec![0.001, 0.1, 0.511, 1.5],
                photoelectric: vec![100.0, 30.0, 20.0, 10.0],
                compton: vec![1e-12, 1e-12, 1e-12, 1e-12],
                rayleigh: vec![1e-12, 1e-12, 1e-12, 1e-12],
                x: vec![0.0, 1e9, 1e10],
                form_factor: vec![1.0, 0.5, 0.1],
                scattering_func: vec![0.1, 0.9, 1.0],
            },
            None,
        )
    }

    fn detector_scene() -> Scene {
        let materials = vec![
            Material {
                name: "vacuum".to_string(),
                index: 0,
                stats: GammaStats::disabled(),
            },
            Material {
                name: "crystal".to_string(),
                index: 1,
                stats: dense_material(),
            },
        ];
        let mut scene = Scene::new(materials);
        scene.add_viewable(Viewable {
            shape: Shape::Sphere {
                center: Vector3::new(5.0, 0.0, 0.0),
                radius: 1.0,
            },
            mat_id: 1,
            det_id: 0,
        });
        scene.build_tree(SplitAlgorithm::MacDonaldBooth).unwrap();
        scene
    }

    fn photon_toward_detector() -> Photon {
        Photon::new(
            Vector3::ZERO,
            Vector3::UNIT_X,
            0.511,
            0.0,
            1,
            Color::Blue,
            0,
        )
    }

    #[test]
    fn stack_outside_everything_is_just_ambient() {
        let scene = detector_scene();
        let stack = build_stack(&scene, &Vector3::new(-10.0, 0.0, 0.0)).unwrap();
        assert_eq!(stack, vec![0]);
    }

    #[test]
    fn stack_inside_the_sphere_holds_its_material() {
        let scene = detector_scene();
        let stack = build_stack(&scene, &Vector3::new(5.0, 0.0, 0.0)).unwrap();
        assert_eq!(stack, vec![0, 1]);
    }

    #[test]
    fn dense_sphere_stops_the_photon_and_logs_deposits() {
        let scene = detector_scene();
        let tracer = GammaRayTrace::new(
            &scene,
            vec![Vector3::ZERO],
            LogPolicy {
                nonsensitive: true,
                ..LogPolicy::default()
            },
        )
        .unwrap();

        let mut decay = NuclearDecay::new(1, 0.0, 0, Vector3::ZERO, 0.0);
        decay.add_photon(photon_toward_detector());

        let mut interactions = Vec::new();
        let mut rng = Rng::with_seed(5);
        let mut stats = TraceStats::default();
        tracer.trace_decay(&decay, &mut interactions, &mut rng, &mut stats);

        assert_eq!(stats.decays, 1);
        assert_eq!(stats.photons, 1);
        // At 20/cm photoelectric attenuation the photon cannot cross two
        // centimeters of crystal.
        assert_eq!(stats.photoelectric, 1);
        assert!(!interactions.is_empty());
        let total: f64 = interactions.iter().map(|i| i.energy).sum();
        float_cmp::assert_approx_eq!(f64, total, 0.511, epsilon = 1e-9);
        // Every deposit happened inside the sensitive sphere.
        assert!(interactions.iter().all(|i| i.det_id == 0));
    }

    #[test]
    fn update_stack_corrects_for_displaced_emission() {
        let scene = detector_scene();
        let base = build_stack(&scene, &Vector3::ZERO).unwrap();
        let inside = update_stack(&scene, &Vector3::ZERO, &Vector3::new(5.0, 0.0, 0.0), &base);
        assert_eq!(inside, vec![0, 1]);
        let outside = update_stack(&scene, &Vector3::ZERO, &Vector3::new(-3.0, 0.0, 0.0), &base);
        assert_eq!(outside, vec![0]);
    }

    #[test]
    fn overlap_test_passes_on_a_clean_scene() {
        let scene = detector_scene();
        let mut rng = Rng::with_seed(17);
        assert!(test_overlap(&scene, &mut rng, 200).is_ok());
    }

    #[test]
    fn photon_leaving_the_scene_counts_no_interaction() {
        let scene = detector_scene();
        let tracer =
            GammaRayTrace::new(&scene, vec![Vector3::ZERO], LogPolicy::default()).unwrap();
        let mut decay = NuclearDecay::new(1, 0.0, 0, Vector3::ZERO, 0.0);
        let mut photon = photon_toward_detector();
        photon.dir = -Vector3::UNIT_X;
        decay.add_photon(photon);
        let mut interactions = Vec::new();
        let mut rng = Rng::with_seed(5);
        let mut stats = TraceStats::default();
        tracer.trace_decay(&decay, &mut interactions, &mut rng, &mut stats);
        assert_eq!(stats.no_interaction, 1);
        assert!(interactions.is_empty());
    }
}
