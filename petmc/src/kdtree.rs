//! A cost-optimized k-d tree over the scene's objects.
//!
//! Construction uses a surface-area-heuristic sweep over per-axis extent
//! triples, with the MacDonald–Booth cost estimate by default and the Buss
//! double-recurse estimate as an option.  Traversal is stackless apart
//! from a fixed-depth array and yields leaf objects to a callback in
//! near-to-far order, stopping as soon as the recorded hit is closer than
//! the next cell.

use crate::convert;
use crate::error::{Error, Result};
use crate::vecmath::{Aabb, Axis, Vector3};
use arrayvec::ArrayVec;

/// Maximum tree depth the fixed traversal stack supports.  A deeper tree
/// aborts construction.
const TRAVERSE_STACK_SIZE: usize = 63;

/// Default cost of intersecting one object, in units of the cost of
/// traversing one internal node.
const DEFAULT_OBJECT_COST: f64 = 2.0;

/// Default stopping criterion: the cost improvement per ray required to
/// justify adding a tree node, for an expected 10^6 rays and 4 accesses.
const DEFAULT_STOPPING_COST_PER_RAY: f64 = 4.0 / 1_000_000.0;

/// Which split cost estimate drives construction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SplitAlgorithm {
    /// The MacDonald–Booth surface-area estimate.
    #[default]
    MacDonaldBooth,
    /// The Buss double-recurse estimate with Goldsmith–Salmon coefficients.
    DoubleRecurse,
}

#[derive(Clone, Debug)]
enum Node {
    Leaf {
        objects: Vec<usize>,
    },
    Split {
        axis: Axis,
        value: f64,
        left: Option<usize>,
        right: Option<usize>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum TripleKind {
    // The ordering breaks value ties: a max sorts before a flat sorts
    // before a min at the same coordinate.
    Max,
    Flat,
    Min,
}

#[derive(Clone, Copy, Debug)]
struct ExtentTriple {
    value: f64,
    kind: TripleKind,
    object: usize,
}

/// Per-axis list of extent triples.  Each object contributes either one
/// min and one max, or a single flat when its extent collapses.
#[derive(Clone, Debug, Default)]
struct TripleList {
    triples: Vec<ExtentTriple>,
    no_max_mins: usize,
    no_flats: usize,
}

impl TripleList {
    fn push_extent(&mut self, min: f64, max: f64, object: usize) {
        if min == max {
            self.triples.push(ExtentTriple {
                value: min,
                kind: TripleKind::Flat,
                object,
            });
            self.no_flats += 1;
        } else {
            self.triples.push(ExtentTriple {
                value: min,
                kind: TripleKind::Min,
                object,
            });
            self.triples.push(ExtentTriple {
                value: max,
                kind: TripleKind::Max,
                object,
            });
            self.no_max_mins += 1;
        }
    }

    fn no_objects(&self) -> usize {
        self.no_max_mins + self.no_flats
    }

    fn sort(&mut self) {
        self.triples.sort_by(|a, b| {
            a.value
                .total_cmp(&b.value)
                .then(a.kind.cmp(&b.kind))
                .then(a.object.cmp(&b.object))
        });
    }
}

/// Result of scanning one axis for the best split.
struct SplitChoice {
    axis: Axis,
    value: f64,
    no_triples_left: usize,
    no_objects_left: usize,
    no_objects_right: usize,
}

struct TraverseEntry {
    node: usize,
    min_dist: f64,
    max_dist: f64,
}

/// The k-d tree.  Nodes live contiguously in one array and refer to each
/// other and to the caller's objects by index only.
#[derive(Clone, Debug)]
pub struct KdTree {
    nodes: Vec<Node>,
    bounding_box: Aabb,
    bounding_box_area: f64,
    object_cost: f64,
    stopping_cost_per_ray: f64,
    algorithm: SplitAlgorithm,
}

impl KdTree {
    /// Builds a tree over `num_objects` objects.  `extent` returns the
    /// bounding box of an object; `extent_in_box` returns a bounding box
    /// of the intersection of an object with a clipping box, or `None`
    /// when the intersection is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the finished tree is deeper than the fixed
    /// traversal stack allows.
    pub fn build(
        num_objects: usize,
        algorithm: SplitAlgorithm,
        extent: impl Fn(usize) -> Aabb,
        extent_in_box: impl Fn(usize, &Aabb) -> Option<Aabb>,
    ) -> Result<Self> {
        let mut object_aabbs: Vec<Aabb> = (0..num_objects).map(extent).collect();

        let mut bounding_box = Aabb::empty();
        for aabb in &object_aabbs {
            bounding_box.enclose(aabb);
        }

        let mut lists = [
            TripleList::default(),
            TripleList::default(),
            TripleList::default(),
        ];
        for (ii, aabb) in object_aabbs.iter().enumerate() {
            for (axis_no, &axis) in Axis::ALL.iter().enumerate() {
                lists[axis_no].push_extent(aabb.min()[axis], aabb.max()[axis], ii);
            }
        }
        for list in &mut lists {
            list.sort();
        }

        let mut tree = Self {
            nodes: Vec::with_capacity(2 * num_objects),
            bounding_box,
            bounding_box_area: bounding_box.surface_area(),
            object_cost: DEFAULT_OBJECT_COST,
            stopping_cost_per_ray: DEFAULT_STOPPING_COST_PER_RAY,
            algorithm,
        };

        let total_cost = tree.object_cost * convert::f64_from_usize(lists[0].no_objects());
        let root = tree.next_index();
        let [x, y, z] = lists;
        let mut status = vec![0u8; num_objects];
        let max_depth = tree.build_subtree(
            root,
            bounding_box,
            total_cost,
            x,
            y,
            z,
            &mut object_aabbs,
            &mut status,
            &extent_in_box,
            0,
        );

        if max_depth > TRAVERSE_STACK_SIZE {
            return Err(Error::General(format!(
                "k-d tree depth {max_depth} exceeds the fixed traversal stack of {TRAVERSE_STACK_SIZE}"
            )));
        }
        Ok(tree)
    }

    /// The box enclosing everything in the tree.
    #[must_use]
    pub const fn bounding_box(&self) -> &Aabb {
        &self.bounding_box
    }

    /// Walks the leaves intersected by the ray in near-to-far order.  For
    /// every object in every visited leaf, `callback(object, stop_dist)`
    /// reports whether it found a hit closer than `stop_dist` and, if so,
    /// shrinks `stop_dist` in place.  Traversal ends once the recorded hit
    /// is closer than the next cell's entry distance.  Returns the closest
    /// hit object.
    pub fn traverse(
        &self,
        origin: &Vector3,
        dir: &Vector3,
        max_dist: f64,
        mut callback: impl FnMut(usize, &mut f64) -> bool,
    ) -> Option<usize> {
        let dir_inv = dir.recip();
        let (entry, exit) = self
            .bounding_box
            .ray_intersect(origin, &dir_inv, 0.0, f64::MAX)?;

        let mut stop_dist = max_dist;
        let mut min_dist = entry.max(0.0);
        let mut max_cell_dist = stop_dist.min(exit);
        let mut hit_parallel = false;
        let mut parallel_hit_max = f64::NEG_INFINITY;
        let mut stopping_object = None;

        let mut stack: ArrayVec<TraverseEntry, TRAVERSE_STACK_SIZE> = ArrayVec::new();
        let mut current = Some(0);

        loop {
            if let Some(node_idx) = current {
                match &self.nodes[node_idx] {
                    Node::Leaf { objects } => {
                        for &object in objects {
                            if callback(object, &mut stop_dist) {
                                stopping_object = Some(object);
                            }
                        }
                        current = None;
                    }
                    Node::Split {
                        axis,
                        value,
                        left,
                        right,
                    } => {
                        let this_dir = dir[*axis];
                        let this_start = origin[*axis];
                        if this_dir == 0.0 {
                            // Travelling parallel to the splitting plane:
                            // stay on the origin's side of it.
                            if *value < this_start {
                                current = *right;
                            } else if *value > this_start {
                                current = *left;
                            } else {
                                match (*left, *right) {
                                    (None, side) | (side, None) => current = side,
                                    (Some(l), Some(r)) => {
                                        stack.push(TraverseEntry {
                                            node: r,
                                            min_dist,
                                            max_dist: max_cell_dist,
                                        });
                                        current = Some(l);
                                        hit_parallel = true;
                                        parallel_hit_max = parallel_hit_max.max(max_cell_dist);
                                    }
                                }
                            }
                        } else {
                            let (near, far) = if this_dir > 0.0 {
                                (*left, *right)
                            } else {
                                (*right, *left)
                            };
                            let split_dist = (*value - this_start) * dir_inv[*axis];
                            if split_dist < min_dist {
                                current = far;
                            } else if split_dist > max_cell_dist {
                                current = near;
                            } else if near.is_none() {
                                min_dist = split_dist;
                                current = far;
                            } else {
                                if let Some(far_idx) = far {
                                    stack.push(TraverseEntry {
                                        node: far_idx,
                                        min_dist: split_dist,
                                        max_dist: max_cell_dist,
                                    });
                                }
                                max_cell_dist = split_dist;
                                current = near;
                            }
                        }
                    }
                }
                if current.is_some() {
                    continue;
                }
            }

            // Done with a (possibly empty) leaf: resume from the stack.
            let Some(top) = stack.pop() else {
                return stopping_object;
            };
            min_dist = top.min_dist;
            if stopping_object.is_some()
                && min_dist > stop_dist
                && (!hit_parallel || min_dist >= parallel_hit_max)
            {
                return stopping_object;
            }
            current = Some(top.node);
            max_cell_dist = top.max_dist;
        }
    }

    fn next_index(&mut self) -> usize {
        self.nodes.push(Node::Leaf {
            objects: Vec::new(),
        });
        self.nodes.len() - 1
    }

    /// Recursively splits `base_index`, returning the depth of the built
    /// subtree.  The smaller child is recursed first, mirroring the
    /// scratch-reuse order of the sweep construction.
    #[allow(clippy::too_many_arguments)]
    fn build_subtree(
        &mut self,
        base_index: usize,
        aabb: Aabb,
        total_cost: f64,
        x: TripleList,
        y: TripleList,
        z: TripleList,
        object_aabbs: &mut [Aabb],
        status: &mut [u8],
        extent_in_box: &impl Fn(usize, &Aabb) -> Option<Aabb>,
        depth: usize,
    ) -> usize {
        let Some(choice) = self.calc_best_split(&aabb, total_cost, &x, &y, &z) else {
            // No split improves on scanning the leaf directly.
            let objects = x
                .triples
                .iter()
                .filter(|t| t.kind != TripleKind::Max)
                .map(|t| t.object)
                .collect();
            self.nodes[base_index] = Node::Leaf { objects };
            return depth;
        };

        // A split with one empty side only trims empty space: recurse into
        // the single occupied child with a tightened box.
        if choice.no_objects_left == 0 || choice.no_objects_right == 0 {
            let child_index = self.next_index();
            let mut child_aabb = aabb;
            let (left, right) = if choice.no_objects_left == 0 {
                child_aabb.set_axis_min(choice.axis, choice.value);
                (None, Some(child_index))
            } else {
                child_aabb.set_axis_max(choice.axis, choice.value);
                (Some(child_index), None)
            };
            self.nodes[base_index] = Node::Split {
                axis: choice.axis,
                value: choice.value,
                left,
                right,
            };
            return self.build_subtree(
                child_index,
                child_aabb,
                total_cost,
                x,
                y,
                z,
                object_aabbs,
                status,
                extent_in_box,
                depth + 1,
            );
        }

        // Mark which side(s) every object of the split axis belongs to:
        // bit 1 = left, bit 2 = right, straddlers carry both.
        let split_list = match choice.axis {
            Axis::X => &x,
            Axis::Y => &y,
            Axis::Z => &z,
        };
        for triple in &split_list.triples[..choice.no_triples_left] {
            status[triple.object] = 1;
        }
        for triple in &split_list.triples[choice.no_triples_left..] {
            if triple.kind == TripleKind::Max {
                status[triple.object] |= 2;
            } else {
                status[triple.object] = 2;
            }
        }

        let mut left_aabb = aabb;
        left_aabb.set_axis_max(choice.axis, choice.value);
        let mut right_aabb = aabb;
        right_aabb.set_axis_min(choice.axis, choice.value);

        let left_index = self.next_index();
        let right_index = self.next_index();
        self.nodes[base_index] = Node::Split {
            axis: choice.axis,
            value: choice.value,
            left: Some(left_index),
            right: Some(right_index),
        };

        let (smaller_flag, smaller_index, smaller_aabb, larger_flag, larger_index, larger_aabb) =
            if choice.no_objects_left < choice.no_objects_right {
                (1, left_index, left_aabb, 2, right_index, right_aabb)
            } else {
                (2, right_index, right_aabb, 1, left_index, left_aabb)
            };

        // Re-clip the smaller side's objects first, then copy its triples,
        // then do the same for the larger side; the clip results live in
        // the shared per-object boxes, so the order matters.
        clip_side(smaller_flag, &x, &smaller_aabb, object_aabbs, status, extent_in_box);
        let new_x = copy_triples(smaller_flag, Axis::X, &x, object_aabbs, status);
        let new_y = copy_triples(smaller_flag, Axis::Y, &y, object_aabbs, status);
        let new_z = copy_triples(smaller_flag, Axis::Z, &z, object_aabbs, status);
        let smaller_cost = self.object_cost * convert::f64_from_usize(new_x.no_objects());

        clip_side(larger_flag, &x, &larger_aabb, object_aabbs, status, extent_in_box);
        let lx = copy_triples(larger_flag, Axis::X, &x, object_aabbs, status);
        let ly = copy_triples(larger_flag, Axis::Y, &y, object_aabbs, status);
        let lz = copy_triples(larger_flag, Axis::Z, &z, object_aabbs, status);
        let larger_cost = self.object_cost * convert::f64_from_usize(lx.no_objects());

        let depth_a = self.build_subtree(
            smaller_index,
            smaller_aabb,
            smaller_cost,
            new_x,
            new_y,
            new_z,
            object_aabbs,
            status,
            extent_in_box,
            depth + 1,
        );
        let depth_b = self.build_subtree(
            larger_index,
            larger_aabb,
            larger_cost,
            lx,
            ly,
            lz,
            object_aabbs,
            status,
            extent_in_box,
            depth + 1,
        );
        depth_a.max(depth_b)
    }

    /// Tries all three axes and returns the best split, or `None` when no
    /// split beats leaving this node a leaf.
    fn calc_best_split(
        &self,
        aabb: &Aabb,
        total_cost: f64,
        x: &TripleList,
        y: &TripleList,
        z: &TripleList,
    ) -> Option<SplitChoice> {
        let delta = *aabb.max() - *aabb.min();
        let surface_area = aabb.surface_area();
        let min_improve = (self.bounding_box_area / surface_area) * self.stopping_cost_per_ray;
        let mut cost_to_beat = total_cost - min_improve;
        if cost_to_beat <= 1.0 + 1.0e-7 {
            return None;
        }

        let mut best: Option<SplitChoice> = None;
        for (&axis, list) in Axis::ALL.iter().zip([x, y, z]) {
            let (min_on_axis, max_on_axis) = (aabb.min()[axis], aabb.max()[axis]);
            let (second, third) = match axis {
                Axis::X => (delta.y, delta.z),
                Axis::Y => (delta.x, delta.z),
                Axis::Z => (delta.x, delta.y),
            };
            if let Some((choice, cost)) = self.scan_axis(
                list,
                axis,
                min_on_axis,
                max_on_axis,
                second,
                third,
                cost_to_beat,
                total_cost,
            ) {
                cost_to_beat = cost;
                best = Some(choice);
            }
        }
        best
    }

    /// Sweeps one axis's sorted triples.  Returns the best split and its
    /// cost when one beats `cost_to_beat`.
    #[allow(clippy::too_many_arguments)]
    fn scan_axis(
        &self,
        list: &TripleList,
        axis: Axis,
        min_on_axis: f64,
        max_on_axis: f64,
        second_axis_len: f64,
        third_axis_len: f64,
        cost_to_beat: f64,
        total_cost: f64,
    ) -> Option<(SplitChoice, f64)> {
        if min_on_axis >= max_on_axis {
            // A zero-length axis cannot be split.
            return None;
        }

        let mut cost_fn = SplitCost::new(
            self.algorithm,
            min_on_axis,
            max_on_axis,
            second_axis_len,
            third_axis_len,
            cost_to_beat,
            total_cost,
        );

        let triples = &list.triples;
        let n = triples.len();
        let mid_point = 0.5 * (min_on_axis + max_on_axis);
        let mut in_first_half = true;
        let mut best: Option<(SplitChoice, f64)> = None;

        let mut ii = 0;
        let mut no_left = 0usize;
        let mut no_right = list.no_objects();
        let mut cost_left = 0.0;
        let mut cost_right = total_cost;

        while ii < n {
            let split_value = triples[ii].value;
            if in_first_half && split_value > mid_point {
                in_first_half = false;
            }

            // Objects ending here (and flats in the first half) count as
            // left of a split at this value.
            while ii < n
                && triples[ii].value <= split_value
                && (triples[ii].kind == TripleKind::Max
                    || (triples[ii].kind == TripleKind::Flat && in_first_half))
            {
                self.update_left_right(
                    triples[ii].kind,
                    &mut no_left,
                    &mut no_right,
                    &mut cost_left,
                    &mut cost_right,
                );
                ii += 1;
            }

            if let Some(cost) = cost_fn.eval(split_value, cost_left, cost_right) {
                best = Some((
                    SplitChoice {
                        axis,
                        value: split_value,
                        no_triples_left: ii,
                        no_objects_left: no_left,
                        no_objects_right: no_right,
                    },
                    cost,
                ));
            }

            // Objects starting here (and flats in the second half) only
            // move left once the sweep passes this value.
            while ii < n
                && triples[ii].value <= split_value
                && (triples[ii].kind == TripleKind::Min
                    || (triples[ii].kind == TripleKind::Flat && !in_first_half))
            {
                self.update_left_right(
                    triples[ii].kind,
                    &mut no_left,
                    &mut no_right,
                    &mut cost_left,
                    &mut cost_right,
                );
                ii += 1;
            }
        }
        best
    }

    fn update_left_right(
        &self,
        kind: TripleKind,
        no_left: &mut usize,
        no_right: &mut usize,
        cost_left: &mut f64,
        cost_right: &mut f64,
    ) {
        match kind {
            TripleKind::Max => {
                *no_right -= 1;
                *cost_right -= self.object_cost;
            }
            TripleKind::Flat => {
                *no_right -= 1;
                *cost_right -= self.object_cost;
                *no_left += 1;
                *cost_left += self.object_cost;
            }
            TripleKind::Min => {
                *no_left += 1;
                *cost_left += self.object_cost;
            }
        }
    }
}

/// Re-clips every object assigned to one side against the child box and
/// drops objects whose clipped extent vanished or collapsed to a line.
fn clip_side(
    side_flag: u8,
    reference_list: &TripleList,
    child_aabb: &Aabb,
    object_aabbs: &mut [Aabb],
    status: &mut [u8],
    extent_in_box: &impl Fn(usize, &Aabb) -> Option<Aabb>,
) {
    for triple in &reference_list.triples {
        let object = triple.object;
        if status[object] & side_flag == 0 {
            continue;
        }
        // A max on the left side or a min on the right side is interior to
        // the child box; skip the redundant clip for those records.
        if (triple.kind == TripleKind::Min && side_flag == 2)
            || (triple.kind == TripleKind::Max && side_flag == 1)
        {
            continue;
        }
        match extent_in_box(object, child_aabb) {
            Some(clipped) => {
                let flat_x = clipped.is_flat(Axis::X);
                let flat_y = clipped.is_flat(Axis::Y);
                let flat_z = clipped.is_flat(Axis::Z);
                object_aabbs[object] = clipped;
                if (flat_x && flat_y) || (flat_y && flat_z) || (flat_x && flat_z) {
                    status[object] &= !side_flag;
                }
            }
            None => status[object] &= !side_flag,
        }
    }
}

/// Rebuilds one axis's triple list for a subtree from the re-clipped
/// object boxes, preserving near-sortedness, then sorts.
fn copy_triples(
    side_flag: u8,
    axis: Axis,
    from: &TripleList,
    object_aabbs: &[Aabb],
    status: &[u8],
) -> TripleList {
    let mut to = TripleList::default();
    for triple in &from.triples {
        let object = triple.object;
        if status[object] & side_flag == 0 {
            continue;
        }
        let aabb = &object_aabbs[object];
        let (new_min, new_max) = (aabb.min()[axis], aabb.max()[axis]);
        match triple.kind {
            TripleKind::Min => {
                if new_min < new_max {
                    to.triples.push(ExtentTriple {
                        value: new_min,
                        kind: TripleKind::Min,
                        object,
                    });
                } else {
                    to.triples.push(ExtentTriple {
                        value: new_min,
                        kind: TripleKind::Flat,
                        object,
                    });
                    to.no_flats += 1;
                }
            }
            TripleKind::Flat => {
                to.triples.push(ExtentTriple {
                    value: triple.value,
                    kind: TripleKind::Flat,
                    object,
                });
                to.no_flats += 1;
            }
            TripleKind::Max => {
                // If the clipped box went flat the min record above
                // already emitted the flat for this object.
                if new_min < new_max {
                    to.triples.push(ExtentTriple {
                        value: new_max,
                        kind: TripleKind::Max,
                        object,
                    });
                    to.no_max_mins += 1;
                }
            }
        }
    }
    to.sort();
    to
}

/// Incremental split-cost evaluation for one axis sweep.
struct SplitCost {
    algorithm: SplitAlgorithm,
    min_on_axis: f64,
    axis_len_inv: f64,
    old_cost: f64,
    total_node_cost: f64,
    end_area: f64,
    wrap: f64,
    area: f64,
    // Double-recurse bookkeeping.
    coef_c: f64,
    coef_d: f64,
    exponent_to_beat: f64,
}

impl SplitCost {
    fn new(
        algorithm: SplitAlgorithm,
        min_on_axis: f64,
        max_on_axis: f64,
        second_axis_len: f64,
        third_axis_len: f64,
        cost_to_beat: f64,
        total_node_cost: f64,
    ) -> Self {
        let end_area = second_axis_len * third_axis_len;
        let wrap = 2.0 * (max_on_axis - min_on_axis) * (second_axis_len + third_axis_len);
        let area = 2.0f64.mul_add(end_area, wrap);
        let mut cost = Self {
            algorithm,
            min_on_axis,
            axis_len_inv: 1.0 / (max_on_axis - min_on_axis),
            old_cost: cost_to_beat,
            total_node_cost,
            end_area,
            wrap,
            area,
            coef_c: 0.0,
            coef_d: 0.0,
            exponent_to_beat: 1.0,
        };
        if algorithm == SplitAlgorithm::DoubleRecurse {
            if cost.end_area > 1.0e-14 * cost.area {
                cost.coef_d = -cost.area / (2.0 * cost.end_area);
                cost.coef_c = 1.0 - cost.coef_d;
                cost.exponent_to_beat =
                    ((cost_to_beat - cost.coef_d) / cost.coef_c).ln() / total_node_cost.ln();
            } else {
                // The end faces are negligible; treat them as exactly zero.
                cost.end_area = 0.0;
            }
        }
        cost
    }

    /// Returns the new best cost when the candidate split beats it.
    fn eval(&mut self, split_value: f64, cost_left: f64, cost_right: f64) -> Option<f64> {
        match self.algorithm {
            SplitAlgorithm::MacDonaldBooth => {
                let gamma = (split_value - self.min_on_axis) * self.axis_len_inv;
                let area_left = gamma.mul_add(self.wrap, 2.0 * self.end_area);
                let area_right = (1.0 - gamma).mul_add(self.wrap, 2.0 * self.end_area);
                let new_cost =
                    1.0 + area_left.mul_add(cost_left, area_right * cost_right) / self.area;
                if new_cost < self.old_cost {
                    self.old_cost = new_cost;
                    Some(new_cost)
                } else {
                    None
                }
            }
            SplitAlgorithm::DoubleRecurse => self.eval_double_recurse(split_value, cost_left, cost_right),
        }
    }

    fn eval_double_recurse(
        &mut self,
        split_value: f64,
        cost_left: f64,
        cost_right: f64,
    ) -> Option<f64> {
        let gamma = (split_value - self.min_on_axis) * self.axis_len_inv;
        let area_left = gamma.mul_add(self.wrap, 2.0 * self.end_area);
        let area_right = (1.0 - gamma).mul_add(self.wrap, 2.0 * self.end_area);
        let a = area_left / self.area;
        let b = area_right / self.area;
        let alpha = cost_left / self.total_node_cost;
        let beta = cost_right / self.total_node_cost;

        if cost_left == 0.0 || cost_right == 0.0 {
            let new_cost = if cost_left == 0.0 && b < 1.0 {
                1.0 / (1.0 - b)
            } else if cost_right == 0.0 && a < 1.0 {
                1.0 / (1.0 - a)
            } else {
                return None;
            };
            if new_cost < self.old_cost {
                self.old_cost = new_cost;
                if self.end_area != 0.0 {
                    self.exponent_to_beat =
                        ((new_cost - self.coef_d) / self.coef_c).ln() / self.total_node_cost.ln();
                }
                return Some(new_cost);
            }
            return None;
        }

        if self.end_area == 0.0 {
            if alpha == 0.0 || beta == 0.0 {
                return None;
            }
            let new_cost =
                1.0 - self.total_node_cost.ln() / a.mul_add(alpha.ln(), b * beta.ln());
            if new_cost < self.old_cost {
                self.old_cost = new_cost;
                return Some(new_cost);
            }
            return None;
        }

        let exponent = find_double_recurse_exponent(a, b, alpha, beta, self.exponent_to_beat)?;
        self.exponent_to_beat = exponent;
        self.old_cost = self
            .coef_c
            .mul_add(self.total_node_cost.powf(exponent), self.coef_d);
        Some(self.old_cost)
    }
}

/// Solves `a·alpha^e + b·beta^e = 1` for the exponent of the recursion
/// `f(n) = 1 + a f(alpha n) + b f(beta n)`, returning `None` unless the
/// solution beats `exponent_to_beat`.  The left side is decreasing in `e`,
/// so bisection on `[0, exponent_to_beat]` converges unconditionally.
fn find_double_recurse_exponent(
    a: f64,
    b: f64,
    alpha: f64,
    beta: f64,
    exponent_to_beat: f64,
) -> Option<f64> {
    let g = |e: f64| a.mul_add(alpha.powf(e), b * beta.powf(e));
    if g(exponent_to_beat) >= 1.0 {
        return None;
    }
    let mut lo = 0.0;
    let mut hi = exponent_to_beat;
    for _ in 0..60 {
        let mid = 0.5 * (lo + hi);
        if g(mid) >= 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Some(0.5 * (lo + hi))
}
