use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::aabb::Aabb;

const SAH_BINS: usize = 12;
const TRAVERSAL_COST: f32 = 1.0;
const INTERSECT_COST: f32 = 1.0;

/// `left_first` is the left child index when `tri_count == 0` (interior),
/// otherwise the first triangle of the leaf range. Children are always
/// allocated as a consecutive pair, so the right child is `left_first + 1`.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct BvhNode {
    pub bounds: Aabb,
    pub left_first: u32,
    pub tri_count: u32,
}

impl BvhNode {
    pub fn is_leaf(&self) -> bool {
        self.tri_count > 0
    }
}

pub struct Bvh {
    nodes: Vec<BvhNode>,
    indices: Vec<u32>,
}

fn update_node_bounds(node: &mut BvhNode, indices: &[u32], tri_bounds: &[Aabb]) {
    node.bounds = Aabb::EMPTY;
    for i in node.left_first..node.left_first + node.tri_count {
        node.bounds.grow_aabb(&tri_bounds[indices[i as usize] as usize]);
    }
}

impl Bvh {
    /// Binned SAH build over per-triangle bounds. `indices()` afterwards is
    /// the permutation to apply to the triangle arrays so leaf ranges are
    /// contiguous.
    pub fn build(tri_bounds: &[Aabb]) -> Bvh {
        let count = tri_bounds.len() as u32;
        if count == 0 {
            return Bvh {
                nodes: Vec::new(),
                indices: Vec::new(),
            };
        }

        let centroids: Vec<Vec3> = tri_bounds.iter().map(|b| b.centroid()).collect();
        let mut indices: Vec<u32> = (0..count).collect();

        // Worst case is 2N-1 nodes; trim after the build.
        let empty = BvhNode {
            bounds: Aabb::EMPTY,
            left_first: 0,
            tri_count: 0,
        };
        let mut nodes = vec![empty; 2 * count as usize];
        nodes[0].tri_count = count;
        update_node_bounds(&mut nodes[0], &indices, tri_bounds);
        let mut used = 1usize;

        let mut stack = vec![0usize];
        while let Some(node_idx) = stack.pop() {
            let (first, tri_count) = (nodes[node_idx].left_first, nodes[node_idx].tri_count);
            if tri_count <= 2 {
                continue;
            }

            let mut centroid_bounds = Aabb::EMPTY;
            for i in first..first + tri_count {
                centroid_bounds.grow(centroids[indices[i as usize] as usize]);
            }

            let parent_area = nodes[node_idx].bounds.half_area();
            let mut best_cost = f32::MAX;
            let mut best_axis = None;
            let mut best_split = 0.0f32;

            for axis in 0..3 {
                let bounds_min = centroid_bounds.min[axis];
                let bounds_max = centroid_bounds.max[axis];
                if bounds_min == bounds_max {
                    continue;
                }

                #[derive(Clone, Copy)]
                struct Bin {
                    bounds: Aabb,
                    count: u32,
                }
                let mut bins = [Bin {
                    bounds: Aabb::EMPTY,
                    count: 0,
                }; SAH_BINS];
                let scale = SAH_BINS as f32 / (bounds_max - bounds_min);

                for i in first..first + tri_count {
                    let tri = indices[i as usize] as usize;
                    let bin =
                        (((centroids[tri][axis] - bounds_min) * scale) as usize).min(SAH_BINS - 1);
                    bins[bin].count += 1;
                    bins[bin].bounds.grow_aabb(&tri_bounds[tri]);
                }

                // Two linear sweeps build the prefix/suffix sums in O(bins).
                let mut left_area = [0.0f32; SAH_BINS - 1];
                let mut right_area = [0.0f32; SAH_BINS - 1];
                let mut left_count = [0u32; SAH_BINS - 1];
                let mut right_count = [0u32; SAH_BINS - 1];
                let mut left_bounds = Aabb::EMPTY;
                let mut right_bounds = Aabb::EMPTY;
                let mut left_sum = 0u32;
                let mut right_sum = 0u32;
                for i in 0..SAH_BINS - 1 {
                    left_sum += bins[i].count;
                    left_bounds.grow_aabb(&bins[i].bounds);
                    left_count[i] = left_sum;
                    left_area[i] = left_bounds.half_area();

                    let ri = SAH_BINS - 1 - i;
                    right_sum += bins[ri].count;
                    right_bounds.grow_aabb(&bins[ri].bounds);
                    right_count[ri - 1] = right_sum;
                    right_area[ri - 1] = right_bounds.half_area();
                }

                for i in 0..SAH_BINS - 1 {
                    // Splits with an empty side evaluate to NaN (0 * inf)
                    // and fail the comparison below.
                    let cost = TRAVERSAL_COST
                        + INTERSECT_COST
                            * (left_count[i] as f32 * left_area[i]
                                + right_count[i] as f32 * right_area[i])
                            / parent_area;
                    if cost < best_cost {
                        best_cost = cost;
                        best_axis = Some(axis);
                        best_split = bounds_min + (i + 1) as f32 / scale;
                    }
                }
            }

            let Some(axis) = best_axis else { continue };
            if best_cost >= tri_count as f32 * INTERSECT_COST {
                continue; // no split beats the leaf cost
            }

            // Partition the index range in place by centroid.
            let mut left = first as i64;
            let mut right = (first + tri_count) as i64 - 1;
            while left <= right {
                if centroids[indices[left as usize] as usize][axis] < best_split {
                    left += 1;
                } else {
                    indices.swap(left as usize, right as usize);
                    right -= 1;
                }
            }

            let left_tri_count = left as u32 - first;
            if left_tri_count == 0 || left_tri_count == tri_count {
                continue; // degenerate partition, keep as leaf
            }

            let left_idx = used;
            let right_idx = used + 1;
            used += 2;

            nodes[left_idx].left_first = first;
            nodes[left_idx].tri_count = left_tri_count;
            nodes[right_idx].left_first = left as u32;
            nodes[right_idx].tri_count = tri_count - left_tri_count;
            nodes[node_idx].left_first = left_idx as u32;
            nodes[node_idx].tri_count = 0;

            update_node_bounds(&mut nodes[left_idx], &indices, tri_bounds);
            update_node_bounds(&mut nodes[right_idx], &indices, tri_bounds);

            stack.push(right_idx);
            stack.push(left_idx);
        }

        nodes.truncate(used);
        Bvh { nodes, indices }
    }

    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    /// Permutation mapping leaf-order slots back to input triangle indices.
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    pub fn memory_bytes(&self) -> usize {
        self.nodes.capacity() * std::mem::size_of::<BvhNode>()
            + self.indices.capacity() * std::mem::size_of::<u32>()
    }

    pub fn root_bounds(&self) -> Aabb {
        self.nodes.first().map_or(Aabb::EMPTY, |n| n.bounds)
    }

    /// Total SAH cost relative to the root area; useful as a build-quality
    /// regression guard.
    pub fn sah_cost(&self) -> f32 {
        let Some(root) = self.nodes.first() else {
            return 0.0;
        };
        let root_area = root.bounds.half_area();
        if root_area <= 0.0 {
            return 0.0;
        }
        let mut cost = 0.0;
        for node in &self.nodes {
            if node.is_leaf() {
                cost += node.bounds.half_area() * node.tri_count as f32 * INTERSECT_COST;
            } else {
                cost += node.bounds.half_area() * TRAVERSAL_COST;
            }
        }
        cost / root_area
    }
}
