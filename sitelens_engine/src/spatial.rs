//! Octree over primitive world bounds.
//!
//! Nodes live in a flat arena. A primitive is stored in the deepest node whose
//! box fully contains its bounds, so large primitives stay high in the tree.
//! Primitives with unusable bounds are excluded from the tree and flip the
//! index into linear-scan mode for the rest of the session.

use glam::Vec3;
use thiserror::Error;

use crate::geometry::{Aabb, Frustum, Ray, ray_aabb, ray_triangle};
use crate::scene::SceneModel;

pub const MAX_DEPTH: u32 = 8;
pub const LEAF_CAPACITY: usize = 8;

#[derive(Debug, Error, PartialEq)]
pub enum SpatialError {
    #[error("primitive {index} has unusable bounds ({min:?} .. {max:?})")]
    InvalidBounds { index: u32, min: Vec3, max: Vec3 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub index: u32,
    pub distance: f32,
}

#[derive(Debug, Clone)]
struct OctreeNode {
    bounds: Aabb,
    depth: u32,
    children: Option<[usize; 8]>,
    items: Vec<u32>,
}

impl OctreeNode {
    fn new(bounds: Aabb, depth: u32) -> Self {
        OctreeNode {
            bounds,
            depth,
            children: None,
            items: Vec::new(),
        }
    }

    fn octant_bounds(&self, octant: usize) -> Aabb {
        let center = self.bounds.center();
        let pick = |bit: usize, axis: usize| {
            if octant & bit == 0 {
                (self.bounds.min[axis], center[axis])
            } else {
                (center[axis], self.bounds.max[axis])
            }
        };
        let (x0, x1) = pick(1, 0);
        let (y0, y1) = pick(2, 1);
        let (z0, z1) = pick(4, 2);
        Aabb::new(Vec3::new(x0, y0, z0), Vec3::new(x1, y1, z1))
    }
}

#[derive(Debug, Clone)]
pub struct SpatialIndex {
    nodes: Vec<OctreeNode>,
    item_bounds: Vec<Aabb>,
    excluded: Vec<u32>,
    linear_scan: bool,
}

impl SpatialIndex {
    pub fn build(scene: &SceneModel) -> Self {
        let mut index = SpatialIndex {
            nodes: Vec::new(),
            item_bounds: Vec::new(),
            excluded: Vec::new(),
            linear_scan: false,
        };
        index.refit(scene);
        index
    }

    /// Rebuild from the current world bounds. Linear-scan mode, once entered,
    /// is kept.
    pub fn refit(&mut self, scene: &SceneModel) {
        self.nodes.clear();
        self.excluded.clear();
        self.item_bounds = scene.primitives().iter().map(|p| p.world_bounds()).collect();

        let mut valid = Vec::with_capacity(self.item_bounds.len());
        for (index, bounds) in self.item_bounds.iter().enumerate() {
            match check_bounds(index as u32, bounds) {
                Ok(()) => valid.push(index as u32),
                Err(err) => {
                    if !self.linear_scan {
                        log::warn!("[spatial] {err}; switching to linear scan");
                    }
                    self.linear_scan = true;
                    self.excluded.push(index as u32);
                }
            }
        }

        let root_bounds = valid
            .iter()
            .fold(Aabb::EMPTY, |acc, &i| acc.union(&self.item_bounds[i as usize]));
        if !root_bounds.is_valid() {
            return;
        }
        let half = root_bounds.size().max_element().max(f32::EPSILON) * 0.5;
        let center = root_bounds.center();
        self.nodes
            .push(OctreeNode::new(Aabb::new(center - Vec3::splat(half), center + Vec3::splat(half)), 0));

        for index in valid {
            self.insert(index);
        }
        log::debug!(
            "[spatial] octree with {} nodes over {} primitives ({} excluded)",
            self.nodes.len(),
            self.item_bounds.len(),
            self.excluded.len()
        );
    }

    fn insert(&mut self, index: u32) {
        let bounds = self.item_bounds[index as usize];
        let mut node = 0;
        loop {
            if let Some(children) = self.nodes[node].children {
                match children
                    .iter()
                    .find(|&&child| self.nodes[child].bounds.contains(&bounds))
                {
                    Some(&child) => node = child,
                    None => {
                        self.nodes[node].items.push(index);
                        return;
                    }
                }
                continue;
            }

            self.nodes[node].items.push(index);
            if self.nodes[node].items.len() > LEAF_CAPACITY && self.nodes[node].depth < MAX_DEPTH {
                self.split(node);
            }
            return;
        }
    }

    fn split(&mut self, node: usize) {
        let depth = self.nodes[node].depth + 1;
        let first = self.nodes.len();
        for octant in 0..8 {
            let bounds = self.nodes[node].octant_bounds(octant);
            self.nodes.push(OctreeNode::new(bounds, depth));
        }
        let children = std::array::from_fn(|octant| first + octant);
        self.nodes[node].children = Some(children);

        let items = std::mem::take(&mut self.nodes[node].items);
        for index in items {
            let bounds = self.item_bounds[index as usize];
            match children
                .iter()
                .find(|&&child| self.nodes[child].bounds.contains(&bounds))
            {
                Some(&child) => self.nodes[child].items.push(index),
                None => self.nodes[node].items.push(index),
            }
        }
    }

    pub fn is_linear_scan(&self) -> bool {
        self.linear_scan
    }

    pub fn excluded(&self) -> &[u32] {
        &self.excluded
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Nearest primitive hit by `ray` among those `accept` lets through.
    /// Ties resolve to the lower index.
    pub fn raycast<F>(&self, scene: &SceneModel, ray: &Ray, accept: F) -> Option<RayHit>
    where
        F: Fn(u32) -> bool,
    {
        let mut best: Option<RayHit> = None;
        let consider = |index: u32, best: &mut Option<RayHit>| {
            if !accept(index) {
                return;
            }
            let Some(primitive) = scene.get(index) else {
                return;
            };
            for [a, b, c] in primitive.world_triangles() {
                if let Some(distance) = ray_triangle(ray, a, b, c) {
                    let closer = match best {
                        Some(hit) => {
                            distance < hit.distance
                                || (distance == hit.distance && index < hit.index)
                        }
                        None => true,
                    };
                    if closer {
                        *best = Some(RayHit { index, distance });
                    }
                }
            }
        };

        if self.linear_scan {
            for index in scene.indices() {
                consider(index, &mut best);
            }
            return best;
        }

        let mut stack = Vec::new();
        if !self.nodes.is_empty() {
            stack.push(0usize);
        }
        while let Some(node) = stack.pop() {
            let node = &self.nodes[node];
            let Some(entry) = ray_aabb(ray, &node.bounds) else {
                continue;
            };
            if best.is_some_and(|hit| entry > hit.distance) {
                continue;
            }
            for &index in &node.items {
                let reachable = ray_aabb(ray, &self.item_bounds[index as usize])
                    .is_some_and(|t| best.is_none_or(|hit| t <= hit.distance));
                if reachable {
                    consider(index, &mut best);
                }
            }
            if let Some(children) = node.children {
                stack.extend(children);
            }
        }
        best
    }

    /// Primitives whose bounds touch the frustum, ascending. Excluded
    /// primitives cannot be culled and are always included.
    pub fn query_frustum(&self, frustum: &Frustum) -> Vec<u32> {
        let mut found: Vec<u32> = if self.linear_scan {
            self.item_bounds
                .iter()
                .enumerate()
                .filter(|(_, bounds)| !bounds.is_valid() || frustum.intersects_aabb(bounds))
                .map(|(index, _)| index as u32)
                .collect()
        } else {
            let mut found = self.excluded.clone();
            let mut stack = Vec::new();
            if !self.nodes.is_empty() {
                stack.push(0usize);
            }
            while let Some(node) = stack.pop() {
                let node = &self.nodes[node];
                if !frustum.intersects_aabb(&node.bounds) {
                    continue;
                }
                found.extend(
                    node.items
                        .iter()
                        .copied()
                        .filter(|&index| frustum.intersects_aabb(&self.item_bounds[index as usize])),
                );
                if let Some(children) = node.children {
                    stack.extend(children);
                }
            }
            found
        };
        found.sort_unstable();
        found.dedup();
        found
    }
}

fn check_bounds(index: u32, bounds: &Aabb) -> Result<(), SpatialError> {
    if bounds.is_valid() {
        Ok(())
    } else {
        Err(SpatialError::InvalidBounds {
            index,
            min: bounds.min,
            max: bounds.max,
        })
    }
}
