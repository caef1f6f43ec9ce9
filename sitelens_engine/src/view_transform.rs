//! Explode and mesh-spacing displacement.
//!
//! Both transforms are computed from the captured original positions, never
//! from the current ones, so switching between them or changing a factor
//! cannot accumulate drift. A zero factor copies the original position
//! unchanged.

use glam::Vec3;
use serde::Serialize;

use crate::binder::ElementBinder;
use crate::config::{ViewMode, ViewerConfig};
use crate::geometry::Aabb;
use crate::scene::SceneModel;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewTransformParams {
    pub mode: ViewMode,
    pub explode_factor: f32,
    pub mesh_spacing_percent: f32,
    pub floor_spacing_unit: f32,
}

impl ViewTransformParams {
    pub fn from_config(config: &ViewerConfig) -> Self {
        ViewTransformParams {
            mode: config.view_mode,
            explode_factor: config.explode_factor,
            mesh_spacing_percent: config.mesh_spacing_percent,
            floor_spacing_unit: config.floor_spacing_unit,
        }
    }
}

/// Vertical offset of a floor in the exploded view.
pub fn explode_offset(floor_level: i32, floor_spacing_unit: f32, explode_factor: f32) -> f32 {
    (floor_level - 1) as f32 * floor_spacing_unit * explode_factor
}

/// Centroid of the original model bounds and the mean distance from it to
/// each primitive's original centre.
pub fn spacing_basis(scene: &SceneModel) -> Option<(Vec3, f32)> {
    let bounds = scene.original_bounds();
    if !bounds.is_valid() {
        return None;
    }
    let centroid = bounds.center();
    let centres: Vec<Vec3> = scene
        .primitives()
        .iter()
        .map(|p| p.original_bounds())
        .filter(Aabb::is_valid)
        .map(|b| b.center())
        .collect();
    if centres.is_empty() {
        return None;
    }
    let average = centres.iter().map(|c| c.distance(centroid)).sum::<f32>() / centres.len() as f32;
    Some((centroid, average))
}

/// Target position of every primitive under `params`, by index.
pub fn compute_positions(
    scene: &SceneModel,
    binder: &ElementBinder,
    params: &ViewTransformParams,
) -> Vec<Vec3> {
    match params.mode {
        ViewMode::Exploded => scene
            .primitives()
            .iter()
            .map(|primitive| {
                let original = primitive.original_position();
                if params.explode_factor == 0.0 {
                    return original;
                }
                let offset = explode_offset(
                    binder.floor_for_index(primitive.index),
                    params.floor_spacing_unit,
                    params.explode_factor,
                );
                if offset == 0.0 {
                    original
                } else {
                    Vec3::new(original.x, original.y + offset, original.z)
                }
            })
            .collect(),
        ViewMode::Normal | ViewMode::Section | ViewMode::Xray => {
            let basis = if params.mesh_spacing_percent == 0.0 {
                None
            } else {
                spacing_basis(scene)
            };
            scene
                .primitives()
                .iter()
                .map(|primitive| {
                    let original = primitive.original_position();
                    let Some((centroid, average)) = basis else {
                        return original;
                    };
                    let bounds = primitive.original_bounds();
                    if !bounds.is_valid() {
                        return original;
                    }
                    let offset = bounds.center() - centroid;
                    if offset.length_squared() <= 1e-8 {
                        return original;
                    }
                    original + offset.normalize() * (params.mesh_spacing_percent / 100.0 * average)
                })
                .collect()
        }
    }
}

/// Applies view transforms when their inputs change.
#[derive(Debug, Clone, Default)]
pub struct ViewTransformEngine {
    applied: Option<ViewTransformParams>,
}

impl ViewTransformEngine {
    /// Force the next `update` to recompute, e.g. after floors changed
    /// through rebinding.
    pub fn invalidate(&mut self) {
        self.applied = None;
    }

    /// Move primitives to their targets. Returns the indices that moved.
    pub fn update(
        &mut self,
        scene: &mut SceneModel,
        binder: &ElementBinder,
        params: ViewTransformParams,
    ) -> Vec<u32> {
        if self.applied == Some(params) {
            return Vec::new();
        }
        let targets = compute_positions(scene, binder, &params);
        let mut moved = Vec::new();
        for (primitive, target) in scene.primitives_mut().iter_mut().zip(targets) {
            if primitive.position() != target {
                primitive.set_position(target);
                moved.push(primitive.index);
            }
        }
        if !moved.is_empty() {
            scene.bump_layout();
            log::debug!(
                "[view] {} mode moved {} primitives",
                params.mode,
                moved.len()
            );
        }
        self.applied = Some(params);
        moved
    }
}
