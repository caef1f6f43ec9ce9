//! CPU-side packing of a `SceneModel` into the flat vertex/index arrays and
//! per-primitive instances the mesh and pick pipelines draw from.
//!
//! Every primitive keeps its local-space vertices; its current position and
//! material travel in a `MeshInstance`, so view transforms and recolours only
//! rewrite instance slots instead of re-uploading geometry.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use sitelens_engine::{MeshPrimitive, PickingColorTable, SceneModel};

/// Opacity at or below which a primitive is not drawn at all.
const INVISIBLE_OPACITY: f32 = 1e-3;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SceneVertex {
    pub position: [f32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshInstance {
    /// World offset in xyz; w unused.
    pub offset: [f32; 4],
    pub color: [f32; 4],
}

impl MeshInstance {
    pub const HIDDEN: MeshInstance = MeshInstance {
        offset: [0.0; 4],
        color: [0.0; 4],
    };

    pub fn is_drawn(&self) -> bool {
        self.color[3] > INVISIBLE_OPACITY
    }

    pub fn is_opaque(&self) -> bool {
        self.color[3] >= 1.0
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct MeshUniforms {
    pub view_projection: [[f32; 4]; 4],
}

pub fn view_projection_uniform(matrix: Mat4) -> MeshUniforms {
    MeshUniforms {
        view_projection: to_matrix_columns(matrix),
    }
}

pub fn to_matrix_columns(matrix: Mat4) -> [[f32; 4]; 4] {
    matrix.to_cols_array_2d()
}

/// Slice of the shared index buffer belonging to one primitive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PrimitiveRange {
    pub first_index: u32,
    pub index_count: u32,
    pub base_vertex: i32,
}

impl PrimitiveRange {
    pub fn indices(&self) -> std::ops::Range<u32> {
        self.first_index..self.first_index + self.index_count
    }
}

#[derive(Debug, Default)]
pub struct PackedGeometry {
    pub vertices: Vec<SceneVertex>,
    pub indices: Vec<u32>,
    pub ranges: Vec<PrimitiveRange>,
    pub dropped_triangles: usize,
}

/// Concatenate every primitive's geometry. Ranges line up with primitive
/// indices; triangles that reference missing vertices are dropped.
pub fn pack_geometry(scene: &SceneModel) -> PackedGeometry {
    let mut packed = PackedGeometry {
        ranges: Vec::with_capacity(scene.len()),
        ..PackedGeometry::default()
    };
    for primitive in scene.primitives() {
        let base_vertex = packed.vertices.len() as i32;
        let first_index = packed.indices.len() as u32;
        packed.vertices.extend(primitive.vertices.iter().map(|v| SceneVertex {
            position: v.to_array(),
        }));
        let vertex_count = primitive.vertices.len() as u32;
        for tri in primitive.triangles.chunks_exact(3) {
            if tri.iter().all(|&i| i < vertex_count) {
                packed.indices.extend_from_slice(tri);
            } else {
                packed.dropped_triangles += 1;
            }
        }
        packed.ranges.push(PrimitiveRange {
            first_index,
            index_count: packed.indices.len() as u32 - first_index,
            base_vertex,
        });
    }
    if packed.dropped_triangles > 0 {
        log::warn!(
            "[sitelens_viewer] dropped {} triangles with out-of-range vertex indices",
            packed.dropped_triangles
        );
    }
    packed
}

pub fn shaded_instance(primitive: &MeshPrimitive) -> MeshInstance {
    let material = primitive.material();
    if !material.visible {
        return MeshInstance::HIDDEN;
    }
    let [r, g, b] = material.color;
    MeshInstance {
        offset: primitive.position().extend(0.0).to_array(),
        color: [r, g, b, material.opacity.clamp(0.0, 1.0)],
    }
}

pub fn shaded_instances(scene: &SceneModel) -> Vec<MeshInstance> {
    scene.primitives().iter().map(shaded_instance).collect()
}

/// Pick-pass instances: flat id colours, hidden primitives skipped.
pub fn pick_instances(scene: &SceneModel, table: &PickingColorTable) -> Vec<MeshInstance> {
    scene
        .primitives()
        .iter()
        .map(|primitive| {
            if !primitive.material().visible {
                return MeshInstance::HIDDEN;
            }
            match table.shader_color(primitive.index) {
                Some(color) => MeshInstance {
                    offset: primitive.position().extend(0.0).to_array(),
                    color,
                },
                None => MeshInstance::HIDDEN,
            }
        })
        .collect()
}

/// Collapse sorted indices into contiguous runs for batched buffer writes.
pub fn contiguous_runs(indices: &[u32]) -> Vec<std::ops::Range<u32>> {
    let mut runs: Vec<std::ops::Range<u32>> = Vec::new();
    for &index in indices {
        match runs.last_mut() {
            Some(run) if run.end == index => run.end += 1,
            Some(run) if run.contains(&index) => {}
            _ => runs.push(index..index + 1),
        }
    }
    runs
}
