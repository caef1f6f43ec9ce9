//! Index→primitive map for one loaded model.
//!
//! Every drawable primitive gets a stable `u32` index equal to its position in
//! the map. `original_position` is captured once when the scene is built and
//! never changes; view transforms move `position` and always start from the
//! original.

use glam::Vec3;
use serde::Serialize;
use sitelens_formats::{Dimensions, ElementKind, ElementRecord, ImportedPrimitive, ModelAsset};

use crate::geometry::Aabb;

/// Vertical distance between stacked floors in the synthetic scene.
pub const FLOOR_HEIGHT: f32 = 3.5;
/// Horizontal gap between neighbouring synthetic boxes on one floor.
const SYNTHETIC_GAP: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MaterialState {
    pub color: [f32; 3],
    pub opacity: f32,
    pub visible: bool,
}

impl Default for MaterialState {
    fn default() -> Self {
        MaterialState {
            color: [0.7, 0.7, 0.7],
            opacity: 1.0,
            visible: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneOrigin {
    Asset,
    Synthetic,
    Empty,
}

impl SceneOrigin {
    pub fn label(self) -> &'static str {
        match self {
            SceneOrigin::Asset => "asset",
            SceneOrigin::Synthetic => "synthetic",
            SceneOrigin::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MeshPrimitive {
    pub index: u32,
    pub label: String,
    /// Vertex positions relative to `position`.
    pub vertices: Vec<Vec3>,
    pub triangles: Vec<u32>,
    local_bounds: Aabb,
    original_position: Vec3,
    position: Vec3,
    material: MaterialState,
}

impl MeshPrimitive {
    pub fn new(index: u32, label: impl Into<String>, vertices: Vec<Vec3>, triangles: Vec<u32>, position: Vec3) -> Self {
        let local_bounds = Aabb::from_points(vertices.iter().copied());
        MeshPrimitive {
            index,
            label: label.into(),
            vertices,
            triangles,
            local_bounds,
            original_position: position,
            position,
            material: MaterialState::default(),
        }
    }

    fn from_imported(index: u32, imported: &ImportedPrimitive) -> Self {
        let vertices = imported.positions.iter().map(|&p| Vec3::from(p)).collect();
        MeshPrimitive::new(
            index,
            imported.label(),
            vertices,
            imported.indices.clone(),
            Vec3::from(imported.translation),
        )
    }

    pub fn original_position(&self) -> Vec3 {
        self.original_position
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub(crate) fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    pub fn material(&self) -> MaterialState {
        self.material
    }

    pub(crate) fn set_material(&mut self, material: MaterialState) {
        self.material = material;
    }

    pub fn local_bounds(&self) -> Aabb {
        self.local_bounds
    }

    pub fn world_bounds(&self) -> Aabb {
        self.local_bounds.translated(self.position)
    }

    pub fn original_bounds(&self) -> Aabb {
        self.local_bounds.translated(self.original_position)
    }

    /// World-space triangles. Triangles referencing missing vertices are
    /// dropped.
    pub fn world_triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.triangles.chunks_exact(3).filter_map(move |tri| {
            let a = self.vertices.get(tri[0] as usize)?;
            let b = self.vertices.get(tri[1] as usize)?;
            let c = self.vertices.get(tri[2] as usize)?;
            Some([*a + self.position, *b + self.position, *c + self.position])
        })
    }
}

/// Default box profile for elements without explicit dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementProfile {
    pub width: f32,
    pub height: f32,
    pub depth: f32,
}

/// Indexed by [`ElementKind::ordinal`].
const ELEMENT_PROFILES: [ElementProfile; ElementKind::ALL.len()] = [
    // wall
    ElementProfile { width: 4.0, height: 3.0, depth: 0.3 },
    // column
    ElementProfile { width: 0.5, height: 3.0, depth: 0.5 },
    // slab
    ElementProfile { width: 6.0, height: 0.3, depth: 6.0 },
    // beam
    ElementProfile { width: 5.0, height: 0.5, depth: 0.4 },
    // foundation
    ElementProfile { width: 6.0, height: 1.0, depth: 6.0 },
    // roof
    ElementProfile { width: 6.0, height: 0.4, depth: 6.0 },
    // other
    ElementProfile { width: 1.0, height: 1.0, depth: 1.0 },
];

pub fn element_profile(kind: ElementKind) -> ElementProfile {
    ELEMENT_PROFILES[kind.ordinal()]
}

impl ElementProfile {
    fn with_dimensions(self, dimensions: Option<&Dimensions>) -> Self {
        let pick = |value: Option<f32>, fallback: f32| match value {
            Some(v) if v.is_finite() && v > 0.0 => v,
            _ => fallback,
        };
        match dimensions {
            Some(dims) => ElementProfile {
                width: pick(dims.width, self.width),
                height: pick(dims.height, self.height),
                depth: pick(dims.depth, self.depth),
            },
            None => self,
        }
    }
}

/// Box resting on y = 0, centred on the origin in x and z.
pub fn box_geometry(width: f32, height: f32, depth: f32) -> (Vec<Vec3>, Vec<u32>) {
    let hw = width * 0.5;
    let hd = depth * 0.5;
    let h = height;

    let faces: [[Vec3; 4]; 6] = [
        // +Z
        [Vec3::new(-hw, 0.0, hd), Vec3::new(hw, 0.0, hd), Vec3::new(hw, h, hd), Vec3::new(-hw, h, hd)],
        // -Z
        [Vec3::new(hw, 0.0, -hd), Vec3::new(-hw, 0.0, -hd), Vec3::new(-hw, h, -hd), Vec3::new(hw, h, -hd)],
        // +X
        [Vec3::new(hw, 0.0, hd), Vec3::new(hw, 0.0, -hd), Vec3::new(hw, h, -hd), Vec3::new(hw, h, hd)],
        // -X
        [Vec3::new(-hw, 0.0, -hd), Vec3::new(-hw, 0.0, hd), Vec3::new(-hw, h, hd), Vec3::new(-hw, h, -hd)],
        // +Y
        [Vec3::new(-hw, h, hd), Vec3::new(hw, h, hd), Vec3::new(hw, h, -hd), Vec3::new(-hw, h, -hd)],
        // -Y
        [Vec3::new(-hw, 0.0, -hd), Vec3::new(hw, 0.0, -hd), Vec3::new(hw, 0.0, hd), Vec3::new(-hw, 0.0, hd)],
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for quad in &faces {
        let base = vertices.len() as u32;
        vertices.extend_from_slice(quad);
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

#[derive(Debug, Clone)]
pub struct SceneModel {
    primitives: Vec<MeshPrimitive>,
    origin: SceneOrigin,
    generation: u64,
    layout_version: u64,
}

impl SceneModel {
    pub fn empty() -> Self {
        SceneModel {
            primitives: Vec::new(),
            origin: SceneOrigin::Empty,
            generation: 0,
            layout_version: 0,
        }
    }

    pub fn from_asset(asset: &ModelAsset) -> Self {
        Self::from_imported(&asset.primitives)
    }

    /// Index assignment follows the import order: contiguous `[0, N)`.
    pub fn from_imported(primitives: &[ImportedPrimitive]) -> Self {
        let primitives = primitives
            .iter()
            .enumerate()
            .map(|(index, imported)| MeshPrimitive::from_imported(index as u32, imported))
            .collect();
        SceneModel {
            primitives,
            origin: SceneOrigin::Asset,
            generation: 0,
            layout_version: 0,
        }
    }

    /// Stand-in scene with one box per element, stacked by floor. Element
    /// `i` becomes primitive `i`.
    pub fn synthetic(records: &[ElementRecord]) -> Self {
        if records.is_empty() {
            return SceneModel::empty();
        }

        let sizes: Vec<ElementProfile> = records
            .iter()
            .map(|record| {
                element_profile(record.element_type).with_dimensions(record.dimensions.as_ref())
            })
            .collect();
        let pitch = sizes
            .iter()
            .map(|size| size.width.max(size.depth))
            .fold(0.0f32, f32::max)
            + SYNTHETIC_GAP;

        // Slot of each element inside its floor, in input order.
        let mut per_floor: std::collections::BTreeMap<i32, usize> = Default::default();
        let slots: Vec<(i32, usize)> = records
            .iter()
            .map(|record| {
                let slot = per_floor.entry(record.floor_level).or_insert(0);
                let current = *slot;
                *slot += 1;
                (record.floor_level, current)
            })
            .collect();

        let primitives = records
            .iter()
            .zip(sizes.iter().zip(slots))
            .enumerate()
            .map(|(index, (record, (size, (floor, slot))))| {
                let floor_count = per_floor.get(&floor).copied().unwrap_or(1);
                let columns = (floor_count as f32).sqrt().ceil().max(1.0) as usize;
                let rows = floor_count.div_ceil(columns);
                let (row, column) = (slot / columns, slot % columns);
                let x = (column as f32 - (columns as f32 - 1.0) * 0.5) * pitch;
                let z = (row as f32 - (rows as f32 - 1.0) * 0.5) * pitch;
                let y = (floor - 1) as f32 * FLOOR_HEIGHT;
                let (vertices, triangles) = box_geometry(size.width, size.height, size.depth);
                let label = if record.name.is_empty() {
                    format!("{} {}", record.element_type.label(), record.id)
                } else {
                    record.name.clone()
                };
                MeshPrimitive::new(index as u32, label, vertices, triangles, Vec3::new(x, y, z))
            })
            .collect();

        SceneModel {
            primitives,
            origin: SceneOrigin::Synthetic,
            generation: 0,
            layout_version: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    pub fn origin(&self) -> SceneOrigin {
        self.origin
    }

    /// Identity of the loaded model; bumped by the controller on every load.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    /// Bumped whenever any primitive position changes.
    pub fn layout_version(&self) -> u64 {
        self.layout_version
    }

    pub(crate) fn bump_layout(&mut self) {
        self.layout_version += 1;
    }

    pub fn get(&self, index: u32) -> Option<&MeshPrimitive> {
        self.primitives.get(index as usize)
    }

    pub(crate) fn get_mut(&mut self, index: u32) -> Option<&mut MeshPrimitive> {
        self.primitives.get_mut(index as usize)
    }

    pub fn contains(&self, index: u32) -> bool {
        (index as usize) < self.primitives.len()
    }

    pub fn primitives(&self) -> &[MeshPrimitive] {
        &self.primitives
    }

    pub(crate) fn primitives_mut(&mut self) -> &mut [MeshPrimitive] {
        &mut self.primitives
    }

    pub fn indices(&self) -> std::ops::Range<u32> {
        0..self.primitives.len() as u32
    }

    /// Union of every valid world-space primitive bound.
    pub fn bounds(&self) -> Aabb {
        self.primitives
            .iter()
            .map(MeshPrimitive::world_bounds)
            .filter(Aabb::is_valid)
            .fold(Aabb::EMPTY, |acc, b| acc.union(&b))
    }

    /// Like [`SceneModel::bounds`] but at the captured original positions.
    pub fn original_bounds(&self) -> Aabb {
        self.primitives
            .iter()
            .map(MeshPrimitive::original_bounds)
            .filter(Aabb::is_valid)
            .fold(Aabb::EMPTY, |acc, b| acc.union(&b))
    }

    pub fn triangle_count(&self) -> usize {
        self.primitives.iter().map(|p| p.triangles.len() / 3).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitelens_formats::ElementKind;

    fn imported(name: &str, translation: [f32; 3]) -> ImportedPrimitive {
        ImportedPrimitive {
            node_name: Some(name.to_string()),
            mesh_name: None,
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            indices: vec![0, 1, 2],
            translation,
        }
    }

    #[test]
    fn indices_follow_import_order() {
        let scene = SceneModel::from_imported(&[
            imported("a", [0.0, 0.0, 0.0]),
            imported("b", [5.0, 0.0, 0.0]),
            imported("c", [0.0, 5.0, 0.0]),
        ]);
        assert_eq!(scene.len(), 3);
        assert_eq!(scene.origin(), SceneOrigin::Asset);
        for (expected, primitive) in scene.primitives().iter().enumerate() {
            assert_eq!(primitive.index, expected as u32);
            assert_eq!(primitive.position(), primitive.original_position());
        }
        assert_eq!(scene.get(1).unwrap().label, "b");
        assert!(scene.get(3).is_none());
        assert_eq!(scene.bounds().max, Vec3::new(6.0, 6.0, 0.0));
    }

    #[test]
    fn world_triangles_skip_dangling_indices() {
        let mut raw = imported("a", [1.0, 0.0, 0.0]);
        raw.indices.extend_from_slice(&[0, 1, 9]);
        let scene = SceneModel::from_imported(&[raw]);
        let triangles: Vec<_> = scene.get(0).unwrap().world_triangles().collect();
        assert_eq!(triangles.len(), 1);
        assert_eq!(triangles[0][0], Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn synthetic_scene_stacks_floors() {
        let mut ground = ElementRecord::new("1", "Ground wall", ElementKind::Wall);
        ground.floor_level = 1;
        let mut upper = ElementRecord::new("2", "Upper slab", ElementKind::Slab);
        upper.floor_level = 3;
        let mut custom = ElementRecord::new("3", "", ElementKind::Column);
        custom.dimensions = Some(Dimensions {
            width: Some(2.0),
            height: None,
            depth: Some(-1.0),
        });

        let scene = SceneModel::synthetic(&[ground, upper, custom]);
        assert_eq!(scene.origin(), SceneOrigin::Synthetic);
        assert_eq!(scene.len(), 3);
        assert_eq!(scene.get(0).unwrap().position().y, 0.0);
        assert_eq!(scene.get(1).unwrap().position().y, 2.0 * FLOOR_HEIGHT);

        let column = scene.get(2).unwrap();
        assert_eq!(column.label, "column 3");
        let size = column.local_bounds().size();
        assert_eq!(size, Vec3::new(2.0, 3.0, 0.5));

        // Two elements on floor 1 must not overlap.
        let a = scene.get(0).unwrap().world_bounds();
        let c = column.world_bounds();
        assert!(!a.intersects(&c));
    }

    #[test]
    fn synthetic_scene_of_nothing_is_empty() {
        let scene = SceneModel::synthetic(&[]);
        assert!(scene.is_empty());
        assert_eq!(scene.origin(), SceneOrigin::Empty);
    }

    #[test]
    fn every_kind_has_a_profile() {
        for kind in ElementKind::ALL {
            let profile = element_profile(kind);
            assert!(profile.width > 0.0 && profile.height > 0.0 && profile.depth > 0.0);
        }
    }
}
