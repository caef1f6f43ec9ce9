//! Reference rasteriser for pick queries.
//!
//! Follows the same rules the GPU pick pass runs under: sample at pixel
//! centres, top-left fill rule, clip against the near plane (clip z >= 0),
//! depth test `Less` against a buffer cleared to 1.0, no face culling.
//! Primitives are drawn in ascending index order so equal-depth ties resolve
//! the same way every time.

use glam::{Mat4, Vec2, Vec3, Vec4};

use super::{IdBuffer, PickError, PickingBackend, PickingColorTable, PixelRegion, Viewport};
use crate::scene::{MeshPrimitive, SceneModel};

/// Region-sized colour and depth target.
#[derive(Debug, Clone)]
pub struct RegionTarget {
    region: PixelRegion,
    depth: Vec<f32>,
    ids: Vec<u32>,
}

impl RegionTarget {
    pub fn new(region: PixelRegion) -> Self {
        let len = region.pixel_count();
        RegionTarget {
            region,
            depth: vec![1.0; len],
            ids: vec![0; len],
        }
    }

    pub fn region(&self) -> PixelRegion {
        self.region
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn into_ids(self) -> Vec<u32> {
        self.ids
    }
}

#[derive(Debug, Clone, Copy)]
struct ScreenVertex {
    pos: Vec2,
    depth: f32,
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

fn is_top_left(a: Vec2, b: Vec2) -> bool {
    let d = b - a;
    (d.y == 0.0 && d.x > 0.0) || d.y < 0.0
}

fn covers(value: f32, top_left: bool) -> bool {
    value > 0.0 || (value == 0.0 && top_left)
}

/// Sutherland-Hodgman against the clip-space near plane `z = 0`.
fn clip_near(polygon: &[Vec4]) -> Vec<Vec4> {
    let mut out = Vec::with_capacity(polygon.len() + 1);
    for (i, &current) in polygon.iter().enumerate() {
        let next = polygon[(i + 1) % polygon.len()];
        let current_in = current.z >= 0.0;
        let next_in = next.z >= 0.0;
        if current_in {
            out.push(current);
        }
        if current_in != next_in {
            let t = current.z / (current.z - next.z);
            out.push(current + (next - current) * t);
        }
    }
    out
}

fn to_screen(clip: Vec4, viewport: Viewport) -> Option<ScreenVertex> {
    if clip.w <= f32::EPSILON || !clip.is_finite() {
        return None;
    }
    let ndc = clip.truncate() / clip.w;
    Some(ScreenVertex {
        pos: Vec2::new(
            (ndc.x + 1.0) * 0.5 * viewport.width as f32,
            (1.0 - ndc.y) * 0.5 * viewport.height as f32,
        ),
        depth: ndc.z,
    })
}

fn fill_triangle(target: &mut RegionTarget, v: [ScreenVertex; 3], id: u32) {
    let (a, mut b, mut c) = (v[0], v[1], v[2]);
    let mut area = edge(a.pos, b.pos, c.pos);
    if area == 0.0 || !area.is_finite() {
        return;
    }
    if area < 0.0 {
        std::mem::swap(&mut b, &mut c);
        area = -area;
    }

    let region = target.region;
    let min = a.pos.min(b.pos).min(c.pos);
    let max = a.pos.max(b.pos).max(c.pos);
    let x_start = (min.x.floor().max(region.x as f32)) as u32;
    let y_start = (min.y.floor().max(region.y as f32)) as u32;
    let x_end = (max.x.ceil().min(region.right() as f32)).max(0.0) as u32;
    let y_end = (max.y.ceil().min(region.bottom() as f32)).max(0.0) as u32;

    let tl_bc = is_top_left(b.pos, c.pos);
    let tl_ca = is_top_left(c.pos, a.pos);
    let tl_ab = is_top_left(a.pos, b.pos);

    for py in y_start..y_end {
        for px in x_start..x_end {
            let p = Vec2::new(px as f32 + 0.5, py as f32 + 0.5);
            let w0 = edge(b.pos, c.pos, p);
            let w1 = edge(c.pos, a.pos, p);
            let w2 = edge(a.pos, b.pos, p);
            if !(covers(w0, tl_bc) && covers(w1, tl_ca) && covers(w2, tl_ab)) {
                continue;
            }
            let depth = (w0 * a.depth + w1 * b.depth + w2 * c.depth) / area;
            if !(0.0..=1.0).contains(&depth) {
                continue;
            }
            let slot = ((py - region.y) * region.width + (px - region.x)) as usize;
            if depth < target.depth[slot] {
                target.depth[slot] = depth;
                target.ids[slot] = id;
            }
        }
    }
}

/// Draw one primitive into `target`, writing `id` where it wins the depth
/// test.
pub fn rasterize_primitive(
    target: &mut RegionTarget,
    clip_from_world: Mat4,
    viewport: Viewport,
    primitive: &MeshPrimitive,
    id: u32,
) {
    for [a, b, c] in primitive.world_triangles() {
        let clip: [Vec4; 3] = [a, b, c].map(|p: Vec3| clip_from_world * p.extend(1.0));
        let polygon = if clip.iter().all(|v| v.z >= 0.0) {
            clip.to_vec()
        } else {
            clip_near(&clip)
        };
        if polygon.len() < 3 {
            continue;
        }
        let Some(screen) = polygon
            .iter()
            .map(|&v| to_screen(v, viewport))
            .collect::<Option<Vec<_>>>()
        else {
            continue;
        };
        for i in 1..screen.len() - 1 {
            fill_triangle(target, [screen[0], screen[i], screen[i + 1]], id);
        }
    }
}

/// Render the given primitives (ascending) and return the raw id target.
pub fn rasterize_region<I>(
    scene: &SceneModel,
    candidates: I,
    view_proj: Mat4,
    viewport: Viewport,
    region: PixelRegion,
    mut id_for: impl FnMut(u32) -> Option<u32>,
) -> RegionTarget
where
    I: IntoIterator<Item = u32>,
{
    let mut target = RegionTarget::new(region);
    for index in candidates {
        let Some(primitive) = scene.get(index) else {
            continue;
        };
        if !primitive.material().visible {
            continue;
        }
        let Some(id) = id_for(index) else {
            continue;
        };
        rasterize_primitive(&mut target, view_proj, viewport, primitive, id);
    }
    target
}

/// Deterministic stand-in for the GPU pick pass. Draws every visible
/// primitive with its table colour and reads the result back through the
/// same RGBA decode the GPU path uses.
#[derive(Debug, Default)]
pub struct SoftwarePickBackend {
    queries: u64,
}

impl SoftwarePickBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queries(&self) -> u64 {
        self.queries
    }
}

impl PickingBackend for SoftwarePickBackend {
    fn name(&self) -> &str {
        "software"
    }

    fn render_region(
        &mut self,
        scene: &SceneModel,
        table: &PickingColorTable,
        view_proj: Mat4,
        viewport: Viewport,
        region: PixelRegion,
    ) -> Result<IdBuffer, PickError> {
        region.check_within(viewport)?;
        self.queries += 1;
        let target = rasterize_region(scene, scene.indices(), view_proj, viewport, region, |index| {
            table.encode(index).map(super::pack_color)
        });
        let mut rgba = Vec::with_capacity(region.pixel_count() * 4);
        for &raw in target.ids() {
            let [r, g, b] = super::unpack_color(raw);
            rgba.extend_from_slice(&[r, g, b, 255]);
        }
        IdBuffer::from_rgba(region, &rgba, region.width as usize * 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneModel;
    use sitelens_formats::ImportedPrimitive;

    fn quad(name: &str, min: [f32; 2], max: [f32; 2], z: f32) -> ImportedPrimitive {
        ImportedPrimitive {
            node_name: Some(name.to_string()),
            mesh_name: None,
            positions: vec![
                [min[0], min[1], z],
                [max[0], min[1], z],
                [max[0], max[1], z],
                [min[0], max[1], z],
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
            translation: [0.0; 3],
        }
    }

    /// Orthographic camera where world x/y map 1:1 onto a 10x10 pixel
    /// viewport with y up.
    fn pixel_camera() -> (Mat4, Viewport) {
        let proj = Mat4::orthographic_rh(0.0, 10.0, 0.0, 10.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 50.0), Vec3::new(0.0, 0.0, 0.0), Vec3::Y);
        (proj * view, Viewport::new(10, 10))
    }

    #[test]
    fn adjacent_quads_share_edges_without_overlap() {
        let scene = SceneModel::from_imported(&[
            quad("left", [0.0, 0.0], [5.0, 10.0], 0.0),
            quad("right", [5.0, 0.0], [10.0, 10.0], 0.0),
        ]);
        let (view_proj, viewport) = pixel_camera();
        let region = PixelRegion::new(0, 0, 10, 10);
        let target = rasterize_region(&scene, scene.indices(), view_proj, viewport, region, |i| Some(i + 1));
        let left = target.ids().iter().filter(|&&id| id == 1).count();
        let right = target.ids().iter().filter(|&&id| id == 2).count();
        assert_eq!(left, 50);
        assert_eq!(right, 50);
    }

    #[test]
    fn nearer_primitive_wins_and_ties_keep_the_first() {
        let scene = SceneModel::from_imported(&[
            quad("far", [0.0, 0.0], [10.0, 10.0], -5.0),
            quad("near", [2.0, 2.0], [4.0, 4.0], 5.0),
            quad("tie", [2.0, 2.0], [4.0, 4.0], 5.0),
        ]);
        let (view_proj, viewport) = pixel_camera();
        let region = PixelRegion::new(0, 0, 10, 10);
        let target = rasterize_region(&scene, scene.indices(), view_proj, viewport, region, |i| Some(i + 1));
        let ids = target.ids();
        // Pixel (2, 6) is covered by "near" (world y 3.5 maps to row 6).
        assert_eq!(ids[6 * 10 + 2], 2);
        assert_eq!(ids[0], 1);
        assert!(!ids.contains(&3));
    }

    #[test]
    fn triangles_crossing_the_near_plane_are_clipped() {
        let proj = Mat4::perspective_rh(90f32.to_radians(), 1.0, 1.0, 100.0);
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let viewport = Viewport::new(8, 8);
        // Floor-like triangle extending from behind the camera to far ahead.
        let scene = SceneModel::from_imported(&[ImportedPrimitive {
            node_name: Some(String::from("floor")),
            mesh_name: None,
            positions: vec![[-50.0, -1.0, 10.0], [50.0, -1.0, 10.0], [0.0, -1.0, -90.0]],
            indices: vec![0, 1, 2],
            translation: [0.0; 3],
        }]);
        let region = PixelRegion::new(0, 0, 8, 8);
        let target = rasterize_region(&scene, scene.indices(), proj * view, viewport, region, |i| Some(i + 1));
        let ids = target.ids();
        // Bottom rows see the floor, the top row does not.
        assert_eq!(ids[7 * 8 + 4], 1);
        assert!(ids[..8].iter().all(|&id| id == 0));
    }

    #[test]
    fn software_backend_reads_back_table_colours() {
        let scene = SceneModel::from_imported(&[
            quad("a", [0.0, 0.0], [3.0, 3.0], 0.0),
            quad("b", [6.0, 6.0], [9.0, 9.0], 0.0),
        ]);
        let (view_proj, viewport) = pixel_camera();
        let table = PickingColorTable::build(&scene).unwrap();
        let mut backend = SoftwarePickBackend::new();
        let region = PixelRegion::new(0, 0, 5, 10);
        let buffer = backend
            .render_region(&scene, &table, view_proj, viewport, region)
            .unwrap();
        assert_eq!(buffer.decode(&table).unwrap().into_iter().collect::<Vec<_>>(), vec![0]);
        assert_eq!(backend.queries(), 1);

        let outside = PixelRegion::new(8, 8, 5, 5);
        assert!(matches!(
            backend.render_region(&scene, &table, view_proj, viewport, outside),
            Err(PickError::RegionOutOfRange { .. })
        ));
    }
}
