use std::collections::BTreeSet;
use std::fs;

use glam::{Mat4, Vec2, Vec3};
use serde_json::json;
use sitelens_engine::scene::box_geometry;
use sitelens_engine::{
    IdBuffer, LoadStatus, PickError, PickPath, PickingBackend, PickingColorTable, PixelRegion,
    SceneModel, SceneOrigin, SelectionMode, SoftwarePickBackend, ViewMode, ViewerConfig,
    ViewerController, ViewerEvent, Viewport,
};
use sitelens_formats::{
    encode_glb, parse_element_records, ElementId, ElementKind, ElementRecord, ImportReport,
    ImportedPrimitive, ModelAsset,
};
use tempfile::tempdir;

/// Unit boxes, one primitive each, translated to `positions`.
fn box_asset(positions: &[Vec3]) -> ModelAsset {
    let (vertices, indices) = box_geometry(1.0, 1.0, 1.0);
    let primitives = positions
        .iter()
        .enumerate()
        .map(|(i, position)| ImportedPrimitive {
            node_name: Some(format!("box{i}")),
            mesh_name: Some(String::from("box")),
            positions: vertices.iter().map(|v| v.to_array()).collect(),
            indices: indices.clone(),
            translation: position.to_array(),
        })
        .collect();
    ModelAsset {
        primitives,
        report: ImportReport::default(),
    }
}

/// Ten boxes; 2, 5 and 7 sit side by side in the middle, the rest well away.
fn ten_box_positions() -> Vec<Vec3> {
    vec![
        Vec3::new(-9.0, 6.0, 0.0),
        Vec3::new(9.0, 6.0, 0.0),
        Vec3::new(-2.0, 0.0, 0.0),
        Vec3::new(-9.0, -6.0, 0.0),
        Vec3::new(9.0, -6.0, 0.0),
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(0.0, 7.0, 0.0),
        Vec3::new(2.0, 0.0, 0.0),
        Vec3::new(0.0, -7.0, 0.0),
        Vec3::new(-12.0, 0.0, 0.0),
    ]
}

fn front_view(viewer: &mut ViewerController) {
    let camera = viewer.camera_mut();
    camera.yaw = 0.0;
    camera.pitch = 0.0;
}

/// Normalised screen rectangle around the projected bounds of `indices`.
fn screen_bounds(viewer: &ViewerController, indices: &[u32]) -> (Vec2, Vec2) {
    let view_proj = viewer.view_projection();
    let mut min = Vec2::splat(f32::MAX);
    let mut max = Vec2::splat(f32::MIN);
    for &index in indices {
        let bounds = viewer.scene().get(index).unwrap().world_bounds();
        for corner in bounds.corners() {
            let clip = view_proj * corner.extend(1.0);
            let ndc = clip.truncate() / clip.w;
            let at = Vec2::new((ndc.x + 1.0) * 0.5, (1.0 - ndc.y) * 0.5);
            min = min.min(at);
            max = max.max(at);
        }
    }
    (min, max)
}

fn drag(viewer: &mut ViewerController, from: Vec2, to: Vec2) {
    viewer.pointer_down(from);
    viewer.pointer_move((from + to) * 0.5);
    viewer.pointer_up(to);
}

fn loaded_ten(config: ViewerConfig) -> ViewerController {
    let mut viewer = ViewerController::new(config);
    let status = viewer.load_asset(&box_asset(&ten_box_positions()), Vec::new());
    assert_eq!(status, &LoadStatus::Loaded);
    front_view(&mut viewer);
    viewer.frame(0.0, None);
    viewer
}

#[test]
fn box_select_over_three_primitives_reports_them() {
    let mut viewer = loaded_ten(ViewerConfig::default());
    let mut backend = SoftwarePickBackend::new();

    let (min, max) = screen_bounds(&viewer, &[2, 5, 7]);
    drag(&mut viewer, min - Vec2::splat(0.005), max + Vec2::splat(0.005));
    let update = viewer.frame(1.0 / 60.0, Some(&mut backend));

    assert_eq!(update.pick, Some(PickPath::Backend));
    assert_eq!(viewer.selection().selected, BTreeSet::from([2, 5, 7]));
    assert_eq!(
        viewer.drain_events(),
        vec![ViewerEvent::MeshesSelected {
            indices: vec![2, 5, 7]
        }]
    );
    assert_eq!(update.recolored, vec![2, 5, 7]);
    assert_eq!(backend.queries(), 1);
}

#[test]
fn rectangle_outside_the_model_leaves_the_selection_alone() {
    let mut viewer = loaded_ten(ViewerConfig::default());
    let (min, max) = screen_bounds(&viewer, &[2, 5, 7]);
    drag(&mut viewer, min - Vec2::splat(0.005), max + Vec2::splat(0.005));
    viewer.frame(0.0, None);
    viewer.drain_events();

    let all: Vec<u32> = (0..10).collect();
    let (model_min, _) = screen_bounds(&viewer, &all);
    assert!(model_min.x > 0.05 && model_min.y > 0.05);

    viewer.pointer_down(Vec2::new(0.0, 0.0));
    viewer.pointer_move(Vec2::new(0.03, 0.03));
    viewer.frame(0.0, None);
    assert!(viewer.selection().hovered.is_empty());

    viewer.pointer_up(Vec2::new(0.04, 0.04));
    let update = viewer.frame(0.0, None);
    assert_eq!(viewer.selection().selected, BTreeSet::from([2, 5, 7]));
    assert!(update.recolored.is_empty());
}

#[test]
fn selecting_the_same_rectangle_twice_undoes_it() {
    let mut viewer = loaded_ten(ViewerConfig::default());
    let (min, max) = screen_bounds(&viewer, &[5, 7]);
    let (from, to) = (min - Vec2::splat(0.005), max + Vec2::splat(0.005));

    drag(&mut viewer, from, to);
    viewer.frame(0.0, None);
    assert_eq!(viewer.selection().selected, BTreeSet::from([5, 7]));

    drag(&mut viewer, from, to);
    viewer.frame(0.0, None);
    assert!(viewer.selection().selected.is_empty());
    let events = viewer.drain_events();
    assert_eq!(
        events.last(),
        Some(&ViewerEvent::MeshesSelected { indices: vec![] })
    );
}

#[test]
fn release_and_press_within_one_frame_commits_the_first_drag() {
    let mut viewer = loaded_ten(ViewerConfig::default());
    let mut backend = SoftwarePickBackend::new();

    viewer.pointer_down(Vec2::ZERO);
    viewer.pointer_up(Vec2::ONE);
    viewer.pointer_down(Vec2::ZERO);
    viewer.pointer_move(Vec2::new(0.01, 0.01));
    viewer.frame(0.0, Some(&mut backend));

    let all: BTreeSet<u32> = (0..10).collect();
    assert_eq!(viewer.selection().selected, all);
    assert!(viewer.selection().hovered.is_empty());
    assert_eq!(
        viewer.drain_events(),
        vec![ViewerEvent::MeshesSelected {
            indices: (0..10).collect()
        }]
    );

    viewer.pointer_up(Vec2::new(0.01, 0.01));
    viewer.frame(0.0, Some(&mut backend));
    assert_eq!(viewer.selection().selected, all);
}

#[test]
fn element_click_selects_the_owning_element() {
    let config = ViewerConfig {
        selection_mode: SelectionMode::Element,
        ..ViewerConfig::default()
    };
    let mut viewer = ViewerController::new(config);
    let records = parse_element_records(
        &json!([
            {"id": 11, "name": "core wall", "element_type": "wall", "mesh_indices": "[2, 5]"},
            {"id": "b7", "name": "column", "element_type": "column", "mesh_indices": [7]}
        ])
        .to_string(),
    )
    .unwrap();
    viewer.load_asset(&box_asset(&ten_box_positions()), records);
    front_view(&mut viewer);
    viewer.frame(0.0, None);

    let (min, max) = screen_bounds(&viewer, &[5]);
    let centre = (min + max) * 0.5;
    viewer.pointer_down(centre);
    viewer.pointer_up(centre);
    viewer.frame(0.0, None);

    assert_eq!(
        viewer.drain_events(),
        vec![ViewerEvent::ElementSelected {
            element_id: ElementId::new("11")
        }]
    );
    assert_eq!(viewer.selection().selected, BTreeSet::from([2, 5]));

    // Primitive 0 is unbound: no event, selection kept.
    let (min, max) = screen_bounds(&viewer, &[0]);
    let centre = (min + max) * 0.5;
    viewer.pointer_down(centre);
    viewer.pointer_up(centre);
    viewer.frame(0.0, None);
    assert!(viewer.drain_events().is_empty());
    assert_eq!(viewer.selection().selected, BTreeSet::from([2, 5]));
}

#[test]
fn section_view_hides_upper_primitives_from_picking() {
    let positions: Vec<Vec3> = (0..4).map(|i| Vec3::new(0.0, i as f32 * 2.0, 0.0)).collect();
    let mut viewer = ViewerController::new(ViewerConfig::default());
    viewer.load_asset(&box_asset(&positions), Vec::new());
    viewer.set_view_mode(ViewMode::Section);
    let update = viewer.frame(0.0, None);
    assert_eq!(update.recolored, vec![0, 1, 2, 3]);
    assert!(!viewer.scene().get(3).unwrap().material().visible);
    assert!(viewer.scene().get(1).unwrap().material().visible);

    let mut backend = SoftwarePickBackend::new();
    drag(&mut viewer, Vec2::ZERO, Vec2::ONE);
    viewer.frame(0.0, Some(&mut backend));
    assert_eq!(viewer.selection().selected, BTreeSet::from([0, 1]));

    drag(&mut viewer, Vec2::ZERO, Vec2::ONE);
    viewer.frame(0.0, None);
    assert!(viewer.selection().selected.is_empty());
}

struct LostDevice {
    calls: u32,
}

impl PickingBackend for LostDevice {
    fn name(&self) -> &str {
        "lost"
    }

    fn render_region(
        &mut self,
        _scene: &SceneModel,
        _table: &PickingColorTable,
        _view_proj: Mat4,
        _viewport: Viewport,
        _region: PixelRegion,
    ) -> Result<IdBuffer, PickError> {
        self.calls += 1;
        Err(PickError::Backend(String::from("device lost")))
    }
}

#[test]
fn backend_failures_fall_back_then_disable() {
    let mut viewer = loaded_ten(ViewerConfig::default());
    let mut backend = LostDevice { calls: 0 };
    let (min, max) = screen_bounds(&viewer, &[2, 5, 7]);
    let (from, to) = (min - Vec2::splat(0.005), max + Vec2::splat(0.005));

    for round in 0..4 {
        viewer.pointer_down(from);
        viewer.pointer_up(to);
        let update = viewer.frame(0.0, Some(&mut backend));
        assert_eq!(update.pick, Some(PickPath::Cpu));
        let expected = if round % 2 == 0 {
            BTreeSet::from([2, 5, 7])
        } else {
            BTreeSet::new()
        };
        assert_eq!(viewer.selection().selected, expected);
    }
    assert_eq!(backend.calls, 3);
    assert!(viewer.picking().is_backend_disabled());
    assert_eq!(viewer.picking().stats().cpu_queries, 4);
}

#[test]
fn exploded_view_moves_primitives_and_refits() {
    let records: Vec<ElementRecord> = (1..=3)
        .map(|floor| {
            let mut record =
                ElementRecord::new(floor.to_string(), format!("slab {floor}"), ElementKind::Slab);
            record.floor_level = floor;
            record
        })
        .collect();
    let config = ViewerConfig {
        view_mode: ViewMode::Exploded,
        explode_factor: 1.0,
        ..ViewerConfig::default()
    };
    let mut viewer = ViewerController::new(config);
    viewer.load(None, records);
    let update = viewer.frame(0.0, None);
    assert_eq!(update.moved, vec![1, 2]);
    let top = viewer.scene().get(2).unwrap();
    assert_eq!(top.position().y - top.original_position().y, 8.0);

    viewer.set_explode_factor(0.0);
    let update = viewer.frame(0.0, None);
    assert_eq!(update.moved, vec![1, 2]);
    for primitive in viewer.scene().primitives() {
        assert_eq!(primitive.position(), primitive.original_position());
    }
}

#[test]
fn binding_changes_recolour_only_their_primitives() {
    let mut viewer = ViewerController::new(ViewerConfig::default());
    let records = vec![ElementRecord::new("w1", "wall", ElementKind::Wall)];
    viewer.load_asset(&box_asset(&ten_box_positions()), records);
    viewer.frame(0.0, None);

    let id = ElementId::new("w1");
    viewer.bind_element(&id, [3, 4, 99]).unwrap();
    assert_eq!(viewer.frame(0.0, None).recolored, vec![3, 4]);
    assert_eq!(viewer.binder().assignment_set(), &BTreeSet::from([3, 4]));

    viewer
        .set_tracking(&id, sitelens_formats::TrackingStatus::Completed, 100.0)
        .unwrap();
    assert_eq!(viewer.frame(0.0, None).recolored, vec![3, 4]);

    viewer.clear_element(&id).unwrap();
    assert_eq!(viewer.frame(0.0, None).recolored, vec![3, 4]);
    assert!(viewer.binder().assignment_set().is_empty());
    assert!(viewer.bind_element(&ElementId::new("nope"), [1]).is_err());

    let saved = viewer.element_records();
    assert_eq!(saved[0].mesh_indices, Some(json!([])));
}

/// Glb with a unit box mesh and a two-primitive mesh spread over six nodes.
fn boxes_glb() -> Vec<u8> {
    let corners: [[f32; 3]; 8] = [
        [-0.5, 0.0, -0.5],
        [0.5, 0.0, -0.5],
        [0.5, 1.0, -0.5],
        [-0.5, 1.0, -0.5],
        [-0.5, 0.0, 0.5],
        [0.5, 0.0, 0.5],
        [0.5, 1.0, 0.5],
        [-0.5, 1.0, 0.5],
    ];
    let triangles: [u32; 36] = [
        0, 2, 1, 0, 3, 2, 4, 5, 6, 4, 6, 7, 0, 4, 7, 0, 7, 3, 1, 2, 6, 1, 6, 5, 0, 1, 5, 0, 5,
        4, 3, 7, 6, 3, 6, 2,
    ];
    let mut bin = Vec::new();
    for corner in corners {
        for value in corner {
            bin.extend_from_slice(&value.to_le_bytes());
        }
    }
    for index in triangles {
        bin.extend_from_slice(&index.to_le_bytes());
    }
    let json = json!({
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": [0, 3, 4, 5]}],
        "nodes": [
            {"name": "level1", "mesh": 0, "children": [1, 2]},
            {"name": "a", "mesh": 0, "translation": [3.0, 0.0, 0.0]},
            {"name": "b", "mesh": 0, "translation": [6.0, 0.0, 0.0]},
            {"name": "c", "mesh": 0, "translation": [0.0, 4.0, 0.0]},
            {"name": "d", "mesh": 0, "translation": [3.0, 4.0, 0.0]},
            {"name": "pair", "mesh": 1, "translation": [6.0, 4.0, 0.0]}
        ],
        "meshes": [
            {"name": "box", "primitives": [{"attributes": {"POSITION": 0}, "indices": 1}]},
            {"name": "pair", "primitives": [
                {"attributes": {"POSITION": 0}, "indices": 1},
                {"attributes": {"POSITION": 0}, "indices": 1, "mode": 4}
            ]}
        ],
        "buffers": [{"byteLength": 240}],
        "bufferViews": [
            {"buffer": 0, "byteOffset": 0, "byteLength": 96},
            {"buffer": 0, "byteOffset": 96, "byteLength": 144}
        ],
        "accessors": [
            {"bufferView": 0, "componentType": 5126, "count": 8, "type": "VEC3",
             "min": [-0.5, 0.0, -0.5], "max": [0.5, 1.0, 0.5]},
            {"bufferView": 1, "componentType": 5125, "count": 36, "type": "SCALAR"}
        ]
    });
    encode_glb(json.to_string().as_bytes(), Some(&bin))
}

#[test]
fn model_from_disk_keeps_contiguous_indices_and_tolerates_bad_bindings() {
    let dir = tempdir().unwrap();
    let model_path = dir.path().join("site.glb");
    fs::write(&model_path, boxes_glb()).unwrap();
    let elements_path = dir.path().join("elements.json");
    fs::write(
        &elements_path,
        json!([
            {"id": 1, "name": "A", "element_type": "wall", "mesh_indices": "[0, 1]"},
            {"id": "b", "name": "B", "element_type": "slab", "mesh_indices": [6, 42]},
            {"id": "c", "name": "C", "element_type": "beam", "mesh_indices": "oops"}
        ])
        .to_string(),
    )
    .unwrap();
    let records = sitelens_formats::load_element_records(&elements_path).unwrap();

    let mut viewer = ViewerController::new(ViewerConfig::default());
    let reference = format!("file://{}", model_path.display());
    assert_eq!(viewer.load(Some(&reference), records), &LoadStatus::Loaded);

    let scene = viewer.scene();
    assert_eq!(scene.origin(), SceneOrigin::Asset);
    assert_eq!(scene.len(), 7);
    let indices: Vec<u32> = scene.primitives().iter().map(|p| p.index).collect();
    assert_eq!(indices, (0..7).collect::<Vec<_>>());
    assert_eq!(scene.get(2).unwrap().position(), Vec3::new(6.0, 0.0, 0.0));

    let report = viewer.report();
    assert_eq!(report.bound_elements, 2);
    assert_eq!(report.malformed_bindings, 1);
    assert_eq!(report.out_of_range_indices, 1);
    assert_eq!(
        viewer.binder().assignment_set(),
        &BTreeSet::from([0, 1, 6])
    );
    assert_eq!(viewer.binder().element_for_index(6).unwrap().id.as_str(), "b");
}

#[test]
fn cyclic_node_hierarchy_falls_back_to_the_synthetic_scene() {
    let dir = tempdir().unwrap();
    let model_path = dir.path().join("cyclic.glb");
    let json = json!({
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [
            {"name": "a", "children": [1]},
            {"name": "b", "children": [0]}
        ]
    });
    fs::write(&model_path, encode_glb(json.to_string().as_bytes(), None)).unwrap();

    let mut viewer = ViewerController::new(ViewerConfig::default());
    let status = viewer.load(
        Some(model_path.to_str().unwrap()),
        vec![ElementRecord::new("1", "only", ElementKind::Column)],
    );
    match status {
        LoadStatus::Fallback { reason } => assert!(reason.contains("cycle")),
        other => panic!("expected fallback, got {other:?}"),
    }
    assert_eq!(viewer.scene().origin(), SceneOrigin::Synthetic);
    assert_eq!(viewer.scene().len(), 1);
}

#[test]
fn reload_resets_selection_and_bumps_generation() {
    let mut viewer = loaded_ten(ViewerConfig::default());
    drag(&mut viewer, Vec2::ZERO, Vec2::ONE);
    viewer.frame(0.0, None);
    assert_eq!(viewer.selection().selected.len(), 10);

    viewer.pointer_down(Vec2::ZERO);
    viewer.pointer_move(Vec2::ONE);
    viewer.load(
        Some("missing.glb"),
        vec![ElementRecord::new("1", "only", ElementKind::Column)],
    );
    assert_eq!(viewer.generation(), 2);
    assert!(viewer.selection().selected.is_empty());
    let update = viewer.frame(0.0, None);
    assert_eq!(update.pick, None);
    assert_eq!(update.recolored, vec![0]);
    assert!(matches!(viewer.status(), LoadStatus::Fallback { .. }));
}
