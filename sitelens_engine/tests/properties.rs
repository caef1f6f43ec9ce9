use std::collections::BTreeSet;

use glam::{Vec2, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sitelens_engine::picking::cpu_pick;
use sitelens_engine::scene::box_geometry;
use sitelens_engine::view_transform::compute_positions;
use sitelens_engine::{
    ElementBinder, MaterialUpdater, OrbitCamera, PickRect, PickingService, SceneModel,
    SelectionState, SoftwarePickBackend, SpatialIndex, ViewMode, ViewTransformParams,
    ViewerConfig, ViewerController, Viewport,
};
use sitelens_formats::{ElementId, ElementKind, ElementRecord, ImportedPrimitive};

fn random_scene(rng: &mut ChaCha8Rng, count: usize) -> SceneModel {
    let primitives: Vec<ImportedPrimitive> = (0..count)
        .map(|i| {
            let (vertices, indices) = box_geometry(
                rng.gen_range(0.2..3.0),
                rng.gen_range(0.2..3.0),
                rng.gen_range(0.2..3.0),
            );
            ImportedPrimitive {
                node_name: Some(format!("p{i}")),
                mesh_name: None,
                positions: vertices.iter().map(|v| v.to_array()).collect(),
                indices,
                translation: [
                    rng.gen_range(-10.0..10.0),
                    rng.gen_range(-4.0..6.0),
                    rng.gen_range(-10.0..10.0),
                ],
            }
        })
        .collect();
    SceneModel::from_imported(&primitives)
}

fn random_rect(rng: &mut ChaCha8Rng) -> PickRect {
    PickRect::from_corners(
        Vec2::new(rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0)),
        Vec2::new(rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0)),
    )
}

fn random_records(rng: &mut ChaCha8Rng, count: usize) -> Vec<ElementRecord> {
    (0..count)
        .map(|i| {
            let kind = ElementKind::ALL[rng.gen_range(0..ElementKind::ALL.len())];
            let mut record = ElementRecord::new(i.to_string(), String::new(), kind);
            record.floor_level = rng.gen_range(-1..5);
            record
        })
        .collect()
}

/// Both sides rasterise on the CPU: this pins the octree frustum prefilter
/// and the id buffer encode/decode, not a real GPU against the fallback.
#[test]
fn id_buffer_path_matches_prefiltered_cpu_path() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5173);
    let viewport = Viewport::new(96, 64);
    for _ in 0..24 {
        let count = rng.gen_range(1..40);
        let scene = random_scene(&mut rng, count);
        let spatial = SpatialIndex::build(&scene);
        let mut camera = OrbitCamera::default();
        camera.frame_bounds(&scene.bounds());
        camera.yaw = rng.gen_range(-3.0..3.0);
        camera.pitch = rng.gen_range(-1.2..1.2);
        camera.distance *= rng.gen_range(0.3..1.5);
        let view_proj = camera.view_projection(viewport.aspect());

        let mut service = PickingService::new(&scene);
        let mut backend = SoftwarePickBackend::new();
        for _ in 0..6 {
            let rect = random_rect(&mut rng);
            let Some(region) = rect.to_region(viewport) else {
                continue;
            };
            let gpu = service.pick_region(
                Some(&mut backend),
                &scene,
                &spatial,
                view_proj,
                viewport,
                region,
            );
            let cpu = cpu_pick(&scene, &spatial, view_proj, viewport, region);
            assert_eq!(gpu.indices, cpu, "region {region:?}");
        }
        assert!(!service.is_backend_disabled());
    }
}

#[test]
fn committing_a_rectangle_twice_restores_the_selection() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for _ in 0..8 {
        let count = rng.gen_range(4..20);
        let mut viewer = ViewerController::new(ViewerConfig::default());
        viewer.set_viewport(120, 80);
        viewer.load(None, random_records(&mut rng, count));
        viewer.frame(0.0, None);

        // Arbitrary starting selection.
        let seed_rect = random_rect(&mut rng);
        viewer.pointer_down(seed_rect.min);
        viewer.pointer_up(seed_rect.max);
        viewer.frame(0.0, None);
        let before = viewer.selection().selected.clone();

        let rect = random_rect(&mut rng);
        for _ in 0..2 {
            viewer.pointer_down(rect.min);
            viewer.pointer_move(rect.max);
            viewer.pointer_up(rect.max);
            viewer.frame(0.0, None);
        }
        assert_eq!(viewer.selection().selected, before);
    }
}

#[test]
fn assignment_set_is_the_union_of_element_bindings() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let scene = random_scene(&mut rng, 30);
    let records = random_records(&mut rng, 6);
    let mut binder = ElementBinder::from_records(&records, &scene);

    for _ in 0..300 {
        let id = ElementId::new(rng.gen_range(0..6).to_string());
        let indices: Vec<u32> = (0..rng.gen_range(0..5)).map(|_| rng.gen_range(0..40)).collect();
        match rng.gen_range(0..4) {
            0 | 1 => {
                binder.bind(&id, indices).unwrap();
            }
            2 => {
                binder.unbind(&id, indices).unwrap();
            }
            _ => {
                binder.clear_element(&id).unwrap();
            }
        }

        let union: BTreeSet<u32> = binder
            .elements()
            .iter()
            .flat_map(|element| element.assigned_indices().iter().copied())
            .collect();
        assert_eq!(binder.assignment_set(), &union);
        assert!(union.iter().all(|&index| index < 30));
        for index in 0..30 {
            assert_eq!(binder.owners(index).is_empty(), !union.contains(&index));
        }
    }
}

#[test]
fn unchanged_selection_recolours_nothing() {
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let mut scene = random_scene(&mut rng, 25);
    let binder = ElementBinder::from_records(&[], &scene);
    let mut updater = MaterialUpdater::for_scene(&scene);
    let mut selection = SelectionState::default();
    assert_eq!(updater.update(&mut scene, &binder, &selection, ViewMode::Normal).len(), 25);

    for _ in 0..50 {
        let previous = selection.clone();
        for _ in 0..3 {
            let index = rng.gen_range(0..25);
            if rng.gen_bool(0.5) {
                selection.hovered.insert(index);
            } else {
                selection.selected.insert(index);
            }
        }
        if rng.gen_bool(0.3) {
            selection.commit_hovered();
        }
        let expected: BTreeSet<u32> = previous
            .selected
            .symmetric_difference(&selection.selected)
            .chain(previous.hovered.symmetric_difference(&selection.hovered))
            .copied()
            .collect();
        let touched = updater.update(&mut scene, &binder, &selection, ViewMode::Normal);
        assert_eq!(touched.into_iter().collect::<BTreeSet<_>>(), expected);
        assert!(updater
            .update(&mut scene, &binder, &selection, ViewMode::Normal)
            .is_empty());
    }
}

#[test]
fn zero_factors_reproduce_original_positions() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    for _ in 0..10 {
        let count = rng.gen_range(1..30);
        let records = random_records(&mut rng, count);
        let scene = SceneModel::synthetic(&records);
        let binder = ElementBinder::from_records(&records, &scene);
        for mode in ViewMode::ALL {
            let params = ViewTransformParams {
                mode,
                explode_factor: 0.0,
                mesh_spacing_percent: 0.0,
                floor_spacing_unit: rng.gen_range(0.5..8.0),
            };
            let targets = compute_positions(&scene, &binder, &params);
            for (primitive, target) in scene.primitives().iter().zip(targets) {
                assert_eq!(primitive.original_position(), target);
            }
        }

        // Non-zero explode is a pure vertical shift by floor.
        let params = ViewTransformParams {
            mode: ViewMode::Exploded,
            explode_factor: 0.5,
            mesh_spacing_percent: 25.0,
            floor_spacing_unit: 4.0,
        };
        let targets = compute_positions(&scene, &binder, &params);
        for ((primitive, target), record) in scene.primitives().iter().zip(targets).zip(&records) {
            let shift: Vec3 = target - primitive.original_position();
            assert_eq!(shift.x, 0.0);
            assert_eq!(shift.z, 0.0);
            let expected = (record.floor_level - 1) as f32 * 2.0;
            assert!((shift.y - expected).abs() < 1e-4);
        }
    }
}
