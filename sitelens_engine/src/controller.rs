//! The single owned viewer state.
//!
//! Index maps, the assignment cache and the colour table all live here and
//! are driven one frame at a time by the host. Only `frame` touches
//! materials and positions.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use glam::{Mat4, Vec2};
use serde::Serialize;
use sitelens_formats::{
    load_model_file, resolve_model_reference, ElementId, ElementRecord, ModelAsset, TrackingStatus,
};

use crate::binder::{BinderError, ElementBinder};
use crate::camera::OrbitCamera;
use crate::config::{
    clamp_logged, SelectionMode, ViewMode, ViewerConfig, MAX_EXPLODE_FACTOR,
    MAX_MESH_SPACING_PERCENT,
};
use crate::events::{EventQueue, ViewerEvent};
use crate::materials::MaterialUpdater;
use crate::picking::{PickPath, PickRect, PickingBackend, PickingService, Viewport};
use crate::scene::{SceneModel, SceneOrigin};
use crate::selection::{BoxSelectController, DragState, SelectionState, SelectionWork};
use crate::spatial::SpatialIndex;
use crate::view_transform::{ViewTransformEngine, ViewTransformParams};

const DEFAULT_VIEWPORT: Viewport = Viewport {
    width: 1280,
    height: 720,
};

/// Outcome of the most recent model load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadStatus {
    /// Nothing loaded yet.
    Idle,
    Loaded,
    /// The asset failed; the scene was built from the element list.
    Fallback { reason: String },
    /// The asset failed and there were no elements to fall back on.
    Failed { reason: String },
}

impl LoadStatus {
    pub fn error(&self) -> Option<&str> {
        match self {
            LoadStatus::Fallback { reason } | LoadStatus::Failed { reason } => Some(reason),
            LoadStatus::Idle | LoadStatus::Loaded => None,
        }
    }
}

/// Counts printed by the headless mode and logged after every load.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub status: LoadStatus,
    pub origin: SceneOrigin,
    pub generation: u64,
    pub primitives: usize,
    pub triangles: usize,
    pub skipped_primitives: usize,
    pub elements: usize,
    pub bound_elements: usize,
    pub malformed_bindings: usize,
    pub out_of_range_indices: usize,
    pub excluded_from_octree: usize,
    pub linear_scan: bool,
}

/// What changed during one `ViewerController::frame`, for the renderer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameUpdate {
    pub generation: u64,
    pub camera_moved: bool,
    pub pick: Option<PickPath>,
    /// Indices whose material was rewritten, ascending.
    pub recolored: Vec<u32>,
    /// Indices whose position changed, ascending.
    pub moved: Vec<u32>,
    /// Events queued during this frame.
    pub events: usize,
}

impl FrameUpdate {
    /// True when the previous frame's image is still valid.
    pub fn is_idle(&self) -> bool {
        !self.camera_moved && self.recolored.is_empty() && self.moved.is_empty()
    }
}

pub struct ViewerController {
    config: ViewerConfig,
    viewport: Viewport,
    generation: u64,
    scene: SceneModel,
    binder: ElementBinder,
    spatial: SpatialIndex,
    picking: PickingService,
    materials: MaterialUpdater,
    selection: SelectionState,
    box_select: BoxSelectController,
    transforms: ViewTransformEngine,
    camera: OrbitCamera,
    events: EventQueue,
    status: LoadStatus,
    skipped_primitives: usize,
}

impl ViewerController {
    pub fn new(config: ViewerConfig) -> Self {
        let config = config.sanitized();
        let scene = SceneModel::empty();
        ViewerController {
            viewport: DEFAULT_VIEWPORT,
            generation: 0,
            binder: ElementBinder::from_records(&[], &scene),
            spatial: SpatialIndex::build(&scene),
            picking: PickingService::new(&scene),
            materials: MaterialUpdater::for_scene(&scene),
            selection: SelectionState::default(),
            box_select: BoxSelectController::new(config.selection_mode),
            transforms: ViewTransformEngine::default(),
            camera: OrbitCamera::default(),
            events: EventQueue::default(),
            status: LoadStatus::Idle,
            skipped_primitives: 0,
            scene,
            config,
        }
    }

    /// Load a model by path or `file://` URL and bind `records` to it. Any
    /// failure falls back to a synthetic scene built from the records; this
    /// never returns an error.
    pub fn load(&mut self, model_ref: Option<&str>, records: Vec<ElementRecord>) -> &LoadStatus {
        let asset = match model_ref {
            Some(reference) => open_model(reference),
            None => Err(anyhow::anyhow!("no model reference given")),
        };
        match asset {
            Ok(asset) => self.load_asset(&asset, records),
            Err(err) => self.load_fallback(format!("{err:#}"), records),
        }
    }

    /// Bind `records` to an already imported asset. An asset with no drawable
    /// primitives counts as a failed load.
    pub fn load_asset(&mut self, asset: &ModelAsset, records: Vec<ElementRecord>) -> &LoadStatus {
        if asset.primitive_count() == 0 {
            return self.load_fallback(String::from("model has no drawable primitives"), records);
        }
        self.skipped_primitives = asset.report.skipped_topology + asset.report.skipped_unreadable;
        self.install(SceneModel::from_asset(asset), &records, LoadStatus::Loaded)
    }

    fn load_fallback(&mut self, reason: String, records: Vec<ElementRecord>) -> &LoadStatus {
        self.skipped_primitives = 0;
        if records.is_empty() {
            log::warn!("[viewer] model load failed and no elements to show: {reason}");
            self.install(SceneModel::empty(), &records, LoadStatus::Failed { reason })
        } else {
            log::warn!(
                "[viewer] model load failed, showing {} elements as boxes: {reason}",
                records.len()
            );
            self.install(
                SceneModel::synthetic(&records),
                &records,
                LoadStatus::Fallback { reason },
            )
        }
    }

    fn install(&mut self, mut scene: SceneModel, records: &[ElementRecord], status: LoadStatus) -> &LoadStatus {
        self.generation += 1;
        scene.set_generation(self.generation);

        self.binder = ElementBinder::from_records(records, &scene);
        self.spatial = SpatialIndex::build(&scene);
        self.picking = PickingService::new(&scene);
        self.materials = MaterialUpdater::for_scene(&scene);
        self.selection.clear();
        self.box_select.reset(self.config.selection_mode);
        self.transforms.invalidate();
        self.camera.frame_bounds(&scene.bounds());
        self.scene = scene;
        self.status = status;

        let report = self.report();
        log::info!(
            "[viewer] generation {}: {} scene, {} primitives ({} triangles), {} of {} elements bound",
            report.generation,
            report.origin.label(),
            report.primitives,
            report.triangles,
            report.bound_elements,
            report.elements
        );
        &self.status
    }

    pub fn status(&self) -> &LoadStatus {
        &self.status
    }

    pub fn report(&self) -> LoadReport {
        let binding = self.binder.report();
        LoadReport {
            status: self.status.clone(),
            origin: self.scene.origin(),
            generation: self.generation,
            primitives: self.scene.len(),
            triangles: self.scene.triangle_count(),
            skipped_primitives: self.skipped_primitives,
            elements: binding.elements,
            bound_elements: binding.bound_elements,
            malformed_bindings: binding.malformed,
            out_of_range_indices: binding.out_of_range,
            excluded_from_octree: self.spatial.excluded().len(),
            linear_scan: self.spatial.is_linear_scan(),
        }
    }

    /// Advance one frame: camera, queued picking work, dirty materials, then
    /// view transforms. `dt` is seconds since the previous rendered frame.
    pub fn frame(&mut self, dt: f32, mut backend: Option<&mut dyn PickingBackend>) -> FrameUpdate {
        let mut update = FrameUpdate {
            generation: self.generation,
            camera_moved: self.camera.integrate(dt),
            ..FrameUpdate::default()
        };
        let queued_before = self.events.len();

        for work in self.box_select.take_work() {
            let reborrowed = backend
                .as_mut()
                .map(|inner| &mut **inner as &mut dyn PickingBackend);
            if let Some(path) = self.apply_selection_work(work, reborrowed) {
                update.pick = Some(path);
            }
        }

        update.recolored = self.materials.update(
            &mut self.scene,
            &self.binder,
            &self.selection,
            self.config.view_mode,
        );

        let params = self.transform_params();
        update.moved = self.transforms.update(&mut self.scene, &self.binder, params);
        if !update.moved.is_empty() {
            self.spatial.refit(&self.scene);
        }

        update.events = self.events.len().saturating_sub(queued_before);
        update
    }

    fn apply_selection_work(
        &mut self,
        work: SelectionWork,
        backend: Option<&mut dyn PickingBackend>,
    ) -> Option<PickPath> {
        let mut path = None;
        if let Some(rect) = work.query {
            let view_proj = self.view_projection();
            let outcome = self.picking.pick_rect(
                backend,
                &self.scene,
                &self.spatial,
                view_proj,
                self.viewport,
                rect,
            );
            log::debug!(
                "[viewer] box query hit {} primitives via {:?}",
                outcome.indices.len(),
                outcome.path
            );
            self.selection.hovered = outcome.indices;
            path = Some(outcome.path);
        }

        if work.commit {
            self.selection.commit_hovered();
            self.events.push(ViewerEvent::MeshesSelected {
                indices: self.selection.selected.iter().copied().collect(),
            });
        }

        if let Some(at) = work.click {
            self.select_element_at(at);
        }
        path
    }

    fn select_element_at(&mut self, at: Vec2) {
        let ray = self.camera.ray_from_screen(at, self.viewport.aspect());
        let scene = &self.scene;
        let hit = self.spatial.raycast(scene, &ray, |index| {
            scene.get(index).is_some_and(|p| p.material().visible)
        });
        let Some(hit) = hit else {
            log::debug!("[viewer] click at {at} hit nothing");
            return;
        };
        let Some(element) = self.binder.element_for_index(hit.index) else {
            log::debug!("[viewer] primitive {} has no element", hit.index);
            return;
        };
        self.selection.hovered.clear();
        self.selection.selected = element.assigned_indices().clone();
        self.events.push(ViewerEvent::ElementSelected {
            element_id: element.id.clone(),
        });
    }

    fn transform_params(&self) -> ViewTransformParams {
        ViewTransformParams::from_config(&self.config)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.camera.view_projection(self.viewport.aspect())
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = Viewport::new(width, height);
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_view_mode(&mut self, mode: ViewMode) {
        if self.config.view_mode != mode {
            log::info!("[viewer] view mode {} -> {mode}", self.config.view_mode);
            self.config.view_mode = mode;
        }
    }

    pub fn set_explode_factor(&mut self, factor: f32) {
        self.config.explode_factor = clamp_logged("explode_factor", factor, 0.0, MAX_EXPLODE_FACTOR);
    }

    pub fn set_mesh_spacing_percent(&mut self, percent: f32) {
        self.config.mesh_spacing_percent =
            clamp_logged("mesh_spacing_percent", percent, 0.0, MAX_MESH_SPACING_PERCENT);
    }

    /// Switching modes drops the selection and any drag in progress.
    pub fn set_selection_mode(&mut self, mode: SelectionMode) {
        if self.config.selection_mode == mode {
            return;
        }
        log::info!("[viewer] selection mode {} -> {mode}", self.config.selection_mode);
        self.config.selection_mode = mode;
        self.selection.clear();
        self.box_select.reset(mode);
    }

    pub fn pointer_down(&mut self, at: Vec2) {
        self.box_select.pointer_down(at);
    }

    pub fn pointer_move(&mut self, at: Vec2) {
        self.box_select.pointer_move(at);
    }

    pub fn pointer_up(&mut self, at: Vec2) {
        self.box_select.pointer_up(at);
    }

    /// Rectangle to draw as the drag overlay.
    pub fn drag_rect(&self) -> Option<PickRect> {
        self.box_select.drag_rect()
    }

    pub fn drag_state(&self) -> DragState {
        self.box_select.state()
    }

    pub fn bind_element<I>(&mut self, id: &ElementId, indices: I) -> Result<(), BinderError>
    where
        I: IntoIterator<Item = u32>,
    {
        let dirty = self.binder.bind(id, indices)?;
        self.after_binding_change(dirty);
        Ok(())
    }

    pub fn unbind_element<I>(&mut self, id: &ElementId, indices: I) -> Result<(), BinderError>
    where
        I: IntoIterator<Item = u32>,
    {
        let dirty = self.binder.unbind(id, indices)?;
        self.after_binding_change(dirty);
        Ok(())
    }

    pub fn clear_element(&mut self, id: &ElementId) -> Result<(), BinderError> {
        let dirty = self.binder.clear_element(id)?;
        self.after_binding_change(dirty);
        Ok(())
    }

    pub fn set_tracking(
        &mut self,
        id: &ElementId,
        status: TrackingStatus,
        completion_percentage: f32,
    ) -> Result<(), BinderError> {
        let dirty = self.binder.set_tracking(id, status, completion_percentage)?;
        self.materials.mark_dirty(dirty);
        Ok(())
    }

    /// Bind the current selection to `id`, the usual mesh-mode workflow.
    pub fn bind_selection(&mut self, id: &ElementId) -> Result<(), BinderError> {
        let selected: BTreeSet<u32> = self.selection.selected.clone();
        self.bind_element(id, selected)
    }

    fn after_binding_change(&mut self, dirty: Vec<u32>) {
        if dirty.is_empty() {
            return;
        }
        self.materials.mark_dirty(dirty);
        // Floors follow the owning element, so explode offsets may change.
        self.transforms.invalidate();
    }

    /// Records with canonical bindings, ready to persist.
    pub fn element_records(&self) -> Vec<ElementRecord> {
        self.binder.to_records()
    }

    pub fn poll_event(&mut self) -> Option<ViewerEvent> {
        self.events.poll()
    }

    pub fn drain_events(&mut self) -> Vec<ViewerEvent> {
        self.events.drain()
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn scene(&self) -> &SceneModel {
        &self.scene
    }

    pub fn binder(&self) -> &ElementBinder {
        &self.binder
    }

    pub fn spatial(&self) -> &SpatialIndex {
        &self.spatial
    }

    pub fn picking(&self) -> &PickingService {
        &self.picking
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn camera(&self) -> &OrbitCamera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut OrbitCamera {
        &mut self.camera
    }
}

fn open_model(reference: &str) -> Result<ModelAsset> {
    let path = resolve_model_reference(reference)?;
    load_model_file(&path).with_context(|| format!("loading model {reference}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitelens_formats::ElementKind;

    fn records(count: usize) -> Vec<ElementRecord> {
        (0..count)
            .map(|i| ElementRecord::new(i.to_string(), format!("slab {i}"), ElementKind::Slab))
            .collect()
    }

    #[test]
    fn unreadable_model_falls_back_to_boxes() {
        let mut viewer = ViewerController::new(ViewerConfig::default());
        let status = viewer.load(Some("/nonexistent/model.glb"), records(4)).clone();
        assert!(matches!(status, LoadStatus::Fallback { .. }));
        assert_eq!(viewer.scene().origin(), SceneOrigin::Synthetic);
        assert_eq!(viewer.scene().len(), 4);
        assert_eq!(viewer.binder().assignment_set().len(), 4);
        assert_eq!(viewer.generation(), 1);
    }

    #[test]
    fn remote_references_are_load_failures() {
        let mut viewer = ViewerController::new(ViewerConfig::default());
        let status = viewer.load(Some("https://example.com/a.glb"), Vec::new()).clone();
        assert!(matches!(status, LoadStatus::Failed { .. }));
        assert!(viewer.scene().is_empty());
        assert!(status.error().is_some());
    }

    #[test]
    fn first_frame_colours_everything_then_goes_idle() {
        let mut viewer = ViewerController::new(ViewerConfig::default());
        viewer.load(None, records(3));
        let first = viewer.frame(0.0, None);
        assert_eq!(first.recolored, vec![0, 1, 2]);
        let second = viewer.frame(0.0, None);
        assert!(second.is_idle());
    }

    #[test]
    fn selection_mode_switch_clears_the_selection() {
        let mut viewer = ViewerController::new(ViewerConfig::default());
        viewer.load(None, records(3));
        viewer.frame(0.0, None);
        viewer.pointer_down(Vec2::ZERO);
        viewer.pointer_up(Vec2::ONE);
        viewer.frame(0.0, None);
        assert_eq!(viewer.selection().selected.len(), 3);

        viewer.set_selection_mode(SelectionMode::Element);
        assert!(viewer.selection().selected.is_empty());
        let update = viewer.frame(0.0, None);
        assert_eq!(update.recolored, vec![0, 1, 2]);
    }

    #[test]
    fn setters_clamp() {
        let mut viewer = ViewerController::new(ViewerConfig::default());
        viewer.set_explode_factor(3.0);
        viewer.set_mesh_spacing_percent(-5.0);
        assert_eq!(viewer.config().explode_factor, 1.0);
        assert_eq!(viewer.config().mesh_spacing_percent, 0.0);
    }
}
