//! Dirty-tracked material updates.
//!
//! Material state is a pure function of occupancy, highlight, view mode and
//! whether the section cut hides the primitive. The updater remembers the
//! selection it last applied and only recomputes primitives whose highlight
//! changed since then, plus anything explicitly marked dirty.

use std::collections::BTreeSet;

use serde::Serialize;
use sitelens_formats::TrackingStatus;

use crate::binder::ElementBinder;
use crate::config::ViewMode;
use crate::scene::{MaterialState, SceneModel};
use crate::selection::SelectionState;

const FREE_COLOR: [f32; 3] = [0.72, 0.74, 0.78];
const HOVER_COLOR: [f32; 3] = [0.35, 0.78, 1.0];
const SELECT_COLOR: [f32; 3] = [0.12, 0.42, 1.0];
const XRAY_OPACITY: f32 = 0.2;
const XRAY_HIGHLIGHT_OPACITY: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Occupancy {
    Free,
    Assigned(TrackingStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Highlight {
    None,
    Hovered,
    Selected,
}

fn tracking_tint(status: TrackingStatus) -> [f32; 3] {
    match status {
        TrackingStatus::NotStarted => [0.58, 0.55, 0.82],
        TrackingStatus::InProgress => [0.96, 0.70, 0.24],
        TrackingStatus::Completed => [0.33, 0.76, 0.42],
    }
}

/// Colour, opacity and visibility for one primitive. Selected wins over
/// hovered, hovered over assigned, assigned over free.
pub fn resolve_material(
    occupancy: Occupancy,
    highlight: Highlight,
    view_mode: ViewMode,
    cut_by_section: bool,
) -> MaterialState {
    let color = match (highlight, occupancy) {
        (Highlight::Selected, _) => SELECT_COLOR,
        (Highlight::Hovered, _) => HOVER_COLOR,
        (Highlight::None, Occupancy::Assigned(status)) => tracking_tint(status),
        (Highlight::None, Occupancy::Free) => FREE_COLOR,
    };
    let opacity = match (view_mode, highlight) {
        (ViewMode::Xray, Highlight::None) => XRAY_OPACITY,
        (ViewMode::Xray, _) => XRAY_HIGHLIGHT_OPACITY,
        _ => 1.0,
    };
    MaterialState {
        color,
        opacity,
        visible: !(view_mode == ViewMode::Section && cut_by_section),
    }
}

#[derive(Debug, Clone, Default)]
pub struct MaterialUpdater {
    applied_selected: BTreeSet<u32>,
    applied_hovered: BTreeSet<u32>,
    pending: BTreeSet<u32>,
    applied_mode: Option<ViewMode>,
    section_height: f32,
}

impl MaterialUpdater {
    /// Fresh updater for a newly loaded scene: everything starts dirty.
    pub fn for_scene(scene: &SceneModel) -> Self {
        let original = scene.original_bounds();
        let section_height = if original.is_valid() {
            original.center().y
        } else {
            0.0
        };
        MaterialUpdater {
            pending: scene.indices().collect(),
            section_height,
            ..MaterialUpdater::default()
        }
    }

    pub fn section_height(&self) -> f32 {
        self.section_height
    }

    pub fn mark_dirty<I>(&mut self, indices: I)
    where
        I: IntoIterator<Item = u32>,
    {
        self.pending.extend(indices);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Recolour what changed since the last call. Returns the touched
    /// indices in ascending order.
    pub fn update(
        &mut self,
        scene: &mut SceneModel,
        binder: &ElementBinder,
        selection: &SelectionState,
        view_mode: ViewMode,
    ) -> Vec<u32> {
        if self.applied_mode != Some(view_mode) {
            if self.applied_mode.is_some() {
                log::debug!("[materials] view mode now {view_mode}, recolouring all");
            }
            self.pending.extend(scene.indices());
            self.applied_mode = Some(view_mode);
        }

        let mut dirty = std::mem::take(&mut self.pending);
        dirty.extend(self.applied_selected.symmetric_difference(&selection.selected));
        dirty.extend(self.applied_hovered.symmetric_difference(&selection.hovered));

        let mut touched = Vec::with_capacity(dirty.len());
        for index in dirty {
            let occupancy = if binder.is_assigned(index) {
                Occupancy::Assigned(binder.tracking_for_index(index).unwrap_or_default())
            } else {
                Occupancy::Free
            };
            let highlight = selection.highlight(index);
            let section_height = self.section_height;
            let Some(primitive) = scene.get_mut(index) else {
                continue;
            };
            let cut = primitive.original_bounds().min.y > section_height;
            primitive.set_material(resolve_material(occupancy, highlight, view_mode, cut));
            touched.push(index);
        }

        self.applied_selected.clone_from(&selection.selected);
        self.applied_hovered.clone_from(&selection.hovered);
        touched
    }
}
