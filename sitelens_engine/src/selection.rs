use std::collections::{BTreeSet, VecDeque};

use glam::Vec2;
use serde::Serialize;

use crate::config::SelectionMode;
use crate::materials::Highlight;
use crate::picking::PickRect;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectionState {
    pub selected: BTreeSet<u32>,
    pub hovered: BTreeSet<u32>,
}

impl SelectionState {
    pub fn clear(&mut self) {
        self.selected.clear();
        self.hovered.clear();
    }

    pub fn highlight(&self, index: u32) -> Highlight {
        if self.selected.contains(&index) {
            Highlight::Selected
        } else if self.hovered.contains(&index) {
            Highlight::Hovered
        } else {
            Highlight::None
        }
    }

    /// Flip every hovered index in or out of the selection, then drop the
    /// hover set.
    pub fn commit_hovered(&mut self) {
        for index in std::mem::take(&mut self.hovered) {
            if !self.selected.remove(&index) {
                self.selected.insert(index);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DragState {
    Idle,
    /// Primary button held in mesh mode.
    Dragging { start: Vec2, current: Vec2 },
    /// Primary button held in element mode; resolves to a click on release.
    Pressed { at: Vec2 },
}

/// Work the frame loop owes the box-select controller.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SelectionWork {
    /// Latest rectangle not yet queried; older ones were coalesced away.
    pub query: Option<PickRect>,
    /// Toggle the hover set into the selection after the query.
    pub commit: bool,
    /// Element-mode click position.
    pub click: Option<Vec2>,
}

impl SelectionWork {
    pub fn is_empty(&self) -> bool {
        self.query.is_none() && !self.commit && self.click.is_none()
    }
}

/// `Idle → Dragging → Idle` pointer state machine. Positions are normalised
/// viewport coordinates with a top-left origin.
///
/// Releases seal the drag's work so a press before the next frame cannot
/// touch it.
#[derive(Debug, Clone)]
pub struct BoxSelectController {
    mode: SelectionMode,
    state: DragState,
    pending: SelectionWork,
    sealed: VecDeque<SelectionWork>,
    last_queried: Option<PickRect>,
    coalesced: u64,
}

impl BoxSelectController {
    pub fn new(mode: SelectionMode) -> Self {
        BoxSelectController {
            mode,
            state: DragState::Idle,
            pending: SelectionWork::default(),
            sealed: VecDeque::new(),
            last_queried: None,
            coalesced: 0,
        }
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    pub fn state(&self) -> DragState {
        self.state
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging { .. })
    }

    /// Rectangle of the drag in progress, for the overlay.
    pub fn drag_rect(&self) -> Option<PickRect> {
        match self.state {
            DragState::Dragging { start, current } => Some(PickRect::from_corners(start, current)),
            _ => None,
        }
    }

    /// Move events folded into a later query instead of issuing their own.
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }

    /// Drop any drag and queued work, e.g. on mode switch or model load.
    pub fn reset(&mut self, mode: SelectionMode) {
        self.mode = mode;
        self.state = DragState::Idle;
        self.pending = SelectionWork::default();
        self.sealed.clear();
        self.last_queried = None;
    }

    pub fn pointer_down(&mut self, at: Vec2) {
        self.state = match self.mode {
            SelectionMode::Mesh => DragState::Dragging { start: at, current: at },
            SelectionMode::Element => DragState::Pressed { at },
        };
        self.last_queried = None;
    }

    pub fn pointer_move(&mut self, at: Vec2) {
        if let DragState::Dragging { start, .. } = self.state {
            self.state = DragState::Dragging { start, current: at };
            self.queue_rect(PickRect::from_corners(start, at));
        }
    }

    pub fn pointer_up(&mut self, at: Vec2) {
        match self.state {
            DragState::Dragging { start, .. } => {
                self.queue_rect(PickRect::from_corners(start, at));
                self.pending.commit = true;
                self.seal();
            }
            DragState::Pressed { .. } => {
                self.pending.click = Some(at);
                self.seal();
            }
            DragState::Idle => {}
        }
        self.state = DragState::Idle;
    }

    fn queue_rect(&mut self, rect: PickRect) {
        if self.last_queried == Some(rect) && self.pending.query.is_none() {
            return;
        }
        if self.pending.query.replace(rect).is_some() {
            self.coalesced += 1;
        }
    }

    fn seal(&mut self) {
        let work = std::mem::take(&mut self.pending);
        self.sealed.push_back(work);
    }

    /// Hand over the queued work in pointer order: finished drags first, then
    /// the live drag's latest rectangle. Called once per frame.
    pub fn take_work(&mut self) -> Vec<SelectionWork> {
        let mut work: Vec<SelectionWork> = self.sealed.drain(..).collect();
        let live = std::mem::take(&mut self.pending);
        if !live.is_empty() {
            if let Some(rect) = live.query {
                self.last_queried = Some(rect);
            }
            work.push(live);
        }
        work
    }
}
