use std::collections::VecDeque;

use serde::Serialize;
use sitelens_formats::ElementId;

/// Default number of delivered events kept for diagnostics.
pub const DEFAULT_HISTORY: usize = 64;

/// Notifications for the host application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewerEvent {
    /// Single-element pick in element mode.
    ElementSelected { element_id: ElementId },
    /// Box-selection commit in mesh mode; the full selection, ascending.
    MeshesSelected { indices: Vec<u32> },
}

/// Events waiting for the host, in emission order.
#[derive(Debug, Clone, Serialize)]
pub struct EventQueue {
    pending: VecDeque<ViewerEvent>,
    history: VecDeque<ViewerEvent>,
    history_limit: usize,
}

impl Default for EventQueue {
    fn default() -> Self {
        EventQueue::with_history(DEFAULT_HISTORY)
    }
}

impl EventQueue {
    pub fn with_history(history_limit: usize) -> Self {
        EventQueue {
            pending: VecDeque::new(),
            history: VecDeque::new(),
            history_limit,
        }
    }

    pub fn push(&mut self, event: ViewerEvent) {
        log::debug!("[events] queued {event:?}");
        self.pending.push_back(event);
    }

    pub fn poll(&mut self) -> Option<ViewerEvent> {
        let event = self.pending.pop_front()?;
        if self.history_limit > 0 {
            if self.history.len() == self.history_limit {
                self.history.pop_front();
            }
            self.history.push_back(event.clone());
        }
        Some(event)
    }

    pub fn drain(&mut self) -> Vec<ViewerEvent> {
        std::iter::from_fn(|| self.poll()).collect()
    }

    pub fn peek(&self) -> Option<&ViewerEvent> {
        self.pending.front()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn history(&self) -> impl ExactSizeIterator<Item = &ViewerEvent> {
        self.history.iter()
    }
}
