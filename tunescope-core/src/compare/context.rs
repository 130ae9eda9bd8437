//! Caller-owned selection of sessions to compare.

use crate::session::SessionId;
use crate::stats::DEFAULT_STABILITY_WINDOW;
use serde::{Deserialize, Serialize};

/// Knobs for the derived series of one comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    pub stability_window: usize,
    /// How many ranked checkpoints to report per session.
    pub top_k: usize,
    /// Upper bound on session loads in flight at once.
    pub max_concurrent_loads: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            stability_window: DEFAULT_STABILITY_WINDOW,
            top_k: 3,
            max_concurrent_loads: 4,
        }
    }
}

/// An ordered, duplicate-free set of selected session ids plus options.
///
/// Each dashboard view or CLI invocation owns its own selection; there is
/// no process-wide selection state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSession {
    selected: Vec<SessionId>,
    pub options: AnalysisOptions,
}

impl ComparisonSession {
    pub fn new(options: AnalysisOptions) -> Self {
        Self {
            selected: Vec::new(),
            options,
        }
    }

    /// Build from ids in order, keeping the first occurrence of duplicates.
    pub fn from_ids<I, S>(ids: I, options: AnalysisOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SessionId>,
    {
        let mut session = Self::new(options);
        for id in ids {
            session.select(id.into());
        }
        session
    }

    /// Add `id` at the end of the selection. Returns false if already selected.
    pub fn select(&mut self, id: SessionId) -> bool {
        if self.is_selected(&id) {
            return false;
        }
        self.selected.push(id);
        true
    }

    pub fn deselect(&mut self, id: &SessionId) -> bool {
        let before = self.selected.len();
        self.selected.retain(|s| s != id);
        self.selected.len() != before
    }

    /// Select if absent, deselect if present. Returns whether it is now selected.
    pub fn toggle(&mut self, id: SessionId) -> bool {
        if self.deselect(&id) {
            false
        } else {
            self.select(id)
        }
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn is_selected(&self, id: &SessionId) -> bool {
        self.selected.contains(id)
    }

    pub fn selected(&self) -> &[SessionId] {
        &self.selected
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}
