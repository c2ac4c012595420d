//! Per-upload progress, kept outside the document so that progress ticks
//! never become undoable edits.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use super::registry::UploadRegistry;
use super::types::{UploadId, UploadPhase};
use crate::document::{DocumentHandle, NodeKey};
use crate::view::NodeRenderer;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressEntry {
    /// Percent with one decimal.
    pub percent: Option<f64>,
    pub status: Option<UploadPhase>,
}

impl ProgressEntry {
    pub fn percent_text(&self) -> String {
        self.percent
            .map(|p| format!("{:.1}%", p))
            .unwrap_or_default()
    }
}

fn one_decimal(percent: f64) -> f64 {
    (percent.clamp(0.0, 100.0) * 10.0).round() / 10.0
}

pub struct ProgressProjector {
    entries: RefCell<HashMap<UploadId, ProgressEntry>>,
    registry: Rc<RefCell<UploadRegistry>>,
    document: DocumentHandle,
    renderer: Rc<dyn NodeRenderer>,
}

impl ProgressProjector {
    pub fn new(
        registry: Rc<RefCell<UploadRegistry>>,
        document: DocumentHandle,
        renderer: Rc<dyn NodeRenderer>,
    ) -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
            registry,
            document,
            renderer,
        }
    }

    pub fn entry(&self, id: &UploadId) -> Option<ProgressEntry> {
        self.entries.borrow().get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn begin_reading(&self, id: &UploadId) {
        self.apply(id, |entry| {
            entry.percent = Some(0.0);
            entry.status = Some(UploadPhase::Reading);
        });
    }

    pub fn begin_uploading(&self, id: &UploadId) {
        self.apply(id, |entry| entry.status = Some(UploadPhase::Uploading));
    }

    /// Record a transport tick. Ignored once the upload is no longer live.
    pub fn report_percent(&self, id: &UploadId, percent: f64) {
        if !self.registry.borrow().contains(id) {
            debug!("Ignoring progress for settled upload {}", id);
            return;
        }
        let percent = one_decimal(percent);
        self.apply(id, |entry| {
            entry.percent = match (entry.status, entry.percent) {
                (Some(UploadPhase::Uploading), Some(previous)) => Some(previous.max(percent)),
                _ => Some(percent),
            };
        });
    }

    /// Clear the entry after rendering `node` one last time.
    pub fn finish(&self, id: &UploadId, node: Option<NodeKey>) {
        let cleared = ProgressEntry::default();
        self.entries.borrow_mut().insert(id.clone(), cleared);
        if let Some(node) = node {
            self.render(node, Some(&cleared));
        }
        self.entries.borrow_mut().remove(id);
    }

    /// Release the rendered state of a node that was removed for good.
    pub fn forget(&self, node: NodeKey) {
        self.renderer.forget(node);
    }

    fn apply(&self, id: &UploadId, update: impl FnOnce(&mut ProgressEntry)) {
        let entry = {
            let mut entries = self.entries.borrow_mut();
            let entry = entries.entry(id.clone()).or_default();
            update(entry);
            *entry
        };

        let node = self.registry.borrow().node(id);
        if let Some(node) = node {
            self.render(node, Some(&entry));
        }
    }

    fn render(&self, node: NodeKey, entry: Option<&ProgressEntry>) {
        let document = self.document.read();
        if let Err(err) = self.renderer.rerender(&*document, node, entry) {
            debug!("Skipped re-render: {}", err);
        }
    }
}
