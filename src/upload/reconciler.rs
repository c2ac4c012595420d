//! Matches committed document batches against in-flight uploads.
//!
//! A batch is handled in two steps. [`scan`] reads the diff (newest entry
//! first) together with the committed document and decides what should
//! happen to every affected upload. [`ReconcilePlan::apply`] then acts on
//! that decision. Aborts are only decided once the whole batch is known: a
//! placeholder that lands in the graveyard while a copy with the same
//! upload id lands in live content was moved, not removed.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use super::registry::UploadRegistry;
use super::types::{attr, TransportStatus, UploadId};
use crate::document::{DiffEntry, DiffKind, DocumentTree, NodeKey, RootKind};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Node each upload should resolve against from now on.
    pub repoint: Vec<(UploadId, NodeKey)>,
    /// Idle uploads that reached live content.
    pub start: Vec<UploadId>,
    /// Uploads whose placeholder went to the graveyard for good.
    pub abort: Vec<UploadId>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.repoint.is_empty() && self.start.is_empty() && self.abort.is_empty()
    }

    /// Re-point uploads, hand newly live ones to `start`, then abort.
    pub fn apply(&self, registry: &RefCell<UploadRegistry>, mut start: impl FnMut(&UploadId)) {
        {
            let mut registry = registry.borrow_mut();
            for (id, node) in &self.repoint {
                registry.bind_node(id, *node);
            }
        }

        for id in &self.start {
            let claimed = registry.borrow_mut().mark_started(id);
            if claimed {
                start(id);
            }
        }

        abort_uploads(registry, &self.abort);
    }
}

/// Unregister and abort each upload. Ids that are no longer registered are
/// skipped, so repeating the call never aborts a transport twice.
pub fn abort_uploads(registry: &RefCell<UploadRegistry>, ids: &[UploadId]) {
    for id in ids {
        let transport = registry.borrow_mut().unregister(id);
        if let Some(transport) = transport {
            info!("Aborting upload {}: placeholder removed", id);
            transport.abort();
        }
    }
}

/// Decide what a committed batch means for the registered uploads.
pub fn scan(
    diff: &[DiffEntry],
    document: &dyn DocumentTree,
    registry: &UploadRegistry,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();
    let mut seen: HashSet<UploadId> = HashSet::new();
    let mut candidates: Vec<UploadId> = Vec::new();
    let mut targets: HashMap<UploadId, NodeKey> = HashMap::new();
    let mut order: Vec<UploadId> = Vec::new();

    for entry in diff.iter().rev().filter(|entry| entry.kind == DiffKind::Insert) {
        for node in document.subtree(entry.node) {
            let Some(uid) = document.attribute(node, attr::FILE_UID) else {
                continue;
            };
            if uid.is_empty() {
                continue;
            }
            let id = UploadId::new(uid);
            let Some(transport) = registry.get(&id) else {
                continue;
            };

            match entry.root {
                RootKind::Graveyard => {
                    if !candidates.contains(&id) {
                        candidates.push(id);
                    }
                }
                RootKind::Main => {
                    let live = document.root_of(node) == Some(RootKind::Main);
                    let current = targets.get(&id).copied();
                    match current {
                        None => {
                            order.push(id.clone());
                            targets.insert(id.clone(), node);
                        }
                        // Newest live copy wins; an older entry only replaces
                        // a target that has since left live content.
                        Some(current) if live && document.root_of(current) != Some(RootKind::Main) => {
                            targets.insert(id.clone(), node);
                        }
                        Some(_) => {}
                    }

                    if transport.status() == TransportStatus::Idle
                        && !registry.is_started(&id)
                        && !plan.start.contains(&id)
                    {
                        plan.start.push(id.clone());
                    }
                    seen.insert(id);
                }
            }
        }
    }

    plan.repoint = order
        .into_iter()
        .filter_map(|id| targets.remove(&id).map(|node| (id, node)))
        .collect();

    for id in candidates {
        if seen.contains(&id) {
            debug!("Upload {} moved within the batch, keeping it", id);
        } else {
            plan.abort.push(id);
        }
    }
    plan
}
