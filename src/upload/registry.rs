use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use derivative::Derivative;
use tracing::debug;

use super::transport::UploadTransport;
use super::types::UploadId;
use crate::document::NodeKey;

#[derive(Derivative)]
#[derivative(Debug)]
struct Entry {
    #[derivative(Debug(format_with = "fmt_status"))]
    transport: Rc<dyn UploadTransport>,
    node: Option<NodeKey>,
    started: bool,
}

/// Upload id to in-flight transport, plus the node each upload resolves
/// against. An id is live exactly while it is registered here.
#[derive(Debug, Default)]
pub struct UploadRegistry {
    entries: HashMap<UploadId, Entry>,
}

impl UploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport. A second registration for a live id is a no-op
    /// and returns `false`.
    pub fn register(&mut self, id: UploadId, transport: Rc<dyn UploadTransport>) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        debug!("Registered upload {}", id);
        self.entries.insert(
            id,
            Entry {
                transport,
                node: None,
                started: false,
            },
        );
        true
    }

    pub fn get(&self, id: &UploadId) -> Option<Rc<dyn UploadTransport>> {
        self.entries.get(id).map(|entry| entry.transport.clone())
    }

    pub fn unregister(&mut self, id: &UploadId) -> Option<Rc<dyn UploadTransport>> {
        let entry = self.entries.remove(id)?;
        debug!("Unregistered upload {}", id);
        Some(entry.transport)
    }

    pub fn contains(&self, id: &UploadId) -> bool {
        self.entries.contains_key(id)
    }

    /// Point the upload at a node, replacing any previous binding.
    pub fn bind_node(&mut self, id: &UploadId, node: NodeKey) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.node = Some(node);
                true
            }
            None => false,
        }
    }

    pub fn node(&self, id: &UploadId) -> Option<NodeKey> {
        self.entries.get(id).and_then(|entry| entry.node)
    }

    /// Claim the right to run this upload. Returns `false` if it is not
    /// registered or was already claimed.
    pub fn mark_started(&mut self, id: &UploadId) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) if !entry.started => {
                entry.started = true;
                true
            }
            _ => false,
        }
    }

    pub fn is_started(&self, id: &UploadId) -> bool {
        self.entries.get(id).is_some_and(|entry| entry.started)
    }

    pub fn ids(&self) -> Vec<UploadId> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn fmt_status(transport: &Rc<dyn UploadTransport>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:?}", transport.status())
}
