//! Deleting completed files from the document.
//!
//! A host callback takes precedence over the remote endpoint; without
//! either, deletion is a plain local removal. At most one deletion runs per
//! node at a time.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, info, warn};

use super::transport::{DeleteTransport, DeleteTransportBuilder};
use super::types::PlaceholderAttributes;
use crate::config::DeleteHook;
use crate::document::{DocumentHandle, MutationBatch, NodeKey};
use crate::error::{DeletionError, TransportError};
use crate::notify::Notifier;
use crate::view::ContextualToolbar;

enum Strategy {
    Callback(DeleteHook),
    Remote(DeleteTransportBuilder),
    Local,
}

#[derive(Default)]
struct Pending {
    transport: Option<Rc<dyn DeleteTransport>>,
    cancelled: bool,
}

pub struct DeletionCoordinator {
    document: DocumentHandle,
    notifier: Rc<dyn Notifier>,
    toolbar: Rc<dyn ContextualToolbar>,
    strategy: Strategy,
    pending: RefCell<HashMap<NodeKey, Pending>>,
}

impl DeletionCoordinator {
    pub fn new(
        document: DocumentHandle,
        notifier: Rc<dyn Notifier>,
        toolbar: Rc<dyn ContextualToolbar>,
        on_delete: Option<DeleteHook>,
        remote: Option<DeleteTransportBuilder>,
    ) -> Self {
        let strategy = match (on_delete, remote) {
            (Some(hook), _) => Strategy::Callback(hook),
            (None, Some(builder)) => Strategy::Remote(builder),
            (None, None) => Strategy::Local,
        };
        Self {
            document,
            notifier,
            toolbar,
            strategy,
            pending: RefCell::new(HashMap::new()),
        }
    }

    pub fn is_pending(&self, node: NodeKey) -> bool {
        self.pending.borrow().contains_key(&node)
    }

    /// Delete the completed file behind `node`.
    ///
    /// A refusal raises a blocking alert and keeps the node. A cancelled
    /// deletion is silent. A node that disappears while the deletion is in
    /// flight is not an error.
    pub async fn delete(&self, node: NodeKey) -> Result<(), DeletionError> {
        if self.is_pending(node) {
            return Err(DeletionError::AlreadyPending);
        }
        let attrs = self
            .document
            .read()
            .attributes(node)
            .and_then(PlaceholderAttributes::from_model)
            .ok_or(DeletionError::NotFound)?;
        if !attrs.is_completed() {
            return Err(DeletionError::NotCompleted);
        }

        self.pending.borrow_mut().insert(node, Pending::default());
        let decision = self.decide(node, &attrs).await;
        let cancelled = self
            .pending
            .borrow_mut()
            .remove(&node)
            .is_some_and(|pending| pending.cancelled);

        match decision {
            _ if cancelled => {
                debug!("Deletion of {} cancelled", attrs.file_name);
                Err(DeletionError::Cancelled)
            }
            Ok(()) => {
                self.remove(node);
                info!("Deleted file {}", attrs.file_name);
                Ok(())
            }
            Err(DeletionError::Cancelled) => Err(DeletionError::Cancelled),
            Err(err) => {
                warn!("Deletion of {} refused: {}", attrs.file_name, err);
                self.notifier.show_alert(&err.to_string());
                Err(err)
            }
        }
    }

    /// Abort the pending deletion of `node`, if any.
    pub fn cancel(&self, node: NodeKey) -> bool {
        let transport = {
            let mut pending = self.pending.borrow_mut();
            let Some(entry) = pending.get_mut(&node) else {
                return false;
            };
            entry.cancelled = true;
            entry.transport.clone()
        };
        if let Some(transport) = transport {
            transport.abort();
        }
        true
    }

    async fn decide(&self, node: NodeKey, attrs: &PlaceholderAttributes) -> Result<(), DeletionError> {
        match &self.strategy {
            Strategy::Callback(hook) => {
                if hook(attrs.clone(), node).await {
                    Ok(())
                } else {
                    Err(DeletionError::Denied(format!(
                        "Couldn't delete file: {}.",
                        attrs.file_name
                    )))
                }
            }
            Strategy::Remote(build) => {
                let transport = build();
                if let Some(entry) = self.pending.borrow_mut().get_mut(&node) {
                    entry.transport = Some(transport.clone());
                }
                match transport.delete_file(attrs).await {
                    Ok(_) => Ok(()),
                    Err(TransportError::Aborted) => Err(DeletionError::Cancelled),
                    Err(err) => Err(DeletionError::Denied(err.to_string())),
                }
            }
            Strategy::Local => Ok(()),
        }
    }

    fn remove(&self, node: NodeKey) {
        let present = self.document.read().contains(node);
        if present {
            if let Err(err) = self
                .document
                .change(MutationBatch::non_undoable().purge(node))
            {
                debug!("Deleted node already gone: {}", err);
            }
        }
        self.toolbar.hide();
    }
}
