//! The per-upload task: read, upload, then commit or roll back.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, info, warn};

use super::progress::ProgressProjector;
use super::registry::UploadRegistry;
use super::transport::UploadTransport;
use super::types::{attr, TransportStatus, UploadComplete, UploadId, UploadPhase, UploadResponse};
use crate::config::UploadSuccessHook;
use crate::document::{DocumentHandle, Emitter, MutationBatch, NodeKey};
use crate::error::{TransportError, UploadError};
use crate::notify::Notifier;

pub const UPLOAD_FAILED_TITLE: &str = "Upload failed";

/// State shared by every upload task of a session.
#[derive(Clone)]
pub struct UploadContext {
    pub document: DocumentHandle,
    pub registry: Rc<RefCell<UploadRegistry>>,
    pub progress: Rc<ProgressProjector>,
    pub notifier: Rc<dyn Notifier>,
    pub completions: Emitter<UploadComplete>,
    /// Host hook, run after every completion listener.
    pub on_success: Option<UploadSuccessHook>,
}

impl UploadContext {
    /// Resolve the upload's node, `None` if it left the document.
    fn live_node(&self, id: &UploadId) -> Option<NodeKey> {
        let node = self.registry.borrow().node(id)?;
        self.document.read().contains(node).then_some(node)
    }

    fn commit(&self, id: &UploadId, response: UploadResponse) -> Result<UploadPhase, UploadError> {
        if !self.registry.borrow().contains(id) {
            debug!("Upload {} finished after it was cancelled", id);
            self.progress.finish(id, None);
            return Ok(UploadPhase::Aborted);
        }
        let Some(node) = self.live_node(id) else {
            debug!("Placeholder of upload {} is gone, dropping response", id);
            self.registry.borrow_mut().unregister(id);
            self.progress.finish(id, None);
            return Ok(UploadPhase::Aborted);
        };

        let mut attributes = BTreeMap::new();
        attributes.insert(attr::FILE_PATH.to_string(), response.url.clone());
        let committed = self
            .document
            .change(MutationBatch::non_undoable().set_attributes(node, attributes));

        self.registry.borrow_mut().unregister(id);
        self.progress.finish(id, Some(node));
        committed?;

        info!("Upload {} completed: {}", id, response.url);
        let complete = UploadComplete {
            id: id.clone(),
            response,
            node,
        };
        self.completions.emit(&complete);
        if let Some(hook) = &self.on_success {
            hook(&complete);
        }
        Ok(UploadPhase::Completed)
    }

    fn rollback(
        &self,
        id: &UploadId,
        status: TransportStatus,
        err: TransportError,
    ) -> Result<UploadPhase, UploadError> {
        let node = self.live_node(id);
        self.registry.borrow_mut().unregister(id);
        self.progress.finish(id, node);

        match status {
            TransportStatus::Error => {
                if let Some(node) = node {
                    self.document
                        .change(MutationBatch::non_undoable().purge(node))?;
                    self.progress.forget(node);
                }
                let message = err.to_string();
                // A cancellation surfaces as an error without a message.
                if message.is_empty() {
                    debug!("Upload {} cancelled by the transport", id);
                    return Ok(UploadPhase::Aborted);
                }
                warn!("Upload {} failed: {}", id, message);
                self.notifier.show_warning(&message, UPLOAD_FAILED_TITLE);
                Ok(UploadPhase::Failed)
            }
            TransportStatus::Aborted => {
                debug!("Upload {} aborted", id);
                Ok(UploadPhase::Aborted)
            }
            status => Err(UploadError::Unexpected {
                status,
                message: err.to_string(),
            }),
        }
    }
}

/// Drive one upload to a terminal phase.
///
/// Transport failures end in `Failed` or `Aborted`. Only a rejection the
/// transport does not account for is returned as an error.
pub async fn read_and_upload(
    ctx: UploadContext,
    transport: Rc<dyn UploadTransport>,
) -> Result<UploadPhase, UploadError> {
    let id = transport.id().clone();
    info!("Starting upload {}", id);
    ctx.progress.begin_reading(&id);

    let work = async {
        transport.read().await?;
        ctx.progress.begin_uploading(&id);
        transport.upload().await
    };
    tokio::pin!(work);

    let mut ticks = transport.progress();
    let result = loop {
        tokio::select! {
            result = &mut work => break result,
            changed = ticks.changed() => match changed {
                Ok(()) => {
                    let percent = *ticks.borrow_and_update();
                    if let Some(percent) = percent {
                        ctx.progress.report_percent(&id, percent);
                    }
                }
                Err(_) => break (&mut work).await,
            },
        }
    };

    match result {
        Ok(response) => ctx.commit(&id, response),
        Err(err) => ctx.rollback(&id, transport.status(), err),
    }
}
