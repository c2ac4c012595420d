//! One editing session's worth of upload state.
//!
//! [`UploadSession`] owns the registry, the progress map and the deletion
//! coordinator, and connects them to a document between [`UploadSession::start`]
//! and [`UploadSession::stop`]. Uploads run as local tasks, so the session
//! must be driven from inside a [`tokio::task::LocalSet`].

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::spawn_local;
use tracing::{debug, error, info, warn};

use super::deletion::DeletionCoordinator;
use super::guard::{InputEvent, InputGuard};
use super::http::{HttpDeleteTransport, HttpUploadAdapter};
use super::orchestrator::{read_and_upload, UploadContext};
use super::progress::{ProgressEntry, ProgressProjector};
use super::reconciler::{self, abort_uploads};
use super::registry::UploadRegistry;
use super::transport::{DeleteTransportBuilder, LoaderFactory, TransportFactory};
use super::types::{
    PlaceholderAttributes, SelectedFile, UploadComplete, UploadId, UploadPhase, PLACEHOLDER_ELEMENT,
};
use crate::config::{FileUploadConfig, UploadHooks};
use crate::document::{
    ChangeEvent, DocumentHandle, Emitter, MutationBatch, NewElement, NodeKey, Position,
    Subscription,
};
use crate::error::{ConfigError, UploadError};
use crate::notify::{Notifier, TracingNotifier};
use crate::view::{ContextualToolbar, NodeRenderer, ToolbarState, ViewRenderer};

/// Data handed over by a paste or drop.
#[derive(Debug, Clone, Default)]
pub struct ClipboardInput {
    /// `text/html` content of the payload, if any.
    pub html: Option<String>,
    pub files: Vec<SelectedFile>,
}

/// Host-side collaborators of a session.
#[derive(Clone)]
pub struct SessionServices {
    pub notifier: Rc<dyn Notifier>,
    pub renderer: Rc<dyn NodeRenderer>,
    pub toolbar: Rc<dyn ContextualToolbar>,
}

impl Default for SessionServices {
    fn default() -> Self {
        Self {
            notifier: Rc::new(TracingNotifier),
            renderer: Rc::new(ViewRenderer::new()),
            toolbar: Rc::new(ToolbarState::new()),
        }
    }
}

/// Terminal outcomes of the uploads run by a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub completed: usize,
    pub failed: usize,
    pub aborted: usize,
    /// Uploads whose task ended with an unexpected error.
    pub errored: usize,
}

impl UploadSummary {
    fn record(&mut self, phase: UploadPhase) {
        match phase {
            UploadPhase::Completed => self.completed += 1,
            UploadPhase::Failed => self.failed += 1,
            UploadPhase::Aborted => self.aborted += 1,
            other => debug!("Ignoring non-terminal phase {:?}", other),
        }
    }

    pub fn total(&self) -> usize {
        self.completed + self.failed + self.aborted + self.errored
    }

    pub fn status_text(&self) -> String {
        format!(
            "Uploads: {} | ✅ Completed: {} | ❌ Failed: {} | ⏹ Aborted: {}",
            self.total(),
            self.completed,
            self.failed + self.errored,
            self.aborted
        )
    }
}

struct SessionInner {
    config: FileUploadConfig,
    hooks: UploadHooks,
    factory: Rc<dyn TransportFactory>,
    ctx: UploadContext,
    deletion: Rc<DeletionCoordinator>,
    toolbar: Rc<dyn ContextualToolbar>,
    guard: InputGuard,
    summary: Rc<RefCell<UploadSummary>>,
    running: Rc<Cell<usize>>,
    idle: Rc<Notify>,
    subscriptions: RefCell<Vec<Subscription>>,
}

impl SessionInner {
    fn reconcile(&self, event: &ChangeEvent) {
        let plan = {
            let document = self.ctx.document.read();
            let registry = self.ctx.registry.borrow();
            reconciler::scan(&event.diff, &*document, &registry)
        };
        if plan.is_empty() {
            return;
        }
        debug!("Reconciling batch: {:?}", plan);
        plan.apply(&self.ctx.registry, |id| self.spawn_upload(id));
    }

    fn spawn_upload(&self, id: &UploadId) {
        let Some(transport) = self.ctx.registry.borrow().get(id) else {
            return;
        };
        let ctx = self.ctx.clone();
        let summary = self.summary.clone();
        let running = self.running.clone();
        let idle = self.idle.clone();
        let id = id.clone();

        running.set(running.get() + 1);
        spawn_local(async move {
            match read_and_upload(ctx, transport).await {
                Ok(phase) => summary.borrow_mut().record(phase),
                Err(err) => {
                    error!("Upload {} failed unexpectedly: {}", id, err);
                    summary.borrow_mut().errored += 1;
                }
            }
            running.set(running.get() - 1);
            idle.notify_waiters();
        });
    }

    fn is_idle(&self) -> bool {
        self.running.get() == 0 && self.ctx.registry.borrow().is_empty()
    }
}

/// Upload state of one editing session.
#[derive(Clone)]
pub struct UploadSession {
    inner: Rc<SessionInner>,
}

impl UploadSession {
    pub fn new(
        document: DocumentHandle,
        config: FileUploadConfig,
        hooks: UploadHooks,
        factory: Rc<dyn TransportFactory>,
        delete_transport: Option<DeleteTransportBuilder>,
        services: SessionServices,
    ) -> Self {
        let registry = Rc::new(RefCell::new(UploadRegistry::new()));
        let progress = Rc::new(ProgressProjector::new(
            registry.clone(),
            document.clone(),
            services.renderer.clone(),
        ));
        let deletion = Rc::new(DeletionCoordinator::new(
            document.clone(),
            services.notifier.clone(),
            services.toolbar.clone(),
            hooks.on_delete.clone(),
            delete_transport,
        ));
        let guard = InputGuard::from_config(&config);
        let on_success = hooks.on_upload_success.clone();

        Self {
            inner: Rc::new(SessionInner {
                config,
                hooks,
                factory,
                ctx: UploadContext {
                    document,
                    registry,
                    progress,
                    notifier: services.notifier,
                    completions: Emitter::new(),
                    on_success,
                },
                deletion,
                toolbar: services.toolbar,
                guard,
                summary: Rc::new(RefCell::new(UploadSummary::default())),
                running: Rc::new(Cell::new(0)),
                idle: Rc::new(Notify::new()),
                subscriptions: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Session talking HTTP to the configured endpoints.
    pub fn from_config(
        document: DocumentHandle,
        config: FileUploadConfig,
        hooks: UploadHooks,
        services: SessionServices,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let factory = match HttpUploadAdapter::builder(&config)? {
            Some(builder) => LoaderFactory::new(builder),
            None => LoaderFactory::unconfigured(),
        };
        let delete_transport = HttpDeleteTransport::builder(&config)?;
        Ok(Self::new(
            document,
            config,
            hooks,
            Rc::new(factory),
            delete_transport,
            services,
        ))
    }

    /// Subscribe to document changes. Calling it twice has no effect.
    pub fn start(&self) {
        if !self.inner.subscriptions.borrow().is_empty() {
            return;
        }
        let weak: Weak<SessionInner> = Rc::downgrade(&self.inner);
        let changes = self.inner.ctx.document.on_change(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.reconcile(event);
            }
        });

        self.inner.subscriptions.borrow_mut().push(changes);
        info!("Upload session started");
    }

    /// Unsubscribe and abort every upload still in flight.
    pub fn stop(&self) {
        let subscriptions: Vec<_> = self.inner.subscriptions.borrow_mut().drain(..).collect();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }

        let ids = self.inner.ctx.registry.borrow().ids();
        abort_uploads(&self.inner.ctx.registry, &ids);
        info!("Upload session stopped, {} uploads aborted", ids.len());
    }

    /// Whether uploading is possible at all.
    pub fn is_enabled(&self) -> bool {
        self.inner.config.is_upload_enabled()
    }

    pub fn document(&self) -> &DocumentHandle {
        &self.inner.ctx.document
    }

    /// Insert one placeholder per file in a single undoable batch.
    ///
    /// Files for which no transport can be created are skipped without
    /// a notice. Returns the ids of the uploads that were set up. Fails
    /// with [`UploadError::SessionInactive`] outside `start`/`stop`.
    pub fn select_files(
        &self,
        files: Vec<SelectedFile>,
        at: Position,
    ) -> Result<Vec<UploadId>, UploadError> {
        if self.inner.subscriptions.borrow().is_empty() {
            warn!("Ignoring {} selected files, session is not started", files.len());
            return Err(UploadError::SessionInactive);
        }
        let user = self.inner.hooks.current_user();
        let uploaded_at = Utc::now().to_rfc3339();
        let mut batch = MutationBatch::new();
        let mut ids = Vec::new();

        for file in files {
            let transport = match self.inner.factory.create(file.clone()) {
                Ok(transport) => transport,
                Err(UploadError::ConfigurationAbsent) => {
                    warn!("No upload adapter configured, skipping {}", file.name);
                    continue;
                }
                Err(err) => {
                    warn!("Cannot upload {}: {}", file.name, err);
                    continue;
                }
            };
            let id = transport.id().clone();
            let attrs = PlaceholderAttributes::pending(&id, &file, user.clone(), uploaded_at.clone());
            let position = Position {
                parent: at.parent,
                index: at.index.map(|index| index + ids.len()),
            };

            self.inner
                .ctx
                .registry
                .borrow_mut()
                .register(id.clone(), transport);
            batch = batch.insert(
                NewElement::new(PLACEHOLDER_ELEMENT).with_attributes(attrs.to_model()),
                position,
            );
            ids.push(id);
        }

        if batch.is_empty() {
            return Ok(ids);
        }
        if let Err(err) = self.inner.ctx.document.change(batch) {
            let mut registry = self.inner.ctx.registry.borrow_mut();
            for id in &ids {
                registry.unregister(id);
            }
            return Err(err.into());
        }
        Ok(ids)
    }

    /// Upload the files of a paste or drop. Payloads carrying HTML are left
    /// to the host, and files of types that are not accepted are dropped.
    pub fn handle_clipboard_input(
        &self,
        input: ClipboardInput,
        at: Position,
    ) -> Result<Vec<UploadId>, UploadError> {
        if input.html.as_deref().is_some_and(|html| !html.is_empty()) {
            return Ok(Vec::new());
        }
        let files: Vec<_> = input
            .files
            .into_iter()
            .filter(|file| self.inner.config.accepts(&file.mime))
            .collect();
        if files.is_empty() {
            return Ok(Vec::new());
        }
        self.select_files(files, at)
    }

    /// Show the contextual toolbar on a completed placeholder, hide it
    /// for any other selection.
    pub fn on_selection_change(&self, selected: Option<NodeKey>) {
        let completed = selected.filter(|node| {
            let document = self.inner.ctx.document.read();
            let is_completed = document.name(*node) == Some(PLACEHOLDER_ELEMENT)
                && document
                    .attributes(*node)
                    .and_then(PlaceholderAttributes::from_model)
                    .is_some_and(|attrs| attrs.is_completed());
            is_completed
        });
        match completed {
            Some(node) => self.inner.toolbar.show(node),
            None => self.inner.toolbar.hide(),
        }
    }

    /// Whether an input event on the current selection must be swallowed.
    pub fn should_suppress(&self, event: &InputEvent, selected: Option<NodeKey>) -> bool {
        let document = self.inner.ctx.document.read();
        let name = selected.and_then(|node| document.name(node));
        self.inner.guard.should_suppress(event, name)
    }

    pub async fn delete_file(&self, node: NodeKey) -> Result<(), UploadError> {
        let deletion = self.inner.deletion.clone();
        deletion.delete(node).await?;
        self.inner.ctx.progress.forget(node);
        Ok(())
    }

    pub fn cancel_delete(&self, node: NodeKey) -> bool {
        self.inner.deletion.cancel(node)
    }

    /// Called after each completed upload, before the configured
    /// `on_upload_success` hook.
    pub fn on_upload_complete(&self, listener: impl Fn(&UploadComplete) + 'static) -> Subscription {
        self.inner.ctx.completions.subscribe(listener)
    }

    pub fn progress(&self, id: &UploadId) -> Option<ProgressEntry> {
        self.inner.ctx.progress.entry(id)
    }

    pub fn pending_uploads(&self) -> usize {
        self.inner.ctx.registry.borrow().len()
    }

    pub fn summary(&self) -> UploadSummary {
        *self.inner.summary.borrow()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.is_idle()
    }

    /// Wait until no upload is registered or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.is_idle() {
                return;
            }
            notified.await;
        }
    }
}
