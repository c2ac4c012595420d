//! Test doubles shared by the upload unit tests.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use async_trait::async_trait;
use futures::channel::oneshot;
use tokio::sync::watch;

use super::transport::{
    FileLoader, LoaderFactory, ProgressSink, TransportFactory, UploadAdapter, UploadTransport,
};
use super::types::{SelectedFile, TransportStatus, UploadId, UploadResponse};
use crate::error::{TransportError, UploadError};
use crate::notify::Notifier;

type Reply = Result<UploadResponse, TransportError>;

struct PendingAdapter;

#[async_trait(?Send)]
impl UploadAdapter for PendingAdapter {
    async fn upload(&self, _: &SelectedFile, _: Vec<u8>, _: ProgressSink) -> Reply {
        futures::future::pending().await
    }

    fn abort(&self) {}
}

/// A transport that never settles on its own.
pub fn idle_transport(id: &str) -> Rc<dyn UploadTransport> {
    let file = SelectedFile::from_bytes("a.txt", "text/plain", vec![1, 2, 3]);
    Rc::new(FileLoader::new(UploadId::new(id), file, Box::new(PendingAdapter)))
}

/// Rejects its upload while still reporting `Uploading`.
pub struct StuckTransport {
    id: UploadId,
    status: Cell<TransportStatus>,
    progress_tx: watch::Sender<Option<f64>>,
}

impl StuckTransport {
    pub fn new(id: &str) -> Self {
        let (progress_tx, _) = watch::channel(None);
        Self {
            id: UploadId::new(id),
            status: Cell::new(TransportStatus::Idle),
            progress_tx,
        }
    }
}

#[async_trait(?Send)]
impl UploadTransport for StuckTransport {
    fn id(&self) -> &UploadId {
        &self.id
    }

    fn status(&self) -> TransportStatus {
        self.status.get()
    }

    fn uploaded_percent(&self) -> Option<f64> {
        None
    }

    fn progress(&self) -> watch::Receiver<Option<f64>> {
        self.progress_tx.subscribe()
    }

    async fn read(&self) -> Result<(), TransportError> {
        self.status.set(TransportStatus::Uploading);
        Ok(())
    }

    async fn upload(&self) -> Result<UploadResponse, TransportError> {
        Err(TransportError::Rejected("socket closed".into()))
    }

    fn abort(&self) {}
}

/// Builds a [`StuckTransport`] per file, named after the file.
pub struct StuckFactory;

impl TransportFactory for StuckFactory {
    fn create(&self, file: SelectedFile) -> Result<Rc<dyn UploadTransport>, UploadError> {
        Ok(Rc::new(StuckTransport::new(&file.name)))
    }
}

/// Test-side controls of one scripted upload.
#[derive(Default)]
pub struct ScriptHandle {
    reply: RefCell<Option<oneshot::Sender<Reply>>>,
    sink: RefCell<Option<ProgressSink>>,
    aborts: Cell<usize>,
}

impl ScriptHandle {
    pub fn resolve(&self, reply: Reply) {
        if let Some(tx) = self.reply.borrow_mut().take() {
            let _ = tx.send(reply);
        }
    }

    pub fn report(&self, loaded: u64, total: u64) {
        if let Some(sink) = self.sink.borrow().as_ref() {
            sink.report(loaded, total);
        }
    }

    pub fn started(&self) -> bool {
        self.sink.borrow().is_some()
    }

    pub fn aborts(&self) -> usize {
        self.aborts.get()
    }
}

struct ScriptedAdapter {
    handle: Rc<ScriptHandle>,
    reply: RefCell<Option<oneshot::Receiver<Reply>>>,
}

#[async_trait(?Send)]
impl UploadAdapter for ScriptedAdapter {
    async fn upload(&self, _: &SelectedFile, _: Vec<u8>, progress: ProgressSink) -> Reply {
        *self.handle.sink.borrow_mut() = Some(progress);
        let reply = self.reply.borrow_mut().take();
        match reply {
            Some(rx) => rx.await.unwrap_or(Err(TransportError::Aborted)),
            None => Err(TransportError::Rejected("upload started twice".into())),
        }
    }

    fn abort(&self) {
        self.handle.aborts.set(self.handle.aborts.get() + 1);
    }
}

/// Loader factory whose adapters are driven from the test, by file name.
#[derive(Clone, Default)]
pub struct ScriptedUploads {
    handles: Rc<RefCell<HashMap<String, Rc<ScriptHandle>>>>,
}

impl ScriptedUploads {
    pub fn factory(&self) -> LoaderFactory {
        let handles = self.handles.clone();
        LoaderFactory::new(Rc::new(move |file: &SelectedFile| {
            let (tx, rx) = oneshot::channel();
            let handle = Rc::new(ScriptHandle::default());
            *handle.reply.borrow_mut() = Some(tx);
            handles
                .borrow_mut()
                .insert(file.name.clone(), handle.clone());
            Box::new(ScriptedAdapter {
                handle,
                reply: RefCell::new(Some(rx)),
            }) as Box<dyn UploadAdapter>
        }))
    }

    pub fn handle(&self, file_name: &str) -> Rc<ScriptHandle> {
        self.handles
            .borrow()
            .get(file_name)
            .cloned()
            .unwrap_or_else(|| panic!("no upload for {}", file_name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Warning { message: String, title: String },
    Alert(String),
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: RefCell<Vec<Notice>>,
}

impl Notifier for RecordingNotifier {
    fn show_warning(&self, message: &str, title: &str) {
        self.notices.borrow_mut().push(Notice::Warning {
            message: message.to_string(),
            title: title.to_string(),
        });
    }

    fn show_alert(&self, message: &str) {
        self.notices
            .borrow_mut()
            .push(Notice::Alert(message.to_string()));
    }
}

/// Let spawned local tasks run until they block.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
