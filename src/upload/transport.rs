//! Upload and delete transport contracts, and the file loader that drives an
//! upload adapter through read, upload and abort.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use super::types::{
    DeleteResponse, FileSource, PlaceholderAttributes, SelectedFile, TransportStatus, UploadId,
    UploadResponse,
};
use crate::error::{TransportError, UploadError};

/// One upload attempt.
#[async_trait(?Send)]
pub trait UploadTransport {
    fn id(&self) -> &UploadId;

    fn status(&self) -> TransportStatus;

    /// Percentage of bytes sent, 0–100, `None` until known.
    fn uploaded_percent(&self) -> Option<f64>;

    /// Observe `uploaded_percent` changes.
    fn progress(&self) -> watch::Receiver<Option<f64>>;

    /// Acquire the local payload.
    async fn read(&self) -> Result<(), TransportError>;

    async fn upload(&self) -> Result<UploadResponse, TransportError>;

    /// Ask the transfer to stop. Settlement is reported through `upload()`.
    fn abort(&self);
}

/// Builds transports for newly selected files.
pub trait TransportFactory {
    /// Fails with [`UploadError::ConfigurationAbsent`] when no adapter exists.
    fn create(&self, file: SelectedFile) -> Result<Rc<dyn UploadTransport>, UploadError>;
}

/// Reports bytes sent from whatever task performs the transfer.
#[derive(Clone)]
pub struct ProgressSink {
    tx: Arc<watch::Sender<Option<f64>>>,
}

impl ProgressSink {
    pub fn report(&self, loaded: u64, total: u64) {
        if total == 0 {
            return;
        }
        let percent = (loaded.min(total) as f64 / total as f64) * 100.0;
        self.tx.send_replace(Some(percent));
    }
}

/// Network side of an upload.
#[async_trait(?Send)]
pub trait UploadAdapter {
    async fn upload(
        &self,
        file: &SelectedFile,
        data: Vec<u8>,
        progress: ProgressSink,
    ) -> Result<UploadResponse, TransportError>;

    fn abort(&self);
}

/// [`UploadTransport`] over an [`UploadAdapter`].
pub struct FileLoader {
    id: UploadId,
    file: SelectedFile,
    adapter: Box<dyn UploadAdapter>,
    status: Cell<TransportStatus>,
    data: RefCell<Option<Vec<u8>>>,
    progress_tx: Arc<watch::Sender<Option<f64>>>,
    progress_rx: watch::Receiver<Option<f64>>,
    cancel_tx: watch::Sender<bool>,
}

impl FileLoader {
    pub fn new(id: UploadId, file: SelectedFile, adapter: Box<dyn UploadAdapter>) -> Self {
        let (progress_tx, progress_rx) = watch::channel(None);
        let (cancel_tx, _) = watch::channel(false);
        Self {
            id,
            file,
            adapter,
            status: Cell::new(TransportStatus::Idle),
            data: RefCell::new(None),
            progress_tx: Arc::new(progress_tx),
            progress_rx,
            cancel_tx,
        }
    }

    pub fn file(&self) -> &SelectedFile {
        &self.file
    }

    async fn cancelled(&self) {
        let mut rx = self.cancel_tx.subscribe();
        // The sender lives as long as `self`, so this only returns on abort.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    async fn read_source(&self) -> Result<Vec<u8>, TransportError> {
        match &self.file.source {
            FileSource::Bytes(bytes) => Ok(bytes.clone()),
            FileSource::Path(path) => Ok(tokio::fs::read(path).await?),
        }
    }
}

#[async_trait(?Send)]
impl UploadTransport for FileLoader {
    fn id(&self) -> &UploadId {
        &self.id
    }

    fn status(&self) -> TransportStatus {
        self.status.get()
    }

    fn uploaded_percent(&self) -> Option<f64> {
        *self.progress_rx.borrow()
    }

    fn progress(&self) -> watch::Receiver<Option<f64>> {
        self.progress_rx.clone()
    }

    async fn read(&self) -> Result<(), TransportError> {
        if self.status.get() == TransportStatus::Aborted {
            return Err(TransportError::Aborted);
        }
        self.status.set(TransportStatus::Reading);

        let result = tokio::select! {
            result = self.read_source() => result,
            _ = self.cancelled() => Err(TransportError::Aborted),
        };

        match result {
            Ok(data) => {
                *self.data.borrow_mut() = Some(data);
                Ok(())
            }
            Err(_) if self.status.get() == TransportStatus::Aborted => Err(TransportError::Aborted),
            Err(err) => {
                self.status.set(TransportStatus::Error);
                Err(err)
            }
        }
    }

    async fn upload(&self) -> Result<UploadResponse, TransportError> {
        if self.status.get() == TransportStatus::Aborted {
            return Err(TransportError::Aborted);
        }
        let data = self
            .data
            .borrow_mut()
            .take()
            .ok_or_else(|| TransportError::Rejected(format!("{} was not read", self.file.name)))?;

        self.status.set(TransportStatus::Uploading);
        let sink = ProgressSink {
            tx: self.progress_tx.clone(),
        };

        let result = tokio::select! {
            result = self.adapter.upload(&self.file, data, sink) => result,
            _ = self.cancelled() => Err(TransportError::Aborted),
        };

        if self.status.get() == TransportStatus::Aborted {
            return Err(TransportError::Aborted);
        }
        match result {
            Ok(response) => {
                self.status.set(TransportStatus::Done);
                Ok(response)
            }
            Err(err) if err.is_abort() => {
                self.status.set(TransportStatus::Aborted);
                Err(err)
            }
            Err(err) => {
                self.status.set(TransportStatus::Error);
                Err(err)
            }
        }
    }

    fn abort(&self) {
        let previous = self.status.get();
        if previous.is_settled() {
            return;
        }
        debug!("Aborting upload {} in status {:?}", self.id, previous);
        self.status.set(TransportStatus::Aborted);
        self.cancel_tx.send_replace(true);
        if previous == TransportStatus::Uploading {
            self.adapter.abort();
        }
    }
}

pub type AdapterBuilder = Rc<dyn Fn(&SelectedFile) -> Box<dyn UploadAdapter>>;

/// Creates [`FileLoader`]s with fresh ids.
#[derive(Clone, Default)]
pub struct LoaderFactory {
    builder: Option<AdapterBuilder>,
}

impl LoaderFactory {
    pub fn new(builder: AdapterBuilder) -> Self {
        Self {
            builder: Some(builder),
        }
    }

    /// A factory without an adapter: every file is a silent no-op.
    pub fn unconfigured() -> Self {
        Self { builder: None }
    }
}

impl TransportFactory for LoaderFactory {
    fn create(&self, file: SelectedFile) -> Result<Rc<dyn UploadTransport>, UploadError> {
        let builder = self.builder.as_ref().ok_or(UploadError::ConfigurationAbsent)?;
        let adapter = builder(&file);
        Ok(Rc::new(FileLoader::new(UploadId::generate(), file, adapter)))
    }
}

/// Remote deletion of an uploaded file.
#[async_trait(?Send)]
pub trait DeleteTransport {
    async fn delete_file(
        &self,
        attributes: &PlaceholderAttributes,
    ) -> Result<DeleteResponse, TransportError>;

    fn abort(&self);
}

pub type DeleteTransportBuilder = Rc<dyn Fn() -> Rc<dyn DeleteTransport>>;
