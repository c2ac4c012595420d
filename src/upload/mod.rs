mod deletion;
mod guard;
mod http;
mod orchestrator;
mod progress;
pub mod reconciler;
mod registry;
mod session;
mod transport;
mod types;

#[cfg(test)]
mod testing;

pub use deletion::DeletionCoordinator;
pub use guard::{InputEvent, InputGuard, SAFE_KEYS};
pub use http::{parse_delete_body, parse_upload_body, HttpDeleteTransport, HttpUploadAdapter};
pub use orchestrator::{read_and_upload, UploadContext, UPLOAD_FAILED_TITLE};
pub use progress::{ProgressEntry, ProgressProjector};
pub use reconciler::{abort_uploads, ReconcilePlan};
pub use registry::UploadRegistry;
pub use session::{ClipboardInput, SessionServices, UploadSession, UploadSummary};
pub use transport::{
    AdapterBuilder, DeleteTransport, DeleteTransportBuilder, FileLoader, LoaderFactory,
    ProgressSink, TransportFactory, UploadAdapter, UploadTransport,
};
pub use types::{
    attr, DeleteResponse, FileSource, PlaceholderAttributes, ResponseError, SelectedFile,
    TransportStatus, UploadComplete, UploadId, UploadPhase, UploadResponse, UploadedBy,
    PLACEHOLDER_ELEMENT,
};
