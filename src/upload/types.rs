use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::NodeKey;
use crate::utils::file_size::FileSizeUtils;

/// Model element name of a file placeholder.
pub const PLACEHOLDER_ELEMENT: &str = "fileUploadPlaceholder";

/// Model attribute names carried by a placeholder.
pub mod attr {
    pub const FILE_UID: &str = "fileUid";
    pub const FILE_PATH: &str = "filePath";
    pub const FILE_NAME: &str = "fileName";
    pub const FILE_SIZE: &str = "fileSize";
    pub const UPLOADED_AT: &str = "uploadedAt";
    pub const UPLOADED_BY: &str = "uploadedBy";
    pub const UPLOADED_BY_ID: &str = "uploadedById";
    pub const UPLOADED_BY_COLOR: &str = "uploadedByColor";
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UploadId(pub String);

impl UploadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of an upload in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadPhase {
    Idle,
    Reading,
    Uploading,
    Completed,
    Failed,
    Aborted,
}

impl UploadPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadPhase::Completed | UploadPhase::Failed | UploadPhase::Aborted
        )
    }
}

/// Status reported by an upload transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportStatus {
    Idle,
    Reading,
    Uploading,
    Done,
    Error,
    Aborted,
}

impl TransportStatus {
    pub fn phase(&self) -> UploadPhase {
        match self {
            TransportStatus::Idle => UploadPhase::Idle,
            TransportStatus::Reading => UploadPhase::Reading,
            TransportStatus::Uploading => UploadPhase::Uploading,
            TransportStatus::Done => UploadPhase::Completed,
            TransportStatus::Error => UploadPhase::Failed,
            TransportStatus::Aborted => UploadPhase::Aborted,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.phase().is_terminal()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedBy {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub color: String,
}

/// Where the bytes of a selected file come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// One file handed over by a user selection, paste or drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub source: FileSource,
}

impl SelectedFile {
    pub fn from_bytes(name: impl Into<String>, mime: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            size: data.len() as u64,
            source: FileSource::Bytes(data),
        }
    }

    pub fn from_path(path: &Path, mime: impl Into<String>) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        Ok(Self {
            name,
            mime: mime.into(),
            size: metadata.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }
}

/// Attributes of a placeholder node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderAttributes {
    pub file_uid: String,
    /// Remote location, empty until the upload is committed.
    pub file_path: String,
    pub file_name: String,
    pub file_size: String,
    pub uploaded_at: String,
    pub uploaded_by: UploadedBy,
}

impl PlaceholderAttributes {
    pub fn pending(id: &UploadId, file: &SelectedFile, user: UploadedBy, uploaded_at: String) -> Self {
        Self {
            file_uid: id.to_string(),
            file_path: String::new(),
            file_name: file.name.clone(),
            file_size: FileSizeUtils::format_size(file.size),
            uploaded_at,
            uploaded_by: user,
        }
    }

    pub fn is_completed(&self) -> bool {
        !self.file_path.is_empty()
    }

    pub fn to_model(&self) -> BTreeMap<String, String> {
        [
            (attr::FILE_UID, &self.file_uid),
            (attr::FILE_PATH, &self.file_path),
            (attr::FILE_NAME, &self.file_name),
            (attr::FILE_SIZE, &self.file_size),
            (attr::UPLOADED_AT, &self.uploaded_at),
            (attr::UPLOADED_BY, &self.uploaded_by.name),
            (attr::UPLOADED_BY_ID, &self.uploaded_by.id),
            (attr::UPLOADED_BY_COLOR, &self.uploaded_by.color),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
    }

    /// Read attributes off a model node; `None` without a `fileUid`.
    pub fn from_model(attributes: &BTreeMap<String, String>) -> Option<Self> {
        let get = |name: &str| attributes.get(name).cloned().unwrap_or_default();
        let file_uid = attributes.get(attr::FILE_UID).filter(|v| !v.is_empty())?;

        Some(Self {
            file_uid: file_uid.clone(),
            file_path: get(attr::FILE_PATH),
            file_name: get(attr::FILE_NAME),
            file_size: get(attr::FILE_SIZE),
            uploaded_at: get(attr::UPLOADED_AT),
            uploaded_by: UploadedBy {
                name: get(attr::UPLOADED_BY),
                id: get(attr::UPLOADED_BY_ID),
                color: get(attr::UPLOADED_BY_COLOR),
            },
        })
    }
}

/// Body returned by a successful upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub url: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UploadResponse {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    #[serde(default)]
    pub error: Option<ResponseError>,
}

/// Emitted once a placeholder has its `filePath` committed.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadComplete {
    pub id: UploadId,
    pub response: UploadResponse,
    pub node: NodeKey,
}
