//! Upload configuration: serializable settings plus runtime hooks

use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;
use std::str::FromStr;

use derivative::Derivative;
use futures::future::LocalBoxFuture;
use glob::Pattern;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::document::NodeKey;
use crate::error::ConfigError;
use crate::upload::{PlaceholderAttributes, UploadComplete, UploadedBy};

/// Settings read from the host's configuration, usually a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileUploadConfig {
    /// Endpoint receiving multipart uploads. Without it uploads are disabled.
    pub upload_url: Option<String>,
    pub delete_url: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub with_credentials: bool,
    /// Accepted MIME types; glob patterns such as `image/*` are allowed.
    /// An empty list accepts everything.
    pub file_types: Vec<String>,
    pub additional_request_payload: BTreeMap<String, String>,
    pub disable_remove_by_keyboard: bool,
    pub disable_drag: bool,
}

impl FileUploadConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: FileUploadConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for pattern in &self.file_types {
            Pattern::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        }
        self.header_map()?;
        Ok(())
    }

    pub fn is_upload_enabled(&self) -> bool {
        self.upload_url.as_deref().is_some_and(|url| !url.is_empty())
    }

    pub fn accepts(&self, mime: &str) -> bool {
        if self.file_types.is_empty() {
            return true;
        }

        self.file_types.iter().any(|accepted| match Pattern::new(accepted) {
            Ok(pattern) => pattern.matches(mime),
            Err(_) => accepted == mime,
        })
    }

    /// Request headers sent with upload and delete requests.
    pub fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        let mut headers = HeaderMap::new();
        for (key, value) in &self.headers {
            let invalid = |reason: String| ConfigError::InvalidHeader {
                name: key.clone(),
                reason,
            };
            let name = HeaderName::from_str(&key.to_lowercase()).map_err(|e| invalid(e.to_string()))?;
            let value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// Decides whether a completed file may be deleted; `true` removes it.
pub type DeleteHook = Rc<dyn Fn(PlaceholderAttributes, NodeKey) -> LocalBoxFuture<'static, bool>>;
pub type UserResolver = Rc<dyn Fn() -> UploadedBy>;
pub type UploadSuccessHook = Rc<dyn Fn(&UploadComplete)>;

/// Host callbacks. Not serializable, so kept apart from [`FileUploadConfig`].
#[derive(Derivative, Clone, Default)]
#[derivative(Debug)]
pub struct UploadHooks {
    #[derivative(Debug = "ignore")]
    pub on_delete: Option<DeleteHook>,
    #[derivative(Debug = "ignore")]
    pub uploaded_by: Option<UserResolver>,
    #[derivative(Debug = "ignore")]
    pub on_upload_success: Option<UploadSuccessHook>,
}

impl UploadHooks {
    pub fn current_user(&self) -> UploadedBy {
        self.uploaded_by
            .as_ref()
            .map(|resolve| resolve())
            .unwrap_or_default()
    }
}
