use std::collections::BTreeMap;
use std::rc::Rc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::transport::{
    AdapterBuilder, DeleteTransport, DeleteTransportBuilder, ProgressSink, UploadAdapter,
};
use super::types::{DeleteResponse, PlaceholderAttributes, ResponseError, SelectedFile, UploadResponse};
use crate::config::FileUploadConfig;
use crate::error::{ConfigError, TransportError};

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Deserialize)]
struct RawUploadResponse {
    url: Option<String>,
    error: Option<ResponseError>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Settings shared by the upload and delete requests.
#[derive(Clone)]
struct RequestSettings {
    client: Client,
    headers: HeaderMap,
}

impl RequestSettings {
    fn from_config(config: &FileUploadConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .cookie_store(config.with_credentials)
            .build()?;
        Ok(Self {
            client,
            headers: config.header_map()?,
        })
    }
}

/// Interpret an upload reply body. Anything without a `url` is a failure.
pub fn parse_upload_body(file_name: &str, body: &str) -> Result<UploadResponse, TransportError> {
    let generic = || TransportError::Rejected(format!("Couldn't upload file: {}.", file_name));

    let raw: RawUploadResponse = serde_json::from_str(body).map_err(|_| generic())?;
    if let Some(error) = raw.error {
        return Err(TransportError::Rejected(error.message));
    }
    let url = raw.url.ok_or_else(generic)?;
    Ok(UploadResponse {
        url,
        extra: raw.extra,
    })
}

/// Interpret a delete reply body.
pub fn parse_delete_body(file_name: &str, body: &str) -> Result<DeleteResponse, TransportError> {
    let generic = || TransportError::Rejected(format!("Couldn't delete file: {}.", file_name));

    let response: DeleteResponse = serde_json::from_str(body).map_err(|_| generic())?;
    match response.error {
        Some(error) => Err(TransportError::Rejected(error.message)),
        None => Ok(response),
    }
}

/// Multipart `POST` of the file under the `upload` field.
pub struct HttpUploadAdapter {
    settings: RequestSettings,
    url: String,
    additional_payload: BTreeMap<String, String>,
    cancel: watch::Sender<bool>,
}

impl HttpUploadAdapter {
    fn new(settings: RequestSettings, url: String, additional_payload: BTreeMap<String, String>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            settings,
            url,
            additional_payload,
            cancel,
        }
    }

    /// Adapter builder for a config, `None` when no upload URL is set.
    pub fn builder(config: &FileUploadConfig) -> Result<Option<AdapterBuilder>, ConfigError> {
        let url = match config.upload_url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => url.to_string(),
            None => return Ok(None),
        };
        let settings = RequestSettings::from_config(config)?;
        let payload = config.additional_request_payload.clone();

        Ok(Some(Rc::new(move |_file: &SelectedFile| {
            Box::new(HttpUploadAdapter::new(settings.clone(), url.clone(), payload.clone()))
                as Box<dyn UploadAdapter>
        })))
    }

    fn form(&self, file: &SelectedFile, data: Vec<u8>, progress: ProgressSink) -> Result<Form, TransportError> {
        let total = data.len() as u64;
        let chunks: Vec<Vec<u8>> = data.chunks(CHUNK_SIZE).map(|c| c.to_vec()).collect();
        let mut sent = 0u64;
        let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
            sent += chunk.len() as u64;
            progress.report(sent, total);
            Ok::<_, std::io::Error>(chunk)
        }));

        let part = Part::stream_with_length(Body::wrap_stream(stream), total)
            .file_name(file.name.clone())
            .mime_str(&file.mime)
            .map_err(|_| TransportError::InvalidHeader(file.mime.clone()))?;

        let mut form = Form::new().part("upload", part);
        for (key, value) in &self.additional_payload {
            form = form.text(key.clone(), value.clone());
        }
        Ok(form)
    }
}

#[async_trait(?Send)]
impl UploadAdapter for HttpUploadAdapter {
    async fn upload(
        &self,
        file: &SelectedFile,
        data: Vec<u8>,
        progress: ProgressSink,
    ) -> Result<UploadResponse, TransportError> {
        let form = self.form(file, data, progress)?;
        let request = self
            .settings
            .client
            .post(&self.url)
            .headers(self.settings.headers.clone())
            .multipart(form)
            .send();

        let mut cancelled = self.cancel.subscribe();
        let response = tokio::select! {
            response = request => response,
            _ = cancelled.wait_for(|c| *c) => return Err(TransportError::Aborted),
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!("Upload request for {} failed: {}", file.name, e);
                return Err(TransportError::Rejected(format!(
                    "Couldn't upload file: {}.",
                    file.name
                )));
            }
        };

        debug!("Upload of {} answered with {}", file.name, response.status());
        let body = response.text().await.unwrap_or_default();
        parse_upload_body(&file.name, &body)
    }

    fn abort(&self) {
        self.cancel.send_replace(true);
    }
}

/// `DELETE` request carrying the placeholder attributes as form fields.
pub struct HttpDeleteTransport {
    settings: RequestSettings,
    url: String,
    cancel: watch::Sender<bool>,
}

impl HttpDeleteTransport {
    /// Transport builder for a config, `None` when no delete URL is set.
    pub fn builder(config: &FileUploadConfig) -> Result<Option<DeleteTransportBuilder>, ConfigError> {
        let url = match config.delete_url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => url.to_string(),
            None => return Ok(None),
        };
        let settings = RequestSettings::from_config(config)?;

        Ok(Some(Rc::new(move || {
            let (cancel, _) = watch::channel(false);
            Rc::new(HttpDeleteTransport {
                settings: settings.clone(),
                url: url.clone(),
                cancel,
            }) as Rc<dyn DeleteTransport>
        })))
    }
}

#[async_trait(?Send)]
impl DeleteTransport for HttpDeleteTransport {
    async fn delete_file(
        &self,
        attributes: &PlaceholderAttributes,
    ) -> Result<DeleteResponse, TransportError> {
        let mut form = Form::new();
        for (key, value) in attributes.to_model() {
            form = form.text(key, value);
        }

        let request = self
            .settings
            .client
            .delete(&self.url)
            .headers(self.settings.headers.clone())
            .multipart(form)
            .send();

        let mut cancelled = self.cancel.subscribe();
        let response = tokio::select! {
            response = request => response,
            _ = cancelled.wait_for(|c| *c) => return Err(TransportError::Aborted),
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!("Delete request for {} failed: {}", attributes.file_name, e);
                return Err(TransportError::Rejected(format!(
                    "Couldn't delete file: {}.",
                    attributes.file_name
                )));
            }
        };

        let body = response.text().await.unwrap_or_default();
        parse_delete_body(&attributes.file_name, &body)
    }

    fn abort(&self) {
        self.cancel.send_replace(true);
    }
}
