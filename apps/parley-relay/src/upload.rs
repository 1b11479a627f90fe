use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("media upload is not configured")]
    NotConfigured,
    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upload service rejected the media: {0}")]
    Rejected(String),
}

/// External object storage: takes raw media bytes, returns a content URL.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload(&self, kind: MediaKind, bytes: Vec<u8>) -> Result<String, UploadError>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    url: Option<String>,
}

/// Uploads media by POSTing the raw bytes to `{endpoint}/{kind}`.
#[derive(Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUploader {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MediaUploader for HttpUploader {
    async fn upload(&self, kind: MediaKind, bytes: Vec<u8>) -> Result<String, UploadError> {
        let url = format!("{}/{}", self.endpoint, kind.as_str());
        debug!(%url, size = bytes.len(), "uploading media");
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;
        let body: UploadResponse = response.json().await?;
        body.secure_url
            .or(body.url)
            .ok_or_else(|| UploadError::Rejected("response carried no content url".into()))
    }
}

/// Used when no object storage endpoint is configured; every upload fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledUploader;

#[async_trait]
impl MediaUploader for DisabledUploader {
    async fn upload(&self, _kind: MediaKind, _bytes: Vec<u8>) -> Result<String, UploadError> {
        Err(UploadError::NotConfigured)
    }
}

/// Decodes inline media sent as plain base64 or as a `data:<mime>;base64,` URL.
pub fn decode_inline_media(raw: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let encoded = match raw.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => raw,
    };
    STANDARD.decode(encoded.trim())
}
