use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::UploadError;
use crate::services::validation::FileKind;

/// Extraction can be slow; after this the request is abandoned.
pub const EXPENSE_UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub kind: FileKind,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ZipPayload {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

pub struct WebhookClient {
    client: reqwest::Client,
    expense_timeout: Duration,
}

impl WebhookClient {
    pub fn new() -> Self {
        Self::with_timeout(EXPENSE_UPLOAD_TIMEOUT)
    }

    pub fn with_timeout(expense_timeout: Duration) -> Self {
        WebhookClient {
            client: reqwest::Client::new(),
            expense_timeout,
        }
    }

    /// Sends a receipt or invoice to the extraction workflow and returns its JSON verbatim.
    pub async fn upload_expense_document(
        &self,
        url: &str,
        file: &UploadFile,
    ) -> Result<Value, UploadError> {
        let form = Form::new().part("file", file_part(file)?);

        info!(file = %file.name, "uploading expense document");
        let response = self
            .client
            .post(url)
            .multipart(form)
            .timeout(self.expense_timeout)
            .send()
            .await
            .map_err(map_send_error)?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "extraction workflow rejected document");
            return Err(UploadError::ProcessingFailed(
                "Failed to process document".to_string(),
            ));
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                UploadError::Timeout
            } else {
                UploadError::ProcessingFailed(format!("Invalid workflow response: {}", e))
            }
        })
    }

    /// Sends an image to the resize workflow and returns the ZIP archive it produced.
    pub async fn resize_images(
        &self,
        url: &str,
        file: &UploadFile,
        preset: &str,
        output_format: &str,
    ) -> Result<ZipPayload, UploadError> {
        let form = Form::new()
            .part("file", file_part(file)?)
            .text("preset", preset.to_string())
            .text("outputFormat", output_format.to_string());

        info!(file = %file.name, preset, output_format, "uploading image for resizing");
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or(status.as_str());
            return Err(UploadError::ProcessingFailed(format!(
                "Server error: {}",
                reason
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        debug!(content_type = ?content_type, "resize workflow responded");

        let bytes = response
            .bytes()
            .await
            .map_err(|e| UploadError::ProcessingFailed(format!("Failed to read archive: {}", e)))?
            .to_vec();

        if bytes.is_empty() {
            return Err(UploadError::EmptyArchive);
        }
        if !is_zip_signature(&bytes) {
            return Err(UploadError::InvalidArchive);
        }

        Ok(ZipPayload {
            bytes,
            content_type,
        })
    }
}

impl Default for WebhookClient {
    fn default() -> Self {
        Self::new()
    }
}

/// True when the buffer opens with the `PK` local-file-header signature.
pub fn is_zip_signature(bytes: &[u8]) -> bool {
    matches!(bytes, [0x50, 0x4B, ..])
}

pub fn archive_file_name(preset: &str, output_format: &str, millis: i64) -> String {
    format!("resized_images_{}_{}_{}.zip", preset, output_format, millis)
}

fn file_part(file: &UploadFile) -> Result<Part, UploadError> {
    Part::bytes(file.bytes.clone())
        .file_name(file.name.clone())
        .mime_str(file.kind.mime())
        .map_err(|e| UploadError::Other(e.into()))
}

fn map_send_error(err: reqwest::Error) -> UploadError {
    if err.is_timeout() {
        return UploadError::Timeout;
    }
    warn!(error = %err, "webhook request failed");
    UploadError::ProcessingFailed(format!("Failed to reach workflow: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{StubResponse, StubServer};
    use serde_json::json;

    fn pdf() -> UploadFile {
        UploadFile {
            name: "receipt.pdf".to_string(),
            kind: FileKind::Pdf,
            bytes: b"%PDF-1.4 fake".to_vec(),
        }
    }

    #[test]
    fn zip_signature_detection() {
        assert!(is_zip_signature(b"PK\x03\x04rest"));
        assert!(is_zip_signature(b"PK\x05\x06"));
        assert!(is_zip_signature(b"PK"));
        assert!(!is_zip_signature(b"P"));
        assert!(!is_zip_signature(b""));
        assert!(!is_zip_signature(b"{\"error\":true}"));
        assert!(!is_zip_signature(b"pk\x03\x04"));
    }

    #[test]
    fn archive_name_format() {
        assert_eq!(
            archive_file_name("instagram", "webp", 1700000000000),
            "resized_images_instagram_webp_1700000000000.zip"
        );
    }

    #[tokio::test]
    async fn expense_upload_posts_multipart_file() {
        let server = StubServer::start(|_| {
            StubResponse::json(200, json!([{"category": "INVOICE", "total": 10}]))
        })
        .await;

        let client = WebhookClient::new();
        let value = client
            .upload_expense_document(&format!("{}/hook", server.url), &pdf())
            .await
            .unwrap();
        assert_eq!(value[0]["category"], "INVOICE");

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].path, "/hook");
        assert!(requests[0]
            .header("content-type")
            .unwrap()
            .starts_with("multipart/form-data"));
        let body = requests[0].body_text();
        assert!(body.contains("name=\"file\""));
        assert!(body.contains("filename=\"receipt.pdf\""));
        assert!(body.contains("application/pdf"));
    }

    #[tokio::test]
    async fn expense_upload_maps_error_status() {
        let server = StubServer::start(|_| StubResponse::json(500, json!({}))).await;
        let err = WebhookClient::new()
            .upload_expense_document(&server.url, &pdf())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to process document");
    }

    #[tokio::test]
    async fn expense_upload_times_out() {
        let server = StubServer::start(|_| {
            StubResponse::json(200, json!({})).delayed(Duration::from_secs(3))
        })
        .await;
        let err = WebhookClient::with_timeout(Duration::from_millis(200))
            .upload_expense_document(&server.url, &pdf())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Timeout));
        assert!(err.to_string().starts_with("Request timed out after 2 minutes"));
    }

    #[tokio::test]
    async fn resize_sends_preset_and_format() {
        let server = StubServer::start(|_| {
            StubResponse::bytes(200, "application/zip", b"PK\x03\x04archive")
        })
        .await;
        let payload = WebhookClient::new()
            .resize_images(&server.url, &pdf(), "instagram", "webp")
            .await
            .unwrap();
        assert_eq!(payload.bytes, b"PK\x03\x04archive".to_vec());
        assert_eq!(payload.content_type.as_deref(), Some("application/zip"));

        let body = server.requests()[0].body_text();
        assert!(body.contains("name=\"preset\""));
        assert!(body.contains("instagram"));
        assert!(body.contains("name=\"outputFormat\""));
        assert!(body.contains("webp"));
    }

    #[tokio::test]
    async fn resize_rejects_empty_and_non_zip_bodies() {
        let empty = StubServer::start(|_| StubResponse::bytes(200, "application/zip", b"")).await;
        let err = WebhookClient::new()
            .resize_images(&empty.url, &pdf(), "a", "png")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::EmptyArchive));

        let html = StubServer::start(|_| StubResponse::bytes(200, "text/html", b"<html>")).await;
        let err = WebhookClient::new()
            .resize_images(&html.url, &pdf(), "a", "png")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidArchive));
    }

    #[tokio::test]
    async fn resize_reports_status_reason() {
        let server = StubServer::start(|_| StubResponse::bytes(502, "text/plain", b"")).await;
        let err = WebhookClient::new()
            .resize_images(&server.url, &pdf(), "a", "png")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Server error: Bad Gateway");
    }
}
