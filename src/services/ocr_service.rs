use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::image::{Location, OcrResult, TextRegion};

const OCR_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

pub const DEFAULT_OCR_ENDPOINT: &str = "http://127.0.0.1:12345/ocr";
pub const DEFAULT_OCR_TIMEOUT: Duration = Duration::from_secs(30);

pub fn is_ocr_extension(extension: &str) -> bool {
    OCR_EXTENSIONS.contains(&extension.to_lowercase().as_str())
}

/// Something that can turn an image on disk into text regions.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    async fn recognize(&self, image_path: &Path) -> Result<OcrResult, AppError>;
}

#[derive(Serialize)]
struct OcrRequest<'a> {
    image_path: &'a str,
}

#[derive(Deserialize)]
struct OcrResponse {
    width: f64,
    height: f64,
    items: Vec<OcrResponseItem>,
}

#[derive(Deserialize)]
struct OcrResponseItem {
    text: String,
    location: Location,
}

/// Client for a local OCR service that reads images straight from disk.
pub struct HttpOcrClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpOcrClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| AppError::Ocr(format!("client init failed: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl OcrBackend for HttpOcrClient {
    async fn recognize(&self, image_path: &Path) -> Result<OcrResult, AppError> {
        let image_path = image_path.to_string_lossy();
        tracing::debug!(endpoint = %self.endpoint, image = %image_path, "sending OCR request");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&OcrRequest {
                image_path: &image_path,
            })
            .send()
            .await
            .map_err(|e| AppError::Ocr(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Ocr(format!("backend returned {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::Ocr(format!("reading response failed: {e}")))?;
        parse_response(&body)
    }
}

pub fn parse_response(body: &str) -> Result<OcrResult, AppError> {
    let raw: OcrResponse = serde_json::from_str(body)
        .map_err(|e| AppError::MalformedResponse(e.to_string()))?;

    if !raw.width.is_finite() || !raw.height.is_finite() || raw.width < 0.0 || raw.height < 0.0 {
        return Err(AppError::MalformedResponse(format!(
            "invalid image size {}x{}",
            raw.width, raw.height
        )));
    }

    let mut items = Vec::with_capacity(raw.items.len());
    for item in raw.items {
        if item.text.trim().is_empty() {
            continue;
        }
        if !item.location.is_well_formed() {
            return Err(AppError::MalformedResponse(format!(
                "invalid location for {:?}: {:?}",
                item.text, item.location
            )));
        }
        items.push(TextRegion {
            text: item.text,
            location: item.location,
        });
    }

    Ok(OcrResult {
        width: raw.width,
        height: raw.height,
        items,
    })
}
