use std::path::Path;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::settings::Settings;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const BASE_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("OCR API key is not configured (set CARDSCAN_OCR_API_KEY)")]
    MissingApiKey,
    #[error("failed to read image: {0}")]
    Io(#[from] std::io::Error),
    #[error("OCR request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("OCR service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("OCR service error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("no text detected")]
    NoTextDetected,
}

impl OcrError {
    fn is_retryable(&self) -> bool {
        match self {
            OcrError::Http { status, .. } => *status == 429 || *status >= 500,
            OcrError::Request(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Text-detection client for a Vision-style `images:annotate` endpoint.
pub struct OcrClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    language_hints: Vec<String>,
    max_retries: u32,
}

impl OcrClient {
    pub fn from_settings(settings: &Settings) -> Result<Self, OcrError> {
        let api_key = settings
            .ocr_api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(OcrError::MissingApiKey)?;
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoint: settings.ocr_endpoint.clone(),
            api_key,
            language_hints: settings.ocr_language_hints.clone(),
            max_retries: settings.max_retries,
        })
    }

    pub async fn detect_text_in_file(&self, path: &Path) -> Result<String, OcrError> {
        let image = tokio::fs::read(path).await?;
        self.detect_text(&image).await
    }

    /// Full detected text of the image, or `NoTextDetected` if the service found none.
    pub async fn detect_text(&self, image: &[u8]) -> Result<String, OcrError> {
        let body = annotate_request(image, &self.language_hints);
        let mut attempt = 0;
        loop {
            match self.annotate(&body).await {
                Ok(response) => return parse_annotate_response(&response),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let backoff = backoff_delay(attempt);
                    warn!(
                        "OCR request failed ({}), attempt {}/{}, backing off {:.1}s",
                        e,
                        attempt + 1,
                        self.max_retries,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn annotate(&self, body: &Value) -> Result<Value, OcrError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .query(&[("key", &self.api_key)])
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(OcrError::Http {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(resp.json().await?)
    }
}

fn annotate_request(image: &[u8], language_hints: &[String]) -> Value {
    json!({
        "requests": [{
            "image": { "content": STANDARD.encode(image) },
            "features": [{ "type": "TEXT_DETECTION" }],
            "imageContext": { "languageHints": language_hints }
        }]
    })
}

/// Pull the full text out of an annotate response. Bounding boxes are ignored.
fn parse_annotate_response(response: &Value) -> Result<String, OcrError> {
    let first = &response["responses"][0];
    if let Some(err) = first.get("error") {
        return Err(OcrError::Api {
            code: err["code"].as_i64().unwrap_or_default(),
            message: err["message"].as_str().unwrap_or_default().to_string(),
        });
    }

    let text = first["fullTextAnnotation"]["text"]
        .as_str()
        .or_else(|| first["textAnnotations"][0]["description"].as_str())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(OcrError::NoTextDetected)?;
    debug!(chars = text.len(), "OCR text detected");
    Ok(text.to_string())
}

/// Exponential backoff, capped at `MAX_BACKOFF`.
fn backoff_delay(attempt: u32) -> Duration {
    let millis = BASE_BACKOFF_MS.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(millis).min(MAX_BACKOFF)
}
