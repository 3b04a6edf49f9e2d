use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::protocol::PDF_MIME_TYPE;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// How a failed call to the reasoning service should be handled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Temporary overload: wait and retry the same model.
    #[error("model overloaded: {0}")]
    Overloaded(String),
    /// Quota or resource exhaustion: move on to the next model.
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),
    #[error("{0}")]
    Other(String),
}

/// A text/document understanding API that answers one prompt about one PDF.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        document: &[u8],
        instructions: &str,
    ) -> Result<String, ServiceError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    InlineData {
        inline_data: InlineData,
    },
    Text {
        text: &'a str,
    },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Google Gemini `generateContent` client.
pub struct GeminiClient {
    client: Client,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: String, timeout: std::time::Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, api_key })
    }

    async fn send(&self, model: &str, document: &[u8], instructions: &str) -> Result<String, ServiceError> {
        let request = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![
                    RequestPart::InlineData {
                        inline_data: InlineData {
                            mime_type: PDF_MIME_TYPE,
                            data: base64::engine::general_purpose::STANDARD.encode(document),
                        },
                    },
                    RequestPart::Text { text: instructions },
                ],
            }],
        };

        let url = format!("{}/{}:generateContent", GEMINI_API_BASE, model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::Other(format!("request to Gemini failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            return Err(classify_api_error(status.as_u16(), &body));
        }

        let parsed = response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| ServiceError::Other(format!("failed to parse Gemini response: {}", e)))?;

        Ok(response_text(&parsed))
    }
}

#[async_trait]
impl ReasoningService for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        document: &[u8],
        instructions: &str,
    ) -> Result<String, ServiceError> {
        debug!(model, pdf_bytes = document.len(), "calling Gemini");
        self.send(model, document, instructions).await
    }
}

/// Concatenate the text parts of the first candidate. A blocked or empty
/// answer yields an empty string, which the parser rejects.
fn response_text(response: &GenerateResponse) -> String {
    response
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// Sort a non-2xx Gemini reply into overload, quota, or anything else.
pub fn classify_api_error(status: u16, body: &str) -> ServiceError {
    let (api_status, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.status, envelope.error.message),
        Err(_) => (String::new(), body.to_string()),
    };

    let detail = format!("HTTP {} {} {}", status, api_status, message)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let lowered = format!("{} {}", api_status, message).to_lowercase();

    if status == 429 || lowered.contains("resource_exhausted") || lowered.contains("quota") {
        ServiceError::QuotaExhausted(detail)
    } else if status == 503 || lowered.contains("unavailable") || lowered.contains("overloaded") {
        ServiceError::Overloaded(detail)
    } else {
        ServiceError::Other(detail)
    }
}
