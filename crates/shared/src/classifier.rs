//! Classification engine: turns one candidate paper into a relevance verdict
//! plus a five-section summary, walking the model roster when a model runs
//! out of quota.
//!
//! Every path ends in a [`ClassificationResult`]. Nothing here returns an
//! error to the caller; a failure simply means "do not publish".

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::acquisition::{AcquisitionError, ContentSource};
use crate::models::{CandidateDocument, Relevance, StructuredSummary};
use crate::parser::{parse_reply, preview, ParseError};
use crate::reasoning::{ReasoningService, ServiceError};
use crate::roster::{ModelRoster, RosterCursor};

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum FailureReason {
    #[error("network error while downloading content: {0}")]
    Network(String),
    #[error("content server returned HTTP {0}")]
    HttpStatus(u16),
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
    #[error("reasoning service error: {0}")]
    Service(String),
    #[error("every model in the roster has run out of quota")]
    AllModelsExhausted,
    #[error("model {model} still overloaded after {retries} retries")]
    OverloadRetriesExceeded { model: String, retries: u32 },
    #[error("classification did not finish within {0} seconds")]
    DeadlineExceeded(u64),
}

impl From<AcquisitionError> for FailureReason {
    fn from(error: AcquisitionError) -> Self {
        match error {
            AcquisitionError::Network(msg) => FailureReason::Network(msg),
            AcquisitionError::HttpStatus(code) => FailureReason::HttpStatus(code),
        }
    }
}

impl From<ParseError> for FailureReason {
    fn from(error: ParseError) -> Self {
        FailureReason::MalformedResponse(error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ClassificationResult {
    Success {
        relevance: Relevance,
        summary: StructuredSummary,
        /// Roster entry that produced the answer
        model: String,
    },
    Failure(FailureReason),
}

impl ClassificationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ClassificationResult::Success { .. })
    }
}

/// Waits and limits applied while walking the roster.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    /// Pause before retrying a model that reported overload.
    pub overload_backoff: Duration,
    /// Pause after switching to the next model on quota exhaustion.
    pub quota_pause: Duration,
    /// Overload retries allowed per model before giving up on the document.
    pub max_overload_retries: u32,
    /// Upper bound on download plus all model attempts for one document.
    pub document_deadline: Duration,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            overload_backoff: Duration::from_secs(30),
            quota_pause: Duration::from_secs(2),
            max_overload_retries: 5,
            document_deadline: Duration::from_secs(600),
        }
    }
}

pub struct ClassificationEngine {
    content: Arc<dyn ContentSource>,
    service: Arc<dyn ReasoningService>,
    roster: ModelRoster,
    cursor: RosterCursor,
    policy: FallbackPolicy,
    instructions: String,
}

impl ClassificationEngine {
    pub fn new(
        content: Arc<dyn ContentSource>,
        service: Arc<dyn ReasoningService>,
        roster: ModelRoster,
        cursor: RosterCursor,
        policy: FallbackPolicy,
        instructions: String,
    ) -> Self {
        Self {
            content,
            service,
            roster,
            cursor,
            policy,
            instructions,
        }
    }

    pub fn cursor(&self) -> &RosterCursor {
        &self.cursor
    }

    /// Model the next request would go to, `None` once the roster is used up.
    pub fn current_model(&self) -> Option<&str> {
        self.roster.get(self.cursor.current())
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_exhausted(&self.roster)
    }

    pub async fn classify(&self, document: &CandidateDocument) -> ClassificationResult {
        // Quota is gone for the whole run, don't even download the PDF
        if self.is_exhausted() {
            return ClassificationResult::Failure(FailureReason::AllModelsExhausted);
        }

        let deadline = self.policy.document_deadline;
        match tokio::time::timeout(deadline, self.download_and_classify(document)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(title = %document.title, ?deadline, "classification deadline exceeded");
                ClassificationResult::Failure(FailureReason::DeadlineExceeded(deadline.as_secs()))
            }
        }
    }

    async fn download_and_classify(&self, document: &CandidateDocument) -> ClassificationResult {
        let pdf = match self.content.acquire(&document.pdf_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(url = %document.pdf_url, error = %e, "PDF download failed");
                return ClassificationResult::Failure(e.into());
            }
        };

        self.classify_content(&pdf).await
    }

    /// Fallback state machine over the roster for one document.
    async fn classify_content(&self, pdf: &[u8]) -> ClassificationResult {
        let mut overload_retries = 0;

        loop {
            let index = self.cursor.current();
            let Some(model) = self.roster.get(index) else {
                warn!("all models have run out of quota, stopping analysis");
                return ClassificationResult::Failure(FailureReason::AllModelsExhausted);
            };

            info!(model, "requesting analysis");
            match self.service.generate(model, pdf, &self.instructions).await {
                Ok(text) => {
                    return match parse_reply(&text) {
                        Ok(parsed) => {
                            let missing = parsed.summary.missing_count();
                            if missing > 0 {
                                debug!(model, missing, "reply left some sections empty");
                            }
                            ClassificationResult::Success {
                                relevance: parsed.relevance,
                                summary: parsed.summary,
                                model: model.to_string(),
                            }
                        }
                        Err(e) => {
                            warn!(model, error = %e, reply = %preview(&text), "unexpected reply format");
                            ClassificationResult::Failure(e.into())
                        }
                    };
                }
                Err(ServiceError::Overloaded(detail)) => {
                    if overload_retries >= self.policy.max_overload_retries {
                        warn!(model, retries = overload_retries, %detail, "model still overloaded, giving up");
                        return ClassificationResult::Failure(FailureReason::OverloadRetriesExceeded {
                            model: model.to_string(),
                            retries: overload_retries,
                        });
                    }
                    overload_retries += 1;
                    warn!(
                        model,
                        attempt = overload_retries,
                        backoff = ?self.policy.overload_backoff,
                        "model overloaded, retrying"
                    );
                    tokio::time::sleep(self.policy.overload_backoff).await;
                }
                Err(ServiceError::QuotaExhausted(detail)) => {
                    let next = self.cursor.advance_from(index);
                    warn!(model, %detail, next_model = ?self.roster.get(next), "quota exhausted, switching model");
                    overload_retries = 0;
                    if next < self.roster.len() {
                        tokio::time::sleep(self.policy.quota_pause).await;
                    }
                }
                Err(ServiceError::Other(detail)) => {
                    warn!(model, %detail, "reasoning service call failed");
                    return ClassificationResult::Failure(FailureReason::Service(detail));
                }
            }
        }
    }
}
