use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::arxiv::DocumentFetcher;
use crate::classifier::{ClassificationEngine, ClassificationResult, FailureReason};
use crate::models::{CandidateDocument, Relevance};
use crate::notion::{Publisher, TitleIndex};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Documents classified at the same time. 1 keeps the run sequential.
    pub concurrency: usize,
    /// Pause after each document that reached the model.
    pub request_spacing: Duration,
    pub publish_spacing: Duration,
    /// Classify but do not write anything to the store.
    pub dry_run: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            request_spacing: Duration::from_secs(1),
            publish_spacing: Duration::from_millis(500),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub document: CandidateDocument,
    pub result: ClassificationResult,
    pub published: bool,
}

/// Outcome of one run, serialized next to the other run files.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub known_titles: usize,
    pub fetched: usize,
    pub skipped_known: usize,
    pub related: usize,
    pub unrelated: usize,
    pub failed: usize,
    pub published: usize,
    pub publish_errors: usize,
    /// Model the roster cursor points at when the run ends
    pub final_model: Option<String>,
    pub documents: Vec<DocumentReport>,
}

impl RunReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            started_at: Utc::now(),
            dry_run,
            known_titles: 0,
            fetched: 0,
            skipped_known: 0,
            related: 0,
            unrelated: 0,
            failed: 0,
            published: 0,
            publish_errors: 0,
            final_model: None,
            documents: Vec::new(),
        }
    }

    pub fn classified(&self) -> usize {
        self.related + self.unrelated
    }
}

pub struct Pipeline<'a> {
    fetcher: &'a dyn DocumentFetcher,
    index: &'a dyn TitleIndex,
    engine: &'a ClassificationEngine,
    publisher: &'a dyn Publisher,
    options: PipelineOptions,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        fetcher: &'a dyn DocumentFetcher,
        index: &'a dyn TitleIndex,
        engine: &'a ClassificationEngine,
        publisher: &'a dyn Publisher,
        options: PipelineOptions,
    ) -> Self {
        Self {
            fetcher,
            index,
            engine,
            publisher,
            options,
        }
    }

    pub async fn run(&self) -> Result<RunReport> {
        let mut report = RunReport::new(self.options.dry_run);

        info!("[1/4] fetching existing titles from the store");
        let known = self
            .index
            .known_titles()
            .await
            .context("Failed to fetch existing titles")?;
        report.known_titles = known.len();
        info!(known = known.len(), "existing titles loaded");

        info!("[2/4] searching for new papers");
        let candidates = self
            .fetcher
            .fetch_candidates()
            .await
            .context("Failed to fetch candidate papers")?;
        report.fetched = candidates.len();
        info!(candidates = candidates.len(), "papers passed the date and subject filters");

        let (fresh, known_docs): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|doc| !known.contains(&doc.title));
        report.skipped_known = known_docs.len();

        info!(new = fresh.len(), skipped = known_docs.len(), "[3/4] analyzing new papers");
        let classified = self.classify_all(fresh).await;

        for (_, result) in &classified {
            match result {
                ClassificationResult::Success { relevance: Relevance::Related, .. } => report.related += 1,
                ClassificationResult::Success { relevance: Relevance::Unrelated, .. } => report.unrelated += 1,
                ClassificationResult::Failure(_) => report.failed += 1,
            }
        }

        info!(to_publish = report.classified(), dry_run = self.options.dry_run, "[4/4] publishing results");
        let documents = self.publish_all(classified, &mut report).await;
        report.documents = documents;
        report.final_model = self.engine.current_model().map(String::from);

        Ok(report)
    }

    async fn classify_all(
        &self,
        documents: Vec<CandidateDocument>,
    ) -> Vec<(CandidateDocument, ClassificationResult)> {
        let total = documents.len();

        stream::iter(documents.into_iter().enumerate())
            .map(|(i, document)| async move {
                info!(n = i + 1, total, title = %preview_title(&document.title), "analyzing paper");
                let result = self.engine.classify(&document).await;

                match &result {
                    ClassificationResult::Success { relevance, model, .. } => {
                        info!(title = %preview_title(&document.title), %relevance, model = %model, "analysis complete");
                    }
                    ClassificationResult::Failure(reason) => {
                        warn!(title = %preview_title(&document.title), %reason, "analysis failed, paper will not be published");
                    }
                }

                // No request went out for a short-circuited document
                if !matches!(result, ClassificationResult::Failure(FailureReason::AllModelsExhausted)) {
                    tokio::time::sleep(self.options.request_spacing).await;
                }

                (document, result)
            })
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await
    }

    async fn publish_all(
        &self,
        classified: Vec<(CandidateDocument, ClassificationResult)>,
        report: &mut RunReport,
    ) -> Vec<DocumentReport> {
        let mut documents = Vec::with_capacity(classified.len());

        for (document, result) in classified {
            let mut published = false;

            if let ClassificationResult::Success { relevance, summary, .. } = &result {
                if !self.options.dry_run {
                    match self.publisher.publish(&document, *relevance, summary).await {
                        Ok(()) => {
                            published = true;
                            report.published += 1;
                        }
                        Err(e) => {
                            warn!(title = %preview_title(&document.title), error = %e, "publishing failed");
                            report.publish_errors += 1;
                        }
                    }
                    tokio::time::sleep(self.options.publish_spacing).await;
                }
            }

            documents.push(DocumentReport {
                document,
                result,
                published,
            });
        }

        documents
    }
}

fn preview_title(title: &str) -> String {
    let mut preview: String = title.chars().take(60).collect();
    if title.chars().count() > 60 {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{AcquisitionError, ContentSource};
    use crate::classifier::FallbackPolicy;
    use crate::models::{KnownTitles, SectionKey, StructuredSummary};
    use crate::reasoning::{ReasoningService, ServiceError};
    use crate::roster::{ModelRoster, RosterCursor};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    struct FixedFetcher(Vec<CandidateDocument>);

    #[async_trait]
    impl DocumentFetcher for FixedFetcher {
        async fn fetch_candidates(&self) -> Result<Vec<CandidateDocument>> {
            Ok(self.0.clone())
        }
    }

    struct FixedIndex(Vec<&'static str>);

    #[async_trait]
    impl TitleIndex for FixedIndex {
        async fn known_titles(&self) -> Result<KnownTitles> {
            Ok(self.0.iter().collect())
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(String, Relevance, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(
            &self,
            document: &CandidateDocument,
            relevance: Relevance,
            summary: &StructuredSummary,
        ) -> Result<()> {
            if self.fail {
                anyhow::bail!("Notion page creation failed: 400");
            }
            self.published.lock().unwrap().push((
                document.title.clone(),
                relevance,
                summary.get(SectionKey::Motivation).to_string(),
            ));
            Ok(())
        }
    }

    /// Hands the URL itself back as the "PDF" so replies can be keyed by it.
    struct EchoContent;

    #[async_trait]
    impl ContentSource for EchoContent {
        async fn acquire(&self, reference: &str) -> Result<Vec<u8>, AcquisitionError> {
            Ok(reference.as_bytes().to_vec())
        }
    }

    struct KeyedService {
        replies: HashMap<String, Result<String, ServiceError>>,
    }

    #[async_trait]
    impl ReasoningService for KeyedService {
        async fn generate(
            &self,
            _model: &str,
            document: &[u8],
            _instructions: &str,
        ) -> Result<String, ServiceError> {
            let key = String::from_utf8_lossy(document).to_string();
            self.replies
                .get(&key)
                .cloned()
                .unwrap_or_else(|| Err(ServiceError::Other(format!("unexpected document {}", key))))
        }
    }

    fn document(slug: &str, title: &str) -> CandidateDocument {
        CandidateDocument {
            id: format!("http://arxiv.org/abs/{}", slug),
            title: title.to_string(),
            abstract_text: "abstract".to_string(),
            pdf_url: slug.to_string(),
            published: NaiveDate::from_ymd_opt(2025, 7, 2).unwrap(),
            author: "arXiv".to_string(),
            subjects: vec!["cs.CL".to_string()],
        }
    }

    fn engine(replies: Vec<(&str, Result<&str, ServiceError>)>) -> ClassificationEngine {
        let service = KeyedService {
            replies: replies
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.map(String::from)))
                .collect(),
        };
        ClassificationEngine::new(
            Arc::new(EchoContent),
            Arc::new(service),
            ModelRoster::new(["a", "b"]),
            RosterCursor::new(),
            FallbackPolicy::default(),
            String::new(),
        )
    }

    fn options(dry_run: bool, concurrency: usize) -> PipelineOptions {
        PipelineOptions {
            concurrency,
            request_spacing: Duration::ZERO,
            publish_spacing: Duration::ZERO,
            dry_run,
        }
    }

    fn fixture() -> (FixedFetcher, FixedIndex, ClassificationEngine) {
        let fetcher = FixedFetcher(vec![
            document("p1", "Speech Style Control"),
            document("p2", "Already  Stored\nPaper"),
            document("p3", "Unrelated Vision Work"),
            document("p4", "Chatty Model"),
        ]);
        let index = FixedIndex(vec!["Already Stored Paper"]);
        let engine = engine(vec![
            ("p1", Ok("[MOTIVATION] styles |||Yes.")),
            ("p3", Ok("[MOTIVATION] pixels |||No.")),
            ("p4", Ok("Sure! Here is my summary without a separator.")),
        ]);
        (fetcher, index, engine)
    }

    #[tokio::test]
    async fn test_run_skips_known_and_publishes_successes() {
        let (fetcher, index, engine) = fixture();
        let publisher = RecordingPublisher::default();

        let report = Pipeline::new(&fetcher, &index, &engine, &publisher, options(false, 1))
            .run()
            .await
            .unwrap();

        assert_eq!(report.known_titles, 1);
        assert_eq!(report.fetched, 4);
        assert_eq!(report.skipped_known, 1);
        assert_eq!(report.related, 1);
        assert_eq!(report.unrelated, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.published, 2);
        assert_eq!(report.final_model.as_deref(), Some("a"));

        let published = publisher.published.lock().unwrap().clone();
        assert_eq!(
            published,
            vec![
                ("Speech Style Control".to_string(), Relevance::Related, "styles".to_string()),
                ("Unrelated Vision Work".to_string(), Relevance::Unrelated, "pixels".to_string()),
            ]
        );

        let titles: Vec<&str> = report.documents.iter().map(|d| d.document.title.as_str()).collect();
        assert_eq!(titles, vec!["Speech Style Control", "Unrelated Vision Work", "Chatty Model"]);
        assert!(!report.documents[2].published);
    }

    #[tokio::test]
    async fn test_dry_run_publishes_nothing() {
        let (fetcher, index, engine) = fixture();
        let publisher = RecordingPublisher::default();

        let report = Pipeline::new(&fetcher, &index, &engine, &publisher, options(true, 1))
            .run()
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.classified(), 2);
        assert_eq!(report.published, 0);
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_errors_are_counted_not_raised() {
        let (fetcher, index, engine) = fixture();
        let publisher = RecordingPublisher {
            fail: true,
            ..RecordingPublisher::default()
        };

        let report = Pipeline::new(&fetcher, &index, &engine, &publisher, options(false, 1))
            .run()
            .await
            .unwrap();

        assert_eq!(report.classified(), 2);
        assert_eq!(report.published, 0);
        assert_eq!(report.publish_errors, 2);
    }

    #[tokio::test]
    async fn test_concurrent_run_keeps_document_order() {
        let (fetcher, index, engine) = fixture();
        let publisher = RecordingPublisher::default();

        let report = Pipeline::new(&fetcher, &index, &engine, &publisher, options(true, 3))
            .run()
            .await
            .unwrap();

        let slugs: Vec<&str> = report.documents.iter().map(|d| d.document.pdf_url.as_str()).collect();
        assert_eq!(slugs, vec!["p1", "p3", "p4"]);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_index_failure_aborts_run() {
        struct BrokenIndex;

        #[async_trait]
        impl TitleIndex for BrokenIndex {
            async fn known_titles(&self) -> Result<KnownTitles> {
                anyhow::bail!("Notion query returned error: 401")
            }
        }

        let (fetcher, _, engine) = fixture();
        let publisher = RecordingPublisher::default();

        let result = Pipeline::new(&fetcher, &BrokenIndex, &engine, &publisher, options(false, 1))
            .run()
            .await;

        assert!(result.is_err());
    }
}
