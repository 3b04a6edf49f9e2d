// Public modules
pub mod acquisition;
pub mod arxiv;
pub mod classifier;
pub mod config;
pub mod io;
pub mod models;
pub mod notion;
pub mod parser;
pub mod pipeline;
pub mod protocol;
pub mod reasoning;
pub mod roster;

// Re-export commonly used types
pub use acquisition::{AcquisitionError, ContentSource, PdfDownloader};
pub use arxiv::{ArxivClient, ArxivQuery, DocumentFetcher};
pub use classifier::{ClassificationEngine, ClassificationResult, FailureReason, FallbackPolicy};
pub use config::{Config, TriageSettings};
pub use io::{get_default_runs_dir, save_report};
pub use models::{CandidateDocument, KnownTitles, Relevance, SectionKey, StructuredSummary};
pub use notion::{NotionClient, Publisher, TitleIndex};
pub use pipeline::{Pipeline, PipelineOptions, RunReport};
pub use reasoning::{GeminiClient, ReasoningService, ServiceError};
pub use roster::{ModelRoster, RosterCursor};
