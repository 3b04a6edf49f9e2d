use anyhow::{Context, Result};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::classifier::FallbackPolicy;

const CONFIG_DIR_NAME: &str = "paper-triage";

const SETUP_HINT: &str = "To fix this, create ~/.config/paper-triage/.env with:\n  \
    GOOGLE_API_KEY=your_key_here\n  \
    NOTION_TOKEN=your_token_here\n  \
    DATABASE_ID=your_database_id_here";

/// Secrets, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub google_api_key: String,
    pub notion_token: String,
    pub database_id: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Try to load .env from multiple locations
        Self::try_load_dotenv();

        let google_api_key = required_var(
            "GOOGLE_API_KEY",
            "Get a Gemini API key from: https://aistudio.google.com/app/apikey",
        )?;
        let notion_token = required_var(
            "NOTION_TOKEN",
            "Create an internal integration at: https://www.notion.so/my-integrations",
        )?;
        let database_id = required_var(
            "DATABASE_ID",
            "Use the id in your Notion database URL and share the database with the integration",
        )?;

        Ok(Self {
            google_api_key,
            notion_token,
            database_id,
        })
    }

    fn try_load_dotenv() {
        // 1. Current directory (for development)
        if dotenvy::dotenv().is_ok() {
            return;
        }

        // 2. ~/.config/paper-triage/.env (standard config location)
        if let Some(config_dir) = dirs::config_dir() {
            if load_env_file(&config_dir.join(CONFIG_DIR_NAME).join(".env")) {
                return;
            }
        }

        // 3. ~/.env (home directory)
        if let Some(home_dir) = dirs::home_dir() {
            load_env_file(&home_dir.join(".env"));
        }

        // If none found, that's okay - environment variables might be set system-wide
    }
}

/// Load one `.env` file if it exists. Returns whether it was loaded.
fn load_env_file(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    match dotenvy::from_path(path) {
        Ok(()) => true,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "could not load .env file");
            false
        }
    }
}

fn required_var(name: &str, where_to_get: &str) -> Result<String> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .with_context(|| format!("{} not found.\n\n{}\n\n{}", name, SETUP_HINT, where_to_get))
}

/// Non-secret settings. The defaults describe the research profile this tool
/// was written for; the CLI can override the run-shaped ones.
#[derive(Debug, Clone)]
pub struct TriageSettings {
    pub keywords: Vec<String>,
    pub allowed_subjects: Vec<String>,
    pub research_area: String,
    pub summary_language: String,
    pub lookback_days: i64,
    pub max_results_per_keyword: usize,
    pub models: Vec<String>,
    pub pdf_timeout: Duration,
    pub model_timeout: Duration,
    pub fallback: FallbackPolicy,
    /// Pause after each classified document.
    pub request_spacing: Duration,
    /// Pause between Notion page writes.
    pub publish_spacing: Duration,
    /// Pause between arXiv keyword queries.
    pub search_spacing: Duration,
    pub concurrency: usize,
}

impl Default for TriageSettings {
    fn default() -> Self {
        Self {
            keywords: [
                "audio language model",
                "speech language model",
                "speech style",
                "spoken language model",
                "speech to speech",
                "audio to speech",
                "Omni",
                "voice assistant",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            allowed_subjects: ["cs.CL", "cs.AI", "cs.LG"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            research_area: "My research focuses on developing virtual agents that understand user \
                situations by jointly reasoning over user speech and ambient sounds as multimodal \
                input, with a particular emphasis on generating speech with diverse styles using \
                audio language models."
                .to_string(),
            summary_language: "Korean".to_string(),
            lookback_days: 3,
            max_results_per_keyword: 50,
            models: [
                "gemini-2.5-pro",
                "gemini-2.5-flash",
                "gemini-2.0-flash",
                "gemini-2.5-flash-lite-preview-06-17",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            pdf_timeout: Duration::from_secs(30),
            model_timeout: Duration::from_secs(180),
            fallback: FallbackPolicy::default(),
            request_spacing: Duration::from_secs(1),
            publish_spacing: Duration::from_millis(500),
            search_spacing: Duration::from_secs(1),
            concurrency: 1,
        }
    }
}

/// Parse a comma-separated model list, e.g. from `--models`.
pub fn parse_model_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from)
        .collect()
}
