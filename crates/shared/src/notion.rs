use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::models::{
    normalize_whitespace, truncate_section, CandidateDocument, KnownTitles, Relevance,
    StructuredSummary,
};

const NOTION_API_URL: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";

/// Titles the store already holds.
#[async_trait]
pub trait TitleIndex: Send + Sync {
    async fn known_titles(&self) -> Result<KnownTitles>;
}

/// Persists a classified document. Failures are reported to the caller but
/// never influence classification.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        document: &CandidateDocument,
        relevance: Relevance,
        summary: &StructuredSummary,
    ) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

pub struct NotionClient {
    client: Client,
    token: String,
    database_id: String,
}

impl NotionClient {
    pub fn new(token: String, database_id: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            token,
            database_id,
        })
    }

    async fn post(&self, url: &str, body: &Value) -> Result<reqwest::Response> {
        self.client
            .post(url)
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))
    }
}

#[async_trait]
impl TitleIndex for NotionClient {
    async fn known_titles(&self) -> Result<KnownTitles> {
        let url = format!("{}/databases/{}/query", NOTION_API_URL, self.database_id);
        let mut titles = KnownTitles::new();
        let mut next_cursor: Option<String> = None;

        loop {
            let body = match &next_cursor {
                Some(cursor) => json!({ "start_cursor": cursor }),
                None => json!({}),
            };

            let response = self.post(&url, &body).await?;
            let status = response.status();
            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| String::from("unknown error"));
                anyhow::bail!("Notion query returned error: {} - {}", status, error_text);
            }

            let page = response
                .json::<QueryResponse>()
                .await
                .context("Failed to parse Notion query response")?;

            for result in &page.results {
                if let Some(title) = page_title(result) {
                    titles.insert(&title);
                }
            }
            debug!(page_results = page.results.len(), known = titles.len(), "Notion page read");

            next_cursor = next_page_cursor(page);
            if next_cursor.is_none() {
                break;
            }
        }

        Ok(titles)
    }
}

/// Cursor for the following query page, if there is one.
fn next_page_cursor(page: QueryResponse) -> Option<String> {
    match (page.has_more, page.next_cursor) {
        (true, Some(cursor)) => Some(cursor),
        _ => None,
    }
}

#[async_trait]
impl Publisher for NotionClient {
    async fn publish(
        &self,
        document: &CandidateDocument,
        relevance: Relevance,
        summary: &StructuredSummary,
    ) -> Result<()> {
        let url = format!("{}/pages", NOTION_API_URL);
        let body = json!({
            "parent": { "database_id": self.database_id },
            "properties": page_properties(document, relevance, summary),
        });

        let response = self.post(&url, &body).await?;
        let status = response.status();
        let response_text = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("unknown error"));
        debug!(%status, body = %response_text, "Notion response");

        if !status.is_success() {
            anyhow::bail!("Notion page creation failed: {} - {}", status, response_text);
        }

        info!(title = %document.title, %relevance, "Notion page created");
        Ok(())
    }
}

/// Title of a database page, whitespace-normalized. `None` for pages without
/// a `Paper` title.
fn page_title(page: &Value) -> Option<String> {
    let title = page["properties"]["Paper"]["title"][0]["text"]["content"].as_str()?;
    let title = normalize_whitespace(title);
    (!title.is_empty()).then_some(title)
}

fn rich_text(content: &str) -> Value {
    json!({ "rich_text": [{ "text": { "content": truncate_section(content) } }] })
}

/// Database properties for one classified paper.
pub fn page_properties(
    document: &CandidateDocument,
    relevance: Relevance,
    summary: &StructuredSummary,
) -> Value {
    let mut properties = json!({
        "Paper": { "title": [{ "text": { "content": document.title } }] },
        "Abstract": rich_text(&document.abstract_text),
        "Author": rich_text(&document.author),
        "Relatedness": { "select": { "name": relevance.as_str() } },
        "url": { "url": document.id },
        "Date": { "date": { "start": document.published.format("%Y-%m-%d").to_string() } },
    });

    for (key, value) in summary.iter() {
        properties[key.property_name()] = rich_text(value);
    }

    properties
}
