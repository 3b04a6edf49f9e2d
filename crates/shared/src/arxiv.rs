use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveDate};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Client;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::models::{normalize_whitespace, CandidateDocument};

const ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";

/// Source of candidate documents for a run, already deduplicated by id.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch_candidates(&self) -> Result<Vec<CandidateDocument>>;
}

/// What to search for and which results to keep.
#[derive(Debug, Clone)]
pub struct ArxivQuery {
    pub keywords: Vec<String>,
    pub allowed_subjects: Vec<String>,
    pub lookback_days: i64,
    pub max_results: usize,
    pub spacing: std::time::Duration,
}

pub struct ArxivClient {
    client: Client,
    query: ArxivQuery,
}

impl ArxivClient {
    pub fn new(query: ArxivQuery) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, query })
    }

    async fn search_keyword(&self, keyword: &str) -> Result<Vec<CandidateDocument>> {
        let search_query = format!("ti:\"{}\" OR abs:\"{}\"", keyword, keyword);
        let url = format!(
            "{}?search_query={}&sortBy=submittedDate&sortOrder=descending&max_results={}",
            ARXIV_API_URL,
            urlencoding::encode(&search_query),
            self.query.max_results
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to query arXiv API")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("arXiv API returned error: {}", status);
        }

        let body = response
            .text()
            .await
            .context("Failed to read arXiv API response")?;

        parse_atom_feed(&body)
    }
}

#[async_trait]
impl DocumentFetcher for ArxivClient {
    async fn fetch_candidates(&self) -> Result<Vec<CandidateDocument>> {
        let mut searches = Vec::new();

        for keyword in unique_keywords(&self.query.keywords) {
            info!(keyword = %keyword, "searching arXiv");
            let result = self.search_keyword(keyword).await;
            if let Ok(papers) = &result {
                debug!(keyword = %keyword, entries = papers.len(), "arXiv feed parsed");
            }
            searches.push((keyword.to_string(), result));

            tokio::time::sleep(self.query.spacing).await;
        }

        let unique = merge_unique(searches);
        info!(unique = unique.len(), "unique papers found, filtering");
        let today = Local::now().date_naive();
        Ok(filter_candidates(
            unique,
            today,
            self.query.lookback_days,
            &self.query.allowed_subjects,
        ))
    }
}

/// Keywords in order, with case-insensitive repeats dropped.
pub fn unique_keywords(keywords: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    keywords
        .iter()
        .filter(|keyword| seen.insert(keyword.to_lowercase()))
        .map(String::as_str)
        .collect()
}

/// Merge per-keyword results, keeping the first occurrence of each id.
/// A failed search is logged and contributes nothing.
pub fn merge_unique(
    searches: Vec<(String, Result<Vec<CandidateDocument>>)>,
) -> Vec<CandidateDocument> {
    let mut seen_ids = HashSet::new();
    let mut unique = Vec::new();

    for (keyword, result) in searches {
        match result {
            Ok(papers) => {
                for paper in papers {
                    if seen_ids.insert(paper.id.clone()) {
                        unique.push(paper);
                    }
                }
            }
            Err(e) => warn!(keyword = %keyword, error = %e, "arXiv search failed, skipping keyword"),
        }
    }

    unique
}

/// Keep papers updated within `[today - lookback_days, today]` that carry at
/// least one allowed subject.
pub fn filter_candidates(
    papers: Vec<CandidateDocument>,
    today: NaiveDate,
    lookback_days: i64,
    allowed_subjects: &[String],
) -> Vec<CandidateDocument> {
    let since = today - Duration::days(lookback_days);

    papers
        .into_iter()
        .filter(|paper| paper.published >= since && paper.published <= today)
        .filter(|paper| {
            paper
                .subjects
                .iter()
                .any(|subject| allowed_subjects.contains(subject))
        })
        .collect()
}

/// `http://arxiv.org/abs/2401.12345v1` -> `http://arxiv.org/pdf/2401.12345v1`
pub fn pdf_url_from_id(id: &str) -> String {
    match Url::parse(id) {
        Ok(mut url) => {
            let path = url.path().replacen("/abs/", "/pdf/", 1);
            url.set_path(&path);
            url.to_string()
        }
        Err(_) => id.replacen("/abs/", "/pdf/", 1),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Id,
    Title,
    Summary,
    Updated,
    AuthorName,
}

#[derive(Debug, Default)]
struct EntryBuilder {
    id: String,
    title: String,
    summary: String,
    updated: String,
    author: String,
    subjects: Vec<String>,
    pdf_url: Option<String>,
}

impl EntryBuilder {
    fn read_attributes(&mut self, element: &BytesStart) {
        match element.name().as_ref() {
            b"category" => {
                for attr in element.attributes().flatten() {
                    if attr.key.as_ref() == b"term" {
                        if let Ok(term) = attr.unescape_value() {
                            self.subjects.push(term.to_string());
                        }
                    }
                }
            }
            b"link" => {
                let mut href = None;
                let mut is_pdf = false;
                for attr in element.attributes().flatten() {
                    let Ok(value) = attr.unescape_value() else {
                        continue;
                    };
                    match attr.key.as_ref() {
                        b"href" => href = Some(value.to_string()),
                        b"title" if value == "pdf" => is_pdf = true,
                        b"type" if value == "application/pdf" => is_pdf = true,
                        _ => {}
                    }
                }
                if is_pdf && self.pdf_url.is_none() {
                    self.pdf_url = href;
                }
            }
            _ => {}
        }
    }

    fn append(&mut self, field: Field, text: &str) {
        let target = match field {
            Field::Id => &mut self.id,
            Field::Title => &mut self.title,
            Field::Summary => &mut self.summary,
            Field::Updated => &mut self.updated,
            Field::AuthorName => &mut self.author,
        };
        target.push_str(text);
    }

    fn build(self) -> Option<CandidateDocument> {
        let id = self.id.trim().to_string();
        let title = normalize_whitespace(&self.title);
        if id.is_empty() || title.is_empty() {
            warn!("Skipping arXiv entry without id or title");
            return None;
        }

        let published = match DateTime::parse_from_rfc3339(self.updated.trim()) {
            Ok(dt) => dt.date_naive(),
            Err(e) => {
                warn!(id = %id, updated = %self.updated, error = %e, "Skipping arXiv entry with bad date");
                return None;
            }
        };

        let author = normalize_whitespace(&self.author);
        let pdf_url = self.pdf_url.unwrap_or_else(|| pdf_url_from_id(&id));

        Some(CandidateDocument {
            title,
            abstract_text: normalize_whitespace(&self.summary),
            pdf_url,
            published,
            author: if author.is_empty() { "arXiv".to_string() } else { author },
            subjects: self.subjects,
            id,
        })
    }
}

/// Parse an arXiv Atom feed into candidate documents.
pub fn parse_atom_feed(xml: &str) -> Result<Vec<CandidateDocument>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut papers = Vec::new();
    let mut buf = Vec::new();
    let mut current: Option<EntryBuilder> = None;
    let mut field: Option<Field> = None;
    let mut in_author = false;
    let mut authors_seen = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"entry" => {
                    current = Some(EntryBuilder::default());
                    authors_seen = 0;
                }
                b"author" if current.is_some() => {
                    in_author = true;
                    authors_seen += 1;
                }
                // Only the first author is kept
                b"name" if in_author && authors_seen == 1 => field = Some(Field::AuthorName),
                b"id" if current.is_some() && !in_author => field = Some(Field::Id),
                b"title" if current.is_some() => field = Some(Field::Title),
                b"summary" if current.is_some() => field = Some(Field::Summary),
                b"updated" if current.is_some() => field = Some(Field::Updated),
                _ => {
                    if let Some(entry) = current.as_mut() {
                        entry.read_attributes(e);
                    }
                }
            },
            Ok(Event::Empty(ref e)) => {
                if let Some(entry) = current.as_mut() {
                    entry.read_attributes(e);
                }
            }
            Ok(Event::Text(ref e)) => {
                if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    let text = e.unescape().context("Invalid text in arXiv feed")?;
                    entry.append(f, &text);
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"entry" => {
                    if let Some(paper) = current.take().and_then(EntryBuilder::build) {
                        papers.push(paper);
                    }
                    field = None;
                    in_author = false;
                }
                b"author" => {
                    in_author = false;
                    field = None;
                }
                _ => field = None,
            },
            Ok(Event::Eof) => break,
            Err(e) => anyhow::bail!(
                "Failed to parse arXiv feed at position {}: {}",
                reader.buffer_position(),
                e
            ),
            _ => {}
        }
        buf.clear();
    }

    Ok(papers)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query: search_query=ti:"speech style"</title>
  <id>http://arxiv.org/api/feed-id</id>
  <updated>2025-07-03T00:00:00-04:00</updated>
  <entry>
    <id>http://arxiv.org/abs/2507.01234v1</id>
    <updated>2025-07-02T10:00:00Z</updated>
    <published>2025-07-01T09:00:00Z</published>
    <title>Expressive Speech
      Style Transfer &amp; Omni Models</title>
    <summary>  We study   speech style.
    It works.</summary>
    <author><name>Jane Doe</name></author>
    <author><name>John Roe</name></author>
    <link href="http://arxiv.org/abs/2507.01234v1" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2507.01234v1" rel="related" type="application/pdf"/>
    <arxiv:primary_category term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
    <category term="eess.AS" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2507.05678v2</id>
    <updated>2025-06-20T08:30:00Z</updated>
    <title>Older Paper</title>
    <summary>Old.</summary>
    <category term="cs.SD" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
</feed>"#;

    fn paper(id: &str, published: NaiveDate, subjects: &[&str]) -> CandidateDocument {
        CandidateDocument {
            id: id.to_string(),
            title: id.to_string(),
            abstract_text: String::new(),
            pdf_url: pdf_url_from_id(id),
            published,
            author: "arXiv".to_string(),
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 2).unwrap()
    }

    fn ids(papers: &[CandidateDocument]) -> Vec<&str> {
        papers.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn test_unique_keywords_drops_repeats() {
        let keywords: Vec<String> = ["Speech Style", "omni", "speech style", "OMNI", "codec"]
            .iter()
            .map(|k| k.to_string())
            .collect();

        assert_eq!(unique_keywords(&keywords), vec!["Speech Style", "omni", "codec"]);
    }

    #[test]
    fn test_merge_unique_keeps_first_seen_id() {
        let searches = vec![
            (
                "speech style".to_string(),
                Ok(vec![paper("a", day(), &["cs.CL"]), paper("b", day(), &["cs.CL"])]),
            ),
            (
                "omni".to_string(),
                Ok(vec![paper("b", day(), &["cs.AI"]), paper("c", day(), &["cs.CL"])]),
            ),
        ];

        let merged = merge_unique(searches);

        assert_eq!(ids(&merged), vec!["a", "b", "c"]);
        assert_eq!(merged[1].subjects, vec!["cs.CL"]);
    }

    #[test]
    fn test_merge_unique_skips_failed_search() {
        let searches = vec![
            ("speech style".to_string(), Err(anyhow::anyhow!("arXiv API returned error: 503"))),
            ("omni".to_string(), Ok(vec![paper("c", day(), &["cs.CL"])])),
        ];

        assert_eq!(ids(&merge_unique(searches)), vec!["c"]);
    }

    #[test]
    fn test_parse_atom_feed_entries() {
        let papers = parse_atom_feed(FEED).unwrap();
        assert_eq!(papers.len(), 2);

        let first = &papers[0];
        assert_eq!(first.id, "http://arxiv.org/abs/2507.01234v1");
        assert_eq!(first.title, "Expressive Speech Style Transfer & Omni Models");
        assert_eq!(first.abstract_text, "We study speech style. It works.");
        assert_eq!(first.author, "Jane Doe");
        assert_eq!(first.pdf_url, "http://arxiv.org/pdf/2507.01234v1");
        assert_eq!(first.published, NaiveDate::from_ymd_opt(2025, 7, 2).unwrap());
        assert_eq!(first.subjects, vec!["cs.CL", "eess.AS"]);
    }

    #[test]
    fn test_parse_atom_feed_defaults() {
        let papers = parse_atom_feed(FEED).unwrap();
        let second = &papers[1];

        assert_eq!(second.author, "arXiv");
        assert_eq!(second.pdf_url, "http://arxiv.org/pdf/2507.05678v2");
    }

    #[test]
    fn test_parse_empty_feed() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>empty</title></feed>"#;
        assert!(parse_atom_feed(xml).unwrap().is_empty());
    }

    #[test]
    fn test_pdf_url_from_id() {
        assert_eq!(
            pdf_url_from_id("http://arxiv.org/abs/2401.12345v1"),
            "http://arxiv.org/pdf/2401.12345v1"
        );
        assert_eq!(pdf_url_from_id("not a url/abs/1"), "not a url/pdf/1");
    }

    #[test]
    fn test_filter_by_date_window() {
        let today = NaiveDate::from_ymd_opt(2025, 7, 3).unwrap();
        let subjects = vec!["cs.CL".to_string()];
        let papers = vec![
            paper("in-window", NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(), &["cs.CL"]),
            paper("window-start", NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(), &["cs.CL"]),
            paper("too-old", NaiveDate::from_ymd_opt(2025, 6, 29).unwrap(), &["cs.CL"]),
            paper("future", NaiveDate::from_ymd_opt(2025, 7, 4).unwrap(), &["cs.CL"]),
        ];

        let kept: Vec<String> = filter_candidates(papers, today, 3, &subjects)
            .into_iter()
            .map(|p| p.id)
            .collect();

        assert_eq!(kept, vec!["in-window", "window-start"]);
    }

    #[test]
    fn test_filter_by_subject() {
        let today = NaiveDate::from_ymd_opt(2025, 7, 3).unwrap();
        let subjects = vec!["cs.CL".to_string(), "cs.AI".to_string()];
        let papers = vec![
            paper("speech", today, &["eess.AS", "cs.AI"]),
            paper("audio-only", today, &["cs.SD", "eess.AS"]),
        ];

        let kept = filter_candidates(papers, today, 3, &subjects);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "speech");
    }
}
