use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Placeholder stored for a section the model did not produce.
pub const MISSING_SECTION: &str = "N/A";

/// Longest section value accepted by the store (Notion rich-text limit).
pub const MAX_SECTION_CHARS: usize = 2000;

/// Length a too-long section is cut to before the marker is appended.
pub const TRUNCATED_SECTION_CHARS: usize = 1990;

pub const TRUNCATION_MARKER: &str = "...";

/// Collapse every run of whitespace into a single space and trim the ends.
///
/// Titles coming from arXiv and titles read back from Notion both go through
/// this, otherwise line-wrapped feed titles never match stored ones.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One paper found by the fetcher and not yet classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDocument {
    /// Abstract page URL, e.g. `http://arxiv.org/abs/2401.12345v1`
    pub id: String,
    pub title: String,
    pub abstract_text: String,
    pub pdf_url: String,
    pub published: NaiveDate,
    pub author: String,
    pub subjects: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relevance {
    Related,
    Unrelated,
}

impl Relevance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relevance::Related => "Related",
            Relevance::Unrelated => "Unrelated",
        }
    }
}

impl fmt::Display for Relevance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five summary sections, in the order the model is asked to emit them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SectionKey {
    Motivation,
    Differences,
    Contributions,
    Method,
    Results,
}

impl SectionKey {
    pub const ALL: [SectionKey; 5] = [
        SectionKey::Motivation,
        SectionKey::Differences,
        SectionKey::Contributions,
        SectionKey::Method,
        SectionKey::Results,
    ];

    /// Literal tag the model must put in front of the section, e.g. `[METHOD]`.
    pub fn tag(&self) -> &'static str {
        match self {
            SectionKey::Motivation => "[MOTIVATION]",
            SectionKey::Differences => "[DIFFERENCES]",
            SectionKey::Contributions => "[CONTRIBUTIONS]",
            SectionKey::Method => "[METHOD]",
            SectionKey::Results => "[RESULTS]",
        }
    }

    /// Property name used in the Notion database.
    pub fn property_name(&self) -> &'static str {
        match self {
            SectionKey::Motivation => "Motivation",
            SectionKey::Differences => "Differences",
            SectionKey::Contributions => "Contributions",
            SectionKey::Method => "Method",
            SectionKey::Results => "Results",
        }
    }
}

/// Bound a section value to [`MAX_SECTION_CHARS`] characters.
///
/// Counts chars, not bytes: summaries are usually Korean.
pub fn truncate_section(value: &str) -> String {
    if value.chars().count() <= MAX_SECTION_CHARS {
        return value.to_string();
    }

    let mut truncated: String = value.chars().take(TRUNCATED_SECTION_CHARS).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

/// Fixed-schema summary: every [`SectionKey`] always has a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredSummary {
    sections: BTreeMap<SectionKey, String>,
}

impl StructuredSummary {
    /// Build from whatever sections were recovered. Absent keys become
    /// [`MISSING_SECTION`] and every value is truncated.
    pub fn from_sections(found: impl IntoIterator<Item = (SectionKey, String)>) -> Self {
        let mut sections: BTreeMap<SectionKey, String> = found
            .into_iter()
            .map(|(key, value)| (key, truncate_section(&value)))
            .collect();

        for key in SectionKey::ALL {
            sections
                .entry(key)
                .or_insert_with(|| MISSING_SECTION.to_string());
        }

        Self { sections }
    }

    pub fn get(&self, key: SectionKey) -> &str {
        self.sections
            .get(&key)
            .map(String::as_str)
            .unwrap_or(MISSING_SECTION)
    }

    /// Sections in fixed order.
    pub fn iter(&self) -> impl Iterator<Item = (SectionKey, &str)> {
        self.sections.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn missing_count(&self) -> usize {
        self.sections
            .values()
            .filter(|v| v.as_str() == MISSING_SECTION)
            .count()
    }
}

/// Titles already recorded in the store, whitespace-normalized.
#[derive(Debug, Clone, Default)]
pub struct KnownTitles {
    titles: HashSet<String>,
}

impl KnownTitles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, title: &str) {
        self.titles.insert(normalize_whitespace(title));
    }

    pub fn contains(&self, title: &str) -> bool {
        self.titles.contains(&normalize_whitespace(title))
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for KnownTitles {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut known = KnownTitles::new();
        for title in iter {
            known.insert(title.as_ref());
        }
        known
    }
}
