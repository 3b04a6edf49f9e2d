use thiserror::Error;

use crate::models::{Relevance, SectionKey, StructuredSummary};
use crate::protocol::SEPARATOR;

/// Longest slice of a raw reply that ends up in logs.
pub const PREVIEW_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("reply has no '|||' separator")]
    MissingSeparator,
    #[error("reply has more than one '|||' separator")]
    ExtraSeparator,
    #[error("reply has an empty {0} part around the separator")]
    EmptyPart(&'static str),
    #[error("judgment contains neither 'yes' nor 'no': {0:?}")]
    NoVerdict(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub relevance: Relevance,
    pub summary: StructuredSummary,
}

/// Recover a verdict and a five-section summary from a free-text reply.
///
/// Only the separator and the verdict are mandatory. Missing section tags
/// degrade to "N/A" instead of rejecting the reply.
pub fn parse_reply(text: &str) -> Result<ParsedReply, ParseError> {
    let (summary_part, judgment_part) = text
        .trim()
        .split_once(SEPARATOR)
        .ok_or(ParseError::MissingSeparator)?;

    if judgment_part.contains(SEPARATOR) {
        return Err(ParseError::ExtraSeparator);
    }

    let summary_part = summary_part.trim();
    let judgment_part = judgment_part.trim();
    if summary_part.is_empty() {
        return Err(ParseError::EmptyPart("summary"));
    }
    if judgment_part.is_empty() {
        return Err(ParseError::EmptyPart("judgment"));
    }

    let relevance = parse_judgment(judgment_part)?;
    let summary = StructuredSummary::from_sections(extract_sections(summary_part));

    Ok(ParsedReply { relevance, summary })
}

/// "yes" is checked before "no", so a judgment containing both is Related.
pub fn parse_judgment(judgment: &str) -> Result<Relevance, ParseError> {
    let lowered = judgment.to_lowercase();
    if lowered.contains("yes") {
        Ok(Relevance::Related)
    } else if lowered.contains("no") {
        Ok(Relevance::Unrelated)
    } else {
        Err(ParseError::NoVerdict(preview(judgment)))
    }
}

/// Scan for each section tag and take the text up to the next tag of any
/// section, or the end of the block. Tags are matched case-insensitively.
///
/// Empty sections are left out so they read as missing.
pub fn extract_sections(block: &str) -> Vec<(SectionKey, String)> {
    // ASCII lowering keeps byte offsets identical to `block`
    let lowered = block.to_ascii_lowercase();
    let tags: Vec<(SectionKey, String)> = SectionKey::ALL
        .iter()
        .map(|key| (*key, key.tag().to_ascii_lowercase()))
        .collect();

    let mut sections = Vec::new();
    for (key, tag) in &tags {
        let Some(tag_start) = lowered.find(tag.as_str()) else {
            continue;
        };
        let start = tag_start + tag.len();

        let end = tags
            .iter()
            .filter_map(|(_, other)| lowered[start..].find(other.as_str()))
            .min()
            .map(|offset| start + offset)
            .unwrap_or(block.len());

        let value = block[start..end].trim();
        if !value.is_empty() {
            sections.push((*key, value.to_string()));
        }
    }

    sections
}

/// First [`PREVIEW_CHARS`] characters of a reply, for logging.
pub fn preview(text: &str) -> String {
    let mut preview: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    preview
}
