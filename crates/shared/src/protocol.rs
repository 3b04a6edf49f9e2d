use crate::models::SectionKey;

/// Separates the summary block from the relevance judgment in a reply.
pub const SEPARATOR: &str = "|||";

pub const PDF_MIME_TYPE: &str = "application/pdf";

/// Build the instruction payload sent next to the PDF.
///
/// The reply contract is `<summary-block>|||<Yes. or No.>`. Models break it
/// often enough that [`crate::parser`] never relies on it.
pub fn build_instructions(research_area: &str, summary_language: &str) -> String {
    let section_lines = SectionKey::ALL
        .iter()
        .map(|key| format!("{}\n<{}>", key.tag(), section_guidance(*key)))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are an assistant helping a researcher triage new papers. Analyze the attached PDF paper and produce two things: a structured summary written in {language}, and a judgment of whether the paper is relevant to my research area.

My research area:
"{research_area}"

Instructions:
1. Summary ({language}): write exactly five sections, in this order, each starting with its tag on its own line:
   - {motivation}: what problem does the paper address and why does it matter?
   - {differences}: how does the approach differ from prior work?
   - {contributions}: what are the main contributions?
   - {method}: what method or approach do the authors propose?
   - {results}: what are the key results that show the method works?
   Each section is one short paragraph of complete sentences, without emoji or decorative symbols.

2. Relevance: judge whether the paper's contributions are directly relevant to my research area.

3. Output format: follow the format below exactly and use "{separator}" as the separator. Do not add any other explanation or greeting before or after it.

Output format:
{sections}{separator}Yes. or No."#,
        language = summary_language,
        research_area = research_area,
        motivation = SectionKey::Motivation.tag(),
        differences = SectionKey::Differences.tag(),
        contributions = SectionKey::Contributions.tag(),
        method = SectionKey::Method.tag(),
        results = SectionKey::Results.tag(),
        separator = SEPARATOR,
        sections = section_lines,
    )
}

fn section_guidance(key: SectionKey) -> &'static str {
    match key {
        SectionKey::Motivation => "motivation paragraph",
        SectionKey::Differences => "differences from prior work paragraph",
        SectionKey::Contributions => "contributions paragraph",
        SectionKey::Method => "method paragraph",
        SectionKey::Results => "results paragraph",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instructions_list_tags_in_order() {
        let prompt = build_instructions("speech generation", "Korean");

        let format_block = prompt
            .split("Output format:\n")
            .last()
            .expect("format block present");
        let positions: Vec<usize> = SectionKey::ALL
            .iter()
            .map(|key| format_block.find(key.tag()).expect("tag present"))
            .collect();

        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(format_block.ends_with("|||Yes. or No."));
    }

    #[test]
    fn test_instructions_include_research_area_and_language() {
        let prompt = build_instructions("jointly reasoning over speech and ambient sound", "Korean");

        assert!(prompt.contains("\"jointly reasoning over speech and ambient sound\""));
        assert!(prompt.contains("written in Korean"));
        assert_eq!(prompt.matches(SEPARATOR).count(), 2);
    }
}
