//! # Presentation
//!
//! Turns a stage document into a printable slide deck: a title slide, a
//! table of contents, one slide per `##` section and a closing slide.

use chrono::{Datelike, NaiveDate, Utc};

use super::markdown::{escape_html, render_markdown};
use crate::analysis::questions::is_questions_header;
use crate::stages::DiscoveryStage;

/// Sections listed on the table-of-contents slide
pub const TOC_ENTRIES: usize = 4;

const DECK_STYLES: &str = r#"<style>
  @import url('https://fonts.googleapis.com/css2?family=Plus+Jakarta+Sans:wght@400;600;700;800&display=swap');
  * { box-sizing: border-box; }
  body { margin: 0; background: #1e293b; font-family: 'Plus Jakarta Sans', sans-serif; }
  .slide { width: 1280px; height: 720px; margin: 40px auto; padding: 80px; position: relative; overflow: hidden; }
  .slide-title { background: #1a5f7a; color: #ffffff; display: flex; flex-direction: column; justify-content: flex-end; }
  .slide-title h1 { font-size: 60px; font-weight: 300; margin: 0 0 auto 0; padding-top: 80px; }
  .slide-dark { background: #000000; color: #ffffff; }
  .slide-dark h2 { font-size: 36px; margin-bottom: 64px; }
  .toc { display: grid; grid-template-columns: 1fr 1fr; gap: 40px 80px; }
  .toc-entry { display: flex; gap: 24px; border-top: 1px solid #1e293b; padding-top: 24px; }
  .toc-entry .num { font-size: 48px; font-weight: 700; color: #6366f1; }
  .toc-entry h3 { margin: 0; font-size: 20px; text-transform: uppercase; }
  .toc-entry p { margin: 8px 0 0; font-size: 14px; color: #64748b; }
  .slide-content { background: #ffffff; color: #0f172a; display: flex; flex-direction: column; }
  .slide-content h2.heading { font-size: 30px; font-weight: 800; text-transform: uppercase; color: #1a5f7a; margin: 0 0 40px; }
  .slide-content .body { flex: 1; overflow: hidden; font-size: 16px; line-height: 1.6; }
  .slide-content table { width: 100%; border-collapse: collapse; }
  .slide-content th, .slide-content td { border: 1px solid #e2e8f0; padding: 8px; text-align: left; }
  .slide-number { position: absolute; top: 40px; right: 40px; font-size: 10px; font-weight: 700; color: #cbd5e1; }
  .slide-closing { background: #000000; color: #ffffff; display: flex; align-items: center; }
  .slide-closing h1 { font-size: 96px; font-weight: 800; }
  @media print {
    body { background: #ffffff; }
    .slide { margin: 0; page-break-after: always; break-after: page; }
    @page { size: 1280px 720px; margin: 0; }
  }
</style>"#;

/// One `##` section of a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub heading: String,
    /// Markdown without the heading line
    pub body: String,
}

impl Section {
    fn parse(raw: &str) -> Self {
        let mut heading = None;
        let mut body = Vec::new();
        for line in raw.lines() {
            if heading.is_none() && line.starts_with("##") {
                heading = Some(line.trim_start_matches('#').trim().to_string());
            } else {
                body.push(line);
            }
        }
        Self {
            heading: heading.unwrap_or_else(|| "Content".to_string()),
            body: body.join("\n").trim().to_string(),
        }
    }

    /// First non-heading line, used as the TOC blurb
    pub fn summary(&self) -> &str {
        self.body
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#'))
            .unwrap_or("")
    }
}

fn is_heading_of_depth(line: &str, depths: &[usize]) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    depths.contains(&hashes) && line[hashes..].starts_with(char::is_whitespace)
}

/// Split `text` before every line that satisfies `boundary`, dropping blank chunks
fn split_before(text: &str, boundary: impl Fn(&str) -> bool) -> Vec<String> {
    let mut chunks: Vec<Vec<&str>> = vec![Vec::new()];
    for line in text.lines() {
        if boundary(line) && chunks.last().is_some_and(|c| !c.is_empty()) {
            chunks.push(Vec::new());
        }
        if let Some(current) = chunks.last_mut() {
            current.push(line);
        }
    }
    chunks
        .into_iter()
        .map(|c| c.join("\n"))
        .filter(|c| !c.trim().is_empty())
        .collect()
}

/// Sections split at `## ` headings
pub fn sections(output: &str) -> Vec<Section> {
    split_before(output, |l| is_heading_of_depth(l, &[2]))
        .iter()
        .map(|raw| Section::parse(raw))
        .collect()
}

/// `##`/`###` blocks of a document, without the clarification-questions block
pub fn structured_blocks(output: &str) -> Vec<String> {
    split_before(output, |l| is_heading_of_depth(l, &[2, 3]))
        .into_iter()
        .filter(|block| !block.lines().any(is_questions_header))
        .map(|block| block.trim().to_string())
        .filter(|block| !block.is_empty())
        .collect()
}

/// Render the deck dated today, or `None` when there is no output
pub fn render_presentation(stage: DiscoveryStage, output: &str) -> Option<String> {
    render_presentation_on(stage, output, Utc::now().date_naive())
}

/// Render the deck with an explicit date on the title slide
pub fn render_presentation_on(
    stage: DiscoveryStage,
    output: &str,
    date: NaiveDate,
) -> Option<String> {
    if output.trim().is_empty() {
        return None;
    }

    let sections = sections(output);
    let title = escape_html(stage.config().title);
    let mut slides = Vec::with_capacity(sections.len() + 3);

    slides.push(format!(
        "<section class=\"slide slide-title\"><h1>{}</h1><p>{}</p></section>",
        title,
        date.format("%B %Y")
    ));

    let toc: String = sections
        .iter()
        .take(TOC_ENTRIES)
        .enumerate()
        .map(|(i, s)| {
            format!(
                "<div class=\"toc-entry\"><span class=\"num\">{}</span><div><h3>{}</h3><p>{}</p></div></div>",
                i + 1,
                escape_html(&s.heading),
                escape_html(s.summary())
            )
        })
        .collect();
    slides.push(format!(
        "<section class=\"slide slide-dark\"><h2>Table of Contents</h2><div class=\"toc\">{}</div></section>",
        toc
    ));

    for (i, section) in sections.iter().enumerate() {
        slides.push(format!(
            "<section class=\"slide slide-content\"><div class=\"slide-number\">{:02}</div><h2 class=\"heading\">{}</h2><div class=\"body\">{}</div></section>",
            i + 3,
            escape_html(&section.heading),
            render_markdown(&section.body)
        ));
    }

    slides.push(format!(
        "<section class=\"slide slide-closing\"><h1>Thank You</h1><p>&copy; {}</p></section>",
        date.year()
    ));

    Some(format!(
        "<!DOCTYPE html><html><head><meta charset='utf-8'><title>{} Deck</title>{}</head><body>{}</body></html>",
        title,
        DECK_STYLES,
        slides.join("\n")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "# Business Overview\nIntro line\n\n## Goals\nGrow fleet revenue.\n\n### Detail\nMore.\n\n## Scope\n\nEU only.\n\n## Entities\n| A | B |\n|---|---|\n| 1 | 2 |\n\n## Flows\nOnboarding.\n\n## Risks\nChurn.\n\n### CLARIFICATION QUESTIONS\n1. Who pays?";

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
    }

    #[test]
    fn test_sections_split_at_h2() {
        let sections = sections(DOC);
        let headings: Vec<_> = sections.iter().map(|s| s.heading.as_str()).collect();
        assert_eq!(
            headings,
            vec!["Content", "Goals", "Scope", "Entities", "Flows", "Risks"]
        );
        assert_eq!(sections[1].summary(), "Grow fleet revenue.");
        assert!(sections[1].body.contains("### Detail"));
        assert_eq!(sections[2].summary(), "EU only.");
    }

    #[test]
    fn test_deck_layout() {
        let deck = render_presentation_on(DiscoveryStage::Bod, DOC, date()).unwrap();
        assert!(deck.contains("Business Overview Document (BOD)"));
        assert!(deck.contains("March 2026"));
        assert_eq!(deck.matches("class=\"toc-entry\"").count(), TOC_ENTRIES);
        assert_eq!(deck.matches("slide slide-content").count(), 6);
        assert!(deck.contains("Thank You"));
        assert!(deck.contains("page-break-after: always"));
        assert!(deck.contains("<table>"));
    }

    #[test]
    fn test_empty_output_has_no_deck() {
        assert!(render_presentation(DiscoveryStage::Kpi, "\n  ").is_none());
    }

    #[test]
    fn test_structured_blocks_drop_questions() {
        let blocks = structured_blocks(DOC);
        assert_eq!(blocks.len(), 7);
        assert!(blocks[0].starts_with("# Business Overview"));
        assert!(blocks.iter().any(|b| b.starts_with("### Detail")));
        assert!(!blocks.iter().any(|b| b.contains("Who pays?")));
    }

    #[test]
    fn test_h4_is_not_a_boundary() {
        let blocks = structured_blocks("## A\n#### deep\ntext");
        assert_eq!(blocks, vec!["## A\n#### deep\ntext".to_string()]);
    }
}
