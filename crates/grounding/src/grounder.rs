use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::error::GroundingError;
use crate::section::{Document, SectionDraft, estimate_tokens};

static NUMBERED_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,2}(\.\d{1,2})*\.?\s+\p{Lu}").expect("numbered heading pattern")
});

static NAMED_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(abstract|introduction|background|related work|methods?|methodology|materials and methods|experiments?|results?|discussion|limitations?|conclusions?|references|acknowledge?ments)\s*:?$",
    )
    .expect("named heading pattern")
});

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("paragraph break pattern"));

const MAX_HEADING_WORDS: usize = 12;

pub struct GrounderConfig {
    pub max_section_tokens: usize,
}

impl Default for GrounderConfig {
    fn default() -> Self {
        Self {
            max_section_tokens: 900,
        }
    }
}

/// Byte range of the normalized text that starts at a heading (or at the
/// beginning of the document for the preamble).
struct Block {
    title: Option<String>,
    start: usize,
    body_start: usize,
    end: usize,
}

pub struct Grounder {
    config: GrounderConfig,
}

impl Grounder {
    pub fn new(config: GrounderConfig) -> Self {
        Self { config }
    }

    /// Split a raw document into ordered, non-overlapping sections.
    pub fn ground(&self, raw: &[u8], job_id: &str) -> Result<Document, GroundingError> {
        let text = normalize(raw);
        if text.trim().is_empty() {
            return Err(GroundingError::NoExtractableText {
                job_id: job_id.to_string(),
            });
        }

        let mut drafts = Vec::new();
        for block in self.split_by_headings(&text) {
            // Heading with nothing under it
            if text[block.body_start..block.end].trim().is_empty() {
                continue;
            }

            if estimate_tokens(&text[block.start..block.end]) <= self.config.max_section_tokens {
                drafts.extend(draft(&text, block.title.as_deref(), block.start, block.end));
            } else {
                debug!(
                    job_id,
                    title = block.title.as_deref().unwrap_or("<preamble>"),
                    "Splitting oversized section by paragraphs"
                );
                drafts.extend(self.split_by_paragraphs(&text, &block));
            }
        }

        // Only headings: keep the text as one section rather than dropping it
        if drafts.is_empty() {
            drafts.extend(draft(&text, None, 0, text.len()));
        }

        if drafts.is_empty() {
            return Err(GroundingError::NoExtractableText {
                job_id: job_id.to_string(),
            });
        }

        let document = Document::assemble(job_id, drafts);
        info!(
            job_id,
            sections = document.sections().len(),
            fingerprint = document.fingerprint(),
            "Grounded document"
        );
        Ok(document)
    }

    fn split_by_headings(&self, text: &str) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut current = Block {
            title: None,
            start: 0,
            body_start: 0,
            end: 0,
        };
        let mut offset = 0;

        for line in text.split_inclusive('\n') {
            let line_start = offset;
            offset += line.len();

            if let Some(title) = heading_title(line.trim()) {
                current.end = line_start;
                blocks.push(current);
                current = Block {
                    title: Some(title),
                    start: line_start,
                    body_start: offset,
                    end: offset,
                };
            }
        }

        current.end = text.len();
        blocks.push(current);
        blocks
    }

    fn split_by_paragraphs(&self, text: &str, block: &Block) -> Vec<SectionDraft> {
        let body = &text[block.start..block.end];

        let mut paragraphs = Vec::new();
        let mut last = 0;
        for m in PARAGRAPH_BREAK.find_iter(body) {
            paragraphs.push((last, m.start()));
            last = m.end();
        }
        paragraphs.push((last, body.len()));

        let mut drafts = Vec::new();
        let mut buffer: Option<(usize, usize)> = None;
        let mut buffer_tokens = 0;

        for (start, end) in paragraphs {
            let tokens = estimate_tokens(&body[start..end]);
            if tokens == 0 {
                continue;
            }

            // If adding this paragraph exceeds max, flush buffer
            if let Some((buf_start, buf_end)) = buffer {
                if buffer_tokens + tokens > self.config.max_section_tokens {
                    drafts.extend(draft(
                        text,
                        block.title.as_deref(),
                        block.start + buf_start,
                        block.start + buf_end,
                    ));
                    buffer = None;
                    buffer_tokens = 0;
                }
            }

            buffer = Some(match buffer {
                Some((buf_start, _)) => (buf_start, end),
                None => (start, end),
            });
            buffer_tokens += tokens;
        }

        if let Some((buf_start, buf_end)) = buffer {
            drafts.extend(draft(
                text,
                block.title.as_deref(),
                block.start + buf_start,
                block.start + buf_end,
            ));
        }

        drafts
    }
}

impl Default for Grounder {
    fn default() -> Self {
        Self::new(GrounderConfig::default())
    }
}

fn normalize(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .replace("\r\n", "\n")
        .replace(['\r', '\u{c}'], "\n")
        .replace('\0', "")
}

fn heading_title(line: &str) -> Option<String> {
    if line.is_empty() {
        return None;
    }

    // Markdown heading
    if line.starts_with('#') {
        let title = line.trim_start_matches('#').trim();
        return (!title.is_empty()).then(|| title.to_string());
    }

    if line.split_whitespace().count() > MAX_HEADING_WORDS {
        return None;
    }

    if NAMED_HEADING.is_match(line) {
        return Some(line.trim_end_matches(':').trim().to_string());
    }

    // "3.1 Data Collection", but not a numbered sentence
    if NUMBERED_HEADING.is_match(line) && !line.ends_with(['.', ',', ';']) {
        return Some(line.to_string());
    }

    None
}

/// Draft over `text[start..end]` with surrounding whitespace excluded from
/// both the text and the span.
fn draft(text: &str, title: Option<&str>, start: usize, end: usize) -> Option<SectionDraft> {
    let slice = &text[start..end];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }
    let leading = slice.len() - slice.trim_start().len();
    let span_start = start + leading;

    Some(SectionDraft::new(title, trimmed).with_span(span_start, span_start + trimmed.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAPER: &str = "Scaling Laws for Tiny Models\n\
        A. Author\n\
        \n\
        Abstract\n\
        We study small models.\n\
        \n\
        1. Introduction\n\
        Small models are cheap.\n\
        \n\
        2.1 Data Collection\n\
        We gathered 40 samples.\n\
        \n\
        Results:\n\
        Accuracy improved by 12%.\n";

    #[test]
    fn test_academic_headings() {
        let grounder = Grounder::default();
        let doc = grounder.ground(PAPER.as_bytes(), "job-1").unwrap();

        let titles: Vec<Option<&str>> = doc.sections().iter().map(|s| s.title.as_deref()).collect();
        assert_eq!(
            titles,
            vec![
                None,
                Some("Abstract"),
                Some("1. Introduction"),
                Some("2.1 Data Collection"),
                Some("Results"),
            ]
        );
        assert_eq!(doc.sections()[0].text, "Scaling Laws for Tiny Models\nA. Author");
        assert!(doc.sections()[4].text.ends_with("Accuracy improved by 12%."));
    }

    #[test]
    fn test_markdown_headings_and_spans() {
        let text = "# Method\n\nWe ran trials.\n\n# Result\n\nIt worked.\n";
        let doc = Grounder::default().ground(text.as_bytes(), "md").unwrap();

        assert_eq!(doc.sections().len(), 2);
        for section in doc.sections() {
            let (start, end) = section.span;
            assert_eq!(&text[start..end], section.text);
        }
        assert_eq!(doc.sections()[1].title.as_deref(), Some("Result"));
    }

    #[test]
    fn test_numbered_sentence_is_not_a_heading() {
        assert!(heading_title("1. We collected data from three sites.").is_none());
        assert!(heading_title("3 Experimental Setup").is_some());
        assert!(heading_title("CONCLUSIONS").is_some());
    }

    #[test]
    fn test_empty_document_fails() {
        let err = Grounder::default().ground(b"  \n\n\t ", "empty").unwrap_err();
        assert!(matches!(err, GroundingError::NoExtractableText { ref job_id } if job_id == "empty"));
    }

    #[test]
    fn test_heading_only_document_is_kept() {
        let doc = Grounder::default().ground(b"# Just a title\n", "t").unwrap();
        assert_eq!(doc.sections().len(), 1);
        assert_eq!(doc.sections()[0].text, "# Just a title");
    }

    #[test]
    fn test_oversized_section_splits_without_overlap() {
        let paragraph = "word ".repeat(40);
        let text = format!("# Long\n\n{p}\n\n{p}\n\n{p}\n", p = paragraph.trim());
        let grounder = Grounder::new(GrounderConfig {
            max_section_tokens: 60,
        });
        let doc = grounder.ground(text.as_bytes(), "long").unwrap();

        assert!(doc.sections().len() >= 2);
        let mut previous_end = 0;
        for section in doc.sections() {
            assert_eq!(section.title.as_deref(), Some("Long"));
            assert!(section.span.0 >= previous_end);
            previous_end = section.span.1;
        }
    }

    #[test]
    fn test_crlf_and_form_feed_are_normalized() {
        let doc = Grounder::default()
            .ground(b"Methods\r\nWe did it.\x0cResults\r\nIt worked.", "pdf")
            .unwrap();
        assert_eq!(doc.sections().len(), 2);
        assert_eq!(doc.sections()[1].title.as_deref(), Some("Results"));
    }
}
