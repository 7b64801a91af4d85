use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Functional category of a section's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RhetoricalRole {
    Background,
    Objective,
    Method,
    Result,
    Discussion,
    Conclusion,
    Limitation,
    Other,
}

impl RhetoricalRole {
    pub const ALL: [RhetoricalRole; 8] = [
        RhetoricalRole::Background,
        RhetoricalRole::Objective,
        RhetoricalRole::Method,
        RhetoricalRole::Result,
        RhetoricalRole::Discussion,
        RhetoricalRole::Conclusion,
        RhetoricalRole::Limitation,
        RhetoricalRole::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RhetoricalRole::Background => "background",
            RhetoricalRole::Objective => "objective",
            RhetoricalRole::Method => "method",
            RhetoricalRole::Result => "result",
            RhetoricalRole::Discussion => "discussion",
            RhetoricalRole::Conclusion => "conclusion",
            RhetoricalRole::Limitation => "limitation",
            RhetoricalRole::Other => "other",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RhetoricalRole::Background => "prior work, context and motivation",
            RhetoricalRole::Objective => "research questions, aims or hypotheses",
            RhetoricalRole::Method => "study design, data, procedures and analysis",
            RhetoricalRole::Result => "findings, measurements and reported outcomes",
            RhetoricalRole::Discussion => "interpretation of findings and comparison to prior work",
            RhetoricalRole::Conclusion => "final takeaways and implications",
            RhetoricalRole::Limitation => "acknowledged weaknesses and threats to validity",
            RhetoricalRole::Other => "references, acknowledgements or anything else",
        }
    }

    /// Taxonomy rendered as one `role: description` line per role.
    pub fn taxonomy_text() -> String {
        Self::ALL
            .iter()
            .map(|role| format!("- {}: {}", role.as_str(), role.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for RhetoricalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    pub id: String,
    pub title: Option<String>,
    pub text: String,
    pub span: (usize, usize), // [start, end) byte positions in the normalized document text
    pub role: Option<RhetoricalRole>,
}

impl Section {
    /// Estimate token count (rough: 1.3 tokens per word)
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.text)
    }
}

/// A section before it has been given an identifier by its document.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionDraft {
    pub title: Option<String>,
    pub text: String,
    pub span: (usize, usize),
}

impl SectionDraft {
    pub fn new(title: Option<&str>, text: impl Into<String>) -> Self {
        let text = text.into();
        let span = (0, text.len());
        Self {
            title: title.map(str::to_string),
            text,
            span,
        }
    }

    pub fn with_span(mut self, start: usize, end: usize) -> Self {
        self.span = (start, end);
        self
    }
}

/// An ordered, immutable sequence of sections.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    id: String,
    fingerprint: String,
    sections: Vec<Section>,
}

impl Document {
    /// Build a document, assigning `S1..Sn` in the order the drafts are given.
    pub fn assemble(id: impl Into<String>, drafts: Vec<SectionDraft>) -> Self {
        let id = id.into();
        let sections: Vec<Section> = drafts
            .into_iter()
            .enumerate()
            .map(|(i, draft)| Section {
                id: format!("S{}", i + 1),
                title: draft.title,
                text: draft.text,
                span: draft.span,
                role: None,
            })
            .collect();
        let fingerprint = Self::generate_fingerprint(&sections);

        Self {
            id,
            fingerprint,
            sections,
        }
    }

    fn generate_fingerprint(sections: &[Section]) -> String {
        let mut hasher = Sha256::new();
        for section in sections {
            hasher.update(section.text.as_bytes());
            hasher.update(section.span.0.to_string().as_bytes());
            hasher.update(section.span.1.to_string().as_bytes());
        }
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, section_id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == section_id)
    }

    pub fn contains_section(&self, section_id: &str) -> bool {
        self.section(section_id).is_some()
    }

    /// Copy of this document with each section's role looked up by id.
    /// Sections the lookup has no answer for keep `role: None`.
    pub fn with_roles<F>(&self, lookup: F) -> Document
    where
        F: Fn(&str) -> Option<RhetoricalRole>,
    {
        let sections = self
            .sections
            .iter()
            .map(|s| Section {
                role: lookup(&s.id),
                ..s.clone()
            })
            .collect();

        Document {
            id: self.id.clone(),
            fingerprint: self.fingerprint.clone(),
            sections,
        }
    }
}

pub(crate) fn estimate_tokens(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    (word_count as f64 * 1.3) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_assigns_sequential_ids() {
        let doc = Document::assemble(
            "job-1",
            vec![
                SectionDraft::new(Some("Introduction"), "Why this matters."),
                SectionDraft::new(Some("Methods"), "What we did."),
            ],
        );

        let ids: Vec<&str> = doc.sections().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "S2"]);
        assert_eq!(doc.id(), "job-1");
        assert!(doc.contains_section("S2"));
        assert!(!doc.contains_section("S3"));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = Document::assemble("a", vec![SectionDraft::new(None, "same text")]);
        let b = Document::assemble("b", vec![SectionDraft::new(None, "same text")]);
        let c = Document::assemble("c", vec![SectionDraft::new(None, "other text")]);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 32);
    }

    #[test]
    fn test_with_roles_leaves_original_untouched() {
        let doc = Document::assemble(
            "job",
            vec![
                SectionDraft::new(None, "one"),
                SectionDraft::new(None, "two"),
            ],
        );
        let annotated = doc.with_roles(|id| (id == "S1").then_some(RhetoricalRole::Method));

        assert_eq!(annotated.sections()[0].role, Some(RhetoricalRole::Method));
        assert_eq!(annotated.sections()[1].role, None);
        assert!(doc.sections().iter().all(|s| s.role.is_none()));
    }

    #[test]
    fn test_role_serde_is_lowercase() {
        let role: RhetoricalRole = serde_json::from_str("\"result\"").unwrap();
        assert_eq!(role, RhetoricalRole::Result);
        assert!(serde_json::from_str::<RhetoricalRole>("\"Result\"").is_err());
        assert!(RhetoricalRole::taxonomy_text().contains("- limitation:"));
    }
}
