use grounding::{Document, RhetoricalRole};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::IntegrityError;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Grounding,
    Segmentation,
    Extraction,
    GapAnalysis,
    Validation,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Grounding,
        Stage::Segmentation,
        Stage::Extraction,
        Stage::GapAnalysis,
        Stage::Validation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Grounding => "grounding",
            Stage::Segmentation => "segmentation",
            Stage::Extraction => "extraction",
            Stage::GapAnalysis => "gap_analysis",
            Stage::Validation => "validation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleClassification {
    pub role: RhetoricalRole,
    pub confidence: f64,
}

/// Section id -> classification, in document order. Sections that could
/// not be classified are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RhetoricReport {
    pub roles: IndexMap<String, RoleClassification>,
}

impl RhetoricReport {
    pub fn get(&self, section_id: &str) -> Option<&RoleClassification> {
        self.roles.get(section_id)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Copy of `document` with roles filled in for classified sections.
    pub fn annotate(&self, document: &Document) -> Document {
        document.with_roles(|section_id| self.get(section_id).map(|c| c.role))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: String,
    pub statement: String,
    pub source_section_id: String,
    pub confidence: f64,
}

/// Claims in extraction order. Every claim resolves to a section of the
/// document it was built against and claim ids are unique.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClaimSet {
    claims: Vec<Claim>,
}

impl ClaimSet {
    pub fn try_new(document: &Document, claims: Vec<Claim>) -> Result<Self, IntegrityError> {
        let mut seen = HashSet::new();
        for claim in &claims {
            if !document.contains_section(&claim.source_section_id) {
                return Err(IntegrityError::DanglingSection {
                    claim_id: claim.claim_id.clone(),
                    section_id: claim.source_section_id.clone(),
                });
            }
            if !seen.insert(claim.claim_id.as_str()) {
                return Err(IntegrityError::DuplicateClaim {
                    claim_id: claim.claim_id.clone(),
                });
            }
        }
        Ok(Self { claims })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    pub fn get(&self, claim_id: &str) -> Option<&Claim> {
        self.claims.iter().find(|c| c.claim_id == claim_id)
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapEntry {
    pub claim_id: String,
    pub signals: Vec<String>,
}

impl GapEntry {
    pub fn new(claim_id: impl Into<String>, signals: Vec<&str>) -> Self {
        Self {
            claim_id: claim_id.into(),
            signals: signals.into_iter().map(str::to_string).collect(),
        }
    }
}

/// Per-claim gap signals. An entry with no signals means the claim was
/// analyzed and no gaps were found.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GapAnalysis {
    pub analysis: Vec<GapEntry>,
}

impl GapAnalysis {
    pub fn new(analysis: Vec<GapEntry>) -> Self {
        Self { analysis }
    }

    /// Reject entries whose claim is not in `claims`.
    pub fn validate_against(&self, claims: &ClaimSet) -> Result<(), IntegrityError> {
        match self.analysis.iter().find(|e| claims.get(&e.claim_id).is_none()) {
            Some(entry) => Err(IntegrityError::UnknownClaim {
                claim_id: entry.claim_id.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// A constructive question probing one evidentiary gap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationQuestion {
    /// The question text.
    pub question: String,
}

impl ValidationQuestion {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimValidation {
    pub claim_id: String,
    pub questions: Vec<ValidationQuestion>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub report: Vec<ClaimValidation>,
}

impl ValidationReport {
    pub fn claim_ids(&self) -> Vec<&str> {
        self.report.iter().map(|v| v.claim_id.as_str()).collect()
    }

    pub fn question_count(&self) -> usize {
        self.report.iter().map(|v| v.questions.len()).sum()
    }
}
