use grounding::Document;
use minijinja::context;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::batch::{ItemFailure, RunOptions, Staged};
use crate::error::{IntegrityError, ItemError, StageError};
use crate::llm::ModelClient;
use crate::prompt::{PromptKind, PromptStore};
use crate::repair::repair;
use crate::schema::{Claim, ClaimSet, RhetoricReport, Stage};

const SYSTEM_INSTRUCTION: &str =
    "You extract independently verifiable scientific claims from research papers. Respond with JSON only.";

/// A claim record as the model writes it, before validation.
#[derive(Deserialize)]
struct ClaimCandidate {
    #[serde(default, alias = "id")]
    claim_id: Option<String>,
    #[serde(alias = "claim", alias = "text")]
    statement: String,
    #[serde(alias = "section_id")]
    source_section_id: String,
    confidence: f64,
}

/// Extracts claims from the whole document in one model call.
pub struct ClaimExtractor {
    client: Arc<dyn ModelClient>,
    prompts: Arc<PromptStore>,
}

impl ClaimExtractor {
    pub fn new(client: Arc<dyn ModelClient>, prompts: Arc<PromptStore>) -> Self {
        Self { client, prompts }
    }

    pub async fn run(
        &self,
        document: &Document,
        rhetoric: &RhetoricReport,
        options: &RunOptions,
    ) -> Result<Staged<ClaimSet>, StageError> {
        let annotated = rhetoric.annotate(document);
        let prompt = self.prompts.render(
            PromptKind::Extraction,
            context! {
                document_id => document.id(),
                sections => annotated.sections(),
            },
        )?;

        let response: Result<Vec<Value>, ItemError> = async {
            let raw = options
                .invoke(self.client.as_ref(), &prompt, Some(SYSTEM_INSTRUCTION))
                .await?;
            let value: Value = serde_json::from_str(&repair(&raw))?;
            candidate_list(value)
        }
        .await;

        let candidates = match response {
            Ok(candidates) => candidates,
            Err(error) => {
                warn!(
                    stage = %Stage::Extraction,
                    item_id = document.id(),
                    error = %error,
                    "Claim extraction failed, continuing with no claims"
                );
                let failure = ItemFailure {
                    item_id: document.id().to_string(),
                    error,
                };
                return Ok(Staged::new(ClaimSet::empty(), vec![failure]));
            }
        };

        let mut claims = Vec::with_capacity(candidates.len());
        let mut failures = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        // Ids the model chose are never handed to an unnamed candidate
        let reserved: HashSet<String> = candidates.iter().filter_map(explicit_id).collect();

        for (index, value) in candidates.into_iter().enumerate() {
            let item_id = candidate_id(&value, index);
            match validate_candidate(value, index, document, &seen, &reserved) {
                Ok(claim) => {
                    seen.insert(claim.claim_id.clone());
                    claims.push(claim);
                }
                Err(error) => {
                    warn!(
                        stage = %Stage::Extraction,
                        item_id = %item_id,
                        error = %error,
                        "Dropping invalid claim candidate"
                    );
                    failures.push(ItemFailure { item_id, error });
                }
            }
        }

        let claim_set = ClaimSet::try_new(document, claims)?;

        info!(
            stage = %Stage::Extraction,
            job_id = document.id(),
            claims = claim_set.len(),
            dropped = failures.len(),
            "Extracted claims"
        );

        Ok(Staged::new(claim_set, failures))
    }
}

/// Accept a bare list or `{"claims": [...]}`.
fn candidate_list(value: Value) -> Result<Vec<Value>, ItemError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("claims") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(ItemError::schema("object without a claims list")),
        },
        other => Err(ItemError::schema(format!("expected a list of claims, got {other}"))),
    }
}

/// The non-blank id the model gave a candidate, under either accepted key.
fn explicit_id(value: &Value) -> Option<String> {
    ["claim_id", "id"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn candidate_id(value: &Value, index: usize) -> String {
    explicit_id(value).unwrap_or_else(|| format!("candidate-{}", index + 1))
}

fn validate_candidate(
    value: Value,
    index: usize,
    document: &Document,
    seen: &HashSet<String>,
    reserved: &HashSet<String>,
) -> Result<Claim, ItemError> {
    let candidate: ClaimCandidate =
        serde_json::from_value(value).map_err(|e| ItemError::schema(e.to_string()))?;

    let statement = candidate.statement.trim();
    if statement.is_empty() {
        return Err(ItemError::schema("empty statement"));
    }
    if !(0.0..=1.0).contains(&candidate.confidence) {
        return Err(ItemError::schema(format!(
            "confidence {} outside [0, 1]",
            candidate.confidence
        )));
    }

    // The extractor creates claims, so it may number the ones the model left unnamed
    let claim_id = match candidate.claim_id.map(|id| id.trim().to_string()) {
        Some(id) if !id.is_empty() => id,
        _ => next_free_id(index + 1, |id| seen.contains(id) || reserved.contains(id)),
    };

    if seen.contains(&claim_id) {
        return Err(ItemError::schema(
            IntegrityError::DuplicateClaim { claim_id }.to_string(),
        ));
    }
    if !document.contains_section(&candidate.source_section_id) {
        return Err(ItemError::schema(
            IntegrityError::DanglingSection {
                claim_id,
                section_id: candidate.source_section_id,
            }
            .to_string(),
        ));
    }

    Ok(Claim {
        claim_id,
        statement: statement.to_string(),
        source_section_id: candidate.source_section_id,
        confidence: candidate.confidence,
    })
}

fn next_free_id(start: usize, taken: impl Fn(&str) -> bool) -> String {
    (start..)
        .map(|n| format!("C{n}"))
        .find(|id| !taken(id))
        .unwrap_or_else(|| format!("C{start}"))
}
