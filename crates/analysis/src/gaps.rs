use extract::error::{IntegrityError, ItemError, StageError};
use extract::{
    ClaimSet, GapAnalysis, GapEntry, ModelClient, PromptKind, PromptStore, RunOptions, Stage,
    Staged, repair, run_items,
};
use grounding::Document;
use minijinja::context;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::value_text;

const SYSTEM_INSTRUCTION: &str =
    "You are a rigorous peer reviewer. Identify evidentiary gaps in scientific claims. Respond with JSON only.";

/// Finds evidentiary gap signals for each claim independently.
pub struct GapAnalyzer {
    client: Arc<dyn ModelClient>,
    prompts: Arc<PromptStore>,
}

impl GapAnalyzer {
    pub fn new(client: Arc<dyn ModelClient>, prompts: Arc<PromptStore>) -> Self {
        Self { client, prompts }
    }

    pub async fn run(
        &self,
        document: &Document,
        claims: &ClaimSet,
        options: &RunOptions,
    ) -> Result<Staged<GapAnalysis>, StageError> {
        let mut items = Vec::with_capacity(claims.len());
        for claim in claims.claims() {
            let section = document.section(&claim.source_section_id).ok_or_else(|| {
                IntegrityError::DanglingSection {
                    claim_id: claim.claim_id.clone(),
                    section_id: claim.source_section_id.clone(),
                }
            })?;

            let prompt = self.prompts.render(
                PromptKind::GapAnalysis,
                context! {
                    claim_id => &claim.claim_id,
                    statement => &claim.statement,
                    section_id => &section.id,
                    section_text => &section.text,
                },
            )?;
            items.push((claim.claim_id.clone(), prompt));
        }

        let client = self.client.as_ref();
        let staged = run_items(Stage::GapAnalysis, items, options, move |prompt| async move {
            let raw = options
                .invoke(client, &prompt, Some(SYSTEM_INSTRUCTION))
                .await?;
            parse_signals(&raw)
        })
        .await;

        let analysis = GapAnalysis::new(
            staged
                .output
                .into_iter()
                .map(|(claim_id, signals)| GapEntry { claim_id, signals })
                .collect(),
        );
        analysis.validate_against(claims)?;

        info!(
            stage = %Stage::GapAnalysis,
            job_id = document.id(),
            analyzed = analysis.analysis.len(),
            with_gaps = analysis.analysis.iter().filter(|e| !e.signals.is_empty()).count(),
            "Analyzed claims for evidentiary gaps"
        );

        Ok(Staged::new(analysis, staged.failures))
    }
}

/// Parse an ordered list of gap signals. An empty list is a valid answer.
///
/// Accepts a list (of strings or `{"signal": ...}` objects) or an object
/// wrapping one under `signals` or `gaps`.
pub fn parse_signals(raw: &str) -> Result<Vec<String>, ItemError> {
    let value: Value = serde_json::from_str(&repair(raw))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("signals").or_else(|| map.remove("gaps")) {
            Some(Value::Array(items)) => items,
            _ => return Err(ItemError::schema("object without a signals list")),
        },
        other => {
            return Err(ItemError::schema(format!(
                "expected a list of gap signals, got {other}"
            )));
        }
    };

    let mut signals = Vec::with_capacity(items.len());
    for item in items {
        match signal_text(&item) {
            Some(signal) => signals.push(signal),
            None => debug!(item = %item, "Skipping unusable gap signal"),
        }
    }
    Ok(signals)
}

fn signal_text(item: &Value) -> Option<String> {
    let text = match item {
        Value::String(text) => text.clone(),
        Value::Object(map) => match map.get("signal") {
            Some(Value::String(text)) => text.clone(),
            _ => map.values().next().and_then(value_text)?,
        },
        _ => return None,
    };

    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::testing::{ScriptedFailure, ScriptedModel};
    use extract::{Claim, PromptTemplates};
    use grounding::SectionDraft;

    fn document() -> Document {
        Document::assemble(
            "paper-1",
            vec![
                SectionDraft::new(Some("Methods"), "We enrolled 30 patients without a placebo arm."),
                SectionDraft::new(Some("Results"), "Drug X lowered blood pressure in all patients."),
            ],
        )
    }

    fn claims(document: &Document) -> ClaimSet {
        let claim = |id: &str, section: &str, statement: &str| Claim {
            claim_id: id.to_string(),
            statement: statement.to_string(),
            source_section_id: section.to_string(),
            confidence: 0.8,
        };
        ClaimSet::try_new(
            document,
            vec![
                claim("C1", "S2", "Drug X lowers blood pressure"),
                claim("C2", "S1", "Thirty patients are enough"),
                claim("C3", "S2", "The effect is universal"),
            ],
        )
        .unwrap()
    }

    fn analyzer(model: ScriptedModel) -> (GapAnalyzer, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        let prompts = Arc::new(PromptStore::new(PromptTemplates::default()).unwrap());
        (GapAnalyzer::new(model.clone(), prompts), model)
    }

    #[test]
    fn test_parse_signal_shapes() {
        assert_eq!(
            parse_signals(r#"["no control group", "  ", "small sample"]"#).unwrap(),
            vec!["no control group", "small sample"]
        );
        assert_eq!(
            parse_signals(r#"{"signals": [{"signal": "no placebo"}, {"gap": "short follow-up"}, 7]}"#)
                .unwrap(),
            vec!["no placebo", "short follow-up"]
        );
        assert_eq!(
            parse_signals("```json\n{'gaps': []}\n```").unwrap(),
            Vec::<String>::new()
        );
    }

    #[test]
    fn test_parse_signals_rejects_other_shapes() {
        assert!(matches!(parse_signals(r#""just text""#), Err(ItemError::Schema { .. })));
        assert!(matches!(parse_signals(r#"{"verdict": "fine"}"#), Err(ItemError::Schema { .. })));
        assert!(matches!(parse_signals("No gaps found."), Err(ItemError::Parse(_))));
    }

    #[tokio::test]
    async fn test_per_claim_isolation() {
        let model = ScriptedModel::new()
            .reply_when("CLAIM ID: C1", r#"["no placebo arm"]"#)
            .fail_when("CLAIM ID: C2", ScriptedFailure::ServerError)
            .reply_when("CLAIM ID: C3", "[]");
        let (analyzer, model) = analyzer(model);
        let doc = document();

        let staged = analyzer
            .run(&doc, &claims(&doc), &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(
            staged.output.analysis,
            vec![
                GapEntry::new("C1", vec!["no placebo arm"]),
                GapEntry::new("C3", vec![]),
            ]
        );
        assert_eq!(staged.failures.len(), 1);
        assert_eq!(staged.failures[0].item_id, "C2");
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn test_prompt_includes_source_section() {
        let (analyzer, model) = analyzer(ScriptedModel::new().otherwise("[]"));
        let doc = document();

        analyzer
            .run(&doc, &claims(&doc), &RunOptions::default())
            .await
            .unwrap();

        let calls = model.calls();
        let prompt = &calls
            .iter()
            .find(|c| c.prompt.contains("CLAIM ID: C2"))
            .unwrap()
            .prompt;
        assert!(prompt.contains("CLAIM: Thirty patients are enough"));
        assert!(prompt.contains("SOURCE SECTION (S1)"));
        assert!(prompt.contains("without a placebo arm"));
    }

    #[tokio::test]
    async fn test_claims_from_another_document_are_rejected() {
        let (analyzer, model) = analyzer(ScriptedModel::new().otherwise("[]"));
        let other = Document::assemble("other", vec![SectionDraft::new(None, "only one")]);
        let doc = document();

        let err = analyzer
            .run(&other, &claims(&doc), &RunOptions::default())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, StageError::Integrity(IntegrityError::DanglingSection { .. })));
        assert_eq!(model.call_count(), 0);
    }
}
