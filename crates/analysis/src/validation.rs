use extract::error::{ItemError, StageError};
use extract::{
    ClaimValidation, GapAnalysis, ModelClient, PromptKind, PromptStore, RunOptions, Stage, Staged,
    ValidationQuestion, ValidationReport, repair, run_items,
};
use minijinja::context;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::value_text;

const SYSTEM_INSTRUCTION: &str = "Generate constructive research questions.";

type QuestionShape = (&'static str, fn(&Value) -> Option<ValidationQuestion>);

/// Tolerated shapes of one list item, tried in order.
const QUESTION_SHAPES: [QuestionShape; 3] = [
    ("plain_string", plain_string),
    ("schema_object", schema_object),
    ("first_value", first_value),
];

/// Turns gap signals into validation questions, one call per claim that
/// has gaps.
pub struct ValidationSynthesizer {
    client: Arc<dyn ModelClient>,
    prompts: Arc<PromptStore>,
    schema: String,
}

impl ValidationSynthesizer {
    pub fn new(client: Arc<dyn ModelClient>, prompts: Arc<PromptStore>) -> Self {
        Self {
            client,
            prompts,
            schema: question_schema(),
        }
    }

    pub async fn run(
        &self,
        gaps: &GapAnalysis,
        options: &RunOptions,
    ) -> Result<Staged<ValidationReport>, StageError> {
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for entry in &gaps.analysis {
            if entry.signals.is_empty() {
                debug!(claim_id = %entry.claim_id, "No gap signals, skipping");
                continue;
            }
            if !seen.insert(entry.claim_id.as_str()) {
                warn!(claim_id = %entry.claim_id, "Duplicate gap entry ignored");
                continue;
            }

            let prompt = self.prompts.render(
                PromptKind::Validation,
                context! {
                    gaps_list => &entry.signals,
                    schema => &self.schema,
                },
            )?;
            items.push((entry.claim_id.clone(), prompt));
        }

        let client = self.client.as_ref();
        let staged = run_items(Stage::Validation, items, options, move |prompt| async move {
            let raw = options
                .invoke(client, &prompt, Some(SYSTEM_INSTRUCTION))
                .await?;
            parse_questions(&raw)
        })
        .await;

        let report = ValidationReport {
            report: staged
                .output
                .into_iter()
                .map(|(claim_id, questions)| ClaimValidation {
                    claim_id,
                    questions,
                })
                .collect(),
        };

        info!(
            stage = %Stage::Validation,
            claims = report.report.len(),
            questions = report.question_count(),
            failed = staged.failures.len(),
            "Synthesized validation questions"
        );

        Ok(Staged::new(report, staged.failures))
    }
}

/// Parse a list of questions. Items matching none of the tolerated shapes
/// are dropped; a list with no usable item is a schema failure.
pub fn parse_questions(raw: &str) -> Result<Vec<ValidationQuestion>, ItemError> {
    let value: Value = serde_json::from_str(&repair(raw))?;
    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(ItemError::schema(format!(
                "expected a list of questions, got {other}"
            )));
        }
    };

    let questions: Vec<ValidationQuestion> = items
        .iter()
        .filter_map(|item| {
            let parsed = QUESTION_SHAPES
                .iter()
                .find_map(|(shape, parse)| parse(item).map(|q| (*shape, q)));
            match parsed {
                Some((shape, question)) => {
                    debug!(shape, "Parsed validation question");
                    Some(question)
                }
                None => {
                    debug!(item = %item, "Dropping unusable question item");
                    None
                }
            }
        })
        .collect();

    if questions.is_empty() {
        return Err(ItemError::schema("no usable questions in response"));
    }
    Ok(questions)
}

fn plain_string(item: &Value) -> Option<ValidationQuestion> {
    item.as_str()
        .filter(|text| !text.trim().is_empty())
        .map(ValidationQuestion::new)
}

fn schema_object(item: &Value) -> Option<ValidationQuestion> {
    if !item.is_object() {
        return None;
    }
    serde_json::from_value::<ValidationQuestion>(item.clone())
        .ok()
        .filter(|q| !q.question.trim().is_empty())
}

fn first_value(item: &Value) -> Option<ValidationQuestion> {
    let text = item.as_object()?.values().next().and_then(value_text)?;
    (!text.trim().is_empty()).then(|| ValidationQuestion::new(text))
}

fn question_schema() -> String {
    let schema = schemars::schema_for!(ValidationQuestion);
    serde_json::to_string_pretty(&schema)
        .unwrap_or_else(|_| r#"{"type": "object", "properties": {"question": {"type": "string"}}, "required": ["question"]}"#.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::testing::{ScriptedFailure, ScriptedModel};
    use extract::{GapEntry, ModelCallError, PromptTemplates};

    fn synthesizer(model: ScriptedModel) -> (ValidationSynthesizer, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        let prompts = Arc::new(PromptStore::new(PromptTemplates::default()).unwrap());
        (ValidationSynthesizer::new(model.clone(), prompts), model)
    }

    fn texts(questions: &[ValidationQuestion]) -> Vec<&str> {
        questions.iter().map(|q| q.question.as_str()).collect()
    }

    #[test]
    fn test_plain_string_round_trip() {
        let questions = parse_questions(r#"["Is the sample size justified?"]"#).unwrap();
        assert_eq!(texts(&questions), vec!["Is the sample size justified?"]);
    }

    #[test]
    fn test_schema_object_shape() {
        let questions =
            parse_questions(r#"[{"question": "Was blinding used?", "rationale": "bias"}]"#).unwrap();
        assert_eq!(texts(&questions), vec!["Was blinding used?"]);
    }

    #[test]
    fn test_bracketed_prose_before_list() {
        let raw = "Based on gaps [1] and [2], here are the questions:\n[\"Was a control group used?\"]";
        let questions = parse_questions(raw).unwrap();
        assert_eq!(texts(&questions), vec!["Was a control group used?"]);
    }

    #[test]
    fn test_first_value_fallback() {
        let questions = parse_questions(r#"[{"q": "Does X generalize?"}]"#).unwrap();
        assert_eq!(texts(&questions), vec!["Does X generalize?"]);
    }

    #[test]
    fn test_first_value_follows_key_order() {
        let questions =
            parse_questions(r#"[{"zeta": "Is the effect dose dependent?", "alpha": "ignored"}]"#)
                .unwrap();
        assert_eq!(texts(&questions), vec!["Is the effect dose dependent?"]);
    }

    #[test]
    fn test_unusable_items_dropped_individually() {
        let raw = r#"```json
["Was a control group used?", {}, null, "", {"question": "  "}, {"text": "Is the result replicated?"}]
```"#;
        let questions = parse_questions(raw).unwrap();
        assert_eq!(
            texts(&questions),
            vec!["Was a control group used?", "Is the result replicated?"]
        );
    }

    #[test]
    fn test_non_list_or_empty_response_fails() {
        assert!(matches!(
            parse_questions(r#"{"question": "Is it?"}"#),
            Err(ItemError::Schema { .. })
        ));
        assert!(matches!(parse_questions("[]"), Err(ItemError::Schema { .. })));
        assert!(matches!(parse_questions("Sure! Here are"), Err(ItemError::Parse(_))));
    }

    #[test]
    fn test_schema_names_question_field() {
        let schema = question_schema();
        assert!(schema.contains("\"question\""));
        assert!(schema.contains("\"required\""));
    }

    #[tokio::test]
    async fn test_gapless_claim_is_skipped_without_a_call() {
        let model = ScriptedModel::new()
            .reply_when("no control group", r#"["Would a randomized control change the effect?"]"#);
        let (synthesizer, model) = synthesizer(model);
        let gaps = GapAnalysis::new(vec![
            GapEntry::new("C1", vec!["no control group"]),
            GapEntry::new("C2", vec![]),
        ]);

        let staged = synthesizer.run(&gaps, &RunOptions::default()).await.unwrap();

        assert_eq!(
            staged.output.report,
            vec![ClaimValidation {
                claim_id: "C1".to_string(),
                questions: vec![ValidationQuestion::new(
                    "Would a randomized control change the effect?"
                )],
            }]
        );
        assert!(staged.failures.is_empty());
        assert_eq!(model.call_count(), 1);
        assert_eq!(model.calls()[0].system.as_deref(), Some(SYSTEM_INSTRUCTION));
    }

    #[tokio::test]
    async fn test_partial_failures_leave_successes_in_order() {
        let model = ScriptedModel::new()
            .reply_when("gap one", r#"["Q1?"]"#)
            .fail_when("gap two", ScriptedFailure::ServerError)
            .reply_when("gap three", "I cannot help with that")
            .reply_when("gap four", r#"[{"question": "Q4?"}, "Q4b?"]"#)
            .reply_when("gap five", "[42]");
        let (synthesizer, model) = synthesizer(model);
        let gaps = GapAnalysis::new(vec![
            GapEntry::new("C1", vec!["gap one"]),
            GapEntry::new("C2", vec!["gap two"]),
            GapEntry::new("C3", vec!["gap three"]),
            GapEntry::new("C4", vec!["gap four"]),
            GapEntry::new("C5", vec!["gap five"]),
            GapEntry::new("C1", vec!["gap one again"]),
        ]);

        let staged = synthesizer.run(&gaps, &RunOptions::default()).await.unwrap();

        assert_eq!(staged.output.claim_ids(), vec!["C1", "C4"]);
        assert!(staged.output.report.iter().all(|v| !v.questions.is_empty()));
        assert_eq!(staged.output.question_count(), 3);
        let failed: Vec<&str> = staged.failures.iter().map(|f| f.item_id.as_str()).collect();
        assert_eq!(failed, vec!["C2", "C3", "C5"]);
        assert_eq!(model.call_count(), 5);
    }

    #[tokio::test]
    async fn test_report_only_names_input_claims() {
        let (synthesizer, _) = synthesizer(ScriptedModel::new().otherwise(r#"["Why?"]"#));
        let gaps = GapAnalysis::new(vec![
            GapEntry::new("A7", vec!["small sample"]),
            GapEntry::new("B2", vec!["no replication", "single site"]),
        ]);

        let staged = synthesizer.run(&gaps, &RunOptions::default()).await.unwrap();

        let inputs: Vec<&str> = gaps.analysis.iter().map(|e| e.claim_id.as_str()).collect();
        assert!(
            staged
                .output
                .claim_ids()
                .iter()
                .all(|id| inputs.contains(id))
        );
    }

    #[tokio::test]
    async fn test_prompt_lists_signals_and_schema() {
        let (synthesizer, model) = synthesizer(ScriptedModel::new().otherwise(r#"["Why?"]"#));
        let gaps = GapAnalysis::new(vec![GapEntry::new(
            "C1",
            vec!["no control group", "single site"],
        )]);

        synthesizer.run(&gaps, &RunOptions::default()).await.unwrap();

        let calls = model.calls();
        let prompt = &calls[0].prompt;
        assert!(prompt.contains("- no control group\n"));
        assert!(prompt.contains("- single site"));
        assert!(prompt.contains("\"question\""));
    }

    #[tokio::test]
    async fn test_cancelled_run_makes_no_calls() {
        let (synthesizer, model) = synthesizer(ScriptedModel::new().otherwise(r#"["Why?"]"#));
        let options = RunOptions::default();
        options.cancel.cancel();
        let gaps = GapAnalysis::new(vec![GapEntry::new("C1", vec!["small sample"])]);

        let staged = synthesizer.run(&gaps, &options).await.unwrap();

        assert!(staged.output.report.is_empty());
        assert!(matches!(
            staged.failures[0].error,
            ItemError::ModelCall(ModelCallError::Cancelled)
        ));
        assert_eq!(model.call_count(), 0);
    }
}
