use grounding::{Document, RhetoricalRole};
use minijinja::context;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::batch::{RunOptions, Staged, run_items};
use crate::error::{ItemError, StageError};
use crate::llm::ModelClient;
use crate::prompt::{PromptKind, PromptStore};
use crate::repair::repair;
use crate::schema::{RhetoricReport, RoleClassification, Stage};

const SYSTEM_INSTRUCTION: &str =
    "You classify the rhetorical role of sections of research papers. Respond with JSON only.";

/// Classifies each section against the fixed rhetorical taxonomy.
pub struct Segmenter {
    client: Arc<dyn ModelClient>,
    prompts: Arc<PromptStore>,
}

impl Segmenter {
    pub fn new(client: Arc<dyn ModelClient>, prompts: Arc<PromptStore>) -> Self {
        Self { client, prompts }
    }

    pub async fn run(
        &self,
        document: &Document,
        options: &RunOptions,
    ) -> Result<Staged<RhetoricReport>, StageError> {
        let taxonomy = RhetoricalRole::taxonomy_text();

        let mut items = Vec::with_capacity(document.sections().len());
        for section in document.sections() {
            let prompt = self.prompts.render(
                PromptKind::Segmentation,
                context! {
                    taxonomy => &taxonomy,
                    section_id => &section.id,
                    section_title => &section.title,
                    section_text => &section.text,
                },
            )?;
            items.push((section.id.clone(), prompt));
        }

        let client = self.client.as_ref();
        let staged = run_items(Stage::Segmentation, items, options, move |prompt| async move {
            let raw = options
                .invoke(client, &prompt, Some(SYSTEM_INSTRUCTION))
                .await?;
            parse_classification(&raw)
        })
        .await;

        let report = RhetoricReport {
            roles: staged.output.into_iter().collect(),
        };

        info!(
            stage = %Stage::Segmentation,
            job_id = document.id(),
            classified = report.len(),
            sections = document.sections().len(),
            "Classified sections"
        );

        Ok(Staged::new(report, staged.failures))
    }
}

/// Parse `{role, confidence}`; any extra keys (e.g. an echoed section id)
/// are ignored.
pub fn parse_classification(raw: &str) -> Result<RoleClassification, ItemError> {
    let mut value: Value = serde_json::from_str(&repair(raw))?;

    // Models capitalize role names freely
    if let Some(role) = value.get_mut("role") {
        if let Some(text) = role.as_str() {
            *role = Value::String(text.trim().to_lowercase());
        }
    }

    let classification: RoleClassification =
        serde_json::from_value(value).map_err(|e| ItemError::schema(e.to_string()))?;

    if !(0.0..=1.0).contains(&classification.confidence) {
        return Err(ItemError::schema(format!(
            "confidence {} outside [0, 1]",
            classification.confidence
        )));
    }

    Ok(classification)
}
