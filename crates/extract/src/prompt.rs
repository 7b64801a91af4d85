use anyhow::{Context, Result};
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use std::path::Path;

use crate::error::PromptRenderError;

/// One template per model-assisted stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Segmentation,
    Extraction,
    GapAnalysis,
    Validation,
}

impl PromptKind {
    pub const ALL: [PromptKind; 4] = [
        PromptKind::Segmentation,
        PromptKind::Extraction,
        PromptKind::GapAnalysis,
        PromptKind::Validation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PromptKind::Segmentation => "segmentation",
            PromptKind::Extraction => "extraction",
            PromptKind::GapAnalysis => "gap_analysis",
            PromptKind::Validation => "validation",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.txt", self.name())
    }
}

/// Already-loaded template sources.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    pub segmentation: String,
    pub extraction: String,
    pub gap_analysis: String,
    pub validation: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            segmentation: include_str!("../prompts/segmentation.txt").to_string(),
            extraction: include_str!("../prompts/extraction.txt").to_string(),
            gap_analysis: include_str!("../prompts/gap_analysis.txt").to_string(),
            validation: include_str!("../prompts/validation.txt").to_string(),
        }
    }
}

impl PromptTemplates {
    pub fn get(&self, kind: PromptKind) -> &str {
        match kind {
            PromptKind::Segmentation => &self.segmentation,
            PromptKind::Extraction => &self.extraction,
            PromptKind::GapAnalysis => &self.gap_analysis,
            PromptKind::Validation => &self.validation,
        }
    }

    pub fn set(&mut self, kind: PromptKind, source: String) {
        match kind {
            PromptKind::Segmentation => self.segmentation = source,
            PromptKind::Extraction => self.extraction = source,
            PromptKind::GapAnalysis => self.gap_analysis = source,
            PromptKind::Validation => self.validation = source,
        }
    }

    /// Load `<kind>.txt` overrides from `dir`; kinds without a file keep
    /// the built-in template.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut templates = Self::default();
        for kind in PromptKind::ALL {
            let path = dir.join(kind.file_name());
            if path.is_file() {
                let source = std::fs::read_to_string(&path)
                    .context(format!("Failed to read prompt template: {:?}", path))?;
                templates.set(kind, source);
            }
        }
        Ok(templates)
    }
}

/// Compiled templates, rendered once per model call.
pub struct PromptStore {
    env: Environment<'static>,
}

impl PromptStore {
    pub fn new(templates: PromptTemplates) -> Result<Self, PromptRenderError> {
        let mut env = Environment::new();
        // A variable the caller forgot is a programming error, not an empty string
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_trim_blocks(true);

        for kind in PromptKind::ALL {
            env.add_template_owned(kind.name(), templates.get(kind).to_string())
                .map_err(|source| PromptRenderError::Syntax {
                    name: kind.name(),
                    source,
                })?;
        }

        Ok(Self { env })
    }

    pub fn render<S: Serialize>(&self, kind: PromptKind, context: S) -> Result<String, PromptRenderError> {
        let render_error = |source| PromptRenderError::Render {
            name: kind.name(),
            source,
        };

        self.env
            .get_template(kind.name())
            .map_err(render_error)?
            .render(context)
            .map_err(render_error)
    }
}
