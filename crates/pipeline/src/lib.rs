pub mod config;
pub mod error;
pub mod metrics;

use analysis::{GapAnalyzer, ValidationSynthesizer};
use extract::error::{PromptRenderError, StageError};
use extract::{
    ClaimExtractor, ItemFailure, ModelClient, PromptStore, PromptTemplates, RunOptions, Segmenter,
    Stage, ValidationReport,
};
use grounding::{Grounder, GrounderConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use config::{AppConfig, ConfigError, ProviderConfig};
pub use error::PipelineError;
pub use metrics::{MetricsSnapshot, PipelineMetrics, TimedOperation};

/// Runs a document through grounding, segmentation, claim extraction, gap
/// analysis and validation, in that order.
///
/// Every stage shares the same Model Client. Item-level failures inside a
/// stage are logged and counted; stage-level errors end the run.
pub struct Pipeline {
    client: Arc<dyn ModelClient>,
    grounder: Grounder,
    segmenter: Segmenter,
    extractor: ClaimExtractor,
    gap_analyzer: GapAnalyzer,
    synthesizer: ValidationSynthesizer,
    options: RunOptions,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    /// Templates are compiled once here; a broken template fails construction.
    pub fn new(
        client: Arc<dyn ModelClient>,
        templates: PromptTemplates,
        grounder_config: GrounderConfig,
        options: RunOptions,
    ) -> Result<Self, PromptRenderError> {
        let prompts = Arc::new(PromptStore::new(templates)?);

        Ok(Self {
            grounder: Grounder::new(grounder_config),
            segmenter: Segmenter::new(client.clone(), prompts.clone()),
            extractor: ClaimExtractor::new(client.clone(), prompts.clone()),
            gap_analyzer: GapAnalyzer::new(client.clone(), prompts.clone()),
            synthesizer: ValidationSynthesizer::new(client.clone(), prompts),
            client,
            options,
            metrics: PipelineMetrics::new(),
        })
    }

    pub fn from_config(config: &AppConfig, templates: PromptTemplates) -> anyhow::Result<Self> {
        let client = config.model.build()?;
        info!(provider = config.model.name(), mode = ?config.mode, "Building pipeline");
        Ok(Self::new(
            client,
            templates,
            config.grounder_config(),
            config.run_options(),
        )?)
    }

    pub fn client(&self) -> &Arc<dyn ModelClient> {
        &self.client
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Run with the configured limits and a fresh cancellation token.
    pub async fn run(&self, raw: &[u8], job_id: &str) -> Result<ValidationReport, PipelineError> {
        let options = RunOptions {
            cancel: CancellationToken::new(),
            ..self.options.clone()
        };
        self.run_with_options(raw, job_id, &options).await
    }

    /// Run under caller-supplied limits.
    ///
    /// Cancelling `options.cancel` before the validation stage ends the run
    /// with [`PipelineError::Cancelled`]; cancelling during validation
    /// returns the questions already produced.
    pub async fn run_with_options(
        &self,
        raw: &[u8],
        job_id: &str,
        options: &RunOptions,
    ) -> Result<ValidationReport, PipelineError> {
        self.metrics.record_run_started();
        let timer = TimedOperation::start();

        let outcome = self.execute(raw, job_id, options).await;

        match &outcome {
            Ok(report) => {
                info!(
                    job_id,
                    claims = report.report.len(),
                    questions = report.question_count(),
                    elapsed_ms = timer.elapsed().as_millis() as u64,
                    "Pipeline run complete"
                );
                self.metrics.record_run(true);
            }
            Err(e) => {
                error!(job_id, stage = %e.stage(), error = %e, "Pipeline run failed");
                self.metrics.record_run(false);
            }
        }
        outcome
    }

    async fn execute(
        &self,
        raw: &[u8],
        job_id: &str,
        options: &RunOptions,
    ) -> Result<ValidationReport, PipelineError> {
        ensure_active(Stage::Grounding, options)?;
        let timer = TimedOperation::start();
        let document = self.grounder.ground(raw, job_id)?;
        self.finish_stage(Stage::Grounding, &timer, &[]);

        ensure_active(Stage::Segmentation, options)?;
        let timer = TimedOperation::start();
        let rhetoric = self
            .segmenter
            .run(&document, options)
            .await
            .map_err(stage_error(Stage::Segmentation))?;
        self.finish_stage(Stage::Segmentation, &timer, &rhetoric.failures);
        ensure_active(Stage::Segmentation, options)?;

        let timer = TimedOperation::start();
        let claims = self
            .extractor
            .run(&document, &rhetoric.output, options)
            .await
            .map_err(stage_error(Stage::Extraction))?;
        self.finish_stage(Stage::Extraction, &timer, &claims.failures);
        self.metrics.record_claims(claims.output.len());
        ensure_active(Stage::Extraction, options)?;

        let timer = TimedOperation::start();
        let gaps = self
            .gap_analyzer
            .run(&document, &claims.output, options)
            .await
            .map_err(stage_error(Stage::GapAnalysis))?;
        self.finish_stage(Stage::GapAnalysis, &timer, &gaps.failures);
        ensure_active(Stage::GapAnalysis, options)?;

        let timer = TimedOperation::start();
        let validation = self
            .synthesizer
            .run(&gaps.output, options)
            .await
            .map_err(stage_error(Stage::Validation))?;
        self.finish_stage(Stage::Validation, &timer, &validation.failures);
        self.metrics
            .record_questions(validation.output.question_count());

        if options.cancel.is_cancelled() {
            warn!(job_id, "Run cancelled during validation, returning partial report");
        }

        Ok(validation.output)
    }

    fn finish_stage(&self, stage: Stage, timer: &TimedOperation, failures: &[ItemFailure]) {
        let elapsed = timer.elapsed();
        self.metrics.record_stage(stage, elapsed, failures.len());
        info!(
            stage = %stage,
            elapsed_ms = elapsed.as_millis() as u64,
            item_failures = failures.len(),
            "Stage finished"
        );
    }
}

fn ensure_active(stage: Stage, options: &RunOptions) -> Result<(), PipelineError> {
    if options.cancel.is_cancelled() {
        return Err(PipelineError::Cancelled { stage });
    }
    Ok(())
}

fn stage_error(stage: Stage) -> impl FnOnce(StageError) -> PipelineError {
    move |source| PipelineError::Stage { stage, source }
}
