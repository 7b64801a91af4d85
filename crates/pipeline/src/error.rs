use extract::Stage;
use extract::error::StageError;
use grounding::GroundingError;
use thiserror::Error;

/// A fatal run error. Item-level failures never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Grounding(#[from] GroundingError),

    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: StageError,
    },

    #[error("Run cancelled during {stage}")]
    Cancelled { stage: Stage },
}

impl PipelineError {
    /// The stage the run stopped in.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Grounding(_) => Stage::Grounding,
            PipelineError::Stage { stage, .. } | PipelineError::Cancelled { stage } => *stage,
        }
    }
}
