pub mod batch;
pub mod claims;
pub mod error;
pub mod llm;
pub mod prompt;
pub mod repair;
pub mod schema;
pub mod segmenter;
pub mod testing;

pub use batch::{ItemFailure, RunOptions, Staged, run_items};
pub use claims::ClaimExtractor;
pub use error::{IntegrityError, ItemError, ModelCallError, PromptRenderError, StageError};
pub use llm::{ModelClient, OllamaClient, OpenAiClient};
pub use prompt::{PromptKind, PromptStore, PromptTemplates};
pub use repair::repair;
pub use schema::{
    Claim, ClaimSet, ClaimValidation, GapAnalysis, GapEntry, RhetoricReport, RoleClassification,
    Stage, ValidationQuestion, ValidationReport,
};
pub use segmenter::Segmenter;
