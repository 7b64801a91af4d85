//! Error taxonomy for model-assisted stages.
//!
//! Item-level errors (`ModelCallError`, `ItemError`) are recovered inside a
//! stage: the item is excluded and recorded as a failure. Stage-level errors
//! (`StageError`) abort the run.

use std::time::Duration;
use thiserror::Error;

/// A single `invoke` against the model service failed.
#[derive(Debug, Error)]
pub enum ModelCallError {
    #[error("request to model service failed: {0}")]
    Network(#[source] reqwest::Error),

    #[error("no response within {after:?}")]
    Timeout { after: Duration },

    #[error("model service rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("model service rate limit exceeded")]
    RateLimited,

    #[error("model service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response envelope: {0}")]
    MalformedEnvelope(String),

    #[error("call cancelled")]
    Cancelled,
}

/// Why one item (a section, a claim, a gap entry) produced no output.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    ModelCall(#[from] ModelCallError),

    #[error("unparseable model output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("schema mismatch: {reason}")]
    Schema { reason: String },
}

impl ItemError {
    pub fn schema(reason: impl Into<String>) -> Self {
        ItemError::Schema {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PromptRenderError {
    #[error("template {name} failed to compile: {source}")]
    Syntax {
        name: &'static str,
        #[source]
        source: minijinja::Error,
    },

    #[error("template {name} failed to render: {source}")]
    Render {
        name: &'static str,
        #[source]
        source: minijinja::Error,
    },
}

/// A downstream identifier that does not resolve upstream.
#[derive(Debug, Error, PartialEq)]
pub enum IntegrityError {
    #[error("claim {claim_id} references unknown section {section_id}")]
    DanglingSection {
        claim_id: String,
        section_id: String,
    },

    #[error("duplicate claim id {claim_id}")]
    DuplicateClaim { claim_id: String },

    #[error("gap entry references unknown claim {claim_id}")]
    UnknownClaim { claim_id: String },
}

/// Fatal failure of a whole stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    PromptRender(#[from] PromptRenderError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}
