use thiserror::Error;

/// Errors that end a run before any model call is made.
#[derive(Debug, Error)]
pub enum GroundingError {
    #[error("no extractable text in document for job {job_id}")]
    NoExtractableText { job_id: String },

    #[error("failed to read document {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported document format: {extension}")]
    UnsupportedFormat { extension: String },
}
