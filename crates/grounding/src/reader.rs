use std::path::Path;
use tokio::fs;

use crate::error::GroundingError;

/// Reads text-bearing documents. Binary formats arrive here already
/// converted to text by an upstream extractor.
pub struct DocumentReader;

impl DocumentReader {
    pub async fn read_file(path: &Path) -> Result<Vec<u8>, GroundingError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match extension {
            "txt" | "md" => fs::read(path).await.map_err(|source| GroundingError::Read {
                path: path.display().to_string(),
                source,
            }),
            _ => Err(GroundingError::UnsupportedFormat {
                extension: extension.to_string(),
            }),
        }
    }
}
