use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::errors::ProviderError;
use crate::providers::{SourceCandidate, SourceProvider, SourceQuery};

/// Source that always offers one SRT file from disk
///
/// Used by the CLI, where the user points at the subtitle file directly.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    language: String,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>, language: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            language: language.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SourceProvider for FileSource {
    async fn search(&self, _query: &SourceQuery) -> Result<Vec<SourceCandidate>, ProviderError> {
        if !self.path.is_file() {
            return Ok(Vec::new());
        }
        Ok(vec![SourceCandidate {
            id: self
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
            url: self.path.to_string_lossy().to_string(),
            language: self.language.clone(),
        }])
    }

    async fn download(&self, candidate: &SourceCandidate) -> Result<Bytes, ProviderError> {
        let data = tokio::fs::read(&candidate.url)
            .await
            .map_err(|e| ProviderError::RequestFailed(format!("Failed to read {}: {}", candidate.url, e)))?;
        Ok(Bytes::from(data))
    }
}
