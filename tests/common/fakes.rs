/*!
 * Fake collaborators for controller and pipeline tests
 */

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use subrelay::errors::ProviderError;
use subrelay::providers::mock::MockTranslator;
use subrelay::providers::{SourceCandidate, SourceProvider, SourceQuery, Translator};

/// Source serving fixed subtitle texts for any query
#[derive(Debug, Default)]
pub struct StaticSource {
    subtitles: Vec<(SourceCandidate, String)>,
    searches: AtomicUsize,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subtitle(mut self, id: &str, language: &str, srt: impl Into<String>) -> Self {
        let candidate = SourceCandidate {
            id: id.to_string(),
            url: format!("memory://{}", id),
            language: language.to_string(),
        };
        self.subtitles.push((candidate, srt.into()));
        self
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceProvider for StaticSource {
    async fn search(&self, _query: &SourceQuery) -> Result<Vec<SourceCandidate>, ProviderError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(self.subtitles.iter().map(|(candidate, _)| candidate.clone()).collect())
    }

    async fn download(&self, candidate: &SourceCandidate) -> Result<Bytes, ProviderError> {
        self.subtitles
            .iter()
            .find(|(c, _)| c.id == candidate.id)
            .map(|(_, srt)| Bytes::from(srt.clone()))
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 404,
                message: format!("Unknown subtitle {}", candidate.id),
            })
    }
}

/// Translator that records every call and can stop working after a few
#[derive(Debug, Clone, Default)]
pub struct RecordingTranslator {
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    // @field: Calls after this many fail with an authentication error
    working_calls: Option<usize>,
}

impl RecordingTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop_after(calls: usize) -> Self {
        Self {
            working_calls: Some(calls),
            ..Self::default()
        }
    }

    /// Texts of every call, in call order
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn translated_texts(&self) -> usize {
        self.calls.lock().iter().map(|c| c.len()).sum()
    }
}

#[async_trait]
impl Translator for RecordingTranslator {
    async fn translate(&self, texts: &[String], target_language: &str) -> Result<Vec<String>, ProviderError> {
        let call = {
            let mut calls = self.calls.lock();
            calls.push(texts.to_vec());
            calls.len()
        };
        if self.working_calls.is_some_and(|limit| call > limit) {
            return Err(ProviderError::AuthenticationError("Key revoked".to_string()));
        }
        Ok(texts.iter().map(|t| MockTranslator::render(t, target_language)).collect())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
