/*!
 * Outbound service adapters.
 *
 * Two seams connect the pipeline to the outside world:
 * - `Translator`: turns a batch of texts into the target language
 * - `SourceProvider`: finds and downloads source subtitles for a title
 *
 * Implementations:
 * - `gemini`: Gemini generateContent API
 * - `opensubtitles`: OpenSubtitles v3 JSON catalog
 * - `local`: a single SRT file on disk
 * - `mock`: in-process translator with scripted failures
 */

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

use crate::app_config::{Config, TranslationProvider};
use crate::errors::ProviderError;

pub mod gemini;
pub mod local;
pub mod mock;
pub mod opensubtitles;

/// Batch translation backend
///
/// Implementations must be order-preserving and return exactly one output
/// per input. Lines inside one text are separated by `\n`.
#[async_trait]
pub trait Translator: Send + Sync + Debug {
    /// Translate `texts` into `target_language`
    async fn translate(&self, texts: &[String], target_language: &str) -> Result<Vec<String>, ProviderError>;

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// What the caller wants subtitles for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceQuery {
    // @field: "movie" or "series"
    pub content_type: String,
    pub content_id: String,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

/// One downloadable subtitle track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCandidate {
    pub id: String,
    pub url: String,
    // @field: Language code as reported by the source
    pub language: String,
}

/// Subtitle search backend; an empty search result is not an error
#[async_trait]
pub trait SourceProvider: Send + Sync + Debug {
    async fn search(&self, query: &SourceQuery) -> Result<Vec<SourceCandidate>, ProviderError>;

    async fn download(&self, candidate: &SourceCandidate) -> Result<Bytes, ProviderError>;
}

/// Build the translator selected in the configuration
pub fn create_translator(config: &Config) -> anyhow::Result<Arc<dyn Translator>> {
    let translation = &config.translation;
    let translator: Arc<dyn Translator> = match translation.provider {
        TranslationProvider::Gemini => Arc::new(gemini::GeminiTranslator::new(
            translation.get_api_key(),
            translation.get_endpoint(),
            translation.get_model(),
            translation.common.temperature,
            translation.get_timeout(),
        )?),
        TranslationProvider::Mock => Arc::new(mock::MockTranslator::from_config(&translation.mock)),
    };
    Ok(translator)
}
