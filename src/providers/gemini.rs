use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;
use crate::language_utils::get_language_name;
use crate::providers::Translator;

// @const: Start of one numbered entry in the model reply
static ENTRY_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\[(\d+)\]\s?(.*)$").unwrap());

/// Gemini client translating numbered subtitle lines
#[derive(Debug)]
pub struct GeminiTranslator {
    /// HTTP client for API requests
    client: Client,
    api_key: String,
    /// API base URL, e.g. https://generativelanguage.googleapis.com/v1beta
    endpoint: String,
    model: String,
    temperature: f32,
}

/// generateContent request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
}

/// generateContent response body
#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    content: Option<Content>,
}

impl GeminiTranslator {
    /// Create a new Gemini client
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for Gemini")?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            model: model.into(),
            temperature,
        })
    }

    /// Numbered prompt: one `[n] text` block per entry, continuation lines follow it
    pub fn build_prompt(texts: &[String], target_language: &str) -> String {
        let language = get_language_name(target_language).unwrap_or_else(|_| target_language.to_string());
        let mut prompt = format!(
            "Translate the following numbered subtitle texts to {}.\n\
             Reply with exactly {} numbered texts in the same [n] format and order.\n\
             Keep line breaks and formatting tags such as <i> and {{\\an8}} unchanged.\n\n",
            language,
            texts.len()
        );
        for (i, text) in texts.iter().enumerate() {
            prompt.push_str(&format!("[{}] {}\n", i + 1, text));
        }
        prompt
    }

    /// Parse the numbered reply; entries come back ordered by their number
    pub fn parse_numbered(reply: &str) -> Vec<String> {
        let mut entries: Vec<(usize, Vec<String>)> = Vec::new();
        for line in reply.lines() {
            if let Some(caps) = ENTRY_MARKER.captures(line) {
                let index = caps[1].parse::<usize>().unwrap_or(usize::MAX);
                entries.push((index, vec![caps[2].trim_end().to_string()]));
            } else if let Some((_, lines)) = entries.last_mut() {
                if !line.trim().is_empty() {
                    lines.push(line.trim_end().to_string());
                }
            }
        }
        entries.sort_by_key(|(index, _)| *index);
        entries.dedup_by_key(|(index, _)| *index);
        entries.into_iter().map(|(_, lines)| lines.join("\n")).collect()
    }

    async fn generate(&self, prompt: String) -> Result<String, ProviderError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        );
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig { temperature: self.temperature },
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("Gemini API error ({}): {}", status, error_text);
            return Err(ProviderError::from_status(status.as_u16(), error_text));
        }

        let body = response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let text: String = body
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .collect();
        if text.trim().is_empty() {
            return Err(ProviderError::ParseError("Gemini returned no text".to_string()));
        }
        Ok(text)
    }
}

#[async_trait]
impl Translator for GeminiTranslator {
    async fn translate(&self, texts: &[String], target_language: &str) -> Result<Vec<String>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let reply = self.generate(Self::build_prompt(texts, target_language)).await?;
        let translated = Self::parse_numbered(&reply);
        debug!("Gemini returned {} of {} texts", translated.len(), texts.len());
        Ok(translated)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
