use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::errors::ProviderError;
use crate::providers::{SourceCandidate, SourceProvider, SourceQuery};

/// OpenSubtitles v3 catalog client
#[derive(Debug)]
pub struct OpenSubtitlesSource {
    client: Client,
    endpoint: String,
}

/// Catalog response
#[derive(Debug, Deserialize)]
struct SubtitleListing {
    #[serde(default)]
    subtitles: Vec<ListedSubtitle>,
}

#[derive(Debug, Deserialize)]
struct ListedSubtitle {
    #[serde(default)]
    id: String,
    url: String,
    #[serde(default)]
    lang: String,
}

impl OpenSubtitlesSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for OpenSubtitles")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// `{endpoint}/subtitles/{type}/{id}[:{season}:{episode}].json`
    pub fn listing_url(&self, query: &SourceQuery) -> Result<Url, ProviderError> {
        let resource = match (query.season, query.episode) {
            (Some(season), Some(episode)) => format!("{}:{}:{}", query.content_id, season, episode),
            _ => query.content_id.clone(),
        };
        let raw = format!(
            "{}/subtitles/{}/{}.json",
            self.endpoint.trim_end_matches('/'),
            query.content_type,
            resource
        );
        Url::parse(&raw).map_err(|e| ProviderError::RequestFailed(format!("Invalid listing URL {}: {}", raw, e)))
    }
}

#[async_trait]
impl SourceProvider for OpenSubtitlesSource {
    async fn search(&self, query: &SourceQuery) -> Result<Vec<SourceCandidate>, ProviderError> {
        let url = self.listing_url(query)?;
        debug!("Searching subtitles at {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("OpenSubtitles error ({}): {}", status, error_text);
            return Err(ProviderError::from_status(status.as_u16(), error_text));
        }

        let listing = response
            .json::<SubtitleListing>()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        Ok(listing
            .subtitles
            .into_iter()
            .map(|s| SourceCandidate {
                id: s.id,
                url: s.url,
                language: s.lang,
            })
            .collect())
    }

    async fn download(&self, candidate: &SourceCandidate) -> Result<Bytes, ProviderError> {
        let response = self.client.get(&candidate.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(
                status.as_u16(),
                format!("Download of subtitle {} failed", candidate.id),
            ));
        }
        Ok(response.bytes().await?)
    }
}
