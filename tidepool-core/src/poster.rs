//! Best-effort poster image lookup.
//!
//! After an acquisition completes, the item's display name is cleaned of
//! release-name noise and looked up against the OMDb API. Failures are
//! logged and ignored upstream; an item without a poster is still fully
//! streamable.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

/// Matches a title followed by a year or season marker, the point where
/// release names stop carrying the actual title.
static TITLE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.+)(\.\d{4}|\.S\d{2})").expect("valid title regex"));

/// Errors surfaced by poster lookups.
#[derive(Debug, thiserror::Error)]
pub enum PosterError {
    #[error("Poster lookup failed: {reason}")]
    LookupFailed { reason: String },
}

/// Poster image resolver for a media display name.
#[async_trait]
pub trait PosterProvider: Send + Sync {
    /// Resolves a poster image URL for the given display name.
    ///
    /// Returns `Ok(None)` when the catalog knows the title but has no
    /// poster for it.
    async fn poster_url(&self, name: &str) -> Result<Option<String>, PosterError>;
}

/// Subset of the OMDb response the lookup cares about.
#[derive(Debug, Deserialize)]
struct OmdbResponse {
    #[serde(rename = "Poster")]
    poster: Option<String>,
    #[serde(rename = "Response")]
    response: Option<String>,
    #[serde(rename = "Error")]
    error: Option<String>,
}

/// Poster provider backed by the OMDb HTTP API.
pub struct OmdbPosterProvider {
    client: reqwest::Client,
    api_key: String,
}

impl OmdbPosterProvider {
    /// Creates a provider with an explicit API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    /// Creates a provider reading the key from `OMDB_API_KEY`.
    pub fn from_env() -> Option<Self> {
        std::env::var("OMDB_API_KEY").ok().map(Self::new)
    }
}

#[async_trait]
impl PosterProvider for OmdbPosterProvider {
    async fn poster_url(&self, name: &str) -> Result<Option<String>, PosterError> {
        let title = clean_title(name);
        let url = format!(
            "http://www.omdbapi.com/?apikey={}&t={}",
            self.api_key,
            urlencoding::encode(&title)
        );

        let response =
            self.client
                .get(&url)
                .send()
                .await
                .map_err(|error| PosterError::LookupFailed {
                    reason: format!("HTTP request failed: {error}"),
                })?;

        let omdb: OmdbResponse =
            response
                .json()
                .await
                .map_err(|error| PosterError::LookupFailed {
                    reason: format!("JSON parsing failed: {error}"),
                })?;

        if omdb.response.as_deref() == Some("False") {
            return Err(PosterError::LookupFailed {
                reason: omdb.error.unwrap_or_else(|| "title not found".to_string()),
            });
        }

        Ok(omdb.poster.filter(|poster| poster != "N/A"))
    }
}

/// Strips release-name noise from a display name.
///
/// Cuts everything from the first year or season marker and turns dot
/// separators back into spaces; names without such a marker pass through
/// unchanged.
pub fn clean_title(name: &str) -> String {
    match TITLE_SUFFIX.captures(name) {
        Some(captures) => captures[1].replace('.', " "),
        None => name.to_string(),
    }
}

/// Fixed-result provider for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticPosterProvider {
    url: Option<String>,
}

impl StaticPosterProvider {
    /// Always resolves to the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
        }
    }

    /// Always resolves to no poster.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PosterProvider for StaticPosterProvider {
    async fn poster_url(&self, _name: &str) -> Result<Option<String>, PosterError> {
        Ok(self.url.clone())
    }
}
