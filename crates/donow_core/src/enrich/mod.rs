//! AI enrichment of free-text item input.
//!
//! # Responsibility
//! - Define the provider contract for "text in, suggested metadata out".
//! - Bound provider calls in time and substitute a deterministic default
//!   on timeout or failure.
//!
//! # Invariants
//! - `Enricher::enhance` never fails and never blocks past its timeout.
//! - The fallback depends only on the input text.
//! - Input text is never logged; only lengths and outcome codes are.

pub mod http;

use crate::model::item::{ItemType, Priority};
use async_trait::async_trait;
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Maximum characters kept when deriving a title from raw text.
pub const FALLBACK_TITLE_MAX_CHARS: usize = 100;
/// Category assigned by the fallback.
pub const FALLBACK_CATEGORY: &str = "General";
/// Default time budget for one provider call.
pub const DEFAULT_ENRICHMENT_TIMEOUT: Duration = Duration::from_secs(10);

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// Input for one enrichment call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentRequest {
    pub text: String,
    pub kind: ItemType,
    /// Ask the provider to propose a title as well.
    pub generate_title: bool,
}

/// Where an enrichment result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentSource {
    Provider,
    Fallback,
}

/// Suggested metadata for one piece of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Enrichment {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Unix epoch milliseconds.
    pub suggested_date_time: Option<i64>,
    pub suggested_priority: Option<Priority>,
    pub suggested_category: Option<String>,
    pub suggested_tags: Vec<String>,
    pub source: EnrichmentSource,
}

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("enrichment request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("enrichment provider returned status {0}")]
    Status(u16),
    #[error("enrichment provider returned no content")]
    EmptyResponse,
    #[error("unparseable enrichment reply: {0}")]
    Parse(String),
}

/// External text-processing provider.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    async fn enhance(&self, request: &EnrichmentRequest) -> Result<Enrichment, EnrichmentError>;
}

/// Time-bounded enrichment with deterministic fallback.
#[derive(Clone)]
pub struct Enricher {
    provider: Option<Arc<dyn EnrichmentProvider>>,
    timeout: Duration,
}

impl Enricher {
    pub fn new(provider: Arc<dyn EnrichmentProvider>, timeout: Duration) -> Self {
        Self {
            provider: Some(provider),
            timeout,
        }
    }

    /// Enricher that always answers with the fallback.
    pub fn fallback_only() -> Self {
        Self {
            provider: None,
            timeout: DEFAULT_ENRICHMENT_TIMEOUT,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Enriches `text`, falling back on timeout, provider error, or when no
    /// provider is configured.
    pub async fn enhance(&self, text: &str, kind: ItemType) -> Enrichment {
        let Some(provider) = self.provider.as_ref() else {
            return fallback_enrichment(text);
        };

        let request = EnrichmentRequest {
            text: text.to_string(),
            kind,
            generate_title: true,
        };
        let started_at = Instant::now();
        match tokio::time::timeout(self.timeout, provider.enhance(&request)).await {
            Ok(Ok(enrichment)) => {
                info!(
                    "event=enrich module=enrich status=ok kind={kind} input_chars={} duration_ms={}",
                    text.chars().count(),
                    started_at.elapsed().as_millis()
                );
                enrichment
            }
            Ok(Err(err)) => {
                warn!(
                    "event=enrich module=enrich status=error kind={kind} error_code=provider_failed duration_ms={} error={err}",
                    started_at.elapsed().as_millis()
                );
                fallback_enrichment(text)
            }
            Err(_) => {
                warn!(
                    "event=enrich module=enrich status=error kind={kind} error_code=timeout timeout_ms={}",
                    self.timeout.as_millis()
                );
                fallback_enrichment(text)
            }
        }
    }
}

/// Deterministic default: truncated text as title, original text as
/// description, medium priority, general category.
pub fn fallback_enrichment(text: &str) -> Enrichment {
    let title = derive_title(text);
    Enrichment {
        title,
        description: Some(text.to_string()).filter(|value| !value.trim().is_empty()),
        suggested_date_time: None,
        suggested_priority: Some(Priority::Medium),
        suggested_category: Some(FALLBACK_CATEGORY.to_string()),
        suggested_tags: Vec::new(),
        source: EnrichmentSource::Fallback,
    }
}

/// Collapses whitespace and keeps at most `FALLBACK_TITLE_MAX_CHARS` chars.
pub fn derive_title(text: &str) -> Option<String> {
    let collapsed = WHITESPACE_RE.replace_all(text.trim(), " ");
    let title: String = collapsed.chars().take(FALLBACK_TITLE_MAX_CHARS).collect();
    let title = title.trim_end().to_string();
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}
