//! HTTP enrichment provider for OpenAI-compatible chat-completion APIs.

use super::{Enrichment, EnrichmentError, EnrichmentProvider, EnrichmentRequest, EnrichmentSource};
use crate::model::item::{ItemType, Priority};
use crate::repo::item_repo::normalize_tags;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Default chat model name.
pub const DEFAULT_MODEL: &str = "qwen-plus";

const SUGGESTED_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Chat-completion backed provider.
pub struct HttpEnrichmentProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpEnrichmentProvider {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, EnrichmentError> {
        Ok(Self {
            client: Client::builder().build()?,
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[async_trait]
impl EnrichmentProvider for HttpEnrichmentProvider {
    async fn enhance(&self, request: &EnrichmentRequest) -> Result<Enrichment, EnrichmentError> {
        let body = ChatRequest {
            model: self.model.as_str(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt(request.kind).to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt(request),
                },
            ],
            temperature: 0.2,
        };

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = self.api_key.as_deref() {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EnrichmentError::Status(status.as_u16()));
        }

        let reply: ChatResponse = response.json().await?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(EnrichmentError::EmptyResponse)?;
        debug!(
            "event=enrich_reply module=enrich status=ok reply_chars={}",
            content.chars().count()
        );

        parse_enrichment_reply(&content)
    }
}

fn system_prompt(kind: ItemType) -> &'static str {
    match kind {
        ItemType::Event | ItemType::Note => {
            "You organize personal calendar entries. From the user's text, keep the original \
             meaning and return only a JSON object with the fields: \
             \"title\" (at most 20 words), \"enhancedDescription\", \
             \"suggestedDateTime\" (YYYY-MM-DD HH:MM:SS, absolute, or null), \
             \"suggestedCategory\" (work, meeting, life, leisure, ...), \
             \"suggestedTags\" (array of short strings). Use null for unknown fields."
        }
        ItemType::Task | ItemType::Project => {
            "You organize personal to-do lists. From the user's text, keep the original \
             meaning and return only a JSON object with the fields: \
             \"title\" (at most 20 words), \"enhancedDescription\", \
             \"suggestedDateTime\" (YYYY-MM-DD HH:MM:SS, absolute, or null), \
             \"suggestedPriority\" (Low, Medium, High or Critical). \
             Use null for unknown fields."
        }
    }
}

fn user_prompt(request: &EnrichmentRequest) -> String {
    let instruction = if request.generate_title {
        "Write a short title for the text below and tidy up its description."
    } else {
        "Tidy up the description below."
    };
    format!(
        "{instruction}\n\nText: {}\n\nExtract time, priority and other key details as JSON.",
        request.text
    )
}

/// Reply payload. Accepts both current and legacy field names.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyPayload {
    title: Option<String>,
    description: Option<String>,
    enhanced_description: Option<String>,
    priority: Option<String>,
    suggested_priority: Option<String>,
    suggested_date_time: Option<String>,
    due_date: Option<String>,
    event_time: Option<String>,
    category: Option<String>,
    suggested_category: Option<String>,
    tags: Option<Vec<String>>,
    suggested_tags: Option<Vec<String>>,
}

/// Parses a model reply that contains one JSON object, possibly wrapped in
/// surrounding prose or code fences.
pub fn parse_enrichment_reply(content: &str) -> Result<Enrichment, EnrichmentError> {
    let (start, end) = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if end > start => (start, end),
        _ => {
            return Err(EnrichmentError::Parse(
                "reply does not contain a JSON object".to_string(),
            ))
        }
    };
    let payload: ReplyPayload = serde_json::from_str(&content[start..=end])
        .map_err(|err| EnrichmentError::Parse(err.to_string()))?;

    let non_blank = |value: Option<String>| {
        value
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let suggested_date_time = payload
        .suggested_date_time
        .or(payload.due_date)
        .or(payload.event_time)
        .as_deref()
        .and_then(parse_suggested_date_time);
    let suggested_priority = payload
        .priority
        .or(payload.suggested_priority)
        .and_then(|value| value.parse::<Priority>().ok());
    let tags = payload.tags.or(payload.suggested_tags).unwrap_or_default();

    Ok(Enrichment {
        title: non_blank(payload.title),
        description: non_blank(payload.description.or(payload.enhanced_description)),
        suggested_date_time,
        suggested_priority,
        suggested_category: non_blank(payload.category.or(payload.suggested_category)),
        suggested_tags: normalize_tags(&tags),
        source: EnrichmentSource::Provider,
    })
}

/// Parses `YYYY-MM-DD HH:MM:SS` (UTC), RFC 3339, or a bare date.
pub fn parse_suggested_date_time(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, SUGGESTED_DATE_FORMAT) {
        return Some(naive.and_utc().timestamp_millis());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.timestamp_millis());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}
