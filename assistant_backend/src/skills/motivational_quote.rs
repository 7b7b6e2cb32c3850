use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{ParameterSchema, Skill, SkillArgs, SkillDescriptor};

pub const MOTIVATIONAL_QUOTE_SKILL_NAME: &str = "MotivationalQuote";

const QUOTE_QUERY: [(&str, &str); 4] = [
    ("method", "getQuote"),
    ("lang", "en"),
    ("format", "jsonp"),
    ("jsonp", "?"),
];

#[derive(Debug, Deserialize)]
struct QuotePayload {
    #[serde(rename = "quoteText")]
    quote_text: String,
    #[serde(rename = "quoteAuthor", default)]
    quote_author: String,
}

/// Fetches a quote from the Forismatic API and remembers the last one.
pub struct MotivationalQuoteSkill {
    descriptor: SkillDescriptor,
    api_url: String,
    client: Client,
    last_quote: Mutex<Option<String>>,
}

impl MotivationalQuoteSkill {
    pub fn new(api_url: impl Into<String>, client: Client) -> Self {
        Self {
            descriptor: SkillDescriptor::new(
                MOTIVATIONAL_QUOTE_SKILL_NAME,
                "Fetches a motivational quote from the Forismatic API, formats it, and returns the information.",
                ParameterSchema::object(),
            ),
            api_url: api_url.into(),
            client,
            last_quote: Mutex::new(None),
        }
    }

    pub fn last_quote(&self) -> String {
        self.last_quote
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| "No quote fetched yet".to_string())
    }

    async fn fetch_quote(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&QUOTE_QUERY)
            .send()
            .await
            .context("request to quote API failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("quote API returned {}", status);
        }

        let body = response
            .text()
            .await
            .context("failed to read quote API response")?;
        let payload: QuotePayload = serde_json::from_str(strip_jsonp(&body)?)
            .context("unexpected quote payload")?;

        let author = match payload.quote_author.trim() {
            "" => "Unknown",
            author => author,
        };
        Ok(format!(
            "Quote: {}\nAuthor: {}",
            payload.quote_text.trim(),
            author
        ))
    }
}

/// Unwrap a `?( ... )` JSONP response into its JSON body.
fn strip_jsonp(body: &str) -> Result<&str> {
    let body = body.trim();
    if body.starts_with('{') {
        return Ok(body);
    }
    match (body.find('('), body.rfind(')')) {
        (Some(start), Some(end)) if start < end => Ok(&body[start + 1..end]),
        _ => anyhow::bail!("response is not a JSONP payload"),
    }
}

#[async_trait]
impl Skill for MotivationalQuoteSkill {
    fn metadata(&self) -> &SkillDescriptor {
        &self.descriptor
    }

    async fn perform(&self, _args: &SkillArgs) -> String {
        match self.fetch_quote().await {
            Ok(quote) => {
                *self
                    .last_quote
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(quote.clone());
                quote
            }
            Err(e) => {
                tracing::warn!("Quote fetch failed: {:#}", e);
                format!("Error fetching or processing the quote: {:#}", e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{build_http_client, SKILL_REQUEST_TIMEOUT};
    use crate::test_support::spawn_mock_server;
    use axum::extract::Query;
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;

    fn skill(base_url: &str) -> MotivationalQuoteSkill {
        MotivationalQuoteSkill::new(
            format!("{}/api/1.0/", base_url),
            build_http_client(SKILL_REQUEST_TIMEOUT).unwrap(),
        )
    }

    #[test]
    fn strip_jsonp_handles_wrapped_and_plain_bodies() {
        assert_eq!(strip_jsonp("?({\"a\":1})").unwrap(), "{\"a\":1}");
        assert_eq!(strip_jsonp(" {\"a\":1} ").unwrap(), "{\"a\":1}");
        assert!(strip_jsonp("garbage").is_err());
    }

    #[tokio::test]
    async fn formats_quote_and_caches_it() {
        let router = Router::new().route(
            "/api/1.0/",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params.get("method").map(String::as_str), Some("getQuote"));
                assert_eq!(params.get("format").map(String::as_str), Some("jsonp"));
                "?({\"quoteText\":\"Keep going. \",\"quoteAuthor\":\"\",\"senderName\":\"\"})"
            }),
        );
        let base = spawn_mock_server(router).await;
        let skill = skill(&base);

        assert_eq!(skill.last_quote(), "No quote fetched yet");
        let quote = skill.perform(&SkillArgs::new()).await;
        assert_eq!(quote, "Quote: Keep going.\nAuthor: Unknown");
        assert_eq!(skill.last_quote(), quote);
    }

    #[tokio::test]
    async fn malformed_payload_becomes_error_string() {
        let router = Router::new().route("/api/1.0/", get(|| async { "?({\"unexpected\": true})" }));
        let base = spawn_mock_server(router).await;
        let skill = skill(&base);

        let reply = skill.perform(&SkillArgs::new()).await;
        assert!(
            reply.starts_with("Error fetching or processing the quote:"),
            "{}",
            reply
        );
        assert_eq!(skill.last_quote(), "No quote fetched yet");
    }

    #[tokio::test]
    async fn unreachable_api_becomes_error_string() {
        let skill = MotivationalQuoteSkill::new(
            "http://127.0.0.1:9/",
            build_http_client(SKILL_REQUEST_TIMEOUT).unwrap(),
        );
        let reply = skill.perform(&SkillArgs::new()).await;
        assert!(reply.starts_with("Error fetching or processing the quote:"));
    }
}
