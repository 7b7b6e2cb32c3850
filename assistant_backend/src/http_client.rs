use std::time::Duration;

use anyhow::{Context, Result};

/// Timeout applied to skill calls against third-party APIs.
pub const SKILL_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout applied to a single chat-completions round trip.
pub const LLM_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    let allow_system_proxy = std::env::var("ASSISTANT_ENABLE_SYSTEM_PROXY")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if allow_system_proxy {
        match attempt_build(timeout, false) {
            Ok(client) => return Ok(client),
            Err(error) => tracing::warn!(
                "HTTP client initialization with system proxy discovery failed ({}); retrying with no_proxy",
                error
            ),
        }
    }

    attempt_build(timeout, true).context("Failed to initialize HTTP client")
}

fn attempt_build(timeout: Duration, no_proxy: bool) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("assistant/", env!("CARGO_PKG_VERSION")));
    if no_proxy {
        builder = builder.no_proxy();
    }
    builder.build()
}
