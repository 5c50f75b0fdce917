//! Google Gemini `generateContent` adapter

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{Completion, CompletionProvider, ProviderError};
use crate::prompts::SYSTEM_PREAMBLE;
use crate::session::{Role, Turn};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "usageMetadata")]
    usage: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    preamble: String,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: API_BASE.into(),
            preamble: SYSTEM_PREAMBLE.into(),
        }
    }

    /// Point at a different endpoint (tests, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Replace the instructions prefixed to the first user turn
    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = preamble.into();
        self
    }

    fn build_request<'a>(&self, turns: &'a [Turn]) -> GenerateRequest<'a> {
        let contents = turns
            .iter()
            .enumerate()
            .map(|(i, turn)| {
                let text = if i == 0 && turn.role() == Role::User {
                    format!("{}{}", self.preamble, turn.content())
                } else {
                    turn.content().to_string()
                };
                Content {
                    role: match turn.role() {
                        Role::User => "user",
                        Role::Assistant => "model",
                    },
                    parts: vec![Part { text }],
                }
            })
            .collect();
        GenerateRequest { contents }
    }
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, turns: &[Turn]) -> Result<Completion, ProviderError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!("Gemini request: {} turns to {}", turns.len(), self.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.build_request(turns))
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ProviderError::from_reqwest(&e))?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::permanent(format!("failed to parse Gemini response: {}", e)))?;

        let usage = parsed.usage.unwrap_or_default();
        info!(
            "Gemini tokens: prompt={}, response={}, total={}",
            usage.prompt_token_count, usage.candidates_token_count, usage.total_token_count
        );

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .map(|p| p.text);

        Ok(match text {
            Some(text) => Completion::Text(text),
            None => Completion::Empty,
        })
    }
}
