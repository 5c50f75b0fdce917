//! OpenRouter adapter (OpenAI-compatible chat completions)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{Completion, CompletionProvider, ProviderError};
use crate::session::Turn;

const API_BASE: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "mistralai/mistral-7b-instruct:free";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenRouterProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl std::fmt::Debug for OpenRouterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterProvider")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenRouterProvider {
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
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl CompletionProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn complete(&self, turns: &[Turn]) -> Result<Completion, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: turns
                .iter()
                .map(|t| ChatMessage {
                    role: t.role().as_str(),
                    content: t.content(),
                })
                .collect(),
        };
        debug!("OpenRouter request: {} turns to {}", turns.len(), self.model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ProviderError::from_reqwest(&e))?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::permanent(format!("failed to parse OpenRouter response: {}", e)))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(Completion::Text)
            .unwrap_or(Completion::Empty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenRouterProvider {
        OpenRouterProvider::new("or-key", DEFAULT_MODEL, Duration::from_secs(5)).with_base_url(server.uri())
    }

    #[tokio::test]
    async fn test_sends_window_with_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer or-key"))
            .and(body_partial_json(serde_json::json!({
                "model": DEFAULT_MODEL,
                "messages": [
                    {"role": "user", "content": "pitch me"},
                    {"role": "assistant", "content": "sure"}
                ]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"choices": [{"message": {"role": "assistant", "content": "A pitch"}}]}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let turns = [Turn::user("pitch me"), Turn::assistant("sure")];
        let result = provider(&server).complete(&turns).await.unwrap();
        assert_eq!(result, Completion::Text("A pitch".into()));
    }

    #[tokio::test]
    async fn test_no_choices_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"choices": []}"#))
            .mount(&server)
            .await;

        let result = provider(&server).complete(&[Turn::user("x")]).await.unwrap();
        assert_eq!(result, Completion::Empty);
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string(r#"{"error": {"message": "Rate limit exceeded"}}"#))
            .mount(&server)
            .await;

        let err = provider(&server).complete(&[Turn::user("x")]).await.unwrap_err();
        assert!(err.is_retriable());
    }
}
