//! Chat-completion client for the comparison prompt.
//!
//! [`ChatModel`] is the seam the orchestrator calls through; the production
//! implementation [`OpenAiChatModel`] talks to any OpenAI-compatible
//! `POST {base_url}/chat/completions` endpoint:
//!
//! ```text
//! → { model, messages: [{role, content}], temperature, max_tokens }
//! ← { choices: [{ message: { content } }] }
//! ```
//!
//! One request per call, bounded by `llm.timeout_secs`. There is no retry:
//! a failed call is reported to the caller, which falls back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{Result, ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A language model that answers a chat transcript with one text reply.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Return the assistant's reply content.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// OpenAI-compatible chat-completions client.
pub struct OpenAiChatModel {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
}

impl std::fmt::Debug for OpenAiChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChatModel")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl OpenAiChatModel {
    /// Build a client, reading the API key from the env var named by `llm.api_key_env`.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Configuration`] if the model is disabled, unnamed, or
    /// the key variable is unset.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            ServiceError::configuration(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        if !config.enabled {
            return Err(ServiceError::configuration("llm is disabled"));
        }
        let model = config
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| ServiceError::configuration("llm.model is not set"))?;
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ServiceError::configuration("llm API key is empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::configuration(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model,
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn request_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        debug!(model = %self.model, messages = messages.len(), "calling chat model");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(messages))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ServiceError::transport(format!(
                "model API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::parse(format!("model reply is not JSON: {}", e)))?;
        parse_chat_response(&json)
    }
}

/// Pull `choices[0].message.content` out of a chat-completions reply.
pub fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| ServiceError::parse("invalid model response: missing choices[0].message.content"))
}

/// Build the configured model as a shareable trait object.
pub fn create_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>> {
    Ok(Arc::new(OpenAiChatModel::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};

    fn enabled_config(base_url: &str) -> LlmConfig {
        LlmConfig {
            base_url: base_url.to_string(),
            model: Some("gpt-4o-mini".to_string()),
            api_key_env: "ESSAY_REVIEW_TEST_UNSET_KEY".to_string(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn missing_key_is_configuration_error() {
        let err = OpenAiChatModel::new(&enabled_config("http://localhost")).unwrap_err();
        assert!(matches!(err, ServiceError::Configuration(_)));
        assert!(err.to_string().contains("ESSAY_REVIEW_TEST_UNSET_KEY"));
    }

    #[test]
    fn disabled_or_unnamed_model_is_configuration_error() {
        let mut cfg = enabled_config("http://localhost");
        cfg.enabled = false;
        assert!(matches!(
            OpenAiChatModel::with_api_key(&cfg, "k").unwrap_err(),
            ServiceError::Configuration(_)
        ));

        let mut cfg = enabled_config("http://localhost");
        cfg.model = None;
        assert!(matches!(
            OpenAiChatModel::with_api_key(&cfg, "k").unwrap_err(),
            ServiceError::Configuration(_)
        ));
    }

    #[test]
    fn request_body_carries_settings() {
        let model = OpenAiChatModel::with_api_key(&enabled_config("http://x/v1/"), "k").unwrap();
        assert_eq!(model.endpoint, "http://x/v1/chat/completions");
        let body = model.request_body(&[ChatMessage::system("s"), ChatMessage::user("u")]);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "u");
        assert_eq!(body["max_tokens"], 4000);
        assert!(format!("{:?}", model).contains("<redacted>"));
    }

    #[test]
    fn parses_reply_content() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"changes\":[]}" } }]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "{\"changes\":[]}");

        let err = parse_chat_response(&serde_json::json!({ "choices": [] })).unwrap_err();
        assert!(matches!(err, ServiceError::Parse(_)));
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    #[tokio::test]
    async fn completes_against_compatible_endpoint() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<serde_json::Value>| async move {
                let echoed = body["messages"][1]["content"].as_str().unwrap_or("").to_string();
                Json(serde_json::json!({
                    "choices": [{ "message": { "content": echoed } }]
                }))
            }),
        );
        let base = serve(router).await;
        let model = OpenAiChatModel::with_api_key(&enabled_config(&base), "k").unwrap();
        let reply = model
            .complete(&[ChatMessage::system("s"), ChatMessage::user("hello")])
            .await
            .unwrap();
        assert_eq!(reply, "hello");
    }

    #[tokio::test]
    async fn non_success_status_is_transport_error() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (axum::http::StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let base = serve(router).await;
        let model = OpenAiChatModel::with_api_key(&enabled_config(&base), "k").unwrap();
        let err = model.complete(&[ChatMessage::user("x")]).await.unwrap_err();
        assert!(matches!(err, ServiceError::Transport(_)));
        assert!(err.to_string().contains("429"));
    }
}
