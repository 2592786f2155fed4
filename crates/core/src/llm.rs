//! Chat model abstraction
//!
//! One trait seam over chat-completion providers. The production client
//! targets an OpenAI-compatible endpoint (Groq); the mock replays a
//! scripted sequence of replies and records every prompt it saw.

use crate::config::LlmConfig;
use crate::errors::{PipelineError, ProviderError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// A single chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Trait for chat completion.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one completion over the given turns and return the raw text.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> std::result::Result<String, ProviderError>;

    /// Model identifier
    fn model_name(&self) -> &str;
}

/// Groq chat-completions client (OpenAI-compatible API)
#[derive(Debug)]
pub struct GroqChat {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

impl GroqChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| PipelineError::configuration("GROQ_API_KEY not set"))?
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                PipelineError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl ChatModel for GroqChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> std::result::Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.api_base);
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("malformed chat response: {e}")))?;

        result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("no choices in chat response".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Scripted mock chat model for tests: pops one canned reply per call
/// and records the messages it was given.
pub struct MockChat {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockChat {
    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Message lists from every completion call, in order.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for MockChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _temperature: f32,
    ) -> std::result::Result<String, ProviderError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .ok_or_else(|| ProviderError::InvalidResponse("mock reply queue empty".to_string()))
    }

    fn model_name(&self) -> &str {
        "mock-chat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_chat_replays_script() {
        let chat = MockChat::scripted(["first reply", "second reply"]);
        let messages = vec![ChatMessage::user("hello")];

        assert_eq!(chat.complete(&messages, 0.7).await.unwrap(), "first reply");
        assert_eq!(chat.complete(&messages, 0.7).await.unwrap(), "second reply");
        assert!(chat.complete(&messages, 0.7).await.is_err());
        assert_eq!(chat.calls().len(), 3);
    }

    #[test]
    fn test_missing_api_key_is_configuration_error() {
        let config = LlmConfig::default();
        let err = GroqChat::new(&config).unwrap_err();
        assert_eq!(err.stage(), "configuration");
        assert!(err.to_string().contains("GROQ_API_KEY"));
    }

    #[test]
    fn test_chat_request_shape() {
        let messages = vec![ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let request = ChatRequest {
            model: "llama3-8b-8192",
            messages: &messages,
            temperature: 0.7,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "llama3-8b-8192");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
    }
}
