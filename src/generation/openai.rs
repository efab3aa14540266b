//! # Chat Completions Generator
//!
//! [`ResponseGenerator`] for OpenAI and for Groq-hosted Llama, which speaks the same
//! `/chat/completions` wire format.
//!
//! ## Fallbacks:
//! - No choices, or only blank content, in the reply ⇒ [`NO_RESPONSE_FALLBACK`]
//! - Transport, HTTP status or parse failure ⇒ [`ERROR_FALLBACK`]
//!
//! The fallback response carries `"fallback": true` in its metadata.

use crate::pipeline::{ConversationContext, GeneratedResponse, RenderedMessage, ResponseGenerator};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const NO_RESPONSE_FALLBACK: &str = "I'm sorry, I couldn't generate a response.";
pub const ERROR_FALLBACK: &str = "I'm sorry, there was an error processing your request.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatProvider {
    OpenAi,
    Groq,
}

impl ChatProvider {
    pub fn name(&self) -> &'static str {
        match self {
            ChatProvider::OpenAi => "openai",
            ChatProvider::Groq => "llama",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ChatProvider::OpenAi => "gpt-4o",
            ChatProvider::Groq => "meta-llama/llama-4-scout-17b-16e-instruct",
        }
    }

    pub fn default_api_base(&self) -> &'static str {
        match self {
            ChatProvider::OpenAi => "https://api.openai.com/v1",
            ChatProvider::Groq => "https://api.groq.com/openai/v1",
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [RenderedMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<UsageInfo>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<CompletionMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct UsageInfo {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

pub struct ChatCompletionsGenerator {
    provider: ChatProvider,
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl ChatCompletionsGenerator {
    /// Empty `model` or `api_base` select the provider defaults.
    pub fn new(provider: ChatProvider, api_key: &str, model: &str, api_base: &str, max_tokens: u32) -> Result<Self> {
        if api_key.is_empty() {
            return Err(anyhow!("{} generator requires an API key", provider.name()));
        }
        let model = if model.is_empty() { provider.default_model() } else { model };
        let api_base = if api_base.is_empty() { provider.default_api_base() } else { api_base };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            provider,
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens,
        })
    }

    async fn request(&self, context: &ConversationContext, temperature: f32) -> Result<ChatCompletionResponse> {
        let messages = context.render(true);
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: &messages,
            temperature,
            max_tokens: self.max_tokens,
        };

        let url = format!("{}/chat/completions", self.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("chat completion API error {}: {}", status, body_text));
        }

        response.json().await.context("invalid chat completion response")
    }

    fn interpret(&self, parsed: ChatCompletionResponse) -> GeneratedResponse {
        let model = parsed.model.unwrap_or_else(|| self.model.clone());
        let usage = parsed
            .usage
            .and_then(|u| serde_json::to_value(u).ok())
            .unwrap_or(serde_json::Value::Null);

        let first = parsed.choices.into_iter().next();
        let finish_reason = first.as_ref().and_then(|c| c.finish_reason.clone());
        let text = first
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|t| !t.trim().is_empty());

        let response = match text {
            Some(text) => GeneratedResponse::new(text.trim()).with_metadata("fallback", false),
            None => {
                tracing::error!(provider = self.provider.name(), "empty response from chat completion API");
                GeneratedResponse::new(NO_RESPONSE_FALLBACK).with_metadata("fallback", true)
            }
        };

        response
            .with_metadata("provider", self.provider.name())
            .with_metadata("model", model)
            .with_metadata("finish_reason", finish_reason)
            .with_metadata("usage", usage)
    }
}

#[async_trait]
impl ResponseGenerator for ChatCompletionsGenerator {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn generate(&self, context: &ConversationContext, temperature: f32) -> GeneratedResponse {
        match self.request(context, temperature).await {
            Ok(parsed) => self.interpret(parsed),
            Err(err) => {
                tracing::error!(provider = self.provider.name(), "Error getting LLM response: {:#}", err);
                GeneratedResponse::new(ERROR_FALLBACK)
                    .with_metadata("provider", self.provider.name())
                    .with_metadata("model", self.model.clone())
                    .with_metadata("fallback", true)
                    .with_metadata("error", format!("{:#}", err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::Role;

    fn generator(provider: ChatProvider, api_base: &str) -> ChatCompletionsGenerator {
        ChatCompletionsGenerator::new(provider, "test-key", "", api_base, 300).unwrap()
    }

    fn parse(json: &str) -> ChatCompletionResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_provider_defaults() {
        let groq = generator(ChatProvider::Groq, "");
        assert_eq!(groq.model, "meta-llama/llama-4-scout-17b-16e-instruct");
        assert_eq!(groq.api_base, "https://api.groq.com/openai/v1");

        let openai = generator(ChatProvider::OpenAi, "http://localhost:8080/v1/");
        assert_eq!(openai.model, "gpt-4o");
        assert_eq!(openai.api_base, "http://localhost:8080/v1");
    }

    #[test]
    fn test_missing_key_rejected() {
        assert!(ChatCompletionsGenerator::new(ChatProvider::OpenAi, "", "", "", 300).is_err());
    }

    #[test]
    fn test_request_body_includes_system_prompt() {
        let mut ctx = ConversationContext::new("be brief");
        ctx.add_message(Role::User, "hello");
        let messages = ctx.render(true);

        let body = serde_json::to_value(ChatCompletionRequest {
            model: "gpt-4o",
            messages: &messages,
            temperature: 0.7,
            max_tokens: 300,
        })
        .unwrap();

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["max_tokens"], 300);
    }

    #[test]
    fn test_interpret_first_choice() {
        let gen = generator(ChatProvider::OpenAi, "");
        let response = gen.interpret(parse(
            r#"{
                "model": "gpt-4o-2024-08-06",
                "choices": [{"message": {"content": " hi there "}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
            }"#,
        ));

        assert_eq!(response.text, "hi there");
        assert_eq!(response.metadata["fallback"], false);
        assert_eq!(response.metadata["finish_reason"], "stop");
        assert_eq!(response.metadata["usage"]["total_tokens"], 15);
        assert_eq!(response.metadata["model"], "gpt-4o-2024-08-06");
    }

    #[test]
    fn test_no_choices_uses_fallback() {
        let gen = generator(ChatProvider::Groq, "");
        let response = gen.interpret(parse(r#"{"choices": []}"#));
        assert_eq!(response.text, NO_RESPONSE_FALLBACK);
        assert_eq!(response.metadata["fallback"], true);
        assert_eq!(response.metadata["provider"], "llama");
    }

    #[test]
    fn test_blank_content_uses_fallback() {
        let gen = generator(ChatProvider::OpenAi, "");
        let response = gen.interpret(parse(
            r#"{"choices": [{"message": {"content": "   "}, "finish_reason": "length"}]}"#,
        ));
        assert_eq!(response.text, NO_RESPONSE_FALLBACK);
        assert_eq!(response.metadata["fallback"], true);
        assert_eq!(response.metadata["finish_reason"], "length");

        let empty = gen.interpret(parse(r#"{"choices": [{"message": {"content": ""}}]}"#));
        assert_eq!(empty.text, NO_RESPONSE_FALLBACK);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_uses_error_fallback() {
        let gen = generator(ChatProvider::OpenAi, "http://127.0.0.1:9");
        let mut ctx = ConversationContext::default();
        ctx.add_message(Role::User, "hello");

        let response = gen.generate(&ctx, 0.7).await;

        assert_eq!(response.text, ERROR_FALLBACK);
        assert_eq!(response.metadata["fallback"], true);
        assert!(response.metadata.contains_key("error"));
    }
}
