//! OpenAI chat completions

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerationProvider, GenerationRequest};
use crate::error::ProviderHttpError;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// 기본 생성 모델
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiGeneration {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiGeneration {
    pub fn new(api_key: String, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        let model = if model.trim().is_empty() {
            DEFAULT_MODEL
        } else {
            model.trim()
        };
        Ok(Self {
            api_key,
            model: model.to_string(),
            client,
        })
    }

    fn build_request<'a>(&'a self, request: &GenerationRequest<'a>) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: request.system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.prompt,
        });
        ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            messages,
        }
    }
}

#[async_trait]
impl GenerationProvider for OpenAiGeneration {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String> {
        let resp = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(self.api_key.trim())
            .json(&self.build_request(request))
            .send()
            .await
            .context("failed to call OpenAI chat completions")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ProviderHttpError::new("OpenAI", status, text).into());
        }
        let parsed: ChatResponse = resp
            .json()
            .await
            .context("failed to parse OpenAI response")?;
        let answer = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default();
        if answer.trim().is_empty() {
            bail!("OpenAI returned an empty answer");
        }
        Ok(answer)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}
