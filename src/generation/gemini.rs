//! Gemini generateContent

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerationProvider, GenerationRequest};
use crate::error::ProviderHttpError;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// 기본 생성 모델
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const MAX_OUTPUT_TOKENS: u32 = 2048;

/// Gemini 텍스트 생성
#[derive(Debug)]
pub struct GeminiGeneration {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiGeneration {
    pub fn new(api_key: String, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let model = if model.trim().is_empty() {
            DEFAULT_MODEL
        } else {
            model.trim_start_matches("models/")
        };

        Ok(Self {
            api_key,
            model: model.to_string(),
            client,
        })
    }

    fn build_request(request: &GenerationRequest<'_>) -> GenerateRequest {
        GenerateRequest {
            system_instruction: (!request.system.is_empty()).then(|| SystemInstruction {
                parts: vec![TextPart {
                    text: request.system.to_string(),
                }],
            }),
            contents: vec![UserContent {
                role: "user",
                parts: vec![TextPart {
                    text: request.prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        }
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    contents: Vec<UserContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
struct UserContent {
    role: &'static str,
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TextPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

fn response_text(response: GenerateResponse) -> String {
    response
        .candidates
        .into_iter()
        .next()
        .map(|c| {
            c.content
                .parts
                .into_iter()
                .map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

#[async_trait]
impl GenerationProvider for GeminiGeneration {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/{}:generateContent", GEMINI_API_BASE, self.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::build_request(request))
            .send()
            .await
            .context("Failed to send generateContent request")?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ProviderHttpError::new("Gemini", status, body).into());
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&body).context("Failed to parse generateContent response")?;
        let text = response_text(parsed);

        if text.trim().is_empty() {
            anyhow::bail!("Gemini returned an empty answer");
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = GenerationRequest {
            system: "Answer from MOM context only.",
            prompt: "What is an S Pass?",
            temperature: 0.3,
        };
        let json = serde_json::to_value(GeminiGeneration::build_request(&request)).unwrap();

        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Answer from MOM context only.");
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "What is an S Pass?");
        assert!((json["generationConfig"]["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_response_parts_joined() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"The S Pass "},{"text":"is for mid-skilled staff [1]."}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response_text(parsed), "The S Pass is for mid-skilled staff [1].");
    }

    #[test]
    fn test_empty_candidates() {
        let parsed: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(response_text(parsed), "");
    }

    #[test]
    fn test_default_model() {
        let generator = GeminiGeneration::new("k".into(), "", Duration::from_secs(5)).unwrap();
        assert_eq!(generator.name(), DEFAULT_MODEL);
    }
}
