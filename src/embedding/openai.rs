//! OpenAI 임베딩 (`/v1/embeddings`)

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::EmbeddingProvider;
use crate::error::ProviderHttpError;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// 기본 임베딩 모델
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// OpenAI 임베딩 구현체
#[derive(Debug)]
pub struct OpenAiEmbedding {
    api_key: String,
    model: String,
    client: reqwest::Client,
    dimension: usize,
}

impl OpenAiEmbedding {
    pub fn new(api_key: String, model: &str, timeout: Duration) -> Result<Self> {
        let model = if model.trim().is_empty() {
            DEFAULT_MODEL
        } else {
            model.trim()
        };
        let dimension = model_dimension(model)
            .with_context(|| format!("Unknown OpenAI embedding model: {}", model))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build OpenAI HTTP client")?;

        Ok(Self {
            api_key,
            model: model.to_string(),
            client,
            dimension,
        })
    }
}

/// 모델별 출력 차원
fn model_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .context("OpenAI returned no embedding")
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let resp = self
            .client
            .post(format!("{}/embeddings", OPENAI_API_BASE))
            .bearer_auth(self.api_key.trim())
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .context("failed to call OpenAI embeddings")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ProviderHttpError::new("OpenAI", status, text).into());
        }

        let mut parsed: EmbeddingApiResponse = resp
            .json()
            .await
            .context("failed to parse OpenAI response")?;

        // 응답 순서는 보장되지 않으므로 index 기준으로 정렬
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_models() {
        let small = OpenAiEmbedding::new("k".into(), "", Duration::from_secs(5)).unwrap();
        assert_eq!(small.name(), DEFAULT_MODEL);
        assert_eq!(small.dimension(), 1536);

        let large =
            OpenAiEmbedding::new("k".into(), "text-embedding-3-large", Duration::from_secs(5))
                .unwrap();
        assert_eq!(large.dimension(), 3072);
    }

    #[test]
    fn test_unknown_model_rejected() {
        assert!(OpenAiEmbedding::new("k".into(), "gpt-4o-mini", Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_response_sorted_by_index() {
        let body = r#"{"data":[{"index":1,"embedding":[2.0]},{"index":0,"embedding":[1.0]}]}"#;
        let mut parsed: EmbeddingApiResponse = serde_json::from_str(body).unwrap();
        parsed.data.sort_by_key(|d| d.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0]);
    }
}
