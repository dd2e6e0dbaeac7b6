//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 외부 임베딩 프로바이더를 `EmbeddingProvider` 트레이트 뒤에 감추고,
//! `EmbeddingGateway`가 배치 분할과 에러 변환을 담당합니다.
//!
//! 재시도 정책은 게이트웨이가 아니라 호출자(인덱스 빌드, Retriever)가 적용합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let provider = create_embedder(&config)?;
//! let gateway = EmbeddingGateway::new(provider, config.embedding_batch_size);
//! let vectors = gateway.embed(&["Employment Pass".to_string()]).await?;
//! ```

mod gemini;
mod hashing;
mod openai;

use std::sync::Arc;

use anyhow::Result as AnyResult;
use async_trait::async_trait;

use crate::config::{EmbeddingBackend, RagConfig};
use crate::error::{RagError, Result};

pub use gemini::GeminiEmbedding;
pub use hashing::HashingEmbedding;
pub use openai::OpenAiEmbedding;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> AnyResult<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> AnyResult<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더/모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// EmbeddingGateway
// ============================================================================

/// 임베딩 게이트웨이
///
/// 입력 순서를 보존하며, 배치 경계는 결과에 영향을 주지 않습니다.
/// 프로바이더 설정 외에는 상태가 없습니다.
#[derive(Clone)]
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// 모델 식별자 (인덱스 메타데이터에 기록)
    pub fn model(&self) -> &str {
        self.provider.name()
    }

    /// 텍스트 목록 임베딩 (배치 크기로 분할)
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            tracing::debug!(
                "Embedding batch {}/{}",
                i + 1,
                texts.len().div_ceil(self.batch_size)
            );
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }

    /// 한 배치를 프로바이더 1회 호출로 임베딩
    ///
    /// 응답 벡터 수가 입력과 다르면 프로바이더 에러로 취급합니다.
    /// HTTP 4xx 거절(429/408 제외)은 재시도 불가능한 `EmbeddingRejected`가 됩니다.
    pub async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        if batch.is_empty() {
            return Ok(vec![]);
        }

        let vectors = self
            .provider
            .embed_batch(batch)
            .await
            .map_err(RagError::embedding)?;

        if vectors.len() != batch.len() {
            return Err(RagError::EmbeddingProvider(format!(
                "{} returned {} vectors for {} inputs",
                self.provider.name(),
                vectors.len(),
                batch.len()
            )));
        }

        Ok(vectors)
    }

    /// 단일 텍스트 임베딩 (쿼리용)
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::EmbeddingProvider("empty embedding response".into()))
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// Gemini API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `GEMINI_API_KEY` 환경변수
/// 2. `GOOGLE_AI_API_KEY` 환경변수
pub fn get_gemini_api_key() -> AnyResult<String> {
    for var in ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"] {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                tracing::debug!("Using API key from {}", var);
                return Ok(key);
            }
        }
    }

    anyhow::bail!(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
    )
}

/// OpenAI API 키 로드 (`OPENAI_API_KEY`)
pub fn get_openai_api_key() -> AnyResult<String> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => anyhow::bail!(
            "API key not found. Set OPENAI_API_KEY environment variable.\n\
             Get your API key at: https://platform.openai.com/api-keys"
        ),
    }
}

/// 선택된 백엔드에 필요한 API 키 존재 여부
pub fn has_api_key(backend: EmbeddingBackend) -> bool {
    match backend {
        EmbeddingBackend::Gemini => get_gemini_api_key().is_ok(),
        EmbeddingBackend::OpenAi => get_openai_api_key().is_ok(),
        EmbeddingBackend::Hashing => true,
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 맞는 임베딩 프로바이더 생성
pub fn create_embedder(config: &RagConfig) -> AnyResult<Arc<dyn EmbeddingProvider>> {
    let timeout = config.request_timeout();
    let provider: Arc<dyn EmbeddingProvider> = match config.embedding_provider {
        EmbeddingBackend::Gemini => Arc::new(GeminiEmbedding::new(
            get_gemini_api_key()?,
            &config.embedding_model,
            config.embedding_dimension,
            timeout,
        )?),
        EmbeddingBackend::OpenAi => Arc::new(OpenAiEmbedding::new(
            get_openai_api_key()?,
            &config.embedding_model,
            timeout,
        )?),
        EmbeddingBackend::Hashing => Arc::new(HashingEmbedding::new(config.embedding_dimension)),
    };

    tracing::info!(
        "Using {} embedding (dimension: {})",
        provider.name(),
        provider.dimension()
    );
    Ok(provider)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 배치 크기를 기록하는 가짜 프로바이더
    struct CountingProvider {
        inner: HashingEmbedding,
        calls: AtomicUsize,
        drop_last: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(&self, text: &str) -> AnyResult<Vec<f32>> {
            self.inner.embed(text).await
        }

        async fn embed_batch(&self, texts: &[String]) -> AnyResult<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out = self.inner.embed_batch(texts).await?;
            if self.drop_last {
                out.pop();
            }
            Ok(out)
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        async fn embed(&self, _text: &str) -> AnyResult<Vec<f32>> {
            anyhow::bail!("503 Service Unavailable")
        }

        fn dimension(&self) -> usize {
            8
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("work pass text number {}", i)).collect()
    }

    #[tokio::test]
    async fn test_gateway_preserves_order_and_count() {
        let provider = Arc::new(CountingProvider {
            inner: HashingEmbedding::new(64),
            calls: AtomicUsize::new(0),
            drop_last: false,
        });
        let gateway = EmbeddingGateway::new(provider.clone(), 3);
        let inputs = texts(7);

        let vectors = gateway.embed(&inputs).await.unwrap();

        assert_eq!(vectors.len(), 7);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        for (text, vector) in inputs.iter().zip(&vectors) {
            assert_eq!(vector, &gateway.embed_one(text).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_batching_does_not_change_results() {
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbedding::new(64));
        let inputs = texts(10);

        let small = EmbeddingGateway::new(provider.clone(), 2).embed(&inputs).await.unwrap();
        let large = EmbeddingGateway::new(provider, 100).embed(&inputs).await.unwrap();

        assert_eq!(small, large);
    }

    #[tokio::test]
    async fn test_short_provider_response_is_error() {
        let provider = Arc::new(CountingProvider {
            inner: HashingEmbedding::new(16),
            calls: AtomicUsize::new(0),
            drop_last: true,
        });
        let gateway = EmbeddingGateway::new(provider, 4);

        let result = gateway.embed(&texts(4)).await;
        assert!(matches!(result, Err(RagError::EmbeddingProvider(_))));
    }

    #[tokio::test]
    async fn test_provider_failure_maps_to_typed_error() {
        let gateway = EmbeddingGateway::new(Arc::new(FailingProvider), 4);

        match gateway.embed_one("S Pass").await {
            Err(RagError::EmbeddingProvider(msg)) => assert!(msg.contains("503")),
            other => panic!("unexpected: {:?}", other.map(|v| v.len())),
        }
    }

    struct UnauthorizedProvider;

    #[async_trait]
    impl EmbeddingProvider for UnauthorizedProvider {
        async fn embed(&self, _text: &str) -> AnyResult<Vec<f32>> {
            Err(crate::error::ProviderHttpError::new(
                "Gemini",
                reqwest::StatusCode::UNAUTHORIZED,
                "API key not valid",
            )
            .into())
        }

        fn dimension(&self) -> usize {
            8
        }

        fn name(&self) -> &str {
            "unauthorized"
        }
    }

    #[tokio::test]
    async fn test_rejected_request_is_not_retried() {
        use crate::retry::RetryPolicy;
        use std::time::Duration;

        let gateway = EmbeddingGateway::new(Arc::new(UnauthorizedProvider), 4);
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            timeout: Duration::from_secs(1),
        };
        let attempts = AtomicUsize::new(0);
        let result = policy
            .run("query embedding", RagError::EmbeddingProvider, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                gateway.embed_one("S Pass")
            })
            .await;

        assert!(matches!(result, Err(RagError::EmbeddingRejected(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let gateway = EmbeddingGateway::new(Arc::new(FailingProvider), 4);
        assert!(gateway.embed(&[]).await.unwrap().is_empty());
    }
}
