//! 에러 타입
//!
//! 라이브러리 경계에서 사용하는 타입 에러입니다.
//! 프로바이더 어댑터와 CLI는 `anyhow`를 사용하고, 게이트웨이에서 이 타입으로 변환합니다.

use std::path::PathBuf;

use thiserror::Error;

/// RAG 파이프라인 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 임베딩 프로바이더 실패 (일시적, 재시도 가능)
    #[error("embedding provider error: {0}")]
    EmbeddingProvider(String),

    /// 생성(LLM) 프로바이더 실패 (일시적, 재시도 가능)
    #[error("generation provider error: {0}")]
    GenerationProvider(String),

    /// 임베딩 프로바이더가 요청을 거절 (잘못된 키/모델 등, 재시도 불가)
    #[error("embedding provider rejected the request: {0}")]
    EmbeddingRejected(String),

    /// 생성 프로바이더가 요청을 거절 (재시도 불가)
    #[error("generation provider rejected the request: {0}")]
    GenerationRejected(String),

    /// 인덱스가 한 번도 빌드되지 않음
    #[error("vector index not built at {}; run `workpass-rag build` first", path.display())]
    IndexNotBuilt { path: PathBuf },

    /// 처리할 수 없는 문서 (해당 문서만 건너뜀)
    #[error("malformed document {url:?}: {reason}")]
    MalformedDocument { url: String, reason: String },

    /// 다른 빌드가 진행 중
    #[error("an index build is already in progress")]
    BuildInProgress,

    /// 쿼리 벡터와 인덱스 벡터의 차원 불일치
    #[error("embedding dimension mismatch: index has {expected}, query has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// 잘못된 설정
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// 블로킹 작업 스레드 실패 (패닉/취소)
    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RagError {
    /// 임베딩 어댑터 에러 변환 (HTTP 거절 응답이면 `EmbeddingRejected`)
    pub fn embedding(error: anyhow::Error) -> Self {
        let message = format!("{:#}", error);
        if is_retryable(&error) {
            RagError::EmbeddingProvider(message)
        } else {
            RagError::EmbeddingRejected(message)
        }
    }

    /// 생성 어댑터 에러 변환 (HTTP 거절 응답이면 `GenerationRejected`)
    pub fn generation(error: anyhow::Error) -> Self {
        let message = format!("{:#}", error);
        if is_retryable(&error) {
            RagError::GenerationProvider(message)
        } else {
            RagError::GenerationRejected(message)
        }
    }

    /// 재시도할 가치가 있는 에러인지
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingProvider(_) | RagError::GenerationProvider(_)
        )
    }
}

/// 라이브러리 공용 Result
pub type Result<T> = std::result::Result<T, RagError>;

// ============================================================================
// Provider HTTP Errors
// ============================================================================

/// 프로바이더 API의 실패 응답
///
/// 어댑터가 `anyhow::Error`로 감싸 돌려주고, 게이트웨이 경계에서
/// 상태 코드로 재시도 여부를 판단합니다.
#[derive(Debug, Error)]
#[error("{provider} API error ({status}): {body}")]
pub struct ProviderHttpError {
    pub provider: &'static str,
    pub status: reqwest::StatusCode,
    pub body: String,
}

impl ProviderHttpError {
    pub fn new(provider: &'static str, status: reqwest::StatusCode, body: impl Into<String>) -> Self {
        Self {
            provider,
            status,
            body: body.into(),
        }
    }

    /// 429, 408, 5xx만 재시도
    pub fn is_retryable(&self) -> bool {
        self.status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || self.status == reqwest::StatusCode::REQUEST_TIMEOUT
            || self.status.is_server_error()
    }
}

/// 에러 체인에 재시도 불가능한 HTTP 응답이 없으면 재시도 가능
///
/// 네트워크 오류, 타임아웃, 응답 파싱 실패는 재시도 대상입니다.
pub fn is_retryable(error: &anyhow::Error) -> bool {
    error.chain().all(|cause| {
        cause
            .downcast_ref::<ProviderHttpError>()
            .map_or(true, ProviderHttpError::is_retryable)
    })
}
