//! 설정 - RagConfig
//!
//! 우선순위: 기본값 < JSON 설정 파일 < `WORKPASS_*` 환경변수 < CLI 플래그

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::knowledge::ChunkConfig;
use crate::retry::RetryPolicy;

/// 환경변수 접두사
pub const ENV_PREFIX: &str = "WORKPASS_";

/// 인덱스 DB 파일 이름
pub const INDEX_FILE: &str = "index.db";

/// 데이터 디렉토리 경로 (`<data_local_dir>/.workpass-rag`)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".workpass-rag")
}

// ============================================================================
// Backends
// ============================================================================

/// 임베딩 백엔드
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    Gemini,
    #[serde(alias = "open_ai")]
    OpenAi,
    /// 오프라인 해싱 임베딩 (API 키 불필요)
    Hashing,
}

impl FromStr for EmbeddingBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "hashing" | "offline" => Ok(Self::Hashing),
            other => Err(format!(
                "unknown embedding provider '{}' (expected gemini, openai or hashing)",
                other
            )),
        }
    }
}

impl fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Hashing => "hashing",
        })
    }
}

/// 생성(LLM) 백엔드
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationBackend {
    #[default]
    Gemini,
    #[serde(alias = "open_ai")]
    OpenAi,
}

impl FromStr for GenerationBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" | "open_ai" => Ok(Self::OpenAi),
            other => Err(format!(
                "unknown generation provider '{}' (expected gemini or openai)",
                other
            )),
        }
    }
}

impl fmt::Display for GenerationBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
        })
    }
}

// ============================================================================
// RagConfig
// ============================================================================

/// 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// 청크 최대 문자 수
    pub max_chunk_size: usize,
    /// 연속 청크 간 겹치는 문자 수
    pub overlap_size: usize,

    pub embedding_provider: EmbeddingBackend,
    /// 빈 값이면 프로바이더 기본 모델
    pub embedding_model: String,
    /// Gemini(768/1536/3072)와 해싱 임베딩에만 적용
    pub embedding_dimension: usize,

    pub generation_provider: GenerationBackend,
    /// 빈 값이면 프로바이더 기본 모델
    pub generation_model: String,
    pub temperature: f32,

    /// 검색 결과 수 (k)
    pub retrieval_k: usize,
    /// 관련도 하한 (0 ~ 1, 0.0 = 하한 없음)
    pub similarity_floor: f32,

    pub embedding_batch_size: usize,
    /// 병렬 임베딩 배치 수
    pub embedding_concurrency: usize,

    /// 외부 호출 최대 시도 횟수
    pub max_attempts: u32,
    pub request_timeout_secs: u64,

    pub data_dir: PathBuf,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            overlap_size: 200,
            embedding_provider: EmbeddingBackend::Gemini,
            embedding_model: String::new(),
            embedding_dimension: 768,
            generation_provider: GenerationBackend::Gemini,
            generation_model: String::new(),
            temperature: 0.3,
            retrieval_k: 5,
            similarity_floor: 0.0,
            embedding_batch_size: 32,
            embedding_concurrency: 4,
            max_attempts: 3,
            request_timeout_secs: 30,
            data_dir: get_data_dir(),
        }
    }
}

impl RagConfig {
    /// 설정 로드 (JSON 파일 + 환경변수) 후 검증
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let data = std::fs::read_to_string(p).map_err(|e| {
                    RagError::Config(format!("cannot read {}: {}", p.display(), e))
                })?;
                let config: RagConfig = serde_json::from_str(&data)?;
                tracing::debug!("Loaded config from {}", p.display());
                config
            }
            None => RagConfig::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// `WORKPASS_*` 오버라이드 적용
    ///
    /// `lookup`은 변수 이름을 받아 값을 돌려줍니다 (보통 `std::env::var`).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.trim().is_empty())
        };

        if let Some(v) = get("MAX_CHUNK_SIZE") {
            self.max_chunk_size = parse_var("MAX_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = get("OVERLAP_SIZE") {
            self.overlap_size = parse_var("OVERLAP_SIZE", &v)?;
        }
        if let Some(v) = get("EMBEDDING_PROVIDER") {
            self.embedding_provider = v.parse().map_err(RagError::Config)?;
        }
        if let Some(v) = get("EMBEDDING_MODEL") {
            self.embedding_model = v;
        }
        if let Some(v) = get("EMBEDDING_DIMENSION") {
            self.embedding_dimension = parse_var("EMBEDDING_DIMENSION", &v)?;
        }
        if let Some(v) = get("GENERATION_PROVIDER") {
            self.generation_provider = v.parse().map_err(RagError::Config)?;
        }
        if let Some(v) = get("GENERATION_MODEL") {
            self.generation_model = v;
        }
        if let Some(v) = get("RETRIEVAL_K") {
            self.retrieval_k = parse_var("RETRIEVAL_K", &v)?;
        }
        if let Some(v) = get("SIMILARITY_FLOOR") {
            self.similarity_floor = parse_var("SIMILARITY_FLOOR", &v)?;
        }
        if let Some(v) = get("EMBEDDING_BATCH_SIZE") {
            self.embedding_batch_size = parse_var("EMBEDDING_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("EMBEDDING_CONCURRENCY") {
            self.embedding_concurrency = parse_var("EMBEDDING_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("MAX_ATTEMPTS") {
            self.max_attempts = parse_var("MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_var("REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }

        Ok(())
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        self.chunk_config().validate()?;

        if self.retrieval_k == 0 {
            return Err(RagError::Config("retrieval_k must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.similarity_floor) {
            return Err(RagError::Config(format!(
                "similarity_floor must be within [0, 1], got {}",
                self.similarity_floor
            )));
        }
        if self.embedding_batch_size == 0 || self.embedding_concurrency == 0 {
            return Err(RagError::Config(
                "embedding_batch_size and embedding_concurrency must be at least 1".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(RagError::Config("max_attempts must be at least 1".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(RagError::Config("request_timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            max_chunk_size: self.max_chunk_size,
            overlap_size: self.overlap_size,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            timeout: self.request_timeout(),
            ..Default::default()
        }
    }

    /// `<data_dir>/index.db`
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(INDEX_FILE)
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        RagError::Config(format!("{}{} has invalid value '{}'", ENV_PREFIX, name, value))
    })
}

// ============================================================================
// Tests
// ============================================================================
