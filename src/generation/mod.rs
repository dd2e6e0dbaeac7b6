//! 생성(LLM) 모듈 - 프롬프트 → 답변 텍스트
//!
//! `GenerationProvider` 트레이트 뒤에 Gemini / OpenAI 구현을 둡니다.
//! 재시도는 호출자(AnswerComposer)가 담당합니다.

mod gemini;
mod openai;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{GenerationBackend, RagConfig};
use crate::embedding::{get_gemini_api_key, get_openai_api_key};

pub use gemini::GeminiGeneration;
pub use openai::OpenAiGeneration;

/// 생성 요청
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    /// 시스템 지시문
    pub system: &'a str,
    /// 사용자 프롬프트 (컨텍스트 + 질문)
    pub prompt: &'a str,
    pub temperature: f32,
}

/// 생성 프로바이더 트레이트
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// 요청 1건에 대한 평문 답변
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String>;

    /// 프로바이더/모델 이름
    fn name(&self) -> &str;
}

/// 설정에 맞는 생성 프로바이더 생성
pub fn create_generator(config: &RagConfig) -> Result<Arc<dyn GenerationProvider>> {
    let timeout = config.request_timeout();
    let generator: Arc<dyn GenerationProvider> = match config.generation_provider {
        GenerationBackend::Gemini => Arc::new(GeminiGeneration::new(
            get_gemini_api_key()?,
            &config.generation_model,
            timeout,
        )?),
        GenerationBackend::OpenAi => Arc::new(OpenAiGeneration::new(
            get_openai_api_key()?,
            &config.generation_model,
            timeout,
        )?),
    };

    tracing::info!("Using {} for answer generation", generator.name());
    Ok(generator)
}
