//! workpass-rag - 싱가포르 Work Pass RAG 시스템
//!
//! MOM(Ministry of Manpower) 페이지를 청크로 나누어 SQLite 벡터 인덱스에 저장하고,
//! 질문에 대해 관련 근거를 검색해 출처가 붙은 답변을 생성합니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod knowledge;
pub mod retry;
pub mod scraper;

// Re-exports
pub use config::{get_data_dir, EmbeddingBackend, GenerationBackend, RagConfig};
pub use embedding::{
    create_embedder, has_api_key, EmbeddingGateway, EmbeddingProvider, GeminiEmbedding,
    HashingEmbedding, OpenAiEmbedding,
};
pub use error::{RagError, Result};
pub use generation::{
    create_generator, GeminiGeneration, GenerationProvider, GenerationRequest, OpenAiGeneration,
};
pub use knowledge::{
    Answer, AnswerComposer, BuildReport, BuildSummary, Category, Chunk, ChunkConfig, Citation,
    EvidenceItem, IndexStats, MetadataFilter, PassType, ProcessStats, Processor, RagEngine,
    RawDocument, Retriever, UserProfile, VectorIndex,
};
pub use retry::RetryPolicy;
pub use scraper::{SeedPage, WebScraper, DEFAULT_SEED_PAGES};
