//! Knowledge 모듈 - Work Pass RAG 파이프라인
//!
//! - Processor: 문서 정규화 → 청킹 → 카테고리 지정 → 중복 제거
//! - VectorIndex: SQLite에 청크 + 임베딩 저장, 코사인 유사도 검색
//! - Retriever: 쿼리 임베딩 → 검색 → 관련도 정규화/순위
//! - AnswerComposer: 근거 기반 프롬프트 → 답변 + 출처
//! - RagEngine: 위 구성요소를 묶는 파사드

mod chunker;
mod classifier;
mod composer;
mod engine;
mod index;
mod processor;
mod retriever;
mod types;
pub(crate) mod vector;

// Re-exports
pub use chunker::{dedup_key, normalize_text, BoundaryChunker, ChunkConfig, Chunker, TextSpan};
pub use classifier::{detect_pass_type, Classifier, KeywordClassifier};
pub use composer::{build_prompt, collect_citations, AnswerComposer, NO_EVIDENCE_ANSWER};
pub use engine::{BuildSummary, RagEngine};
pub use index::{BuildReport, IndexStats, VectorIndex};
pub use processor::{
    chunk_id, load_chunks, load_documents, save_chunks, save_documents, ProcessStats, Processor,
};
pub use retriever::Retriever;
pub use types::{
    Answer, Category, Chunk, Citation, EvidenceItem, PassType, RawDocument, UserProfile,
};
pub use vector::{cosine_similarity, normalize_similarity, MetadataFilter, ScoredChunk};
