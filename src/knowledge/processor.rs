//! Processor - 원문 문서 → 청크 변환
//!
//! 정규화, 청킹, 카테고리 지정, 중복 제거를 수행합니다.
//! 문서 단위 에러는 해당 문서만 건너뛰고 배치 전체는 계속 진행합니다.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};

use super::chunker::{dedup_key, normalize_text, BoundaryChunker, ChunkConfig, Chunker};
use super::classifier::{detect_pass_type, Classifier, KeywordClassifier};
use super::types::{Category, Chunk, RawDocument};

// ============================================================================
// Types
// ============================================================================

/// 처리 통계 (빌드 진단용)
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessStats {
    /// 사용한 청커/분류기 이름
    pub chunker: &'static str,
    pub classifier: &'static str,
    pub documents: usize,
    pub skipped_documents: usize,
    pub chunks: usize,
    pub duplicates_dropped: usize,
    pub per_category: BTreeMap<Category, usize>,
}

// ============================================================================
// Processor
// ============================================================================

/// 문서 처리기
pub struct Processor {
    chunker: Box<dyn Chunker>,
    classifier: Box<dyn Classifier>,
}

impl Processor {
    /// 청킹 설정으로 생성 (기본 Work Pass 분류기 사용)
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            chunker: Box::new(BoundaryChunker::new(config)),
            classifier: Box::new(KeywordClassifier::work_pass_defaults()),
        })
    }

    /// 청커/분류기 직접 지정
    pub fn with_strategies(chunker: Box<dyn Chunker>, classifier: Box<dyn Classifier>) -> Self {
        Self {
            chunker,
            classifier,
        }
    }

    /// 문서 목록을 청크로 변환
    pub fn process(&self, documents: &[RawDocument]) -> Vec<Chunk> {
        let (chunks, stats) = self.process_with_stats(documents);
        tracing::info!(
            "Processed {} documents into {} chunks ({} skipped, {} duplicates dropped)",
            stats.documents,
            stats.chunks,
            stats.skipped_documents,
            stats.duplicates_dropped
        );
        for (category, count) in &stats.per_category {
            tracing::info!("  {}: {} chunks", category, count);
        }
        chunks
    }

    /// 문서 목록을 청크로 변환하고 통계도 반환
    pub fn process_with_stats(&self, documents: &[RawDocument]) -> (Vec<Chunk>, ProcessStats) {
        let mut stats = ProcessStats {
            chunker: self.chunker.name(),
            classifier: self.classifier.name(),
            documents: documents.len(),
            ..Default::default()
        };
        let mut seen: HashSet<String> = HashSet::new();
        let mut chunks = Vec::new();

        for doc in documents {
            let doc_chunks = match self.process_document(doc) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("Skipping document: {}", e);
                    stats.skipped_documents += 1;
                    continue;
                }
            };

            for chunk in doc_chunks {
                if !seen.insert(dedup_key(&chunk.text)) {
                    stats.duplicates_dropped += 1;
                    continue;
                }
                *stats.per_category.entry(chunk.category).or_insert(0) += 1;
                chunks.push(chunk);
            }
        }

        stats.chunks = chunks.len();
        (chunks, stats)
    }

    /// 단일 문서 처리
    fn process_document(&self, doc: &RawDocument) -> Result<Vec<Chunk>> {
        let url = doc.url.trim();
        if url.is_empty() {
            return Err(RagError::MalformedDocument {
                url: doc.url.clone(),
                reason: "missing url".into(),
            });
        }

        let text = normalize_text(&doc.text);
        if text.is_empty() {
            return Err(RagError::MalformedDocument {
                url: url.to_string(),
                reason: "empty text after normalization".into(),
            });
        }

        let pass_type = detect_pass_type(url, &doc.title);
        let spans = self.chunker.chunk(&text);

        let chunks = spans
            .into_iter()
            .enumerate()
            .map(|(position, span)| {
                let category = match doc.category {
                    Category::Unclassified => self
                        .classifier
                        .classify(&format!("{} {} {}", doc.title, url, span.text)),
                    inherited => inherited,
                };

                Chunk {
                    id: chunk_id(url, span.start),
                    source_url: url.to_string(),
                    title: doc.title.clone(),
                    text: span.text,
                    category,
                    pass_type,
                    position,
                    embedding: None,
                }
            })
            .collect();

        Ok(chunks)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 청크 ID: sha256(url + ":" + 오프셋)의 앞 16바이트 hex
pub fn chunk_id(source_url: &str, offset: usize) -> String {
    let digest = Sha256::digest(format!("{}:{}", source_url, offset).as_bytes());
    let hex = format!("{:x}", digest);
    hex[..32].to_string()
}

/// RawDocument JSON 배열 로드 (스크래퍼 출력 파일)
pub fn load_documents(path: &Path) -> Result<Vec<RawDocument>> {
    let data = std::fs::read_to_string(path)?;
    let docs: Vec<RawDocument> = serde_json::from_str(&data)?;
    tracing::info!("Loaded {} documents from {}", docs.len(), path.display());
    Ok(docs)
}

/// RawDocument JSON 배열 저장
pub fn save_documents(docs: &[RawDocument], path: &Path) -> Result<()> {
    write_json(path, &serde_json::to_string_pretty(docs)?)?;
    tracing::info!("Saved {} raw documents to {}", docs.len(), path.display());
    Ok(())
}

/// 처리된 청크 저장
pub fn save_chunks(chunks: &[Chunk], path: &Path) -> Result<()> {
    write_json(path, &serde_json::to_string_pretty(chunks)?)?;
    tracing::info!("Saved {} processed chunks to {}", chunks.len(), path.display());
    Ok(())
}

/// 처리된 청크 로드
pub fn load_chunks(path: &Path) -> Result<Vec<Chunk>> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

fn write_json(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, body)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
