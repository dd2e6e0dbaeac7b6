//! RagEngine - 파이프라인 파사드
//!
//! Processor → VectorIndex (빌드) / Retriever → AnswerComposer (질의)를 하나로 묶습니다.
//! `Send + Sync`이므로 `Arc`로 공유해 여러 질의를 동시에 처리할 수 있습니다.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::config::RagConfig;
use crate::embedding::{create_embedder, EmbeddingGateway, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::generation::{create_generator, GenerationProvider};

use super::composer::AnswerComposer;
use super::index::{BuildReport, IndexStats, VectorIndex};
use super::processor::{load_chunks, ProcessStats, Processor};
use super::retriever::Retriever;
use super::types::{Answer, Category, Chunk, EvidenceItem, PassType, RawDocument, UserProfile};

/// 빌드 요약
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub process: ProcessStats,
    pub index: BuildReport,
}

/// RAG 엔진
pub struct RagEngine {
    config: RagConfig,
    processor: Processor,
    index: VectorIndex,
    gateway: EmbeddingGateway,
    retriever: Retriever,
    composer: Option<AnswerComposer>,
}

impl RagEngine {
    /// 설정으로 엔진 생성
    ///
    /// 임베딩 프로바이더는 필수입니다. 생성 프로바이더를 만들 수 없으면
    /// (예: API 키 없음) 빌드/검색은 가능하고 `ask`만 실패합니다.
    pub fn open(config: RagConfig) -> Result<Self> {
        let embedder = create_embedder(&config).map_err(|e| RagError::Config(format!("{:#}", e)))?;
        let generator = match create_generator(&config) {
            Ok(g) => Some(g),
            Err(e) => {
                tracing::debug!("Generation provider unavailable: {:#}", e);
                None
            }
        };
        Self::with_providers(config, embedder, generator)
    }

    /// 프로바이더를 직접 주입해 생성
    pub fn with_providers(
        config: RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Option<Arc<dyn GenerationProvider>>,
    ) -> Result<Self> {
        config.validate()?;

        let processor = Processor::new(config.chunk_config())?;
        let index =
            VectorIndex::open(&config.index_path())?.with_similarity_floor(config.similarity_floor);
        let gateway = EmbeddingGateway::new(embedder, config.embedding_batch_size);
        let retry = config.retry_policy();
        let retriever = Retriever::new(index.clone(), gateway.clone(), retry.clone());
        let composer = generator
            .map(|g| AnswerComposer::new(g, retry).with_temperature(config.temperature));

        Ok(Self {
            config,
            processor,
            index,
            gateway,
            retriever,
            composer,
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    // ------------------------------------------------------------------------
    // Build
    // ------------------------------------------------------------------------

    /// 문서 → 청크 (저장용으로 따로 호출 가능)
    pub fn process(&self, documents: &[RawDocument]) -> (Vec<Chunk>, ProcessStats) {
        let (chunks, stats) = self.processor.process_with_stats(documents);
        tracing::info!(
            "Processed {} documents into {} chunks ({} skipped, {} duplicates dropped)",
            stats.documents,
            stats.chunks,
            stats.skipped_documents,
            stats.duplicates_dropped
        );
        (chunks, stats)
    }

    /// 문서에서 인덱스 빌드
    pub async fn build_from_documents(&self, documents: &[RawDocument]) -> Result<BuildSummary> {
        let (chunks, process) = self.process(documents);
        let index = self.build_from_chunks(&chunks).await?;
        Ok(BuildSummary { process, index })
    }

    /// 처리된 청크에서 인덱스 빌드
    pub async fn build_from_chunks(&self, chunks: &[Chunk]) -> Result<BuildReport> {
        self.index
            .build(
                chunks,
                &self.gateway,
                &self.config.retry_policy(),
                self.config.embedding_concurrency,
            )
            .await
    }

    /// 처리된 청크 파일(`save_chunks` 출력)에서 인덱스 빌드
    ///
    /// 스크래핑과 청킹을 다시 하지 않고 임베딩/저장만 수행합니다.
    pub async fn build_from_processed_file(&self, path: &Path) -> Result<BuildReport> {
        let chunks = load_chunks(path)?;
        tracing::info!("Loaded {} processed chunks from {}", chunks.len(), path.display());
        self.build_from_chunks(&chunks).await
    }

    // ------------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------------

    /// 근거 검색만 수행 (생성 없음)
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        category: Option<Category>,
    ) -> Result<Vec<EvidenceItem>> {
        self.retriever.retrieve(query, k, category).await
    }

    /// 질문 → 답변 (k = `retrieval_k`)
    pub async fn ask(
        &self,
        query: &str,
        category: Option<Category>,
        profile: Option<&UserProfile>,
    ) -> Result<Answer> {
        self.ask_with_k(query, self.config.retrieval_k, category, profile)
            .await
    }

    pub async fn ask_with_k(
        &self,
        query: &str,
        k: usize,
        category: Option<Category>,
        profile: Option<&UserProfile>,
    ) -> Result<Answer> {
        let composer = self.composer.as_ref().ok_or_else(|| {
            RagError::Config(format!(
                "no {} generation provider available (check the API key)",
                self.config.generation_provider
            ))
        })?;

        let evidence = self.retriever.retrieve(query, k, category).await?;
        composer.compose(query, &evidence, profile).await
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// 카테고리별 청크 수
    pub fn categories(&self) -> Result<BTreeMap<Category, usize>> {
        self.index.category_counts()
    }

    /// 인덱스의 패스 종류
    pub fn pass_types(&self) -> Result<Vec<(PassType, usize)>> {
        self.index.pass_types()
    }

    pub fn stats(&self) -> Result<IndexStats> {
        self.index.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingBackend;
    use crate::embedding::HashingEmbedding;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> RagConfig {
        RagConfig {
            data_dir: dir.path().to_path_buf(),
            embedding_provider: EmbeddingBackend::Hashing,
            embedding_dimension: 128,
            ..Default::default()
        }
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_engine_is_send_sync() {
        assert_send_sync::<RagEngine>();
    }

    #[tokio::test]
    async fn test_build_and_introspect() {
        let dir = TempDir::new().unwrap();
        let engine =
            RagEngine::with_providers(config(&dir), Arc::new(HashingEmbedding::new(128)), None)
                .unwrap();

        let docs = vec![
            RawDocument::new(
                "https://www.mom.gov.sg/passes-and-permits/employment-pass",
                "Employment Pass",
                "The Employment Pass is for foreign professionals, managers and executives.",
            )
            .with_category(Category::Professionals),
            RawDocument::new(
                "https://www.mom.gov.sg/passes-and-permits/s-pass",
                "S Pass",
                "The S Pass lets mid-skilled staff work in Singapore.",
            ),
        ];

        let summary = engine.build_from_documents(&docs).await.unwrap();
        assert_eq!(summary.process.chunks, 2);
        assert_eq!(summary.index.chunks_indexed, 2);

        let categories = engine.categories().unwrap();
        assert_eq!(categories.get(&Category::Professionals), Some(&1));
        assert_eq!(categories.get(&Category::SkilledSemiSkilled), Some(&1));

        let pass_types: Vec<_> = engine.pass_types().unwrap().into_iter().map(|(p, _)| p).collect();
        assert_eq!(pass_types, vec![PassType::EmploymentPass, PassType::SPass]);

        assert!(engine.stats().unwrap().is_built());
    }

    #[tokio::test]
    async fn test_build_from_processed_file() {
        let dir = TempDir::new().unwrap();
        let engine =
            RagEngine::with_providers(config(&dir), Arc::new(HashingEmbedding::new(128)), None)
                .unwrap();

        let docs = vec![RawDocument::new(
            "https://www.mom.gov.sg/passes-and-permits/s-pass",
            "S Pass",
            "S Pass holders count towards the company quota.",
        )];
        let (chunks, _) = engine.process(&docs);
        let path = dir.path().join("processed_knowledge_base.json");
        crate::knowledge::save_chunks(&chunks, &path).unwrap();

        let report = engine.build_from_processed_file(&path).await.unwrap();
        assert_eq!(report.chunks_indexed, 1);

        let evidence = engine.search("S Pass quota", 3, None).await.unwrap();
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].chunk.id, chunks[0].id);
    }

    #[tokio::test]
    async fn test_ask_without_generator_is_config_error() {
        let dir = TempDir::new().unwrap();
        let engine =
            RagEngine::with_providers(config(&dir), Arc::new(HashingEmbedding::new(128)), None)
                .unwrap();

        assert!(matches!(
            engine.ask("What is an S Pass?", None, None).await,
            Err(RagError::Config(_))
        ));
    }
}
