//! Retriever - 쿼리 → 순위가 매겨진 근거(EvidenceItem)

use crate::embedding::EmbeddingGateway;
use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

use super::index::VectorIndex;
use super::types::{Category, EvidenceItem};
use super::vector::{normalize_similarity, MetadataFilter, ScoredChunk};

/// 검색기
#[derive(Clone)]
pub struct Retriever {
    index: VectorIndex,
    gateway: EmbeddingGateway,
    retry: RetryPolicy,
}

impl Retriever {
    pub fn new(index: VectorIndex, gateway: EmbeddingGateway, retry: RetryPolicy) -> Self {
        Self {
            index,
            gateway,
            retry,
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// 쿼리 검색
    ///
    /// 매칭이 없으면 빈 결과(에러 아님). 인덱스가 빌드된 적 없으면 `IndexNotBuilt`.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        category_hint: Option<Category>,
    ) -> Result<Vec<EvidenceItem>> {
        // 임베딩 비용을 쓰기 전에 인덱스 상태 확인
        if !self.index.is_built()? {
            return Err(RagError::IndexNotBuilt {
                path: self.index.db_path().to_path_buf(),
            });
        }

        let query_vector = self
            .retry
            .run("query embedding", RagError::EmbeddingProvider, || {
                self.gateway.embed_one(query)
            })
            .await?;

        // 전체 스캔은 동기 SQLite 작업이므로 블로킹 스레드에서 실행
        let index = self.index.clone();
        let filter = category_hint.map(MetadataFilter::category);
        let results = tokio::task::spawn_blocking(move || {
            index.query(&query_vector, k, filter.as_ref())
        })
        .await
        .map_err(|e| RagError::Task(format!("index query task failed: {}", e)))??;

        let evidence = rank(results);
        tracing::info!(
            "Retrieved {} evidence items for query (k={}, category={})",
            evidence.len(),
            k,
            category_hint.map_or("any", |c| c.as_str())
        );
        Ok(evidence)
    }
}

/// 관련도 내림차순(동점은 청크 id 오름차순)으로 1부터 순위 부여
fn rank(results: Vec<ScoredChunk>) -> Vec<EvidenceItem> {
    let mut items: Vec<EvidenceItem> = results
        .into_iter()
        .map(|scored| EvidenceItem {
            relevance_score: normalize_similarity(scored.similarity),
            chunk: scored.chunk,
            rank: 0,
        })
        .collect();

    items.sort_by(|a, b| {
        b.relevance_score
            .total_cmp(&a.relevance_score)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    for (i, item) in items.iter_mut().enumerate() {
        item.rank = i + 1;
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingProvider, HashingEmbedding};
    use crate::knowledge::types::Chunk;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    /// 고정 벡터를 돌려주는 임베딩
    struct FixedEmbedding(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedding {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(self.0.clone())
        }

        fn dimension(&self) -> usize {
            self.0.len()
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn chunk(id: &str, category: Category, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: id.into(),
            source_url: format!("https://www.mom.gov.sg/{}", id),
            title: id.into(),
            text: format!("about {}", id),
            category,
            pass_type: None,
            position: 0,
            embedding: Some(embedding),
        }
    }

    async fn retriever(dir: &TempDir) -> Retriever {
        let index = VectorIndex::open(&dir.path().join("index.db")).unwrap();
        let gateway = EmbeddingGateway::new(Arc::new(FixedEmbedding(vec![1.0, 0.0, 0.0])), 8);
        let chunks = vec![
            chunk("ep", Category::Professionals, vec![1.0, 0.1, 0.0]),
            chunk("spass", Category::SkilledSemiSkilled, vec![1.0, 1.0, 0.0]),
            chunk("fdw", Category::DomesticSpecific, vec![0.0, 1.0, 0.0]),
        ];
        index
            .build(&chunks, &gateway, &RetryPolicy::no_retry(Duration::from_secs(5)), 1)
            .await
            .unwrap();
        Retriever::new(index, gateway, RetryPolicy::no_retry(Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn test_ranked_evidence() {
        let dir = TempDir::new().unwrap();
        let retriever = retriever(&dir).await;

        let evidence = retriever.retrieve("Employment Pass", 5, None).await.unwrap();

        let ids: Vec<_> = evidence.iter().map(|e| e.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["ep", "spass", "fdw"]);
        assert_eq!(
            evidence.iter().map(|e| e.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        for item in &evidence {
            assert!((0.0..=1.0).contains(&item.relevance_score));
        }
        assert_eq!(evidence[2].relevance_score, 0.5);
    }

    #[tokio::test]
    async fn test_category_hint_filters() {
        let dir = TempDir::new().unwrap();
        let retriever = retriever(&dir).await;

        let evidence = retriever
            .retrieve("S Pass quota", 5, Some(Category::SkilledSemiSkilled))
            .await
            .unwrap();
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].chunk.id, "spass");

        let empty = retriever
            .retrieve("students", 5, Some(Category::StudentsTraineesDependants))
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_k_limits_results() {
        let dir = TempDir::new().unwrap();
        let retriever = retriever(&dir).await;
        assert_eq!(retriever.retrieve("pass", 2, None).await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_queries() {
        let dir = TempDir::new().unwrap();
        let retriever = retriever(&dir).await;

        let queries = (0..8).map(|_| {
            let retriever = retriever.clone();
            async move { retriever.retrieve("Employment Pass", 3, None).await }
        });
        let results = futures::future::join_all(queries).await;

        for result in results {
            let evidence = result.unwrap();
            assert_eq!(evidence.len(), 3);
            assert_eq!(evidence[0].chunk.id, "ep");
        }
    }

    #[tokio::test]
    async fn test_never_built_index() {
        let dir = TempDir::new().unwrap();
        let index = VectorIndex::open(&dir.path().join("index.db")).unwrap();
        let gateway = EmbeddingGateway::new(Arc::new(HashingEmbedding::new(16)), 8);
        let retriever = Retriever::new(index, gateway, RetryPolicy::default());

        assert!(matches!(
            retriever.retrieve("Employment Pass", 5, None).await,
            Err(RagError::IndexNotBuilt { .. })
        ));
    }
}
