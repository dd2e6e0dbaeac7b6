//! Vector Index - rusqlite 기반 청크 + 임베딩 저장소
//!
//! 저장 위치: `<data_dir>/index.db`
//!
//! - `chunks` 테이블: 청크 텍스트, 메타데이터, 임베딩(BLOB, little-endian f32)
//! - `index_meta` 테이블: `built_at`, `dimension`, `embedding_model`
//!
//! 검색은 전체 스캔 + 정확한 코사인 유사도로 수행합니다 (top-k, 동점은 id 오름차순).
//! 쓰기는 단일 writer 연결, 읽기는 호출마다 별도의 읽기 전용 연결(WAL)을 사용합니다.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;

use crate::embedding::EmbeddingGateway;
use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

use super::types::{Category, Chunk, PassType};
use super::vector::{
    cosine_similarity, decode_embedding, encode_embedding, normalize_similarity, MetadataFilter,
    ScoredChunk,
};

const META_BUILT_AT: &str = "built_at";
const META_DIMENSION: &str = "dimension";
const META_MODEL: &str = "embedding_model";

// ============================================================================
// Types
// ============================================================================

/// 빌드 결과
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    /// 저장(업서트)된 청크 수
    pub chunks_indexed: usize,
    /// 이번 빌드에서 새로 임베딩한 청크 수
    pub embedded: usize,
    /// 기존 임베딩을 재사용한 청크 수
    pub reused: usize,
    /// 재빌드된 소스에서 제거된 오래된 청크 수
    pub pruned: usize,
    pub batches: usize,
    pub dimension: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// 인덱스 상태
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub db_path: PathBuf,
    pub chunk_count: usize,
    pub source_count: usize,
    pub dimension: Option<usize>,
    pub embedding_model: Option<String>,
    pub built_at: Option<DateTime<Utc>>,
}

impl IndexStats {
    pub fn is_built(&self) -> bool {
        self.built_at.is_some()
    }
}

/// 빌드 플래그 해제 가드
struct BuildGuard<'a>(&'a AtomicBool);

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// VectorIndex
// ============================================================================

/// SQLite 벡터 인덱스
#[derive(Clone)]
pub struct VectorIndex {
    writer: Arc<Mutex<Connection>>,
    db_path: PathBuf,
    similarity_floor: f32,
    building: Arc<AtomicBool>,
}

impl VectorIndex {
    /// 인덱스 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // WAL: 빌드 중에도 읽기 연결이 블로킹되지 않음
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        tracing::debug!("SQLite journal mode: {}", mode);

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                source_url TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                text TEXT NOT NULL,
                category TEXT NOT NULL,
                pass_type TEXT,
                position INTEGER NOT NULL,
                embedding BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_url);
            CREATE INDEX IF NOT EXISTS idx_chunks_category ON chunks(category);
            CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        tracing::debug!("Vector index opened at {:?}", path);

        Ok(Self {
            writer: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
            similarity_floor: 0.0,
            building: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 이미 존재하는 인덱스만 열기
    ///
    /// 파일이 없으면 `IndexNotBuilt`.
    pub fn open_existing(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RagError::IndexNotBuilt {
                path: path.to_path_buf(),
            });
        }
        Self::open(path)
    }

    /// 관련도 하한 설정 (0 ~ 1 척도, 이 값 미만은 검색 결과에서 제외)
    ///
    /// 기본값 0.0은 하한 없음입니다.
    pub fn with_similarity_floor(mut self, floor: f32) -> Self {
        self.similarity_floor = floor;
        self
    }

    pub fn similarity_floor(&self) -> f32 {
        self.similarity_floor
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn writer(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 읽기 전용 연결
    fn reader(&self) -> Result<Connection> {
        if !self.db_path.exists() {
            return Err(self.not_built());
        }
        Ok(Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?)
    }

    fn not_built(&self) -> RagError {
        RagError::IndexNotBuilt {
            path: self.db_path.clone(),
        }
    }

    // ------------------------------------------------------------------------
    // Build
    // ------------------------------------------------------------------------

    /// 청크 임베딩 + 업서트
    ///
    /// 임베딩이 없는(또는 차원이 맞지 않는) 청크만 임베딩합니다.
    /// 배치는 최대 `concurrency`개가 병렬로 임베딩되고, 원래 순서대로 저장됩니다.
    /// 배치마다 별도 트랜잭션이므로 중간에 실패해도 앞선 배치는 남습니다.
    /// 전체가 성공하면 재빌드된 소스의 오래된 청크를 정리하고 `built_at`을 기록합니다.
    ///
    /// 임베딩 차원이 기존 인덱스와 다르면 모든 배치를 먼저 임베딩한 뒤
    /// 한 트랜잭션에서 기존 인덱스를 교체합니다. 실패하면 기존 인덱스가 그대로 남습니다.
    ///
    /// 동시 빌드 거부(`BuildInProgress`)는 같은 `VectorIndex`(및 그 clone) 안에서만
    /// 보장됩니다. 같은 파일을 따로 연 인스턴스나 다른 프로세스의 빌드는 막지 못하며,
    /// 이 경우 SQLite 쓰기 잠금으로 트랜잭션 단위로만 직렬화됩니다.
    pub async fn build(
        &self,
        chunks: &[Chunk],
        gateway: &EmbeddingGateway,
        retry: &RetryPolicy,
        concurrency: usize,
    ) -> Result<BuildReport> {
        self.building
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| RagError::BuildInProgress)?;
        let _guard = BuildGuard(&self.building);

        let start = Instant::now();
        let dimension = gateway.dimension();
        let replacing = self.dimension_changed(dimension)?;

        let batches: Vec<Vec<Chunk>> = chunks
            .chunks(gateway.batch_size())
            .map(|b| b.to_vec())
            .collect();
        let total_batches = batches.len();

        tracing::info!(
            "Building index: {} chunks in {} batches (concurrency {})",
            chunks.len(),
            total_batches,
            concurrency.max(1)
        );

        let mut report = BuildReport {
            batches: total_batches,
            dimension,
            ..Default::default()
        };

        let mut embedded = stream::iter(batches)
            .map(|batch| embed_missing(batch, gateway, retry, dimension))
            .buffered(concurrency.max(1));

        let mut staged: Vec<Chunk> = Vec::new();
        let mut done = 0;
        while let Some(result) = embedded.next().await {
            let (batch, newly_embedded) = match result {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(
                        "Index build aborted after {}/{} batches ({} chunks stored): {}",
                        done,
                        total_batches,
                        if replacing { 0 } else { report.chunks_indexed },
                        e
                    );
                    return Err(e);
                }
            };

            done += 1;
            report.chunks_indexed += batch.len();
            report.embedded += newly_embedded;
            report.reused += batch.len() - newly_embedded;
            if replacing {
                staged.extend(batch);
                tracing::debug!("Staged batch {}/{}", done, total_batches);
            } else {
                self.upsert(&batch)?;
                tracing::debug!("Stored batch {}/{}", done, total_batches);
            }
        }

        if replacing {
            self.replace_all(&staged)?;
        }
        report.pruned = self.prune_stale(chunks)?;
        self.write_meta(dimension, gateway.model())?;
        report.elapsed = start.elapsed();

        if chunks.is_empty() {
            tracing::warn!("Index built with no chunks");
        }
        tracing::info!(
            "Index built: {} chunks ({} embedded, {} reused, {} pruned) in {:.2?}",
            report.chunks_indexed,
            report.embedded,
            report.reused,
            report.pruned,
            report.elapsed
        );

        Ok(report)
    }

    /// 저장된 차원과 새 임베딩 차원이 다른지
    fn dimension_changed(&self, dimension: usize) -> Result<bool> {
        let conn = self.writer();
        let stored = read_meta(&conn, META_DIMENSION)?.and_then(|v| v.parse::<usize>().ok());

        match stored {
            Some(stored) if stored != dimension => {
                tracing::warn!(
                    "Embedding dimension changed ({} -> {}), existing index will be replaced",
                    stored,
                    dimension
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// 배치 1개 업서트 (단일 트랜잭션)
    fn upsert(&self, batch: &[Chunk]) -> Result<()> {
        let mut conn = self.writer();
        let tx = conn.transaction()?;
        insert_chunks(&tx, batch)?;
        tx.commit()?;
        Ok(())
    }

    /// 기존 청크와 메타데이터를 지우고 새 청크로 교체 (단일 트랜잭션)
    fn replace_all(&self, chunks: &[Chunk]) -> Result<()> {
        let mut conn = self.writer();
        let tx = conn.transaction()?;
        tx.execute_batch("DELETE FROM chunks; DELETE FROM index_meta;")?;
        insert_chunks(&tx, chunks)?;
        tx.commit()?;
        tracing::info!("Replaced index contents with {} chunks", chunks.len());
        Ok(())
    }

    /// 재빌드된 소스 중 새 청크 집합에 없는 행 삭제
    fn prune_stale(&self, chunks: &[Chunk]) -> Result<usize> {
        let sources: BTreeSet<&str> = chunks.iter().map(|c| c.source_url.as_str()).collect();
        let keep: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();

        let mut conn = self.writer();
        let tx = conn.transaction()?;
        let mut pruned = 0;
        {
            let mut select = tx.prepare("SELECT id FROM chunks WHERE source_url = ?1")?;
            let mut delete = tx.prepare("DELETE FROM chunks WHERE id = ?1")?;

            for source in sources {
                let ids: Vec<String> = select
                    .query_map(params![source], |row| row.get(0))?
                    .collect::<std::result::Result<_, _>>()?;
                for id in ids.iter().filter(|id| !keep.contains(id.as_str())) {
                    pruned += delete.execute(params![id])?;
                }
            }
        }
        tx.commit()?;

        if pruned > 0 {
            tracing::info!("Pruned {} stale chunks", pruned);
        }
        Ok(pruned)
    }

    fn write_meta(&self, dimension: usize, model: &str) -> Result<()> {
        let mut conn = self.writer();
        let tx = conn.transaction()?;
        for (key, value) in [
            (META_BUILT_AT, Utc::now().to_rfc3339()),
            (META_DIMENSION, dimension.to_string()),
            (META_MODEL, model.to_string()),
        ] {
            tx.execute(
                "INSERT INTO index_meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------------

    /// 유사도 검색
    ///
    /// 유사도 내림차순(동점은 id 오름차순)으로 최대 `k`개를 반환합니다.
    /// 결과 청크에는 임베딩이 포함되지 않습니다.
    pub fn query(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredChunk>> {
        let conn = self.reader()?;
        let dimension = built_dimension(&conn)?.ok_or_else(|| self.not_built())?;

        if query_vector.len() != dimension {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual: query_vector.len(),
            });
        }
        if k == 0 {
            return Ok(vec![]);
        }

        let category = filter.and_then(|f| f.category).map(|c| c.as_str());
        let source_url = filter.and_then(|f| f.source_url.as_deref());

        let mut stmt = conn.prepare(
            "SELECT id, source_url, title, text, category, pass_type, position, embedding
             FROM chunks
             WHERE (?1 IS NULL OR category = ?1) AND (?2 IS NULL OR source_url = ?2)",
        )?;

        let rows = stmt.query_map(params![category, source_url], |row| {
            let embedding: Vec<u8> = row.get(7)?;
            Ok((row_to_chunk(row)?, embedding))
        })?;

        let mut scored = Vec::new();
        for row in rows {
            let (chunk, embedding) = row?;
            let similarity = cosine_similarity(query_vector, &decode_embedding(&embedding));
            if normalize_similarity(similarity) >= self.similarity_floor {
                scored.push(ScoredChunk { chunk, similarity });
            }
        }

        scored.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        scored.truncate(k);

        tracing::debug!("Vector query returned {} results", scored.len());
        Ok(scored)
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// 빌드가 한 번이라도 완료되었는지
    pub fn is_built(&self) -> Result<bool> {
        match self.reader() {
            Ok(conn) => Ok(read_meta(&conn, META_BUILT_AT)?.is_some()),
            Err(RagError::IndexNotBuilt { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// 저장된 청크 수
    pub fn count(&self) -> Result<usize> {
        let conn = self.reader()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// 카테고리별 청크 수
    pub fn category_counts(&self) -> Result<BTreeMap<Category, usize>> {
        let conn = self.built_reader()?;
        let mut stmt = conn.prepare("SELECT category, COUNT(*) FROM chunks GROUP BY category")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (category, count) = row?;
            let category = category.parse().unwrap_or_default();
            *counts.entry(category).or_insert(0) += count as usize;
        }
        Ok(counts)
    }

    /// 인덱스에 등장하는 패스 종류와 청크 수 (표시 이름 순)
    pub fn pass_types(&self) -> Result<Vec<(PassType, usize)>> {
        let conn = self.built_reader()?;
        let mut stmt = conn.prepare(
            "SELECT pass_type, COUNT(*) FROM chunks
             WHERE pass_type IS NOT NULL
             GROUP BY pass_type ORDER BY pass_type",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut pass_types = Vec::new();
        for row in rows {
            let (name, count) = row?;
            if let Ok(pass_type) = name.parse::<PassType>() {
                pass_types.push((pass_type, count as usize));
            }
        }
        Ok(pass_types)
    }

    /// 인덱스 상태 (빌드 전에도 사용 가능)
    pub fn stats(&self) -> Result<IndexStats> {
        let mut stats = IndexStats {
            db_path: self.db_path.clone(),
            chunk_count: 0,
            source_count: 0,
            dimension: None,
            embedding_model: None,
            built_at: None,
        };

        let conn = match self.reader() {
            Ok(conn) => conn,
            Err(RagError::IndexNotBuilt { .. }) => return Ok(stats),
            Err(e) => return Err(e),
        };

        let (chunks, sources): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT source_url) FROM chunks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        stats.chunk_count = chunks as usize;
        stats.source_count = sources as usize;
        stats.dimension = read_meta(&conn, META_DIMENSION)?.and_then(|v| v.parse().ok());
        stats.embedding_model = read_meta(&conn, META_MODEL)?;
        stats.built_at = read_meta(&conn, META_BUILT_AT)?
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(stats)
    }

    /// 빌드 완료된 인덱스의 읽기 연결
    fn built_reader(&self) -> Result<Connection> {
        let conn = self.reader()?;
        if read_meta(&conn, META_BUILT_AT)?.is_none() {
            return Err(self.not_built());
        }
        Ok(conn)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 배치 내 임베딩이 필요한 청크만 임베딩 (재시도 정책 적용)
async fn embed_missing(
    mut batch: Vec<Chunk>,
    gateway: &EmbeddingGateway,
    retry: &RetryPolicy,
    dimension: usize,
) -> Result<(Vec<Chunk>, usize)> {
    let missing: Vec<usize> = batch
        .iter()
        .enumerate()
        .filter(|(_, c)| c.embedding.as_ref().map_or(true, |e| e.len() != dimension))
        .map(|(i, _)| i)
        .collect();

    if missing.is_empty() {
        return Ok((batch, 0));
    }

    let texts: Vec<String> = missing.iter().map(|&i| batch[i].text.clone()).collect();
    let vectors = retry
        .run("embedding batch", RagError::EmbeddingProvider, || {
            gateway.embed_batch(&texts)
        })
        .await?;

    for (&i, vector) in missing.iter().zip(vectors) {
        if vector.len() != dimension {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }
        batch[i].embedding = Some(vector);
    }

    Ok((batch, missing.len()))
}

/// 청크 행 업서트 (호출자의 트랜잭션 안에서)
fn insert_chunks(tx: &rusqlite::Transaction<'_>, chunks: &[Chunk]) -> Result<()> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO chunks (id, source_url, title, text, category, pass_type, position, embedding)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            source_url = excluded.source_url,
            title = excluded.title,
            text = excluded.text,
            category = excluded.category,
            pass_type = excluded.pass_type,
            position = excluded.position,
            embedding = excluded.embedding",
    )?;

    for chunk in chunks {
        let embedding = chunk.embedding.as_deref().unwrap_or_default();
        stmt.execute(params![
            chunk.id,
            chunk.source_url,
            chunk.title,
            chunk.text,
            chunk.category.as_str(),
            chunk.pass_type.map(|p| p.display_name()),
            chunk.position as i64,
            encode_embedding(embedding),
        ])?;
    }
    Ok(())
}

fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM index_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

/// 빌드 완료 시 기록된 차원 (빌드 전이면 None)
fn built_dimension(conn: &Connection) -> Result<Option<usize>> {
    if read_meta(conn, META_BUILT_AT)?.is_none() {
        return Ok(None);
    }
    Ok(read_meta(conn, META_DIMENSION)?.and_then(|v| v.parse().ok()))
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let category: String = row.get(4)?;
    let pass_type: Option<String> = row.get(5)?;
    let position: i64 = row.get(6)?;

    Ok(Chunk {
        id: row.get(0)?,
        source_url: row.get(1)?,
        title: row.get(2)?,
        text: row.get(3)?,
        category: category.parse().unwrap_or_default(),
        pass_type: pass_type.and_then(|p| p.parse().ok()),
        position: position as usize,
        embedding: None,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingProvider, HashingEmbedding};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn chunk(id: &str, source: &str, category: Category, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: id.to_string(),
            source_url: source.to_string(),
            title: format!("Title {}", id),
            text: format!("text of {}", id),
            category,
            pass_type: None,
            position: 0,
            embedding: Some(embedding),
        }
    }

    /// 3차원 벡터 10개: i가 커질수록 [1,0,0]에서 멀어짐
    fn ten_chunks() -> Vec<Chunk> {
        (0..10)
            .map(|i| {
                let category = if i % 2 == 0 {
                    Category::Professionals
                } else {
                    Category::SkilledSemiSkilled
                };
                chunk(
                    &format!("c{:02}", i),
                    &format!("https://www.mom.gov.sg/page{}", i % 3),
                    category,
                    vec![1.0, i as f32 * 0.2, 0.0],
                )
            })
            .collect()
    }

    fn gateway(dimension: usize) -> EmbeddingGateway {
        EmbeddingGateway::new(Arc::new(HashingEmbedding::new(dimension)), 4)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    async fn built_index(dir: &TempDir, chunks: &[Chunk]) -> VectorIndex {
        let index = VectorIndex::open(&dir.path().join("index.db")).unwrap();
        index
            .build(chunks, &gateway(3), &fast_retry(), 2)
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_top_k_bounds_and_order() {
        let dir = TempDir::new().unwrap();
        let index = built_index(&dir, &ten_chunks()).await;

        let top3 = index.query(&[1.0, 0.0, 0.0], 3, None).unwrap();
        let ids: Vec<_> = top3.iter().map(|s| s.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["c00", "c01", "c02"]);

        let all = index.query(&[1.0, 0.0, 0.0], 20, None).unwrap();
        assert_eq!(all.len(), 10);
        for pair in all.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
        assert!(all[0].chunk.embedding.is_none());
    }

    #[tokio::test]
    async fn test_ties_broken_by_id() {
        let dir = TempDir::new().unwrap();
        let chunks = vec![
            chunk("b", "https://a", Category::Professionals, vec![1.0, 1.0, 0.0]),
            chunk("a", "https://a", Category::Professionals, vec![1.0, 1.0, 0.0]),
            chunk("c", "https://a", Category::Professionals, vec![1.0, 1.0, 0.0]),
        ];
        let index = built_index(&dir, &chunks).await;

        let results = index.query(&[1.0, 1.0, 0.0], 3, None).unwrap();
        let ids: Vec<_> = results.iter().map(|s| s.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_category_filter() {
        let dir = TempDir::new().unwrap();
        let index = built_index(&dir, &ten_chunks()).await;

        let filter = MetadataFilter::category(Category::SkilledSemiSkilled);
        let results = index.query(&[1.0, 0.0, 0.0], 10, Some(&filter)).unwrap();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|s| s.chunk.category == Category::SkilledSemiSkilled));

        let none = MetadataFilter::category(Category::DomesticSpecific);
        assert!(index.query(&[1.0, 0.0, 0.0], 10, Some(&none)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_source_url_filter() {
        let dir = TempDir::new().unwrap();
        let index = built_index(&dir, &ten_chunks()).await;

        let filter = MetadataFilter::source_url("https://www.mom.gov.sg/page0");
        let results = index.query(&[1.0, 0.0, 0.0], 10, Some(&filter)).unwrap();
        let mut ids: Vec<_> = results.iter().map(|s| s.chunk.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["c00", "c03", "c06", "c09"]);

        // 두 조건은 AND
        let both = MetadataFilter {
            category: Some(Category::Professionals),
            ..filter
        };
        let results = index.query(&[1.0, 0.0, 0.0], 10, Some(&both)).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_default_floor_keeps_negative_similarity() {
        let dir = TempDir::new().unwrap();
        let chunks = vec![
            chunk("same", "https://a", Category::Professionals, vec![1.0, 0.0, 0.0]),
            chunk("opposite", "https://a", Category::Professionals, vec![-1.0, 0.0, 0.0]),
        ];
        let index = built_index(&dir, &chunks).await;

        let results = index.query(&[1.0, 0.0, 0.0], 10, None).unwrap();
        let ids: Vec<_> = results.iter().map(|s| s.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["same", "opposite"]);
        assert!(results[1].similarity < -0.99);
    }

    #[tokio::test]
    async fn test_k_larger_than_index_returns_every_chunk() {
        let dir = TempDir::new().unwrap();
        // 절반 이상이 쿼리와 음의 유사도
        let chunks: Vec<Chunk> = (0..10)
            .map(|i| {
                chunk(
                    &format!("n{:02}", i),
                    "https://www.mom.gov.sg/mixed",
                    Category::Professionals,
                    vec![1.0 - 0.3 * i as f32, 1.0, 0.0],
                )
            })
            .collect();
        let index = built_index(&dir, &chunks).await;

        let results = index.query(&[1.0, 0.0, 0.0], 20, None).unwrap();
        assert_eq!(results.len(), 10);
        assert!(results.iter().any(|s| s.similarity < 0.0));
        assert_eq!(results[0].chunk.id, "n00");
    }

    #[tokio::test]
    async fn test_similarity_floor_uses_relevance_scale() {
        let dir = TempDir::new().unwrap();
        let chunks = vec![
            chunk("same", "https://a", Category::Professionals, vec![1.0, 0.0, 0.0]),
            chunk("orthogonal", "https://a", Category::Professionals, vec![0.0, 1.0, 0.0]),
            chunk("opposite", "https://a", Category::Professionals, vec![-1.0, 0.0, 0.0]),
        ];
        let index = built_index(&dir, &chunks).await;

        // 직교 벡터의 관련도는 0.5
        let index = index.with_similarity_floor(0.5);
        let ids: Vec<_> = index
            .query(&[1.0, 0.0, 0.0], 10, None)
            .unwrap()
            .into_iter()
            .map(|s| s.chunk.id)
            .collect();
        assert_eq!(ids, vec!["same", "orthogonal"]);

        let index = index.with_similarity_floor(0.9);
        assert_eq!(index.query(&[1.0, 0.0, 0.0], 10, None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_not_built_is_distinct_from_empty() {
        let dir = TempDir::new().unwrap();
        let index = VectorIndex::open(&dir.path().join("index.db")).unwrap();

        assert!(!index.is_built().unwrap());
        assert!(matches!(
            index.query(&[1.0, 0.0, 0.0], 5, None),
            Err(RagError::IndexNotBuilt { .. })
        ));

        let missing = dir.path().join("missing/index.db");
        assert!(matches!(
            VectorIndex::open_existing(&missing),
            Err(RagError::IndexNotBuilt { .. })
        ));
    }

    #[tokio::test]
    async fn test_rebuild_idempotent() {
        let dir = TempDir::new().unwrap();
        let chunks = ten_chunks();
        let index = built_index(&dir, &chunks).await;
        let before = index.query(&[1.0, 0.5, 0.0], 5, None).unwrap();

        let report = index
            .build(&chunks, &gateway(3), &fast_retry(), 2)
            .await
            .unwrap();
        let after = index.query(&[1.0, 0.5, 0.0], 5, None).unwrap();

        assert_eq!(report.chunks_indexed, 10);
        assert_eq!(report.reused, 10);
        assert_eq!(index.count().unwrap(), 10);
        let ids = |r: &[ScoredChunk]| r.iter().map(|s| s.chunk.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&before), ids(&after));
    }

    #[tokio::test]
    async fn test_rebuild_prunes_superseded_chunks() {
        let dir = TempDir::new().unwrap();
        let first = vec![
            chunk("old1", "https://a", Category::Professionals, vec![1.0, 0.0, 0.0]),
            chunk("old2", "https://a", Category::Professionals, vec![0.0, 1.0, 0.0]),
            chunk("other", "https://b", Category::Professionals, vec![0.0, 0.0, 1.0]),
        ];
        let index = built_index(&dir, &first).await;

        let second = vec![chunk("new1", "https://a", Category::Professionals, vec![1.0, 1.0, 0.0])];
        let report = index
            .build(&second, &gateway(3), &fast_retry(), 1)
            .await
            .unwrap();

        assert_eq!(report.pruned, 2);
        // 재빌드하지 않은 소스 b는 유지
        assert_eq!(index.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let dir = TempDir::new().unwrap();
        let index = built_index(&dir, &ten_chunks()).await;

        assert!(matches!(
            index.query(&[1.0, 0.0], 3, None),
            Err(RagError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_build_embeds_missing_vectors() {
        let dir = TempDir::new().unwrap();
        let index = VectorIndex::open(&dir.path().join("index.db")).unwrap();
        let mut chunks = ten_chunks();
        for c in &mut chunks {
            c.embedding = None;
        }

        let report = index
            .build(&chunks, &gateway(32), &fast_retry(), 3)
            .await
            .unwrap();

        assert_eq!(report.embedded, 10);
        assert_eq!(report.batches, 3);
        let stats = index.stats().unwrap();
        assert_eq!(stats.dimension, Some(32));
        assert_eq!(stats.embedding_model.as_deref(), Some("hashing"));
        assert_eq!(stats.source_count, 3);
        assert!(stats.is_built());
    }

    /// n번째 호출부터 실패하는 프로바이더
    struct FailAfter {
        inner: HashingEmbedding,
        calls: AtomicUsize,
        fail_from: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FailAfter {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            self.inner.embed(text).await
        }

        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.fail_from {
                anyhow::bail!("429 Too Many Requests");
            }
            self.inner.embed_batch(texts).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn name(&self) -> &str {
            "fail-after"
        }
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_earlier_batches() {
        let dir = TempDir::new().unwrap();
        let index = VectorIndex::open(&dir.path().join("index.db")).unwrap();
        let mut chunks = ten_chunks();
        for c in &mut chunks {
            c.embedding = None;
        }
        let provider = Arc::new(FailAfter {
            inner: HashingEmbedding::new(16),
            calls: AtomicUsize::new(0),
            fail_from: 1,
        });
        let gateway = EmbeddingGateway::new(provider, 4);

        let result = index.build(&chunks, &gateway, &fast_retry(), 1).await;

        assert!(matches!(result, Err(RagError::EmbeddingProvider(_))));
        assert_eq!(index.count().unwrap(), 4);
        assert!(!index.is_built().unwrap());
    }

    #[tokio::test]
    async fn test_failed_rebuild_after_dimension_change_keeps_old_index() {
        let dir = TempDir::new().unwrap();
        let first: Vec<Chunk> = ten_chunks().into_iter().take(5).collect();
        let index = built_index(&dir, &first).await;
        assert_eq!(index.count().unwrap(), 5);

        let mut second = ten_chunks();
        for c in &mut second {
            c.embedding = None;
        }
        let provider = Arc::new(FailAfter {
            inner: HashingEmbedding::new(16),
            calls: AtomicUsize::new(0),
            fail_from: 1,
        });
        let gateway = EmbeddingGateway::new(provider, 4);

        let result = index.build(&second, &gateway, &fast_retry(), 1).await;
        assert!(matches!(result, Err(RagError::EmbeddingProvider(_))));

        // 이전 빌드(3차원)가 그대로 검색 가능
        let stats = index.stats().unwrap();
        assert!(stats.is_built());
        assert_eq!(stats.chunk_count, 5);
        assert_eq!(stats.dimension, Some(3));
        assert_eq!(index.query(&[1.0, 0.0, 0.0], 10, None).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_rebuild_with_new_dimension_replaces_index() {
        let dir = TempDir::new().unwrap();
        let first = vec![
            chunk("old", "https://www.mom.gov.sg/retired", Category::Professionals, vec![1.0, 0.0, 0.0]),
            chunk("kept", "https://www.mom.gov.sg/s-pass", Category::SkilledSemiSkilled, vec![0.0, 1.0, 0.0]),
        ];
        let index = built_index(&dir, &first).await;

        // 같은 id라도 3차원 임베딩은 다시 임베딩됨
        let second = vec![chunk(
            "kept",
            "https://www.mom.gov.sg/s-pass",
            Category::SkilledSemiSkilled,
            vec![0.0, 1.0, 0.0],
        )];
        let report = index
            .build(&second, &gateway(16), &fast_retry(), 1)
            .await
            .unwrap();

        assert_eq!(report.embedded, 1);
        let stats = index.stats().unwrap();
        assert_eq!(stats.dimension, Some(16));
        assert_eq!(stats.chunk_count, 1);
        assert!(index.query(&[1.0; 16], 5, None).is_ok());
        assert!(matches!(
            index.query(&[1.0, 0.0, 0.0], 5, None),
            Err(RagError::DimensionMismatch { expected: 16, actual: 3 })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_build_rejected() {
        let dir = TempDir::new().unwrap();
        let index = VectorIndex::open(&dir.path().join("index.db")).unwrap();
        let shared = index.clone();
        index.building.store(true, Ordering::SeqCst);

        // clone은 빌드 플래그를 공유
        let result = shared.build(&ten_chunks(), &gateway(3), &fast_retry(), 1).await;
        assert!(matches!(result, Err(RagError::BuildInProgress)));

        index.building.store(false, Ordering::SeqCst);
        assert!(index.build(&ten_chunks(), &gateway(3), &fast_retry(), 1).await.is_ok());
        assert!(!index.building.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_category_and_pass_type_counts() {
        let dir = TempDir::new().unwrap();
        let mut chunks = ten_chunks();
        chunks[0].pass_type = Some(PassType::EmploymentPass);
        chunks[1].pass_type = Some(PassType::SPass);
        chunks[2].pass_type = Some(PassType::EmploymentPass);
        let index = built_index(&dir, &chunks).await;

        let counts = index.category_counts().unwrap();
        assert_eq!(counts.get(&Category::Professionals), Some(&5));
        assert_eq!(counts.get(&Category::SkilledSemiSkilled), Some(&5));

        let pass_types = index.pass_types().unwrap();
        assert_eq!(
            pass_types,
            vec![(PassType::EmploymentPass, 2), (PassType::SPass, 1)]
        );
    }
}
