//! 벡터 유틸리티 - 유사도, 직렬화, 메타데이터 필터

use serde::{Deserialize, Serialize};

use super::types::{Category, Chunk};

// ============================================================================
// Types
// ============================================================================

/// 인덱스 검색 결과
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// 코사인 유사도 (-1.0 ~ 1.0, 높을수록 유사)
    pub similarity: f32,
}

/// 메타데이터 필터
///
/// 지정된 조건은 모두 만족해야 합니다 (AND).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub category: Option<Category>,
    pub source_url: Option<String>,
}

impl MetadataFilter {
    pub fn category(category: Category) -> Self {
        Self {
            category: Some(category),
            ..Default::default()
        }
    }

    pub fn source_url(url: impl Into<String>) -> Self {
        Self {
            source_url: Some(url.into()),
            ..Default::default()
        }
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 영벡터면 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// 코사인 유사도(-1 ~ 1) → 관련도(0 ~ 1)
///
/// 단조 증가 변환이므로 순위는 유사도 순위와 같습니다.
/// 인덱스의 유사도 하한도 이 척도에서 비교합니다 (0.0 = 하한 없음).
pub fn normalize_similarity(similarity: f32) -> f32 {
    ((similarity + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// 임베딩 → BLOB (little-endian f32)
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// BLOB → 임베딩
pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_embedding_blob_layout() {
        let v = vec![0.5f32, -1.25, 3.0];
        let bytes = encode_embedding(&v);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..4], &0.5f32.to_le_bytes());
        assert_eq!(decode_embedding(&bytes), v);
    }

    #[test]
    fn test_normalize_similarity() {
        assert_eq!(normalize_similarity(1.0), 1.0);
        assert_eq!(normalize_similarity(-1.0), 0.0);
        assert_eq!(normalize_similarity(0.0), 0.5);
        assert_eq!(normalize_similarity(2.0), 1.0);
    }
}
