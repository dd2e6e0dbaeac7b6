//! 오프라인 해싱 임베딩
//!
//! 네트워크 없이 동작하는 결정적 bag-of-words 임베딩입니다.
//! 토큰을 SHA-256으로 해싱해 차원에 누적하고 L2 정규화합니다.
//! 테스트와 API 키가 없는 환경에서 사용합니다.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::EmbeddingProvider;

/// 기본 차원
pub const DEFAULT_DIMENSION: usize = 512;

/// 의미 없는 영어 불용어
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "if", "in", "is", "it", "my", "of", "on", "or", "the", "to", "what", "when", "which",
    "who", "with", "you", "your",
];

/// 해싱 임베딩
#[derive(Debug, Clone)]
pub struct HashingEmbedding {
    dimension: usize,
}

impl HashingEmbedding {
    /// `dimension`이 0이면 기본값 사용
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: if dimension == 0 {
                DEFAULT_DIMENSION
            } else {
                dimension
            },
        }
    }

    /// 소문자 영숫자 토큰 (2자 이상, 불용어 제외)
    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .map(|t| t.to_lowercase())
            .filter(|t| t.chars().count() >= 2 && !STOPWORDS.contains(&t.as_str()))
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in Self::tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) % self.dimension as u64;
            vector[bucket as usize] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedding {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::vector::cosine_similarity;

    #[tokio::test]
    async fn test_deterministic() {
        let embedder = HashingEmbedding::new(128);
        let a = embedder.embed("Employment Pass eligibility").await.unwrap();
        let b = embedder.embed("Employment Pass eligibility").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 128);
    }

    #[tokio::test]
    async fn test_normalized() {
        let embedder = HashingEmbedding::default();
        let v = embedder.embed("S Pass quota and levy").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(embedder.dimension(), DEFAULT_DIMENSION);
    }

    #[tokio::test]
    async fn test_stopwords_only_is_zero_vector() {
        let embedder = HashingEmbedding::new(32);
        let v = embedder.embed("what is the").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_related_texts_are_closer() {
        let embedder = HashingEmbedding::new(256);
        let query = embedder.embed("Employment Pass salary").await.unwrap();
        let related = embedder
            .embed("The Employment Pass minimum salary is $5,600.")
            .await
            .unwrap();
        let unrelated = embedder
            .embed("Foreign domestic worker levy concession.")
            .await
            .unwrap();

        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }
}
