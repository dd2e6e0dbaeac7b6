//! Text Chunking Module
//!
//! 문단 > 문장 > 단어 경계 순으로 최대 크기에 가장 가까운 지점에서 텍스트를 나눕니다.
//! 인접한 청크는 정확히 `overlap_size` 문자를 공유합니다.
//!
//! 모든 길이는 바이트가 아닌 문자(char) 단위입니다.

use crate::error::{RagError, Result};

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수)
    pub max_chunk_size: usize,
    /// 인접 청크 간 오버랩 (문자 수)
    pub overlap_size: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            overlap_size: 200,
        }
    }
}

impl ChunkConfig {
    pub fn new(max_chunk_size: usize, overlap_size: usize) -> Result<Self> {
        let config = Self {
            max_chunk_size,
            overlap_size,
        };
        config.validate()?;
        Ok(config)
    }

    /// 오버랩은 최대 크기보다 작아야 청크가 전진합니다
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size == 0 {
            return Err(RagError::Config("max_chunk_size must be > 0".into()));
        }
        if self.overlap_size >= self.max_chunk_size {
            return Err(RagError::Config(format!(
                "overlap_size ({}) must be smaller than max_chunk_size ({})",
                self.overlap_size, self.max_chunk_size
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 원문 내 위치를 가진 청크 텍스트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    /// 정규화된 텍스트 기준 시작 오프셋 (문자 단위)
    pub start: usize,
    pub text: String,
}

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 정규화된 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<TextSpan>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// BoundaryChunker
// ============================================================================

/// 경계 인식 청커
///
/// 분할 지점 우선순위:
/// 1. 문단 경계 (빈 줄)
/// 2. 문장 끝 (`.`, `!`, `?` 다음 공백) 또는 줄바꿈
/// 3. 단어 경계 (공백)
/// 4. 어느 것도 없으면 (창보다 긴 토큰) 최대 크기에서 강제 분할
pub struct BoundaryChunker {
    config: ChunkConfig,
}

/// 분할 지점 등급
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakKind {
    Paragraph,
    Sentence,
    Word,
}

impl BoundaryChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// `chars[..end]`에서 끊는 것이 `kind` 경계인지
    fn is_break(chars: &[char], end: usize, kind: BreakKind) -> bool {
        let Some(&next) = chars.get(end) else {
            return false;
        };
        let prev = chars[end - 1];
        match kind {
            BreakKind::Paragraph => {
                next == '\n' && chars.get(end + 1) == Some(&'\n') && !prev.is_whitespace()
            }
            BreakKind::Sentence => {
                (matches!(prev, '.' | '!' | '?') && next.is_whitespace())
                    || (next == '\n' && !prev.is_whitespace())
            }
            BreakKind::Word => next.is_whitespace() && !prev.is_whitespace(),
        }
    }

    /// `[lo, hi]` 범위에서 가장 뒤쪽의 분할 지점 탐색
    fn find_break(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
        [BreakKind::Paragraph, BreakKind::Sentence, BreakKind::Word]
            .into_iter()
            .find_map(|kind| (lo..=hi).rev().find(|&end| Self::is_break(chars, end, kind)))
    }
}

impl Chunker for BoundaryChunker {
    fn chunk(&self, text: &str) -> Vec<TextSpan> {
        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();
        if text.trim().is_empty() {
            return vec![];
        }

        let max = self.config.max_chunk_size;
        let overlap = self.config.overlap_size;
        let mut spans = Vec::new();
        let mut start = 0;

        loop {
            if n - start <= max {
                spans.push(TextSpan {
                    start,
                    text: chars[start..].iter().collect(),
                });
                break;
            }

            // 너무 짧은 청크를 피하고, 오버랩 이후 최소 1문자는 전진
            let hi = start + max;
            let lo = (start + overlap + 1).max(start + max / 2).min(hi);
            let end = Self::find_break(&chars, lo, hi).unwrap_or(hi);

            spans.push(TextSpan {
                start,
                text: chars[start..end].iter().collect(),
            });
            start = end - overlap;
        }

        spans
    }

    fn name(&self) -> &'static str {
        "BoundaryChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 청킹 전 텍스트 정규화
///
/// - 줄 안의 연속 공백을 하나로
/// - 빈 줄 연속은 하나의 문단 경계(`\n\n`)로
/// - 앞뒤 공백 제거
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_blank = false;

    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push_str(if pending_blank { "\n\n" } else { "\n" });
        }
        out.push_str(&line);
        pending_blank = false;
    }

    out
}

/// 중복 판정용 키 (공백 단일화 + 소문자)
pub fn dedup_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ============================================================================
// Tests
// ============================================================================
