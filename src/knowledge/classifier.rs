//! 카테고리 분류 전략
//!
//! 카테고리 → 트리거 키워드 매핑으로 청크를 분류합니다.
//! 새 카테고리나 키워드는 청킹 로직과 무관하게 교체할 수 있습니다.

use regex::Regex;

use crate::error::{RagError, Result};

use super::types::{Category, PassType};

// ============================================================================
// Classifier Trait
// ============================================================================

/// 분류 전략 트레이트
pub trait Classifier: Send + Sync {
    /// 텍스트의 카테고리 판정 (매칭 없으면 `Unclassified`)
    fn classify(&self, text: &str) -> Category;

    /// 분류기 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// KeywordClassifier
// ============================================================================

/// 키워드 트리거 규칙
struct Rule {
    category: Category,
    /// (패턴, 가중치 = 키워드 길이)
    triggers: Vec<(Regex, usize)>,
}

/// 키워드 기반 분류기
///
/// 각 카테고리별로 매칭된 키워드 길이의 합을 점수로 사용합니다.
/// 긴(구체적인) 키워드가 짧은 키워드보다 우선합니다.
/// 예: "training employment pass"는 "employment pass"보다 무겁습니다.
/// 동점이면 규칙 순서가 앞선 카테고리가 이깁니다.
pub struct KeywordClassifier {
    rules: Vec<Rule>,
}

impl KeywordClassifier {
    /// 카테고리 → 키워드 목록으로 생성
    ///
    /// 키워드는 대소문자 무시, 단어 경계 기준으로 매칭됩니다.
    pub fn new<I, S>(mapping: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Category, Vec<S>)>,
        S: AsRef<str>,
    {
        let mut rules = Vec::new();

        for (category, keywords) in mapping {
            let mut triggers = Vec::with_capacity(keywords.len());
            for keyword in keywords {
                let keyword = keyword.as_ref().trim().to_lowercase();
                if keyword.is_empty() {
                    continue;
                }
                let pattern = format!(r"(?i)\b{}\b", regex::escape(&keyword));
                let re = Regex::new(&pattern).map_err(|e| {
                    RagError::Config(format!("invalid keyword '{}': {}", keyword, e))
                })?;
                triggers.push((re, keyword.chars().count()));
            }
            rules.push(Rule { category, triggers });
        }

        Ok(Self { rules })
    }

    /// MOM Work Pass 기본 매핑
    pub fn work_pass_defaults() -> Self {
        let mapping = vec![
            (
                Category::Professionals,
                vec![
                    "employment pass",
                    "personalised employment pass",
                    "personalized employment pass",
                    "entrepass",
                    "entrepreneur pass",
                    "pep",
                ],
            ),
            (
                Category::SkilledSemiSkilled,
                vec![
                    "s pass",
                    "s-pass",
                    "spass",
                    "work permit",
                    "workpermit",
                    "foreign worker",
                    "quota",
                ],
            ),
            (
                Category::DomesticSpecific,
                vec![
                    "foreign domestic worker",
                    "fdw",
                    "domestic worker",
                    "domestic helper",
                    "performing artiste",
                    "confinement nanny",
                ],
            ),
            (
                Category::StudentsTraineesDependants,
                vec![
                    "training employment pass",
                    "training pass",
                    "work holiday pass",
                    "work holiday",
                    "dependant's pass",
                    "dependant",
                    "dependent",
                    "long-term visit pass",
                    "long term visit pass",
                    "ltvp",
                ],
            ),
        ];

        // 정적 키워드이므로 실패하지 않음
        Self::new(mapping).unwrap_or_else(|e| {
            tracing::error!("Default keyword mapping rejected: {}", e);
            Self { rules: Vec::new() }
        })
    }

    /// 카테고리별 점수
    fn score(&self, text: &str) -> Vec<(Category, usize)> {
        self.rules
            .iter()
            .map(|rule| {
                let score = rule
                    .triggers
                    .iter()
                    .filter(|(re, _)| re.is_match(text))
                    .map(|(_, weight)| *weight)
                    .sum();
                (rule.category, score)
            })
            .collect()
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, text: &str) -> Category {
        let mut best: Option<(Category, usize)> = None;
        for (category, score) in self.score(text) {
            if score > 0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((category, score));
            }
        }
        best.map(|(c, _)| c).unwrap_or(Category::Unclassified)
    }

    fn name(&self) -> &'static str {
        "KeywordClassifier"
    }
}

// ============================================================================
// Pass type detection
// ============================================================================

/// URL + 제목에서 패스 종류 탐지 (없으면 None = "General")
pub fn detect_pass_type(url: &str, title: &str) -> Option<PassType> {
    let haystack = format!(" {} {} ", url, title)
        .to_lowercase()
        .replace(['-', '/', '_', '.'], " ");
    let haystack = haystack.split_whitespace().collect::<Vec<_>>().join(" ");
    let haystack = format!(" {} ", haystack);

    PassType::ALL.into_iter().find(|pass| {
        pass.trigger_terms().iter().any(|term| {
            let term = term.replace(['-', '/', '_', '.'], " ");
            haystack.contains(&format!(" {} ", term))
        })
    })
}

// ============================================================================
// Tests
// ============================================================================
