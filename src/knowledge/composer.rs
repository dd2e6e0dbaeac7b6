//! Answer Composer - 근거 기반 프롬프트 구성 + 답변 생성 + 출처 정리

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use regex::Regex;

use crate::error::{RagError, Result};
use crate::generation::{GenerationProvider, GenerationRequest};
use crate::retry::RetryPolicy;

use super::types::{Answer, Citation, EvidenceItem, UserProfile};

/// 근거가 없을 때의 고정 답변
pub const NO_EVIDENCE_ANSWER: &str = "I couldn't find relevant information about this in the \
official Ministry of Manpower (MOM) sources I have indexed. Please check the official MOM \
website (https://www.mom.gov.sg) for the latest details.";

/// 기본 생성 온도
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

const SYSTEM_PROMPT: &str = "You are a helpful assistant that provides accurate information \
about Singapore work passes based on official Ministry of Manpower (MOM) sources.

Answer ONLY from the numbered context passages you are given. If the answer is not in the \
context, say so clearly and suggest the user visit the official MOM website for more \
information. Do not invent eligibility rules, salaries, fees or deadlines.

When you use a passage, cite it with its number in square brackets, e.g. [1].";

/// 답변 생성기
#[derive(Clone)]
pub struct AnswerComposer {
    generator: Arc<dyn GenerationProvider>,
    retry: RetryPolicy,
    temperature: f32,
}

impl AnswerComposer {
    pub fn new(generator: Arc<dyn GenerationProvider>, retry: RetryPolicy) -> Self {
        Self {
            generator,
            retry,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// 답변 생성
    ///
    /// 근거가 비어 있으면 생성기를 호출하지 않고 고정 답변을 돌려줍니다.
    pub async fn compose(
        &self,
        query: &str,
        evidence: &[EvidenceItem],
        profile: Option<&UserProfile>,
    ) -> Result<Answer> {
        if evidence.is_empty() {
            tracing::info!("No evidence for query, returning fallback answer");
            return Ok(Answer {
                text: NO_EVIDENCE_ANSWER.to_string(),
                citations: vec![],
                evidence_used: vec![],
            });
        }

        let mut ordered = evidence.to_vec();
        ordered.sort_by_key(|e| e.rank);

        let prompt = build_prompt(query, &ordered, profile);
        let request = GenerationRequest {
            system: SYSTEM_PROMPT,
            prompt: &prompt,
            temperature: self.temperature,
        };

        let text = self
            .retry
            .run("answer generation", RagError::GenerationProvider, || async {
                self.generator
                    .generate(&request)
                    .await
                    .map_err(RagError::generation)
            })
            .await?;

        let citations = collect_citations(&text, &ordered);
        tracing::info!(
            "Composed answer from {} evidence items ({} sources)",
            ordered.len(),
            citations.len()
        );

        Ok(Answer {
            text: text.trim().to_string(),
            citations,
            evidence_used: ordered,
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 프로필 제약 + 번호 붙은 근거 + 질문
pub fn build_prompt(query: &str, evidence: &[EvidenceItem], profile: Option<&UserProfile>) -> String {
    let mut prompt = String::new();

    if let Some(profile) = profile.filter(|p| !p.is_empty()) {
        prompt.push_str("User profile (treat as constraints when answering):\n");
        if let Some(nationality) = profile.nationality.as_deref().filter(|n| !n.trim().is_empty()) {
            let _ = writeln!(prompt, "- Nationality: {}", nationality.trim());
        }
        if let Some(salary) = profile.monthly_salary {
            let _ = writeln!(prompt, "- Monthly salary: SGD {:.0}", salary);
        }
        if let Some(pass) = profile.current_pass_type {
            let _ = writeln!(prompt, "- Current pass: {}", pass.display_name());
        }
        prompt.push('\n');
    }

    prompt.push_str("Context from MOM sources:\n\n");
    for (i, item) in evidence.iter().enumerate() {
        let chunk = &item.chunk;
        let title = if chunk.title.trim().is_empty() {
            "Untitled"
        } else {
            chunk.title.trim()
        };
        let _ = writeln!(
            prompt,
            "[{}] {} - {} ({})\n{}\n",
            i + 1,
            title,
            chunk.source_url,
            chunk.category.display_name(),
            chunk.text
        );
    }

    let _ = write!(
        prompt,
        "Question: {}\n\n\
         Provide a clear, accurate, and helpful answer based on the context above. \
         If relevant, mention the specific pass type(s) and include key details like \
         eligibility requirements, application process, or fees if mentioned in the context.\n\n\
         Answer:",
        query.trim()
    );

    prompt
}

/// 출처 목록
///
/// 답변에서 `[n]`으로 참조된 소스가 첫 참조 순서대로 먼저 오고,
/// 나머지 소스는 순위 순서로 뒤따릅니다. source_url당 하나.
pub fn collect_citations(text: &str, evidence: &[EvidenceItem]) -> Vec<Citation> {
    let referenced: Vec<&EvidenceItem> = match Regex::new(r"\[(\d+)\]") {
        Ok(marker) => marker
            .captures_iter(text)
            .filter_map(|caps| caps.get(1)?.as_str().parse::<usize>().ok())
            .filter_map(|n| evidence.get(n.checked_sub(1)?))
            .collect(),
        Err(_) => Vec::new(),
    };

    let mut seen: HashSet<&str> = HashSet::new();
    referenced
        .into_iter()
        .chain(evidence)
        .filter(|item| seen.insert(item.chunk.source_url.as_str()))
        .map(|item| Citation {
            source_url: item.chunk.source_url.clone(),
            title: item.chunk.title.clone(),
            category: item.chunk.category,
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
