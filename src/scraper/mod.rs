//! 웹 스크래퍼 모듈 - MOM 페이지 → RawDocument
//!
//! 주어진 URL 목록만 가져옵니다. 링크를 따라가지 않습니다.

use std::time::Duration;

use anyhow::{Context, Result};
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use crate::knowledge::{Category, RawDocument};

/// MOM 기본 URL
pub const MOM_BASE_URL: &str = "https://www.mom.gov.sg";

/// 본문 텍스트에서 제외할 요소
const SKIP_ELEMENTS: &[&str] = &["script", "style", "nav", "footer", "header", "noscript"];

/// 요청 사이 대기 시간
const DEFAULT_DELAY: Duration = Duration::from_secs(1);

/// 카테고리가 정해진 시드 페이지
#[derive(Debug, Clone, Copy)]
pub struct SeedPage {
    pub path: &'static str,
    pub category: Category,
}

impl SeedPage {
    pub fn url(&self) -> String {
        format!("{}{}", MOM_BASE_URL, self.path)
    }
}

/// MOM Work Pass 페이지 목록
pub const DEFAULT_SEED_PAGES: &[SeedPage] = &[
    SeedPage { path: "/passes-and-permits/employment-pass", category: Category::Professionals },
    SeedPage { path: "/passes-and-permits/personalised-employment-pass", category: Category::Professionals },
    SeedPage { path: "/passes-and-permits/entrepass", category: Category::Professionals },
    SeedPage { path: "/passes-and-permits/s-pass", category: Category::SkilledSemiSkilled },
    SeedPage { path: "/passes-and-permits/work-permit-for-foreign-worker", category: Category::SkilledSemiSkilled },
    SeedPage { path: "/passes-and-permits/work-permit-for-foreign-domestic-worker", category: Category::DomesticSpecific },
    SeedPage { path: "/passes-and-permits/work-permit-for-performing-artiste", category: Category::DomesticSpecific },
    SeedPage { path: "/passes-and-permits/work-permit-for-confinement-nanny", category: Category::DomesticSpecific },
    SeedPage { path: "/passes-and-permits/training-employment-pass", category: Category::StudentsTraineesDependants },
    SeedPage { path: "/passes-and-permits/work-holiday-pass-under-work-holiday-programme", category: Category::StudentsTraineesDependants },
    SeedPage { path: "/passes-and-permits/dependants-pass", category: Category::StudentsTraineesDependants },
    SeedPage { path: "/passes-and-permits/long-term-visit-pass", category: Category::StudentsTraineesDependants },
];

/// 웹 스크래퍼
pub struct WebScraper {
    client: reqwest::Client,
    delay: Duration,
}

impl WebScraper {
    /// 새 스크래퍼 생성
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("workpass-rag/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("HTTP 클라이언트 생성 실패")?;

        Ok(Self {
            client,
            delay: DEFAULT_DELAY,
        })
    }

    /// 요청 간 대기 시간 변경
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// URL 하나를 RawDocument로 (카테고리 미지정)
    pub async fn scrape(&self, url: &str) -> Result<RawDocument> {
        let parsed = Url::parse(url).with_context(|| format!("잘못된 URL: {}", url))?;
        tracing::info!("Scraping: {}", parsed);

        let response = self
            .client
            .get(parsed.clone())
            .send()
            .await
            .context("HTTP 요청 실패")?
            .error_for_status()
            .context("HTTP 오류 응답")?;

        let html = response.text().await.context("응답 본문 읽기 실패")?;
        Ok(parse_page(parsed.as_str(), &html))
    }

    /// URL 목록 스크랩 (실패한 페이지는 건너뜀)
    pub async fn scrape_all(&self, urls: &[String]) -> Vec<RawDocument> {
        let pages: Vec<(String, Category)> = urls
            .iter()
            .map(|u| (u.clone(), Category::Unclassified))
            .collect();
        self.scrape_pages(&pages).await
    }

    /// 시드 페이지 스크랩 (시드의 카테고리를 문서에 지정)
    pub async fn scrape_seeds(&self, seeds: &[SeedPage]) -> Vec<RawDocument> {
        let pages: Vec<(String, Category)> = seeds.iter().map(|s| (s.url(), s.category)).collect();
        self.scrape_pages(&pages).await
    }

    async fn scrape_pages(&self, pages: &[(String, Category)]) -> Vec<RawDocument> {
        let mut documents = Vec::with_capacity(pages.len());
        let mut seen = std::collections::HashSet::new();

        for (i, (url, category)) in pages.iter().enumerate() {
            if !seen.insert(url.as_str()) {
                continue;
            }
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            match self.scrape(url).await {
                Ok(doc) => documents.push(doc.with_category(*category)),
                Err(e) => tracing::warn!("Failed to scrape {}: {:#}", url, e),
            }
        }

        tracing::info!("Scraped {}/{} pages", documents.len(), pages.len());
        documents
    }
}

// ============================================================================
// HTML Parsing
// ============================================================================

/// HTML → RawDocument
pub fn parse_page(url: &str, html: &str) -> RawDocument {
    let document = Html::parse_document(html);
    let title = extract_title(&document).unwrap_or_else(|| url.to_string());
    let text = extract_content(&document);
    RawDocument::new(url, title, text)
}

/// 제목 추출 (<title> → <h1>)
fn extract_title(document: &Html) -> Option<String> {
    for selector_str in ["title", "h1"] {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                let title = element.text().collect::<String>().trim().to_string();
                if !title.is_empty() {
                    return Some(title);
                }
            }
        }
    }
    None
}

/// 본문 추출
///
/// 우선순위: main > article > 콘텐츠 영역 > body
fn extract_content(document: &Html) -> String {
    let selectors = [
        "main",
        "article",
        ".content",
        ".main-content",
        "#main-content",
        ".page-content",
        "body",
    ];

    for selector_str in selectors {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                let text = extract_text_from_element(&element);
                if !text.is_empty() {
                    return text;
                }
            }
        }
    }

    String::new()
}

/// 요소에서 텍스트 추출 (텍스트 노드마다 줄바꿈, 스크립트/내비게이션 제외)
fn extract_text_from_element(element: &ElementRef) -> String {
    let mut lines = Vec::new();

    for node in element.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let skipped = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map_or(false, |e| SKIP_ELEMENTS.contains(&e.name()))
        });
        if skipped {
            continue;
        }

        let trimmed = text.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }

    lines.join("\n")
}
