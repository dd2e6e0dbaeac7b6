//! 지식베이스 데이터 모델
//!
//! 원문 문서(RawDocument), 청크(Chunk), 검색 근거(EvidenceItem),
//! 사용자 프로필(UserProfile), 최종 답변(Answer)을 정의합니다.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Category
// ============================================================================

/// Work Pass 카테고리
///
/// MOM(Ministry of Manpower)의 패스 분류를 따릅니다.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Professionals & Executives (EP, PEP, EntrePass)
    Professionals,
    /// Skilled & Semi-Skilled Workers (S Pass, Work Permit)
    #[serde(alias = "skilled")]
    SkilledSemiSkilled,
    /// Domestic & Specific Sectors (FDW, 공연 예술가, 산후관리사)
    #[serde(alias = "domestic")]
    DomesticSpecific,
    /// Students, Trainees, Dependants
    #[serde(alias = "students")]
    StudentsTraineesDependants,
    #[default]
    Unclassified,
}

impl Category {
    /// 전체 카테고리 (분류 우선순위 순서)
    pub const ALL: [Category; 5] = [
        Category::Professionals,
        Category::SkilledSemiSkilled,
        Category::DomesticSpecific,
        Category::StudentsTraineesDependants,
        Category::Unclassified,
    ];

    /// 저장용 키 (snake_case)
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Professionals => "professionals",
            Category::SkilledSemiSkilled => "skilled_semi_skilled",
            Category::DomesticSpecific => "domestic_specific",
            Category::StudentsTraineesDependants => "students_trainees_dependants",
            Category::Unclassified => "unclassified",
        }
    }

    /// 표시용 이름
    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Professionals => "Professionals & Executives",
            Category::SkilledSemiSkilled => "Skilled & Semi-Skilled Workers",
            Category::DomesticSpecific => "Domestic & Specific Sectors",
            Category::StudentsTraineesDependants => "Students, Trainees, Dependants",
            Category::Unclassified => "Unclassified",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace(['-', ' ', '/'], "_");
        match key.as_str() {
            "professionals" | "professionals_executives" => Ok(Category::Professionals),
            "skilled" | "skilled_semi_skilled" | "skilled_semiskilled" => {
                Ok(Category::SkilledSemiSkilled)
            }
            "domestic" | "domestic_specific" => Ok(Category::DomesticSpecific),
            "students" | "students_trainees_dependants" => {
                Ok(Category::StudentsTraineesDependants)
            }
            "unclassified" | "general" => Ok(Category::Unclassified),
            _ => Err(format!(
                "unknown category '{}' (expected one of: professionals, skilled, domestic, students, unclassified)",
                s
            )),
        }
    }
}

// ============================================================================
// PassType
// ============================================================================

/// 개별 패스 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassType {
    EmploymentPass,
    PersonalisedEmploymentPass,
    EntrePass,
    SPass,
    WorkPermit,
    ForeignDomesticWorker,
    PerformingArtiste,
    ConfinementNanny,
    TrainingEmploymentPass,
    WorkHolidayPass,
    DependantsPass,
    LongTermVisitPass,
}

impl PassType {
    /// 탐지 순서 (구체적인 이름이 먼저)
    pub const ALL: [PassType; 12] = [
        PassType::TrainingEmploymentPass,
        PassType::PersonalisedEmploymentPass,
        PassType::EmploymentPass,
        PassType::EntrePass,
        PassType::SPass,
        PassType::ForeignDomesticWorker,
        PassType::PerformingArtiste,
        PassType::ConfinementNanny,
        PassType::WorkPermit,
        PassType::WorkHolidayPass,
        PassType::DependantsPass,
        PassType::LongTermVisitPass,
    ];

    /// 표시용 이름
    pub fn display_name(&self) -> &'static str {
        match self {
            PassType::EmploymentPass => "Employment Pass",
            PassType::PersonalisedEmploymentPass => "Personalised Employment Pass",
            PassType::EntrePass => "EntrePass",
            PassType::SPass => "S Pass",
            PassType::WorkPermit => "Work Permit",
            PassType::ForeignDomesticWorker => "Foreign Domestic Worker",
            PassType::PerformingArtiste => "Performing Artiste",
            PassType::ConfinementNanny => "Confinement Nanny",
            PassType::TrainingEmploymentPass => "Training Employment Pass",
            PassType::WorkHolidayPass => "Work Holiday Pass",
            PassType::DependantsPass => "Dependant's Pass",
            PassType::LongTermVisitPass => "Long-Term Visit Pass",
        }
    }

    /// URL/제목에서 이 패스를 가리키는 표현들 (소문자)
    pub fn trigger_terms(&self) -> &'static [&'static str] {
        match self {
            PassType::EmploymentPass => &["employment pass", "employment-pass"],
            PassType::PersonalisedEmploymentPass => &[
                "personalised employment pass",
                "personalized employment pass",
                "pep",
            ],
            PassType::EntrePass => &["entrepass", "entrepreneur pass"],
            PassType::SPass => &["s pass", "s-pass", "spass"],
            PassType::WorkPermit => &["work permit", "work-permit", "workpermit"],
            PassType::ForeignDomesticWorker => {
                &["foreign domestic worker", "fdw", "domestic worker", "domestic helper"]
            }
            PassType::PerformingArtiste => &["performing artiste", "performing artist"],
            PassType::ConfinementNanny => &["confinement nanny"],
            PassType::TrainingEmploymentPass => {
                &["training employment pass", "training-employment-pass"]
            }
            PassType::WorkHolidayPass => &["work holiday pass", "work holiday", "work-holiday"],
            PassType::DependantsPass => &["dependant's pass", "dependants pass", "dependant-pass", "dependant"],
            PassType::LongTermVisitPass => &["long-term visit pass", "long term visit pass", "ltvp"],
        }
    }
}

impl fmt::Display for PassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for PassType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase().replace('_', " ");
        if needle == "ep" {
            return Ok(PassType::EmploymentPass);
        }
        PassType::ALL
            .iter()
            .find(|p| {
                p.display_name().to_lowercase() == needle
                    || p.trigger_terms().iter().any(|t| *t == needle)
            })
            .copied()
            .ok_or_else(|| format!("unknown pass type '{}'", s))
    }
}

// ============================================================================
// RawDocument
// ============================================================================

/// 스크래퍼가 만든 원문 문서
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDocument {
    /// 문서 URL (고유 키)
    pub url: String,
    #[serde(default)]
    pub title: String,
    /// 본문 텍스트 (원본 스크래퍼 출력은 `content` 필드 사용)
    #[serde(alias = "content")]
    pub text: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default = "Utc::now")]
    pub scraped_at: DateTime<Utc>,
}

impl RawDocument {
    pub fn new(url: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            text: text.into(),
            category: Category::Unclassified,
            scraped_at: Utc::now(),
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }
}

// ============================================================================
// Chunk
// ============================================================================

/// 인덱싱 단위 청크
///
/// Processor가 만들고, 임베딩 후 인덱스에 저장됩니다. 생성 후 변경하지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// source_url + 오프셋의 안정 해시
    pub id: String,
    pub source_url: String,
    #[serde(default)]
    pub title: String,
    pub text: String,
    pub category: Category,
    #[serde(default)]
    pub pass_type: Option<PassType>,
    /// 문서 내 순서 (0-based)
    pub position: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

// ============================================================================
// Query-time types
// ============================================================================

/// 검색 근거 (쿼리마다 생성)
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceItem {
    pub chunk: Chunk,
    /// 정규화된 관련도 (0.0 ~ 1.0)
    pub relevance_score: f32,
    /// 1부터 시작하는 순위
    pub rank: usize,
}

/// 사용자 프로필 (UI에서 전달, 저장하지 않음)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub nationality: Option<String>,
    /// 월 급여 (SGD)
    pub monthly_salary: Option<f64>,
    pub current_pass_type: Option<PassType>,
}

impl UserProfile {
    pub fn is_empty(&self) -> bool {
        self.nationality.as_deref().map_or(true, |n| n.trim().is_empty())
            && self.monthly_salary.is_none()
            && self.current_pass_type.is_none()
    }
}

/// 출처 표시
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub source_url: String,
    pub title: String,
    pub category: Category,
}

/// 최종 답변
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub evidence_used: Vec<EvidenceItem>,
}

// ============================================================================
// Tests
// ============================================================================
