//! CLI 모듈
//!
//! workpass-rag CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::RagConfig;
use crate::embedding::has_api_key;
use crate::knowledge::{
    load_documents, save_chunks, save_documents, Answer, BuildReport, Category, EvidenceItem,
    PassType, RagEngine, UserProfile, VectorIndex,
};
use crate::scraper::{WebScraper, DEFAULT_SEED_PAGES};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "workpass-rag")]
#[command(version, about = "싱가포르 Work Pass RAG 챗봇", long_about = None)]
pub struct Cli {
    /// 데이터 디렉토리 (기본: <data_local_dir>/.workpass-rag)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// JSON 설정 파일
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 문서를 처리하고 벡터 인덱스 빌드
    ///
    /// 소스를 지정하지 않으면 MOM Work Pass 기본 페이지를 스크랩합니다.
    Build {
        /// RawDocument JSON 배열 파일
        #[arg(long, conflicts_with = "url")]
        from_file: Option<PathBuf>,

        /// 처리된 청크 JSON 파일 (--save-chunks 출력)로 인덱스만 다시 빌드
        #[arg(long, conflicts_with_all = ["from_file", "url", "save_raw", "save_chunks"])]
        from_chunks: Option<PathBuf>,

        /// 스크랩할 URL (여러 번 지정 가능)
        #[arg(short, long)]
        url: Vec<String>,

        /// 스크랩한 원문을 JSON으로 저장
        #[arg(long)]
        save_raw: Option<PathBuf>,

        /// 처리된 청크를 JSON으로 저장
        #[arg(long)]
        save_chunks: Option<PathBuf>,
    },

    /// 질문하고 답변 받기
    Ask {
        /// 질문
        query: String,

        /// 카테고리 제한 (professionals, skilled, domestic, students)
        #[arg(short, long)]
        category: Option<Category>,

        /// 사용할 근거 수 (기본: retrieval_k)
        #[arg(short, long)]
        k: Option<usize>,

        /// 국적
        #[arg(long)]
        nationality: Option<String>,

        /// 월 급여 (SGD)
        #[arg(long)]
        salary: Option<f64>,

        /// 현재 패스 (예: "S Pass", ep)
        #[arg(long)]
        pass_type: Option<PassType>,

        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 근거 검색만 수행 (답변 생성 없음)
    Search {
        /// 검색 쿼리
        query: String,

        /// 결과 개수
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// 카테고리 제한
        #[arg(short, long)]
        category: Option<Category>,
    },

    /// 카테고리/패스 종류별 청크 수
    Categories,

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = RagConfig::load(cli.config.as_deref()).context("설정 로드 실패")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    match cli.command {
        Commands::Build {
            from_chunks: Some(path),
            ..
        } => cmd_build_from_chunks(config, &path).await,
        Commands::Build {
            from_file,
            url,
            save_raw,
            save_chunks,
            ..
        } => cmd_build(config, from_file, url, save_raw, save_chunks).await,
        Commands::Ask {
            query,
            category,
            k,
            nationality,
            salary,
            pass_type,
            json,
        } => {
            let profile = UserProfile {
                nationality,
                monthly_salary: salary,
                current_pass_type: pass_type,
            };
            cmd_ask(config, &query, category, k, profile, json).await
        }
        Commands::Search {
            query,
            limit,
            category,
        } => cmd_search(config, &query, limit, category).await,
        Commands::Categories => cmd_categories(&config),
        Commands::Status => cmd_status(&config),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 임베딩 API 키 확인
fn require_embedding_key(config: &RagConfig) -> Result<()> {
    if !has_api_key(config.embedding_provider) {
        bail!(
            "{} 임베딩 API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key   (gemini)\n  \
             export OPENAI_API_KEY=your-api-key   (openai)\n\n\
             API 키 없이 실행하려면: export WORKPASS_EMBEDDING_PROVIDER=hashing",
            config.embedding_provider
        );
    }
    Ok(())
}

/// 인덱스 빌드 명령어 (build)
async fn cmd_build(
    config: RagConfig,
    from_file: Option<PathBuf>,
    urls: Vec<String>,
    save_raw: Option<PathBuf>,
    save_chunks_path: Option<PathBuf>,
) -> Result<()> {
    require_embedding_key(&config)?;

    let documents = if let Some(ref path) = from_file {
        println!("[*] 문서 파일 로드 중: {}", path.display());
        load_documents(path).context("문서 파일 로드 실패")?
    } else {
        let scraper = WebScraper::new(config.request_timeout()).context("WebScraper 생성 실패")?;
        if urls.is_empty() {
            println!("[*] MOM 기본 페이지 {}개 스크래핑 중...", DEFAULT_SEED_PAGES.len());
            scraper.scrape_seeds(DEFAULT_SEED_PAGES).await
        } else {
            println!("[*] URL {}개 스크래핑 중...", urls.len());
            scraper.scrape_all(&urls).await
        }
    };

    if documents.is_empty() {
        bail!("처리할 문서가 없습니다");
    }

    if let Some(ref path) = save_raw {
        save_documents(&documents, path).context("원문 저장 실패")?;
        println!("[OK] 원문 저장: {}", path.display());
    }

    let engine = RagEngine::open(config).context("RagEngine 초기화 실패")?;

    let (chunks, stats) = engine.process(&documents);
    println!(
        "[*] 문서 {}개 → 청크 {}개 (건너뜀 {}, 중복 제거 {}) [{} / {}]",
        stats.documents,
        stats.chunks,
        stats.skipped_documents,
        stats.duplicates_dropped,
        stats.chunker,
        stats.classifier
    );
    for (category, count) in &stats.per_category {
        println!("    {}: {}", category.display_name(), count);
    }

    if let Some(ref path) = save_chunks_path {
        save_chunks(&chunks, path).context("청크 저장 실패")?;
        println!("[OK] 청크 저장: {}", path.display());
    }

    println!("[*] 임베딩 생성 및 인덱스 저장 중...");
    let report = engine
        .build_from_chunks(&chunks)
        .await
        .context("인덱스 빌드 실패")?;

    print_build_report(&engine, &report);
    Ok(())
}

/// 처리된 청크 파일로 인덱스 빌드 (build --from-chunks)
async fn cmd_build_from_chunks(config: RagConfig, path: &Path) -> Result<()> {
    require_embedding_key(&config)?;

    println!("[*] 처리된 청크 파일 로드 중: {}", path.display());
    let engine = RagEngine::open(config).context("RagEngine 초기화 실패")?;

    println!("[*] 임베딩 생성 및 인덱스 저장 중...");
    let report = engine
        .build_from_processed_file(path)
        .await
        .context("인덱스 빌드 실패")?;

    print_build_report(&engine, &report);
    Ok(())
}

fn print_build_report(engine: &RagEngine, report: &BuildReport) {
    println!(
        "[OK] 인덱스 빌드 완료: {} 청크 (새 임베딩 {}, 재사용 {}, 정리 {}) - {:.1}s",
        report.chunks_indexed,
        report.embedded,
        report.reused,
        report.pruned,
        report.elapsed.as_secs_f64()
    );
    println!("     위치: {}", engine.index().db_path().display());
}

/// 질문 명령어 (ask)
async fn cmd_ask(
    config: RagConfig,
    query: &str,
    category: Option<Category>,
    k: Option<usize>,
    profile: UserProfile,
    json: bool,
) -> Result<()> {
    require_embedding_key(&config)?;

    let k = k.unwrap_or(config.retrieval_k);
    let engine = RagEngine::open(config).context("RagEngine 초기화 실패")?;
    let profile = (!profile.is_empty()).then_some(profile);

    let answer = engine
        .ask_with_k(query, k, category, profile.as_ref())
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        print_answer(&answer);
    }
    Ok(())
}

/// 검색 명령어 (search)
async fn cmd_search(
    config: RagConfig,
    query: &str,
    limit: usize,
    category: Option<Category>,
) -> Result<()> {
    require_embedding_key(&config)?;

    println!("[*] 검색 중: \"{}\"", query);
    let engine = RagEngine::open(config).context("RagEngine 초기화 실패")?;
    let evidence = engine
        .search(query, limit, category)
        .await?;

    if evidence.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", evidence.len());
    for item in &evidence {
        print_evidence(item);
    }
    Ok(())
}

/// 카테고리 명령어 (categories)
fn cmd_categories(config: &RagConfig) -> Result<()> {
    let index = open_index(&config.index_path())?;

    let counts = index.category_counts()?;
    println!("[OK] 카테고리별 청크:\n");
    for category in Category::ALL {
        let count = counts.get(&category).copied().unwrap_or(0);
        println!("  {:<32} {:>5}", category.display_name(), count);
    }

    let pass_types = index.pass_types()?;
    if !pass_types.is_empty() {
        println!("\n[OK] 패스 종류:\n");
        for (pass_type, count) in pass_types {
            println!("  {:<32} {:>5}", pass_type.display_name(), count);
        }
    }
    Ok(())
}

/// 상태 명령어 (status)
fn cmd_status(config: &RagConfig) -> Result<()> {
    println!("workpass-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!(
        "[*] 임베딩: {} / 생성: {}",
        config.embedding_provider, config.generation_provider
    );

    if has_api_key(config.embedding_provider) {
        println!("[OK] 임베딩 API 키: 설정됨");
    } else {
        println!("[!] 임베딩 API 키: 미설정");
    }

    let index_path = config.index_path();
    if !index_path.exists() {
        println!("[!] 인덱스 없음: `workpass-rag build`로 생성하세요");
        return Ok(());
    }

    match open_index(&index_path).and_then(|index| index.stats().map_err(Into::into)) {
        Ok(stats) if stats.is_built() => {
            println!(
                "[OK] 인덱스: {} 청크 / {} 소스",
                stats.chunk_count, stats.source_count
            );
            if let (Some(model), Some(dimension)) = (&stats.embedding_model, stats.dimension) {
                println!("     모델: {} ({} 차원)", model, dimension);
            }
            if let Some(built_at) = stats.built_at {
                println!("     빌드: {}", built_at.format("%Y-%m-%d %H:%M UTC"));
            }
        }
        Ok(stats) => {
            println!(
                "[!] 인덱스 빌드 미완료 ({} 청크 저장됨): `workpass-rag build`를 다시 실행하세요",
                stats.chunk_count
            );
        }
        Err(e) => println!("[!] 인덱스 열기 실패: {:#}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn open_index(path: &Path) -> Result<VectorIndex> {
    Ok(VectorIndex::open_existing(path)?)
}

fn print_answer(answer: &Answer) {
    println!("{}\n", answer.text);

    if answer.citations.is_empty() {
        return;
    }
    println!("출처:");
    for (i, citation) in answer.citations.iter().enumerate() {
        println!(
            "  [{}] {} ({})",
            i + 1,
            truncate_text(&citation.title, 60),
            citation.category.display_name()
        );
        println!("      {}", citation.source_url);
    }
}

fn print_evidence(item: &EvidenceItem) {
    let chunk = &item.chunk;
    println!(
        "{}. [관련도: {:.4}] [{}] {}",
        item.rank,
        item.relevance_score,
        chunk.category.display_name(),
        truncate_text(&chunk.title, 60)
    );
    println!("   URL: {}", chunk.source_url);
    if let Some(pass_type) = chunk.pass_type {
        println!("   패스: {}", pass_type.display_name());
    }
    println!("   내용: {}", truncate_text(&chunk.text, 200));
    println!();
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================
