//! 재시도 정책 - 외부 프로바이더 호출용
//!
//! 시도마다 타임아웃을 걸고, 일시적 에러는 지수 백오프로 재시도합니다.
//! 모든 시도가 실패하면 마지막 에러를 그대로 돌려줍니다.

use std::future::Future;
use std::time::Duration;

use crate::error::{RagError, Result};

/// 기본 최대 시도 횟수
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// 기본 초기 백오프 (ms)
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;

/// 재시도 정책
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 최대 시도 횟수 (첫 시도 포함)
    pub max_attempts: u32,
    /// 첫 재시도 전 대기 시간 (이후 2배씩 증가)
    pub initial_backoff: Duration,
    /// 시도당 타임아웃
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// 재시도 없이 한 번만 시도
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            timeout,
        }
    }

    /// n번째 재시도 전 백오프 (0-based)
    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// 작업 실행
    ///
    /// # Arguments
    /// * `label` - 로그용 작업 이름
    /// * `on_timeout` - 타임아웃을 어떤 에러로 보고할지 (예: `RagError::EmbeddingProvider`)
    /// * `op` - 매 시도마다 새 future를 만드는 클로저
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        on_timeout: fn(String) -> RagError,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(on_timeout(format!(
                    "{} timed out after {:?}",
                    label, self.timeout
                ))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let backoff = self.backoff(attempt);
                    tracing::warn!(
                        "{} failed: {} - retrying in {:?} (attempt {}/{})",
                        label,
                        e,
                        backoff,
                        attempt + 1,
                        attempts
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::error!("{} failed after {} attempts: {}", label, attempts, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}
