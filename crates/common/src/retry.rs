//! 重试与退避
//!
//! 指数退避加 ±10% 对称抖动，抖动来源是线程本地随机数发生器，
//! 并发客户端不会因为共享时钟而同步重试

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use txguard_errors::{DbError, DbResult};

/// 抖动幅度
pub const JITTER_FRACTION: f64 = 0.1;

/// 重试配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 最大尝试次数（含首次），0 视为 1
    pub max_attempts: u32,
    /// 初始退避
    pub initial_backoff: Duration,
    /// 最大退避
    pub max_backoff: Duration,
    /// 退避乘数
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            multiplier: 2.0,
        }
    }

    /// 设置退避乘数
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// 实际生效的尝试次数
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// 第 n 次尝试（从 0 开始）后的退避基数，不含抖动
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max_backoff.as_secs_f64();

        if !delay.is_finite() || delay >= max {
            return self.max_backoff;
        }
        Duration::try_from_secs_f64(delay.max(0.0))
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }

    pub fn validate(&self) -> DbResult<()> {
        if !self.multiplier.is_finite() {
            return Err(DbError::invalid_argument(
                "retry multiplier must be a finite number",
            ));
        }
        if self.multiplier < 1.0 {
            return Err(DbError::invalid_argument(format!(
                "retry multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(DbError::invalid_argument(format!(
                "initial backoff {:?} exceeds max backoff {:?}",
                self.initial_backoff, self.max_backoff
            )));
        }
        Ok(())
    }
}

/// 计算第 n 次尝试后的等待时间
///
/// `min(initial * multiplier^attempt, max)` 再乘以 `[0.9, 1.1]` 的均匀抖动，
/// 结果限制在 `[0, max_backoff]`
pub fn next_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base = config.delay_for_attempt(attempt);
    if base.is_zero() {
        return base;
    }

    let jitter = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
    let delay = base.as_secs_f64() * (1.0 + jitter);

    // 接近 Duration::MAX 时 f64 换算会越界，此时取上限
    Duration::try_from_secs_f64(delay.max(0.0))
        .map_or(config.max_backoff, |d| d.min(config.max_backoff))
}

/// 带条件重试的异步操作执行器
///
/// 只有 `should_retry` 返回 true 的错误才会重试，
/// 用于建连等事务之外的操作
pub async fn with_retry<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.attempts();
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !should_retry(&e) {
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        error = %e,
                        "Operation failed with non-retryable error"
                    );
                    return Err(e);
                }
                if attempt + 1 >= max_attempts {
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_attempts,
                        error = %e,
                        "Operation failed, no more retries"
                    );
                    return Err(e);
                }

                let delay = next_delay(attempt, config);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
