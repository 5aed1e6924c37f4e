//! 语句耗时观测
//!
//! 每条语句记录 `txguard_query_duration_seconds`，失败计入
//! `txguard_query_errors_total`，超过阈值输出慢查询日志。
//! 日志只包含截断后的 SQL，不记录绑定参数。

use std::future::Future;
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::warn;
use txguard_errors::DbResult;

/// 默认慢查询阈值
pub const DEFAULT_SLOW_QUERY_THRESHOLD: Duration = Duration::from_secs(1);

const MAX_LOGGED_SQL_CHARS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryObserver {
    driver: &'static str,
    /// `None` 时不输出慢查询日志
    slow_threshold: Option<Duration>,
}

impl QueryObserver {
    pub fn new(driver: &'static str, slow_threshold: Option<Duration>) -> Self {
        Self {
            driver,
            slow_threshold,
        }
    }

    pub fn slow_threshold(&self) -> Option<Duration> {
        self.slow_threshold
    }

    /// 计时执行 `fut`，结果原样返回
    pub async fn observe<F, T>(&self, op: &'static str, sql: &str, fut: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        let start = Instant::now();
        let result = fut.await;
        self.record(op, sql, start.elapsed(), result.is_ok());
        result
    }

    /// 记录一次语句执行，返回是否为慢查询
    pub fn record(&self, op: &'static str, sql: &str, elapsed: Duration, ok: bool) -> bool {
        histogram!(
            "txguard_query_duration_seconds",
            "driver" => self.driver,
            "op" => op
        )
        .record(elapsed.as_secs_f64());

        if !ok {
            counter!("txguard_query_errors_total", "driver" => self.driver, "op" => op).increment(1);
        }

        let slow = self.slow_threshold.is_some_and(|threshold| elapsed >= threshold);
        if slow {
            counter!("txguard_slow_queries_total", "driver" => self.driver, "op" => op).increment(1);
            warn!(
                driver = self.driver,
                op,
                duration_ms = elapsed.as_millis() as u64,
                threshold_ms = self.slow_threshold.map_or(0, |t| t.as_millis() as u64),
                ok,
                sql = %truncate_sql(sql),
                "Slow query"
            );
        }
        slow
    }
}

fn truncate_sql(sql: &str) -> &str {
    match sql.char_indices().nth(MAX_LOGGED_SQL_CHARS) {
        Some((end, _)) => &sql[..end],
        None => sql,
    }
}
