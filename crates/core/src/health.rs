//! 数据库健康检查
//!
//! - `check`: 存活检查，结果按 TTL 缓存，防止健康检查端点被刷爆
//! - `check_detailed`: 就绪检查，不缓存，执行一次完整往返并分析连接池
//! - `check_with_custom`: 在存活检查结果上叠加自定义检查，只会降级不会升级

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::gauge;
use serde::{Serialize, Serializer};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use txguard_errors::{DbError, DbResult};
use txguard_ports::{Database, Driver, PoolStats, SqlValue};

use crate::context::Context;

/// 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 连接池分析
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolAnalysis {
    /// 使用率（acquired / max）
    pub utilization: f64,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

/// 自定义检查结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomCheckResult {
    pub passed: bool,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 健康检查结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub pool: PoolStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_analysis: Option<PoolAnalysis>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_checks: BTreeMap<String, CustomCheckResult>,
}

impl HealthCheckResult {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    pub fn is_degraded(&self) -> bool {
        self.status == HealthStatus::Degraded
    }

    pub fn is_unhealthy(&self) -> bool {
        self.status == HealthStatus::Unhealthy
    }

    /// 200 健康，429 降级，503 不可用
    pub fn http_status(&self) -> u16 {
        match self.status {
            HealthStatus::Healthy => 200,
            HealthStatus::Degraded => 429,
            HealthStatus::Unhealthy => 503,
        }
    }
}

impl fmt::Display for HealthCheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status={} message={:?} duration={:?} timestamp={}",
            self.status,
            self.message,
            self.duration,
            self.timestamp.to_rfc3339()
        )
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// 自定义健康检查
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, db: &dyn Database) -> DbResult<()>;
}

/// 执行 `SELECT 1`，耗时超过阈值视为失败
#[derive(Debug, Clone)]
pub struct QueryPerformanceCheck {
    threshold: Duration,
}

impl QueryPerformanceCheck {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }
}

#[async_trait]
impl HealthCheck for QueryPerformanceCheck {
    async fn check(&self, db: &dyn Database) -> DbResult<()> {
        let start = Instant::now();
        db.fetch_all("SELECT 1", &[])
            .await
            .map_err(|e| DbError::wrap(e, "query failed"))?;

        let elapsed = start.elapsed();
        if elapsed > self.threshold {
            return Err(DbError::timeout(format!(
                "query took {elapsed:?}, exceeds threshold of {:?}",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// 检查表是否存在
#[derive(Debug, Clone)]
pub struct TableExistsCheck {
    table: String,
}

impl TableExistsCheck {
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into() }
    }
}

#[async_trait]
impl HealthCheck for TableExistsCheck {
    async fn check(&self, db: &dyn Database) -> DbResult<()> {
        let sql = match db.driver() {
            Driver::Postgres => {
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1) AS present"
            }
            Driver::MySql => {
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = ?) AS present"
            }
        };

        let rows = db
            .fetch_all(sql, &[SqlValue::String(self.table.clone())])
            .await
            .map_err(|e| DbError::wrap(e, "failed to check table existence"))?;

        // MySQL 的 EXISTS 返回整数
        let present = rows
            .first()
            .and_then(|row| row.get("present"))
            .map(|value| match value {
                SqlValue::Bool(b) => *b,
                SqlValue::Number(n) => n.as_i64().is_some_and(|n| n != 0),
                _ => false,
            })
            .unwrap_or(false);

        if !present {
            return Err(DbError::not_found(format!("table {} does not exist", self.table)));
        }
        Ok(())
    }
}

/// 健康检查配置
#[derive(Debug, Clone, PartialEq)]
pub struct HealthConfig {
    /// 存活检查结果缓存时间
    pub cache_ttl: Duration,
    /// 单次检查超时
    pub ping_timeout: Duration,
    /// 连接池使用率超过该值视为降级
    pub degraded_utilization: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(1),
            ping_timeout: Duration::from_secs(5),
            degraded_utilization: 0.8,
        }
    }
}

struct CachedResult {
    result: HealthCheckResult,
    checked_at: Instant,
}

/// 带缓存的健康检查器
pub struct HealthCache {
    db: Arc<dyn Database>,
    config: HealthConfig,
    cache: RwLock<Option<CachedResult>>,
    checks: StdRwLock<BTreeMap<String, Arc<dyn HealthCheck>>>,
}

impl HealthCache {
    pub fn new(db: Arc<dyn Database>, config: HealthConfig) -> Self {
        Self {
            db,
            config,
            cache: RwLock::new(None),
            checks: StdRwLock::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// 注册自定义检查，同名检查会被替换
    pub fn register_check(&self, name: impl Into<String>, check: impl HealthCheck + 'static) {
        self.checks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(check));
    }

    pub fn unregister_check(&self, name: &str) -> bool {
        self.checks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    /// 存活检查
    ///
    /// TTL 内返回缓存结果；刷新时持有写锁并再次确认缓存是否已被其他调用方刷新，
    /// 并发调用方不会重复 ping
    pub async fn check(&self, ctx: &Context) -> HealthCheckResult {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = self.fresh(&cache) {
                return cached;
            }
        }

        let mut cache = self.cache.write().await;
        if let Some(cached) = self.fresh(&cache) {
            return cached;
        }

        let start = Instant::now();
        let ping = self.bounded(ctx, self.db.ping()).await;
        let result = self.build_result(start, ping, "database is healthy", "database health check failed");

        // 上下文结束导致的失败不缓存
        if !ctx.is_done() {
            *cache = Some(CachedResult {
                result: result.clone(),
                checked_at: Instant::now(),
            });
        }
        result
    }

    /// 就绪检查，不缓存
    pub async fn check_detailed(&self, ctx: &Context) -> HealthCheckResult {
        let start = Instant::now();
        let ping = self.bounded(ctx, self.db.ping_detailed()).await;
        let mut result =
            self.build_result(start, ping, "database is ready", "database readiness check failed");

        let analysis = analyze_pool(&result.pool, self.config.degraded_utilization);
        if analysis.status == HealthStatus::Degraded && result.status == HealthStatus::Healthy {
            result.status = HealthStatus::Degraded;
            result.message = "database is accessible but connection pool may be stressed".to_string();
        }
        result.pool_analysis = Some(analysis);
        result
    }

    /// 存活检查加自定义检查，不修改缓存
    pub async fn check_with_custom(&self, ctx: &Context) -> HealthCheckResult {
        let mut result = self.check(ctx).await;

        let checks: Vec<(String, Arc<dyn HealthCheck>)> = self
            .checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, check)| (name.clone(), Arc::clone(check)))
            .collect();

        let mut failed = false;
        for (name, check) in checks {
            let start = Instant::now();
            let outcome = self.bounded(ctx, check.check(self.db.as_ref())).await;
            let duration = start.elapsed();

            let entry = match outcome {
                Ok(()) => CustomCheckResult {
                    passed: true,
                    duration,
                    error: None,
                },
                Err(e) => {
                    warn!(check = %name, error = %e, "Custom health check failed");
                    failed = true;
                    CustomCheckResult {
                        passed: false,
                        duration,
                        error: Some(e.to_string()),
                    }
                }
            };
            result.custom_checks.insert(name, entry);
        }

        if failed && result.status == HealthStatus::Healthy {
            result.status = HealthStatus::Degraded;
            result.message = "database is accessible but some custom checks failed".to_string();
        }
        result
    }

    /// 启动后台就绪检查，上下文取消后退出
    pub fn spawn_background(self: Arc<Self>, interval: Duration, ctx: Context) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = interval.as_secs(),
                driver = %self.db.driver(),
                "Starting background database health checker"
            );

            loop {
                if ctx.sleep(interval).await.is_err() {
                    break;
                }

                let result = self.check_detailed(&ctx).await;
                record_metrics(&result);

                match result.status {
                    HealthStatus::Healthy => debug!(
                        duration_ms = result.duration.as_millis() as u64,
                        "Database health check passed"
                    ),
                    HealthStatus::Degraded => warn!(
                        message = %result.message,
                        utilization = result.pool.utilization(),
                        "Database health degraded"
                    ),
                    HealthStatus::Unhealthy => error!(
                        message = %result.message,
                        "Database health check failed"
                    ),
                }
            }

            info!("Background database health checker stopped");
        })
    }

    fn fresh(&self, cache: &Option<CachedResult>) -> Option<HealthCheckResult> {
        cache
            .as_ref()
            .filter(|cached| cached.checked_at.elapsed() < self.config.cache_ttl)
            .map(|cached| cached.result.clone())
    }

    async fn bounded<F>(&self, ctx: &Context, fut: F) -> DbResult<()>
    where
        F: std::future::Future<Output = DbResult<()>>,
    {
        ctx.with_timeout(self.config.ping_timeout).run(fut).await?
    }

    fn build_result(
        &self,
        start: Instant,
        ping: DbResult<()>,
        ok_message: &str,
        failed_message: &str,
    ) -> HealthCheckResult {
        let (status, message) = match ping {
            Ok(()) => (HealthStatus::Healthy, ok_message.to_string()),
            Err(e) => (HealthStatus::Unhealthy, format!("{failed_message}: {e}")),
        };

        HealthCheckResult {
            status,
            message,
            timestamp: Utc::now(),
            duration: start.elapsed(),
            pool: self.db.pool_stats(),
            pool_analysis: None,
            custom_checks: BTreeMap::new(),
        }
    }
}

/// 分析连接池是否承压
pub fn analyze_pool(stats: &PoolStats, degraded_utilization: f64) -> PoolAnalysis {
    let utilization = stats.utilization();
    let mut issues = Vec::new();
    let mut degraded = false;

    if utilization > degraded_utilization {
        issues.push(format!(
            "connection pool utilization is high (>{:.0}%)",
            degraded_utilization * 100.0
        ));
        degraded = true;
    }

    if stats.idle == 0 && stats.total < stats.max {
        issues.push("no idle connections available".to_string());
        degraded = true;
    }

    if stats.acquired == stats.total && stats.total > 0 {
        issues.push("all connections are currently in use".to_string());
    }

    PoolAnalysis {
        utilization,
        status: if degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        },
        issues,
    }
}

fn record_metrics(result: &HealthCheckResult) {
    gauge!("txguard_db_pool_acquired").set(f64::from(result.pool.acquired));
    gauge!("txguard_db_pool_idle").set(f64::from(result.pool.idle));
    gauge!("txguard_db_pool_total").set(f64::from(result.pool.total));
    gauge!("txguard_db_pool_max").set(f64::from(result.pool.max));
    gauge!("txguard_db_health_status").set(match result.status {
        HealthStatus::Healthy => 0.0,
        HealthStatus::Degraded => 1.0,
        HealthStatus::Unhealthy => 2.0,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(acquired: u32, idle: u32, total: u32, max: u32) -> PoolStats {
        PoolStats {
            acquired,
            idle,
            total,
            max,
        }
    }

    #[test]
    fn test_pool_analysis_healthy() {
        let analysis = analyze_pool(&stats(2, 3, 5, 10), 0.8);
        assert_eq!(analysis.status, HealthStatus::Healthy);
        assert!(analysis.issues.is_empty());
    }

    #[test]
    fn test_pool_analysis_high_utilization() {
        let analysis = analyze_pool(&stats(9, 1, 10, 10), 0.8);
        assert_eq!(analysis.status, HealthStatus::Degraded);
        assert!(analysis.issues[0].contains(">80%"));

        // 恰好等于阈值不降级
        let analysis = analyze_pool(&stats(8, 2, 10, 10), 0.8);
        assert_eq!(analysis.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_pool_analysis_no_idle_below_max() {
        let analysis = analyze_pool(&stats(3, 0, 3, 10), 0.8);
        assert_eq!(analysis.status, HealthStatus::Degraded);
        assert!(analysis.issues.iter().any(|i| i.contains("no idle")));
        assert!(analysis.issues.iter().any(|i| i.contains("all connections")));
    }

    #[test]
    fn test_http_status_and_serialization() {
        let result = HealthCheckResult {
            status: HealthStatus::Degraded,
            message: "pool stressed".to_string(),
            timestamp: Utc::now(),
            duration: Duration::from_millis(12),
            pool: stats(9, 1, 10, 10),
            pool_analysis: None,
            custom_checks: BTreeMap::new(),
        };
        assert_eq!(result.http_status(), 429);
        assert!(result.is_degraded());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["duration_ms"], 12);
        assert_eq!(json["pool"]["acquired"], 9);
        assert!(json.get("custom_checks").is_none());
        assert!(result.to_string().starts_with("status=degraded"));
    }
}
