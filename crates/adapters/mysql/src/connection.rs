//! MySQL 连接管理

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::Connection;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use tracing::info;
use txguard_common::{DEFAULT_SLOW_QUERY_THRESHOLD, QueryObserver, RetryConfig, with_retry};
use txguard_errors::{DbError, DbResult};
use txguard_ports::{Database, Driver, PoolStats, Row, SqlValue, Transaction, TransactionOptions};

use crate::config::MySqlConfig;
use crate::row::{bind_all, to_json_row};
use crate::transaction::MySqlTransaction;

/// 创建 MySQL 连接池，建连失败按可重试错误重试
pub async fn create_pool(config: &MySqlConfig, retry: &RetryConfig) -> DbResult<MySqlPool> {
    let options = MySqlPoolOptions::new()
        .max_connections(config.pool_max)
        .min_connections(config.pool_min)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime);
    let url = config.connection_url();

    let pool = with_retry(retry, "mysql_connect", DbError::is_retryable, || {
        let options = options.clone();
        let url = url.clone();
        async move {
            options
                .connect(url.expose_secret())
                .await
                .map_err(|e| DbError::wrap(e, "failed to create pool"))
        }
    })
    .await?;

    info!(
        max_connections = config.pool_max,
        min_connections = config.pool_min,
        "MySQL pool created"
    );
    Ok(pool)
}

/// 拒绝 sqlx 开启事务后无法再应用的选项
fn check_options(options: &TransactionOptions) -> DbResult<()> {
    if options.has_characteristics() {
        return Err(DbError::invalid_argument(
            "mysql adapter does not support isolation level or access mode options",
        ));
    }
    Ok(())
}

/// 基于 `MySqlPool` 的 [`Database`] 实现
#[derive(Debug, Clone)]
pub struct MySqlDatabase {
    pool: MySqlPool,
    observer: QueryObserver,
}

impl MySqlDatabase {
    /// 使用默认慢查询阈值
    pub fn new(pool: MySqlPool) -> Self {
        Self {
            pool,
            observer: QueryObserver::new("mysql", Some(DEFAULT_SLOW_QUERY_THRESHOLD)),
        }
    }

    pub fn with_slow_query_threshold(mut self, threshold: Option<Duration>) -> Self {
        self.observer = QueryObserver::new("mysql", threshold);
        self
    }

    pub async fn connect(config: &MySqlConfig, retry: &RetryConfig) -> DbResult<Self> {
        Ok(Self::new(create_pool(config, retry).await?).with_slow_query_threshold(config.slow_query_threshold))
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl Database for MySqlDatabase {
    async fn begin(&self, options: &TransactionOptions) -> DbResult<Box<dyn Transaction>> {
        check_options(options)?;
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::wrap(e, "failed to begin transaction"))?;
        Ok(Box::new(MySqlTransaction::new(tx, self.observer)))
    }

    async fn ping(&self) -> DbResult<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DbError::wrap(e, "failed to acquire connection"))?;
        conn.ping()
            .await
            .map_err(|e| DbError::wrap(e, "ping failed"))
    }

    async fn ping_detailed(&self) -> DbResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| DbError::wrap(e, "health query failed"))?;
        Ok(())
    }

    async fn fetch_all(&self, sql: &str, args: &[SqlValue]) -> DbResult<Vec<Row>> {
        let rows = self
            .observer
            .observe("fetch_all", sql, async {
                bind_all(sql, args)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| DbError::wrap(e, "failed to execute query"))
            })
            .await?;
        rows.iter().map(to_json_row).collect()
    }

    fn pool_stats(&self) -> PoolStats {
        PoolStats::from_counts(
            self.pool.size(),
            u32::try_from(self.pool.num_idle()).unwrap_or(u32::MAX),
            self.pool.options().get_max_connections(),
        )
    }

    fn driver(&self) -> Driver {
        Driver::MySql
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("MySQL pool closed");
    }
}
