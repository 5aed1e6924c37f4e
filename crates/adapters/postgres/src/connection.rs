//! PostgreSQL 连接管理

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::Connection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};
use txguard_common::{DEFAULT_SLOW_QUERY_THRESHOLD, QueryObserver, RetryConfig, with_retry};
use txguard_errors::{DbError, DbResult};
use txguard_ports::{Database, Driver, PoolStats, Row, SqlValue, Transaction, TransactionOptions};

use crate::config::PostgresConfig;
use crate::row::{bind_all, to_json_row};
use crate::transaction::PostgresTransaction;

fn pool_options(config: &PostgresConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.pool_max)
        .min_connections(config.pool_min)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
}

/// 创建 PostgreSQL 连接池，建连失败按可重试错误重试
pub async fn create_pool(config: &PostgresConfig, retry: &RetryConfig) -> DbResult<PgPool> {
    let options = pool_options(config);
    let url = config.connection_url();

    let pool = with_retry(retry, "postgres_connect", DbError::is_retryable, || {
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
        "PostgreSQL pool created"
    );
    Ok(pool)
}

/// 基于 `PgPool` 的 [`Database`] 实现
#[derive(Debug, Clone)]
pub struct PostgresDatabase {
    pool: PgPool,
    observer: QueryObserver,
}

impl PostgresDatabase {
    /// 使用默认慢查询阈值
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            observer: QueryObserver::new("postgres", Some(DEFAULT_SLOW_QUERY_THRESHOLD)),
        }
    }

    pub fn with_slow_query_threshold(mut self, threshold: Option<Duration>) -> Self {
        self.observer = QueryObserver::new("postgres", threshold);
        self
    }

    pub async fn connect(config: &PostgresConfig, retry: &RetryConfig) -> DbResult<Self> {
        Ok(Self::new(create_pool(config, retry).await?).with_slow_query_threshold(config.slow_query_threshold))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    async fn begin(&self, options: &TransactionOptions) -> DbResult<Box<dyn Transaction>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::wrap(e, "failed to begin transaction"))?;

        // SET TRANSACTION 必须是事务中的第一条语句
        if let Some(sql) = options.to_sql() {
            sqlx::query(&sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| DbError::wrap(e, "failed to set transaction characteristics"))?;
            debug!(characteristics = %sql, "Transaction characteristics applied");
        }

        Ok(Box::new(PostgresTransaction::new(tx, self.observer)))
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
        Driver::Postgres
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL pool closed");
    }
}
