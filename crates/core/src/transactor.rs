//! 事务协调器
//!
//! `atomically` 在上下文中没有事务时开启新事务并负责提交 / 回滚 / 重试；
//! 上下文中已有事务时直接在该事务上执行，嵌套调用无需显式传递事务。
//!
//! 重试会从头重新执行 `f`，调用方必须保证 `f` 可以安全地重复执行。

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use txguard_common::{CircuitBreaker, RetryConfig, next_delay};
use txguard_errors::{ClassifiedError, DbError, DbResult, ErrorKind};
use txguard_ports::{Database, SqlValue, Transaction, TransactionOptions};

use crate::context::{Context, tx_from_context};
use crate::handle::TransactionHandle;
use crate::savepoint::nested_transaction;

/// 批量执行中的一条语句
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, args: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }
}

#[derive(Clone)]
pub struct TransactionCoordinator {
    db: Arc<dyn Database>,
    retry: RetryConfig,
    breaker: Option<CircuitBreaker>,
}

impl TransactionCoordinator {
    pub fn new(db: Arc<dyn Database>, retry: RetryConfig) -> Self {
        Self {
            db,
            retry,
            breaker: None,
        }
    }

    /// 开启事务时经过断路器
    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    /// 在事务中执行 `f`
    pub async fn atomically<F, Fut, T>(&self, ctx: &Context, f: F) -> DbResult<T>
    where
        F: FnMut(Context) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        self.atomically_with(ctx, &TransactionOptions::default(), f)
            .await
    }

    /// 使用指定选项在事务中执行 `f`
    ///
    /// 上下文中已有事务时忽略 `options`
    pub async fn atomically_with<F, Fut, T>(
        &self,
        ctx: &Context,
        options: &TransactionOptions,
        mut f: F,
    ) -> DbResult<T>
    where
        F: FnMut(Context) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        if tx_from_context(ctx).is_some() {
            return f(ctx.clone()).await;
        }

        let config = options.retry.as_ref().unwrap_or(&self.retry);
        let max_attempts = config.attempts();
        let started = Instant::now();
        let mut attempt: u32 = 0;

        let result = loop {
            if let Some(err) = ctx.err() {
                break Err(DbError::from(err));
            }

            let err = match self.run_once(ctx, options, &mut f).await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(attempt = attempt + 1, "Transaction succeeded after retry");
                    }
                    break Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() || ctx.is_done() {
                debug!(attempt = attempt + 1, error = %err, "Transaction failed with non-retryable error");
                break Err(err);
            }

            if attempt + 1 >= max_attempts {
                warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    error = %err,
                    "Transaction failed, no more retries"
                );
                if attempt == 0 {
                    break Err(err);
                }
                break Err(DbError::RetriesExhausted {
                    attempts: attempt + 1,
                    last: into_classified(err),
                });
            }

            let delay = next_delay(attempt, config);
            warn!(
                attempt = attempt + 1,
                max_attempts,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Transaction failed, retrying"
            );
            counter!("txguard_transaction_retries_total").increment(1);

            if let Err(ctx_err) = ctx.sleep(delay).await {
                break Err(DbError::from(ctx_err));
            }
            attempt += 1;
        };

        let outcome = match &result {
            Ok(_) => "committed",
            Err(DbError::RetriesExhausted { .. }) => "exhausted",
            Err(e) if e.is_cancelled() => "cancelled",
            Err(_) => "failed",
        };
        counter!("txguard_transactions_total", "outcome" => outcome).increment(1);
        histogram!("txguard_transaction_duration_seconds").record(started.elapsed().as_secs_f64());

        result
    }

    /// 带部分回滚语义的嵌套执行
    ///
    /// 上下文中已有事务时在自动命名的保存点内执行 `f`，失败只回滚 `f` 的改动；
    /// 否则等同于 [`atomically`](Self::atomically)
    pub async fn atomically_nested<F, Fut, T>(&self, ctx: &Context, f: F) -> DbResult<T>
    where
        F: FnMut(Context) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        match tx_from_context(ctx) {
            Some(handle) => {
                let name = handle.next_savepoint_name();
                nested_transaction(ctx, &handle, name.as_str(), f).await
            }
            None => self.atomically(ctx, f).await,
        }
    }

    /// 在同一个事务中依次执行多条语句，返回每条语句的受影响行数
    pub async fn execute_batch(&self, ctx: &Context, statements: &[Statement]) -> DbResult<Vec<u64>> {
        self.atomically(ctx, |ctx| async move {
            let tx = tx_from_context(&ctx)
                .ok_or_else(|| DbError::internal("no transaction bound to context"))?;

            let mut results = Vec::with_capacity(statements.len());
            for (i, statement) in statements.iter().enumerate() {
                let affected = ctx
                    .run(tx.execute(&statement.sql, &statement.args))
                    .await?
                    .map_err(|e| DbError::wrap(e, format!("batch statement {i} failed")))?;
                results.push(affected);
            }
            Ok(results)
        })
        .await
    }

    async fn begin(&self, ctx: &Context, options: &TransactionOptions) -> DbResult<Box<dyn Transaction>> {
        let begin = || async { ctx.run(self.db.begin(options)).await? };

        match &self.breaker {
            Some(breaker) => {
                breaker
                    .execute_if(|e| !ctx.is_done() && is_infrastructure_failure(e), begin)
                    .await
            }
            None => begin().await,
        }
    }

    async fn run_once<F, Fut, T>(
        &self,
        ctx: &Context,
        options: &TransactionOptions,
        f: &mut F,
    ) -> DbResult<T>
    where
        F: FnMut(Context) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let tx = self.begin(ctx, options).await?;
        let handle = TransactionHandle::new(tx);
        let _guard = RollbackGuard(handle.clone());
        debug!(tx_id = %handle.id(), "Transaction started");

        let child = ctx.with_transaction(handle.clone());
        let outcome = AssertUnwindSafe(async { ctx.run(f(child)).await })
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(ctx_err)) => Err(DbError::from(ctx_err)),
            Err(panic) => {
                warn!(tx_id = %handle.id(), "Panic inside transaction, rolling back");
                rollback(&handle).await;
                counter!("txguard_transactions_total", "outcome" => "panicked").increment(1);
                std::panic::resume_unwind(panic);
            }
        };

        match result {
            Ok(value) => {
                handle.commit().await?;
                debug!(tx_id = %handle.id(), "Transaction committed");
                Ok(value)
            }
            Err(err) => {
                rollback(&handle).await;
                Err(err)
            }
        }
    }
}

/// 调用方取消、参数错误等不代表数据库故障，不计入断路器
fn is_infrastructure_failure(err: &DbError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::Unavailable | ErrorKind::Timeout | ErrorKind::Conflict(_)
    )
}

/// 回滚不受上下文取消影响，失败只记录日志，调用方拿到的是原始错误
async fn rollback(handle: &TransactionHandle) {
    match handle.rollback().await {
        Ok(()) => debug!(tx_id = %handle.id(), "Transaction rolled back"),
        Err(e) => warn!(tx_id = %handle.id(), error = %e, "Failed to roll back transaction"),
    }
}

fn into_classified(err: DbError) -> ClassifiedError {
    match err {
        DbError::Classified(classified) => classified,
        other => ClassifiedError::from_source("transaction attempt failed", other),
    }
}

/// 调用方丢弃 future 时回滚未结束的事务
struct RollbackGuard(TransactionHandle);

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        if !self.0.is_finalized() {
            warn!(tx_id = %self.0.id(), "Transaction dropped before completion, rolling back");
            self.0.spawn_rollback();
        }
    }
}
