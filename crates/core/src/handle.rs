//! 事务句柄

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};
use txguard_errors::{DbError, DbResult};
use txguard_ports::{Row, SqlValue, Transaction};
use uuid::Uuid;

use crate::savepoint::SavepointName;

/// 绑定在上下文中的事务
///
/// 克隆共享同一个底层事务。提交和回滚只有第一次调用生效，
/// 之后的调用直接返回 `Ok(())`；结束后再执行语句会返回错误。
#[derive(Clone)]
pub struct TransactionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: Uuid,
    tx: Arc<dyn Transaction>,
    savepoint_seq: AtomicU64,
    finalized: AtomicBool,
    started_at: Instant,
}

impl TransactionHandle {
    pub fn new(tx: Box<dyn Transaction>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: Uuid::now_v7(),
                tx: Arc::from(tx),
                savepoint_seq: AtomicU64::new(0),
                finalized: AtomicBool::new(false),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn started_at(&self) -> Instant {
        self.inner.started_at
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.finalized.load(Ordering::Acquire)
    }

    /// 生成本事务内唯一的保存点名称：`sp_1`、`sp_2`……
    pub fn next_savepoint_name(&self) -> SavepointName {
        let seq = self.inner.savepoint_seq.fetch_add(1, Ordering::Relaxed) + 1;
        SavepointName::sequence(seq)
    }

    fn ensure_active(&self) -> DbResult<()> {
        if self.is_finalized() {
            return Err(DbError::internal(
                "transaction has already been committed or rolled back",
            ));
        }
        Ok(())
    }

    /// 标记为已结束，返回是否由本次调用完成标记
    fn finalize(&self) -> bool {
        !self.inner.finalized.swap(true, Ordering::AcqRel)
    }

    /// 在后台回滚未结束的事务，用于调用方丢弃 future 的情况
    pub(crate) fn spawn_rollback(&self) {
        if !self.finalize() {
            return;
        }

        let tx = Arc::clone(&self.inner.tx);
        let id = self.inner.id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = tx.rollback().await {
                        warn!(tx_id = %id, error = %e, "Background rollback failed");
                    } else {
                        debug!(tx_id = %id, "Abandoned transaction rolled back");
                    }
                });
            }
            Err(_) => {
                // 没有运行时，交给驱动在连接归还时回滚
                warn!(tx_id = %id, "No runtime available for rollback of abandoned transaction");
            }
        }
    }
}

#[async_trait]
impl Transaction for TransactionHandle {
    async fn execute(&self, sql: &str, args: &[SqlValue]) -> DbResult<u64> {
        self.ensure_active()?;
        self.inner.tx.execute(sql, args).await
    }

    async fn fetch_all(&self, sql: &str, args: &[SqlValue]) -> DbResult<Vec<Row>> {
        self.ensure_active()?;
        self.inner.tx.fetch_all(sql, args).await
    }

    async fn commit(&self) -> DbResult<()> {
        if !self.finalize() {
            return Ok(());
        }
        self.inner.tx.commit().await
    }

    async fn rollback(&self) -> DbResult<()> {
        if !self.finalize() {
            return Ok(());
        }
        self.inner.tx.rollback().await
    }
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("id", &self.inner.id)
            .field("finalized", &self.is_finalized())
            .finish()
    }
}
