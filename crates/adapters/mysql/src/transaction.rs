//! MySQL 事务

use async_trait::async_trait;
use sqlx::MySql;
use tokio::sync::Mutex;
use tracing::debug;
use txguard_common::QueryObserver;
use txguard_errors::{DbError, DbResult};
use txguard_ports::{Row, SqlValue, Transaction};

use crate::row::{bind_all, to_json_row};

type MySqlTx = sqlx::Transaction<'static, MySql>;

/// 结束后内部事务被取走，重复提交 / 回滚为空操作
pub struct MySqlTransaction {
    tx: Mutex<Option<MySqlTx>>,
    observer: QueryObserver,
}

impl MySqlTransaction {
    pub(crate) fn new(tx: MySqlTx, observer: QueryObserver) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
            observer,
        }
    }
}

fn finished() -> DbError {
    DbError::internal("transaction already finished")
}

#[async_trait]
impl Transaction for MySqlTransaction {
    async fn execute(&self, sql: &str, args: &[SqlValue]) -> DbResult<u64> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;

        let result = self
            .observer
            .observe("execute", sql, async {
                bind_all(sql, args)
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| DbError::wrap(e, "failed to execute statement"))
            })
            .await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, sql: &str, args: &[SqlValue]) -> DbResult<Vec<Row>> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;

        let rows = self
            .observer
            .observe("fetch_all", sql, async {
                bind_all(sql, args)
                    .fetch_all(&mut **tx)
                    .await
                    .map_err(|e| DbError::wrap(e, "failed to execute query"))
            })
            .await?;
        rows.iter().map(to_json_row).collect()
    }

    async fn commit(&self) -> DbResult<()> {
        let Some(tx) = self.tx.lock().await.take() else {
            return Ok(());
        };
        tx.commit()
            .await
            .map_err(|e| DbError::wrap(e, "failed to commit transaction"))?;
        debug!("MySQL transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> DbResult<()> {
        let Some(tx) = self.tx.lock().await.take() else {
            return Ok(());
        };
        tx.rollback()
            .await
            .map_err(|e| DbError::wrap(e, "failed to rollback transaction"))?;
        debug!("MySQL transaction rolled back");
        Ok(())
    }
}
