//! 数据库与事务抽象
//!
//! 协调器、保存点和健康检查只通过这两个 trait 访问驱动，
//! 适配器负责把驱动错误转换为已分类的 [`DbError`](txguard_errors::DbError)

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use txguard_errors::DbResult;

use crate::options::TransactionOptions;

/// 绑定参数
pub type SqlValue = serde_json::Value;

/// 查询结果行，列名到值
pub type Row = serde_json::Map<String, serde_json::Value>;

/// 驱动类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Postgres,
    MySql,
}

impl Driver {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 连接池统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// 正在使用的连接
    pub acquired: u32,
    /// 空闲连接
    pub idle: u32,
    /// 当前连接总数
    pub total: u32,
    /// 连接池上限
    pub max: u32,
}

impl PoolStats {
    /// 由连接总数与空闲数推算使用中的连接
    pub fn from_counts(total: u32, idle: u32, max: u32) -> Self {
        Self {
            acquired: total.saturating_sub(idle),
            idle,
            total,
            max,
        }
    }

    /// 使用率，上限为 0 时返回 0
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        f64::from(self.acquired) / f64::from(self.max)
    }
}

/// 一个进行中的数据库事务
///
/// `commit` 与 `rollback` 只有第一次调用生效，之后均为空操作
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait Transaction: Send + Sync {
    /// 执行语句，返回受影响行数
    async fn execute(&self, sql: &str, args: &[SqlValue]) -> DbResult<u64>;

    /// 执行查询
    async fn fetch_all(&self, sql: &str, args: &[SqlValue]) -> DbResult<Vec<Row>>;

    async fn commit(&self) -> DbResult<()>;

    async fn rollback(&self) -> DbResult<()>;
}

/// 连接池
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    /// 开始事务
    async fn begin(&self, options: &TransactionOptions) -> DbResult<Box<dyn Transaction>>;

    /// 连接存活检查
    async fn ping(&self) -> DbResult<()>;

    /// 完整往返检查（`SELECT 1`）
    async fn ping_detailed(&self) -> DbResult<()>;

    /// 在事务之外执行查询
    async fn fetch_all(&self, sql: &str, args: &[SqlValue]) -> DbResult<Vec<Row>>;

    fn pool_stats(&self) -> PoolStats;

    fn driver(&self) -> Driver;

    /// 关闭连接池，等待借出的连接归还
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization() {
        let stats = PoolStats {
            acquired: 9,
            idle: 1,
            total: 10,
            max: 10,
        };
        assert!((stats.utilization() - 0.9).abs() < f64::EPSILON);
        assert_eq!(PoolStats::default().utilization(), 0.0);
    }

    #[test]
    fn test_from_counts() {
        let stats = PoolStats::from_counts(5, 2, 10);
        assert_eq!(stats.acquired, 3);
        assert_eq!(PoolStats::from_counts(1, 3, 10).acquired, 0);
    }

    #[test]
    fn test_driver_serde() {
        assert_eq!(serde_json::to_string(&Driver::MySql).unwrap(), "\"mysql\"");
        let driver: Driver = serde_json::from_str("\"postgres\"").unwrap();
        assert_eq!(driver, Driver::Postgres);
    }

    #[tokio::test]
    async fn test_mock_transaction() {
        let mut tx = MockTransaction::new();
        tx.expect_execute()
            .withf(|sql, args| sql == "DELETE FROM sessions" && args.is_empty())
            .times(1)
            .returning(|_, _| Ok(3));

        assert_eq!(tx.execute("DELETE FROM sessions", &[]).await.unwrap(), 3);
    }
}
