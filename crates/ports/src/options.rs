//! 事务选项

use serde::{Deserialize, Serialize};
use txguard_common::RetryConfig;

/// 事务隔离级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// 读未提交
    ReadUncommitted,
    /// 读已提交
    ReadCommitted,
    /// 可重复读
    RepeatableRead,
    /// 可串行化
    Serializable,
}

impl IsolationLevel {
    /// 转换为 SQL 字符串
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// 事务访问模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// 读写
    #[default]
    ReadWrite,
    /// 只读
    ReadOnly,
}

impl AccessMode {
    /// 转换为 SQL 字符串
    pub fn as_sql(&self) -> &'static str {
        match self {
            AccessMode::ReadWrite => "READ WRITE",
            AccessMode::ReadOnly => "READ ONLY",
        }
    }
}

/// 事务选项
///
/// 隔离级别为 `None` 时沿用数据库的默认级别；
/// `retry` 覆盖协调器构造时的重试配置，仅对本次调用生效
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionOptions {
    /// 隔离级别
    pub isolation_level: Option<IsolationLevel>,
    /// 访问模式
    pub access_mode: AccessMode,
    /// 是否可延迟（仅对 SERIALIZABLE READ ONLY 有效）
    pub deferrable: bool,
    /// 本次调用的重试配置
    pub retry: Option<RetryConfig>,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置隔离级别
    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// 设置为只读
    pub fn read_only(mut self) -> Self {
        self.access_mode = AccessMode::ReadOnly;
        self
    }

    /// 设置为可串行化
    pub fn serializable(mut self) -> Self {
        self.isolation_level = Some(IsolationLevel::Serializable);
        self
    }

    /// 设置为可延迟
    pub fn deferrable(mut self) -> Self {
        self.deferrable = true;
        self
    }

    /// 覆盖重试配置
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// 是否需要设置会话特性
    pub fn has_characteristics(&self) -> bool {
        self.isolation_level.is_some() || self.access_mode == AccessMode::ReadOnly || self.deferrable
    }

    /// 生成 SET TRANSACTION 语句，全部为默认值时返回 `None`
    pub fn to_sql(&self) -> Option<String> {
        if !self.has_characteristics() {
            return None;
        }

        let mut parts = Vec::with_capacity(3);
        if let Some(level) = self.isolation_level {
            parts.push(format!("ISOLATION LEVEL {}", level.as_sql()));
        }
        parts.push(self.access_mode.as_sql().to_string());

        if self.deferrable
            && self.isolation_level == Some(IsolationLevel::Serializable)
            && self.access_mode == AccessMode::ReadOnly
        {
            parts.push("DEFERRABLE".to_string());
        }

        Some(format!("SET TRANSACTION {}", parts.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_produce_no_sql() {
        assert_eq!(TransactionOptions::new().to_sql(), None);
        assert_eq!(
            TransactionOptions::new()
                .with_retry(RetryConfig::default())
                .to_sql(),
            None
        );
    }

    #[test]
    fn test_transaction_options_sql() {
        let options = TransactionOptions::new()
            .with_isolation_level(IsolationLevel::RepeatableRead)
            .read_only();

        assert_eq!(
            options.to_sql().as_deref(),
            Some("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        );
    }

    #[test]
    fn test_deferrable_option() {
        let options = TransactionOptions::new()
            .serializable()
            .read_only()
            .deferrable();

        assert_eq!(
            options.to_sql().as_deref(),
            Some("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE, READ ONLY, DEFERRABLE")
        );

        // 非 SERIALIZABLE READ ONLY 时忽略 DEFERRABLE
        let sql = TransactionOptions::new().deferrable().to_sql().unwrap();
        assert!(!sql.contains("DEFERRABLE"));
    }
}
