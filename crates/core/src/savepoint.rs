//! 保存点管理
//!
//! 保存点名称不能作为绑定参数传递，只能拼接进 SQL，
//! 所以所有入口都先经过 [`SavepointName`] 校验

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use tracing::{debug, warn};
use txguard_errors::{DbError, DbResult};
use txguard_ports::Transaction;

use crate::context::Context;

/// 经过校验的保存点名称，匹配 `[A-Za-z_][A-Za-z0-9_]*`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SavepointName(String);

impl SavepointName {
    pub fn new(name: impl Into<String>) -> DbResult<Self> {
        let name = name.into();
        if let Err(reason) = validate(&name) {
            return Err(DbError::InvalidSavepointName { name, reason });
        }
        Ok(Self(name))
    }

    pub(crate) fn sequence(seq: u64) -> Self {
        Self(format!("sp_{seq}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate(name: &str) -> Result<(), &'static str> {
    let mut bytes = name.bytes();
    let Some(first) = bytes.next() else {
        return Err("savepoint name cannot be empty");
    };
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return Err("savepoint name must start with a letter or underscore");
    }
    if !bytes.all(|c| c.is_ascii_alphanumeric() || c == b'_') {
        return Err("savepoint name can only contain alphanumeric characters and underscores");
    }
    Ok(())
}

impl TryFrom<&str> for SavepointName {
    type Error = DbError;

    fn try_from(value: &str) -> DbResult<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for SavepointName {
    type Error = DbError;

    fn try_from(value: String) -> DbResult<Self> {
        Self::new(value)
    }
}

impl FromStr for SavepointName {
    type Err = DbError;

    fn from_str(s: &str) -> DbResult<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for SavepointName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SavepointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

async fn run_command(ctx: &Context, tx: &dyn Transaction, sql: String, action: &str) -> DbResult<()> {
    let result = ctx.run(tx.execute(&sql, &[])).await?;
    result.map(|_| ()).map_err(|e| DbError::wrap(e, format!("failed to {action}")))
}

/// 创建保存点
pub async fn savepoint(ctx: &Context, tx: &dyn Transaction, name: &str) -> DbResult<()> {
    let name = SavepointName::new(name)?;
    run_command(ctx, tx, format!("SAVEPOINT {name}"), "create savepoint").await?;
    debug!(savepoint = %name, "Savepoint created");
    Ok(())
}

/// 回滚到保存点
pub async fn rollback_to_savepoint(ctx: &Context, tx: &dyn Transaction, name: &str) -> DbResult<()> {
    let name = SavepointName::new(name)?;
    run_command(ctx, tx, format!("ROLLBACK TO SAVEPOINT {name}"), "rollback to savepoint").await?;
    debug!(savepoint = %name, "Rolled back to savepoint");
    Ok(())
}

/// 释放保存点
pub async fn release_savepoint(ctx: &Context, tx: &dyn Transaction, name: &str) -> DbResult<()> {
    let name = SavepointName::new(name)?;
    run_command(ctx, tx, format!("RELEASE SAVEPOINT {name}"), "release savepoint").await?;
    debug!(savepoint = %name, "Savepoint released");
    Ok(())
}

/// 在保存点内执行 `f`
///
/// `f` 失败时回滚到保存点并返回 `f` 的错误，外层事务仍可继续使用；
/// 成功时释放保存点
pub async fn nested_transaction<F, Fut, T>(
    ctx: &Context,
    tx: &dyn Transaction,
    name: &str,
    f: F,
) -> DbResult<T>
where
    F: FnOnce(Context) -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    savepoint(ctx, tx, name).await?;

    match f(ctx.clone()).await {
        Ok(value) => {
            release_savepoint(ctx, tx, name).await?;
            Ok(value)
        }
        Err(e) => {
            warn!(savepoint = %name, error = %e, "Nested transaction failed, rolling back to savepoint");
            rollback_to_savepoint(ctx, tx, name).await?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;
    use txguard_errors::{ConflictKind, DriverError, ErrorKind};
    use txguard_ports::MockTransaction;

    #[test]
    fn test_valid_names() {
        for name in ["sp", "_sp", "sp_1", "Outer_Step2", "_"] {
            assert_eq!(SavepointName::new(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "1sp", "sp-1", "sp 1", "sp;DROP TABLE users", "sp\"", "savepoint\u{e9}"] {
            let err = SavepointName::new(name).unwrap_err();
            assert!(
                matches!(err, DbError::InvalidSavepointName { .. }),
                "{name:?} should be rejected"
            );
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn test_try_from() {
        assert!(SavepointName::try_from("ok").is_ok());
        assert!("bad name".parse::<SavepointName>().is_err());
    }

    #[tokio::test]
    async fn test_invalid_name_issues_no_sql() {
        let mut tx = MockTransaction::new();
        tx.expect_execute().never();

        let ctx = Context::background();
        let err = savepoint(&ctx, &tx, "x; DROP TABLE users").await.unwrap_err();
        assert!(matches!(err, DbError::InvalidSavepointName { .. }));
        assert!(rollback_to_savepoint(&ctx, &tx, "").await.is_err());
        assert!(release_savepoint(&ctx, &tx, "9").await.is_err());
    }

    #[tokio::test]
    async fn test_savepoint_sql() {
        let mut seq = Sequence::new();
        let mut tx = MockTransaction::new();
        for expected in ["SAVEPOINT step", "ROLLBACK TO SAVEPOINT step", "RELEASE SAVEPOINT step"] {
            tx.expect_execute()
                .withf(move |sql, args| sql == expected && args.is_empty())
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(0));
        }

        let ctx = Context::background();
        savepoint(&ctx, &tx, "step").await.unwrap();
        rollback_to_savepoint(&ctx, &tx, "step").await.unwrap();
        release_savepoint(&ctx, &tx, "step").await.unwrap();
    }

    #[tokio::test]
    async fn test_nested_transaction_rolls_back_on_error() {
        let mut seq = Sequence::new();
        let mut tx = MockTransaction::new();
        tx.expect_execute()
            .withf(|sql, _| sql == "SAVEPOINT profile")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(0));
        tx.expect_execute()
            .withf(|sql, _| sql == "ROLLBACK TO SAVEPOINT profile")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(0));

        let ctx = Context::background();
        let result: DbResult<()> = nested_transaction(&ctx, &tx, "profile", |_| async {
            Err(DbError::already_exists("profile exists"))
        })
        .await;

        assert!(result.unwrap_err().is_unique_violation());
    }

    #[tokio::test]
    async fn test_nested_transaction_releases_on_success() {
        let mut seq = Sequence::new();
        let mut tx = MockTransaction::new();
        tx.expect_execute()
            .withf(|sql, _| sql == "SAVEPOINT audit")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(0));
        tx.expect_execute()
            .withf(|sql, _| sql == "RELEASE SAVEPOINT audit")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(0));

        let ctx = Context::background();
        let value = nested_transaction(&ctx, &tx, "audit", |_| async { Ok(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_savepoint_command_failure_is_classified() {
        let mut tx = MockTransaction::new();
        tx.expect_execute().times(1).returning(|_, _| {
            Err(DbError::wrap(
                DriverError::sqlstate("40P01", "deadlock detected"),
                "exec",
            ))
        });

        let ctx = Context::background();
        let err = savepoint(&ctx, &tx, "step").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict(ConflictKind::Deadlock));
        assert!(err.to_string().contains("failed to create savepoint"));
    }

    #[tokio::test]
    async fn test_cancelled_context_skips_command() {
        let mut tx = MockTransaction::new();
        tx.expect_execute().never();

        let ctx = Context::background();
        ctx.cancel();
        let err = savepoint(&ctx, &tx, "step").await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
