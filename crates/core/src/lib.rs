//! txguard-core - 事务弹性层
//!
//! - [`TransactionCoordinator`]: 基于上下文传播的事务、分类重试、panic 安全回滚
//! - [`savepoint`]: 保存点与嵌套事务
//! - [`HealthCache`]: 带缓存的存活 / 就绪检查
//!
//! ```ignore
//! let coordinator = TransactionCoordinator::new(db, RetryConfig::default());
//! coordinator
//!     .atomically(&ctx, |ctx| async move {
//!         let tx = tx_from_context(&ctx).expect("bound by atomically");
//!         tx.execute("UPDATE accounts SET balance = balance - $1 WHERE id = $2", &[json!(10), json!(1)])
//!             .await?;
//!         // 嵌套调用复用同一个事务
//!         ledger.record(&ctx, 10).await
//!     })
//!     .await?;
//! ```

pub mod context;
pub mod handle;
pub mod health;
pub mod savepoint;
pub mod transactor;

pub use context::{Context, tx_from_context};
pub use handle::TransactionHandle;
pub use health::{
    CustomCheckResult, HealthCache, HealthCheck, HealthCheckResult, HealthConfig, HealthStatus,
    PoolAnalysis, QueryPerformanceCheck, TableExistsCheck, analyze_pool,
};
pub use savepoint::{
    SavepointName, nested_transaction, release_savepoint, rollback_to_savepoint, savepoint,
};
pub use transactor::{Statement, TransactionCoordinator};
