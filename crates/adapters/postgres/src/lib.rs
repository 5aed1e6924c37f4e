//! txguard-adapter-postgres - PostgreSQL 适配器
//!
//! 基于 sqlx `PgPool` 实现 [`txguard_ports::Database`]。参数与结果行均以
//! `serde_json::Value` 表示。

mod config;
mod connection;
mod row;
mod transaction;

pub use config::*;
pub use connection::*;
pub use transaction::PostgresTransaction;
