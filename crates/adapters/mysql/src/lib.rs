//! txguard-adapter-mysql - MySQL 适配器
//!
//! 基于 sqlx `MySqlPool` 实现 [`txguard_ports::Database`]。sqlx 开启事务后无法再修改
//! 隔离级别或访问模式，因此带这些选项的 `begin` 会返回 `InvalidArgument`。

mod config;
mod connection;
mod row;
mod transaction;

pub use config::*;
pub use connection::*;
pub use transaction::MySqlTransaction;
