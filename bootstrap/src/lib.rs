//! txguard-bootstrap - 启动骨架
//!
//! 按配置初始化日志、连接数据库并组装事务协调器与健康检查

mod infrastructure;
mod runtime;

pub use infrastructure::*;
pub use runtime::*;
