//! txguard-ports - 驱动抽象层
//!
//! 定义协调器依赖的连接池与事务接口，具体实现见 adapters

mod database;
mod options;

pub use database::*;
pub use options::*;
