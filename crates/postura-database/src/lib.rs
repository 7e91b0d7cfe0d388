//! # Postura数据库模块
//!
//! 负责患者、就诊、分析、关键点和备注记录的持久化，提供存储接口、
//! PostgreSQL实现以及用于测试和单机运行的内存实现。

pub mod connection;
pub mod memory;
pub mod models;
pub mod queries;
pub mod store;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use memory::MemoryRecordsStore;
pub use models::*;
pub use queries::DatabaseQueries;
pub use store::RecordsStore;
