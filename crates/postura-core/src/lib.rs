//! # Postura Core
//!
//! 体态评估系统的核心模块，提供就诊、分析、关键点等基础数据结构、统一错误定义和通用工具。

pub mod error;
pub mod models;
pub mod utils;

pub use error::{ErrorKind, PosturaError, Result};
pub use models::*;
