//! # Postura存储模块
//!
//! 负责上传原图与处理生成文件的存储，以及就诊制品目录的确定性布局。

pub mod layout;
pub mod storage;

pub use layout::*;
pub use storage::*;
