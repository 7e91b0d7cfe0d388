//! # Postura脊柱处理模块
//!
//! 封装外部脊柱分析能力：二维关键点/指数分析、标注图生成和三维重建，
//! 并负责校验输出契约、从输出中解析测量值。

pub mod capability;
pub mod command;
pub mod invoker;
pub mod parser;

// 重新导出主要类型
pub use capability::SpineProcessor;
pub use command::CommandSpineProcessor;
pub use invoker::{Output3D, OutputContract, ProcessingInvoker, ANNOTATED_IMAGE_NAME, VISUALIZATION_COUNT};
pub use parser::{build_keypoint_set, extract_angle, parse_angle};
