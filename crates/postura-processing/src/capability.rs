//! 外部脊柱分析能力接口

use async_trait::async_trait;
use postura_core::{Report2D, Result};
use std::path::Path;

/// 脊柱分析能力
///
/// 实现方不负责重试。所有调用都可能耗时很长，必须是可挂起的异步操作。
#[async_trait]
pub trait SpineProcessor: Send + Sync {
    /// 二维分析：返回13个标志点和6个姿态指数
    async fn process_2d(&self, image: &Path, output_dir: &Path) -> Result<Report2D>;

    /// 在原图上绘制报告中的标志点，写入 `output_file`
    async fn annotate(&self, report: &Report2D, image: &Path, output_file: &Path) -> Result<()>;

    /// 三维重建：在 `output_dir` 中写出3个可视化文件和1个角度文本文件
    async fn process_3d(&self, image: &Path, reference_model: &Path, output_dir: &Path) -> Result<()>;
}
