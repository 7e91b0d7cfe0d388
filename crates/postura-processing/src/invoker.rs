//! 处理调用器
//!
//! 包装对脊柱分析能力的调用：统一超时、把任何失败转换为 `ProcessingFailed`，
//! 并在三维重建后校验输出契约。不做自动重试，重试与否由调用方决定。

use postura_core::{PosturaError, Report2D, Result};
use postura_storage::ArtifactStore;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::capability::SpineProcessor;

/// 标注图文件名
pub const ANNOTATED_IMAGE_NAME: &str = "AnnotatedImage.jpg";

/// 三维重建必须生成的可视化文件数
pub const VISUALIZATION_COUNT: usize = 3;

/// 三维重建输出契约
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputContract {
    pub visualization_extension: String,
    pub angle_file_suffix: String,
}

impl Default for OutputContract {
    fn default() -> Self {
        Self {
            visualization_extension: "html".to_string(),
            angle_file_suffix: "_cobb_angle.txt".to_string(),
        }
    }
}

/// 三维重建的输出文件，可视化文件按文件名排序
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output3D {
    pub visualizations: [PathBuf; VISUALIZATION_COUNT],
    pub angle_file: PathBuf,
}

pub struct ProcessingInvoker {
    processor: Arc<dyn SpineProcessor>,
    store: ArtifactStore,
    contract: OutputContract,
    timeout: Duration,
}

impl ProcessingInvoker {
    pub fn new(
        processor: Arc<dyn SpineProcessor>,
        store: ArtifactStore,
        contract: OutputContract,
        timeout: Duration,
    ) -> Self {
        Self {
            processor,
            store,
            contract,
            timeout,
        }
    }

    pub fn contract(&self) -> &OutputContract {
        &self.contract
    }

    /// 执行一次能力调用，超时和任何错误都归为 `ProcessingFailed`
    async fn call<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err @ PosturaError::ProcessingFailed { .. })) => Err(err),
            Ok(Err(err)) => Err(PosturaError::processing_failed(format!("{}: {}", operation, err))),
            Err(_) => Err(PosturaError::processing_failed(format!(
                "{} 超时 ({} 秒)",
                operation,
                self.timeout.as_secs()
            ))),
        }
    }

    /// 二维分析
    pub async fn run_2d(&self, image: &Path, output_dir: &Path) -> Result<Report2D> {
        let report = self
            .call("analyze-2d", self.processor.process_2d(image, output_dir))
            .await?;
        debug!("2D report received for {}", image.display());
        Ok(report)
    }

    /// 生成标注图，返回标注图路径
    ///
    /// 调用前先删除上次运行留下的标注图，调用后必须重新生成。
    pub async fn annotate(&self, report: &Report2D, image: &Path, output_dir: &Path) -> Result<PathBuf> {
        let output_file = output_dir.join(ANNOTATED_IMAGE_NAME);
        self.store.remove_file(&output_file).await?;
        self.call("annotate", self.processor.annotate(report, image, &output_file))
            .await?;

        if !self.store.exists(&output_file).await? {
            return Err(PosturaError::IncompleteOutput {
                artifact: ANNOTATED_IMAGE_NAME.to_string(),
                found: 0,
                expected: 1,
            });
        }
        Ok(output_file)
    }

    /// 三维重建，并校验输出目录中恰好有3个可视化文件和1个角度文件
    ///
    /// 角度文件名为 `*{photo_stem}{angle_file_suffix}`。
    pub async fn run_3d(
        &self,
        image: &Path,
        reference_model: &Path,
        output_dir: &Path,
        photo_stem: &str,
    ) -> Result<Output3D> {
        self.call(
            "reconstruct-3d",
            self.processor.process_3d(image, reference_model, output_dir),
        )
        .await?;

        let visualizations = self
            .store
            .list_files(output_dir, &self.contract.visualization_extension)
            .await?;
        let found = visualizations.len();
        let visualizations: [PathBuf; VISUALIZATION_COUNT] =
            visualizations
                .try_into()
                .map_err(|_| PosturaError::IncompleteOutput {
                    artifact: format!("*.{}", self.contract.visualization_extension),
                    found,
                    expected: VISUALIZATION_COUNT,
                })?;

        let angle_suffix = format!("{}{}", photo_stem, self.contract.angle_file_suffix);
        let mut angle_files = self.store.find_by_suffix(output_dir, &angle_suffix).await?;
        if angle_files.len() != 1 {
            return Err(PosturaError::IncompleteOutput {
                artifact: format!("*{}", angle_suffix),
                found: angle_files.len(),
                expected: 1,
            });
        }
        let angle_file = angle_files.remove(0);

        info!(
            "3D output verified in {}: {} visualizations, angle file {}",
            output_dir.display(),
            VISUALIZATION_COUNT,
            angle_file.display()
        );
        Ok(Output3D {
            visualizations,
            angle_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use postura_core::{ErrorKind, Point, PostureIndices};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn report() -> Report2D {
        let p = Point { x: 1.0, y: 1.0 };
        Report2D {
            c7: p,
            t7: p,
            left_hip: p,
            right_hip: p,
            mid_hip: p,
            left_scapula: p,
            right_scapula: p,
            left_shoulder: p,
            right_shoulder: p,
            left_side: p,
            right_side: p,
            left_under_arm: p,
            right_under_arm: p,
            indices: PostureIndices::default(),
        }
    }

    /// 写出指定数量可视化文件的测试能力
    struct FileWriter {
        visualizations: usize,
        angle_files: usize,
        delay: Duration,
        calls: AtomicUsize,
        fail_2d: bool,
        write_annotation: bool,
    }

    impl FileWriter {
        fn new(visualizations: usize, angle_files: usize) -> Self {
            Self {
                visualizations,
                angle_files,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                fail_2d: false,
                write_annotation: true,
            }
        }
    }

    #[async_trait]
    impl SpineProcessor for FileWriter {
        async fn process_2d(&self, _image: &Path, _output_dir: &Path) -> Result<Report2D> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_2d {
                return Err(PosturaError::Validation("no person detected".to_string()));
            }
            Ok(report())
        }

        async fn annotate(&self, _report: &Report2D, _image: &Path, output_file: &Path) -> Result<()> {
            if self.write_annotation {
                tokio::fs::write(output_file, b"jpeg").await?;
            }
            Ok(())
        }

        async fn process_3d(&self, _image: &Path, _model: &Path, output_dir: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            for i in 0..self.visualizations {
                tokio::fs::write(output_dir.join(format!("view_{}.html", i)), "<html/>").await?;
            }
            for i in 0..self.angle_files {
                let name = format!("run{}_photo_cobb_angle.txt", i);
                tokio::fs::write(output_dir.join(name), "Cobb angle: 12.50").await?;
            }
            Ok(())
        }
    }

    fn invoker(dir: &TempDir, processor: Arc<dyn SpineProcessor>, timeout: Duration) -> ProcessingInvoker {
        let store = ArtifactStore::new(dir.path(), "images", "processed_images");
        ProcessingInvoker::new(processor, store, OutputContract::default(), timeout)
    }

    #[tokio::test]
    async fn test_run_3d_accepts_complete_output() {
        let dir = TempDir::new().unwrap();
        let invoker = invoker(&dir, Arc::new(FileWriter::new(3, 1)), Duration::from_secs(5));

        let output = invoker
            .run_3d(Path::new("photo.jpg"), Path::new("ref.stl"), dir.path(), "photo")
            .await
            .unwrap();
        assert!(output.visualizations[0].ends_with("view_0.html"));
        assert!(output.visualizations[2].ends_with("view_2.html"));
        assert!(output.angle_file.ends_with("run0_photo_cobb_angle.txt"));
    }

    #[tokio::test]
    async fn test_run_3d_rejects_wrong_visualization_count() {
        for count in [0, 2, 4] {
            let dir = TempDir::new().unwrap();
            let invoker = invoker(&dir, Arc::new(FileWriter::new(count, 1)), Duration::from_secs(5));

            let err = invoker
                .run_3d(Path::new("photo.jpg"), Path::new("ref.stl"), dir.path(), "photo")
                .await
                .unwrap_err();
            match err {
                PosturaError::IncompleteOutput { found, expected, .. } => {
                    assert_eq!(found, count);
                    assert_eq!(expected, 3);
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_run_3d_requires_single_angle_file() {
        for count in [0, 2] {
            let dir = TempDir::new().unwrap();
            let invoker = invoker(&dir, Arc::new(FileWriter::new(3, count)), Duration::from_secs(5));

            let err = invoker
                .run_3d(Path::new("photo.jpg"), Path::new("ref.stl"), dir.path(), "photo")
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::IncompleteOutput);
        }
    }

    #[tokio::test]
    async fn test_timeout_is_processing_failed_without_retry() {
        let dir = TempDir::new().unwrap();
        let mut slow = FileWriter::new(3, 1);
        slow.delay = Duration::from_secs(30);
        let slow = Arc::new(slow);
        let invoker = invoker(&dir, slow.clone(), Duration::from_millis(20));

        let err = invoker
            .run_3d(Path::new("photo.jpg"), Path::new("ref.stl"), dir.path(), "photo")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessingFailed);
        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capability_errors_become_processing_failed() {
        let dir = TempDir::new().unwrap();
        let mut failing = FileWriter::new(3, 1);
        failing.fail_2d = true;
        let failing = Arc::new(failing);
        let invoker = invoker(&dir, failing.clone(), Duration::from_secs(5));

        let err = invoker.run_2d(Path::new("photo.jpg"), dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessingFailed);
        assert!(err.to_string().contains("no person detected"));
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_annotate_requires_written_image() {
        let dir = TempDir::new().unwrap();
        let invoker_ok = invoker(&dir, Arc::new(FileWriter::new(3, 1)), Duration::from_secs(5));
        let path = invoker_ok
            .annotate(&report(), Path::new("photo.jpg"), dir.path())
            .await
            .unwrap();
        assert!(path.ends_with(ANNOTATED_IMAGE_NAME));

        let other = TempDir::new().unwrap();
        let mut silent = FileWriter::new(3, 1);
        silent.write_annotation = false;
        let invoker_silent = invoker(&other, Arc::new(silent), Duration::from_secs(5));
        let err = invoker_silent
            .annotate(&report(), Path::new("photo.jpg"), other.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompleteOutput);
    }

    #[tokio::test]
    async fn test_annotate_ignores_previous_image() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join(ANNOTATED_IMAGE_NAME), b"old").await.unwrap();

        let mut silent = FileWriter::new(3, 1);
        silent.write_annotation = false;
        let invoker = invoker(&dir, Arc::new(silent), Duration::from_secs(5));
        let err = invoker
            .annotate(&report(), Path::new("photo.jpg"), dir.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompleteOutput);
        assert!(!dir.path().join(ANNOTATED_IMAGE_NAME).exists());
    }
}
