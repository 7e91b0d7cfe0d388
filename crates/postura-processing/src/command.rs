//! 通过外部可执行程序提供的脊柱分析能力
//!
//! 调用约定：
//! - `analyze-2d --image <原图> --output <目录>`：标准输出为报告JSON
//! - `annotate --image <原图> --output <文件>`：标准输入为报告JSON
//! - `reconstruct-3d --image <原图> --model <参考模型> --output <目录>`
//!
//! 退出码非0视为处理失败，错误原因取标准错误输出的末尾几行。

use async_trait::async_trait;
use postura_core::{PosturaError, Report2D, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::capability::SpineProcessor;

const STDERR_TAIL_LINES: usize = 5;

/// 外部程序适配器
#[derive(Debug, Clone)]
pub struct CommandSpineProcessor {
    program: PathBuf,
}

impl CommandSpineProcessor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // 调用方超时丢弃future时结束子进程
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command, stdin_payload: Option<Vec<u8>>) -> Result<Output> {
        if stdin_payload.is_some() {
            cmd.stdin(Stdio::piped());
        }

        let mut child = cmd.spawn().map_err(|e| {
            PosturaError::processing_failed(format!(
                "无法启动 {}: {}",
                self.program.display(),
                e
            ))
        })?;

        if let Some(payload) = stdin_payload {
            if let Some(mut stdin) = child.stdin.take() {
                match stdin.write_all(&payload).await {
                    Ok(()) => {}
                    // 子进程未读完输入就退出，以退出状态为准
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                        debug!("{} closed stdin early", self.program.display());
                    }
                    Err(e) => {
                        return Err(PosturaError::processing_failed(format!("写入标准输入失败: {}", e)));
                    }
                }
                drop(stdin);
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(PosturaError::processing_failed)?;
        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(PosturaError::processing_failed(format!(
                "exit {}: {}",
                code,
                stderr_tail(&output.stderr)
            )));
        }

        Ok(output)
    }
}

/// 标准错误输出的最后几行
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.trim().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[async_trait]
impl SpineProcessor for CommandSpineProcessor {
    async fn process_2d(&self, image: &Path, output_dir: &Path) -> Result<Report2D> {
        debug!("Running 2D analysis on {}", image.display());
        let cmd = self.command([
            OsStr::new("analyze-2d"),
            OsStr::new("--image"),
            image.as_os_str(),
            OsStr::new("--output"),
            output_dir.as_os_str(),
        ]);
        let output = self.run(cmd, None).await?;

        serde_json::from_slice(&output.stdout)
            .map_err(|e| PosturaError::processing_failed(format!("二维报告格式错误: {}", e)))
    }

    async fn annotate(&self, report: &Report2D, image: &Path, output_file: &Path) -> Result<()> {
        debug!("Annotating {} into {}", image.display(), output_file.display());
        let cmd = self.command([
            OsStr::new("annotate"),
            OsStr::new("--image"),
            image.as_os_str(),
            OsStr::new("--output"),
            output_file.as_os_str(),
        ]);
        let payload = serde_json::to_vec(report)?;
        self.run(cmd, Some(payload)).await?;
        Ok(())
    }

    async fn process_3d(&self, image: &Path, reference_model: &Path, output_dir: &Path) -> Result<()> {
        debug!("Running 3D reconstruction on {}", image.display());
        let cmd = self.command([
            OsStr::new("reconstruct-3d"),
            OsStr::new("--image"),
            image.as_os_str(),
            OsStr::new("--model"),
            reference_model.as_os_str(),
            OsStr::new("--output"),
            output_dir.as_os_str(),
        ]);
        self.run(cmd, None).await?;
        Ok(())
    }
}
