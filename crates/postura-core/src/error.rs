//! 错误定义模块

use std::fmt;
use std::path::Path;
use thiserror::Error;

/// 体态评估系统统一错误类型
#[derive(Error, Debug)]
pub enum PosturaError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("存储不可用: {path}: {reason}")]
    StorageUnavailable { path: String, reason: String },

    #[error("脊柱处理失败: {cause}")]
    ProcessingFailed { cause: String },

    #[error("处理输出不完整: {artifact} 期望 {expected} 个, 实际 {found} 个")]
    IncompleteOutput {
        artifact: String,
        found: usize,
        expected: usize,
    },

    #[error("持久化未生效: {operation} 影响行数为0")]
    PersistenceNoOp { operation: String },

    #[error("无法从文本中解析测量值: {text:?}")]
    MeasurementUnparseable { text: String },

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("无效状态转换: 从 {from} 到 {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 错误分类，供调用方按类别匹配而不必比较消息文本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Database,
    StorageUnavailable,
    ProcessingFailed,
    IncompleteOutput,
    PersistenceNoOp,
    MeasurementUnparseable,
    NotFound,
    Validation,
    InvalidStateTransition,
    Io,
    Serialization,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Config => "Config",
            ErrorKind::Database => "Database",
            ErrorKind::StorageUnavailable => "StorageUnavailable",
            ErrorKind::ProcessingFailed => "ProcessingFailed",
            ErrorKind::IncompleteOutput => "IncompleteOutput",
            ErrorKind::PersistenceNoOp => "PersistenceNoOp",
            ErrorKind::MeasurementUnparseable => "MeasurementUnparseable",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Validation => "Validation",
            ErrorKind::InvalidStateTransition => "InvalidStateTransition",
            ErrorKind::Io => "Io",
            ErrorKind::Serialization => "Serialization",
        };
        f.write_str(name)
    }
}

impl PosturaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PosturaError::Config(_) => ErrorKind::Config,
            PosturaError::Database(_) => ErrorKind::Database,
            PosturaError::StorageUnavailable { .. } => ErrorKind::StorageUnavailable,
            PosturaError::ProcessingFailed { .. } => ErrorKind::ProcessingFailed,
            PosturaError::IncompleteOutput { .. } => ErrorKind::IncompleteOutput,
            PosturaError::PersistenceNoOp { .. } => ErrorKind::PersistenceNoOp,
            PosturaError::MeasurementUnparseable { .. } => ErrorKind::MeasurementUnparseable,
            PosturaError::NotFound(_) => ErrorKind::NotFound,
            PosturaError::Validation(_) => ErrorKind::Validation,
            PosturaError::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            PosturaError::Io(_) => ErrorKind::Io,
            PosturaError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// 外部处理能力失败
    pub fn processing_failed(cause: impl fmt::Display) -> Self {
        PosturaError::ProcessingFailed {
            cause: cause.to_string(),
        }
    }

    /// 制品存储在指定路径上的IO失败
    pub fn storage_unavailable(path: &Path, reason: impl fmt::Display) -> Self {
        PosturaError::StorageUnavailable {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn persistence_no_op(operation: impl Into<String>) -> Self {
        PosturaError::PersistenceNoOp {
            operation: operation.into(),
        }
    }
}

/// 体态评估系统统一结果类型
pub type Result<T> = std::result::Result<T, PosturaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        let err = PosturaError::processing_failed("timeout");
        assert_eq!(err.kind(), ErrorKind::ProcessingFailed);

        let err = PosturaError::IncompleteOutput {
            artifact: "visualization".to_string(),
            found: 2,
            expected: 3,
        };
        assert_eq!(err.kind(), ErrorKind::IncompleteOutput);
        assert!(err.to_string().contains("期望 3 个"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: PosturaError = io.into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
