//! 就诊制品目录布局
//!
//! 目录名是 (患者ID, 记录类型, 记录ID) 的纯函数：
//! `processed_images/Patient_{pid}/Appointment_{aid}` 与 `.../Analysis_{nid}`。

use postura_core::{AnalysisId, AppointmentId, PatientId, PosturaError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::storage::ArtifactStore;

/// 就诊目录所属的记录类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaseKind {
    Appointment,
    Analysis,
}

impl CaseKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            CaseKind::Appointment => "Appointment",
            CaseKind::Analysis => "Analysis",
        }
    }
}

/// 目录键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaseRef {
    pub kind: CaseKind,
    pub id: i64,
}

impl From<AppointmentId> for CaseRef {
    fn from(id: AppointmentId) -> Self {
        Self {
            kind: CaseKind::Appointment,
            id: id.0,
        }
    }
}

impl From<AnalysisId> for CaseRef {
    fn from(id: AnalysisId) -> Self {
        Self {
            kind: CaseKind::Analysis,
            id: id.0,
        }
    }
}

impl fmt::Display for CaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind.prefix(), self.id)
    }
}

/// 相对于生成文件根目录的就诊目录
pub fn visit_folder_relative(patient_id: PatientId, case: CaseRef) -> PathBuf {
    PathBuf::from(format!("Patient_{}", patient_id)).join(case.to_string())
}

/// 已定位的就诊目录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitFolder {
    absolute: PathBuf,
    web_prefix: String,
}

impl VisitFolder {
    pub fn path(&self) -> &Path {
        &self.absolute
    }

    /// 目录中文件的Web相对引用，例如 `/processed_images/Patient_1/Analysis_2/AnnotatedImage.jpg`
    pub fn web_path(&self, file_name: &str) -> String {
        format!("{}/{}", self.web_prefix, file_name)
    }

    /// 以Web引用表示目录中某个已存在的文件
    pub fn web_path_of(&self, file: &Path) -> Result<String> {
        let name = file
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                PosturaError::Validation(format!("无效的制品文件名: {}", file.display()))
            })?;
        Ok(self.web_path(name))
    }
}

/// 目录布局管理器，只创建目录，不写文件
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    processed_root: PathBuf,
    processed_dir: String,
}

impl ArtifactLayout {
    pub fn new(store: &ArtifactStore) -> Self {
        Self {
            processed_root: store.processed_root(),
            processed_dir: store.processed_dir().to_string(),
        }
    }

    /// 计算就诊目录（不触碰文件系统）
    pub fn visit_folder(&self, patient_id: PatientId, case: CaseRef) -> VisitFolder {
        let relative = visit_folder_relative(patient_id, case);
        let web_prefix = format!(
            "/{}/Patient_{}/{}",
            self.processed_dir.trim_matches('/'),
            patient_id,
            case
        );
        VisitFolder {
            absolute: self.processed_root.join(relative),
            web_prefix,
        }
    }

    /// 确保就诊目录存在。目录已存在（包括被并发请求创建）视为成功。
    pub async fn ensure_visit_folder(
        &self,
        patient_id: PatientId,
        case: impl Into<CaseRef>,
    ) -> Result<VisitFolder> {
        let folder = self.visit_folder(patient_id, case.into());
        match tokio::fs::create_dir_all(folder.path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && folder.path().is_dir() => {}
            Err(e) => return Err(PosturaError::storage_unavailable(folder.path(), e)),
        }

        debug!("Visit folder ready: {}", folder.path().display());
        Ok(folder)
    }
}
