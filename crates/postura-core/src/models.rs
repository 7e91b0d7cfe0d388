//! 核心数据模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PosturaError;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

record_id!(
    /// 患者ID
    PatientId
);
record_id!(
    /// 医生ID，未登录时为0
    DoctorId
);
record_id!(
    /// 就诊（三维流程）记录ID，由记录存储在首次写入时分配
    AppointmentId
);
record_id!(
    /// 二维分析记录ID
    AnalysisId
);
record_id!(
    /// 备注ID
    NoteId
);

/// 患者基本信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// 处理状态，使部分完成的就诊可被查询
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,           // 已登记，尚未产生测量结果
    PartiallyComplete, // 部分步骤已提交
    Complete,          // 全部完成
    Failed,            // 某一步骤失败
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "PENDING",
            ProcessingStatus::PartiallyComplete => "PARTIALLY_COMPLETE",
            ProcessingStatus::Complete => "COMPLETE",
            ProcessingStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = PosturaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ProcessingStatus::Pending),
            "PARTIALLY_COMPLETE" => Ok(ProcessingStatus::PartiallyComplete),
            "COMPLETE" => Ok(ProcessingStatus::Complete),
            "FAILED" => Ok(ProcessingStatus::Failed),
            other => Err(PosturaError::Validation(format!(
                "未知的处理状态: {}",
                other
            ))),
        }
    }
}

/// 就诊病例：一次临床就诊的公共信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisitCase {
    pub patient_id: PatientId,
    pub doctor_id: DoctorId,
    pub visit_date: DateTime<Utc>,
    pub original_photo_path: String, // 上传原图在 uploads 目录下的文件名
}

/// 三维可视化制品引用，三个路径要么全部存在要么全部缺失
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VisualizationSet {
    pub paths: [String; 3],
}

impl VisualizationSet {
    pub fn new(paths: [String; 3]) -> Self {
        Self { paths }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }
}

/// 就诊记录（三维流程）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub visit: VisitCase,
    pub visualizations: Option<VisualizationSet>,
    pub cobb_angle: Option<f64>, // Cobb角（度）
    pub diagnosis: Option<String>,
    pub status: ProcessingStatus,
    pub failure_reason: Option<String>,
}

/// 新就诊插入模型（骨架记录）
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub visit: VisitCase,
}

/// 二维体态指数
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PostureIndices {
    pub hdi_s: f64,  // 肩部高度差指数
    pub hdi_a: f64,  // 腋下高度差指数
    pub hdi_t: f64,  // 躯干高度差指数
    pub fai_c7: f64, // C7正面不对称指数
    pub fai_a: f64,  // 腋下正面不对称指数
    pub fai_t: f64,  // 躯干正面不对称指数
}

/// 二维分析记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub id: AnalysisId,
    pub appointment_id: Option<AppointmentId>, // 独立分析时为空
    pub visit: VisitCase,
    pub processed_photo_path: Option<String>,
    pub indices: Option<PostureIndices>,
    pub status: ProcessingStatus,
    pub failure_reason: Option<String>,
}

/// 新分析插入模型
#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub appointment_id: Option<AppointmentId>,
    pub visit: VisitCase,
}

/// 解剖标志点词表
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Landmark {
    C7,
    T7,
    LeftHip,
    RightHip,
    MidHip,
    LeftScapula,
    RightScapula,
    LeftShoulder,
    RightShoulder,
    LeftSide,
    RightSide,
    LeftUnderArm,
    RightUnderArm,
}

impl Landmark {
    /// 固定顺序的全部标志点
    pub const ALL: [Landmark; 13] = [
        Landmark::C7,
        Landmark::T7,
        Landmark::LeftHip,
        Landmark::RightHip,
        Landmark::MidHip,
        Landmark::LeftScapula,
        Landmark::RightScapula,
        Landmark::LeftShoulder,
        Landmark::RightShoulder,
        Landmark::LeftSide,
        Landmark::RightSide,
        Landmark::LeftUnderArm,
        Landmark::RightUnderArm,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Landmark::C7 => "C7",
            Landmark::T7 => "T7",
            Landmark::LeftHip => "LeftHip",
            Landmark::RightHip => "RightHip",
            Landmark::MidHip => "MidHip",
            Landmark::LeftScapula => "LeftScapula",
            Landmark::RightScapula => "RightScapula",
            Landmark::LeftShoulder => "LeftShoulder",
            Landmark::RightShoulder => "RightShoulder",
            Landmark::LeftSide => "LeftSide",
            Landmark::RightSide => "RightSide",
            Landmark::LeftUnderArm => "LeftUnderArm",
            Landmark::RightUnderArm => "RightUnderArm",
        }
    }
}

impl fmt::Display for Landmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Landmark {
    type Err = PosturaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Landmark::ALL
            .iter()
            .copied()
            .find(|landmark| landmark.label() == s)
            .ok_or_else(|| PosturaError::Validation(format!("未知的解剖标志点: {}", s)))
    }
}

/// 图像像素坐标
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// 二维处理能力返回的结构化报告
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Report2D {
    pub c7: Point,
    pub t7: Point,
    pub left_hip: Point,
    pub right_hip: Point,
    pub mid_hip: Point,
    pub left_scapula: Point,
    pub right_scapula: Point,
    pub left_shoulder: Point,
    pub right_shoulder: Point,
    pub left_side: Point,
    pub right_side: Point,
    pub left_under_arm: Point,
    pub right_under_arm: Point,
    #[serde(flatten)]
    pub indices: PostureIndices,
}

impl Report2D {
    /// 取出指定标志点坐标，穷尽匹配保证每个标志点都有对应字段
    pub fn point(&self, landmark: Landmark) -> Point {
        match landmark {
            Landmark::C7 => self.c7,
            Landmark::T7 => self.t7,
            Landmark::LeftHip => self.left_hip,
            Landmark::RightHip => self.right_hip,
            Landmark::MidHip => self.mid_hip,
            Landmark::LeftScapula => self.left_scapula,
            Landmark::RightScapula => self.right_scapula,
            Landmark::LeftShoulder => self.left_shoulder,
            Landmark::RightShoulder => self.right_shoulder,
            Landmark::LeftSide => self.left_side,
            Landmark::RightSide => self.right_side,
            Landmark::LeftUnderArm => self.left_under_arm,
            Landmark::RightUnderArm => self.right_under_arm,
        }
    }
}

/// 已持久化的关键点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Keypoint {
    pub id: i64,
    pub analysis_id: AnalysisId,
    pub landmark: Landmark,
    pub x: f64,
    pub y: f64,
}

/// 新关键点插入模型
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewKeypoint {
    pub analysis_id: AnalysisId,
    pub landmark: Landmark,
    pub x: f64,
    pub y: f64,
}

/// 备注的归属记录
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NoteOwner {
    Appointment(AppointmentId),
    Analysis(AnalysisId),
}

/// 医生备注
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub owner: NoteOwner,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Cobb角文本无法解析时的处理策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnglePolicy {
    /// 回退为0并记录警告
    #[default]
    DefaultToZero,
    /// 以 MeasurementUnparseable 失败
    Reject,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landmark_labels_round_trip() {
        for landmark in Landmark::ALL {
            assert_eq!(landmark.label().parse::<Landmark>().unwrap(), landmark);
        }
        assert!("Pelvis".parse::<Landmark>().is_err());
    }

    #[test]
    fn test_processing_status_encoding() {
        assert_eq!(
            "PARTIALLY_COMPLETE".parse::<ProcessingStatus>().unwrap(),
            ProcessingStatus::PartiallyComplete
        );
        assert!("DONE".parse::<ProcessingStatus>().is_err());
    }

    #[test]
    fn test_report_json_shape() {
        let json = serde_json::json!({
            "C7": {"x": 1.0, "y": 2.0},
            "T7": {"x": 1.0, "y": 3.0},
            "LeftHip": {"x": 0.0, "y": 9.0},
            "RightHip": {"x": 2.0, "y": 9.0},
            "MidHip": {"x": 1.0, "y": 9.0},
            "LeftScapula": {"x": 0.5, "y": 4.0},
            "RightScapula": {"x": 1.5, "y": 4.0},
            "LeftShoulder": {"x": 0.0, "y": 2.5},
            "RightShoulder": {"x": 2.0, "y": 2.5},
            "LeftSide": {"x": 0.1, "y": 6.0},
            "RightSide": {"x": 1.9, "y": 6.0},
            "LeftUnderArm": {"x": 0.2, "y": 3.5},
            "RightUnderArm": {"x": 1.8, "y": 3.5},
            "HDI_S": 0.1,
            "HDI_A": 0.2,
            "HDI_T": 0.3,
            "FAI_C7": 0.4,
            "FAI_A": 0.5,
            "FAI_T": 0.6
        });

        let report: Report2D = serde_json::from_value(json).unwrap();
        assert_eq!(report.point(Landmark::RightUnderArm), Point { x: 1.8, y: 3.5 });
        assert_eq!(report.indices.fai_c7, 0.4);
    }
}
