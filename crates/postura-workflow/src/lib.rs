//! # Postura工作流模块
//!
//! 提供就诊处理流水线，包括：
//! - 就诊状态机：单向推进的处理阶段
//! - 病例仓储：记录存储之上的一致性检查
//! - 处理流水线：三维与二维轨道的编排以及部分失败策略

pub mod engine;
pub mod repository;
pub mod state_machine;

// 重新导出主要类型
pub use engine::{PhotoUpload, PipelineSettings, VisitPipeline, VisitRequest, VisitSummary};
pub use repository::{CaseRepository, UnfinishedVisits, VisitRecord};
pub use state_machine::{VisitFailure, VisitRun, VisitStage, VisitStateMachine};
