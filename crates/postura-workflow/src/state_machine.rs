//! 就诊处理状态机
//!
//! 单向线性推进，不允许回退。失败是从任意阶段都可到达的终态，由 `VisitFailure` 表示。

use postura_core::{AnalysisId, AppointmentId, PosturaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// 就诊处理阶段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VisitStage {
    Intake,
    FolderReady,
    Processed3D,
    Persisted3D,
    AnalysisCreated,
    Processed2D,
    Persisted2D,
    Complete,
}

impl fmt::Display for VisitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 就诊状态机
#[derive(Debug, Clone)]
pub struct VisitStateMachine {
    start: VisitStage,
    transitions: HashMap<VisitStage, VisitStage>,
}

impl VisitStateMachine {
    fn linear(stages: &[VisitStage]) -> Self {
        let transitions = stages
            .windows(2)
            .map(|pair| (pair[0], pair[1]))
            .collect();
        Self {
            start: stages[0],
            transitions,
        }
    }

    /// 预约就诊：三维轨道后接二维轨道
    pub fn paired() -> Self {
        Self::linear(&[
            VisitStage::Intake,
            VisitStage::FolderReady,
            VisitStage::Processed3D,
            VisitStage::Persisted3D,
            VisitStage::AnalysisCreated,
            VisitStage::Processed2D,
            VisitStage::Persisted2D,
            VisitStage::Complete,
        ])
    }

    /// 独立分析：只有二维轨道
    pub fn analysis_only() -> Self {
        Self::linear(&[
            VisitStage::Intake,
            VisitStage::AnalysisCreated,
            VisitStage::Processed2D,
            VisitStage::Persisted2D,
            VisitStage::Complete,
        ])
    }

    pub fn start(&self) -> VisitStage {
        self.start
    }

    /// 指定阶段之后的阶段，终态返回 `None`
    pub fn next(&self, from: VisitStage) -> Option<VisitStage> {
        self.transitions.get(&from).copied()
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: VisitStage, to: VisitStage) -> bool {
        self.next(from) == Some(to)
    }

    /// 按顺序列出全部阶段
    pub fn stages(&self) -> Vec<VisitStage> {
        let mut stages = vec![self.start];
        while let Some(next) = stages.last().and_then(|stage| self.next(*stage)) {
            stages.push(next);
        }
        stages
    }
}

/// 一次处理运行的进度
#[derive(Debug, Clone)]
pub struct VisitRun {
    machine: VisitStateMachine,
    attained: Option<VisitStage>,
    pub appointment_id: Option<AppointmentId>,
    pub analysis_id: Option<AnalysisId>,
}

impl VisitRun {
    pub fn new(machine: VisitStateMachine) -> Self {
        Self {
            machine,
            attained: None,
            appointment_id: None,
            analysis_id: None,
        }
    }

    /// 从已达到的阶段继续（重新处理已有记录）
    pub fn resume(machine: VisitStateMachine, attained: VisitStage) -> Self {
        Self {
            machine,
            attained: Some(attained),
            appointment_id: None,
            analysis_id: None,
        }
    }

    pub fn attained(&self) -> Option<VisitStage> {
        self.attained
    }

    /// 正在尝试的阶段
    pub fn pending_stage(&self) -> Option<VisitStage> {
        match self.attained {
            None => Some(self.machine.start()),
            Some(stage) => self.machine.next(stage),
        }
    }

    /// 推进到下一阶段
    pub fn advance(&mut self, to: VisitStage) -> Result<()> {
        if self.pending_stage() != Some(to) {
            return Err(PosturaError::InvalidStateTransition {
                from: self
                    .attained
                    .map(|stage| stage.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                to: to.to_string(),
            });
        }
        tracing::debug!("Visit stage reached: {}", to);
        self.attained = Some(to);
        Ok(())
    }

    /// 以失败终止本次运行
    pub fn fail(self, cause: PosturaError) -> VisitFailure {
        let stage = self
            .pending_stage()
            .or(self.attained)
            .unwrap_or(VisitStage::Intake);
        VisitFailure {
            stage,
            appointment_id: self.appointment_id,
            analysis_id: self.analysis_id,
            cause,
        }
    }
}

/// 就诊处理失败：失败阶段、已提交的记录ID以及原因
#[derive(Debug, Error)]
#[error("{stage} failed: {cause}")]
pub struct VisitFailure {
    pub stage: VisitStage,
    pub appointment_id: Option<AppointmentId>,
    pub analysis_id: Option<AnalysisId>,
    #[source]
    pub cause: PosturaError,
}
