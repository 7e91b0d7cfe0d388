//! 临床记录存储接口
//!
//! 写操作返回受影响行数（插入返回新ID，未写入时为 `None`），这是唯一的一致性信号，
//! 是否把0行视为失败由调用方决定。每个写操作独立提交。

use async_trait::async_trait;
use postura_core::{
    Analysis, AnalysisId, Appointment, AppointmentId, Keypoint, NewAnalysis, NewAppointment,
    NewKeypoint, Note, NoteId, NoteOwner, Patient, PatientId, Result,
};

/// 临床记录存储
#[async_trait]
pub trait RecordsStore: Send + Sync {
    // ========== 患者 ==========

    async fn get_patient(&self, id: PatientId) -> Result<Option<Patient>>;

    // ========== 就诊 ==========

    async fn insert_appointment(&self, appointment: &NewAppointment) -> Result<Option<AppointmentId>>;

    async fn get_appointment(&self, id: AppointmentId) -> Result<Option<Appointment>>;

    /// 覆盖写入除ID外的全部字段
    async fn update_appointment(&self, appointment: &Appointment) -> Result<u64>;

    /// 患者的全部就诊，按就诊时间倒序
    async fn appointments_for_patient(&self, patient_id: PatientId) -> Result<Vec<Appointment>>;

    /// 状态不是 Complete 的就诊，按就诊时间正序
    async fn unfinished_appointments(&self) -> Result<Vec<Appointment>>;

    /// 删除就诊及其备注
    async fn delete_appointment(&self, id: AppointmentId) -> Result<u64>;

    // ========== 分析 ==========

    async fn insert_analysis(&self, analysis: &NewAnalysis) -> Result<Option<AnalysisId>>;

    async fn get_analysis(&self, id: AnalysisId) -> Result<Option<Analysis>>;

    async fn analysis_for_appointment(&self, appointment_id: AppointmentId) -> Result<Option<Analysis>>;

    async fn update_analysis(&self, analysis: &Analysis) -> Result<u64>;

    /// 状态不是 Complete 的分析，按就诊时间正序
    async fn unfinished_analyses(&self) -> Result<Vec<Analysis>>;

    /// 删除分析及其关键点和备注
    async fn delete_analysis(&self, id: AnalysisId) -> Result<u64>;

    // ========== 关键点 ==========

    /// 原子地以新集合替换分析的全部关键点，返回插入行数
    async fn replace_keypoints(&self, analysis_id: AnalysisId, keypoints: &[NewKeypoint]) -> Result<u64>;

    async fn keypoints_for(&self, analysis_id: AnalysisId) -> Result<Vec<Keypoint>>;

    // ========== 备注 ==========

    async fn insert_note(&self, owner: NoteOwner, content: &str) -> Result<Option<NoteId>>;

    async fn get_note(&self, id: NoteId) -> Result<Option<Note>>;

    async fn delete_note(&self, id: NoteId) -> Result<u64>;

    /// 记录的全部备注，按创建顺序
    async fn notes_for(&self, owner: NoteOwner) -> Result<Vec<Note>>;
}
