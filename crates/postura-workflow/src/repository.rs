//! 病例仓储
//!
//! 记录存储之上的薄封装：把影响行数为0转换为 `PersistenceNoOp`，
//! 把查不到的记录转换为 `NotFound`。

use postura_core::{
    Analysis, AnalysisId, Appointment, AppointmentId, Keypoint, NewAnalysis, NewAppointment,
    NewKeypoint, Note, NoteId, NoteOwner, Patient, PatientId, PosturaError, ProcessingStatus,
    Result, VisitCase,
};
use postura_database::RecordsStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// 就诊及其配对分析
#[derive(Debug, Clone, Serialize)]
pub struct VisitRecord {
    pub appointment: Appointment,
    pub analysis: Option<Analysis>,
}

/// 尚未完成的记录
#[derive(Debug, Clone, Default, Serialize)]
pub struct UnfinishedVisits {
    pub appointments: Vec<Appointment>,
    pub analyses: Vec<Analysis>,
}

impl UnfinishedVisits {
    pub fn is_empty(&self) -> bool {
        self.appointments.is_empty() && self.analyses.is_empty()
    }
}

#[derive(Clone)]
pub struct CaseRepository {
    store: Arc<dyn RecordsStore>,
}

impl CaseRepository {
    pub fn new(store: Arc<dyn RecordsStore>) -> Self {
        Self { store }
    }

    fn expect_written(rows: u64, operation: impl Into<String>) -> Result<()> {
        if rows == 0 {
            return Err(PosturaError::persistence_no_op(operation));
        }
        Ok(())
    }

    // ========== 患者 ==========

    pub async fn patient(&self, id: PatientId) -> Result<Patient> {
        self.store
            .get_patient(id)
            .await?
            .ok_or_else(|| PosturaError::NotFound(format!("患者 {}", id)))
    }

    // ========== 就诊 ==========

    /// 写入就诊骨架记录，获得持久ID
    pub async fn create_appointment(&self, visit: VisitCase) -> Result<Appointment> {
        let new = NewAppointment { visit };
        let id = self
            .store
            .insert_appointment(&new)
            .await?
            .ok_or_else(|| PosturaError::persistence_no_op("insert appointment"))?;

        info!("Appointment {} created for patient {}", id, new.visit.patient_id);
        Ok(Appointment {
            id,
            visit: new.visit,
            visualizations: None,
            cobb_angle: None,
            diagnosis: None,
            status: ProcessingStatus::Pending,
            failure_reason: None,
        })
    }

    pub async fn appointment(&self, id: AppointmentId) -> Result<Appointment> {
        self.store
            .get_appointment(id)
            .await?
            .ok_or_else(|| PosturaError::NotFound(format!("就诊 {}", id)))
    }

    pub async fn save_appointment(&self, appointment: &Appointment) -> Result<()> {
        let rows = self.store.update_appointment(appointment).await?;
        Self::expect_written(rows, format!("update appointment {}", appointment.id))
    }

    /// 记录就诊处理状态
    pub async fn mark_appointment(
        &self,
        id: AppointmentId,
        status: ProcessingStatus,
        reason: Option<String>,
    ) -> Result<()> {
        let mut appointment = self.appointment(id).await?;
        appointment.status = status;
        appointment.failure_reason = reason;
        self.save_appointment(&appointment).await
    }

    // ========== 分析 ==========

    pub async fn create_analysis(
        &self,
        appointment_id: Option<AppointmentId>,
        visit: VisitCase,
    ) -> Result<Analysis> {
        let new = NewAnalysis {
            appointment_id,
            visit,
        };
        let id = self
            .store
            .insert_analysis(&new)
            .await?
            .ok_or_else(|| PosturaError::persistence_no_op("insert analysis"))?;

        info!("Analysis {} created for patient {}", id, new.visit.patient_id);
        Ok(Analysis {
            id,
            appointment_id: new.appointment_id,
            visit: new.visit,
            processed_photo_path: None,
            indices: None,
            status: ProcessingStatus::Pending,
            failure_reason: None,
        })
    }

    pub async fn analysis(&self, id: AnalysisId) -> Result<Analysis> {
        self.store
            .get_analysis(id)
            .await?
            .ok_or_else(|| PosturaError::NotFound(format!("分析 {}", id)))
    }

    pub async fn save_analysis(&self, analysis: &Analysis) -> Result<()> {
        let rows = self.store.update_analysis(analysis).await?;
        Self::expect_written(rows, format!("update analysis {}", analysis.id))
    }

    pub async fn mark_analysis(
        &self,
        id: AnalysisId,
        status: ProcessingStatus,
        reason: Option<String>,
    ) -> Result<()> {
        let mut analysis = self.analysis(id).await?;
        analysis.status = status;
        analysis.failure_reason = reason;
        self.save_analysis(&analysis).await
    }

    /// 以新集合整体替换分析的关键点，返回持久化后的关键点
    pub async fn replace_keypoints(
        &self,
        analysis_id: AnalysisId,
        keypoints: &[NewKeypoint],
    ) -> Result<Vec<Keypoint>> {
        let rows = self.store.replace_keypoints(analysis_id, keypoints).await?;
        if rows != keypoints.len() as u64 {
            return Err(PosturaError::persistence_no_op(format!(
                "replace keypoints of analysis {} ({} of {} written)",
                analysis_id,
                rows,
                keypoints.len()
            )));
        }
        self.store.keypoints_for(analysis_id).await
    }

    pub async fn keypoints_for(&self, analysis_id: AnalysisId) -> Result<Vec<Keypoint>> {
        self.store.keypoints_for(analysis_id).await
    }

    // ========== 就诊列表 ==========

    /// 患者的全部就诊，最新的在前
    pub async fn visits_for_patient(&self, patient_id: PatientId) -> Result<Vec<VisitRecord>> {
        self.patient(patient_id).await?;

        let appointments = self.store.appointments_for_patient(patient_id).await?;
        let mut visits = Vec::with_capacity(appointments.len());
        for appointment in appointments {
            let analysis = self.store.analysis_for_appointment(appointment.id).await?;
            visits.push(VisitRecord {
                appointment,
                analysis,
            });
        }
        Ok(visits)
    }

    /// 删除就诊：先删配对分析（连同关键点和备注），再删就诊
    pub async fn delete_visit(&self, id: AppointmentId) -> Result<()> {
        self.appointment(id).await?;

        if let Some(analysis) = self.store.analysis_for_appointment(id).await? {
            let rows = self.store.delete_analysis(analysis.id).await?;
            Self::expect_written(rows, format!("delete analysis {}", analysis.id))?;
        }

        let rows = self.store.delete_appointment(id).await?;
        Self::expect_written(rows, format!("delete appointment {}", id))?;
        info!("Appointment {} deleted", id);
        Ok(())
    }

    /// 未完成的就诊和分析（包括独立分析），供人工或后台核对
    pub async fn unfinished_visits(&self) -> Result<UnfinishedVisits> {
        Ok(UnfinishedVisits {
            appointments: self.store.unfinished_appointments().await?,
            analyses: self.store.unfinished_analyses().await?,
        })
    }

    // ========== 备注 ==========

    pub async fn add_note(&self, owner: NoteOwner, content: &str) -> Result<NoteId> {
        let content = content.trim();
        if content.is_empty() {
            return Err(PosturaError::Validation("备注内容不能为空".to_string()));
        }

        self.store
            .insert_note(owner, content)
            .await?
            .ok_or_else(|| PosturaError::NotFound(format!("备注所属记录 {:?}", owner)))
    }

    /// 删除备注，备注必须属于给定记录
    pub async fn delete_note(&self, owner: NoteOwner, id: NoteId) -> Result<()> {
        let note = self
            .store
            .get_note(id)
            .await?
            .ok_or_else(|| PosturaError::NotFound(format!("备注 {}", id)))?;

        if note.owner != owner {
            warn!("Refusing to delete note {}: owned by {:?}, not {:?}", id, note.owner, owner);
            return Err(PosturaError::Validation(format!("备注 {} 不属于 {:?}", id, owner)));
        }

        let rows = self.store.delete_note(id).await?;
        Self::expect_written(rows, format!("delete note {}", id))
    }

    pub async fn notes_for(&self, owner: NoteOwner) -> Result<Vec<Note>> {
        self.store.notes_for(owner).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use postura_core::{DoctorId, ErrorKind, Landmark};
    use postura_database::MemoryRecordsStore;

    async fn setup() -> (Arc<MemoryRecordsStore>, CaseRepository, PatientId) {
        let store = Arc::new(MemoryRecordsStore::new());
        let patient = store.add_patient("Li Wei").await;
        (store.clone(), CaseRepository::new(store), patient)
    }

    fn visit(patient_id: PatientId) -> VisitCase {
        VisitCase {
            patient_id,
            doctor_id: DoctorId(1),
            visit_date: Utc::now(),
            original_photo_path: "back.jpg".to_string(),
        }
    }

    #[tokio::test]
    async fn test_unknown_patient_is_not_found() {
        let (_, repo, _) = setup().await;
        let err = repo.patient(PatientId(999)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_save_deleted_appointment_is_no_op() {
        let (store, repo, patient) = setup().await;
        let appointment = repo.create_appointment(visit(patient)).await.unwrap();
        store.delete_appointment(appointment.id).await.unwrap();

        let err = repo.save_appointment(&appointment).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PersistenceNoOp);
    }

    #[tokio::test]
    async fn test_keypoints_are_replaced_not_merged() {
        let (_, repo, patient) = setup().await;
        let analysis = repo.create_analysis(None, visit(patient)).await.unwrap();
        let point = |landmark, x| NewKeypoint {
            analysis_id: analysis.id,
            landmark,
            x,
            y: 0.0,
        };

        repo.replace_keypoints(analysis.id, &[point(Landmark::C7, 1.0), point(Landmark::T7, 2.0)])
            .await
            .unwrap();
        let stored = repo
            .replace_keypoints(analysis.id, &[point(Landmark::MidHip, 3.0)])
            .await
            .unwrap();

        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].landmark, Landmark::MidHip);
    }

    #[tokio::test]
    async fn test_delete_visit_removes_paired_analysis() {
        let (store, repo, patient) = setup().await;
        let appointment = repo.create_appointment(visit(patient)).await.unwrap();
        let analysis = repo
            .create_analysis(Some(appointment.id), visit(patient))
            .await
            .unwrap();
        repo.add_note(NoteOwner::Analysis(analysis.id), "left shoulder raised")
            .await
            .unwrap();

        repo.delete_visit(appointment.id).await.unwrap();

        assert_eq!(store.appointment_count().await, 0);
        assert_eq!(store.analysis_count().await, 0);
        let err = repo.delete_visit(appointment.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_visits_newest_first() {
        let (_, repo, patient) = setup().await;
        let mut older = visit(patient);
        older.visit_date = Utc::now() - chrono::Duration::days(30);
        let first = repo.create_appointment(older).await.unwrap();
        let second = repo.create_appointment(visit(patient)).await.unwrap();
        repo.create_analysis(Some(second.id), visit(patient)).await.unwrap();

        let visits = repo.visits_for_patient(patient).await.unwrap();
        assert_eq!(visits.len(), 2);
        assert_eq!(visits[0].appointment.id, second.id);
        assert!(visits[0].analysis.is_some());
        assert_eq!(visits[1].appointment.id, first.id);
        assert!(visits[1].analysis.is_none());
    }

    #[tokio::test]
    async fn test_notes_require_content_and_owner() {
        let (_, repo, patient) = setup().await;
        let appointment = repo.create_appointment(visit(patient)).await.unwrap();
        let owner = NoteOwner::Appointment(appointment.id);

        let err = repo.add_note(owner, "   ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = repo
            .add_note(NoteOwner::Analysis(AnalysisId(404)), "text")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let note = repo.add_note(owner, "follow up in 3 months").await.unwrap();
        let wrong_owner = NoteOwner::Appointment(AppointmentId(appointment.id.0 + 1));
        let err = repo.delete_note(wrong_owner, note).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        repo.delete_note(owner, note).await.unwrap();
        assert!(repo.notes_for(owner).await.unwrap().is_empty());
    }
}
