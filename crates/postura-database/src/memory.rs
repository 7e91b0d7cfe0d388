//! 内存记录存储，用于测试和本地演示

use async_trait::async_trait;
use chrono::Utc;
use postura_core::{
    Analysis, AnalysisId, Appointment, AppointmentId, Keypoint, NewAnalysis, NewAppointment,
    NewKeypoint, Note, NoteId, NoteOwner, Patient, PatientId, ProcessingStatus, Result,
};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::store::RecordsStore;

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    patients: BTreeMap<PatientId, Patient>,
    appointments: BTreeMap<AppointmentId, Appointment>,
    analyses: BTreeMap<AnalysisId, Analysis>,
    keypoints: BTreeMap<AnalysisId, Vec<Keypoint>>,
    notes: BTreeMap<NoteId, Note>,
}

impl Tables {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn remove_notes(&mut self, owner: NoteOwner) {
        self.notes.retain(|_, note| note.owner != owner);
    }
}

/// 内存记录存储
#[derive(Debug, Default)]
pub struct MemoryRecordsStore {
    tables: RwLock<Tables>,
}

impl MemoryRecordsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记患者（患者管理不属于就诊流程，仅供测试和演示使用）
    pub async fn add_patient(&self, name: &str) -> PatientId {
        let mut tables = self.tables.write().await;
        let id = PatientId(tables.allocate());
        tables.patients.insert(
            id,
            Patient {
                id,
                name: name.to_string(),
                created_at: Utc::now(),
            },
        );
        id
    }

    pub async fn appointment_count(&self) -> usize {
        self.tables.read().await.appointments.len()
    }

    pub async fn analysis_count(&self) -> usize {
        self.tables.read().await.analyses.len()
    }
}

#[async_trait]
impl RecordsStore for MemoryRecordsStore {
    async fn get_patient(&self, id: PatientId) -> Result<Option<Patient>> {
        Ok(self.tables.read().await.patients.get(&id).cloned())
    }

    async fn insert_appointment(&self, appointment: &NewAppointment) -> Result<Option<AppointmentId>> {
        let mut tables = self.tables.write().await;
        if !tables.patients.contains_key(&appointment.visit.patient_id) {
            return Ok(None);
        }

        let id = AppointmentId(tables.allocate());
        tables.appointments.insert(
            id,
            Appointment {
                id,
                visit: appointment.visit.clone(),
                visualizations: None,
                cobb_angle: None,
                diagnosis: None,
                status: ProcessingStatus::Pending,
                failure_reason: None,
            },
        );
        Ok(Some(id))
    }

    async fn get_appointment(&self, id: AppointmentId) -> Result<Option<Appointment>> {
        Ok(self.tables.read().await.appointments.get(&id).cloned())
    }

    async fn update_appointment(&self, appointment: &Appointment) -> Result<u64> {
        let mut tables = self.tables.write().await;
        match tables.appointments.get_mut(&appointment.id) {
            Some(existing) => {
                *existing = appointment.clone();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn appointments_for_patient(&self, patient_id: PatientId) -> Result<Vec<Appointment>> {
        let tables = self.tables.read().await;
        let mut appointments: Vec<Appointment> = tables
            .appointments
            .values()
            .filter(|a| a.visit.patient_id == patient_id)
            .cloned()
            .collect();
        appointments.sort_by(|a, b| b.visit.visit_date.cmp(&a.visit.visit_date).then(b.id.cmp(&a.id)));
        Ok(appointments)
    }

    async fn unfinished_appointments(&self) -> Result<Vec<Appointment>> {
        let tables = self.tables.read().await;
        let mut appointments: Vec<Appointment> = tables
            .appointments
            .values()
            .filter(|a| a.status != ProcessingStatus::Complete)
            .cloned()
            .collect();
        appointments.sort_by(|a, b| a.visit.visit_date.cmp(&b.visit.visit_date).then(a.id.cmp(&b.id)));
        Ok(appointments)
    }

    async fn delete_appointment(&self, id: AppointmentId) -> Result<u64> {
        let mut tables = self.tables.write().await;
        if tables.appointments.remove(&id).is_none() {
            return Ok(0);
        }
        tables.remove_notes(NoteOwner::Appointment(id));
        for analysis in tables.analyses.values_mut() {
            if analysis.appointment_id == Some(id) {
                analysis.appointment_id = None;
            }
        }
        Ok(1)
    }

    async fn insert_analysis(&self, analysis: &NewAnalysis) -> Result<Option<AnalysisId>> {
        let mut tables = self.tables.write().await;
        let patient_known = tables.patients.contains_key(&analysis.visit.patient_id);
        let appointment_known = analysis
            .appointment_id
            .map_or(true, |id| tables.appointments.contains_key(&id));
        if !patient_known || !appointment_known {
            return Ok(None);
        }

        let id = AnalysisId(tables.allocate());
        tables.analyses.insert(
            id,
            Analysis {
                id,
                appointment_id: analysis.appointment_id,
                visit: analysis.visit.clone(),
                processed_photo_path: None,
                indices: None,
                status: ProcessingStatus::Pending,
                failure_reason: None,
            },
        );
        Ok(Some(id))
    }

    async fn get_analysis(&self, id: AnalysisId) -> Result<Option<Analysis>> {
        Ok(self.tables.read().await.analyses.get(&id).cloned())
    }

    async fn analysis_for_appointment(&self, appointment_id: AppointmentId) -> Result<Option<Analysis>> {
        let tables = self.tables.read().await;
        Ok(tables
            .analyses
            .values()
            .find(|a| a.appointment_id == Some(appointment_id))
            .cloned())
    }

    async fn update_analysis(&self, analysis: &Analysis) -> Result<u64> {
        let mut tables = self.tables.write().await;
        match tables.analyses.get_mut(&analysis.id) {
            Some(existing) => {
                *existing = analysis.clone();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn unfinished_analyses(&self) -> Result<Vec<Analysis>> {
        let tables = self.tables.read().await;
        let mut analyses: Vec<Analysis> = tables
            .analyses
            .values()
            .filter(|a| a.status != ProcessingStatus::Complete)
            .cloned()
            .collect();
        analyses.sort_by(|a, b| a.visit.visit_date.cmp(&b.visit.visit_date).then(a.id.cmp(&b.id)));
        Ok(analyses)
    }

    async fn delete_analysis(&self, id: AnalysisId) -> Result<u64> {
        let mut tables = self.tables.write().await;
        if tables.analyses.remove(&id).is_none() {
            return Ok(0);
        }
        tables.keypoints.remove(&id);
        tables.remove_notes(NoteOwner::Analysis(id));
        Ok(1)
    }

    async fn replace_keypoints(&self, analysis_id: AnalysisId, keypoints: &[NewKeypoint]) -> Result<u64> {
        let mut tables = self.tables.write().await;
        if !tables.analyses.contains_key(&analysis_id) {
            return Ok(0);
        }

        let mut rows = Vec::with_capacity(keypoints.len());
        for keypoint in keypoints {
            let id = tables.allocate();
            rows.push(Keypoint {
                id,
                analysis_id,
                landmark: keypoint.landmark,
                x: keypoint.x,
                y: keypoint.y,
            });
        }
        let inserted = rows.len() as u64;
        tables.keypoints.insert(analysis_id, rows);
        Ok(inserted)
    }

    async fn keypoints_for(&self, analysis_id: AnalysisId) -> Result<Vec<Keypoint>> {
        let tables = self.tables.read().await;
        Ok(tables.keypoints.get(&analysis_id).cloned().unwrap_or_default())
    }

    async fn insert_note(&self, owner: NoteOwner, content: &str) -> Result<Option<NoteId>> {
        let mut tables = self.tables.write().await;
        let owner_known = match owner {
            NoteOwner::Appointment(id) => tables.appointments.contains_key(&id),
            NoteOwner::Analysis(id) => tables.analyses.contains_key(&id),
        };
        if !owner_known {
            return Ok(None);
        }

        let id = NoteId(tables.allocate());
        tables.notes.insert(
            id,
            Note {
                id,
                owner,
                content: content.to_string(),
                created_at: Utc::now(),
            },
        );
        Ok(Some(id))
    }

    async fn get_note(&self, id: NoteId) -> Result<Option<Note>> {
        Ok(self.tables.read().await.notes.get(&id).cloned())
    }

    async fn delete_note(&self, id: NoteId) -> Result<u64> {
        let mut tables = self.tables.write().await;
        Ok(tables.notes.remove(&id).map_or(0, |_| 1))
    }

    async fn notes_for(&self, owner: NoteOwner) -> Result<Vec<Note>> {
        let tables = self.tables.read().await;
        Ok(tables
            .notes
            .values()
            .filter(|note| note.owner == owner)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postura_core::{DoctorId, Landmark, VisitCase};

    fn visit(patient_id: PatientId) -> VisitCase {
        VisitCase {
            patient_id,
            doctor_id: DoctorId(7),
            visit_date: Utc::now(),
            original_photo_path: "a.jpg".to_string(),
        }
    }

    fn keypoints(analysis_id: AnalysisId, offset: f64) -> Vec<NewKeypoint> {
        Landmark::ALL
            .iter()
            .map(|&landmark| NewKeypoint {
                analysis_id,
                landmark,
                x: offset,
                y: offset,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_insert_requires_patient() {
        let store = MemoryRecordsStore::new();
        let missing = store
            .insert_appointment(&NewAppointment { visit: visit(PatientId(99)) })
            .await
            .unwrap();
        assert!(missing.is_none());

        let patient = store.add_patient("Amal").await;
        let id = store
            .insert_appointment(&NewAppointment { visit: visit(patient) })
            .await
            .unwrap()
            .unwrap();
        let stored = store.get_appointment(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Pending);
        assert!(stored.visualizations.is_none());
    }

    #[tokio::test]
    async fn test_update_missing_row_affects_nothing() {
        let store = MemoryRecordsStore::new();
        let patient = store.add_patient("Omar").await;
        let id = store
            .insert_appointment(&NewAppointment { visit: visit(patient) })
            .await
            .unwrap()
            .unwrap();
        let mut appointment = store.get_appointment(id).await.unwrap().unwrap();

        appointment.cobb_angle = Some(12.5);
        assert_eq!(store.update_appointment(&appointment).await.unwrap(), 1);

        assert_eq!(store.delete_appointment(id).await.unwrap(), 1);
        assert_eq!(store.update_appointment(&appointment).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replace_keypoints_replaces_whole_set() {
        let store = MemoryRecordsStore::new();
        let patient = store.add_patient("Mona").await;
        let analysis = store
            .insert_analysis(&NewAnalysis { appointment_id: None, visit: visit(patient) })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(store.replace_keypoints(analysis, &keypoints(analysis, 1.0)).await.unwrap(), 13);
        assert_eq!(store.replace_keypoints(analysis, &keypoints(analysis, 2.0)).await.unwrap(), 13);

        let stored = store.keypoints_for(analysis).await.unwrap();
        assert_eq!(stored.len(), 13);
        assert!(stored.iter().all(|k| k.x == 2.0));

        assert_eq!(store.replace_keypoints(AnalysisId(404), &keypoints(AnalysisId(404), 1.0)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_analysis_cascades() {
        let store = MemoryRecordsStore::new();
        let patient = store.add_patient("Sara").await;
        let analysis = store
            .insert_analysis(&NewAnalysis { appointment_id: None, visit: visit(patient) })
            .await
            .unwrap()
            .unwrap();
        store.replace_keypoints(analysis, &keypoints(analysis, 1.0)).await.unwrap();
        store
            .insert_note(NoteOwner::Analysis(analysis), "shoulder tilt")
            .await
            .unwrap();

        assert_eq!(store.delete_analysis(analysis).await.unwrap(), 1);
        assert!(store.keypoints_for(analysis).await.unwrap().is_empty());
        assert!(store.notes_for(NoteOwner::Analysis(analysis)).await.unwrap().is_empty());
    }
}
