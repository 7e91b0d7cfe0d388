//! 数据库模型

use chrono::{DateTime, Utc};
use postura_core::models::*;
use postura_core::{PosturaError, Result};
use sqlx::FromRow;

// 数据库表模型 - 使用FromRow trait用于SQL查询

/// 数据库患者表
#[derive(Debug, FromRow)]
pub struct DbPatient {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<DbPatient> for Patient {
    fn from(db_patient: DbPatient) -> Self {
        Patient {
            id: PatientId(db_patient.id),
            name: db_patient.name,
            created_at: db_patient.created_at,
        }
    }
}

/// 数据库就诊表
#[derive(Debug, FromRow)]
pub struct DbAppointment {
    pub id: i64,
    pub patient_id: i64,
    pub doctor_id: i64,
    pub visit_date: DateTime<Utc>,
    pub original_photo_path: String,
    pub processed_photo_path1: Option<String>,
    pub processed_photo_path2: Option<String>,
    pub processed_photo_path3: Option<String>,
    pub cobb_angle: Option<f64>,
    pub diagnosis: Option<String>,
    pub status: String, // 存储为字符串，转换为ProcessingStatus枚举
    pub failure_reason: Option<String>,
}

impl TryFrom<DbAppointment> for Appointment {
    type Error = PosturaError;

    fn try_from(db: DbAppointment) -> Result<Self> {
        let visualizations = match (
            db.processed_photo_path1,
            db.processed_photo_path2,
            db.processed_photo_path3,
        ) {
            (Some(first), Some(second), Some(third)) => {
                Some(VisualizationSet::new([first, second, third]))
            }
            (None, None, None) => None,
            _ => {
                return Err(PosturaError::Database(format!(
                    "appointment {} has a partial visualization set",
                    db.id
                )))
            }
        };

        Ok(Appointment {
            id: AppointmentId(db.id),
            visit: VisitCase {
                patient_id: PatientId(db.patient_id),
                doctor_id: DoctorId(db.doctor_id),
                visit_date: db.visit_date,
                original_photo_path: db.original_photo_path,
            },
            visualizations,
            cobb_angle: db.cobb_angle,
            diagnosis: db.diagnosis,
            status: db.status.parse()?,
            failure_reason: db.failure_reason,
        })
    }
}

/// 数据库分析表
#[derive(Debug, FromRow)]
pub struct DbAnalysis {
    pub id: i64,
    pub appointment_id: Option<i64>,
    pub patient_id: i64,
    pub doctor_id: i64,
    pub visit_date: DateTime<Utc>,
    pub original_photo_path: String,
    pub processed_photo_path: Option<String>,
    pub hdi_s: Option<f64>,
    pub hdi_a: Option<f64>,
    pub hdi_t: Option<f64>,
    pub fai_c7: Option<f64>,
    pub fai_a: Option<f64>,
    pub fai_t: Option<f64>,
    pub status: String,
    pub failure_reason: Option<String>,
}

impl TryFrom<DbAnalysis> for Analysis {
    type Error = PosturaError;

    fn try_from(db: DbAnalysis) -> Result<Self> {
        let indices = match (db.hdi_s, db.hdi_a, db.hdi_t, db.fai_c7, db.fai_a, db.fai_t) {
            (Some(hdi_s), Some(hdi_a), Some(hdi_t), Some(fai_c7), Some(fai_a), Some(fai_t)) => {
                Some(PostureIndices {
                    hdi_s,
                    hdi_a,
                    hdi_t,
                    fai_c7,
                    fai_a,
                    fai_t,
                })
            }
            _ => None,
        };

        Ok(Analysis {
            id: AnalysisId(db.id),
            appointment_id: db.appointment_id.map(AppointmentId),
            visit: VisitCase {
                patient_id: PatientId(db.patient_id),
                doctor_id: DoctorId(db.doctor_id),
                visit_date: db.visit_date,
                original_photo_path: db.original_photo_path,
            },
            processed_photo_path: db.processed_photo_path,
            indices,
            status: db.status.parse()?,
            failure_reason: db.failure_reason,
        })
    }
}

/// 数据库关键点表
#[derive(Debug, FromRow)]
pub struct DbKeypoint {
    pub id: i64,
    pub analysis_id: i64,
    pub name: String,
    pub x: f64,
    pub y: f64,
}

impl TryFrom<DbKeypoint> for Keypoint {
    type Error = PosturaError;

    fn try_from(db: DbKeypoint) -> Result<Self> {
        Ok(Keypoint {
            id: db.id,
            analysis_id: AnalysisId(db.analysis_id),
            landmark: db.name.parse()?,
            x: db.x,
            y: db.y,
        })
    }
}

/// 数据库备注表
#[derive(Debug, FromRow)]
pub struct DbNote {
    pub id: i64,
    pub appointment_id: Option<i64>,
    pub analysis_id: Option<i64>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbNote> for Note {
    type Error = PosturaError;

    fn try_from(db: DbNote) -> Result<Self> {
        let owner = match (db.appointment_id, db.analysis_id) {
            (Some(id), None) => NoteOwner::Appointment(AppointmentId(id)),
            (None, Some(id)) => NoteOwner::Analysis(AnalysisId(id)),
            _ => {
                return Err(PosturaError::Database(format!(
                    "note {} must belong to exactly one record",
                    db.id
                )))
            }
        };

        Ok(Note {
            id: NoteId(db.id),
            owner,
            content: db.content,
            created_at: db.created_at,
        })
    }
}

/// 备注归属拆分为两列外键
pub fn note_owner_columns(owner: NoteOwner) -> (Option<i64>, Option<i64>) {
    match owner {
        NoteOwner::Appointment(id) => (Some(id.0), None),
        NoteOwner::Analysis(id) => (None, Some(id.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_appointment() -> DbAppointment {
        DbAppointment {
            id: 3,
            patient_id: 1,
            doctor_id: 2,
            visit_date: Utc::now(),
            original_photo_path: "a.jpg".to_string(),
            processed_photo_path1: None,
            processed_photo_path2: None,
            processed_photo_path3: None,
            cobb_angle: None,
            diagnosis: None,
            status: "PENDING".to_string(),
            failure_reason: None,
        }
    }

    #[test]
    fn test_skeleton_appointment_conversion() {
        let appointment = Appointment::try_from(db_appointment()).unwrap();
        assert_eq!(appointment.id, AppointmentId(3));
        assert!(appointment.visualizations.is_none());
        assert_eq!(appointment.status, ProcessingStatus::Pending);
    }

    #[test]
    fn test_partial_visualizations_rejected() {
        let mut row = db_appointment();
        row.processed_photo_path1 = Some("/processed_images/Patient_1/Appointment_3/a.html".to_string());
        assert!(Appointment::try_from(row).is_err());
    }

    #[test]
    fn test_note_owner_columns() {
        assert_eq!(note_owner_columns(NoteOwner::Analysis(AnalysisId(5))), (None, Some(5)));
        assert_eq!(note_owner_columns(NoteOwner::Appointment(AppointmentId(6))), (Some(6), None));
    }
}
