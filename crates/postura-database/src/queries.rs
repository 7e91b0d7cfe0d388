//! 数据库查询操作

use async_trait::async_trait;
use postura_core::{
    Analysis, AnalysisId, Appointment, AppointmentId, Keypoint, NewAnalysis, NewAppointment,
    NewKeypoint, Note, NoteId, NoteOwner, Patient, PatientId, PosturaError, ProcessingStatus,
    Result,
};
use sqlx::Row;

use crate::connection::DatabasePool;
use crate::models::*;
use crate::store::RecordsStore;

fn db_error(e: sqlx::Error) -> PosturaError {
    PosturaError::Database(e.to_string())
}

const APPOINTMENT_COLUMNS: &str = "id, patient_id, doctor_id, visit_date, original_photo_path, \
     processed_photo_path1, processed_photo_path2, processed_photo_path3, cobb_angle, diagnosis, \
     status, failure_reason";

const ANALYSIS_COLUMNS: &str = "id, appointment_id, patient_id, doctor_id, visit_date, \
     original_photo_path, processed_photo_path, hdi_s, hdi_a, hdi_t, fai_c7, fai_a, fai_t, \
     status, failure_reason";

/// PostgreSQL记录存储
#[derive(Debug, Clone)]
pub struct DatabaseQueries {
    pool: DatabasePool,
}

impl DatabaseQueries {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        // 创建患者表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS patients (
                id BIGSERIAL PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(db_error)?;

        // 创建就诊表，三个可视化路径必须同时为空或同时非空
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS appointments (
                id BIGSERIAL PRIMARY KEY,
                patient_id BIGINT NOT NULL REFERENCES patients(id),
                doctor_id BIGINT NOT NULL,
                visit_date TIMESTAMP WITH TIME ZONE NOT NULL,
                original_photo_path VARCHAR(512) NOT NULL,
                processed_photo_path1 VARCHAR(512),
                processed_photo_path2 VARCHAR(512),
                processed_photo_path3 VARCHAR(512),
                cobb_angle DOUBLE PRECISION,
                diagnosis TEXT,
                status VARCHAR(24) NOT NULL DEFAULT 'PENDING',
                failure_reason TEXT,
                CHECK (
                    (processed_photo_path1 IS NULL AND processed_photo_path2 IS NULL AND processed_photo_path3 IS NULL)
                    OR (processed_photo_path1 IS NOT NULL AND processed_photo_path2 IS NOT NULL AND processed_photo_path3 IS NOT NULL)
                )
            )
        "#).execute(pool).await.map_err(db_error)?;

        // 创建分析表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS analyses (
                id BIGSERIAL PRIMARY KEY,
                appointment_id BIGINT REFERENCES appointments(id) ON DELETE SET NULL,
                patient_id BIGINT NOT NULL REFERENCES patients(id),
                doctor_id BIGINT NOT NULL,
                visit_date TIMESTAMP WITH TIME ZONE NOT NULL,
                original_photo_path VARCHAR(512) NOT NULL,
                processed_photo_path VARCHAR(512),
                hdi_s DOUBLE PRECISION,
                hdi_a DOUBLE PRECISION,
                hdi_t DOUBLE PRECISION,
                fai_c7 DOUBLE PRECISION,
                fai_a DOUBLE PRECISION,
                fai_t DOUBLE PRECISION,
                status VARCHAR(24) NOT NULL DEFAULT 'PENDING',
                failure_reason TEXT
            )
        "#).execute(pool).await.map_err(db_error)?;

        // 创建关键点表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS keypoints (
                id BIGSERIAL PRIMARY KEY,
                analysis_id BIGINT NOT NULL REFERENCES analyses(id) ON DELETE CASCADE,
                name VARCHAR(32) NOT NULL,
                x DOUBLE PRECISION NOT NULL,
                y DOUBLE PRECISION NOT NULL
            )
        "#).execute(pool).await.map_err(db_error)?;

        // 创建备注表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS notes (
                id BIGSERIAL PRIMARY KEY,
                appointment_id BIGINT REFERENCES appointments(id) ON DELETE CASCADE,
                analysis_id BIGINT REFERENCES analyses(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                CHECK ((appointment_id IS NULL) <> (analysis_id IS NULL))
            )
        "#).execute(pool).await.map_err(db_error)?;

        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_appointments_patient_id ON appointments(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_appointments_status ON appointments(status)",
            "CREATE INDEX IF NOT EXISTS idx_analyses_patient_id ON analyses(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_analyses_appointment_id ON analyses(appointment_id)",
            "CREATE INDEX IF NOT EXISTS idx_keypoints_analysis_id ON keypoints(analysis_id)",
            "CREATE INDEX IF NOT EXISTS idx_notes_appointment_id ON notes(appointment_id)",
            "CREATE INDEX IF NOT EXISTS idx_notes_analysis_id ON notes(analysis_id)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql)
                .execute(pool)
                .await
                .map_err(db_error)?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }

    /// 登记患者
    pub async fn create_patient(&self, name: &str) -> Result<PatientId> {
        sqlx::query("INSERT INTO patients (name) VALUES ($1) RETURNING id")
            .bind(name)
            .fetch_one(self.pool.pool())
            .await
            .map(|row| PatientId(row.get("id")))
            .map_err(db_error)
    }

    async fn fetch_appointments(&self, sql: &str, bind: Option<i64>) -> Result<Vec<Appointment>> {
        let mut query = sqlx::query_as::<_, DbAppointment>(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        query
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_error)?
            .into_iter()
            .map(Appointment::try_from)
            .collect()
    }
}

#[async_trait]
impl RecordsStore for DatabaseQueries {
    async fn get_patient(&self, id: PatientId) -> Result<Option<Patient>> {
        let result = sqlx::query_as::<_, DbPatient>("SELECT id, name, created_at FROM patients WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)?;

        Ok(result.map(Patient::from))
    }

    async fn insert_appointment(&self, appointment: &NewAppointment) -> Result<Option<AppointmentId>> {
        let visit = &appointment.visit;
        let row = sqlx::query(r#"
            INSERT INTO appointments (patient_id, doctor_id, visit_date, original_photo_path, status)
            SELECT $1::BIGINT, $2::BIGINT, $3::TIMESTAMPTZ, $4::VARCHAR, $5::VARCHAR
            WHERE EXISTS (SELECT 1 FROM patients WHERE id = $1)
            RETURNING id
        "#)
        .bind(visit.patient_id.0)
        .bind(visit.doctor_id.0)
        .bind(visit.visit_date)
        .bind(&visit.original_photo_path)
        .bind(ProcessingStatus::Pending.as_str())
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(row.map(|row| AppointmentId(row.get("id"))))
    }

    async fn get_appointment(&self, id: AppointmentId) -> Result<Option<Appointment>> {
        let sql = format!("SELECT {} FROM appointments WHERE id = $1", APPOINTMENT_COLUMNS);
        let result = sqlx::query_as::<_, DbAppointment>(&sql)
            .bind(id.0)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)?;

        result.map(Appointment::try_from).transpose()
    }

    async fn update_appointment(&self, appointment: &Appointment) -> Result<u64> {
        let paths = appointment.visualizations.as_ref().map(|set| set.paths.clone());
        let [path1, path2, path3] = match paths {
            Some([a, b, c]) => [Some(a), Some(b), Some(c)],
            None => [None, None, None],
        };

        let result = sqlx::query(r#"
            UPDATE appointments
            SET doctor_id = $2, visit_date = $3, original_photo_path = $4,
                processed_photo_path1 = $5, processed_photo_path2 = $6, processed_photo_path3 = $7,
                cobb_angle = $8, diagnosis = $9, status = $10, failure_reason = $11
            WHERE id = $1
        "#)
        .bind(appointment.id.0)
        .bind(appointment.visit.doctor_id.0)
        .bind(appointment.visit.visit_date)
        .bind(&appointment.visit.original_photo_path)
        .bind(path1)
        .bind(path2)
        .bind(path3)
        .bind(appointment.cobb_angle)
        .bind(&appointment.diagnosis)
        .bind(appointment.status.as_str())
        .bind(&appointment.failure_reason)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected())
    }

    async fn appointments_for_patient(&self, patient_id: PatientId) -> Result<Vec<Appointment>> {
        let sql = format!(
            "SELECT {} FROM appointments WHERE patient_id = $1 ORDER BY visit_date DESC, id DESC",
            APPOINTMENT_COLUMNS
        );
        self.fetch_appointments(&sql, Some(patient_id.0)).await
    }

    async fn unfinished_appointments(&self) -> Result<Vec<Appointment>> {
        let sql = format!(
            "SELECT {} FROM appointments WHERE status <> 'COMPLETE' ORDER BY visit_date ASC, id ASC",
            APPOINTMENT_COLUMNS
        );
        self.fetch_appointments(&sql, None).await
    }

    async fn delete_appointment(&self, id: AppointmentId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM appointments WHERE id = $1")
            .bind(id.0)
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn insert_analysis(&self, analysis: &NewAnalysis) -> Result<Option<AnalysisId>> {
        let visit = &analysis.visit;
        let row = sqlx::query(r#"
            INSERT INTO analyses (appointment_id, patient_id, doctor_id, visit_date, original_photo_path, status)
            SELECT $1::BIGINT, $2::BIGINT, $3::BIGINT, $4::TIMESTAMPTZ, $5::VARCHAR, $6::VARCHAR
            WHERE EXISTS (SELECT 1 FROM patients WHERE id = $2)
              AND ($1::BIGINT IS NULL OR EXISTS (SELECT 1 FROM appointments WHERE id = $1))
            RETURNING id
        "#)
        .bind(analysis.appointment_id.map(|id| id.0))
        .bind(visit.patient_id.0)
        .bind(visit.doctor_id.0)
        .bind(visit.visit_date)
        .bind(&visit.original_photo_path)
        .bind(ProcessingStatus::Pending.as_str())
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(row.map(|row| AnalysisId(row.get("id"))))
    }

    async fn get_analysis(&self, id: AnalysisId) -> Result<Option<Analysis>> {
        let sql = format!("SELECT {} FROM analyses WHERE id = $1", ANALYSIS_COLUMNS);
        let result = sqlx::query_as::<_, DbAnalysis>(&sql)
            .bind(id.0)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)?;

        result.map(Analysis::try_from).transpose()
    }

    async fn analysis_for_appointment(&self, appointment_id: AppointmentId) -> Result<Option<Analysis>> {
        let sql = format!(
            "SELECT {} FROM analyses WHERE appointment_id = $1 ORDER BY id LIMIT 1",
            ANALYSIS_COLUMNS
        );
        let result = sqlx::query_as::<_, DbAnalysis>(&sql)
            .bind(appointment_id.0)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)?;

        result.map(Analysis::try_from).transpose()
    }

    async fn update_analysis(&self, analysis: &Analysis) -> Result<u64> {
        let indices = analysis.indices;
        let result = sqlx::query(r#"
            UPDATE analyses
            SET appointment_id = $2, doctor_id = $3, visit_date = $4, original_photo_path = $5,
                processed_photo_path = $6, hdi_s = $7, hdi_a = $8, hdi_t = $9,
                fai_c7 = $10, fai_a = $11, fai_t = $12, status = $13, failure_reason = $14
            WHERE id = $1
        "#)
        .bind(analysis.id.0)
        .bind(analysis.appointment_id.map(|id| id.0))
        .bind(analysis.visit.doctor_id.0)
        .bind(analysis.visit.visit_date)
        .bind(&analysis.visit.original_photo_path)
        .bind(&analysis.processed_photo_path)
        .bind(indices.map(|i| i.hdi_s))
        .bind(indices.map(|i| i.hdi_a))
        .bind(indices.map(|i| i.hdi_t))
        .bind(indices.map(|i| i.fai_c7))
        .bind(indices.map(|i| i.fai_a))
        .bind(indices.map(|i| i.fai_t))
        .bind(analysis.status.as_str())
        .bind(&analysis.failure_reason)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected())
    }

    async fn unfinished_analyses(&self) -> Result<Vec<Analysis>> {
        let sql = format!(
            "SELECT {} FROM analyses WHERE status <> 'COMPLETE' ORDER BY visit_date ASC, id ASC",
            ANALYSIS_COLUMNS
        );
        sqlx::query_as::<_, DbAnalysis>(&sql)
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_error)?
            .into_iter()
            .map(Analysis::try_from)
            .collect()
    }

    async fn delete_analysis(&self, id: AnalysisId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM analyses WHERE id = $1")
            .bind(id.0)
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn replace_keypoints(&self, analysis_id: AnalysisId, keypoints: &[NewKeypoint]) -> Result<u64> {
        let mut tx = self.pool.pool().begin().await.map_err(db_error)?;

        let exists = sqlx::query("SELECT id FROM analyses WHERE id = $1 FOR UPDATE")
            .bind(analysis_id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?;
        if exists.is_none() {
            tx.rollback().await.map_err(db_error)?;
            return Ok(0);
        }

        sqlx::query("DELETE FROM keypoints WHERE analysis_id = $1")
            .bind(analysis_id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        let mut inserted = 0;
        for keypoint in keypoints {
            let result = sqlx::query("INSERT INTO keypoints (analysis_id, name, x, y) VALUES ($1, $2, $3, $4)")
                .bind(analysis_id.0)
                .bind(keypoint.landmark.label())
                .bind(keypoint.x)
                .bind(keypoint.y)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(db_error)?;
        Ok(inserted)
    }

    async fn keypoints_for(&self, analysis_id: AnalysisId) -> Result<Vec<Keypoint>> {
        sqlx::query_as::<_, DbKeypoint>(
            "SELECT id, analysis_id, name, x, y FROM keypoints WHERE analysis_id = $1 ORDER BY id",
        )
        .bind(analysis_id.0)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)?
        .into_iter()
        .map(Keypoint::try_from)
        .collect()
    }

    async fn insert_note(&self, owner: NoteOwner, content: &str) -> Result<Option<NoteId>> {
        let (appointment_id, analysis_id) = note_owner_columns(owner);
        let row = sqlx::query(r#"
            INSERT INTO notes (appointment_id, analysis_id, content)
            SELECT $1::BIGINT, $2::BIGINT, $3::TEXT
            WHERE EXISTS (SELECT 1 FROM appointments WHERE id = $1)
               OR EXISTS (SELECT 1 FROM analyses WHERE id = $2)
            RETURNING id
        "#)
        .bind(appointment_id)
        .bind(analysis_id)
        .bind(content)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(row.map(|row| NoteId(row.get("id"))))
    }

    async fn get_note(&self, id: NoteId) -> Result<Option<Note>> {
        let result = sqlx::query_as::<_, DbNote>(
            "SELECT id, appointment_id, analysis_id, content, created_at FROM notes WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?;

        result.map(Note::try_from).transpose()
    }

    async fn delete_note(&self, id: NoteId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM notes WHERE id = $1")
            .bind(id.0)
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn notes_for(&self, owner: NoteOwner) -> Result<Vec<Note>> {
        let (sql, id) = match owner {
            NoteOwner::Appointment(id) => (
                "SELECT id, appointment_id, analysis_id, content, created_at FROM notes WHERE appointment_id = $1 ORDER BY id",
                id.0,
            ),
            NoteOwner::Analysis(id) => (
                "SELECT id, appointment_id, analysis_id, content, created_at FROM notes WHERE analysis_id = $1 ORDER BY id",
                id.0,
            ),
        };

        sqlx::query_as::<_, DbNote>(sql)
            .bind(id)
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_error)?
            .into_iter()
            .map(Note::try_from)
            .collect()
    }
}
