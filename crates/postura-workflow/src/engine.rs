//! 就诊处理流水线
//!
//! 按状态机顺序串联：接收原图、登记记录、创建目录、调用处理能力、解析结果、持久化。
//! 每一步独立提交，失败不回滚已提交的记录和已生成的文件；失败时尽力把记录状态标记为
//! `Failed` 并返回带阶段信息的 `VisitFailure`。
//!
//! 调用方取消（丢弃future）时同样保留已写入的记录和文件，可通过
//! `CaseRepository::unfinished_visits` 查出后人工处理。

use chrono::{DateTime, Utc};
use postura_core::utils::{file_stem, is_accepted_photo};
use postura_core::{
    Analysis, AnalysisId, AnglePolicy, Appointment, DoctorId, Keypoint, PatientId, PosturaError,
    ProcessingStatus, Result, VisitCase, VisualizationSet,
};
use postura_processing::{build_keypoint_set, parse_angle, ProcessingInvoker, ANNOTATED_IMAGE_NAME};
use postura_storage::{ArtifactLayout, ArtifactStore, VisitFolder};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::repository::CaseRepository;
use crate::state_machine::{VisitFailure, VisitRun, VisitStage, VisitStateMachine};

/// 流水线参数
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// 三维重建使用的参考模型
    pub reference_model: PathBuf,
    pub angle_policy: AnglePolicy,
}

/// 上传的照片
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub file_name: String,
    pub data: Vec<u8>,
}

/// 一次就诊处理请求
#[derive(Debug, Clone)]
pub struct VisitRequest {
    pub patient_id: PatientId,
    pub doctor_id: DoctorId,
    pub visit_date: DateTime<Utc>,
    pub photo: PhotoUpload,
}

/// 处理成功的结果
#[derive(Debug, Clone, Serialize)]
pub struct VisitSummary {
    pub appointment: Option<Appointment>,
    pub analysis: Analysis,
    pub keypoints: Vec<Keypoint>,
}

/// 就诊处理流水线
pub struct VisitPipeline {
    repository: CaseRepository,
    store: ArtifactStore,
    layout: ArtifactLayout,
    invoker: ProcessingInvoker,
    settings: PipelineSettings,
}

impl VisitPipeline {
    pub fn new(
        repository: CaseRepository,
        store: ArtifactStore,
        invoker: ProcessingInvoker,
        settings: PipelineSettings,
    ) -> Self {
        let layout = ArtifactLayout::new(&store);
        Self {
            repository,
            store,
            layout,
            invoker,
            settings,
        }
    }

    pub fn repository(&self) -> &CaseRepository {
        &self.repository
    }

    /// 处理一次预约就诊：三维轨道（Appointment）后接二维轨道（配对的Analysis）
    pub async fn process_visit(&self, request: VisitRequest) -> std::result::Result<VisitSummary, VisitFailure> {
        let span = info_span!("visit", patient_id = %request.patient_id, run_id = %Uuid::new_v4());
        async move {
            let mut run = VisitRun::new(VisitStateMachine::paired());
            match self.run_paired(&mut run, request).await {
                Ok(summary) => Ok(summary),
                Err(cause) => Err(self.fail(run, cause).await),
            }
        }
        .instrument(span)
        .await
    }

    /// 处理一次独立分析：只有二维轨道
    pub async fn process_analysis(&self, request: VisitRequest) -> std::result::Result<VisitSummary, VisitFailure> {
        let span = info_span!("analysis", patient_id = %request.patient_id, run_id = %Uuid::new_v4());
        async move {
            let mut run = VisitRun::new(VisitStateMachine::analysis_only());
            match self.run_analysis_only(&mut run, request).await {
                Ok(summary) => Ok(summary),
                Err(cause) => Err(self.fail(run, cause).await),
            }
        }
        .instrument(span)
        .await
    }

    /// 对已有分析重新执行二维轨道，关键点整体替换
    pub async fn reprocess_analysis(&self, analysis_id: AnalysisId) -> std::result::Result<VisitSummary, VisitFailure> {
        let span = info_span!(
            "reprocess",
            analysis_id = %analysis_id,
            patient_id = tracing::field::Empty,
            run_id = %Uuid::new_v4()
        );
        async move {
            let mut run = VisitRun::resume(VisitStateMachine::analysis_only(), VisitStage::AnalysisCreated);
            match self.run_reprocess(&mut run, analysis_id).await {
                Ok(summary) => Ok(summary),
                Err(cause) => Err(self.fail(run, cause).await),
            }
        }
        .instrument(span)
        .await
    }

    /// 校验照片、确认患者存在并保存原图，返回就诊信息
    async fn intake(&self, run: &mut VisitRun, request: VisitRequest) -> Result<VisitCase> {
        let VisitRequest {
            patient_id,
            doctor_id,
            visit_date,
            photo,
        } = request;

        if !is_accepted_photo(&photo.file_name) {
            return Err(PosturaError::Validation(format!(
                "只接受 .jpg/.jpeg 照片: {}",
                photo.file_name
            )));
        }
        self.repository.patient(patient_id).await?;

        let stored_name = self.store.store_original(&photo.file_name, &photo.data).await?;
        run.advance(VisitStage::Intake)?;
        info!("Photo {} accepted as {}", photo.file_name, stored_name);

        Ok(VisitCase {
            patient_id,
            doctor_id,
            visit_date,
            original_photo_path: stored_name,
        })
    }

    /// 原图的绝对路径，原图不存在时返回 `NotFound`
    async fn original_image(&self, visit: &VisitCase) -> Result<PathBuf> {
        let image = self.store.original_path(&visit.original_photo_path);
        if !self.store.exists(&image).await? {
            return Err(PosturaError::NotFound(format!("原图不存在: {}", image.display())));
        }
        Ok(image)
    }

    async fn run_paired(&self, run: &mut VisitRun, request: VisitRequest) -> Result<VisitSummary> {
        let visit = self.intake(run, request).await?;

        // 先持久化获得ID，再按ID创建目录
        let mut appointment = self.repository.create_appointment(visit.clone()).await?;
        run.appointment_id = Some(appointment.id);
        let folder = self
            .layout
            .ensure_visit_folder(visit.patient_id, appointment.id)
            .await?;
        run.advance(VisitStage::FolderReady)?;

        let image = self.original_image(&visit).await?;
        let output = self
            .invoker
            .run_3d(
                &image,
                &self.settings.reference_model,
                folder.path(),
                &file_stem(&visit.original_photo_path),
            )
            .await?;
        run.advance(VisitStage::Processed3D)?;

        let angle_text = self.store.read_text(&output.angle_file).await?;
        let angle = parse_angle(&angle_text, self.settings.angle_policy)?;
        let [first, second, third] = &output.visualizations;
        appointment.visualizations = Some(VisualizationSet::new([
            folder.web_path_of(first)?,
            folder.web_path_of(second)?,
            folder.web_path_of(third)?,
        ]));
        appointment.cobb_angle = Some(angle);
        appointment.status = ProcessingStatus::PartiallyComplete;
        self.repository.save_appointment(&appointment).await?;
        run.advance(VisitStage::Persisted3D)?;
        info!("Appointment {} measured: Cobb angle {}", appointment.id, angle);

        let (mut analysis, analysis_folder) = self.create_analysis(run, Some(&appointment), visit).await?;
        let keypoints = self
            .run_2d_track(run, &mut analysis, &image, &analysis_folder)
            .await?;

        appointment.status = ProcessingStatus::Complete;
        self.repository.save_appointment(&appointment).await?;
        run.advance(VisitStage::Complete)?;
        info!("Visit complete: appointment {}, analysis {}", appointment.id, analysis.id);

        Ok(VisitSummary {
            appointment: Some(appointment),
            analysis,
            keypoints,
        })
    }

    async fn run_analysis_only(&self, run: &mut VisitRun, request: VisitRequest) -> Result<VisitSummary> {
        let visit = self.intake(run, request).await?;
        let (mut analysis, folder) = self.create_analysis(run, None, visit).await?;

        let image = self.original_image(&analysis.visit).await?;
        let keypoints = self.run_2d_track(run, &mut analysis, &image, &folder).await?;
        run.advance(VisitStage::Complete)?;
        info!("Analysis {} complete", analysis.id);

        Ok(VisitSummary {
            appointment: None,
            analysis,
            keypoints,
        })
    }

    async fn run_reprocess(&self, run: &mut VisitRun, analysis_id: AnalysisId) -> Result<VisitSummary> {
        run.analysis_id = Some(analysis_id);
        let mut analysis = self.repository.analysis(analysis_id).await?;
        tracing::Span::current().record("patient_id", tracing::field::display(analysis.visit.patient_id));

        let folder = self
            .layout
            .ensure_visit_folder(analysis.visit.patient_id, analysis.id)
            .await?;
        let image = self.original_image(&analysis.visit).await?;
        let keypoints = self.run_2d_track(run, &mut analysis, &image, &folder).await?;
        run.advance(VisitStage::Complete)?;
        info!("Analysis {} reprocessed", analysis.id);

        Ok(VisitSummary {
            appointment: None,
            analysis,
            keypoints,
        })
    }

    /// 创建分析记录及其目录
    async fn create_analysis(
        &self,
        run: &mut VisitRun,
        appointment: Option<&Appointment>,
        visit: VisitCase,
    ) -> Result<(Analysis, VisitFolder)> {
        let patient_id = visit.patient_id;
        let analysis = self
            .repository
            .create_analysis(appointment.map(|a| a.id), visit)
            .await?;
        run.analysis_id = Some(analysis.id);

        let folder = self.layout.ensure_visit_folder(patient_id, analysis.id).await?;
        run.advance(VisitStage::AnalysisCreated)?;
        Ok((analysis, folder))
    }

    /// 二维轨道：分析、生成标注图、替换关键点、写入指数
    async fn run_2d_track(
        &self,
        run: &mut VisitRun,
        analysis: &mut Analysis,
        image: &Path,
        folder: &VisitFolder,
    ) -> Result<Vec<Keypoint>> {
        let report = self.invoker.run_2d(image, folder.path()).await?;
        self.invoker.annotate(&report, image, folder.path()).await?;
        run.advance(VisitStage::Processed2D)?;

        let keypoints = self
            .repository
            .replace_keypoints(analysis.id, &build_keypoint_set(&report, analysis.id))
            .await?;
        analysis.indices = Some(report.indices);
        analysis.processed_photo_path = Some(folder.web_path(ANNOTATED_IMAGE_NAME));
        analysis.status = ProcessingStatus::Complete;
        analysis.failure_reason = None;
        self.repository.save_analysis(analysis).await?;
        run.advance(VisitStage::Persisted2D)?;

        Ok(keypoints)
    }

    /// 记录失败：尽力把已提交但未完成的记录标记为 `Failed`
    async fn fail(&self, run: VisitRun, cause: PosturaError) -> VisitFailure {
        // 二维结果已持久化时分析记录已是 Complete，不再改写
        let analysis_settled = run.attained() == Some(VisitStage::Persisted2D);
        let failure = run.fail(cause);
        error!("Visit failed at {}: {}", failure.stage, failure.cause);

        let reason = Some(failure.to_string());
        if let Some(id) = failure.analysis_id.filter(|_| !analysis_settled) {
            if let Err(e) = self
                .repository
                .mark_analysis(id, ProcessingStatus::Failed, reason.clone())
                .await
            {
                warn!("Could not mark analysis {} as failed: {}", id, e);
            }
        }
        if let Some(id) = failure.appointment_id {
            if let Err(e) = self
                .repository
                .mark_appointment(id, ProcessingStatus::Failed, reason)
                .await
            {
                warn!("Could not mark appointment {} as failed: {}", id, e);
            }
        }

        failure
    }
}
