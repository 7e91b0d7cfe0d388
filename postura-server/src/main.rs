//! Postura体态评估处理服务主程序

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use postura_admin::{init_logging, ConfigManager, PosturaConfig};
use postura_core::{AnalysisId, AppointmentId, DoctorId, PatientId};
use postura_database::{DatabasePool, DatabaseQueries};
use postura_processing::{CommandSpineProcessor, OutputContract, ProcessingInvoker};
use postura_storage::ArtifactStore;
use postura_workflow::{
    CaseRepository, PhotoUpload, PipelineSettings, VisitPipeline, VisitRequest, VisitSummary,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "postura-server")]
#[command(about = "Postura 脊柱体态评估处理服务")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 创建数据库表
    InitDb,
    /// 登记患者
    AddPatient {
        #[arg(long)]
        name: String,
    },
    /// 处理一次预约就诊（三维 + 二维）
    Process(VisitArgs),
    /// 处理一次独立分析（仅二维）
    Analyze(VisitArgs),
    /// 重新处理已有分析
    Reprocess {
        #[arg(long)]
        analysis: i64,
    },
    /// 列出患者的全部就诊
    Visits {
        #[arg(long)]
        patient: i64,
    },
    /// 删除就诊及其配对分析
    DeleteVisit {
        #[arg(long)]
        appointment: i64,
    },
    /// 列出未完成的就诊
    Unfinished,
    /// 输出生效的配置
    ShowConfig,
}

#[derive(clap::Args, Debug)]
struct VisitArgs {
    #[arg(long)]
    patient: i64,
    #[arg(long)]
    doctor: i64,
    /// 照片文件（.jpg/.jpeg）
    #[arg(long)]
    photo: PathBuf,
    /// 就诊时间（RFC 3339），默认当前时间
    #[arg(long)]
    date: Option<DateTime<Utc>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let manager = ConfigManager::load(args.config.as_deref())?;
    let config = manager.config().clone();
    init_logging(&config.logging)?;

    if matches!(args.command, Command::ShowConfig) {
        println!("{}", manager.to_toml()?);
        return Ok(());
    }

    info!("启动Postura处理服务...");
    let queries = connect(&config).await?;

    match args.command {
        Command::InitDb => {
            queries.create_tables().await?;
            info!("数据库初始化完成");
        }
        Command::AddPatient { name } => {
            let id = queries.create_patient(&name).await?;
            println!("{}", id);
        }
        Command::Process(visit) => {
            let pipeline = build_pipeline(&config, queries);
            let request = visit_request(visit).await?;
            report(pipeline.process_visit(request).await)?;
        }
        Command::Analyze(visit) => {
            let pipeline = build_pipeline(&config, queries);
            let request = visit_request(visit).await?;
            report(pipeline.process_analysis(request).await)?;
        }
        Command::Reprocess { analysis } => {
            let pipeline = build_pipeline(&config, queries);
            report(pipeline.reprocess_analysis(AnalysisId(analysis)).await)?;
        }
        Command::Visits { patient } => {
            let repository = CaseRepository::new(Arc::new(queries));
            print_json(&repository.visits_for_patient(PatientId(patient)).await?)?;
        }
        Command::DeleteVisit { appointment } => {
            let repository = CaseRepository::new(Arc::new(queries));
            repository.delete_visit(AppointmentId(appointment)).await?;
        }
        Command::Unfinished => {
            let repository = CaseRepository::new(Arc::new(queries));
            print_json(&repository.unfinished_visits().await?)?;
        }
        Command::ShowConfig => {}
    }

    Ok(())
}

async fn connect(config: &PosturaConfig) -> Result<DatabaseQueries> {
    let pool = DatabasePool::connect(
        &config.database.url,
        config.database.max_connections,
        config.database.connect_timeout(),
    )
    .await
    .context("无法连接数据库")?;
    Ok(DatabaseQueries::new(pool))
}

fn build_pipeline(config: &PosturaConfig, queries: DatabaseQueries) -> VisitPipeline {
    let store = ArtifactStore::new(
        &config.storage.root,
        config.storage.uploads_dir.as_str(),
        config.storage.processed_dir.as_str(),
    );
    let contract = OutputContract {
        visualization_extension: config.processing.visualization_extension.clone(),
        angle_file_suffix: config.processing.angle_file_suffix.clone(),
    };
    let invoker = ProcessingInvoker::new(
        Arc::new(CommandSpineProcessor::new(&config.processing.program)),
        store.clone(),
        contract,
        config.processing.timeout(),
    );
    let settings = PipelineSettings {
        reference_model: config.processing.reference_model.clone(),
        angle_policy: config.pipeline.angle_policy,
    };

    VisitPipeline::new(CaseRepository::new(Arc::new(queries)), store, invoker, settings)
}

async fn visit_request(args: VisitArgs) -> Result<VisitRequest> {
    let data = tokio::fs::read(&args.photo)
        .await
        .with_context(|| format!("无法读取照片 {}", args.photo.display()))?;
    let file_name = args
        .photo
        .file_name()
        .and_then(|name| name.to_str())
        .context("照片文件名无效")?
        .to_string();

    Ok(VisitRequest {
        patient_id: PatientId(args.patient),
        doctor_id: DoctorId(args.doctor),
        visit_date: args.date.unwrap_or_else(Utc::now),
        photo: PhotoUpload { file_name, data },
    })
}

fn report(outcome: std::result::Result<VisitSummary, postura_workflow::VisitFailure>) -> Result<()> {
    match outcome {
        Ok(summary) => print_json(&summary),
        Err(failure) => {
            error!("处理失败: {}", failure);
            Err(failure.into())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
