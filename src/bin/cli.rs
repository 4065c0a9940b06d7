use std::path::PathBuf;

use analysis_core::AppConfig;
use analysis_domain::{AnalysisKind, Job, JobRepository};
use analysis_pipeline::Application;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = CliApp::parse();
    cli.run().await
}

/// CLI应用程序主结构
#[derive(clap::Parser, Debug)]
#[command(name = "analysis-cli")]
#[command(version = "1.0.0")]
#[command(about = "分析作业流水线 - 命令行管理工具")]
#[command(long_about = "提交分析、查看作业状态、重新处理结果等运维操作，在当前进程内直接执行")]
struct CliApp {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件路径
    #[arg(short, long, default_value = "config/pipeline.toml")]
    config: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 查询远程应用的说明
    Describe {
        /// 远程应用名，例如 hdbscan
        app: String,
    },
    /// 提交一个分析作业
    Submit {
        /// 数据集ID
        #[arg(short, long)]
        dataset: i64,
        /// 分析类型，例如 clustering、outlier-detection
        #[arg(short, long)]
        kind: String,
        /// 显示模式ID
        #[arg(long)]
        display_mode: Option<i64>,
        /// 远程作业选项 (JSON格式)
        #[arg(short, long)]
        options: Option<String>,
        /// 数据格式，默认由显示模式或文件扩展名推断
        #[arg(long)]
        format: Option<String>,
        /// 单文件相似度检索的探针文件
        #[arg(long)]
        probe: Option<PathBuf>,
    },
    /// 查看作业状态
    Status {
        job_id: i64,
    },
    /// 重置已结束的作业，由监视器重新处理结果
    Reprocess {
        job_id: i64,
    },
    /// 上传文件到远程服务
    Upload {
        path: PathBuf,
    },
    /// 在当前进程内处理作业结果
    Ingest {
        job_id: i64,
    },
    /// 数据集管理
    Dataset(DatasetCommands),
    /// 配置管理
    Config(ConfigCommands),
}

#[derive(Args, Debug)]
struct DatasetCommands {
    #[command(subcommand)]
    action: DatasetActions,
}

#[derive(Subcommand, Debug)]
enum DatasetActions {
    /// 创建数据集并从列表文件登记图像路径
    Import {
        /// 数据集名称
        #[arg(short, long)]
        name: String,
        /// 每行一个图像路径
        #[arg(short, long)]
        list: PathBuf,
    },
    /// 为数据集添加显示模式
    AddDisplayMode {
        #[arg(short, long)]
        dataset: i64,
        #[arg(short, long)]
        name: String,
        /// 文件扩展名，例如 .png
        #[arg(short, long)]
        extension: String,
        /// 存放该格式文件的目录
        #[arg(long)]
        directory: String,
        /// 是否为源格式
        #[arg(long, default_value_t = false)]
        source: bool,
    },
}

#[derive(Args, Debug)]
struct ConfigCommands {
    #[command(subcommand)]
    action: ConfigActions,
}

#[derive(Subcommand, Debug)]
enum ConfigActions {
    /// 显示当前配置
    Show,
    /// 验证配置文件
    Validate,
    /// 生成示例配置
    Example,
}

impl CliApp {
    fn parse() -> Self {
        <Self as clap::Parser>::parse()
    }

    async fn run(self) -> Result<()> {
        let command = match self.command {
            Commands::Config(config_cmd) => return handle_config_commands(config_cmd, &self.config),
            command => command,
        };

        let config = AppConfig::load(Some(&self.config))
            .with_context(|| format!("加载配置文件失败: {}", self.config))?;
        let app = Application::new(config).await?;
        let result = handle_command(command, &app, &self.config).await;
        app.database().close().await;
        result
    }
}

async fn handle_command(command: Commands, app: &Application, config_path: &str) -> Result<()> {
    match command {
        Commands::Describe { app: name } => {
            let description = app.analysis().describe(&name).await?;
            println!("{}", serde_json::to_string_pretty(&description)?);
        }
        Commands::Submit {
            dataset,
            kind,
            display_mode,
            options,
            format,
            probe,
        } => {
            let kind: AnalysisKind = kind.parse()?;
            let job_options = match options {
                Some(options_str) => serde_json::from_str::<Value>(&options_str)
                    .context("解析作业选项失败，请确保是有效的JSON格式")?,
                None => json!({}),
            };
            let parameters = json!({
                "kind": kind,
                "display_mode_id": display_mode,
                "data_format": format,
                "job_options": job_options,
                "probe_file": probe.map(|p| p.display().to_string()),
            });

            let job = app.submit_analysis(dataset, parameters).await?;
            println!("✓ 作业已提交");
            print_job_details(&job);
        }
        Commands::Status { job_id } => {
            let job = find_job(app, job_id).await?;
            print_job_details(&job);
        }
        Commands::Reprocess { job_id } => {
            app.database()
                .job_repository()
                .reset_for_reprocess(job_id)
                .await
                .with_context(|| format!("重置作业 {job_id} 失败"))?;
            println!("✓ 作业 {job_id} 已重置，监视器将在下一轮重新处理结果");
        }
        Commands::Upload { path } => {
            let uploaded = app.analysis().upload_file(&path).await?;
            println!("✓ 已上传 {}", path.display());
            println!("  UUID: {}", uploaded.uuid);
        }
        Commands::Ingest { job_id } => {
            app.ingest_handler()
                .ingest(job_id)
                .await
                .with_context(|| format!("处理作业 {job_id} 的结果失败"))?;
            let job = find_job(app, job_id).await?;
            print_job_details(&job);
        }
        Commands::Dataset(dataset_cmd) => handle_dataset_commands(dataset_cmd, app).await?,
        Commands::Config(config_cmd) => handle_config_commands(config_cmd, config_path)?,
    }

    Ok(())
}

async fn find_job(app: &Application, job_id: i64) -> Result<Job> {
    app.database()
        .job_repository()
        .find_by_id(job_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("作业 {job_id} 不存在"))
}

async fn handle_dataset_commands(dataset_cmd: DatasetCommands, app: &Application) -> Result<()> {
    let datasets = app.database().dataset_repository();

    match dataset_cmd.action {
        DatasetActions::Import { name, list } => {
            let content = tokio::fs::read_to_string(&list)
                .await
                .with_context(|| format!("读取列表文件失败: {}", list.display()))?;
            let paths: Vec<String> = content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect();

            let dataset = datasets.create_dataset(&name).await?;
            let inserted = app
                .database()
                .image_repository()
                .insert_paths(dataset.id, &paths)
                .await?;
            println!("✓ 数据集 {} 已创建 (ID {})，登记图像 {}", name, dataset.id, inserted);
        }
        DatasetActions::AddDisplayMode {
            dataset,
            name,
            extension,
            directory,
            source,
        } => {
            let mode = datasets
                .create_display_mode(dataset, &name, &extension, &directory, source)
                .await?;
            println!("✓ 显示模式 {} 已创建 (ID {})", mode.name, mode.id);
        }
    }

    Ok(())
}

fn handle_config_commands(config_cmd: ConfigCommands, config_path: &str) -> Result<()> {
    match config_cmd.action {
        ConfigActions::Show => {
            let app_config = AppConfig::load(Some(config_path)).context("加载配置文件失败")?;
            println!("配置文件路径: {config_path}");
            println!("{}", app_config.to_toml()?);
        }
        ConfigActions::Validate => match AppConfig::load(Some(config_path)) {
            Ok(_) => println!("✓ 配置文件验证通过"),
            Err(e) => return Err(anyhow::anyhow!("✗ 配置文件验证失败: {e:#}")),
        },
        ConfigActions::Example => {
            println!("{}", AppConfig::default().to_toml()?);
        }
    }

    Ok(())
}

fn print_job_details(job: &Job) {
    println!("作业详情:");
    println!("  ID: {}", job.id);
    println!("  数据集: {}", job.dataset_id);
    println!("  类型: {}", job.kind);
    println!("  远程作业: {}", job.remote_job_id.as_deref().unwrap_or("N/A"));
    println!("  远程状态: {}", job.remote_state.as_deref().unwrap_or("N/A"));
    if let Some(status) = &job.remote_status {
        println!("  远程说明: {status}");
    }
    println!("  结果状态: {}", job.result_status);
    if let Some(error) = &job.error_message {
        println!("  错误信息: {error}");
    }
    println!("  开始时间: {}", job.started_at);
    match job.finished_at {
        Some(finished_at) => println!("  结束时间: {finished_at}"),
        None => println!("  结束时间: N/A"),
    }
    if let Some(handle) = &job.ingest_handle {
        println!("  处理句柄: {handle}");
    }
}
