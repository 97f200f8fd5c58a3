// 命令行入口：加载配置、初始化日志后执行上传
//
// clap 的 `///` 注释即命令行帮助文本，保持英文

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cloud_upload_rust::{
    config::{ClientConfig, DEFAULT_CONFIG_PATH},
    logging, StorageOptions, UploadClient, UploadSource,
};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "cloud-upload-rust")]
#[command(about = "Multipart uploads to cloud storage with optional intelligent ingestion")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// API key (overrides config file and environment)
    #[arg(long)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file
    Upload(UploadArgs),
}

#[derive(clap::Args, Debug)]
struct UploadArgs {
    /// File to upload
    file: PathBuf,

    /// Request intelligent ingestion (used only if the service accepts it)
    #[arg(long)]
    intelligent: bool,

    /// Remote filename (defaults to the local file name)
    #[arg(long)]
    filename: Option<String>,

    #[arg(long)]
    mimetype: Option<String>,

    /// Storage location, e.g. s3, gcs, azure
    #[arg(long)]
    location: Option<String>,

    #[arg(long)]
    region: Option<String>,

    #[arg(long)]
    container: Option<String>,

    #[arg(long)]
    path: Option<String>,

    /// public or private
    #[arg(long)]
    access: Option<String>,
}

impl UploadArgs {
    fn storage_options(&self) -> StorageOptions {
        let mut builder = StorageOptions::builder();
        let filename = self.filename.clone().or_else(|| {
            self.file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        });
        if let Some(filename) = filename {
            builder = builder.filename(filename);
        }
        if let Some(mimetype) = &self.mimetype {
            builder = builder.mimetype(mimetype);
        }
        if let Some(location) = &self.location {
            builder = builder.location(location);
        }
        if let Some(region) = &self.region {
            builder = builder.region(region);
        }
        if let Some(container) = &self.container {
            builder = builder.container(container);
        }
        if let Some(path) = &self.path {
            builder = builder.path(path);
        }
        if let Some(access) = &self.access {
            builder = builder.access(access);
        }
        builder.build()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.to_string_lossy().into_owned();
    let mut config = ClientConfig::load_or_default(&config_path).await;
    // 命令行 API key 优先于配置文件和环境变量
    if let Some(api_key) = args.api_key {
        config.api_key = api_key;
    }

    let _log_guard = logging::init_logging(&config.log);
    info!("cloud-upload-rust v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Upload(upload) => run_upload(config, upload).await,
    }
}

async fn run_upload(config: ClientConfig, args: UploadArgs) -> Result<()> {
    let cancel_token = CancellationToken::new();
    let client = UploadClient::new(config)
        .context("Failed to create upload client")?
        .with_cancel_token(cancel_token.clone());

    // 进度输出
    let mut progress = client.subscribe_progress();
    let progress_task = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let p = progress.borrow_and_update().clone();
            info!(
                "进度: {:.1}% ({}/{} 分片, {} KB/s)",
                p.percent(),
                p.completed_parts,
                p.total_parts,
                p.speed / 1024
            );
        }
    });

    let storage = args.storage_options();
    let source = UploadSource::from_path(&args.file);

    // Ctrl-C 取消上传
    let signal_token = cancel_token.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("收到中断信号，取消上传");
            signal_token.cancel();
        }
    });

    let result = client
        .upload(source, None, args.intelligent, storage)
        .await;
    signal_task.abort();
    progress_task.abort();

    match result {
        Ok(handle) => {
            println!("handle: {}", handle.handle);
            println!("url: {}", handle.url);
            Ok(())
        }
        Err(e) => {
            error!("上传失败: {}", e);
            Err(anyhow::Error::new(e).context(format!("Failed to upload {:?}", args.file)))
        }
    }
}
