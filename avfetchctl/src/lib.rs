use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use avfetch_core::{
    load_batch_config, BatchConfig, BatchDriver, BatchReport, DriverError, ErrorLedger,
    ItemProcessor, ProgressLedger, ProxyError, ProxyManager,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] avfetch_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("proxy error: {0}")]
    Proxy(#[from] ProxyError),
    #[error("batch error: {0}")]
    Driver(#[from] DriverError),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable batch video downloader", long_about = None)]
pub struct Cli {
    /// Batch name: names the input CSV, the output directory and the log file
    pub batch: String,
    /// Path to avfetch.toml
    #[arg(long, default_value = "configs/avfetch.toml")]
    pub config: PathBuf,
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;
    init_logging(&context)?;
    tracing::info!(batch = %cli.batch, "batch downloader initialized");

    // The pipeline is deliberately sequential; one worker thread is enough.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(context.run_batch())?;

    tracing::info!(
        completed = report.completed,
        failed = report.failed,
        already_complete = report.already_complete,
        total = report.total,
        "batch run finished"
    );
    println!(
        "batch {}: {} completed, {} failed, {} already done, {} total",
        cli.batch, report.completed, report.failed, report.already_complete, report.total
    );
    Ok(())
}

fn init_logging(context: &AppContext) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&context.log_path)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[derive(Debug)]
struct AppContext {
    config: BatchConfig,
    worklist_path: PathBuf,
    output_root: PathBuf,
    log_path: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config = load_batch_config(&cli.config)?;
        let worklist_path = config.worklist_path(&cli.batch);
        let output_root = config.output_root(&cli.batch);
        fs::create_dir_all(&output_root)?;
        let log_path = output_root.join(format!("{}_log.txt", cli.batch));
        Ok(Self {
            config,
            worklist_path,
            output_root,
            log_path,
        })
    }

    async fn run_batch(&self) -> Result<BatchReport> {
        let progress = ProgressLedger::new(self.output_root.join("progress_log.txt"));
        let errors = ErrorLedger::new(self.output_root.join("error_log.txt"));
        let proxy = ProxyManager::new(&self.config.proxy)?;
        let processor = ItemProcessor::new(
            self.output_root.clone(),
            self.config.download.clone(),
            self.config.cover.clone(),
            errors.clone(),
        );
        let driver = BatchDriver::new(
            self.worklist_path.clone(),
            progress,
            errors,
            proxy,
            processor,
            self.config.driver.checkpoint_interval,
        );
        Ok(driver.run().await?)
    }
}
