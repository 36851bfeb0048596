use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::command::{CommandExecutor, CommandOutcome, SystemCommandExecutor};
use crate::config::{CoverSection, DownloadSection};
use crate::ledger::{ErrorLedger, LedgerError};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to walk {path}: {source}")]
    Walk {
        source: walkdir::Error,
        path: PathBuf,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub type ProcessResult<T> = Result<T, ProcessError>;

/// Per-item output layout under `<output_root>/<avid>/`. Directories persist
/// across restarts and are reused, never recreated destructively.
#[derive(Debug, Clone)]
pub struct ItemDirectories {
    pub merge: PathBuf,
    pub audio_only: PathBuf,
    pub video_only: PathBuf,
}

impl ItemDirectories {
    pub fn new(output_root: &Path, avid: u64) -> Self {
        let item_root = output_root.join(avid.to_string());
        Self {
            merge: item_root.join("merge"),
            audio_only: item_root.join("audio_only"),
            video_only: item_root.join("video_only"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadFailure {
    NonZeroExit,
    TimedOut,
    Invocation,
}

impl fmt::Display for DownloadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DownloadFailure::NonZeroExit => "nonzero exit code",
            DownloadFailure::TimedOut => "timeout",
            DownloadFailure::Invocation => "invocation error",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed,
    Failed(DownloadFailure),
}

/// Processes one work item: directory layout, downloader invocation, cover
/// extraction sweep. Failures below the item boundary are recorded to the
/// error ledger and surfaced as outcome values, never panics.
pub struct ItemProcessor {
    output_root: PathBuf,
    download: DownloadSection,
    cover: CoverSection,
    errors: ErrorLedger,
    executor: Arc<dyn CommandExecutor>,
}

impl ItemProcessor {
    pub fn new(
        output_root: PathBuf,
        download: DownloadSection,
        cover: CoverSection,
        errors: ErrorLedger,
    ) -> Self {
        Self {
            output_root,
            download,
            cover,
            errors,
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn video_url(&self, avid: u64) -> String {
        format!("https://{}/video/av{}/", self.download.site, avid)
    }

    pub fn download_args(&self, avid: u64, proxy: &str, merge_dir: &Path) -> Vec<String> {
        vec![
            self.video_url(avid),
            "--with-metadata".to_string(),
            "-d".to_string(),
            merge_dir.to_string_lossy().to_string(),
            "--proxy".to_string(),
            proxy.to_string(),
            "--no-progress".to_string(),
            "-w".to_string(),
        ]
    }

    pub fn cover_args(&self, video: &Path, image: &Path) -> Vec<String> {
        vec![
            "-loglevel".to_string(),
            "quiet".to_string(),
            "-i".to_string(),
            video.to_string_lossy().to_string(),
            "-map".to_string(),
            "0:v".to_string(),
            "-map".to_string(),
            "-0:V".to_string(),
            "-c".to_string(),
            "copy".to_string(),
            image.to_string_lossy().to_string(),
        ]
    }

    pub fn ensure_directories(&self, avid: u64) -> ProcessResult<ItemDirectories> {
        let dirs = ItemDirectories::new(&self.output_root, avid);
        for dir in [&dirs.merge, &dirs.audio_only, &dirs.video_only] {
            std::fs::create_dir_all(dir).map_err(|source| ProcessError::Io {
                source,
                path: dir.clone(),
            })?;
        }
        Ok(dirs)
    }

    pub async fn download(
        &self,
        avid: u64,
        proxy: &str,
        merge_dir: &Path,
    ) -> ProcessResult<DownloadOutcome> {
        let args = self.download_args(avid, proxy, merge_dir);
        let limit = Duration::from_secs(self.download.timeout_seconds);
        info!(avid, tool = %self.download.tool, "starting download");
        let failure = match self
            .executor
            .run(Path::new(&self.download.tool), &args, limit)
            .await
        {
            Ok(outcome) if outcome.success() => return Ok(DownloadOutcome::Completed),
            Ok(CommandOutcome::TimedOut) => {
                warn!(avid, limit_secs = limit.as_secs(), "download timed out");
                DownloadFailure::TimedOut
            }
            Ok(CommandOutcome::Exited(status)) => {
                warn!(avid, code = ?status.code(), "download exited with failure");
                DownloadFailure::NonZeroExit
            }
            Err(err) => {
                warn!(avid, error = %err, "download tool could not be invoked");
                DownloadFailure::Invocation
            }
        };
        self.errors.append(avid)?;
        Ok(DownloadOutcome::Failed(failure))
    }

    /// Recursively scans `merge_dir` for downloaded videos and extracts a
    /// cover image next to each one. A failed extraction is recorded with
    /// the file basename and does not fail the item. Returns the number of
    /// covers written.
    pub async fn extract_covers(&self, merge_dir: &Path) -> ProcessResult<usize> {
        let mut extracted = 0usize;
        for entry in WalkDir::new(merge_dir) {
            let entry = entry.map_err(|source| ProcessError::Walk {
                path: merge_dir.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let video = entry.path();
            let is_video = video
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case(&self.cover.video_extension))
                .unwrap_or(false);
            if !is_video {
                continue;
            }
            if self.extract_one_cover(video).await {
                extracted += 1;
            }
        }
        Ok(extracted)
    }

    async fn extract_one_cover(&self, video: &Path) -> bool {
        let image = video.with_extension(&self.cover.image_extension);
        let args = self.cover_args(video, &image);
        let limit = Duration::from_secs(self.cover.timeout_seconds);
        let result = self
            .executor
            .run(Path::new(&self.cover.tool), &args, limit)
            .await;
        match result {
            Ok(outcome) if outcome.success() => {
                info!(video = %video.display(), image = %image.display(), "extracted cover");
                true
            }
            other => {
                warn!(video = %video.display(), outcome = ?other, "cover extraction failed");
                let basename = video
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_else(|| video.to_string_lossy().to_string());
                if let Err(err) = self.errors.append(basename) {
                    warn!(error = %err, "failed to record cover failure");
                }
                false
            }
        }
    }

    /// The whole per-item composition. Cover extraction runs only after a
    /// completed download, and its failures never demote the outcome: the
    /// download is the deliverable, cover art is best-effort.
    pub async fn process_one(&self, avid: u64, proxy: &str) -> ProcessResult<DownloadOutcome> {
        let dirs = self.ensure_directories(avid)?;
        let outcome = self.download(avid, proxy, &dirs.merge).await?;
        if outcome == DownloadOutcome::Completed {
            let covers = self.extract_covers(&dirs.merge).await?;
            info!(avid, covers, "item processed");
        }
        Ok(outcome)
    }
}
