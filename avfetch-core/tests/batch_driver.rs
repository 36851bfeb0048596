use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use avfetch_core::command::{CommandExecutor, CommandOutcome};
use avfetch_core::config::{CoverSection, DownloadSection, ProxySection};
use avfetch_core::driver::{BatchDriver, CheckpointGate};
use avfetch_core::ledger::{ErrorLedger, ProgressLedger};
use avfetch_core::processor::ItemProcessor;
use avfetch_core::proxy::{LeaseSource, ProxyManager, ProxyResult};

#[cfg(unix)]
fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    ExitStatus::from_raw(code << 8)
}
#[cfg(windows)]
fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;
    ExitStatus::from_raw(code as u32)
}

struct StaticLeaseSource;

#[async_trait]
impl LeaseSource for StaticLeaseSource {
    async fn fetch(&self) -> ProxyResult<String> {
        Ok("http://10.0.0.1:8080".to_string())
    }
}

/// Stands in for the downloader and the cover extractor. Downloads succeed
/// for every avid except those listed in `timing_out`, dropping a video file
/// into the merge directory; cover extraction writes the requested image.
struct FakeTools {
    timing_out: Vec<u64>,
    calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
}

impl FakeTools {
    fn new(timing_out: Vec<u64>) -> Arc<Self> {
        Arc::new(Self {
            timing_out,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn download_urls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(program, _)| program == Path::new("yutto"))
            .map(|(_, args)| args[0].clone())
            .collect()
    }
}

#[async_trait]
impl CommandExecutor for FakeTools {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        _limit: Duration,
    ) -> std::io::Result<CommandOutcome> {
        self.calls
            .lock()
            .unwrap()
            .push((program.to_path_buf(), args.to_vec()));

        if program == Path::new("yutto") {
            let url = &args[0];
            let dest = args
                .iter()
                .position(|arg| arg == "-d")
                .and_then(|pos| args.get(pos + 1))
                .expect("download args carry a destination");
            if self.timing_out.iter().any(|avid| url.contains(&format!("av{avid}/"))) {
                return Ok(CommandOutcome::TimedOut);
            }
            let avid: String = url.chars().filter(|c| c.is_ascii_digit()).collect();
            std::fs::write(Path::new(dest).join(format!("av{avid}.mp4")), b"video")?;
            return Ok(CommandOutcome::Exited(exit_status(0)));
        }

        // Cover extractor: the output image is the final argument.
        let image = args.last().expect("cover args carry an output path");
        std::fs::write(image, b"jpeg")?;
        Ok(CommandOutcome::Exited(exit_status(0)))
    }
}

struct CountingCheckpoint {
    hits: Mutex<Vec<usize>>,
}

impl CountingCheckpoint {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            hits: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CheckpointGate for CountingCheckpoint {
    async fn wait(&self, processed: usize, _elapsed: Duration) -> std::io::Result<()> {
        self.hits.lock().unwrap().push(processed);
        Ok(())
    }
}

fn build_driver(
    base: &TempDir,
    tools: Arc<FakeTools>,
    checkpoint: Arc<dyn CheckpointGate>,
    checkpoint_interval: usize,
) -> BatchDriver {
    let output_root = base.path().join("out");
    std::fs::create_dir_all(&output_root).unwrap();
    let errors = ErrorLedger::new(output_root.join("error_log.txt"));
    let progress = ProgressLedger::new(output_root.join("progress_log.txt"));
    let proxy = ProxyManager::with_source(
        &ProxySection {
            api_url: "http://unused.example/fetch_ip".into(),
            lease_ttl_seconds: 300,
            max_attempts: 5,
            retry_delay_seconds: 0,
        },
        Arc::new(StaticLeaseSource),
    );
    let processor = ItemProcessor::new(
        output_root,
        DownloadSection {
            tool: "yutto".into(),
            site: "www.bilibili.com".into(),
            timeout_seconds: 180,
        },
        CoverSection {
            tool: "ffmpeg".into(),
            timeout_seconds: 60,
            video_extension: "mp4".into(),
            image_extension: "jpg".into(),
        },
        errors.clone(),
    )
    .with_executor(tools as Arc<dyn CommandExecutor>);
    BatchDriver::new(
        base.path().join("batch.csv"),
        progress,
        errors,
        proxy,
        processor,
        checkpoint_interval,
    )
    .with_checkpoint(checkpoint)
}

#[tokio::test]
async fn failed_item_is_isolated_and_completion_is_durable() {
    let base = TempDir::new().unwrap();
    std::fs::write(base.path().join("batch.csv"), "avid\n101\n102\n").unwrap();

    let tools = FakeTools::new(vec![102]);
    let driver = build_driver(&base, Arc::clone(&tools), CountingCheckpoint::new(), 1000);
    let report = driver.run().await.unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.already_complete, 0);
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 1);

    let out = base.path().join("out");
    let progress = std::fs::read_to_string(out.join("progress_log.txt")).unwrap();
    assert_eq!(progress, "101\n");
    let errors = std::fs::read_to_string(out.join("error_log.txt")).unwrap();
    assert_eq!(errors, "102\n");
    assert!(out.join("101/merge/av101.jpg").exists());
    assert!(out.join("102/merge").is_dir());
}

#[tokio::test]
async fn second_run_attempts_only_unfinished_items() {
    let base = TempDir::new().unwrap();
    std::fs::write(base.path().join("batch.csv"), "avid\n101\n102\n").unwrap();

    let first_tools = FakeTools::new(vec![102]);
    build_driver(&base, Arc::clone(&first_tools), CountingCheckpoint::new(), 1000)
        .run()
        .await
        .unwrap();

    // The retry run sees 101 in the ledger and only reattempts 102.
    let second_tools = FakeTools::new(vec![]);
    let report = build_driver(&base, Arc::clone(&second_tools), CountingCheckpoint::new(), 1000)
        .run()
        .await
        .unwrap();

    assert_eq!(report.already_complete, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(
        second_tools.download_urls(),
        vec!["https://www.bilibili.com/video/av102/".to_string()]
    );

    let progress =
        std::fs::read_to_string(base.path().join("out/progress_log.txt")).unwrap();
    assert_eq!(progress, "101\n102\n");
}

#[tokio::test]
async fn duplicate_ids_are_processed_once_in_first_seen_order() {
    let base = TempDir::new().unwrap();
    std::fs::write(base.path().join("batch.csv"), "avid\n5\n3\n5\n3\n7\n").unwrap();

    let tools = FakeTools::new(vec![]);
    let report = build_driver(&base, Arc::clone(&tools), CountingCheckpoint::new(), 1000)
        .run()
        .await
        .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.completed, 3);
    assert_eq!(
        tools.download_urls(),
        vec![
            "https://www.bilibili.com/video/av5/".to_string(),
            "https://www.bilibili.com/video/av3/".to_string(),
            "https://www.bilibili.com/video/av7/".to_string(),
        ]
    );
}

#[tokio::test]
async fn checkpoint_gate_fires_every_interval() {
    let base = TempDir::new().unwrap();
    std::fs::write(base.path().join("batch.csv"), "avid\n1\n2\n3\n4\n5\n").unwrap();

    let tools = FakeTools::new(vec![]);
    let checkpoint = CountingCheckpoint::new();
    build_driver(&base, tools, Arc::clone(&checkpoint) as Arc<dyn CheckpointGate>, 2)
        .run()
        .await
        .unwrap();

    assert_eq!(*checkpoint.hits.lock().unwrap(), vec![2, 4]);
}

#[tokio::test]
async fn missing_work_list_fails_before_any_processing() {
    let base = TempDir::new().unwrap();
    let tools = FakeTools::new(vec![]);
    let driver = build_driver(&base, Arc::clone(&tools), CountingCheckpoint::new(), 1000);
    let err = driver.run().await.unwrap_err();
    assert!(matches!(
        err,
        avfetch_core::driver::DriverError::WorkList(_)
    ));
    assert!(tools.calls.lock().unwrap().is_empty());
}
