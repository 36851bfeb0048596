pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod ledger;
pub mod processor;
pub mod proxy;
pub mod worklist;

pub use command::{CommandExecutor, CommandOutcome, SystemCommandExecutor};
pub use config::{
    load_batch_config, BatchConfig, CoverSection, DownloadSection, DriverSection, PathsSection,
    ProxySection,
};
pub use driver::{BatchDriver, BatchReport, CheckpointGate, DriverError, StdinCheckpoint};
pub use error::{ConfigError, Result};
pub use ledger::{ErrorLedger, LedgerError, ProgressLedger};
pub use processor::{
    DownloadFailure, DownloadOutcome, ItemDirectories, ItemProcessor, ProcessError,
};
pub use proxy::{HttpLeaseSource, LeaseSource, ProxyError, ProxyLease, ProxyManager};
