use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Exited(ExitStatus),
    TimedOut,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        matches!(self, CommandOutcome::Exited(status) if status.success())
    }
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        limit: Duration,
    ) -> std::io::Result<CommandOutcome>;
}

pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        limit: Duration,
    ) -> std::io::Result<CommandOutcome> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .spawn()?;
        match timeout(limit, child.wait()).await {
            Ok(status) => Ok(CommandOutcome::Exited(status?)),
            Err(_) => {
                // Expired children must not keep running; kill and reap.
                child.kill().await?;
                let _ = child.wait().await;
                Ok(CommandOutcome::TimedOut)
            }
        }
    }
}
