use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// A running external player process.
#[async_trait]
pub trait PlayerHandle: Send {
    /// Block until the process exits, returning its exit code when the
    /// platform reports one.
    async fn wait(&mut self) -> Result<Option<i32>>;

    /// Two-phase stop: graceful terminate, grace period, force kill,
    /// bounded wait for exit confirmation. Never blocks indefinitely.
    async fn stop(&mut self) -> Result<()>;
}

/// Seam between the supervisor and real subprocesses, so the state
/// machine is testable without spawning players.
#[async_trait]
pub trait PlayerLauncher: Send + Sync {
    async fn launch(&self, command: &[String]) -> Result<Box<dyn PlayerHandle>>;
}

/// Launches external players as children in their own process group, so
/// the player and any children it forks can be terminated together.
pub struct ProcessLauncher {
    stop_grace: Duration,
    stop_kill_wait: Duration,
}

impl ProcessLauncher {
    pub fn new(stop_grace: Duration, stop_kill_wait: Duration) -> Self {
        Self {
            stop_grace,
            stop_kill_wait,
        }
    }
}

#[async_trait]
impl PlayerLauncher for ProcessLauncher {
    async fn launch(&self, command: &[String]) -> Result<Box<dyn PlayerHandle>> {
        let (program, args) = command
            .split_first()
            .context("Player command is empty")?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to launch player: {}", program))?;

        info!(
            "Launched player: {} (pid {:?})",
            command.join(" "),
            child.id()
        );

        Ok(Box::new(ProcessHandle {
            pgid: child.id().map(|p| p as i32),
            child,
            stop_grace: self.stop_grace,
            stop_kill_wait: self.stop_kill_wait,
        }))
    }
}

struct ProcessHandle {
    child: Child,
    /// Process-group id; the child is its own group leader.
    pgid: Option<i32>,
    stop_grace: Duration,
    stop_kill_wait: Duration,
}

#[cfg(unix)]
fn signal_group(pgid: i32, signal: i32) {
    unsafe {
        libc::killpg(pgid, signal);
    }
}

#[async_trait]
impl PlayerHandle for ProcessHandle {
    async fn wait(&mut self) -> Result<Option<i32>> {
        let status = self
            .child
            .wait()
            .await
            .context("Failed to wait for player process")?;
        Ok(status.code())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!("Player already exited with {:?}", status.code());
            return Ok(());
        }

        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            debug!("Sending SIGTERM to player process group {}", pgid);
            signal_group(pgid, libc::SIGTERM);
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }

        if timeout(self.stop_grace, self.child.wait()).await.is_ok() {
            debug!("Player exited within the grace period");
            return Ok(());
        }

        warn!("Player did not exit after SIGTERM, force killing");
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            signal_group(pgid, libc::SIGKILL);
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }

        // The wait after SIGKILL is bounded so the supervisor stays live
        // even if the player hangs unkillably.
        match timeout(self.stop_kill_wait, self.child.wait()).await {
            Ok(_) => Ok(()),
            Err(_) => {
                error!("Player process did not exit after SIGKILL");
                Ok(())
            }
        }
    }
}
