//! Debug adapter process management
//!
//! The adapter is spawned listening on a local TCP port. Readiness is detected by a
//! line on its stdout matching a configurable pattern; only then is the connection
//! attempted. Stderr is inherited so adapter diagnostics land next to ours.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dap::TransportChannel;
use crate::error::{DebugError, Result};

/// A connected adapter: the wire to it and, when we spawned it, its process.
pub struct AdapterConnection {
    pub channel: TransportChannel,
    pub process: Option<AdapterProcess>,
}

/// Starts a debug adapter and connects to it.
#[async_trait]
pub trait AdapterLauncher: Send + Sync {
    async fn launch(&self, port: u16) -> Result<AdapterConnection>;
}

/// Owned adapter child process (killed on drop).
pub struct AdapterProcess {
    child: Child,
}

impl AdapterProcess {
    pub fn new(child: Child) -> Self {
        Self { child }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Kill the adapter. A process that already exited is not an error.
    pub async fn kill(&mut self) {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!("Debug adapter already exited ({})", status);
                return;
            }
            Ok(None) => {}
            Err(e) => warn!("Could not query debug adapter status: {}", e),
        }

        match self.child.kill().await {
            Ok(()) => info!("Debug adapter process killed"),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
                debug!("Debug adapter exited before kill: {}", e);
            }
            Err(e) => warn!("Failed to kill debug adapter: {}", e),
        }
    }
}

/// Launches `dlv dap --listen 127.0.0.1:<port>`.
pub struct DelveLauncher {
    dlv_path: PathBuf,
    extra_args: Vec<String>,
    readiness: Regex,
    readiness_timeout: Duration,
    connect_timeout: Duration,
}

impl DelveLauncher {
    pub fn new(
        dlv_path: PathBuf,
        extra_args: Vec<String>,
        readiness_pattern: &str,
        readiness_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let readiness = Regex::new(readiness_pattern).map_err(|e| {
            DebugError::InvalidConfig(format!("Invalid readiness pattern '{}': {}", readiness_pattern, e))
        })?;
        Ok(Self {
            dlv_path,
            extra_args,
            readiness,
            readiness_timeout,
            connect_timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let dlv_path = config.find_dlv()?;
        Self::new(
            dlv_path,
            config.adapter.extra_args.clone(),
            &config.adapter.readiness_pattern,
            Duration::from_secs(config.adapter.readiness_timeout_secs),
            Duration::from_millis(config.adapter.connect_timeout_ms),
        )
    }
}

#[async_trait]
impl AdapterLauncher for DelveLauncher {
    async fn launch(&self, port: u16) -> Result<AdapterConnection> {
        let endpoint = format!("127.0.0.1:{}", port);
        info!("Starting debug adapter: {} dap --listen {}", self.dlv_path.display(), endpoint);

        let mut cmd = Command::new(&self.dlv_path);
        cmd.arg("dap")
            .arg("--listen")
            .arg(&endpoint)
            .args(&self.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            DebugError::LaunchFailed(format!("Failed to spawn {}: {}", self.dlv_path.display(), e))
        })?;
        let mut process = AdapterProcess::new(child);

        let stdout = process
            .child
            .stdout
            .take()
            .ok_or_else(|| DebugError::LaunchFailed("adapter stdout not captured".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let ready = tokio::time::timeout(
            self.readiness_timeout,
            wait_for_readiness(&mut lines, &self.readiness),
        )
        .await;
        match ready {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                process.kill().await;
                return Err(e);
            }
            Err(_) => {
                process.kill().await;
                return Err(DebugError::LaunchFailed(format!(
                    "adapter did not report readiness within {:?}",
                    self.readiness_timeout
                )));
            }
        }

        tokio::spawn(drain_stdout(lines));

        match TransportChannel::connect(&endpoint, self.connect_timeout).await {
            Ok(channel) => {
                info!("Debug adapter ready (pid {:?}) at {}", process.id(), endpoint);
                Ok(AdapterConnection { channel, process: Some(process) })
            }
            Err(e) => {
                process.kill().await;
                Err(e.into())
            }
        }
    }
}

/// Read adapter output until a line matches `pattern`.
async fn wait_for_readiness<R>(lines: &mut Lines<R>, pattern: &Regex) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    while let Some(line) = lines.next_line().await? {
        debug!("adapter: {}", line);
        if pattern.is_match(&line) {
            return Ok(());
        }
    }
    Err(DebugError::LaunchFailed(
        "adapter exited before reporting readiness".to_string(),
    ))
}

/// Keep the stdout pipe drained so the adapter never blocks on a full pipe.
async fn drain_stdout(mut lines: Lines<BufReader<ChildStdout>>) {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!("adapter: {}", line),
            Ok(None) => break,
            Err(e) => {
                debug!("adapter stdout closed: {}", e);
                break;
            }
        }
    }
}
