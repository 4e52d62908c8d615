//! Stdio transport (subprocess peers)
//!
//! Frames are newline-delimited JSON on the child's stdin/stdout. Closing is
//! staged: write EOF on stdin, wait up to 5 seconds for a clean exit, send a
//! terminate signal, wait another 2 seconds, then kill. Process death is
//! observed by the reader hitting EOF, which flips the connected flag.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::Transport;
use crate::protocol::JsonRpcMessage;
use crate::{Error, Result};

/// How long to wait for a clean exit after closing stdin.
const EOF_GRACE: Duration = Duration::from_secs(5);
/// How long to wait after the terminate signal before killing.
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Stdio transport for subprocess MCP peers
pub struct StdioTransport {
    child: Mutex<Option<Child>>,
    writer: Mutex<Option<ChildStdin>>,
    reader: Mutex<Lines<BufReader<ChildStdout>>>,
    connected: AtomicBool,
    command: String,
}

impl StdioTransport {
    /// Spawn the child process and wire its stdio.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is empty, cannot be spawned, or its
    /// stdio handles cannot be captured.
    pub fn spawn(
        command: &str,
        env: &HashMap<String, String>,
        cwd: Option<&str>,
    ) -> Result<Arc<Self>> {
        let parts: Vec<&str> = command.split_whitespace().collect();
        let Some((program, args)) = parts.split_first() else {
            return Err(Error::Config("Empty peer command".to_string()));
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Transport(format!("Failed to spawn: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("Failed to get stdout".to_string()))?;

        debug!(command = %command, "Spawned stdio peer");

        Ok(Arc::new(Self {
            child: Mutex::new(Some(child)),
            writer: Mutex::new(Some(stdin)),
            reader: Mutex::new(BufReader::new(stdout).lines()),
            connected: AtomicBool::new(true),
            command: command.to_string(),
        }))
    }

    /// Terminate the child: wait after EOF, signal, wait, kill.
    async fn shutdown_child(&self, mut child: Child) {
        if let Ok(status) = tokio::time::timeout(EOF_GRACE, child.wait()).await {
            debug!(command = %self.command, status = ?status.ok(), "Peer exited on EOF");
            return;
        }

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            #[allow(clippy::cast_possible_wrap)]
            let pid = nix::unistd::Pid::from_raw(pid as i32);
            if let Err(e) = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM) {
                warn!(command = %self.command, error = %e, "Failed to signal peer");
            }
            if let Ok(status) = tokio::time::timeout(TERM_GRACE, child.wait()).await {
                debug!(command = %self.command, status = ?status.ok(), "Peer exited on SIGTERM");
                return;
            }
        }

        warn!(command = %self.command, "Peer ignored shutdown - killing");
        if let Err(e) = child.kill().await {
            warn!(command = %self.command, error = %e, "Failed to kill peer");
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: &JsonRpcMessage) -> Result<()> {
        let line = serde_json::to_string(message)?;
        let mut writer = self.writer.lock().await;
        let Some(stdin) = writer.as_mut() else {
            return Err(Error::Transport("Not connected".to_string()));
        };
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(())
    }

    async fn receive(&self) -> Result<JsonRpcMessage> {
        let mut reader = self.reader.lock().await;
        match reader.next_line().await {
            Ok(Some(line)) => Ok(serde_json::from_str(&line)?),
            Ok(None) => {
                self.connected.store(false, Ordering::Relaxed);
                Err(Error::Transport("Peer stdout closed".to_string()))
            }
            Err(e) => {
                self.connected.store(false, Ordering::Relaxed);
                Err(Error::Transport(format!("Read failed: {e}")))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);

        // Dropping stdin writes EOF
        drop(self.writer.lock().await.take());

        if let Some(child) = self.child.lock().await.take() {
            self.shutdown_child(child).await;
        }
        Ok(())
    }
}
