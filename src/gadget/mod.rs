//! Supervised gadget runner.
//!
//! Gadgets are opaque out-of-process executables invoked by name through a
//! shared launcher binary: `<binary> run <name> [args...]`. The runner
//! validates names before anything is spawned, bounds every execution with a
//! wall-clock timeout, captures combined stdout+stderr, and classifies a
//! small set of names as "system" gadgets that require elevated permission.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::audit::{self, AuditRecord};
use crate::config::GadgetConfig;
use crate::{Error, Result};

/// Maximum accepted gadget name length.
const MAX_NAME_LEN: usize = 50;

/// Outcome of a single gadget execution.
#[derive(Debug, Clone, Serialize)]
pub struct GadgetExecution {
    /// Gadget name as invoked
    pub gadget_name: String,
    /// Whether the process exited successfully
    pub success: bool,
    /// Combined stdout+stderr
    pub output: String,
    /// Error detail (spawn failure, timeout, non-zero exit)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Exit code as reported by the host (-1 when unavailable)
    pub exit_code: i32,
}

/// One entry of the gadget catalog.
#[derive(Debug, Clone, Serialize)]
pub struct GadgetInfo {
    /// Gadget name
    pub name: String,
    /// Description as reported by the launcher
    pub description: String,
    /// Whether this gadget is system-classified
    pub system: bool,
}

/// Detailed info for a single gadget, including the raw launcher output
/// (the parsed fields are non-authoritative).
#[derive(Debug, Clone, Serialize)]
pub struct GadgetDetails {
    /// Gadget name
    pub name: String,
    /// First descriptive line of the launcher output
    pub description: String,
    /// Whether this gadget is system-classified
    pub system: bool,
    /// Raw launcher output
    pub raw: String,
}

/// Spawns and supervises gadget subprocesses.
pub struct GadgetRunner {
    binary: PathBuf,
    timeout: Duration,
    system_gadgets: HashSet<String>,
    exec_counter: AtomicU64,
}

impl GadgetRunner {
    /// Create a runner from configuration.
    #[must_use]
    pub fn from_config(config: &GadgetConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            timeout: config.timeout,
            system_gadgets: config.system_gadgets.iter().cloned().collect(),
            exec_counter: AtomicU64::new(0),
        }
    }

    /// Validate a gadget name: 1-50 characters from `[A-Za-z0-9_-]`.
    ///
    /// Runs before any process is spawned.
    ///
    /// # Errors
    ///
    /// `Error::Validation` for any other input.
    pub fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(Error::Validation(format!(
                "gadget name must be 1-{MAX_NAME_LEN} characters"
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::Validation(
                "gadget name may only contain letters, digits, '_' and '-'".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a gadget name is system-classified.
    #[must_use]
    pub fn is_system(&self, name: &str) -> bool {
        self.system_gadgets.contains(name)
    }

    /// Execute a gadget with a bounded wall-clock timeout.
    ///
    /// Process-level failures (non-zero exit, timeout, spawn error) are
    /// reported inside the returned record, not as `Err`; only name
    /// validation fails the call outright.
    ///
    /// # Errors
    ///
    /// `Error::Validation` when the name fails the character/length gate.
    pub async fn execute(
        &self,
        name: &str,
        args: &[String],
        user: &str,
    ) -> Result<GadgetExecution> {
        Self::validate_name(name)?;

        let exec_id = format!("{name}-{}", self.exec_counter.fetch_add(1, Ordering::Relaxed) + 1);
        audit::emit(&AuditRecord::gadget(
            "gadget.start",
            &exec_id,
            user,
            true,
            format!("{} args", args.len()),
        ));
        debug!(exec_id = %exec_id, gadget = %name, args = args.len(), "Executing gadget");

        let start = Instant::now();
        let execution = self.run_process(name, args).await;
        let elapsed = start.elapsed();

        audit::emit(&AuditRecord::gadget(
            "gadget.finish",
            &exec_id,
            user,
            execution.success,
            format!("exit {} in {}ms", execution.exit_code, elapsed.as_millis()),
        ));

        Ok(execution)
    }

    async fn run_process(&self, name: &str, args: &[String]) -> GadgetExecution {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("run")
            .arg(name)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(gadget = %name, error = %e, "Failed to spawn gadget");
                return GadgetExecution {
                    gadget_name: name.to_string(),
                    success: false,
                    output: String::new(),
                    error: Some(format!("failed to spawn: {e}")),
                    exit_code: -1,
                };
            }
        };

        // On timeout the future owning the child is dropped and
        // kill_on_drop signals the process.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                let exit_code = output.status.code().unwrap_or(-1);
                let success = output.status.success();
                GadgetExecution {
                    gadget_name: name.to_string(),
                    success,
                    output: combined,
                    error: (!success).then(|| format!("exited with code {exit_code}")),
                    exit_code,
                }
            }
            Ok(Err(e)) => GadgetExecution {
                gadget_name: name.to_string(),
                success: false,
                output: String::new(),
                error: Some(format!("wait failed: {e}")),
                exit_code: -1,
            },
            Err(_) => GadgetExecution {
                gadget_name: name.to_string(),
                success: false,
                output: String::new(),
                error: Some(format!("timed out after {}s", self.timeout.as_secs())),
                exit_code: -1,
            },
        }
    }

    /// List available gadgets by invoking `<binary> list`.
    ///
    /// # Errors
    ///
    /// Fails when the launcher cannot be invoked or exits non-zero.
    pub async fn list(&self) -> Result<Vec<GadgetInfo>> {
        let output = self.launcher_output(&["list"]).await?;
        Ok(self.parse_list(&output))
    }

    /// Fetch details for one gadget by invoking `<binary> info <name>`.
    ///
    /// # Errors
    ///
    /// Fails on name validation or when the launcher cannot be invoked.
    pub async fn info(&self, name: &str) -> Result<GadgetDetails> {
        Self::validate_name(name)?;
        let raw = self.launcher_output(&["info", name]).await?;
        let description = raw
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string();
        Ok(GadgetDetails {
            name: name.to_string(),
            description,
            system: self.is_system(name),
            raw,
        })
    }

    async fn launcher_output(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| Error::Gadget(format!("failed to invoke launcher: {e}")))?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Gadget("launcher timed out".to_string()))?
            .map_err(|e| Error::Gadget(format!("launcher wait failed: {e}")))?;

        if !output.status.success() {
            return Err(Error::Gadget(format!(
                "launcher exited with code {}",
                output.status.code().unwrap_or(-1)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Parse `list` output. Deliberately permissive: accepts
    /// `name - description`, `name: description` and bare-name lines, skips
    /// anything that does not start with a valid gadget name.
    fn parse_list(&self, output: &str) -> Vec<GadgetInfo> {
        let mut gadgets = Vec::new();
        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, description) = match line.split_once(" - ").or_else(|| line.split_once(": "))
            {
                Some((name, description)) => (name.trim(), description.trim()),
                None => (line.split_whitespace().next().unwrap_or(""), ""),
            };
            if Self::validate_name(name).is_err() {
                debug!(line = %line, "Skipping unparseable gadget list line");
                continue;
            }
            gadgets.push(GadgetInfo {
                name: name.to_string(),
                description: description.to_string(),
                system: self.is_system(name),
            });
        }
        gadgets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> GadgetRunner {
        GadgetRunner::from_config(&GadgetConfig::default())
    }

    // ── name validation ───────────────────────────────────────────────

    #[test]
    fn name_boundaries() {
        assert!(GadgetRunner::validate_name("a").is_ok());
        assert!(GadgetRunner::validate_name(&"a".repeat(50)).is_ok());
        assert!(GadgetRunner::validate_name("").is_err());
        assert!(GadgetRunner::validate_name(&"a".repeat(51)).is_err());
    }

    #[test]
    fn name_character_set() {
        assert!(GadgetRunner::validate_name("echo_2-test").is_ok());
        assert!(GadgetRunner::validate_name("rm -rf").is_err());
        assert!(GadgetRunner::validate_name("../escape").is_err());
        assert!(GadgetRunner::validate_name("name;ls").is_err());
        assert!(GadgetRunner::validate_name("uni\u{00e9}").is_err());
    }

    #[test]
    fn system_classification_uses_configured_set() {
        let runner = runner();
        assert!(runner.is_system("sysinfo"));
        assert!(runner.is_system("network-scanner"));
        assert!(runner.is_system("process"));
        assert!(runner.is_system("hardware"));
        assert!(!runner.is_system("echo"));
    }

    // ── list parser ───────────────────────────────────────────────────

    #[test]
    fn parse_list_accepts_mixed_formats() {
        let runner = runner();
        let output = "\
# available gadgets
echo - echoes its arguments
sysinfo: system information
weather
not a gadget line!!
";
        let gadgets = runner.parse_list(output);
        let names: Vec<&str> = gadgets.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "sysinfo", "weather"]);
        assert_eq!(gadgets[0].description, "echoes its arguments");
        assert!(gadgets[1].system);
        assert!(!gadgets[0].system);
    }

    #[test]
    fn parse_list_of_empty_output() {
        assert!(runner().parse_list("").is_empty());
        assert!(runner().parse_list("\n\n# none\n").is_empty());
    }

    // ── execution ─────────────────────────────────────────────────────

    #[cfg(unix)]
    fn stub_launcher(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("gadget-stub");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn runner_with(binary: PathBuf, timeout: Duration) -> GadgetRunner {
        GadgetRunner::from_config(&GadgetConfig {
            binary,
            timeout,
            ..GadgetConfig::default()
        })
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_captures_output_and_exit_code() {
        // GIVEN: a stub launcher that echoes its gadget arguments
        let dir = tempfile::tempdir().unwrap();
        let binary = stub_launcher(dir.path(), r#"shift; shift; echo "$@""#);
        let runner = runner_with(binary, Duration::from_secs(5));

        // WHEN: a gadget runs
        let result = runner
            .execute("echo", &["hi".to_string(), "there".to_string()], "alice")
            .await
            .unwrap();

        // THEN: output and status are captured
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("hi there"));
        assert!(result.error.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_reports_nonzero_exit_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let binary = stub_launcher(dir.path(), "echo broken >&2; exit 3");
        let runner = runner_with(binary, Duration::from_secs(5));

        let result = runner.execute("echo", &[], "alice").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
        assert!(result.output.contains("broken"));
        assert!(result.error.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_times_out_and_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let binary = stub_launcher(dir.path(), "sleep 10");
        let runner = runner_with(binary, Duration::from_millis(200));

        let result = runner.execute("echo", &[], "alice").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert!(result.error.as_deref().unwrap_or_default().contains("timed out"));
    }

    #[tokio::test]
    async fn execute_rejects_bad_name_before_spawning() {
        let runner = runner_with_missing_binary();
        let err = runner.execute("bad name", &[], "alice").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn missing_binary_is_a_failed_execution() {
        let runner = runner_with_missing_binary();
        let result = runner.execute("echo", &[], "alice").await.unwrap();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap_or_default().contains("spawn"));
    }

    fn runner_with_missing_binary() -> GadgetRunner {
        GadgetRunner::from_config(&GadgetConfig {
            binary: PathBuf::from("/nonexistent/gadget-binary"),
            ..GadgetConfig::default()
        })
    }
}
