use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::schema::{Property, Schema};
use crate::tool::{Tool, ToolError};

pub const DEFAULT_BASH_TIMEOUT: Duration = Duration::from_millis(120_000);
pub const MAX_BASH_TIMEOUT: Duration = Duration::from_millis(600_000);
const TERMINATE_GRACE: Duration = Duration::from_secs(5);
const PIPE_GRACE: Duration = Duration::from_secs(1);
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

const DESCRIPTION: &str = "Executes a bash command in the working directory and returns its output.\n\
- `timeout` is in milliseconds (default 120000, max 600000).\n\
- Prefer the Read, Write, Edit and glob tools for file operations.\n\
- Chain dependent commands with '&&' in a single call.";

#[derive(Debug, Deserialize)]
pub struct BashArgs {
    pub command: String,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BashOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub interrupted: bool,
}

#[derive(Debug, Clone)]
pub struct BashTool {
    cwd: PathBuf,
    default_timeout: Duration,
}

impl BashTool {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            default_timeout: DEFAULT_BASH_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout.min(MAX_BASH_TIMEOUT);
        self
    }

    fn effective_timeout(&self, requested_ms: Option<u64>) -> Duration {
        requested_ms
            .filter(|ms| *ms > 0)
            .map_or(self.default_timeout, Duration::from_millis)
            .min(MAX_BASH_TIMEOUT)
    }
}

#[async_trait]
impl Tool for BashTool {
    type Args = BashArgs;
    type Output = BashOutput;

    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn schema(&self) -> Schema {
        Schema::object([
            Property::required("command", Schema::string().describe("The command to execute")),
            Property::optional(
                "timeout",
                Schema::integer_at_least(0).describe("Optional timeout in milliseconds (max 600000)"),
            ),
            Property::optional(
                "description",
                Schema::string().describe("What this command does in 5-10 words, in active voice"),
            ),
        ])
    }

    async fn execute(&self, args: BashArgs) -> Result<BashOutput, ToolError> {
        let timeout = self.effective_timeout(args.timeout);
        let mut command = Command::new("/bin/bash");
        command
            .arg("-c")
            .arg(&args.command)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|error| ToolError::failed(format!("Failed to execute command: {error}")))?;
        let mut group = ProcessGroup::of(&child);
        let mut stdout = tokio::spawn(read_pipe(child.stdout.take()));
        let mut stderr = tokio::spawn(read_pipe(child.stderr.take()));

        // Background jobs keep the pipes open after bash exits, so the
        // deadline covers draining them too.
        let finished = tokio::time::timeout(timeout, async {
            let status = child.wait().await;
            let (stdout, stderr) = tokio::join!(&mut stdout, &mut stderr);
            (status, stdout.unwrap_or_default(), stderr.unwrap_or_default())
        })
        .await;

        let (status, stdout, stderr, interrupted) = match finished {
            Ok((status, stdout, stderr)) => (status, stdout, stderr, false),
            Err(_) => {
                tracing::warn!(command = %args.command, timeout_ms = timeout.as_millis() as u64, "bash command timed out");
                let status = group.terminate(&mut child).await;
                (status, drain(stdout).await, drain(stderr).await, true)
            }
        };
        group.disarm();
        let status =
            status.map_err(|error| ToolError::failed(format!("Failed to execute command: {error}")))?;

        Ok(BashOutput {
            stdout: stdout.trim_end().to_owned(),
            stderr: stderr.trim_end().to_owned(),
            exit_code: status.code().unwrap_or(-1),
            interrupted,
        })
    }

    fn to_llm(&self, output: &BashOutput) -> Result<String, ToolError> {
        let mut parts: Vec<String> = Vec::new();
        if !output.stdout.is_empty() {
            parts.push(output.stdout.clone());
        }
        if !output.stderr.is_empty() {
            parts.push(output.stderr.clone());
        }
        if output.exit_code != 0 {
            parts.push(format!("Exit code: {}", output.exit_code));
        }
        if output.interrupted {
            parts.push("<error>Command was interrupted due to timeout</error>".to_owned());
        }

        let rendered = parts.join("\n\n");
        if output.exit_code != 0 || output.interrupted {
            return Err(ToolError::Failed(rendered));
        }
        Ok(rendered)
    }

    fn title(&self, args: &BashArgs) -> String {
        match args.description.as_deref().filter(|text| !text.trim().is_empty()) {
            Some(description) => format!("Run command: {} ({description})", args.command),
            None => format!("Run command: {}", args.command),
        }
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut bytes = Vec::new();
    let _ = pipe.read_to_end(&mut bytes).await;
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Collects what a reader already has once the group is gone, giving up on
/// pipes still held open by a process that left the group.
async fn drain(mut reader: JoinHandle<String>) -> String {
    match tokio::time::timeout(PIPE_GRACE, &mut reader).await {
        Ok(output) => output.unwrap_or_default(),
        Err(_) => {
            reader.abort();
            String::new()
        }
    }
}

/// The process group a command runs in. Every process the command starts
/// is killed if the group is dropped while still armed, which happens when
/// the calling future is abandoned mid-run.
#[derive(Debug)]
struct ProcessGroup {
    pgid: Option<libc::pid_t>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self {
            pgid: child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()),
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }

    /// SIGTERM to the whole group, then SIGKILL once the grace period
    /// lapses. Runs even if bash itself has already exited.
    async fn terminate(&self, child: &mut Child) -> std::io::Result<ExitStatus> {
        self.signal(libc::SIGTERM);
        let graceful = tokio::time::timeout(TERMINATE_GRACE, async {
            let status = child.wait().await;
            while self.is_alive() {
                tokio::time::sleep(GROUP_POLL_INTERVAL).await;
            }
            status
        })
        .await;
        match graceful {
            Ok(status) => status,
            Err(_) => {
                self.signal(libc::SIGKILL);
                let _ = child.start_kill();
                child.wait().await
            }
        }
    }

    #[cfg(unix)]
    fn signal(&self, signal: libc::c_int) -> bool {
        let Some(pgid) = self.pgid else {
            return false;
        };
        // SAFETY: `kill` has no memory-safety preconditions; a negative pid
        // addresses the process group created for this child.
        unsafe { libc::kill(-pgid, signal) == 0 }
    }

    #[cfg(not(unix))]
    fn signal(&self, _signal: libc::c_int) -> bool {
        false
    }

    fn is_alive(&self) -> bool {
        self.signal(0)
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if self.pgid.is_some() {
            self.signal(libc::SIGKILL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_defaults_and_caps() {
        let tool = BashTool::new(".");
        assert_eq!(tool.effective_timeout(None), DEFAULT_BASH_TIMEOUT);
        assert_eq!(tool.effective_timeout(Some(0)), DEFAULT_BASH_TIMEOUT);
        assert_eq!(tool.effective_timeout(Some(1_500)), Duration::from_millis(1_500));
        assert_eq!(tool.effective_timeout(Some(10_000_000)), MAX_BASH_TIMEOUT);
    }

    #[test]
    fn rendering_fails_on_nonzero_exit() {
        let tool = BashTool::new(".");
        let ok = BashOutput {
            stdout: "out".into(),
            stderr: String::new(),
            exit_code: 0,
            interrupted: false,
        };
        assert_eq!(tool.to_llm(&ok).expect("success"), "out");

        let failed = BashOutput {
            stdout: String::new(),
            stderr: "boom".into(),
            exit_code: 2,
            interrupted: false,
        };
        let error = tool.to_llm(&failed).expect_err("non-zero exit");
        assert_eq!(error.to_string(), "boom\n\nExit code: 2");
    }
}
