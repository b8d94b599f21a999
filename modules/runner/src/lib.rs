//! Subprocess execution for external scanning tools: argv-only spawn, new
//! process group, wall-clock deadline, bounded capture, group kill.

pub mod registry;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use recon_core::EngineError;

pub use registry::ToolRegistry;

/// Grace period between SIGTERM and SIGKILL on the process group.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Default cap for each captured stream.
const CAPTURE_CAP: usize = 64 * 1024 * 1024;

/// One planned subprocess execution. argv[0] must already be the absolute
/// binary path from the registry; nothing here goes through a shell.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool: String,
    pub argv: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub cwd: Option<PathBuf>,
    pub deadline: Duration,
}

impl ToolInvocation {
    pub fn new(tool: impl Into<String>, argv: Vec<String>, deadline: Duration) -> Self {
        ToolInvocation {
            tool: tool.into(),
            argv,
            stdin: None,
            cwd: None,
            deadline,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    Deadline,
    Cancelled,
}

impl std::fmt::Display for KillReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillReason::Deadline => f.write_str("deadline"),
            KillReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Outcome of one invocation. A nonzero exit code is data, not an error;
/// the calling stage applies its own exit-code policy.
#[derive(Debug)]
pub struct InvocationResult {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
    pub timed_out: bool,
    pub truncated: bool,
    pub kill_reason: Option<KillReason>,
}

impl InvocationResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    pub fn stdout_utf8(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_utf8(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Spawns tools with a filtered environment and kills the whole process
/// group on deadline or cancellation.
#[derive(Clone)]
pub struct ProcessRunner {
    env_allow: Vec<String>,
    capture_cap: usize,
}

impl ProcessRunner {
    pub fn new(env_allow: Vec<String>) -> Self {
        ProcessRunner {
            env_allow,
            capture_cap: CAPTURE_CAP,
        }
    }

    pub fn with_capture_cap(mut self, cap: usize) -> Self {
        self.capture_cap = cap.max(1);
        self
    }

    pub async fn invoke(
        &self,
        inv: ToolInvocation,
        cancel: &CancellationToken,
    ) -> Result<InvocationResult, EngineError> {
        let argv0 = inv
            .argv
            .first()
            .ok_or_else(|| EngineError::InvalidInvocation("empty argv".into()))?;
        if !Path::new(argv0).is_absolute() {
            return Err(EngineError::InvalidInvocation(format!(
                "argv[0] must be absolute: {argv0}"
            )));
        }

        let mut cmd = Command::new(argv0);
        cmd.args(&inv.argv[1..]);
        cmd.env_clear();
        for key in ["PATH", "HOME"]
            .iter()
            .map(|k| k.to_string())
            .chain(self.env_allow.iter().cloned())
        {
            if let Ok(value) = std::env::var(&key) {
                cmd.env(&key, value);
            }
        }
        if let Some(cwd) = &inv.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(if inv.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        // New session so the child and all its descendants form one group
        // we can signal atomically.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        debug!(tool = %inv.tool, argv = ?inv.argv, "spawning");
        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::Runner(format!("spawn {}: {e}", inv.tool)))?;
        let pid = child.id();

        if let Some(bytes) = inv.stdin.clone() {
            if let Some(mut stdin) = child.stdin.take() {
                // Writer runs concurrently with capture so a large input
                // cannot deadlock against a full output pipe. A tool that
                // exits without reading produces EPIPE; that is the tool's
                // business, not ours.
                tokio::spawn(async move {
                    let _ = stdin.write_all(&bytes).await;
                    let _ = stdin.shutdown().await;
                });
            }
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Runner("stdout pipe missing".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Runner("stderr pipe missing".into()))?;
        let cap = self.capture_cap;
        let out_task = tokio::spawn(read_capped(stdout, cap));
        let err_task = tokio::spawn(read_capped(stderr, cap));

        enum WaitEnd {
            Exited(std::process::ExitStatus),
            Deadline,
            Cancelled,
        }
        let end = {
            let wait = child.wait();
            tokio::pin!(wait);
            tokio::select! {
                status = &mut wait => {
                    WaitEnd::Exited(status.map_err(|e| EngineError::Runner(format!("wait: {e}")))?)
                }
                _ = tokio::time::sleep(inv.deadline) => WaitEnd::Deadline,
                _ = cancel.cancelled() => WaitEnd::Cancelled,
            }
        };
        let mut timed_out = false;
        let mut kill_reason = None;
        let status = match end {
            WaitEnd::Exited(status) => status,
            WaitEnd::Deadline => {
                timed_out = true;
                let reason = KillReason::Deadline;
                warn!(
                    tool = %inv.tool,
                    deadline_secs = inv.deadline.as_secs(),
                    "kill-reason={reason}, killing process group"
                );
                kill_reason = Some(reason);
                kill_group(pid, &mut child).await?
            }
            WaitEnd::Cancelled => {
                let reason = KillReason::Cancelled;
                warn!(tool = %inv.tool, "kill-reason={reason}, killing process group");
                kill_reason = Some(reason);
                kill_group(pid, &mut child).await?
            }
        };

        let (stdout, out_truncated) = out_task
            .await
            .map_err(|e| EngineError::Runner(format!("stdout capture: {e}")))??;
        let (stderr, err_truncated) = err_task
            .await
            .map_err(|e| EngineError::Runner(format!("stderr capture: {e}")))??;

        Ok(InvocationResult {
            exit_code: status.code(),
            stdout,
            stderr,
            duration: start.elapsed(),
            timed_out,
            truncated: out_truncated || err_truncated,
            kill_reason,
        })
    }
}

/// Read a stream into memory up to `cap` bytes; keep draining past the cap
/// so the child never blocks on a full pipe.
async fn read_capped(
    mut reader: impl AsyncReadExt + Unpin,
    cap: usize,
) -> Result<(Vec<u8>, bool), EngineError> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|e| EngineError::Runner(format!("capture read: {e}")))?;
        if n == 0 {
            break;
        }
        if buf.len() < cap {
            let take = n.min(cap - buf.len());
            buf.extend_from_slice(&chunk[..take]);
            if take < n {
                truncated = true;
            }
        } else {
            truncated = true;
        }
    }
    Ok((buf, truncated))
}

/// SIGTERM the group, give it `KILL_GRACE` to exit, then SIGKILL.
async fn kill_group(
    pid: Option<u32>,
    child: &mut Child,
) -> Result<std::process::ExitStatus, EngineError> {
    #[cfg(unix)]
    if let Some(pid) = pid {
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGTERM);
        }
        if let Ok(status) = tokio::time::timeout(KILL_GRACE, child.wait()).await {
            return status.map_err(|e| EngineError::Runner(format!("wait after term: {e}")));
        }
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill().await;
    }
    child
        .wait()
        .await
        .map_err(|e| EngineError::Runner(format!("wait after kill: {e}")))
}

/// Strip CR/LF and other non-printables from values headed into HTTP tool
/// arguments, so crafted inputs cannot smuggle extra headers.
pub fn sanitize_header_value(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() && *c != '\u{7f}')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin(name: &str) -> String {
        ToolRegistry::new(Default::default(), None)
            .locate(name)
            .unwrap_or_else(|| panic!("{name} not on PATH"))
            .to_string_lossy()
            .into_owned()
    }

    fn runner() -> ProcessRunner {
        ProcessRunner::new(Vec::new())
    }

    #[test]
    fn kill_reason_log_tokens() {
        // scan.log greps for these literals, e.g. "kill-reason=deadline".
        assert_eq!(KillReason::Deadline.to_string(), "deadline");
        assert_eq!(KillReason::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn header_sanitizer_strips_crlf() {
        assert_eq!(
            sanitize_header_value("value\r\nX-Injected: 1"),
            "valueX-Injected: 1"
        );
        assert_eq!(sanitize_header_value("plain"), "plain");
        assert_eq!(sanitize_header_value("tab\there"), "tabhere");
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let inv = ToolInvocation::new(
            "echo",
            vec![bin("echo"), "hello".into()],
            Duration::from_secs(5),
        );
        let res = runner().invoke(inv, &CancellationToken::new()).await.unwrap();
        assert_eq!(res.exit_code, Some(0));
        assert_eq!(res.stdout_utf8(), "hello\n");
        assert!(!res.timed_out);
        assert!(res.kill_reason.is_none());
    }

    #[tokio::test]
    async fn relative_argv0_is_rejected_before_spawn() {
        let inv = ToolInvocation::new("echo", vec!["echo".into()], Duration::from_secs(1));
        let err = runner().invoke(inv, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInvocation(_)));
    }

    #[tokio::test]
    async fn nonzero_exit_is_data_not_error() {
        let inv = ToolInvocation::new("false", vec![bin("false")], Duration::from_secs(5));
        let res = runner().invoke(inv, &CancellationToken::new()).await.unwrap();
        assert_eq!(res.exit_code, Some(1));
        assert!(!res.success());
    }

    #[tokio::test]
    async fn stdin_is_delivered() {
        let mut inv = ToolInvocation::new("cat", vec![bin("cat")], Duration::from_secs(5));
        inv.stdin = Some(b"line-in\n".to_vec());
        let res = runner().invoke(inv, &CancellationToken::new()).await.unwrap();
        assert_eq!(res.stdout_utf8(), "line-in\n");
    }

    #[tokio::test]
    async fn deadline_kills_the_sleeper_group() {
        let inv = ToolInvocation::new(
            "sleep",
            vec![bin("sleep"), "60".into()],
            Duration::from_millis(200),
        );
        let start = Instant::now();
        let res = runner().invoke(inv, &CancellationToken::new()).await.unwrap();
        assert!(res.timed_out);
        assert_eq!(res.kill_reason, Some(KillReason::Deadline));
        // deadline + grace, not the sleeper's 60s
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancellation_kills_promptly() {
        let inv = ToolInvocation::new(
            "sleep",
            vec![bin("sleep"), "60".into()],
            Duration::from_secs(120),
        );
        let cancel = CancellationToken::new();
        let killer = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            killer.cancel();
        });
        let start = Instant::now();
        let res = runner().invoke(inv, &cancel).await.unwrap();
        assert_eq!(res.kill_reason, Some(KillReason::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn capture_is_truncated_at_the_cap() {
        let big = "a".repeat(4096);
        let inv = ToolInvocation::new(
            "echo",
            vec![bin("echo"), big],
            Duration::from_secs(5),
        );
        let res = runner()
            .with_capture_cap(1024)
            .invoke(inv, &CancellationToken::new())
            .await
            .unwrap();
        assert!(res.truncated);
        assert_eq!(res.stdout.len(), 1024);
    }

    #[tokio::test]
    async fn ambient_env_is_not_leaked() {
        std::env::set_var("RUNNER_TEST_AMBIENT_SECRET", "leakme");
        let inv = ToolInvocation::new("env", vec![bin("env")], Duration::from_secs(5));
        let res = runner().invoke(inv, &CancellationToken::new()).await.unwrap();
        let out = res.stdout_utf8();
        assert!(!out.contains("RUNNER_TEST_AMBIENT_SECRET"));
        assert!(out.contains("PATH="));
    }
}
