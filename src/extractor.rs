#![forbid(unsafe_code)]

//! Process invoker for the external extractor (`yt-dlp`).
//!
//! Every call spawns one child process, waits for it under a hard time bound
//! and hands back the trimmed stdout. Retries are not attempted here; the
//! query layer decides what to try next when an invocation fails.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    task::JoinHandle,
};
use tracing::{debug, error};

pub const DEFAULT_PROGRAM: &str = "yt-dlp";

const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a single extractor invocation did not produce output.
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("`{command}` timed out after {limit:?}")]
    Timeout { command: String, limit: Duration },

    #[error("`{command}` exited with {status}: {stderr}")]
    Execution {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("could not launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Seam between the query operations and the OS process that backs them.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the extractor with `args` and returns its trimmed stdout.
    async fn run(&self, args: &[String], limit: Duration) -> Result<String, ExtractorError>;
}

/// Runs the real `yt-dlp` binary (or whatever `program` points at).
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Asks the extractor for its version; used at startup to warn early when
    /// the tool is missing from `PATH`.
    pub async fn version(&self) -> Result<String, ExtractorError> {
        self.run(&["--version".to_string()], VERSION_TIMEOUT).await
    }

    fn command_line(&self, args: &[String]) -> String {
        let mut rendered = self.program.display().to_string();
        for arg in args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }
}

#[async_trait]
impl CommandRunner for YtDlp {
    async fn run(&self, args: &[String], limit: Duration) -> Result<String, ExtractorError> {
        let command = self.command_line(args);
        debug!(command = %command, timeout = ?limit, "running extractor");

        let mut child = match Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                error!(command = %command, error = %source, "failed to launch extractor");
                return Err(ExtractorError::Spawn { command, source });
            }
        };

        // Pipes are drained concurrently so a chatty child cannot block on a
        // full pipe buffer while we wait for it to exit.
        let mut stdout = drain(child.stdout.take());
        let mut stderr = drain(child.stderr.take());

        // The deadline covers collecting output too: a grandchild holding the
        // pipes open must not stretch the call past `limit`.
        let finished = tokio::time::timeout(limit, async {
            let status = child.wait().await?;
            let stdout = (&mut stdout).await.unwrap_or_default();
            let stderr = (&mut stderr).await.unwrap_or_default();
            Ok::<_, std::io::Error>((status, stdout, stderr))
        })
        .await;

        let (status, stdout, stderr) = match finished {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                stdout.abort();
                stderr.abort();
                error!(command = %command, error = %source, "failed to wait for extractor");
                return Err(ExtractorError::Spawn { command, source });
            }
            Err(_) => {
                if let Err(err) = child.start_kill() {
                    debug!(command = %command, error = %err, "extractor already gone");
                }
                // Reap the killed child so it does not linger as a zombie.
                let _ = child.wait().await;
                stdout.abort();
                stderr.abort();
                error!(command = %command, timeout = ?limit, "extractor timed out");
                return Err(ExtractorError::Timeout { command, limit });
            }
        };

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
            error!(command = %command, status = %status, stderr = %stderr, "extractor failed");
            return Err(ExtractorError::Execution {
                command,
                status: status.to_string(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}

fn drain<R>(reader: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Some(mut reader) = reader {
            // A read error only truncates what we captured.
            let _ = reader.read_to_end(&mut buffer).await;
        }
        buffer
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Instant;
    use tempfile::tempdir;

    fn install_stub(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("yt-dlp");
        fs::write(&path, format!("#!/usr/bin/env bash\nset -eu\n{body}\n")).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[tokio::test]
    async fn run_returns_trimmed_stdout() {
        let dir = tempdir().unwrap();
        let stub = install_stub(dir.path(), r#"echo "   got $1   ""#);
        let output = YtDlp::new(stub)
            .run(&args(&["--dump-json"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output, "got --dump-json");
    }

    #[tokio::test]
    async fn run_reports_exit_status_and_stderr() {
        let dir = tempdir().unwrap();
        let stub = install_stub(dir.path(), "echo 'ERROR: video unavailable' >&2\nexit 3");
        let err = YtDlp::new(stub)
            .run(&args(&["--dump-json", "abc"]), Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            ExtractorError::Execution {
                command, stderr, ..
            } => {
                assert!(command.ends_with("--dump-json abc"));
                assert_eq!(stderr, "ERROR: video unavailable");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    fn process_exists(pid: i32) -> bool {
        kill(Pid::from_raw(pid), None).is_ok()
    }

    #[tokio::test]
    async fn run_kills_process_after_timeout() {
        let dir = tempdir().unwrap();
        let pidfile = dir.path().join("extractor.pid");
        let stub = install_stub(
            dir.path(),
            &format!("echo $$ > '{}'\nexec sleep 10", pidfile.display()),
        );
        let started = Instant::now();
        let err = YtDlp::new(stub)
            .run(&args(&["--flat-playlist"]), Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractorError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));

        let pid: i32 = fs::read_to_string(&pidfile).unwrap().trim().parse().unwrap();
        assert!(!process_exists(pid), "extractor {pid} survived the timeout");
    }

    #[tokio::test]
    async fn run_deadline_covers_output_held_by_grandchild() {
        let dir = tempdir().unwrap();
        let stub = install_stub(dir.path(), "sleep 10 &\necho partial");
        let started = Instant::now();
        let err = YtDlp::new(stub)
            .run(&args(&["--dump-json"]), Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractorError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn run_reports_missing_program() {
        let dir = tempdir().unwrap();
        let err = YtDlp::new(dir.path().join("not-installed"))
            .run(&args(&["--version"]), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractorError::Spawn { .. }));
    }

    #[tokio::test]
    async fn version_probe_uses_version_flag() {
        let dir = tempdir().unwrap();
        let stub = install_stub(
            dir.path(),
            r#"if [[ "$1" == "--version" ]]; then echo "2024.08.06"; else exit 1; fi"#,
        );
        assert_eq!(YtDlp::new(stub).version().await.unwrap(), "2024.08.06");
    }
}
