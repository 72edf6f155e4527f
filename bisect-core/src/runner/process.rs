//! Real subprocess execution on tokio.

use super::{CommandOutput, CommandRunner, CommandSpec, ExitStatus};
use crate::error::{BisectError, BisectResult};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::task::JoinHandle;

/// How long to wait for pipe readers once the process has exited.
/// Descendants that left the process group can keep the pipes open
/// indefinitely.
const READER_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8192;

/// Runs commands as real child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

/// Pipe reader whose bytes survive an abort
struct PipeReader {
    captured: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl PipeReader {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        let handle = tokio::spawn(async move {
            let Some(mut pipe) = pipe else {
                return;
            };
            let mut chunk = vec![0u8; READ_CHUNK];
            loop {
                match pipe.read(&mut chunk).await {
                    // A read error just truncates the capture
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut buf) = sink.lock() {
                            buf.extend_from_slice(&chunk[..n]);
                        }
                    }
                }
            }
        });
        Self { captured, handle }
    }

    /// Wait up to `grace` for EOF, then return everything read so far
    async fn finish(self, grace: Duration) -> String {
        let abort = self.handle.abort_handle();
        if tokio::time::timeout(grace, self.handle).await.is_err() {
            abort.abort();
        }
        let bytes = self
            .captured
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Kill the child's whole process group, then the child itself
async fn terminate(child: &mut Child, program: &str) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        // The child leads its own group (`process_group(0)`), so its pid
        // is the group id.
        if let Some(pid) = child.id() {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                tracing::debug!(program, error = %e, "Failed to signal process group");
            }
        }
    }
    if let Err(e) = child.kill().await {
        tracing::warn!(program, error = %e, "Failed to kill timed-out process");
    }
}

fn convert_status(status: std::process::ExitStatus) -> ExitStatus {
    if let Some(code) = status.code() {
        return ExitStatus::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitStatus::Signaled(signal);
        }
    }
    ExitStatus::Signaled(-1)
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> BisectResult<CommandOutput> {
        let start = Instant::now();

        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        // Own process group, so a timeout can kill the child together with
        // everything it spawned.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| BisectError::spawn(&spec.program, e.to_string()))?;

        let stdout = PipeReader::spawn(child.stdout.take());
        let stderr = PipeReader::spawn(child.stderr.take());

        let waited = match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };

        match waited {
            Some(Ok(status)) => Ok(CommandOutput {
                status: convert_status(status),
                stdout: stdout.finish(READER_GRACE).await,
                stderr: stderr.finish(READER_GRACE).await,
                duration: start.elapsed(),
            }),
            Some(Err(e)) => Err(BisectError::spawn(
                &spec.program,
                format!("failed waiting for process: {e}"),
            )),
            None => {
                terminate(&mut child, &spec.program).await;
                tracing::debug!(
                    command = %spec.display(),
                    timeout_secs = spec.timeout.map(|t| t.as_secs_f64()),
                    "Command timed out"
                );
                Ok(CommandOutput {
                    status: ExitStatus::TimedOut,
                    stdout: stdout.finish(READER_GRACE).await,
                    stderr: stderr.finish(READER_GRACE).await,
                    duration: start.elapsed(),
                })
            }
        }
    }
}
