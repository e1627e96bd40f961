//! Helpers for running child processes with an optional timeout.

use std::io::{ErrorKind, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or `None` if the child was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
    /// Time from spawn until the child was reaped.
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Stderr if present, else stdout, trimmed. Used for tool diagnostics.
    pub fn diagnostics(&self) -> String {
        let stderr = self.stderr_lossy();
        if stderr.trim().is_empty() {
            self.stdout_lossy().trim().to_string()
        } else {
            stderr.trim().to_string()
        }
    }
}

/// How long to keep draining output after a timed-out child was killed.
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Run a command and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is drained on reader threads while the child runs. With
/// `timeout = None` the call blocks until the child exits and both streams
/// close. Otherwise the child runs in its own process group, the whole group
/// is killed once the timeout elapses, and `timed_out` is set. After a kill,
/// output still held open by an escaped descendant is collected for at most
/// [`KILL_GRACE`].
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_secs = timeout.map(|t| t.as_secs_f64())))]
pub fn run_command(mut cmd: Command, timeout: Option<Duration>) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    if timeout.is_some() {
        std::os::unix::process::CommandExt::process_group(&mut cmd, 0);
    }

    debug!("spawning child process");
    let start = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout = Capture::spawn(stdout);
    let stderr = Capture::spawn(stderr);

    let (status, timed_out) = wait_child(&mut child, timeout)?;
    let elapsed = start.elapsed();

    let deadline = timed_out.then(|| Instant::now() + KILL_GRACE);
    let stdout = stdout.finish(deadline).context("collect stdout")?;
    let stderr = stderr.finish(deadline).context("collect stderr")?;

    debug!(exit_code = ?status.code(), timed_out, elapsed_ms = elapsed.as_millis() as u64, "command finished");
    Ok(CommandOutput {
        exit_code: if timed_out { None } else { status.code() },
        stdout,
        stderr,
        timed_out,
        elapsed,
    })
}

fn wait_child(child: &mut Child, timeout: Option<Duration>) -> Result<(ExitStatus, bool)> {
    let Some(timeout) = timeout else {
        return Ok((child.wait().context("wait for command")?, false));
    };
    match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => Ok((status, false)),
        None => {
            warn!(
                timeout_secs = timeout.as_secs_f64(),
                "command timed out, killing"
            );
            kill_group(child)?;
            Ok((child.wait().context("wait command after kill")?, true))
        }
    }
}

/// Kill the child's process group, falling back to the child alone.
fn kill_group(child: &mut Child) -> Result<()> {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let killed = Command::new("kill")
            .args(["-s", "KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match killed {
            Ok(status) if status.success() => return Ok(()),
            Ok(status) => warn!(%status, "process group kill failed, killing child only"),
            Err(err) => warn!(err = %err, "process group kill failed, killing child only"),
        }
    }
    child.kill().context("kill command")
}

/// One output stream drained on its own thread into a shared buffer.
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: thread::JoinHandle<Result<()>>,
}

impl Capture {
    fn spawn<R: Read + Send + 'static>(reader: R) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let handle = thread::spawn(move || read_stream(reader, &sink));
        Self { buf, handle }
    }

    /// Wait for the stream to close, or only until `deadline` when given,
    /// and return what was read.
    fn finish(self, deadline: Option<Instant>) -> Result<Vec<u8>> {
        if let Some(deadline) = deadline {
            while !self.handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if !self.handle.is_finished() {
                warn!("output stream still open after kill, keeping partial output");
                return Ok(take(&self.buf));
            }
        }
        match self.handle.join() {
            Ok(result) => result?,
            Err(_) => return Err(anyhow!("output reader thread panicked")),
        }
        Ok(take(&self.buf))
    }
}

fn take(buf: &Mutex<Vec<u8>>) -> Vec<u8> {
    std::mem::take(&mut *buf.lock().unwrap_or_else(|poison| poison.into_inner()))
}

fn read_stream<R: Read>(mut reader: R, sink: &Mutex<Vec<u8>>) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err).context("read output"),
        };
        sink.lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .extend_from_slice(&chunk[..read]);
    }
}
