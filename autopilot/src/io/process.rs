//! Child processes with a deadline and bounded captured output.
//!
//! Used by the sandbox tools. stdin is fed and both pipes are drained on
//! scoped threads while the child runs, so a chatty child cannot block on a
//! full pipe.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Deadline and per-stream byte budget for one child.
#[derive(Debug, Clone, Copy)]
pub struct ProcessLimits {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Bytes kept from one output stream, plus how many were thrown away.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Captured {
    fn render_into(&self, label: &str, out: &mut String) {
        out.push_str(label);
        out.push_str(":\n");
        out.push_str(&String::from_utf8_lossy(&self.bytes));
        if self.dropped > 0 {
            out.push_str(&format!(
                "\n[{} truncated {} bytes]",
                label.to_lowercase(),
                self.dropped
            ));
        }
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Text handed back to the model.
    pub fn render(&self, limits: &ProcessLimits) -> String {
        let mut out = String::new();
        if self.timed_out {
            out.push_str(&format!(
                "Error: command timed out after {}s.\n",
                limits.timeout.as_secs()
            ));
        }
        match self.status.code() {
            Some(code) => out.push_str(&format!("Exit code: {code}\n")),
            None => out.push_str("Exit code: terminated by signal\n"),
        }
        self.stdout.render_into("STDOUT", &mut out);
        out.push('\n');
        self.stderr.render_into("STDERR", &mut out);
        out
    }
}

/// Spawn `cmd`, optionally feed it `stdin`, and wait at most
/// `limits.timeout` before killing it.
pub fn run_with_limits(
    cmd: Command,
    stdin: Option<&[u8]>,
    limits: &ProcessLimits,
) -> Result<CommandOutput> {
    run_with_cleanup(cmd, stdin, limits, || {})
}

/// Like [`run_with_limits`], but calls `on_timeout` before killing a child
/// that overran its deadline. Used when the child only fronts work running
/// elsewhere (a container) that killing the child would not stop.
#[instrument(
    skip_all,
    fields(timeout_secs = limits.timeout.as_secs(), limit = limits.output_limit_bytes)
)]
pub fn run_with_cleanup(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    limits: &ProcessLimits,
    on_timeout: impl FnOnce(),
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|err| {
        error!(%err, "failed to spawn child");
        anyhow!(err).context("spawn command")
    })?;
    debug!(pid = child.id(), "child spawned");

    let input = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let limit = limits.output_limit_bytes;

    thread::scope(|scope| {
        let stdout = scope.spawn(move || drain(stdout, limit));
        let stderr = scope.spawn(move || drain(stderr, limit));
        if let (Some(mut pipe), Some(bytes)) = (input, stdin) {
            scope.spawn(move || {
                // The child may exit without reading everything.
                if let Err(err) = pipe.write_all(bytes) {
                    debug!(%err, "child closed stdin early");
                }
            });
        }

        let (status, timed_out) = wait_or_kill(&mut child, limits.timeout, on_timeout)?;
        let stdout = join(stdout).context("collect stdout")?;
        let stderr = join(stderr).context("collect stderr")?;
        if stdout.dropped > 0 || stderr.dropped > 0 {
            warn!(
                stdout_dropped = stdout.dropped,
                stderr_dropped = stderr.dropped,
                "child output truncated"
            );
        }
        debug!(code = ?status.code(), timed_out, "child finished");
        Ok(CommandOutput {
            status,
            stdout,
            stderr,
            timed_out,
        })
    })
}

fn wait_or_kill(
    child: &mut Child,
    timeout: Duration,
    on_timeout: impl FnOnce(),
) -> Result<(ExitStatus, bool)> {
    if let Some(status) = child.wait_timeout(timeout).context("wait for child")? {
        return Ok((status, false));
    }
    warn!(timeout_secs = timeout.as_secs(), "child timed out; killing");
    on_timeout();
    child.kill().context("kill child")?;
    let status = child.wait().context("reap killed child")?;
    Ok((status, true))
}

fn join(handle: thread::ScopedJoinHandle<'_, Result<Captured>>) -> Result<Captured> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader panicked"))?
}

/// Read to EOF, keeping at most `limit` bytes.
fn drain(mut reader: impl Read, limit: usize) -> Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read child output")?;
        if n == 0 {
            return Ok(captured);
        }
        let keep = n.min(limit.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.dropped += n - keep;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn limits(timeout: Duration, output_limit_bytes: usize) -> ProcessLimits {
        ProcessLimits {
            timeout,
            output_limit_bytes,
        }
    }

    #[test]
    fn renders_exit_code_and_both_streams() {
        let limits = limits(Duration::from_secs(10), 1024);
        let output =
            run_with_limits(sh("echo hello; echo oops >&2; exit 3"), None, &limits).expect("run");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(
            output.render(&limits),
            "Exit code: 3\nSTDOUT:\nhello\n\nSTDERR:\noops\n"
        );
    }

    #[test]
    fn feeds_stdin() {
        let limits = limits(Duration::from_secs(10), 1024);
        let output = run_with_limits(sh("cat"), Some(b"print('hi')\n"), &limits).expect("run");
        assert_eq!(output.stdout.bytes, b"print('hi')\n");
    }

    #[test]
    fn keeps_at_most_the_limit() {
        let limits = limits(Duration::from_secs(10), 4);
        let output = run_with_limits(sh("printf 0123456789"), None, &limits).expect("run");
        assert_eq!(
            output.stdout,
            Captured {
                bytes: b"0123".to_vec(),
                dropped: 6
            }
        );
        assert!(output.render(&limits).contains("[stdout truncated 6 bytes]"));
    }

    #[test]
    fn cleanup_runs_only_on_timeout() {
        let short = limits(Duration::from_millis(100), 1024);
        let mut cleaned = false;
        let output =
            run_with_cleanup(sh("sleep 5"), None, &short, || cleaned = true).expect("run");
        assert!(output.timed_out);
        assert!(cleaned);

        let roomy = limits(Duration::from_secs(10), 1024);
        let mut cleaned = false;
        run_with_cleanup(sh("true"), None, &roomy, || cleaned = true).expect("run");
        assert!(!cleaned);
    }

    #[test]
    fn kills_on_timeout() {
        let limits = limits(Duration::from_millis(100), 1024);
        let output = run_with_limits(sh("sleep 5"), None, &limits).expect("run");
        assert!(output.timed_out);
        assert!(
            output
                .render(&limits)
                .starts_with("Error: command timed out after 0s.")
        );
    }
}
