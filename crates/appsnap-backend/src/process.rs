//! Archiver child processes.

use crate::error::{Result, SnapshotError};
use std::io::Read;
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Which end of the archiver carries the entry stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamEnd {
    /// We read the archive from its stdout.
    Stdout,
    /// We feed the archive to its stdin.
    Stdin,
}

/// A running archiver; killed and reaped if dropped before [`finish`].
///
/// [`finish`]: TarProcess::finish
pub(crate) struct TarProcess {
    child: Child,
    stderr: Option<JoinHandle<Vec<u8>>>,
    reaped: bool,
}

impl TarProcess {
    pub(crate) fn spawn(mut cmd: Command, end: StreamEnd) -> Result<Self> {
        match end {
            StreamEnd::Stdout => cmd.stdin(Stdio::null()).stdout(Stdio::piped()),
            StreamEnd::Stdin => cmd.stdin(Stdio::piped()).stdout(Stdio::null()),
        };
        cmd.stderr(Stdio::piped());

        debug!(
            program = %cmd.get_program().to_string_lossy(),
            args = ?cmd.get_args().collect::<Vec<_>>(),
            "spawning archiver"
        );
        let mut child = cmd.spawn()?;

        // Drain stderr on its own thread so a chatty archiver cannot block.
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                buf
            })
        });

        Ok(Self {
            child,
            stderr,
            reaped: false,
        })
    }

    pub(crate) fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub(crate) fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Close our end, wait for exit, and turn a failure into an error
    /// reading `cannot <action>: ...`.
    pub(crate) fn finish(mut self, action: &'static str) -> Result<()> {
        drop(self.child.stdin.take());
        let status = self.child.wait()?;
        self.reaped = true;
        let stderr = self.collect_stderr();
        if status.success() {
            return Ok(());
        }
        Err(tar_failure(action, status, &stderr))
    }

    fn collect_stderr(&mut self) -> Vec<u8> {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

impl Drop for TarProcess {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
            self.collect_stderr();
        }
    }
}

/// Summarise a failed run from its stderr, falling back to the exit status.
pub(crate) fn tar_failure(action: &'static str, status: ExitStatus, stderr: &[u8]) -> SnapshotError {
    let text = String::from_utf8_lossy(stderr);
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    match lines.next() {
        Some(first) => SnapshotError::Tar {
            action,
            first: first.to_string(),
            more: lines.count(),
        },
        None => SnapshotError::TarStatus(status.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::process::ExitStatusExt;

    fn failed() -> ExitStatus {
        ExitStatus::from_raw(2 << 8)
    }

    #[test]
    fn test_failure_from_stderr() {
        let err = tar_failure(
            "create archive",
            failed(),
            b"tar: a: Cannot open\n\ntar: b: Cannot open\ntar: Exiting with failure status\n",
        );
        assert_eq!(
            err.to_string(),
            "cannot create archive: tar: a: Cannot open (and 2 more)"
        );
    }

    #[test]
    fn test_failure_without_stderr() {
        let err = tar_failure("create archive", failed(), b"");
        assert_eq!(err.to_string(), "tar failed: exit status: 2");
    }

    #[test]
    fn test_finish_reports_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo oops >&2; echo more >&2; exit 3"]);
        let proc = TarProcess::spawn(cmd, StreamEnd::Stdout).unwrap();
        let err = proc.finish("create archive").unwrap_err();
        assert_eq!(err.to_string(), "cannot create archive: oops (and 1 more)");
    }

    #[test]
    fn test_stdin_stream() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "test \"$(cat)\" = hello"]);
        let mut proc = TarProcess::spawn(cmd, StreamEnd::Stdin).unwrap();
        let mut stdin = proc.take_stdin().unwrap();
        stdin.write_all(b"hello").unwrap();
        drop(stdin);
        proc.finish("extract archive").unwrap();
    }

    #[test]
    fn test_drop_kills_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let proc = TarProcess::spawn(cmd, StreamEnd::Stdout).unwrap();
        let started = std::time::Instant::now();
        drop(proc);
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
