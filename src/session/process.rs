//! Decoder subprocess
//!
//! Each decoder runs in its own process group so termination reaches any
//! helper processes it forks. Termination is two-phase: SIGTERM to the group,
//! a bounded wait, then SIGKILL.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use crate::protocol::DecoderCommand;

/// Pipes taken from a freshly spawned decoder
pub(crate) struct DecoderPipes {
    /// Raw PCM output
    pub stdout: ChildStdout,
    /// Diagnostics
    pub stderr: Option<ChildStderr>,
}

/// How a decoder ended after termination was requested
#[derive(Debug)]
pub(crate) enum Termination {
    /// It had already exited
    AlreadyExited(ExitStatus),
    /// It exited within the grace period
    Graceful(ExitStatus),
    /// It had to be killed
    Forced(Option<ExitStatus>),
}

/// An exclusively owned decoder process
pub(crate) struct DecoderProcess {
    child: Child,
    pid: Option<u32>,
    program: PathBuf,
}

impl DecoderProcess {
    /// Launch the decoder described by `command`
    pub fn spawn(command: &DecoderCommand) -> io::Result<(Self, DecoderPipes)> {
        let mut cmd = Command::new(command.program());
        cmd.args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn()?;
        let pid = child.id();

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.start_kill();
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "decoder stdout was not captured",
                ));
            }
        };
        let stderr = child.stderr.take();

        tracing::debug!(
            pid = ?pid,
            program = %command.program().display(),
            "Decoder process spawned"
        );

        Ok((
            Self {
                child,
                pid,
                program: command.program().to_path_buf(),
            },
            DecoderPipes { stdout, stderr },
        ))
    }

    /// OS process id (also the process group id)
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the process to exit
    ///
    /// Cancel safe.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Terminate gracefully, escalating to a kill after `grace`
    pub async fn terminate(&mut self, grace: Duration) -> Termination {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Termination::AlreadyExited(status);
        }

        self.signal_terminate();

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => Termination::Graceful(status),
            Ok(Err(e)) => {
                tracing::warn!(pid = ?self.pid, error = %e, "Failed waiting for decoder exit");
                self.kill().await
            }
            Err(_) => {
                tracing::warn!(
                    pid = ?self.pid,
                    program = %self.program.display(),
                    grace_ms = grace.as_millis() as u64,
                    "Decoder did not exit within grace period, killing"
                );
                self.kill().await
            }
        }
    }

    async fn kill(&mut self) -> Termination {
        self.signal_kill();
        if let Err(e) = self.child.start_kill() {
            // Already reaped
            tracing::trace!(pid = ?self.pid, error = %e, "start_kill failed");
        }
        Termination::Forced(self.child.wait().await.ok())
    }

    #[cfg(unix)]
    fn signal_terminate(&mut self) {
        self.signal_group(nix::sys::signal::Signal::SIGTERM);
    }

    #[cfg(unix)]
    fn signal_kill(&mut self) {
        self.signal_group(nix::sys::signal::Signal::SIGKILL);
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return;
        };
        let Ok(raw) = i32::try_from(pid) else {
            return;
        };

        if let Err(e) = killpg(Pid::from_raw(raw), signal) {
            // ESRCH: group already gone
            tracing::trace!(pid = pid, signal = ?signal, error = %e, "killpg failed");
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(&mut self) {
        let _ = self.child.start_kill();
    }

    #[cfg(not(unix))]
    fn signal_kill(&mut self) {}
}

/// Exit code of a status, or the negated signal number when killed by a signal
pub(crate) fn exit_code(status: &ExitStatus) -> Option<i32> {
    if let Some(code) = status.code() {
        return Some(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal().map(|signal| -signal)
    }

    #[cfg(not(unix))]
    {
        None
    }
}
