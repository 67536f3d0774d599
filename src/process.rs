//! Process lifecycle
//!
//! Every spawned program gets one monitor thread. The monitor owns the
//! `Child`, collects its stdout/stderr into private buffers via
//! `wait_with_output`, and sends the result exactly once on a
//! `sync_channel(1)`. The script thread joins by receiving from that
//! channel, racing the run deadline.
//!
//! On Unix each program leads its own process group, so interrupting or
//! killing a program also reaches anything it spawned.

use std::io::Write;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::deadline::Deadline;
use crate::dispatch::Negation;

/// How long a killed process group gets to release its pipes
const REAP_GRACE: Duration = Duration::from_secs(5);

/// Everything a finished process left behind
#[derive(Debug, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process could not be waited on
    pub status: Option<ExitStatus>,
    /// Wait error or lost monitor
    pub error: Option<String>,
    /// The deadline expired and the process was killed
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.error.is_none() && self.status.map_or(false, |s| s.success())
    }

    /// Exit code, or -1 when the process was killed by a signal or lost
    pub fn code(&self) -> i32 {
        self.status.and_then(|s| s.code()).unwrap_or(-1)
    }

    /// Short description for the log, e.g. `exit status 1`
    pub fn describe(&self) -> String {
        if let Some(ref err) = self.error {
            return err.clone();
        }
        match self.status {
            Some(status) => match status.code() {
                Some(code) => format!("exit status {}", code),
                None => format!("{}", status),
            },
            None => "no exit status".to_string(),
        }
    }
}

/// A running program whose completion arrives on a one-shot channel.
///
/// Dropping a handle that was never joined kills the process group.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    done: Receiver<ProcessOutput>,
    joined: bool,
}

impl ProcessHandle {
    /// Spawn `cmd` with piped stdout/stderr and an optional stdin payload.
    pub fn spawn(mut cmd: Command, stdin: Option<Vec<u8>>) -> std::io::Result<Self> {
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn()?;
        let pid = child.id();

        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            thread::spawn(move || {
                // A program that exits without reading stdin closes the pipe early.
                let _ = pipe.write_all(&data);
            });
        }

        let (tx, rx) = mpsc::sync_channel(1);
        thread::spawn(move || {
            let output = match child.wait_with_output() {
                Ok(out) => ProcessOutput {
                    stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
                    status: Some(out.status),
                    ..Default::default()
                },
                Err(e) => ProcessOutput {
                    error: Some(e.to_string()),
                    ..Default::default()
                },
            };
            let _ = tx.send(output);
        });

        tracing::debug!(pid, "spawned process");
        Ok(Self { pid, done: rx, joined: false })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Block until the process exits or the deadline expires.
    ///
    /// On expiry the process group is killed, reaped, and the returned
    /// output has `timed_out` set.
    pub fn wait(&mut self, deadline: &Deadline) -> ProcessOutput {
        let received = match deadline.remaining() {
            None => self.done.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(left) => self.done.recv_timeout(left),
        };
        self.joined = true;
        match received {
            Ok(out) => out,
            Err(RecvTimeoutError::Disconnected) => lost_monitor(),
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(pid = self.pid, "deadline expired, killing process");
                self.kill();
                let mut out = self.done.recv_timeout(REAP_GRACE).unwrap_or_else(|_| lost_monitor());
                out.timed_out = true;
                out
            }
        }
    }

    /// Ask the process group to exit (SIGINT).
    pub fn interrupt(&self) {
        #[cfg(unix)]
        self.signal(nix::sys::signal::Signal::SIGINT);
        #[cfg(not(unix))]
        self.kill();
    }

    /// Terminate the process group immediately (SIGKILL).
    pub fn kill(&self) {
        #[cfg(unix)]
        self.signal(nix::sys::signal::Signal::SIGKILL);
        #[cfg(not(unix))]
        {
            let pid = self.pid.to_string();
            let status = Command::new("taskkill")
                .args(["/F", "/T", "/PID", pid.as_str()])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if let Err(e) = status {
                tracing::warn!(pid = self.pid, error = %e, "failed to kill process");
            }
        }
    }

    #[cfg(unix)]
    fn signal(&self, sig: nix::sys::signal::Signal) {
        use nix::unistd::Pid;
        let Ok(raw) = i32::try_from(self.pid) else {
            return;
        };
        if let Err(e) = nix::sys::signal::killpg(Pid::from_raw(raw), sig) {
            // ESRCH: the group is already gone
            if e != nix::errno::Errno::ESRCH {
                tracing::warn!(pid = self.pid, signal = %sig, error = %e, "failed to signal process group");
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.joined {
            return;
        }
        match self.done.try_recv() {
            Ok(_) | Err(mpsc::TryRecvError::Disconnected) => {}
            Err(mpsc::TryRecvError::Empty) => {
                tracing::debug!(pid = self.pid, "killing unjoined process");
                self.kill();
            }
        }
    }
}

fn lost_monitor() -> ProcessOutput {
    ProcessOutput {
        error: Some("process monitor exited without a result".to_string()),
        ..Default::default()
    }
}

/// A program started with `exec … &`, joined later by `wait` or `skip`
#[derive(Debug)]
pub struct BackgroundTask {
    pub handle: ProcessHandle,
    /// Prefix the line was written with, checked when the task is joined
    pub neg: Negation,
    /// Program and arguments, for the log
    pub cmdline: String,
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn collects_output_and_status() {
        let mut h = ProcessHandle::spawn(sh("echo out; echo err >&2; exit 3"), None).unwrap();
        let out = h.wait(&Deadline::never());
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
        assert_eq!(out.code(), 3);
        assert!(!out.success());
        assert_eq!(out.describe(), "exit status 3");
    }

    #[test]
    fn feeds_stdin() {
        let mut h = ProcessHandle::spawn(sh("cat"), Some(b"piped\n".to_vec())).unwrap();
        let out = h.wait(&Deadline::never());
        assert!(out.success());
        assert_eq!(out.stdout, "piped\n");
    }

    #[test]
    fn deadline_kills_the_group() {
        let start = Instant::now();
        let mut h = ProcessHandle::spawn(sh("sleep 30; echo late"), None).unwrap();
        let out = h.wait(&Deadline::after(Duration::from_millis(200)));
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn interrupt_ends_a_sleeping_process() {
        let mut h = ProcessHandle::spawn(sh("exec sleep 30"), None).unwrap();
        h.interrupt();
        let out = h.wait(&Deadline::after(Duration::from_secs(10)));
        assert!(!out.timed_out);
        assert!(!out.success());
        assert_eq!(out.code(), -1);
    }
}
