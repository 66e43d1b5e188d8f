use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::error::{ConverterError, Result};
use crate::media::Invocation;

/// How a supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Exited(ExitStatus),
    /// Force-killed after ignoring the interrupt for the whole grace period
    Killed,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        matches!(self, ProcessExit::Exited(status) if status.success())
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessExit::Exited(status) => match status.code() {
                Some(code) => write!(f, "exit code {}", code),
                None => write!(f, "{}", status),
            },
            ProcessExit::Killed => f.write_str("killed"),
        }
    }
}

/// Spawns encoder invocations and hands out their running state
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    program: PathBuf,
    grace_period: Duration,
    line_buffer: usize,
    cancel: CancelSignal,
}

impl ProcessSupervisor {
    pub fn new<P: Into<PathBuf>>(
        program: P,
        grace_period: Duration,
        line_buffer: usize,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            program: program.into(),
            grace_period,
            line_buffer: line_buffer.max(1),
            cancel,
        }
    }

    /// Start `invocation` with stdout and stderr merged into one line stream.
    ///
    /// Both streams share a single pipe, so lines arrive in the order the
    /// process wrote them.
    pub fn spawn(&self, invocation: &Invocation) -> Result<RunningProcess> {
        debug!(
            "Executing {}: {} {:?}",
            invocation.description,
            self.program.display(),
            invocation.args
        );

        let spawn_error = |source| ConverterError::Spawn {
            program: self.program.display().to_string(),
            source,
        };

        let (reader, writer) = std::io::pipe().map_err(spawn_error)?;
        let stderr_writer = writer.try_clone().map_err(spawn_error)?;

        let mut command = Command::new(&self.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(stderr_writer))
            .kill_on_drop(true);
        let spawned = command.spawn();
        // Our copies of the write end must go, or the reader never sees EOF
        drop(command);
        let child = spawned.map_err(spawn_error)?;

        let pid = child.id();
        debug!("Spawned {} (pid {:?})", invocation.description, pid);

        let (tx, rx) = mpsc::channel(self.line_buffer);
        spawn_reader(reader, tx)?;

        Ok(RunningProcess {
            child,
            pid,
            lines: rx,
            cancel: self.cancel.clone(),
            grace_period: self.grace_period,
            interrupted: false,
        })
    }
}

#[cfg(unix)]
fn spawn_reader(reader: std::io::PipeReader, tx: mpsc::Sender<String>) -> Result<()> {
    let pipe = tokio::net::unix::pipe::Receiver::from_owned_fd(std::os::fd::OwnedFd::from(reader))?;
    tokio::spawn(forward_lines(pipe, tx));
    Ok(())
}

#[cfg(windows)]
fn spawn_reader(reader: std::io::PipeReader, tx: mpsc::Sender<String>) -> Result<()> {
    let file = std::fs::File::from(std::os::windows::io::OwnedHandle::from(reader));
    tokio::spawn(forward_lines(tokio::fs::File::from_std(file), tx));
    Ok(())
}

/// One live encoder process, owned by the job that spawned it
#[derive(Debug)]
pub struct RunningProcess {
    child: Child,
    pid: Option<u32>,
    lines: mpsc::Receiver<String>,
    cancel: CancelSignal,
    grace_period: Duration,
    interrupted: bool,
}

impl RunningProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Next output line in production order.
    ///
    /// Returns `None` once both pipes are closed, or as soon as cancellation
    /// is requested, in which case the process has been sent an interrupt.
    pub async fn next_line(&mut self) -> Option<String> {
        if self.interrupted {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.interrupt();
            return None;
        }

        let next = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            line = self.lines.recv() => Some(line),
        };

        match next {
            Some(line) => line,
            None => {
                self.interrupt();
                None
            }
        }
    }

    /// Wait for the process to end.
    ///
    /// An interrupted process gets the grace period to exit on its own and
    /// is killed afterwards.
    pub async fn finish(mut self) -> Result<ProcessExit> {
        if !self.interrupted && self.cancel.is_cancelled() {
            self.interrupt();
        }

        let RunningProcess {
            mut child,
            pid,
            lines,
            grace_period,
            interrupted,
            ..
        } = self;

        if !interrupted {
            drop(lines);
            let status = child.wait().await?;
            debug!("Process {:?} exited: {}", pid, status);
            return Ok(ProcessExit::Exited(status));
        }

        // Nobody reads anymore; closing the channel lets the pipe readers go
        drop(lines);
        match tokio::time::timeout(grace_period, child.wait()).await {
            Ok(status) => {
                let status = status?;
                info!("Interrupted process {:?} exited: {}", pid, status);
                Ok(ProcessExit::Exited(status))
            }
            Err(_) => {
                warn!(
                    "Process {:?} still running {:?} after interrupt, killing it",
                    pid, grace_period
                );
                child.kill().await?;
                Ok(ProcessExit::Killed)
            }
        }
    }

    fn interrupt(&mut self) {
        if self.interrupted {
            return;
        }
        self.interrupted = true;
        info!("Interrupting process {:?}", self.pid);
        send_interrupt(&mut self.child, self.pid);
    }
}

#[cfg(unix)]
fn send_interrupt(child: &mut Child, pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        let _ = child.start_kill();
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; the pid belongs
    // to a child we have not reaped yet.
    let rc = unsafe { libc::kill(pid, libc::SIGINT) };
    if rc != 0 {
        debug!(
            "SIGINT to {} failed: {}",
            pid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn send_interrupt(child: &mut Child, _pid: Option<u32>) {
    let _ = child.start_kill();
}

/// Pump one pipe into the shared line channel until EOF or until the
/// receiver is gone
async fn forward_lines<R>(pipe: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();

    loop {
        match read_segment(&mut reader, &mut buf).await {
            Ok(false) => break,
            Ok(true) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if line.trim().is_empty() {
                    continue;
                }
                if tx.send(line.to_string()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Stopped reading process output: {}", e);
                break;
            }
        }
    }
}

/// Read up to the next `\n` or `\r` into `buf`, without the terminator.
/// Returns `false` at EOF with nothing read.
async fn read_segment<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(!buf.is_empty());
        }

        if let Some(pos) = available.iter().position(|b| *b == b'\n' || *b == b'\r') {
            buf.extend_from_slice(&available[..pos]);
            reader.consume(pos + 1);
            return Ok(true);
        }

        let len = available.len();
        buf.extend_from_slice(available);
        reader.consume(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn segments(input: &[u8]) -> Vec<String> {
        let mut reader = BufReader::new(input);
        let mut buf = Vec::new();
        let mut out = Vec::new();
        while read_segment(&mut reader, &mut buf).await.unwrap() {
            out.push(String::from_utf8_lossy(&buf).into_owned());
        }
        out
    }

    #[tokio::test]
    async fn test_segments_split_on_carriage_return() {
        let lines = segments(b"Input #0\nframe=1 time=00:00:01.00\rframe=2 time=00:00:02.00\r\nend").await;
        assert_eq!(
            lines,
            vec![
                "Input #0",
                "frame=1 time=00:00:01.00",
                "frame=2 time=00:00:02.00",
                "",
                "end"
            ]
        );
    }

    #[tokio::test]
    async fn test_forward_lines_skips_blank_and_decodes_lossy() {
        let (tx, mut rx) = mpsc::channel(8);
        forward_lines(&b"first\r\n\n  \nbad \xff byte\n"[..], tx).await;

        let mut received = Vec::new();
        while let Some(line) = rx.recv().await {
            received.push(line);
        }
        assert_eq!(received, vec!["first".to_string(), "bad \u{fffd} byte".to_string()]);
    }

    #[test]
    fn test_exit_display() {
        assert_eq!(ProcessExit::Killed.to_string(), "killed");
        assert!(!ProcessExit::Killed.success());
    }

    #[tokio::test]
    async fn test_spawn_error() {
        let supervisor = ProcessSupervisor::new(
            "/nonexistent/ffmpeg-for-tests",
            Duration::from_millis(100),
            8,
            CancelSignal::never(),
        );
        let invocation = Invocation::new(crate::media::InvocationKind::StreamCopy, "Stream copy");

        let err = supervisor.spawn(&invocation).unwrap_err();
        assert!(matches!(err, ConverterError::Spawn { .. }));
        assert!(err.to_string().starts_with("spawn error"));
    }
}
