//! # LogPump: pairs a service's output with a logger subprocess.
//!
//! The logger is launched as `<logger_bin> -path <service dir>` and receives
//! every output line of the service on its stdin, newline-terminated.
//!
//! ## Flow
//! ```text
//! loop {
//!   ├─► spawn logger ──(fail)──► LoggerStartFailed, pause 1s, retry
//!   ├─► fire readiness signal (first logger only)
//!   ├─► replay pending lines (front first, pop after each successful write)
//!   ├─► pump:
//!   │     line read  ─► write ─(fail)─► push line to pending, LoggerWriteFailed
//!   │     logger exit ─► restart (after a pause if nothing was written)
//!   │     end of output ─► close logger stdin, wait for it
//!   │     stop requested ─► keep draining until `logger_grace` runs out
//!   └─► exit when output ended and pending is empty, or the stop deadline passed
//! }
//! ```
//!
//! ## Rules
//! - A line leaves `pending` only after a successful write
//! - `pending` is always replayed before any newly read line
//! - Only one pump runs per service at a time (the actor joins it before restarting)

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::context::Context;
use crate::error::ServiceError;
use crate::events::{Event, EventKind};
use crate::services::Service;

/// Pause before retrying a logger that failed to spawn or quit on its own.
const LOGGER_RETRY: Duration = Duration::from_secs(1);

/// Line splitter that survives being cancelled mid-line.
///
/// Partially read bytes stay in `buf` until the rest of the line arrives.
/// Invalid UTF-8 is replaced rather than rejected.
pub(crate) struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Returns the next line without its terminator, or `None` at end of stream.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        let n = self.inner.read_until(b'\n', &mut self.buf).await?;
        if n == 0 && self.buf.is_empty() {
            return Ok(None);
        }
        let mut raw = std::mem::take(&mut self.buf);
        if raw.last() == Some(&b'\n') {
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
        }
        Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
    }
}

struct Logger {
    child: Child,
    stdin: Option<ChildStdin>,
    pid: Option<u32>,
}

impl Logger {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        stdin.write_all(&buf).await
    }

    async fn kill(&mut self) -> io::Result<ExitStatus> {
        self.stdin = None;
        self.child.kill().await?;
        self.child.wait().await
    }
}

enum Outcome {
    /// Service output reached end of stream.
    Eof,
    /// A write failed; the line is buffered.
    WriteFailed,
    /// The logger exited on its own; `wrote` tells whether it received anything.
    Exited {
        status: io::Result<ExitStatus>,
        wrote: bool,
    },
    /// The stop deadline passed while output was still open.
    Deadline,
}

/// Pumps one service's output into successive logger instances.
pub(crate) struct LogPump {
    ctx: Context,
    service: Arc<Service>,
    ready: Option<oneshot::Sender<()>>,
    stop: CancellationToken,
    deadline: Option<Instant>,
}

impl LogPump {
    /// Creates a pump.
    ///
    /// `ready` fires once, right after the first logger was spawned.
    /// Cancelling `stop` starts the bounded drain-and-terminate sequence.
    pub fn new(
        ctx: Context,
        service: Arc<Service>,
        ready: oneshot::Sender<()>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            service,
            ready: Some(ready),
            stop,
            deadline: None,
        }
    }

    /// Runs until the output is fully delivered or the stop deadline passes.
    pub async fn run<R: AsyncRead + Unpin>(mut self, output: R) {
        let mut reader = LineReader::new(output);
        let mut eof = false;

        loop {
            self.note_stop();
            if self.expired() {
                break;
            }

            let mut logger = match self.spawn_logger().await {
                Ok(logger) => logger,
                Err(e) => {
                    self.ctx.publish(
                        Event::new(EventKind::LoggerStartFailed)
                            .with_service(self.service.name())
                            .with_reason(e.to_string()),
                    );
                    if !self.pause(LOGGER_RETRY).await {
                        break;
                    }
                    continue;
                }
            };

            let outcome = self.pump(&mut logger, &mut reader, &mut eof).await;
            let quit_idle = matches!(outcome, Outcome::Exited { wrote: false, .. });
            let status = self.retire(&mut logger, outcome).await;

            self.service.lock().await.logger = None;
            let ev = Event::new(EventKind::LoggerExited)
                .with_service(self.service.name())
                .with_pid(logger.pid);
            self.ctx.publish(match status {
                Ok(status) => ev.with_status(status),
                Err(e) => ev.with_reason(e.to_string()),
            });

            if eof && self.service.pending_lines().await == 0 {
                break;
            }
            if quit_idle && !self.pause(LOGGER_RETRY).await {
                break;
            }
        }
    }

    async fn spawn_logger(&mut self) -> Result<Logger, ServiceError> {
        let name = self.service.name().to_string();
        let mut cmd = Command::new(&self.ctx.cfg.logger_bin);
        cmd.arg("-path")
            .arg(self.service.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut state = self.service.lock().await;
        let mut child = cmd
            .spawn()
            .map_err(|source| ServiceError::LoggerSpawn {
                name: name.clone(),
                source,
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ServiceError::MissingPipe {
                name,
                pipe: "stdin",
            })?;
        let pid = child.id();
        state.logger = pid;
        drop(state);

        if let Some(ready) = self.ready.take() {
            let _ = ready.send(());
        }
        self.ctx.publish(
            Event::new(EventKind::LoggerStarted)
                .with_service(self.service.name())
                .with_pid(pid),
        );
        Ok(Logger {
            child,
            stdin: Some(stdin),
            pid,
        })
    }

    async fn pump<R: AsyncRead + Unpin>(
        &mut self,
        logger: &mut Logger,
        reader: &mut LineReader<R>,
        eof: &mut bool,
    ) -> Outcome {
        if !self.replay(logger).await {
            return Outcome::WriteFailed;
        }
        if *eof {
            return Outcome::Eof;
        }

        let stop = self.stop.clone();
        let mut wrote = false;
        loop {
            self.note_stop();
            let deadline = self.deadline;
            let next = tokio::select! {
                status = logger.child.wait() => return Outcome::Exited { status, wrote },
                _ = stop.cancelled(), if deadline.is_none() => continue,
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    return Outcome::Deadline;
                }
                line = reader.next_line() => line,
            };

            match next {
                Ok(Some(line)) => {
                    if let Err(source) = logger.write_line(&line).await {
                        let buffered = {
                            let mut state = self.service.lock().await;
                            state.pending.push_back(line);
                            state.pending.len()
                        };
                        self.write_failed(logger, source, buffered);
                        return Outcome::WriteFailed;
                    }
                    wrote = true;
                }
                Ok(None) => {
                    *eof = true;
                    return Outcome::Eof;
                }
                Err(e) => {
                    tracing::warn!(service = self.service.name(), error = %e, "service output unreadable");
                    *eof = true;
                    return Outcome::Eof;
                }
            }
        }
    }

    /// Writes buffered lines to `logger`; returns `false` on the first failure.
    async fn replay(&self, logger: &mut Logger) -> bool {
        let backlog = self.service.pending_lines().await;
        if backlog == 0 {
            return true;
        }
        self.ctx.publish(
            Event::new(EventKind::BufferReplayed)
                .with_service(self.service.name())
                .with_pid(logger.pid)
                .with_lines(backlog),
        );

        loop {
            let Some(line) = self.service.lock().await.pending.front().cloned() else {
                return true;
            };
            if let Err(source) = logger.write_line(&line).await {
                let left = self.service.pending_lines().await;
                self.write_failed(logger, source, left);
                return false;
            }
            self.service.lock().await.pending.pop_front();
        }
    }

    fn write_failed(&self, logger: &Logger, source: io::Error, buffered: usize) {
        let err = ServiceError::PipeClosed {
            name: self.service.name().to_string(),
            source,
        };
        self.ctx.publish(
            Event::new(EventKind::LoggerWriteFailed)
                .with_service(self.service.name())
                .with_pid(logger.pid)
                .with_lines(buffered)
                .with_reason(err.to_string()),
        );
    }

    /// Brings the logger down according to how pumping ended.
    async fn retire(&mut self, logger: &mut Logger, outcome: Outcome) -> io::Result<ExitStatus> {
        match outcome {
            Outcome::Exited { status, .. } => status,
            Outcome::Deadline => logger.kill().await,
            Outcome::Eof | Outcome::WriteFailed => {
                logger.stdin = None;
                match time::timeout(self.ctx.cfg.logger_grace, logger.child.wait()).await {
                    Ok(status) => status,
                    Err(_elapsed) => logger.kill().await,
                }
            }
        }
    }

    /// Sleeps for `d`, cutting short at the stop deadline. Returns `false` if the deadline passed.
    async fn pause(&mut self, d: Duration) -> bool {
        let until = Instant::now() + d;
        let stop = self.stop.clone();
        loop {
            self.note_stop();
            if self.expired() {
                return false;
            }
            let wake = self.deadline.map_or(until, |dl| dl.min(until));
            tokio::select! {
                _ = time::sleep_until(wake) => {
                    if Instant::now() >= until {
                        return !self.expired();
                    }
                }
                _ = stop.cancelled(), if self.deadline.is_none() => {}
            }
        }
    }

    fn note_stop(&mut self) {
        if self.deadline.is_none() && self.stop.is_cancelled() {
            self.deadline = Some(Instant::now() + self.ctx.cfg.logger_grace);
        }
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|dl| Instant::now() >= dl)
    }
}
