//! # LogWriter: events rendered through `tracing`
//!
//! Maps each event's [`Severity`] onto a tracing level:
//! `Debug → debug!`, `Warning → warn!`, `Critical → error!`.
//!
//! ## Example output
//! ```text
//! WARN svscan: starting service service="svc-a" attempt=1
//! DEBUG svscan: logger started service="svc-a" pid=4242
//! WARN svscan: restarting service service="svc-a" delay_ms=1000 after_attempt=1
//! ERROR svscan: too many startups in this session service="svc-b" attempt=5
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind, Severity};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn message(kind: EventKind) -> &'static str {
    match kind {
        EventKind::ScanStarted => "scanning service directory",
        EventKind::ScanFailed => "service directory unreadable",
        EventKind::RegistryFailed => "registry sync failed",
        EventKind::ServiceScheduled => "not yet running",
        EventKind::ServiceAlive => "already running",
        EventKind::ServiceStarting => "starting service",
        EventKind::ServiceStarted => "service started",
        EventKind::ServiceStartFailed => "service not startable",
        EventKind::ServiceExited => "service exited",
        EventKind::RestartScheduled => "restarting service",
        EventKind::StartupCapReached => "too many startups in this session",
        EventKind::ServiceEvicted => "service removed, supervision stopped",
        EventKind::StartAborted => "service vanished before start",
        EventKind::LoggerStarted => "logger started",
        EventKind::LoggerStartFailed => "logger not startable",
        EventKind::LoggerWriteFailed => "logger input gone away",
        EventKind::LoggerExited => "logger exited",
        EventKind::BufferReplayed => "found unhandled log lines, writing those first",
        EventKind::ShutdownRequested => "shutdown requested",
        EventKind::AllStoppedWithin => "all services stopped within grace",
        EventKind::GraceExceeded => "shutdown grace exceeded",
        EventKind::SubscriberPanicked => "subscriber panicked",
        EventKind::SubscriberOverflow => "subscriber dropped an event",
    }
}

macro_rules! emit {
    ($level:ident, $e:expr) => {
        tracing::$level!(
            service = $e.service.as_deref(),
            attempt = $e.attempt,
            pid = $e.pid,
            exit_code = $e.exit_code,
            delay_ms = $e.delay_ms,
            lines = $e.lines,
            reason = $e.reason.as_deref(),
            seq = $e.seq,
            "{}",
            message($e.kind)
        )
    };
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        match e.kind.severity() {
            Severity::Debug => emit!(debug, e),
            Severity::Warning => emit!(warn, e),
            Severity::Critical => emit!(error, e),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
