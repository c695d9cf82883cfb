//! # Runtime events emitted by the reconciliation loop, supervisors and log pumps.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Scan events**: reconciliation ticks and their failures
//! - **Service lifecycle events**: start, exit, restart, cap, eviction
//! - **Logger events**: logger start/exit, pipe failures, buffer replay
//! - **Runtime events**: shutdown and subscriber health
//!
//! Every kind has a fixed [`Severity`]; the [`LogWriter`](crate::LogWriter)
//! subscriber uses it to pick the log level.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use svscan::{Event, EventKind, Severity};
//!
//! let ev = Event::new(EventKind::StartupCapReached)
//!     .with_service("svc-b")
//!     .with_attempt(5);
//!
//! assert_eq!(ev.kind.severity(), Severity::Critical);
//! assert_eq!(ev.service.as_deref(), Some("svc-b"));
//! ```

use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Operational severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Routine progress.
    Debug,
    /// Something restarted or was torn down.
    Warning,
    /// Operator attention needed.
    Critical,
}

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Scan events ===
    /// A reconciliation tick started scanning the service root.
    ///
    /// Sets: `reason` (scanned path)
    ScanStarted,

    /// The service root could not be read this tick; retried next tick.
    ///
    /// Sets: `reason`
    ScanFailed,

    /// The registry could not be synced or read this tick; retried next tick.
    ///
    /// Sets: `reason`
    RegistryFailed,

    // === Service lifecycle events ===
    /// A known service is not supervised yet; a start is scheduled after the settle delay.
    ///
    /// Sets: `service`
    ServiceScheduled,

    /// A supervised service is still present and running.
    ///
    /// Sets: `service`
    ServiceAlive,

    /// A start attempt is about to launch the `run` executable.
    ///
    /// Sets: `service`, `attempt`
    ServiceStarting,

    /// The `run` executable was launched.
    ///
    /// Sets: `service`, `attempt`, `pid`
    ServiceStarted,

    /// The `run` executable could not be launched.
    ///
    /// Sets: `service`, `attempt`, `reason`
    ServiceStartFailed,

    /// The service process terminated (any status).
    ///
    /// Sets: `service`, `attempt`, `pid`, `exit_code` (if any), `reason`
    ServiceExited,

    /// The next start is scheduled after the fixed restart wait.
    ///
    /// Sets: `service`, `attempt` (previous), `delay_ms`
    RestartScheduled,

    /// The startup cap was reached; no further automatic restarts.
    ///
    /// Sets: `service`, `attempt`
    StartupCapReached,

    /// The service disappeared from disk and its supervision was stopped.
    ///
    /// Sets: `service`
    ServiceEvicted,

    /// A pending start was dropped because the service vanished meanwhile.
    ///
    /// Sets: `service`, `reason`
    StartAborted,

    // === Logger events ===
    /// A logger subprocess was launched for a service.
    ///
    /// Sets: `service`, `pid`
    LoggerStarted,

    /// The logger subprocess could not be launched; retried shortly.
    ///
    /// Sets: `service`, `reason`
    LoggerStartFailed,

    /// Writing to the logger failed; the line was buffered.
    ///
    /// Sets: `service`, `reason`, `lines` (buffer size)
    LoggerWriteFailed,

    /// The logger subprocess exited.
    ///
    /// Sets: `service`, `pid`, `exit_code` (if any), `reason`
    LoggerExited,

    /// Buffered lines are being replayed into a fresh logger.
    ///
    /// Sets: `service`, `lines`
    BufferReplayed,

    // === Runtime events ===
    /// Shutdown requested (OS signal observed).
    ShutdownRequested,

    /// All supervisors stopped within the configured grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some supervisors did not stop in time.
    GraceExceeded,

    /// Subscriber panicked during event processing.
    ///
    /// Sets: `service` (subscriber name), `reason`
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `service` (subscriber name), `reason`
    SubscriberOverflow,
}

impl EventKind {
    /// Returns the operational severity of this kind.
    pub fn severity(self) -> Severity {
        use EventKind::*;
        match self {
            ScanStarted | ServiceScheduled | ServiceAlive | ServiceStarted | LoggerStarted
            | AllStoppedWithin => Severity::Debug,

            ScanFailed | RegistryFailed | ServiceStarting | ServiceExited | RestartScheduled
            | ServiceEvicted | StartAborted | LoggerExited | BufferReplayed
            | ShutdownRequested | SubscriberOverflow => Severity::Warning,

            ServiceStartFailed | StartupCapReached | LoggerStartFailed | LoggerWriteFailed
            | GraceExceeded | SubscriberPanicked => Severity::Critical,
        }
    }
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Name of the service, if applicable.
    pub service: Option<Arc<str>>,
    /// Human-readable reason (errors, paths, exit details).
    pub reason: Option<Arc<str>>,
    /// Startup count at the time of the event (starting from 1).
    pub attempt: Option<u32>,
    /// OS process id of the service or logger.
    pub pid: Option<u32>,
    /// Exit code of a terminated process (absent when killed by a signal).
    pub exit_code: Option<i32>,
    /// Restart delay in milliseconds.
    pub delay_ms: Option<u32>,
    /// Number of buffered log lines.
    pub lines: Option<usize>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            service: None,
            reason: None,
            attempt: None,
            pid: None,
            exit_code: None,
            delay_ms: None,
            lines: None,
        }
    }

    /// Attaches a service name.
    #[inline]
    pub fn with_service(mut self, service: impl Into<Arc<str>>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches the startup count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a process id.
    #[inline]
    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    /// Attaches a restart delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches a buffered line count.
    #[inline]
    pub fn with_lines(mut self, n: usize) -> Self {
        self.lines = Some(n);
        self
    }

    /// Attaches the exit code and a printable form of an exit status.
    #[inline]
    pub fn with_status(mut self, status: ExitStatus) -> Self {
        self.exit_code = status.code();
        self.reason = Some(status.to_string().into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_service(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_service(subscriber)
            .with_reason(info)
    }

    /// Returns `true` if this event concerns the given service.
    #[inline]
    pub fn is_for(&self, service: &str) -> bool {
        self.service.as_deref() == Some(service)
    }
}
