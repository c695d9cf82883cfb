//! End-to-end behaviour of the daemon against real `sh` services and loggers.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use svscan::{
    Config, Event, EventKind, Phase, Registry, RuntimeError, Severity, Supervisor,
    SupervisorBuilder,
};

const LOGGER: &str = "#!/bin/sh\n\
                      echo \"$1 $2\" >> \"$2/logger-args\"\n\
                      exec cat >> \"$2/log\"\n";

fn script(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

struct Harness {
    root: TempDir,
    _tools: TempDir,
    sup: Arc<Supervisor>,
    events: broadcast::Receiver<Event>,
    handle: JoinHandle<Result<(), RuntimeError>>,
}

impl Harness {
    fn config(root: &Path, tools: &Path, logger_body: &str) -> Config {
        let logger = tools.join("logger");
        script(&logger, logger_body);
        Config {
            service_dir: root.to_path_buf(),
            max_startups: 5,
            restart_wait: Duration::from_millis(100),
            tick: Duration::from_millis(50),
            settle: Duration::from_millis(20),
            logger_bin: logger,
            logger_grace: Duration::from_millis(300),
            grace: Duration::from_secs(5),
            ..Config::default()
        }
    }

    /// Prepares the service root with `setup`, then starts the daemon.
    fn start(logger_body: &str, tweak: impl FnOnce(&mut Config), setup: impl FnOnce(&Path)) -> Self {
        let root = tempfile::tempdir().unwrap();
        let tools = tempfile::tempdir().unwrap();
        setup(root.path());

        let mut cfg = Self::config(root.path(), tools.path(), logger_body);
        tweak(&mut cfg);
        let sup = SupervisorBuilder::new(cfg).build();
        let events = sup.bus().subscribe();
        let runner = Arc::clone(&sup);
        let handle = tokio::spawn(async move { runner.run_until(std::future::pending()).await });

        Self {
            root,
            _tools: tools,
            sup,
            events,
            handle,
        }
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    async fn wait_for(&mut self, pred: impl Fn(&Event) -> bool) -> Event {
        let events = &mut self.events;
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match events.recv().await {
                    Ok(ev) if pred(&ev) => return ev,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => panic!("bus closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    async fn startups(&self, name: &str) -> u32 {
        self.sup.running().get(name).await.unwrap().startups().await
    }

    async fn stop(self) -> Result<(), RuntimeError> {
        self.sup.shutdown_token().cancel();
        self.handle.await.unwrap()
    }
}

fn install(root: &Path, name: &str, body: &str) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    script(&dir.join("run"), body);
}

fn lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|s| s.lines().map(String::from).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn new_service_is_registered_started_and_logged() {
    let mut h = Harness::start(LOGGER, |_| {}, |root| {
        install(root, "svc-a", "#!/bin/sh\necho hello\nexec sleep 30\n");
    });

    let started = h
        .wait_for(|e| e.kind == EventKind::ServiceStarted && e.is_for("svc-a"))
        .await;
    assert!(started.pid.is_some());
    assert!(h.sup.registry().contains("svc-a").await.unwrap());
    assert_eq!(h.startups("svc-a").await, 1);

    h.wait_for(|e| e.kind == EventKind::LoggerStarted && e.is_for("svc-a"))
        .await;
    let log = h.dir("svc-a").join("log");
    for _ in 0..100 {
        if !lines(&log).is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(lines(&log), vec!["hello"]);
    let expected = format!("-path {}", h.dir("svc-a").display());
    assert_eq!(lines(&h.dir("svc-a").join("logger-args")), vec![expected]);

    h.stop().await.unwrap();
}

#[tokio::test]
async fn exited_service_restarts_after_the_wait() {
    let mut h = Harness::start(LOGGER, |_| {}, |root| {
        install(root, "svc-a", "#!/bin/sh\nexit 0\n");
    });

    let exited = h
        .wait_for(|e| e.kind == EventKind::ServiceExited && e.is_for("svc-a"))
        .await;
    assert_eq!(exited.exit_code, Some(0));
    let scheduled = h
        .wait_for(|e| e.kind == EventKind::RestartScheduled && e.is_for("svc-a"))
        .await;
    assert_eq!(scheduled.delay_ms, Some(100));

    let second = h
        .wait_for(|e| {
            e.kind == EventKind::ServiceStarted && e.is_for("svc-a") && e.attempt == Some(2)
        })
        .await;
    assert!(second.pid.is_some());
    assert!(h.startups("svc-a").await >= 2);

    h.stop().await.unwrap();
}

#[tokio::test]
async fn lines_refused_by_a_dead_logger_reach_the_next_one_first() {
    // The first logger stops reading but stays alive; later ones behave.
    let logger = "#!/bin/sh\n\
                  if [ -f \"$2/first\" ]; then exec cat >> \"$2/log\"; fi\n\
                  touch \"$2/first\"\n\
                  exec 0<&-\n\
                  touch \"$2/closed\"\n\
                  exec sleep 5\n";
    let mut h = Harness::start(logger, |_| {}, |root| {
        install(
            root,
            "svc-a",
            "#!/bin/sh\n\
             while [ ! -f closed ]; do sleep 0.05; done\n\
             echo l1\necho l2\necho l3\n\
             exec sleep 30\n",
        );
    });

    let failed = h
        .wait_for(|e| e.kind == EventKind::LoggerWriteFailed && e.is_for("svc-a"))
        .await;
    assert_eq!(failed.kind.severity(), Severity::Critical);
    let replayed = h
        .wait_for(|e| e.kind == EventKind::BufferReplayed && e.is_for("svc-a"))
        .await;
    assert_eq!(replayed.lines, Some(1));

    let log = h.dir("svc-a").join("log");
    for _ in 0..100 {
        if lines(&log).len() >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(lines(&log), vec!["l1", "l2", "l3"]);
    // The service itself was never restarted.
    assert_eq!(h.startups("svc-a").await, 1);

    h.stop().await.unwrap();
}

#[tokio::test]
async fn deleted_service_is_evicted_and_not_restarted() {
    let mut h = Harness::start(LOGGER, |_| {}, |root| {
        install(root, "svc-a", "#!/bin/sh\nexec sleep 30\n");
    });
    h.wait_for(|e| e.kind == EventKind::ServiceStarted && e.is_for("svc-a"))
        .await;

    std::fs::remove_dir_all(h.dir("svc-a")).unwrap();
    h.wait_for(|e| e.kind == EventKind::ServiceEvicted && e.is_for("svc-a"))
        .await;
    assert!(!h.sup.running().contains("svc-a").await);

    // Several more ticks: nothing starts again.
    tokio::time::sleep(Duration::from_millis(400)).await;
    loop {
        match h.events.try_recv() {
            Ok(ev) => assert!(
                !(ev.kind == EventKind::ServiceStarting && ev.is_for("svc-a")),
                "svc-a started again"
            ),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    assert!(!h.sup.running().contains("svc-a").await);
    assert!(h.sup.registry().contains("svc-a").await.unwrap());

    h.stop().await.unwrap();
}

#[tokio::test]
async fn startup_cap_stops_restarts_but_keeps_the_entry() {
    let mut h = Harness::start(
        LOGGER,
        |cfg| {
            cfg.max_startups = 3;
            cfg.restart_wait = Duration::from_millis(20);
        },
        |root| install(root, "svc-b", "#!/bin/sh\nexit 1\n"),
    );

    let capped = h
        .wait_for(|e| e.kind == EventKind::StartupCapReached && e.is_for("svc-b"))
        .await;
    assert_eq!(capped.kind.severity(), Severity::Critical);
    assert_eq!(capped.attempt, Some(3));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.startups("svc-b").await, 3);
    assert_eq!(h.sup.running().phase("svc-b").await, Some(Phase::Capped));

    std::fs::remove_dir_all(h.dir("svc-b")).unwrap();
    h.wait_for(|e| e.kind == EventKind::ServiceEvicted && e.is_for("svc-b"))
        .await;

    h.stop().await.unwrap();
}

#[tokio::test]
async fn file_registry_survives_a_restart_of_the_daemon() {
    let state = tempfile::tempdir().unwrap();
    let registry = state.path().join("registry.json");

    let reg = registry.clone();
    let mut h = Harness::start(
        LOGGER,
        move |cfg| cfg.registry_path = Some(reg),
        |root| install(root, "svc-a", "#!/bin/sh\nexec sleep 30\n"),
    );
    h.wait_for(|e| e.kind == EventKind::ServiceStarted && e.is_for("svc-a"))
        .await;
    h.stop().await.unwrap();

    let raw = std::fs::read_to_string(&registry).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(parsed["services"]["svc-a"]["path"].is_string());
}
