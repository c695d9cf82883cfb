//! # Reconciler: converges the running set on what the disk and registry say.
//!
//! Every `tick` it:
//! ```text
//! scan service root ──► registry.create_missing(on disk)
//!                   ──► registry.services()
//!                   ──► for each registered name:
//!                         not running, on disk     → claim + settle + recheck + ServiceActor
//!                         running, gone from disk  → evict (cancels actor, kills process)
//!                         running, Idle            → relaunch actor (counter preserved)
//!                         running otherwise        → ServiceAlive
//!                   ──► evict running names neither registered nor on disk
//! ```
//!
//! A failed scan skips the tick; nothing running is touched.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::time::{self, MissedTickBehavior};
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::core::actor::ServiceActor;
use crate::core::context::Context;
use crate::core::running::{Phase, Supervision};
use crate::events::{Event, EventKind};
use crate::services::{Service, ServiceDef, ServiceMap};

pub(crate) struct Reconciler {
    ctx: Context,
}

impl Reconciler {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Ticks until `token` is cancelled, then evicts and returns every entry.
    pub async fn run(self, token: CancellationToken) -> Vec<Supervision> {
        let mut ticker = time::interval(self.ctx.cfg.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = ticker.tick() => self.tick(&token).await,
                _ = token.cancelled() => break,
            }
        }
        self.ctx.running.evict_all().await
    }

    /// One reconciliation pass.
    pub async fn tick(&self, token: &CancellationToken) {
        self.ctx.publish(
            Event::new(EventKind::ScanStarted)
                .with_reason(self.ctx.scanner.root().display().to_string()),
        );

        let on_disk = match self.ctx.scanner.scan().await {
            Ok(names) => names,
            Err(e) => {
                self.ctx.publish(
                    Event::new(EventKind::ScanFailed)
                        .with_reason(format!("{}: {e}", self.ctx.scanner.root().display())),
                );
                return;
            }
        };

        if let Err(e) = self
            .ctx
            .registry
            .create_missing(&on_disk, self.ctx.scanner.root())
            .await
        {
            self.ctx
                .publish(Event::new(EventKind::RegistryFailed).with_reason(e.to_string()));
        }
        let known = match self.ctx.registry.services().await {
            Ok(known) => known,
            Err(e) => {
                self.ctx
                    .publish(Event::new(EventKind::RegistryFailed).with_reason(e.to_string()));
                return;
            }
        };

        // Entries may have been recorded under an earlier root.
        let root = self.ctx.scanner.root();
        for (name, def) in &known {
            let present = on_disk.contains(name);
            match self.ctx.running.phase(name).await {
                None if present => self.schedule_start(def.rebased(root), token).await,
                None => {}
                Some(_) if !present => self.evict(name).await,
                Some(Phase::Idle) => self.relaunch(name).await,
                Some(_) => self
                    .ctx
                    .publish(Event::new(EventKind::ServiceAlive).with_service(name.as_str())),
            }
        }

        self.evict_orphans(&known, &on_disk).await;
    }

    async fn schedule_start(&self, def: ServiceDef, token: &CancellationToken) {
        let service = Arc::new(Service::new(def));
        let cancel = token.child_token();
        if !self.ctx.running.claim(Arc::clone(&service), cancel.clone()).await {
            return;
        }
        self.ctx.publish(
            Event::new(EventKind::ServiceScheduled)
                .with_service(service.name())
                .with_delay(self.ctx.cfg.settle),
        );

        let ctx = self.ctx.clone();
        let svc = Arc::clone(&service);
        let join = tokio::spawn(async move {
            select! {
                _ = time::sleep(ctx.cfg.settle) => {}
                _ = cancel.cancelled() => return,
            }
            let known = ctx.registry.contains(svc.name()).await.unwrap_or(false);
            let reason = if !known {
                Some("no longer registered")
            } else if !ctx.scanner.is_present(svc.name()).await {
                Some("removed from disk")
            } else {
                None
            };
            if let Some(reason) = reason {
                ctx.publish(
                    Event::new(EventKind::StartAborted)
                        .with_service(svc.name())
                        .with_reason(reason),
                );
                ctx.running.release(svc.name(), svc.id()).await;
                return;
            }
            supervise(ctx, svc, cancel).await;
        });
        self.ctx
            .running
            .attach(service.name(), service.id(), join)
            .await;
    }

    async fn relaunch(&self, name: &str) {
        let Some((service, cancel)) = self.ctx.running.relaunch(name).await else {
            return;
        };
        let id = service.id();
        let join = tokio::spawn(supervise(self.ctx.clone(), service, cancel));
        self.ctx.running.attach(name, id, join).await;
    }

    async fn evict(&self, name: &str) {
        if self.ctx.running.evict(name).await.is_some() {
            self.ctx
                .publish(Event::new(EventKind::ServiceEvicted).with_service(name));
        }
    }

    async fn evict_orphans(&self, known: &ServiceMap, on_disk: &BTreeSet<String>) {
        for name in self.ctx.running.names().await {
            if !known.contains_key(&name) && !on_disk.contains(&name) {
                self.evict(&name).await;
            }
        }
    }
}

async fn supervise(ctx: Context, service: Arc<Service>, cancel: CancellationToken) {
    let name = service.name().to_string();
    let exit = ServiceActor::new(ctx, service).run(cancel).await;
    tracing::debug!(service = %name, ?exit, "service supervisor finished");
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::testing::{context, install, script, wait_for};
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::Duration;

    fn cfg(root: &Path, logs: &Path) -> Config {
        Config {
            service_dir: root.to_path_buf(),
            settle: Duration::from_millis(100),
            restart_wait: Duration::from_millis(20),
            logger_bin: script(logs, "logger", "#!/bin/sh\nexec cat >> \"$2/log\"\n"),
            logger_grace: Duration::from_millis(300),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn discovers_registers_and_starts_new_services() {
        let root = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();
        install(root.path(), "svc-a", "#!/bin/sh\nexec sleep 30\n");
        std::fs::create_dir_all(root.path().join(".hidden")).unwrap();

        let ctx = context(cfg(root.path(), logs.path()));
        let mut events = ctx.bus.subscribe();
        let token = CancellationToken::new();
        let rec = Reconciler::new(ctx.clone());

        rec.tick(&token).await;
        assert!(ctx.registry.contains("svc-a").await.unwrap());
        assert!(!ctx.registry.contains(".hidden").await.unwrap());
        assert_eq!(ctx.running.phase("svc-a").await, Some(Phase::Pending));

        wait_for(&mut events, |e| {
            e.kind == EventKind::ServiceStarted && e.is_for("svc-a")
        })
        .await;

        // A second pass only confirms liveness.
        rec.tick(&token).await;
        wait_for(&mut events, |e| e.kind == EventKind::ServiceAlive).await;
        assert_eq!(ctx.running.names().await, vec!["svc-a".to_string()]);

        token.cancel();
        let svc = ctx.running.get("svc-a").await.unwrap();
        for mut s in ctx.running.evict_all().await {
            if let Some(join) = s.take_join() {
                join.await.unwrap();
            }
        }
        assert!(svc.process().await.is_none());
    }

    #[tokio::test]
    async fn removed_directory_evicts_the_service() {
        let root = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();
        install(root.path(), "svc-a", "#!/bin/sh\nexec sleep 30\n");

        let ctx = context(cfg(root.path(), logs.path()));
        let mut events = ctx.bus.subscribe();
        let token = CancellationToken::new();
        let rec = Reconciler::new(ctx.clone());

        rec.tick(&token).await;
        wait_for(&mut events, |e| e.kind == EventKind::ServiceStarted).await;
        let svc = ctx.running.get("svc-a").await.unwrap();

        std::fs::remove_dir_all(root.path().join("svc-a")).unwrap();
        rec.tick(&token).await;
        wait_for(&mut events, |e| e.kind == EventKind::ServiceEvicted).await;
        assert!(!ctx.running.contains("svc-a").await);

        wait_for(&mut events, |e| {
            e.kind == EventKind::ServiceExited && e.is_for("svc-a")
        })
        .await;
        assert!(svc.process().await.is_none());
        // The registry keeps the entry.
        assert!(ctx.registry.contains("svc-a").await.unwrap());
    }

    #[tokio::test]
    async fn service_gone_during_settle_is_not_started() {
        let root = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();
        install(root.path(), "svc-a", "#!/bin/sh\nexit 0\n");

        let ctx = context(cfg(root.path(), logs.path()));
        let mut events = ctx.bus.subscribe();
        let rec = Reconciler::new(ctx.clone());

        rec.tick(&CancellationToken::new()).await;
        std::fs::remove_dir_all(root.path().join("svc-a")).unwrap();

        let aborted = wait_for(&mut events, |e| e.kind == EventKind::StartAborted).await;
        assert_eq!(aborted.reason.as_deref(), Some("removed from disk"));
        assert!(!ctx.running.contains("svc-a").await);
    }

    #[tokio::test]
    async fn entry_recorded_under_an_old_root_starts_from_the_current_one() {
        let root = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();
        install(root.path(), "svc-a", "#!/bin/sh\nexec sleep 30\n");

        let ctx = context(cfg(root.path(), logs.path()));
        let seeded: BTreeSet<String> = ["svc-a".to_string()].into();
        ctx.registry
            .create_missing(&seeded, Path::new("/old-root"))
            .await
            .unwrap();
        let mut events = ctx.bus.subscribe();
        let token = CancellationToken::new();

        Reconciler::new(ctx.clone()).tick(&token).await;
        let outcome = wait_for(&mut events, |e| {
            matches!(e.kind, EventKind::ServiceStarted | EventKind::ServiceStartFailed)
        })
        .await;
        assert_eq!(outcome.kind, EventKind::ServiceStarted);
        let svc = ctx.running.get("svc-a").await.unwrap();
        assert_eq!(svc.path(), root.path().join("svc-a"));
        // The stored entry itself is left alone.
        let stored = ctx.registry.services().await.unwrap();
        assert_eq!(stored["svc-a"].path, Path::new("/old-root/svc-a"));

        token.cancel();
        for mut s in ctx.running.evict_all().await {
            if let Some(join) = s.take_join() {
                join.await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn idle_service_is_relaunched_with_its_counter() {
        let root = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();
        let dir = root.path().join("svc-a");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("run"), "#!/bin/sh\nexec sleep 30\n").unwrap();

        let ctx = context(cfg(root.path(), logs.path()));
        let mut events = ctx.bus.subscribe();
        let token = CancellationToken::new();
        let rec = Reconciler::new(ctx.clone());

        rec.tick(&token).await;
        wait_for(&mut events, |e| e.kind == EventKind::ServiceStartFailed).await;
        for _ in 0..100 {
            if ctx.running.phase("svc-a").await == Some(Phase::Idle) {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(ctx.running.phase("svc-a").await, Some(Phase::Idle));

        std::fs::set_permissions(dir.join("run"), std::fs::Permissions::from_mode(0o755)).unwrap();
        rec.tick(&token).await;
        let started = wait_for(&mut events, |e| e.kind == EventKind::ServiceStarted).await;
        assert_eq!(started.attempt, Some(2));

        token.cancel();
        for mut s in ctx.running.evict_all().await {
            if let Some(join) = s.take_join() {
                join.await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn unreadable_root_skips_the_tick() {
        let root = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();
        let mut config = cfg(root.path(), logs.path());
        config.service_dir = root.path().join("missing");

        let ctx = context(config);
        let mut events = ctx.bus.subscribe();
        Reconciler::new(ctx.clone())
            .tick(&CancellationToken::new())
            .await;

        let started = wait_for(&mut events, |e| e.kind == EventKind::ScanStarted).await;
        assert_eq!(
            started.reason.as_deref(),
            Some(root.path().join("missing").display().to_string().as_str())
        );
        wait_for(&mut events, |e| e.kind == EventKind::ScanFailed).await;
        assert!(ctx.registry.services().await.unwrap().is_empty());
    }
}
