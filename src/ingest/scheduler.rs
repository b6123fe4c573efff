// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::reconcile::Reconciler;

#[derive(Clone, Copy, Debug)]
pub struct SchedulerCfg {
    pub interval_secs: u64,
}

/// Run a cycle immediately, then every `interval_secs`. A failed cycle is
/// logged and the loop keeps going. Ticks that fall due while a cycle is
/// still running are skipped, not queued.
pub fn spawn_scheduler(cfg: SchedulerCfg, reconciler: Arc<Reconciler>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match reconciler.run_cycle().await {
                Ok(report) => tracing::info!(
                    target: "ingest",
                    added = report.added,
                    reactivated = report.reactivated,
                    removed = report.removed,
                    "scheduled cycle done"
                ),
                Err(e) => tracing::warn!(target: "ingest", error = %e, "scheduled cycle failed"),
            }
        }
    })
}
