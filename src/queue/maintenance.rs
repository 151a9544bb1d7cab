//! # Queue Maintenance
//!
//! Background passes that keep the queues healthy:
//!
//! - [`LeaseSweeper`] hands expired leases back to the queue (at-least-once delivery).
//! - [`Reconciler`] repairs items and content whose states disagree.
//! - [`MaintenanceRunner`] drives both, plus the position cache refresh, on intervals until
//!   a shutdown signal arrives.

use super::kinds::QueueKind;
use super::store::{QueueStore, StaleLease};
use crate::config::{LeaseConfig, MaintenanceConfig};
use crate::constants::{events, ItemOutcome};
use crate::error::Result;
use crate::logging::{log_error, log_queue_operation};
use crate::models::{ContentRef, QueueItem};
use crate::state_machine::{ContentStatusMachine, ContentTransitionPersistence};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

/// Shortest tick any maintenance loop will use
const MIN_TICK: Duration = Duration::from_millis(100);

/// Requeues items whose worker stopped heart-beating
#[derive(Debug, Clone)]
pub struct LeaseSweeper {
    store: QueueStore,
    lease: LeaseConfig,
}

impl LeaseSweeper {
    pub fn new(store: QueueStore, lease: LeaseConfig) -> Self {
        Self { store, lease }
    }

    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<Vec<StaleLease>> {
        let recovered = self.store.requeue_stale_items(self.lease.timeout()).await?;
        for lease in &recovered {
            warn!(
                item_id = lease.item_id,
                queue_type = %lease.queue_type,
                worker = lease.worker.as_deref().unwrap_or("unknown"),
                leased_since = %lease.leased_since,
                "Stale lease recovered, item back to pending"
            );
        }
        Ok(recovered)
    }
}

/// Rows repaired by one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub scanned: usize,
    /// Content transitions re-driven from a finalized item's outcome
    pub redriven: usize,
    /// Missing follow-up items created
    pub chained_restored: usize,
    /// Active items closed because their content was already decided
    pub closed: usize,
    /// Items the pass could not repair this time
    pub failed: usize,
}

impl ReconcileReport {
    pub fn repaired(&self) -> usize {
        self.redriven + self.chained_restored + self.closed
    }
}

/// Detects and corrects disagreement between queue items and their content
#[derive(Debug, Clone)]
pub struct Reconciler {
    store: QueueStore,
    config: MaintenanceConfig,
}

impl Reconciler {
    pub fn new(store: QueueStore, config: MaintenanceConfig) -> Self {
        Self { store, config }
    }

    /// One pass over recently decided items and over all active items. Both scans page
    /// through their whole range, `reconcile_batch_size` rows at a time.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let batch_size = self.config.reconcile_batch_size.max(1);

        let since = Utc::now() - chrono::Duration::hours(self.config.reconcile_lookback_hours);
        let mut after_id = 0;
        loop {
            let decided = self
                .store
                .list_recently_decided(since, after_id, batch_size)
                .await?;
            for item in &decided {
                report.scanned += 1;
                if let Err(e) = self.repair_decided(item, &mut report).await {
                    report.failed += 1;
                    log_error(
                        "reconciler",
                        "repair_decided",
                        &e.to_string(),
                        Some(&format!("item={}", item.id)),
                    );
                }
            }
            match decided.last() {
                Some(last) if decided.len() as i64 == batch_size => after_id = last.id,
                _ => break,
            }
        }

        let mut after_id = 0;
        loop {
            let active = self.store.list_active(after_id, batch_size).await?;
            for item in &active {
                report.scanned += 1;
                match self.close_if_decided(item).await {
                    Ok(true) => report.closed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        report.failed += 1;
                        log_error(
                            "reconciler",
                            "close_if_decided",
                            &e.to_string(),
                            Some(&format!("item={}", item.id)),
                        );
                    }
                }
            }
            match active.last() {
                Some(last) if active.len() as i64 == batch_size => after_id = last.id,
                _ => break,
            }
        }

        if report.repaired() > 0 {
            info!(?report, "Reconciliation repaired inconsistent rows");
            if let Ok(context) = serde_json::to_value(&report) {
                let _ = self.store.events().publish(events::RECONCILED, context).await;
            }
        } else {
            debug!(scanned = report.scanned, "Reconciliation found nothing to repair");
        }
        Ok(report)
    }

    /// A finalized item whose decision never reached the content (or whose follow-up item
    /// is missing) gets both re-driven in one transaction.
    async fn repair_decided(&self, item: &QueueItem, report: &mut ReconcileReport) -> Result<()> {
        let Some(outcome) = item.outcome.and_then(|o| o.moderation()) else {
            return Ok(());
        };
        let content = ContentRef::new(item.content_type, item.content_pk);
        let now = Utc::now();

        let mut tx = self.store.pool().begin().await?;
        if !QueueStore::confirm_outcome_in(&mut *tx, item.id, ItemOutcome::from(outcome)).await? {
            return Ok(());
        }
        let Some(mut status) =
            ContentTransitionPersistence::current_status(&mut *tx, content.content_type, content.content_pk)
                .await?
        else {
            return Ok(());
        };

        let mut redriven = false;
        if status == ContentStatusMachine::pre_decision_status(item.queue_type)
            && !ContentTransitionPersistence::recorded_for_item(&mut *tx, item.id).await?
        {
            let applied = ContentStatusMachine::apply_decision(
                &mut *tx,
                content,
                item.queue_type,
                outcome,
                item.id,
                item.feedback.as_deref(),
                now,
            )
            .await?;
            status = applied.status;
            redriven = applied.transition.is_some();
        }

        let mut restored = None;
        if let Some(next) = QueueKind::chained_item(item, outcome) {
            if status == ContentStatusMachine::decision_target(item.queue_type, outcome)
                && !QueueStore::has_item_in(&mut *tx, next.queue_type, next.content_pk).await?
            {
                restored = QueueStore::insert_chained(&mut *tx, &next, now).await?;
            }
        }
        tx.commit().await?;

        if redriven {
            report.redriven += 1;
            warn!(
                item_id = item.id,
                queue_type = %item.queue_type,
                status = %status,
                "Re-drove content transition from recorded outcome"
            );
        }
        if let Some(chained_id) = restored {
            report.chained_restored += 1;
            warn!(item_id = item.id, chained_id, "Restored missing follow-up item");
        }
        Ok(())
    }

    /// Close an active item whose content was already decided elsewhere
    async fn close_if_decided(&self, item: &QueueItem) -> Result<bool> {
        let mut conn = self.store.pool().acquire().await?;
        let Some(status) =
            ContentTransitionPersistence::current_status(&mut *conn, item.content_type, item.content_pk)
                .await?
        else {
            return Ok(false);
        };

        let outcome = match ContentStatusMachine::implied_outcome(item.queue_type, status) {
            Some(outcome) => ItemOutcome::from(outcome),
            // Decided along a path this queue can no longer affect
            None if status.is_terminal() => ItemOutcome::Withdrawn,
            None => return Ok(false),
        };

        let closed = QueueStore::close_in(&mut *conn, item.id, outcome, None, Utc::now()).await?;
        if closed {
            log_queue_operation(
                "reconcile_close",
                item.queue_type.as_str(),
                Some(item.id),
                Some(&item.partition_key),
                outcome.terminal_status().as_str(),
                Some(&format!("content already {status}")),
            );
        }
        Ok(closed)
    }
}

/// Totals of one maintenance round
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub leases_recovered: usize,
    pub reconcile: ReconcileReport,
    pub positions_refreshed: u64,
}

/// Runs sweeping, reconciliation and position refresh on their own intervals
#[derive(Debug, Clone)]
pub struct MaintenanceRunner {
    store: QueueStore,
    sweeper: LeaseSweeper,
    reconciler: Reconciler,
    lease: LeaseConfig,
    maintenance: MaintenanceConfig,
}

impl MaintenanceRunner {
    pub fn new(store: QueueStore, lease: LeaseConfig, maintenance: MaintenanceConfig) -> Self {
        Self {
            sweeper: LeaseSweeper::new(store.clone(), lease.clone()),
            reconciler: Reconciler::new(store.clone(), maintenance.clone()),
            store,
            lease,
            maintenance,
        }
    }

    pub fn sweeper(&self) -> &LeaseSweeper {
        &self.sweeper
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Every pass once, in order
    pub async fn run_once(&self) -> Result<MaintenanceReport> {
        let leases_recovered = self.sweeper.sweep().await?.len();
        let reconcile = self.reconciler.reconcile().await?;
        let positions_refreshed = self.store.refresh_all_positions().await?;
        Ok(MaintenanceReport {
            leases_recovered,
            reconcile,
            positions_refreshed,
        })
    }

    /// Loop until `shutdown` turns `true` or its sender is dropped.
    /// A failing pass is logged and retried on its next tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut sweep = tick_every(self.lease.sweep_interval());
        let mut reconcile = tick_every(self.maintenance.reconcile_interval());
        let mut refresh = tick_every(self.maintenance.position_refresh_interval());

        info!(
            sweep_interval = ?self.lease.sweep_interval(),
            reconcile_interval = ?self.maintenance.reconcile_interval(),
            refresh_interval = ?self.maintenance.position_refresh_interval(),
            "Starting maintenance loops"
        );

        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    if let Err(e) = self.sweeper.sweep().await {
                        log_error("maintenance", "sweep", &e.to_string(), None);
                    }
                }
                _ = reconcile.tick() => {
                    if let Err(e) = self.reconciler.reconcile().await {
                        log_error("maintenance", "reconcile", &e.to_string(), None);
                    }
                }
                _ = refresh.tick() => {
                    match self.store.refresh_all_positions().await {
                        Ok(touched) => debug!(touched, "Refreshed cached positions"),
                        Err(e) => log_error("maintenance", "refresh_positions", &e.to_string(), None),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        info!("Maintenance loops stopped");
    }
}

fn tick_every(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period.max(MIN_TICK));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts_repairs_only() {
        let report = ReconcileReport {
            scanned: 10,
            redriven: 1,
            chained_restored: 1,
            closed: 2,
            failed: 3,
        };
        assert_eq!(report.repaired(), 4);
        assert_eq!(ReconcileReport::default().repaired(), 0);
    }

    #[tokio::test]
    async fn test_tick_floor() {
        let mut interval = tick_every(Duration::ZERO);
        assert_eq!(interval.period(), MIN_TICK);
        interval.tick().await;
    }
}
