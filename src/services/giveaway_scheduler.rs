use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::AppError;
use crate::models::{GiveawayId, GiveawayState};
use crate::services::{CloseOutcome, GiveawayCoordinator, GiveawayStore};
use crate::utils::Clock;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    /// Ended giveaways older than this are pruned; `None` keeps them forever.
    pub ended_retention: Option<chrono::Duration>,
    pub close_concurrency: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            ended_retention: Some(chrono::Duration::days(7)),
            close_concurrency: 8,
        }
    }
}

/// 单次 tick 的处理结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// 上一次 tick 仍在运行，本次跳过
    pub skipped: bool,
    pub closed: Vec<GiveawayId>,
    pub deferred: Vec<GiveawayId>,
    pub retried_stuck: usize,
    pub failed: usize,
    pub pruned: usize,
}

/// Periodic driver: closes expired giveaways, retries stuck closures, flushes
/// pending snapshot writes and prunes old results.
pub struct GiveawayScheduler {
    store: Arc<GiveawayStore>,
    coordinator: GiveawayCoordinator,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
    running: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl GiveawayScheduler {
    pub fn new(
        store: Arc<GiveawayStore>,
        coordinator: GiveawayCoordinator,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            coordinator,
            clock,
            settings,
            running: AtomicBool::new(false),
        }
    }

    /// Runs one tick immediately (startup reconciliation), then one per
    /// interval. Ticks that would overlap a slow one are skipped.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.settings.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval 的第一次 tick 立即完成，正好作为启动补偿
            loop {
                interval.tick().await;
                let report = self.tick().await;
                if !report.closed.is_empty() || report.failed > 0 || report.pruned > 0 {
                    log::info!(
                        "Giveaway tick: closed={}, deferred={}, stuck_retried={}, failed={}, pruned={}",
                        report.closed.len(),
                        report.deferred.len(),
                        report.retried_stuck,
                        report.failed,
                        report.pruned
                    );
                }
            }
        })
    }

    pub async fn tick(&self) -> TickReport {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("Previous giveaway tick still running, skipping");
            return TickReport {
                skipped: true,
                ..Default::default()
            };
        }
        let _running = RunningGuard(&self.running);

        let mut report = TickReport::default();
        let now = self.clock.now();
        let closing_timeout = self.coordinator.closing_timeout();

        // 先到期的先处理
        let mut due = Vec::new();
        for record in self.store.list_active().await {
            match record.state {
                GiveawayState::Active if record.is_expired(now) => due.push(record.id),
                GiveawayState::Closing if record.is_stuck_closing(now, closing_timeout) => {
                    report.retried_stuck += 1;
                    due.push(record.id);
                }
                _ => {}
            }
        }

        let results: Vec<_> = stream::iter(due)
            .map(|id| async move { (id, self.coordinator.close(&id).await) })
            .buffered(self.settings.close_concurrency.max(1))
            .collect()
            .await;

        for (id, result) in results {
            match result {
                Ok(CloseOutcome::Ended(_)) => report.closed.push(id),
                Ok(CloseOutcome::Deferred(_)) => report.deferred.push(id),
                // 手动结束抢先了
                Err(AppError::AlreadyEnded(_)) | Err(AppError::NotFound(_)) => {}
                Err(e) => {
                    report.failed += 1;
                    log::error!("Failed to close giveaway {id}: {e:?}");
                }
            }
        }

        if let Err(e) = self.store.retry_pending().await {
            log::error!("Pending snapshot write failed again: {e:?}");
        }

        report.pruned = self.prune_ended(now).await;
        report
    }

    async fn prune_ended(&self, now: chrono::DateTime<chrono::Utc>) -> usize {
        let Some(retention) = self.settings.ended_retention else {
            return 0;
        };

        let mut pruned = 0;
        for record in self.store.list_all().await {
            let expired = record.state == GiveawayState::Ended
                && record
                    .ended_at
                    .map(|at| now - at >= retention)
                    .unwrap_or(false);
            if !expired {
                continue;
            }
            match self.store.remove(&record.id).await {
                Ok(_) => {
                    pruned += 1;
                    log::debug!("Pruned ended giveaway {}", record.id);
                }
                Err(e) => log::warn!("Failed to prune giveaway {}: {e:?}", record.id),
            }
        }
        pruned
    }
}
