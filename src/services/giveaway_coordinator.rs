//! Close / reroll state machine.
//!
//! Transitions: `Active -> Closing -> Ended`, all under the per-record lock, so
//! a manual end and a scheduler-triggered close on the same giveaway can race
//! safely: exactly one of them observes `Active`.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::external::ResultNotifier;
use crate::models::{GiveawayId, GiveawayRecord, GiveawayState};
use crate::services::{GiveawayStore, WinnerSelector};
use crate::utils::Clock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// 已结束并写入快照
    Ended(GiveawayRecord),
    /// 快照写入失败，记录停留在 Closing，等待调度器重试
    Deferred(GiveawayId),
}

#[derive(Clone)]
pub struct GiveawayCoordinator {
    store: Arc<GiveawayStore>,
    selector: Arc<WinnerSelector>,
    notifier: Arc<dyn ResultNotifier>,
    clock: Arc<dyn Clock>,
    closing_timeout: chrono::Duration,
}

impl GiveawayCoordinator {
    pub fn new(
        store: Arc<GiveawayStore>,
        selector: Arc<WinnerSelector>,
        notifier: Arc<dyn ResultNotifier>,
        clock: Arc<dyn Clock>,
        closing_timeout: chrono::Duration,
    ) -> Self {
        Self {
            store,
            selector,
            notifier,
            clock,
            closing_timeout,
        }
    }

    pub fn closing_timeout(&self) -> chrono::Duration {
        self.closing_timeout
    }

    /// Closes a giveaway and draws its winners.
    ///
    /// - `Active`: proceeds.
    /// - `Closing` past the stuck timeout: retries an interrupted closure.
    /// - `Closing` within the timeout, or `Ended`: `AlreadyEnded`.
    pub async fn close(&self, id: &GiveawayId) -> AppResult<CloseOutcome> {
        let ended = {
            let mut guard = self.store.lock(id).await?;
            let now = self.clock.now();

            match guard.state {
                GiveawayState::Active => {}
                GiveawayState::Closing if guard.is_stuck_closing(now, self.closing_timeout) => {
                    log::warn!("Retrying stuck closure of giveaway {id}");
                }
                GiveawayState::Closing | GiveawayState::Ended => {
                    return Err(AppError::AlreadyEnded(*id));
                }
            }

            let closing_since = match guard.state {
                GiveawayState::Closing => guard.closing_since.unwrap_or(now),
                _ => now,
            };
            guard.state = GiveawayState::Closing;
            guard.closing_since = Some(closing_since);
            guard.winners.clear();

            let winners = self
                .selector
                .select(&guard.participants, guard.winner_count, &HashSet::new());

            let mut ended = guard.clone();
            ended.winners = winners;
            ended.state = GiveawayState::Ended;
            ended.ended_at = Some(now);

            // 先写一份 Ended 副本；成功后才替换内存中的记录
            let mut staged = std::mem::replace(&mut *guard, ended);
            match guard.commit().await {
                Ok(()) => guard.clone(),
                Err(e) => {
                    log::error!("Failed to persist closure of giveaway {id}, will retry: {e}");
                    std::mem::swap(&mut *guard, &mut staged);
                    guard.stage().await;
                    return Ok(CloseOutcome::Deferred(*id));
                }
            }
        };

        log::info!(
            "Giveaway {} closed with {} winner(s) from {} participant(s)",
            ended.id,
            ended.winners.len(),
            ended.participants.len()
        );
        self.announce(&ended).await;
        Ok(CloseOutcome::Ended(ended))
    }

    /// 重新抽奖；默认排除上一轮中奖者
    pub async fn reroll(
        &self,
        id: &GiveawayId,
        exclude_previous: bool,
    ) -> AppResult<GiveawayRecord> {
        let rerolled = {
            let mut guard = self.store.lock(id).await?;
            if guard.state != GiveawayState::Ended {
                return Err(AppError::InvalidState(format!(
                    "giveaway {id} has not ended yet"
                )));
            }

            let exclude: HashSet<String> = if exclude_previous {
                guard.winners.iter().cloned().collect()
            } else {
                HashSet::new()
            };
            let winners = self
                .selector
                .select(&guard.participants, guard.winner_count, &exclude);

            guard.winners = winners;
            guard.reroll_count += 1;
            if let Err(e) = guard.commit().await {
                log::warn!("Reroll of giveaway {id} not persisted yet, will retry: {e}");
            }
            guard.clone()
        };

        log::info!(
            "Giveaway {} rerolled (round {}), {} winner(s)",
            rerolled.id,
            rerolled.reroll_count,
            rerolled.winners.len()
        );
        self.announce(&rerolled).await;
        Ok(rerolled)
    }

    async fn announce(&self, record: &GiveawayRecord) {
        if let Err(e) = self.notifier.announce(record, &record.winners).await {
            log::error!("Failed to announce result of giveaway {}: {e:?}", record.id);
        }
    }
}
