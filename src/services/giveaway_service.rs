use std::sync::Arc;

use chrono::Duration;
use tokio::sync::mpsc;

use crate::config::GiveawayConfig;
use crate::error::{AppError, AppResult};
use crate::models::{EntryEvent, GiveawayId, GiveawayRecord, NewGiveaway};
use crate::services::{CloseOutcome, EntryTracker, GiveawayCoordinator, GiveawayStore};
use crate::utils::Clock;

/// Operations the rest of the application calls.
#[derive(Clone)]
pub struct GiveawayService {
    store: Arc<GiveawayStore>,
    tracker: EntryTracker,
    coordinator: GiveawayCoordinator,
    clock: Arc<dyn Clock>,
    entry_tx: mpsc::Sender<EntryEvent>,
    max_duration: Duration,
    max_winners: u32,
}

impl GiveawayService {
    pub fn new(
        store: Arc<GiveawayStore>,
        tracker: EntryTracker,
        coordinator: GiveawayCoordinator,
        clock: Arc<dyn Clock>,
        entry_tx: mpsc::Sender<EntryEvent>,
        config: &GiveawayConfig,
    ) -> Self {
        Self {
            store,
            tracker,
            coordinator,
            clock,
            entry_tx,
            max_duration: config.max_duration(),
            max_winners: config.max_winners,
        }
    }

    /// 创建抽奖，返回的 id 已经持久化
    pub async fn start_giveaway(
        &self,
        scope_id: &str,
        duration: Duration,
        prize: &str,
        winner_count: u32,
        required_eligibility_id: Option<String>,
        host_id: Option<String>,
    ) -> AppResult<GiveawayId> {
        if scope_id.trim().is_empty() {
            return Err(AppError::ValidationError("scope_id is required".into()));
        }
        if prize.trim().is_empty() {
            return Err(AppError::ValidationError("prize is required".into()));
        }
        if duration <= Duration::zero() {
            return Err(AppError::InvalidDuration(
                "duration must be positive".into(),
            ));
        }
        if duration > self.max_duration {
            return Err(AppError::InvalidDuration(format!(
                "duration must not exceed {} seconds",
                self.max_duration.num_seconds()
            )));
        }
        if winner_count < 1 || winner_count > self.max_winners {
            return Err(AppError::InvalidWinnerCount(format!(
                "winner count must be between 1 and {}, got {winner_count}",
                self.max_winners
            )));
        }

        let ends_at = self
            .clock
            .now()
            .checked_add_signed(duration)
            .ok_or_else(|| AppError::InvalidDuration("end time is out of range".into()))?;

        let id = self
            .store
            .create(NewGiveaway {
                scope_id: scope_id.to_string(),
                prize: prize.to_string(),
                winner_count,
                ends_at,
                required_eligibility_id,
                host_id,
            })
            .await?;

        log::info!("Giveaway {id} started in {scope_id} for \"{prize}\" ({winner_count} winner(s))");
        Ok(id)
    }

    /// 提前结束；未找到或已结束时返回 false
    pub async fn end_giveaway(&self, id: &GiveawayId) -> bool {
        match self.try_end_giveaway(id).await {
            Ok(_) => true,
            Err(e) if e.is_state_conflict() || matches!(e, AppError::NotFound(_)) => {
                log::debug!("End giveaway {id} rejected: {e}");
                false
            }
            Err(e) => {
                log::warn!("End of giveaway {id} failed: {e}");
                false
            }
        }
    }

    pub async fn try_end_giveaway(&self, id: &GiveawayId) -> AppResult<CloseOutcome> {
        self.coordinator.close(id).await
    }

    /// 重抽；未找到或未结束时返回 false
    pub async fn reroll_giveaway(&self, id: &GiveawayId, exclude_previous: bool) -> bool {
        match self.try_reroll_giveaway(id, exclude_previous).await {
            Ok(_) => true,
            Err(e) if e.is_state_conflict() || matches!(e, AppError::NotFound(_)) => {
                log::debug!("Reroll of giveaway {id} rejected: {e}");
                false
            }
            Err(e) => {
                log::warn!("Reroll of giveaway {id} failed: {e}");
                false
            }
        }
    }

    pub async fn try_reroll_giveaway(
        &self,
        id: &GiveawayId,
        exclude_previous: bool,
    ) -> AppResult<GiveawayRecord> {
        self.coordinator.reroll(id, exclude_previous).await
    }

    /// Queues an entry event from the inbound notification source. The event
    /// is applied asynchronously by the entry consumer.
    pub async fn on_entry_event(
        &self,
        id: GiveawayId,
        participant_id: &str,
        added: bool,
    ) -> AppResult<()> {
        self.entry_tx
            .send(EntryEvent {
                giveaway_id: id,
                participant_id: participant_id.to_string(),
                added,
            })
            .await
            .map_err(|_| AppError::InternalError("entry event queue is closed".into()))
    }

    pub async fn join(&self, id: &GiveawayId, participant_id: &str) -> AppResult<bool> {
        self.tracker.add_entry(id, participant_id).await
    }

    pub async fn leave(&self, id: &GiveawayId, participant_id: &str) -> AppResult<bool> {
        self.tracker.remove_entry(id, participant_id).await
    }

    pub async fn get_giveaway(&self, id: &GiveawayId) -> AppResult<GiveawayRecord> {
        self.store.get(id).await
    }

    pub async fn list_giveaways(&self, scope_id: Option<&str>) -> Vec<GiveawayRecord> {
        match scope_id {
            Some(scope) => self.store.list_by_scope(scope).await,
            None => self.store.list_all().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStorage;
    use crate::external::{AllowAllGate, LogNotifier};
    use crate::models::GiveawayState;
    use crate::services::WinnerSelector;
    use crate::utils::ManualClock;
    use chrono::Utc;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn service() -> (GiveawayService, mpsc::Receiver<EntryEvent>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(GiveawayStore::new(
            Arc::new(MemoryStorage::new()),
            clock.clone(),
            std::time::Duration::from_secs(1),
        ));
        let tracker = EntryTracker::new(store.clone(), Arc::new(AllowAllGate));
        let coordinator = GiveawayCoordinator::new(
            store.clone(),
            Arc::new(WinnerSelector::with_rng(StdRng::seed_from_u64(21))),
            Arc::new(LogNotifier),
            clock.clone(),
            Duration::seconds(60),
        );
        let (tx, rx) = mpsc::channel(8);
        let svc = GiveawayService::new(
            store,
            tracker,
            coordinator,
            clock.clone(),
            tx,
            &GiveawayConfig::default(),
        );
        (svc, rx, clock)
    }

    #[tokio::test]
    async fn test_start_giveaway_validation() {
        let (svc, _rx, _) = service();

        assert!(matches!(
            svc.start_giveaway("g", Duration::zero(), "prize", 1, None, None)
                .await,
            Err(AppError::InvalidDuration(_))
        ));
        assert!(matches!(
            svc.start_giveaway("g", Duration::days(365), "prize", 1, None, None)
                .await,
            Err(AppError::InvalidDuration(_))
        ));
        assert!(matches!(
            svc.start_giveaway("g", Duration::minutes(1), "prize", 0, None, None)
                .await,
            Err(AppError::InvalidWinnerCount(_))
        ));
        assert!(matches!(
            svc.start_giveaway("g", Duration::minutes(1), "prize", 51, None, None)
                .await,
            Err(AppError::InvalidWinnerCount(_))
        ));
        assert!(svc.list_giveaways(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_end_and_reroll_report_booleans() {
        let (svc, _rx, _) = service();
        let id = svc
            .start_giveaway("g", Duration::minutes(5), "Plush", 1, None, None)
            .await
            .unwrap();
        for who in ["A", "B", "C"] {
            svc.join(&id, who).await.unwrap();
        }

        assert!(!svc.reroll_giveaway(&id, true).await);
        assert!(svc.end_giveaway(&id).await);
        assert!(!svc.end_giveaway(&id).await);
        assert!(!svc.end_giveaway(&uuid::Uuid::new_v4()).await);

        let first = svc.get_giveaway(&id).await.unwrap().winners;
        assert!(svc.reroll_giveaway(&id, true).await);
        let second = svc.get_giveaway(&id).await.unwrap();
        assert_eq!(second.state, GiveawayState::Ended);
        assert_ne!(second.winners, first);
        assert!(!svc.reroll_giveaway(&uuid::Uuid::new_v4(), true).await);
    }

    #[tokio::test]
    async fn test_try_variants_distinguish_unknown_and_wrong_state() {
        let (svc, _rx, _) = service();
        let id = svc
            .start_giveaway("g", Duration::minutes(5), "Plush", 1, None, None)
            .await
            .unwrap();

        assert!(matches!(
            svc.try_end_giveaway(&uuid::Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            svc.try_reroll_giveaway(&id, true).await,
            Err(AppError::InvalidState(_))
        ));
        svc.try_end_giveaway(&id).await.unwrap();
        assert!(matches!(
            svc.try_end_giveaway(&id).await,
            Err(AppError::AlreadyEnded(_))
        ));
    }

    #[tokio::test]
    async fn test_on_entry_event_enqueues() {
        let (svc, mut rx, _) = service();
        let id = uuid::Uuid::new_v4();
        svc.on_entry_event(id, "alice", true).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            EntryEvent {
                giveaway_id: id,
                participant_id: "alice".into(),
                added: true,
            }
        );

        drop(rx);
        assert!(svc.on_entry_event(id, "bob", false).await.is_err());
    }

    #[tokio::test]
    async fn test_list_by_scope() {
        let (svc, _rx, _) = service();
        svc.start_giveaway("guild-a", Duration::minutes(5), "x", 1, None, None)
            .await
            .unwrap();
        svc.start_giveaway("guild-b", Duration::minutes(5), "y", 1, None, None)
            .await
            .unwrap();

        assert_eq!(svc.list_giveaways(Some("guild-a")).await.len(), 1);
        assert_eq!(svc.list_giveaways(None).await.len(), 2);
    }
}
