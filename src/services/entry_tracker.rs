use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{AppError, AppResult};
use crate::external::EligibilityGate;
use crate::models::{EntryEvent, GiveawayId, GiveawayRecord};
use crate::services::GiveawayStore;

/// Applies entry and withdrawal events to a single giveaway.
#[derive(Clone)]
pub struct EntryTracker {
    store: Arc<GiveawayStore>,
    gate: Arc<dyn EligibilityGate>,
}

impl EntryTracker {
    pub fn new(store: Arc<GiveawayStore>, gate: Arc<dyn EligibilityGate>) -> Self {
        Self { store, gate }
    }

    /// 加入抽奖；重复加入不报错。返回参与者列表是否变化。
    ///
    /// 门槛检查可能走网络，放在锁外做；拿到锁后再确认一次状态。
    pub async fn add_entry(&self, id: &GiveawayId, participant_id: &str) -> AppResult<bool> {
        let snapshot = self.store.get(id).await?;
        ensure_active(&snapshot)?;

        if let Some(required) = snapshot.required_eligibility_id.as_deref()
            && !self
                .gate
                .satisfies(&snapshot.scope_id, participant_id, required)
                .await
        {
            return Err(AppError::NotEligible {
                participant_id: participant_id.to_string(),
            });
        }

        let inserted = self
            .store
            .with_lock(id, |record| {
                ensure_active(record)?;
                Ok(record.participants.insert(participant_id.to_string()))
            })
            .await?;

        if inserted {
            log::debug!("Participant {participant_id} entered giveaway {id}");
        }
        Ok(inserted)
    }

    /// 退出抽奖；不在列表中时为 no-op
    pub async fn remove_entry(&self, id: &GiveawayId, participant_id: &str) -> AppResult<bool> {
        let removed = self
            .store
            .with_lock(id, |record| {
                ensure_active(record)?;
                Ok(record.participants.remove(participant_id))
            })
            .await?;

        if removed {
            log::debug!("Participant {participant_id} left giveaway {id}");
        }
        Ok(removed)
    }

    pub async fn apply(&self, event: &EntryEvent) -> AppResult<bool> {
        if event.added {
            self.add_entry(&event.giveaway_id, &event.participant_id)
                .await
        } else {
            self.remove_entry(&event.giveaway_id, &event.participant_id)
                .await
        }
    }

    /// Consumes inbound entry events until every sender is dropped. Each
    /// event is handled on its own; a rejected one is logged and skipped.
    pub fn spawn_consumer(self, mut rx: mpsc::Receiver<EntryEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match self.apply(&event).await {
                    Ok(_) => {}
                    Err(e @ (AppError::NotEligible { .. } | AppError::AlreadyEnded(_))) => {
                        log::info!(
                            "Entry event for giveaway {} by {} ignored: {e}",
                            event.giveaway_id,
                            event.participant_id
                        );
                    }
                    Err(e) => {
                        log::warn!(
                            "Failed to apply entry event for giveaway {}: {e:?}",
                            event.giveaway_id
                        );
                    }
                }
            }
            log::info!("Entry event channel closed, consumer stopped");
        })
    }
}

fn ensure_active(record: &GiveawayRecord) -> AppResult<()> {
    if record.is_active() {
        Ok(())
    } else {
        Err(AppError::AlreadyEnded(record.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStorage;
    use crate::external::AllowAllGate;
    use crate::models::{GiveawayState, NewGiveaway};
    use crate::utils::{Clock, ManualClock};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;

    /// 只允许名单中的参与者
    struct ListGate(Vec<&'static str>);

    #[async_trait]
    impl EligibilityGate for ListGate {
        async fn satisfies(&self, _scope: &str, participant_id: &str, _required: &str) -> bool {
            self.0.iter().any(|p| *p == participant_id)
        }
    }

    async fn setup(
        gate: Arc<dyn EligibilityGate>,
        required: Option<&str>,
    ) -> (Arc<GiveawayStore>, EntryTracker, GiveawayId) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(GiveawayStore::new(
            Arc::new(MemoryStorage::new()),
            clock.clone(),
            Duration::from_secs(1),
        ));
        let id = store
            .create(NewGiveaway {
                scope_id: "guild-1".into(),
                prize: "Keyboard".into(),
                winner_count: 1,
                ends_at: clock.now() + chrono::Duration::minutes(10),
                required_eligibility_id: required.map(str::to_string),
                host_id: None,
            })
            .await
            .unwrap();
        let tracker = EntryTracker::new(store.clone(), gate);
        (store, tracker, id)
    }

    #[tokio::test]
    async fn test_add_entry_is_idempotent() {
        let (store, tracker, id) = setup(Arc::new(AllowAllGate), None).await;

        assert!(tracker.add_entry(&id, "alice").await.unwrap());
        assert!(!tracker.add_entry(&id, "alice").await.unwrap());

        let record = store.get(&id).await.unwrap();
        assert_eq!(record.participants.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_entry_missing_is_noop() {
        let (store, tracker, id) = setup(Arc::new(AllowAllGate), None).await;

        tracker.add_entry(&id, "alice").await.unwrap();
        assert!(!tracker.remove_entry(&id, "bob").await.unwrap());
        assert!(tracker.remove_entry(&id, "alice").await.unwrap());
        assert!(store.get(&id).await.unwrap().participants.is_empty());
    }

    #[tokio::test]
    async fn test_gate_rejects_ineligible_participant() {
        let (store, tracker, id) = setup(Arc::new(ListGate(vec!["alice"])), Some("role-r")).await;

        assert!(tracker.add_entry(&id, "alice").await.unwrap());
        let err = tracker.add_entry(&id, "mallory").await.unwrap_err();
        assert!(matches!(err, AppError::NotEligible { ref participant_id } if participant_id == "mallory"));

        let participants = store.get(&id).await.unwrap().participants;
        assert_eq!(participants.len(), 1);
        assert!(participants.contains("alice"));
    }

    #[tokio::test]
    async fn test_gate_ignored_without_requirement() {
        let (_, tracker, id) = setup(Arc::new(ListGate(vec![])), None).await;
        assert!(tracker.add_entry(&id, "anyone").await.unwrap());
    }

    #[tokio::test]
    async fn test_entries_rejected_once_not_active() {
        let (store, tracker, id) = setup(Arc::new(AllowAllGate), None).await;
        tracker.add_entry(&id, "alice").await.unwrap();
        {
            let mut guard = store.lock(&id).await.unwrap();
            guard.state = GiveawayState::Ended;
            guard.commit().await.unwrap();
        }

        assert!(matches!(
            tracker.add_entry(&id, "bob").await,
            Err(AppError::AlreadyEnded(_))
        ));
        assert!(matches!(
            tracker.remove_entry(&id, "alice").await,
            Err(AppError::AlreadyEnded(_))
        ));
        assert!(store.get(&id).await.unwrap().participants.contains("alice"));
    }

    #[tokio::test]
    async fn test_unknown_giveaway() {
        let (_, tracker, _) = setup(Arc::new(AllowAllGate), None).await;
        let missing = uuid::Uuid::new_v4();
        assert!(matches!(
            tracker.add_entry(&missing, "alice").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            tracker.remove_entry(&missing, "alice").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_consumer_applies_events_in_order() {
        let (store, tracker, id) = setup(Arc::new(AllowAllGate), None).await;
        let (tx, rx) = mpsc::channel(16);
        let handle = tracker.spawn_consumer(rx);

        for (who, added) in [("a", true), ("b", true), ("a", false), ("c", true)] {
            tx.send(EntryEvent {
                giveaway_id: id,
                participant_id: who.into(),
                added,
            })
            .await
            .unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let participants: Vec<_> = store
            .get(&id)
            .await
            .unwrap()
            .participants
            .into_iter()
            .collect();
        assert_eq!(participants, vec!["b".to_string(), "c".to_string()]);
    }
}
