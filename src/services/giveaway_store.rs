//! Keyed, durable collection of giveaway records.
//!
//! Every record sits behind its own async mutex; `lock`/`with_lock` is the only
//! way to mutate one. A second map holds the last committed copy of each
//! record: reads come from it without touching the per-record locks, and it is
//! what gets written out as the full snapshot.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::database::SnapshotStorage;
use crate::error::{AppError, AppResult};
use crate::models::{GiveawayId, GiveawayRecord, GiveawayState, NewGiveaway};
use crate::utils::Clock;

pub struct GiveawayStore {
    records: RwLock<HashMap<GiveawayId, Arc<Mutex<GiveawayRecord>>>>,
    // 已提交副本；这把锁同时串行化快照写入
    committed: Mutex<HashMap<GiveawayId, GiveawayRecord>>,
    storage: Arc<dyn SnapshotStorage>,
    clock: Arc<dyn Clock>,
    write_timeout: Duration,
    dirty: AtomicBool,
}

/// Exclusive access to one record. Edits go straight to the live record, so
/// the next lock holder sees them; readers (`get`, `list_*`) and the snapshot
/// only see them after `commit` (persist) or `stage` (record without writing).
pub struct RecordGuard<'a> {
    store: &'a GiveawayStore,
    record: OwnedMutexGuard<GiveawayRecord>,
}

impl Deref for RecordGuard<'_> {
    type Target = GiveawayRecord;

    fn deref(&self) -> &Self::Target {
        &self.record
    }
}

impl DerefMut for RecordGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.record
    }
}

impl RecordGuard<'_> {
    pub async fn commit(&self) -> AppResult<()> {
        self.store.persist(&self.record).await
    }

    /// Updates the committed copy without writing; the next successful
    /// snapshot write (or `retry_pending`) carries it to storage.
    pub async fn stage(&self) {
        let mut committed = self.store.committed.lock().await;
        committed.insert(self.record.id, self.record.clone());
        self.store.dirty.store(true, Ordering::SeqCst);
    }
}

impl GiveawayStore {
    pub fn new(
        storage: Arc<dyn SnapshotStorage>,
        clock: Arc<dyn Clock>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            committed: Mutex::new(HashMap::new()),
            storage,
            clock,
            write_timeout,
            dirty: AtomicBool::new(false),
        }
    }

    /// 启动时调用一次：从快照恢复全部记录
    pub async fn load_all(&self) -> AppResult<usize> {
        let loaded = self.storage.load().await?;
        let count = loaded.len();

        let mut committed = self.committed.lock().await;
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        committed.clear();
        records.clear();
        for record in loaded {
            records.insert(record.id, Arc::new(Mutex::new(record.clone())));
            committed.insert(record.id, record);
        }

        log::info!("Loaded {count} giveaways from snapshot");
        Ok(count)
    }

    /// Validates and durably writes a new record. The id is only returned once
    /// the snapshot containing it has been written.
    pub async fn create(&self, new: NewGiveaway) -> AppResult<GiveawayId> {
        if new.winner_count < 1 {
            return Err(AppError::InvalidWinnerCount(format!(
                "winner count must be at least 1, got {}",
                new.winner_count
            )));
        }
        let now = self.clock.now();
        if new.ends_at <= now {
            return Err(AppError::InvalidDuration(
                "giveaway must end in the future".into(),
            ));
        }

        let id = Uuid::new_v4();
        let record = GiveawayRecord {
            id,
            scope_id: new.scope_id,
            prize: new.prize,
            winner_count: new.winner_count,
            required_eligibility_id: new.required_eligibility_id,
            host_id: new.host_id,
            created_at: now,
            ends_at: new.ends_at,
            participants: Default::default(),
            state: GiveawayState::Active,
            winners: Vec::new(),
            reroll_count: 0,
            closing_since: None,
            ended_at: None,
        };

        let mut committed = self.committed.lock().await;
        committed.insert(id, record.clone());
        if let Err(e) = self.write_snapshot(&committed).await {
            committed.remove(&id);
            return Err(e);
        }
        drop(committed);

        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::new(Mutex::new(record)));
        Ok(id)
    }

    pub async fn get(&self, id: &GiveawayId) -> AppResult<GiveawayRecord> {
        self.committed
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or(AppError::NotFound(*id))
    }

    /// 所有未结束的记录（快照，不是实时视图）
    pub async fn list_active(&self) -> Vec<GiveawayRecord> {
        self.list_where(|r| r.state != GiveawayState::Ended).await
    }

    pub async fn list_by_scope(&self, scope_id: &str) -> Vec<GiveawayRecord> {
        self.list_where(|r| r.scope_id == scope_id).await
    }

    pub async fn list_all(&self) -> Vec<GiveawayRecord> {
        self.list_where(|_| true).await
    }

    async fn list_where<F>(&self, pred: F) -> Vec<GiveawayRecord>
    where
        F: Fn(&GiveawayRecord) -> bool,
    {
        let mut list: Vec<GiveawayRecord> = self
            .committed
            .lock()
            .await
            .values()
            .filter(|r| pred(r))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.ends_at.cmp(&b.ends_at).then(a.id.cmp(&b.id)));
        list
    }

    /// Acquires the per-record lock. Different ids never contend.
    pub async fn lock(&self, id: &GiveawayId) -> AppResult<RecordGuard<'_>> {
        let cell = self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or(AppError::NotFound(*id))?;

        let record = cell.clone().lock_owned().await;
        // remove()/load_all() 可能在等锁期间换掉了这条记录
        let current = self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .is_some_and(|c| Arc::ptr_eq(c, &cell));
        if !current {
            return Err(AppError::NotFound(*id));
        }

        Ok(RecordGuard {
            store: self,
            record,
        })
    }

    /// Runs `f` with exclusive access to one record and persists the result if
    /// it changed. If `f` fails, its partial edits are rolled back. A failed
    /// write is logged and left to `retry_pending`.
    pub async fn with_lock<F, T>(&self, id: &GiveawayId, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut GiveawayRecord) -> AppResult<T>,
    {
        let mut guard = self.lock(id).await?;
        let before = guard.clone();
        let out = match f(&mut *guard) {
            Ok(out) => out,
            Err(e) => {
                *guard = before;
                return Err(e);
            }
        };
        if *guard != before
            && let Err(e) = guard.commit().await
        {
            log::warn!("Giveaway {id} changed but snapshot write failed, will retry: {e}");
        }
        Ok(out)
    }

    pub async fn remove(&self, id: &GiveawayId) -> AppResult<GiveawayRecord> {
        // 先拿记录锁，确保没有进行中的修改
        let guard = self.lock(id).await?;
        let removed = guard.clone();

        let mut committed = self.committed.lock().await;
        committed.remove(id);
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        if let Err(e) = self.write_snapshot(&committed).await {
            log::warn!("Giveaway {id} removed but snapshot write failed, will retry: {e}");
        }
        Ok(removed)
    }

    /// Writes the full collection as it stands.
    pub async fn persist_all(&self) -> AppResult<()> {
        let committed = self.committed.lock().await;
        self.write_snapshot(&committed).await
    }

    /// Re-flushes after an earlier failed write. Returns whether a write was
    /// attempted.
    pub async fn retry_pending(&self) -> AppResult<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }
        log::info!("Retrying pending snapshot write");
        self.persist_all().await?;
        Ok(true)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    async fn persist(&self, record: &GiveawayRecord) -> AppResult<()> {
        let mut committed = self.committed.lock().await;
        committed.insert(record.id, record.clone());
        self.write_snapshot(&committed).await
    }

    async fn write_snapshot(&self, committed: &HashMap<GiveawayId, GiveawayRecord>) -> AppResult<()> {
        let mut records: Vec<GiveawayRecord> = committed.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let result = match tokio::time::timeout(self.write_timeout, self.storage.replace(&records))
            .await
        {
            Ok(res) => res,
            Err(_) => Err(AppError::PersistenceFailure(format!(
                "snapshot write timed out after {:?}",
                self.write_timeout
            ))),
        };

        self.dirty.store(result.is_err(), Ordering::SeqCst);
        result
    }
}
