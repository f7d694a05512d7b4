//! Durable backing for the giveaway store.
//!
//! The store always hands over the full collection; implementations replace
//! the previous snapshot atomically so a crash mid-write leaves the last good
//! copy readable.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{AppError, AppResult};
use crate::models::GiveawayRecord;

const SNAPSHOT_VERSION: u32 = 1;

#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// 读取全部记录；快照不存在时返回空列表
    async fn load(&self) -> AppResult<Vec<GiveawayRecord>>;

    /// 用给定集合整体替换持久化快照
    async fn replace(&self, records: &[GiveawayRecord]) -> AppResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    giveaways: Vec<GiveawayRecord>,
}

/// JSON 文件快照: 每次写入用独立的临时文件，fsync 后原子 rename
pub struct JsonFileStorage {
    path: PathBuf,
    next_seq: AtomicU64,
    // 已落盘的最大写入序号；阻塞线程在整个 写→fsync→rename 期间持有它
    written: Arc<Mutex<u64>>,
}

impl JsonFileStorage {
    /// Prepares the parent directory and removes temp files left by an
    /// interrupted write.
    pub async fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                AppError::PersistenceFailure(format!(
                    "Failed to create snapshot directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let storage = Self {
            path,
            next_seq: AtomicU64::new(0),
            written: Arc::new(Mutex::new(0)),
        };
        storage.recover_interrupted_writes().await;
        Ok(storage)
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".to_string())
    }

    fn tmp_path(&self, seq: u64) -> PathBuf {
        self.path
            .with_file_name(format!("{}.{seq}.tmp", self.file_name()))
    }

    fn is_tmp_name(&self, name: &str) -> bool {
        name.starts_with(&format!("{}.", self.file_name())) && name.ends_with(".tmp")
    }

    async fn recover_interrupted_writes(&self) {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let Ok(mut entries) = fs::read_dir(&dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.is_tmp_name(&name) {
                log::warn!("Removing interrupted snapshot write: {}", entry.path().display());
                let _ = fs::remove_file(entry.path()).await;
            }
        }
    }
}

/// Publishes `content` at `path` unless a newer write (higher `seq`) already
/// landed. Returns whether this write was published.
///
/// The caller may stop waiting (write timeout) while this keeps running on the
/// blocking pool; holding `written` for the whole sequence means a later write
/// cannot start until the abandoned one is done, and can never be overwritten
/// by it.
fn write_snapshot_file(
    written: &Mutex<u64>,
    seq: u64,
    path: &Path,
    tmp_path: &Path,
    content: &[u8],
) -> std::io::Result<bool> {
    let mut last = written.lock().unwrap_or_else(|e| e.into_inner());
    if *last > seq {
        return Ok(false);
    }

    if let Err(e) = write_and_rename(path, tmp_path, content) {
        let _ = std::fs::remove_file(tmp_path);
        return Err(e);
    }
    *last = seq;
    Ok(true)
}

fn write_and_rename(path: &Path, tmp_path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(tmp_path)?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(tmp_path, path)
}

#[async_trait]
impl SnapshotStorage for JsonFileStorage {
    async fn load(&self) -> AppResult<Vec<GiveawayRecord>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No snapshot at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(AppError::PersistenceFailure(format!(
                    "Failed to read snapshot {}: {e}",
                    self.path.display()
                )));
            }
        };

        let snapshot: SnapshotFile = serde_json::from_str(&content)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(AppError::PersistenceFailure(format!(
                "Unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot.giveaways)
    }

    async fn replace(&self, records: &[GiveawayRecord]) -> AppResult<()> {
        let snapshot = SnapshotFile {
            version: SNAPSHOT_VERSION,
            giveaways: records.to_vec(),
        };
        let content = serde_json::to_vec_pretty(&snapshot)?;

        // 序号在调用方持有快照锁时分配，顺序与数据新旧一致
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.path.clone();
        let tmp_path = self.tmp_path(seq);
        let written = self.written.clone();

        // 写入、fsync、rename 放到同一个阻塞任务里，避免卡住异步运行时
        let published = tokio::task::spawn_blocking(move || {
            write_snapshot_file(&written, seq, &path, &tmp_path, &content)
        })
        .await
        .map_err(|e| AppError::PersistenceFailure(format!("Snapshot write task failed: {e}")))?
        .map_err(|e| {
            AppError::PersistenceFailure(format!(
                "Failed to write snapshot {}: {e}",
                self.path.display()
            ))
        })?;

        if published {
            log::debug!(
                "Snapshot written: {} ({} giveaways)",
                self.path.display(),
                records.len()
            );
        } else {
            log::debug!("Snapshot write #{seq} superseded by a newer one");
        }
        Ok(())
    }
}

/// In-process storage. Used when no snapshot path is configured and in tests,
/// where write failures can be switched on.
#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<Vec<GiveawayRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 当前已"落盘"的记录
    pub fn stored(&self) -> Vec<GiveawayRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl SnapshotStorage for MemoryStorage {
    async fn load(&self) -> AppResult<Vec<GiveawayRecord>> {
        Ok(self.stored())
    }

    async fn replace(&self, records: &[GiveawayRecord]) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::PersistenceFailure(
                "memory storage rejected write".into(),
            ));
        }
        *self.records.lock().unwrap_or_else(|e| e.into_inner()) = records.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GiveawayState;
    use chrono::{Duration, Utc};
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn sample(prize: &str) -> GiveawayRecord {
        let now = Utc::now();
        GiveawayRecord {
            id: Uuid::new_v4(),
            scope_id: "guild-1".into(),
            prize: prize.into(),
            winner_count: 2,
            required_eligibility_id: Some("role-9".into()),
            host_id: None,
            created_at: now,
            ends_at: now + Duration::hours(1),
            participants: BTreeSet::from(["a".to_string(), "b".to_string()]),
            state: GiveawayState::Active,
            winners: vec![],
            reroll_count: 0,
            closing_since: None,
            ended_at: None,
        }
    }

    #[tokio::test]
    async fn test_json_file_missing_snapshot_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::open(dir.path().join("giveaways.json"))
            .await
            .unwrap();
        assert!(storage.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_file_replace_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::open(dir.path().join("nested/giveaways.json"))
            .await
            .unwrap();

        storage
            .replace(&[sample("first"), sample("second")])
            .await
            .unwrap();
        let only = sample("third");
        storage.replace(std::slice::from_ref(&only)).await.unwrap();

        let loaded = storage.load().await.unwrap();
        assert_eq!(loaded, vec![only]);
        assert!(!storage.tmp_path(1).exists());
        assert!(!storage.tmp_path(2).exists());
    }

    #[tokio::test]
    async fn test_json_file_removes_stale_tmp_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("giveaways.json");
        std::fs::write(dir.path().join("giveaways.json.7.tmp"), b"{ half written").unwrap();
        std::fs::write(dir.path().join("other.json"), b"{}").unwrap();

        let storage = JsonFileStorage::open(&path).await.unwrap();
        assert!(!dir.path().join("giveaways.json.7.tmp").exists());
        assert!(dir.path().join("other.json").exists());
        assert!(storage.load().await.unwrap().is_empty());
    }

    #[test]
    fn test_older_write_never_replaces_newer_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("giveaways.json");
        let written = Mutex::new(0);

        // 第 2 次写入先完成，迟到的第 1 次写入必须被丢弃
        assert!(write_snapshot_file(&written, 2, &path, &dir.path().join("g.2.tmp"), b"new").unwrap());
        assert!(!write_snapshot_file(&written, 1, &path, &dir.path().join("g.1.tmp"), b"old").unwrap());

        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert!(!dir.path().join("g.1.tmp").exists());
        assert!(!dir.path().join("g.2.tmp").exists());
    }

    #[tokio::test]
    async fn test_abandoned_write_does_not_corrupt_next_one() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::open(dir.path().join("giveaways.json"))
            .await
            .unwrap();

        let first = [sample("first")];
        let _ = tokio::time::timeout(std::time::Duration::ZERO, storage.replace(&first)).await;

        let second = sample("second");
        storage.replace(std::slice::from_ref(&second)).await.unwrap();
        // 让被放弃的阻塞任务跑完
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        assert_eq!(storage.load().await.unwrap(), vec![second]);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name != "giveaways.json")
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[tokio::test]
    async fn test_memory_storage_write_failure_keeps_old_copy() {
        let storage = MemoryStorage::new();
        storage.replace(&[sample("kept")]).await.unwrap();

        storage.set_fail_writes(true);
        assert!(storage.replace(&[]).await.is_err());
        assert_eq!(storage.stored().len(), 1);
    }
}
