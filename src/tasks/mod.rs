//! Background tasks for the giveaway engine.
//!
//! Two long-running jobs: the scheduler loop (closing expired giveaways, stuck
//! closure retries, snapshot re-flush, pruning) and the entry event consumer.
//! Call `spawn_all` once during startup, after the store has been loaded.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::EntryEvent;
use crate::services::{EntryTracker, GiveawayScheduler};

pub struct BackgroundTasks {
    pub scheduler: JoinHandle<()>,
    pub entry_consumer: JoinHandle<()>,
}

impl BackgroundTasks {
    pub fn abort(&self) {
        self.scheduler.abort();
        self.entry_consumer.abort();
    }
}

/// Spawn all background tasks.
///
/// Notes
/// - The scheduler runs its first tick immediately so giveaways that expired
///   while the process was down close without waiting a full interval.
/// - Tasks are detached via `tokio::spawn`; this function does not block.
pub fn spawn_all(
    scheduler: Arc<GiveawayScheduler>,
    tracker: EntryTracker,
    entry_rx: mpsc::Receiver<EntryEvent>,
) -> BackgroundTasks {
    log::info!("Starting giveaway background tasks");
    BackgroundTasks {
        scheduler: scheduler.start(),
        entry_consumer: tracker.spawn_consumer(entry_rx),
    }
}
