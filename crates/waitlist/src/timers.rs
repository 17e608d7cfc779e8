//! Expiration timers for outstanding offers.
//!
//! One sleeping task per offered entry. When the sleep finishes the entry id
//! is sent to the engine's expiry driver, which performs the guarded
//! expire. Timers are only a trigger; the reconciliation sweep covers any
//! that are lost.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use waitlist_core::EntryId;

/// Registry of pending expiration tasks, keyed by entry.
#[derive(Debug, Clone, Default)]
pub struct ExpirationTimers {
    tasks: Arc<Mutex<HashMap<EntryId, JoinHandle<()>>>>,
}

impl ExpirationTimers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `id` into `due` after `after`. Replaces any pending timer for the entry.
    pub async fn schedule(&self, id: EntryId, after: Duration, due: mpsc::UnboundedSender<EntryId>) {
        let fired = id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if due.send(fired.clone()).is_err() {
                tracing::debug!(entry_id = %fired, "Expiry driver gone, dropping timer");
            }
        });

        let previous = self.tasks.lock().await.insert(id, task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Cancel the pending timer for `id`. Returns true if one was pending.
    pub async fn cancel(&self, id: &EntryId) -> bool {
        let task = self.tasks.lock().await.remove(id);
        task.map(|t| t.abort()).is_some()
    }

    pub async fn pending_count(&self) -> usize {
        self.tasks
            .lock()
            .await
            .values()
            .filter(|t| !t.is_finished())
            .count()
    }

    /// Remove handles of timers that already fired.
    pub async fn cleanup_completed(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|_, task| !task.is_finished());
        before.saturating_sub(tasks.len())
    }

    /// Abort every pending timer.
    pub async fn shutdown_all(&self) {
        let mut tasks = self.tasks.lock().await;
        for (_, task) in tasks.drain() {
            task.abort();
        }
    }
}
