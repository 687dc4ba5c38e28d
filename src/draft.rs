//! Debounced persistence of the in-progress cash count.
//!
//! Edits are pushed to a background task that writes the latest snapshot to
//! the local store once the operator pauses typing. A burst of edits inside
//! the debounce window produces a single write.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cash_count::CashCountEntries;
use crate::storage::KeyValueStore;

pub const DRAFT_KEY: &str = "cash_count_draft";
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(800);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashCountDraft {
    #[serde(flatten)]
    pub entries: CashCountEntries,
    pub saved_at: DateTime<Utc>,
}

/// Write `entries` immediately. Storage failures are logged, not raised.
pub fn save_draft(store: &dyn KeyValueStore, entries: &CashCountEntries) {
    let draft = CashCountDraft {
        entries: entries.clone(),
        saved_at: Utc::now(),
    };
    match serde_json::to_string(&draft) {
        Ok(json) => {
            if let Err(e) = store.set(DRAFT_KEY, &json) {
                warn!(error = %e, "failed to save cash count draft");
            } else {
                debug!("cash count draft saved");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize cash count draft"),
    }
}

/// Last saved draft, if one exists and parses.
pub fn restore_draft(store: &dyn KeyValueStore) -> Option<CashCountDraft> {
    let raw = store.get(DRAFT_KEY)?;
    match serde_json::from_str::<CashCountDraft>(&raw) {
        Ok(draft) => Some(draft),
        Err(e) => {
            warn!(error = %e, "discarding unreadable cash count draft");
            clear_draft(store);
            None
        }
    }
}

pub fn clear_draft(store: &dyn KeyValueStore) {
    if let Err(e) = store.delete(DRAFT_KEY) {
        warn!(error = %e, "failed to clear cash count draft");
    }
}

/// Handle to the background autosave task.
pub struct DraftAutosaver {
    tx: mpsc::UnboundedSender<CashCountEntries>,
    handle: JoinHandle<()>,
}

impl DraftAutosaver {
    /// Spawn the writer on the current tokio runtime.
    pub fn spawn(store: Arc<dyn KeyValueStore>, debounce: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<CashCountEntries>();
        let handle = tokio::spawn(async move {
            let mut pending: Option<CashCountEntries> = None;
            loop {
                if pending.is_some() {
                    tokio::select! {
                        next = rx.recv() => match next {
                            Some(entries) => pending = Some(entries),
                            None => break,
                        },
                        _ = tokio::time::sleep(debounce) => {
                            if let Some(entries) = pending.take() {
                                save_draft(store.as_ref(), &entries);
                            }
                        }
                    }
                } else {
                    match rx.recv().await {
                        Some(entries) => pending = Some(entries),
                        None => break,
                    }
                }
            }
            if let Some(entries) = pending.take() {
                save_draft(store.as_ref(), &entries);
            }
            info!("cash count autosave stopped");
        });
        Self { tx, handle }
    }

    /// Record a new snapshot; the write happens after the debounce window.
    pub fn notify(&self, entries: &CashCountEntries) {
        if self.tx.send(entries.clone()).is_err() {
            warn!("cash count autosave task is gone; edit not saved");
        }
    }

    /// Stop the task, writing any snapshot still waiting on the timer.
    pub async fn flush(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "cash count autosave task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cash_count::{CashCount, DenominationGroup};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct CountingStore {
        values: Mutex<HashMap<String, String>>,
        writes: AtomicUsize,
        deletes: AtomicUsize,
        fail_deletes: bool,
    }

    impl KeyValueStore for CountingStore {
        fn get(&self, key: &str) -> Option<String> {
            self.values.lock().unwrap().get(key).cloned()
        }
        fn set(&self, key: &str, value: &str) -> Result<(), String> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }
        fn delete(&self, key: &str) -> Result<(), String> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            if self.fail_deletes {
                return Err("store is read-only".into());
            }
            self.values.lock().unwrap().remove(key);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_edits_writes_once() {
        let store = Arc::new(CountingStore::default());
        let saver = DraftAutosaver::spawn(store.clone(), DEFAULT_DEBOUNCE);

        let mut count = CashCount::new();
        for qty in ["1", "12", "120"] {
            count.set(DenominationGroup::Coins, 500, qty).unwrap();
            saver.notify(count.entries());
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);

        let draft = restore_draft(store.as_ref()).expect("draft saved");
        assert_eq!(draft.entries.coins.get("500").map(String::as_str), Some("120"));

        saver.flush().await;
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_writes_pending_snapshot() {
        let store = Arc::new(CountingStore::default());
        let saver = DraftAutosaver::spawn(store.clone(), DEFAULT_DEBOUNCE);

        let mut count = CashCount::new();
        count.set(DenominationGroup::Bills, 20000, "3").unwrap();
        saver.notify(count.entries());
        saver.flush().await;

        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
        let mut restored = CashCount::new();
        restored.load(restore_draft(store.as_ref()).unwrap().entries);
        assert_eq!(restored.totals().total, 60_000);
    }

    #[test]
    fn unreadable_draft_is_discarded() {
        let store = CountingStore::default();
        store.set(DRAFT_KEY, "{not json").unwrap();
        assert!(restore_draft(&store).is_none());
        assert!(store.get(DRAFT_KEY).is_none());
    }

    #[test]
    fn unreadable_draft_survives_failed_delete() {
        let store = CountingStore {
            fail_deletes: true,
            ..CountingStore::default()
        };
        store.set(DRAFT_KEY, "{not json").unwrap();
        assert!(restore_draft(&store).is_none());
        assert_eq!(store.deletes.load(Ordering::SeqCst), 1);
        assert_eq!(store.get(DRAFT_KEY).as_deref(), Some("{not json"));
    }

    #[test]
    fn clear_removes_draft() {
        let store = CountingStore::default();
        save_draft(&store, &CashCount::new().entries().clone());
        assert!(restore_draft(&store).is_some());
        clear_draft(&store);
        assert!(restore_draft(&store).is_none());
    }
}
