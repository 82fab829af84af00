use std::sync::Arc;

use lesson_core::model::{FeedbackEntry, FeedbackLedger, QuestionId, Session, SessionId};
use storage::repository::KeyValueStore;

use crate::error::LedgerError;

/// Store key holding the ledger snapshot of one session.
#[must_use]
pub fn ledger_key(session_id: &SessionId) -> String {
    format!("lesson-ledger:{session_id}")
}

/// Durable, deduplicated feedback record for the loaded session.
///
/// Every mutation is written through to the store before the call returns.
/// Store failures are logged and never surface to the caller: a failed write
/// clears the stored key and switches the service to memory-only mode until
/// the next `load`.
pub struct FeedbackLedgerService {
    store: Arc<dyn KeyValueStore>,
    ledger: Option<FeedbackLedger>,
    memory_only: bool,
}

impl FeedbackLedgerService {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            ledger: None,
            memory_only: false,
        }
    }

    /// Load the ledger for `session`, reconciling any stored copy.
    ///
    /// A missing, unreadable or foreign record yields a fresh ledger which is
    /// persisted immediately.
    pub async fn load(&mut self, session: &Session) -> &FeedbackLedger {
        self.memory_only = false;
        let key = ledger_key(&session.id);

        let stored = match self.store.get(&key).await {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!(%key, %err, "failed to read stored ledger; starting fresh");
                None
            }
        };

        let reconciled = stored.and_then(|raw| {
            match FeedbackLedger::reconcile_str(&raw, session.question_count()) {
                Ok((ledger, _)) if ledger.session_id() != &session.id => {
                    tracing::warn!(
                        %key,
                        stored = %ledger.session_id(),
                        "stored ledger belongs to another session; starting fresh"
                    );
                    None
                }
                Ok(found) => Some(found),
                Err(err) => {
                    tracing::warn!(%key, %err, "stored ledger is corrupt; starting fresh");
                    None
                }
            }
        });

        match reconciled {
            Some((ledger, report)) => {
                tracing::info!(
                    session = %session.id,
                    answered = ledger.answered_questions(),
                    total = ledger.total_questions(),
                    duplicates = report.duplicates_dropped,
                    backfilled = report.hint_backfilled,
                    total_repaired = report.total_repaired,
                    "reconciled feedback ledger"
                );
                let repaired = !report.is_clean();
                self.ledger = Some(ledger);
                if repaired {
                    self.persist().await;
                }
            }
            None => {
                tracing::info!(
                    session = %session.id,
                    total = session.question_count(),
                    "created feedback ledger"
                );
                self.ledger = Some(FeedbackLedger::fresh(session));
                self.persist().await;
            }
        }

        self.ledger.get_or_insert_with(|| FeedbackLedger::fresh(session))
    }

    /// Upsert the entry for its question and persist.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotLoaded` if `load` has not run.
    pub async fn record(&mut self, entry: FeedbackEntry) -> Result<&FeedbackLedger, LedgerError> {
        let ledger = self.ledger.as_mut().ok_or(LedgerError::NotLoaded)?;
        let question = entry.question_id.clone();
        let replaced = ledger.upsert(entry).is_some();
        tracing::debug!(
            %question,
            replaced,
            answered = ledger.answered_questions(),
            "recorded feedback"
        );
        self.persist().await;
        self.ledger.as_ref().ok_or(LedgerError::NotLoaded)
    }

    /// Remove the entry for `question_id` and persist. Missing ids are a no-op.
    ///
    /// Returns whether an entry was removed.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotLoaded` if `load` has not run.
    pub async fn remove(&mut self, question_id: &QuestionId) -> Result<bool, LedgerError> {
        let ledger = self.ledger.as_mut().ok_or(LedgerError::NotLoaded)?;
        if ledger.remove(question_id).is_none() {
            return Ok(false);
        }
        tracing::debug!(question = %question_id, "removed feedback");
        self.persist().await;
        Ok(true)
    }

    /// # Errors
    ///
    /// Returns `LedgerError::NotLoaded` if `load` has not run.
    pub fn is_complete(&self) -> Result<bool, LedgerError> {
        self.ledger
            .as_ref()
            .map(FeedbackLedger::is_complete)
            .ok_or(LedgerError::NotLoaded)
    }

    /// Delete the stored copy and release the in-memory ledger.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotLoaded` if `load` has not run.
    pub async fn clear(&mut self) -> Result<(), LedgerError> {
        let ledger = self.ledger.take().ok_or(LedgerError::NotLoaded)?;
        let key = ledger_key(ledger.session_id());
        if let Err(err) = self.store.remove(&key).await {
            tracing::warn!(%key, %err, "failed to delete stored ledger");
        }
        tracing::info!(session = %ledger.session_id(), "cleared feedback ledger");
        Ok(())
    }

    #[must_use]
    pub fn ledger(&self) -> Option<&FeedbackLedger> {
        self.ledger.as_ref()
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.ledger.is_some()
    }

    /// True once a write has failed; further writes are skipped.
    #[must_use]
    pub fn is_memory_only(&self) -> bool {
        self.memory_only
    }

    async fn persist(&mut self) {
        let Some(ledger) = self.ledger.as_ref() else {
            return;
        };
        let key = ledger_key(ledger.session_id());
        if self.memory_only {
            tracing::debug!(%key, "memory-only mode; skipping ledger write");
            return;
        }

        let result = match ledger.to_json() {
            Ok(json) => self.store.set(&key, &json).await.map_err(|e| e.to_string()),
            Err(err) => Err(err.to_string()),
        };

        if let Err(err) = result {
            tracing::warn!(%key, %err, "failed to persist ledger; continuing in memory only");
            if let Err(err) = self.store.remove(&key).await {
                tracing::error!(%key, %err, "failed to clear stored ledger after write failure");
            }
            self.memory_only = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lesson_core::model::{Question, QuestionKind};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use storage::repository::{InMemoryStore, StorageError};

    fn session(n: usize) -> Session {
        let questions = (1..=n)
            .map(|i| Question::new(format!("q{i}").as_str(), QuestionKind::Text, "prompt"))
            .collect();
        Session::new("s1", "Small talk", questions)
    }

    fn entry(id: &str, decision: &str, ts: i64) -> FeedbackEntry {
        FeedbackEntry::new(QuestionId::new(id), decision, 8.0, false, ts)
    }

    async fn stored_value(store: &InMemoryStore) -> Option<serde_json::Value> {
        let raw = store.get(&ledger_key(&SessionId::new("s1"))).await.unwrap()?;
        Some(serde_json::from_str(&raw).unwrap())
    }

    /// Reads fail, writes succeed.
    struct UnreadableStore(InMemoryStore);

    #[async_trait]
    impl KeyValueStore for UnreadableStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Connection("disk on fire".into()))
        }
        async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.0.set(key, value).await
        }
        async fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.0.remove(key).await
        }
    }

    /// Writes always fail; counts writes and removes.
    #[derive(Default)]
    struct ReadOnlyStore {
        sets: AtomicUsize,
        removes: AtomicUsize,
    }

    #[async_trait]
    impl KeyValueStore for ReadOnlyStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::QuotaExceeded {
                needed: 1,
                available: 0,
            })
        }
        async fn remove(&self, _key: &str) -> Result<(), StorageError> {
            self.removes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn first_load_persists_empty_baseline() {
        let store = InMemoryStore::new();
        let mut service = FeedbackLedgerService::new(Arc::new(store.clone()));
        let ledger = service.load(&session(3)).await;
        assert_eq!(ledger.total_questions(), 3);

        let stored = stored_value(&store).await.expect("baseline written");
        assert_eq!(stored["totalQuestions"], 3);
        assert_eq!(stored["answeredQuestions"], 0);
    }

    #[tokio::test]
    async fn operations_before_load_are_precondition_failures() {
        let mut service = FeedbackLedgerService::new(Arc::new(InMemoryStore::new()));
        assert!(matches!(
            service.record(entry("q1", "correct", 1)).await,
            Err(LedgerError::NotLoaded)
        ));
        assert!(matches!(
            service.remove(&QuestionId::new("q1")).await,
            Err(LedgerError::NotLoaded)
        ));
        assert!(matches!(service.clear().await, Err(LedgerError::NotLoaded)));
        assert!(matches!(service.is_complete(), Err(LedgerError::NotLoaded)));
    }

    #[tokio::test]
    async fn record_writes_through() {
        let store = InMemoryStore::new();
        let mut service = FeedbackLedgerService::new(Arc::new(store.clone()));
        service.load(&session(3)).await;

        service.record(entry("q1", "correcto", 1)).await.unwrap();
        service.record(entry("q2", "partial", 2)).await.unwrap();

        let stored = stored_value(&store).await.unwrap();
        assert_eq!(stored["correct"], 1);
        assert_eq!(stored["partial"], 1);
        assert_eq!(stored["incorrect"], 0);
        assert_eq!(stored["answeredQuestions"], 2);
        assert!(!service.is_complete().unwrap());

        service.record(entry("q3", "incorrect", 3)).await.unwrap();
        assert!(service.is_complete().unwrap());
    }

    #[tokio::test]
    async fn reload_reconciles_instead_of_recreating() {
        let store = InMemoryStore::new();
        let mut service = FeedbackLedgerService::new(Arc::new(store.clone()));
        service.load(&session(2)).await;
        service.record(entry("q1", "correct", 1)).await.unwrap();

        let mut reloaded = FeedbackLedgerService::new(Arc::new(store.clone()));
        // The question set grew since the ledger was created; the total stays.
        let ledger = reloaded.load(&session(5)).await;
        assert_eq!(ledger.total_questions(), 2);
        assert_eq!(ledger.answered_questions(), 1);
        assert_eq!(ledger.correct(), 1);
    }

    #[tokio::test]
    async fn legacy_record_is_repaired_and_rewritten() {
        let store = InMemoryStore::new();
        let legacy = json!({
            "sessionId": "s1",
            "entries": [
                {"questionId": "q1", "decision": "correct", "score": 9, "timestamp": 100},
                {
                    "questionId": "q1",
                    "decision": "incorrect",
                    "score": 2,
                    "hintUsed": true,
                    "timestamp": 200
                }
            ]
        });
        store
            .set(&ledger_key(&SessionId::new("s1")), &legacy.to_string())
            .await
            .unwrap();

        let mut service = FeedbackLedgerService::new(Arc::new(store.clone()));
        let ledger = service.load(&session(3)).await;
        let q1 = ledger.entry(&QuestionId::new("q1")).unwrap();
        assert_eq!(q1.timestamp, 200);
        assert!(q1.hint_used);
        assert_eq!(ledger.answered_questions(), 1);
        assert_eq!(ledger.total_questions(), 3);

        let stored = stored_value(&store).await.unwrap();
        assert!(stored["entries"].is_object());
        assert_eq!(stored["incorrect"], 1);
        assert_eq!(stored["totalQuestions"], 3);
    }

    #[tokio::test]
    async fn corrupt_record_falls_back_to_fresh_ledger() {
        let store = InMemoryStore::new();
        store
            .set(&ledger_key(&SessionId::new("s1")), "{{{ not json")
            .await
            .unwrap();

        let mut service = FeedbackLedgerService::new(Arc::new(store.clone()));
        let ledger = service.load(&session(2)).await;
        assert_eq!(ledger.answered_questions(), 0);

        let stored = stored_value(&store).await.expect("fresh baseline replaced junk");
        assert_eq!(stored["sessionId"], "s1");
    }

    #[tokio::test]
    async fn foreign_record_is_ignored() {
        let store = InMemoryStore::new();
        let other = json!({"sessionId": "someone-else", "entries": {}, "totalQuestions": 9});
        store
            .set(&ledger_key(&SessionId::new("s1")), &other.to_string())
            .await
            .unwrap();

        let mut service = FeedbackLedgerService::new(Arc::new(store));
        let ledger = service.load(&session(2)).await;
        assert_eq!(ledger.session_id(), &SessionId::new("s1"));
        assert_eq!(ledger.total_questions(), 2);
    }

    #[tokio::test]
    async fn read_failure_starts_fresh() {
        let mut service =
            FeedbackLedgerService::new(Arc::new(UnreadableStore(InMemoryStore::new())));
        let ledger = service.load(&session(2)).await;
        assert_eq!(ledger.answered_questions(), 0);
        assert!(!service.is_memory_only());
    }

    #[tokio::test]
    async fn write_failure_switches_to_memory_only() {
        let store = Arc::new(ReadOnlyStore::default());
        let mut service = FeedbackLedgerService::new(store.clone());
        service.load(&session(2)).await;
        assert!(service.is_memory_only());
        assert_eq!(store.sets.load(Ordering::SeqCst), 1);
        assert_eq!(store.removes.load(Ordering::SeqCst), 1);

        let ledger = service.record(entry("q1", "correct", 1)).await.unwrap();
        assert_eq!(ledger.correct(), 1);
        // No further write attempts once memory-only.
        assert_eq!(store.sets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn quota_exhaustion_keeps_state_in_memory() {
        let store = InMemoryStore::with_quota(64);
        let mut service = FeedbackLedgerService::new(Arc::new(store.clone()));
        service.load(&session(2)).await;
        service.record(entry("q1", "correct", 1)).await.unwrap();

        assert!(service.is_memory_only());
        assert!(store.is_empty().unwrap());
        assert_eq!(service.ledger().unwrap().answered_questions(), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = InMemoryStore::new();
        let mut service = FeedbackLedgerService::new(Arc::new(store.clone()));
        service.load(&session(2)).await;
        service.record(entry("q1", "correct", 1)).await.unwrap();
        service.record(entry("q2", "incorrect", 2)).await.unwrap();

        assert!(service.remove(&QuestionId::new("q1")).await.unwrap());
        let once = service.ledger().cloned();
        assert!(!service.remove(&QuestionId::new("q1")).await.unwrap());
        assert_eq!(service.ledger().cloned(), once);

        let stored = stored_value(&store).await.unwrap();
        assert_eq!(stored["correct"], 0);
        assert_eq!(stored["incorrect"], 1);
        assert!(stored["entries"].get("q1").is_none());
    }

    #[tokio::test]
    async fn clear_deletes_stored_copy_and_unloads() {
        let store = InMemoryStore::new();
        let mut service = FeedbackLedgerService::new(Arc::new(store.clone()));
        service.load(&session(2)).await;
        service.record(entry("q1", "correct", 1)).await.unwrap();

        service.clear().await.unwrap();
        assert!(!service.is_loaded());
        assert!(stored_value(&store).await.is_none());
        assert!(matches!(service.clear().await, Err(LedgerError::NotLoaded)));
    }
}
