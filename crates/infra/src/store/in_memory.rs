use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use shopfloor_core::{AggregateId, ExpectedVersion};

use super::r#trait::{
    AggregateRecord, AggregateStore, OutboxMessage, OutboxRecord, OutboxStats, OutboxStore,
    StoreError,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    aggregate_type: String,
    aggregate_id: AggregateId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct UniqueKey {
    aggregate_type: String,
    key: String,
}

/// One aggregate's row. `None` until its first successful save.
type Slot = Arc<Mutex<Option<AggregateRecord>>>;

/// In-memory aggregate + outbox store.
///
/// Intended for tests/dev. Every aggregate has its own lock, held from the
/// version check to the write, so saves to different aggregates only meet in
/// the short sections that touch the business-key index and the outbox. A
/// save's outbox rows and its record are written under the aggregate's lock
/// after every check has passed: both land or neither does.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    slots: RwLock<HashMap<RecordKey, Slot>>,
    unique_keys: Mutex<HashMap<UniqueKey, AggregateId>>,
    /// Insertion order is publication order.
    outbox: Mutex<Vec<OutboxRecord>>,
    fail_next_save: AtomicBool,
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex.lock().map_err(|_| poisoned())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `save()` fail with `Unavailable` without writing anything.
    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }

    /// Snapshot of every outbox row, in insertion order.
    pub fn outbox(&self) -> Result<Vec<OutboxRecord>, StoreError> {
        Ok(lock(&self.outbox)?.clone())
    }

    fn slot(&self, key: &RecordKey) -> Result<Option<Slot>, StoreError> {
        Ok(self.slots.read().map_err(|_| poisoned())?.get(key).cloned())
    }

    fn slot_or_insert(&self, key: RecordKey) -> Result<Slot, StoreError> {
        if let Some(slot) = self.slot(&key)? {
            return Ok(slot);
        }
        let mut slots = self.slots.write().map_err(|_| poisoned())?;
        Ok(slots.entry(key).or_default().clone())
    }

    fn with_outbox_row<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut OutboxRecord) -> R,
    ) -> Result<R, StoreError> {
        let mut outbox = lock(&self.outbox)?;
        let row = outbox
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or_else(|| StoreError::Database(format!("outbox row {id} not found")))?;
        Ok(f(row))
    }
}

impl AggregateStore for InMemoryStore {
    fn load(
        &self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateRecord>, StoreError> {
        let key = RecordKey {
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
        };
        match self.slot(&key)? {
            Some(slot) => Ok(lock(&slot)?.clone()),
            None => Ok(None),
        }
    }

    fn save(
        &self,
        record: AggregateRecord,
        expected: ExpectedVersion,
        outbox: Vec<OutboxMessage>,
    ) -> Result<(), StoreError> {
        if self.fail_next_save.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected save failure".to_string()));
        }

        let slot = self.slot_or_insert(RecordKey {
            aggregate_type: record.aggregate_type.clone(),
            aggregate_id: record.aggregate_id,
        })?;
        let mut current = lock(&slot)?;

        let current_version = current.as_ref().map(|r| r.version);
        if !expected.matches(current_version) {
            return Err(StoreError::Concurrency(format!(
                "{} {}: expected {expected:?}, found {current_version:?}",
                record.aggregate_type, record.aggregate_id
            )));
        }

        {
            let mut unique_keys = lock(&self.unique_keys)?;
            if let Some(unique) = &record.unique_key {
                let ukey = UniqueKey {
                    aggregate_type: record.aggregate_type.clone(),
                    key: unique.clone(),
                };
                if let Some(owner) = unique_keys.get(&ukey) {
                    if *owner != record.aggregate_id {
                        return Err(StoreError::DuplicateKey(format!(
                            "{} '{}' is already used by {}",
                            record.aggregate_type, unique, owner
                        )));
                    }
                }
            }

            // Past this point nothing can fail: apply every write.
            let previous_key = current.as_ref().and_then(|r| r.unique_key.clone());
            if let Some(old) = previous_key.filter(|old| Some(old) != record.unique_key.as_ref()) {
                unique_keys.remove(&UniqueKey {
                    aggregate_type: record.aggregate_type.clone(),
                    key: old,
                });
            }
            if let Some(unique) = &record.unique_key {
                unique_keys.insert(
                    UniqueKey {
                        aggregate_type: record.aggregate_type.clone(),
                        key: unique.clone(),
                    },
                    record.aggregate_id,
                );
            }
        }

        if !outbox.is_empty() {
            let created_at = Utc::now();
            lock(&self.outbox)?
                .extend(outbox.into_iter().map(|m| OutboxRecord::new(m, created_at)));
        }
        *current = Some(record);

        Ok(())
    }

    fn list(&self, aggregate_type: &str) -> Result<Vec<AggregateRecord>, StoreError> {
        let slots: Vec<Slot> = self
            .slots
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .filter(|(key, _)| key.aggregate_type == aggregate_type)
            .map(|(_, slot)| slot.clone())
            .collect();

        let mut records = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(record) = lock(&slot)?.clone() {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.aggregate_id);
        Ok(records)
    }
}

impl OutboxStore for InMemoryStore {
    fn fetch_due(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<OutboxRecord>, StoreError> {
        Ok(lock(&self.outbox)?
            .iter()
            .filter(|r| !r.is_published())
            .take_while(|r| r.next_attempt_at <= now)
            .take(limit)
            .cloned()
            .collect())
    }

    fn mark_published(&self, id: Uuid, published_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_outbox_row(id, |row| {
            if row.published_at.is_none() {
                row.published_at = Some(published_at);
            }
        })
    }

    fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_outbox_row(id, |row| {
            row.attempts += 1;
            row.last_error = Some(error.to_string());
            row.next_attempt_at = next_attempt_at;
        })
    }

    fn stats(&self) -> Result<OutboxStats, StoreError> {
        let outbox = lock(&self.outbox)?;
        let total = outbox.len() as u64;
        let published = outbox.iter().filter(|r| r.is_published()).count() as u64;
        Ok(OutboxStats {
            total,
            published,
            pending: total - published,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    use serde_json::json;

    fn record(aggregate_id: AggregateId, version: u64, unique_key: Option<&str>) -> AggregateRecord {
        AggregateRecord {
            aggregate_type: "test.thing".to_string(),
            aggregate_id,
            version,
            unique_key: unique_key.map(str::to_string),
            state: json!({ "version": version }),
            updated_at: Utc::now(),
        }
    }

    fn message(aggregate_id: AggregateId) -> OutboxMessage {
        OutboxMessage {
            id: Uuid::now_v7(),
            topic: "test.topic".to_string(),
            aggregate_type: "test.thing".to_string(),
            aggregate_id,
            sequence_number: 1,
            event_type: "test.thing.happened".to_string(),
            occurred_at: Utc::now(),
            payload: json!({}),
        }
    }

    #[test]
    fn save_then_load_round_trips_and_checks_version() {
        let store = InMemoryStore::new();
        let id = AggregateId::new();

        store
            .save(record(id, 1, None), ExpectedVersion::NotExists, vec![])
            .unwrap();
        assert_eq!(store.load("test.thing", id).unwrap().unwrap().version, 1);
        assert!(store.load("other.thing", id).unwrap().is_none());

        let err = store
            .save(record(id, 2, None), ExpectedVersion::NotExists, vec![])
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));

        store
            .save(record(id, 2, None), ExpectedVersion::Exact(1), vec![])
            .unwrap();
        let err = store
            .save(record(id, 3, None), ExpectedVersion::Exact(1), vec![])
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
    }

    #[test]
    fn unique_key_is_enforced_per_type() {
        let store = InMemoryStore::new();
        store
            .save(record(AggregateId::new(), 1, Some("K-1")), ExpectedVersion::NotExists, vec![])
            .unwrap();

        let err = store
            .save(record(AggregateId::new(), 1, Some("K-1")), ExpectedVersion::NotExists, vec![])
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_)));
    }

    #[test]
    fn renaming_releases_the_old_key() {
        let store = InMemoryStore::new();
        let id = AggregateId::new();
        store
            .save(record(id, 1, Some("OLD")), ExpectedVersion::NotExists, vec![])
            .unwrap();
        store
            .save(record(id, 2, Some("NEW")), ExpectedVersion::Exact(1), vec![])
            .unwrap();

        store
            .save(record(AggregateId::new(), 1, Some("OLD")), ExpectedVersion::NotExists, vec![])
            .unwrap();
    }

    #[test]
    fn failed_save_writes_no_outbox_rows() {
        let store = InMemoryStore::new();
        let id = AggregateId::new();

        store.fail_next_save();
        let err = store
            .save(record(id, 1, None), ExpectedVersion::NotExists, vec![message(id)])
            .unwrap_err();
        assert!(err.is_transient());
        assert!(store.load("test.thing", id).unwrap().is_none());
        assert_eq!(store.stats().unwrap().total, 0);

        store
            .save(record(id, 1, None), ExpectedVersion::NotExists, vec![message(id)])
            .unwrap();
        assert_eq!(store.stats().unwrap().total, 1);

        let err = store
            .save(record(id, 2, None), ExpectedVersion::NotExists, vec![message(id)])
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
        assert_eq!(store.stats().unwrap().total, 1);
    }

    #[test]
    fn outbox_rows_are_kept_after_publication() {
        let store = InMemoryStore::new();
        let id = AggregateId::new();
        store
            .save(
                record(id, 1, None),
                ExpectedVersion::NotExists,
                vec![message(id), message(id)],
            )
            .unwrap();

        let due = store.fetch_due(10, Utc::now()).unwrap();
        assert_eq!(due.len(), 2);

        store.mark_published(due[0].id(), Utc::now()).unwrap();
        store
            .record_failure(due[1].id(), "broker down", Utc::now() + chrono::Duration::hours(1))
            .unwrap();

        assert!(store.fetch_due(10, Utc::now()).unwrap().is_empty());
        let rows = store.outbox().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].attempts, 1);
        assert_eq!(rows[1].last_error.as_deref(), Some("broker down"));
        assert_eq!(
            store.stats().unwrap(),
            OutboxStats {
                total: 2,
                published: 1,
                pending: 1
            }
        );
    }

    #[test]
    fn racing_saves_of_one_version_commit_once() {
        let store = Arc::new(InMemoryStore::new());
        let id = AggregateId::new();
        store
            .save(record(id, 1, None), ExpectedVersion::NotExists, vec![])
            .unwrap();

        let racers: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.save(record(id, 2, None), ExpectedVersion::Exact(1), vec![message(id)])
                })
            })
            .collect();
        let results: Vec<Result<(), StoreError>> =
            racers.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| matches!(e, StoreError::Concurrency(_)))
        );
        assert_eq!(store.stats().unwrap().total, 1);
        assert_eq!(store.load("test.thing", id).unwrap().unwrap().version, 2);
    }

    #[test]
    fn a_busy_aggregate_does_not_block_another() {
        let store = Arc::new(InMemoryStore::new());
        let busy = AggregateId::new();
        let other = AggregateId::new();
        store
            .save(record(busy, 1, None), ExpectedVersion::NotExists, vec![])
            .unwrap();

        let slot = store
            .slot_or_insert(RecordKey {
                aggregate_type: "test.thing".to_string(),
                aggregate_id: busy,
            })
            .unwrap();
        let held = slot.lock().unwrap();

        let (tx, rx) = mpsc::channel();
        let worker = {
            let store = store.clone();
            std::thread::spawn(move || {
                let saved =
                    store.save(record(other, 1, Some("K-9")), ExpectedVersion::NotExists, vec![]);
                let loaded = store.load("test.thing", other).map(|r| r.map(|r| r.version));
                tx.send((saved, loaded)).unwrap();
            })
        };

        let (saved, loaded) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(saved.is_ok());
        assert_eq!(loaded.unwrap(), Some(1));
        drop(held);
        worker.join().unwrap();
    }
}
