//! Per-kind in-memory record collection.
//!
//! An `EntityStore` is the single owned state container for one entity kind.
//! The reconciliation logic is its only writer; views observe it through
//! [`EntityStore::subscribe`]. No I/O happens here.

use tokio::sync::broadcast;

use crate::models::{Entity, RecordId};

const CHANGE_CAPACITY: usize = 256;

/// Change notice broadcast to store observers after each mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Upserted(RecordId),
    Removed(RecordId),
    /// The whole collection was replaced by a fetch.
    Reset,
    Status,
}

/// Request-status flags, collapsed for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    Idle,
    Loading,
    Error(String),
}

pub struct EntityStore<T: Entity> {
    records: Vec<T>,
    loading: bool,
    error: Option<String>,
    changes: broadcast::Sender<StoreChange>,
}

impl<T: Entity> Default for EntityStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> EntityStore<T> {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            records: Vec::new(),
            loading: false,
            error: None,
            changes,
        }
    }

    /// Replace the record with the same id in place, or append it.
    /// Returns true when the record was new.
    pub fn upsert(&mut self, record: T) -> bool {
        let id = record.id().clone();
        let inserted = match self.position(&id) {
            Some(idx) => {
                self.records[idx] = record;
                false
            }
            None => {
                self.records.push(record);
                true
            }
        };
        self.emit(StoreChange::Upserted(id));
        inserted
    }

    /// Remove by id. Removing an absent id is a no-op.
    pub fn remove(&mut self, id: &RecordId) -> Option<T> {
        let idx = self.position(id)?;
        let removed = self.records.remove(idx);
        self.emit(StoreChange::Removed(id.clone()));
        Some(removed)
    }

    /// Swap the record at `old` for `record`, keeping `old`'s list position.
    ///
    /// If `record`'s id is already present elsewhere (a realtime event got
    /// there first), `old` is dropped and the existing entry is refreshed.
    pub fn replace(&mut self, old: &RecordId, record: T) {
        let new_id = record.id().clone();
        match (self.position(old), self.position(&new_id)) {
            (Some(idx), None) => {
                self.records[idx] = record;
                self.emit(StoreChange::Removed(old.clone()));
                self.emit(StoreChange::Upserted(new_id));
            }
            (Some(_), Some(_)) if *old != new_id => {
                self.remove(old);
                self.upsert(record);
            }
            _ => {
                self.upsert(record);
            }
        }
    }

    /// Replace the whole collection with fetched records. Provisional records
    /// still awaiting confirmation are kept at the end.
    pub fn replace_all(&mut self, records: Vec<T>) {
        let pending: Vec<T> = self
            .records
            .drain(..)
            .filter(|r| r.id().is_provisional())
            .collect();

        let mut next: Vec<T> = Vec::with_capacity(records.len() + pending.len());
        for record in records.into_iter().chain(pending) {
            match next.iter().position(|r| r.id() == record.id()) {
                Some(idx) => next[idx] = record,
                None => next.push(record),
            }
        }
        self.records = next;
        self.emit(StoreChange::Reset);
    }

    pub fn get(&self, id: &RecordId) -> Option<&T> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.position(id).is_some()
    }

    /// Records in store order. Callers sort for display.
    pub fn list(&self) -> &[T] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Provisional records currently in the store.
    pub fn provisional(&self) -> impl Iterator<Item = &T> {
        self.records.iter().filter(|r| r.id().is_provisional())
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
        self.emit(StoreChange::Status);
    }

    /// Setting an error also clears the loading flag.
    pub fn set_error(&mut self, message: Option<String>) {
        if message.is_some() {
            self.loading = false;
        }
        self.error = message;
        self.emit(StoreChange::Status);
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn status(&self) -> RequestStatus {
        match (&self.error, self.loading) {
            (Some(message), _) => RequestStatus::Error(message.clone()),
            (None, true) => RequestStatus::Loading,
            (None, false) => RequestStatus::Idle,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    fn position(&self, id: &RecordId) -> Option<usize> {
        self.records.iter().position(|r| r.id() == id)
    }

    fn emit(&self, change: StoreChange) {
        // No observers is fine.
        let _ = self.changes.send(change);
    }
}
