//! Optimistic mutation bookkeeping.
//!
//! Every intent is split into a synchronous `begin_*` (validate, apply the
//! tentative change, hand back a ticket) and a `confirm_*`/`fail_*` that
//! folds the remote outcome back in. The async driver awaits the remote call
//! between the two, so any number of intents may be in flight and their
//! outcomes may arrive in any order.
//!
//! Each intent is stamped from a monotonic counter and the latest stamp per
//! id is remembered while any ticket for it is outstanding. Realtime writes
//! observed meanwhile are stamped too. An outcome whose stamp is older than
//! the id's latest is stale: a newer intent or remote write owns the record
//! now, and the outcome is dropped instead of clobbering it.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::error::{Result, TrackerError};
use crate::models::{Entity, RecordId, TempId, User};
use crate::store::EntityStore;

/// In-flight create. Carries the provisional id it must later replace.
#[derive(Debug)]
pub struct CreateTicket {
    temp: TempId,
    stamp: u64,
}

impl CreateTicket {
    pub fn temp_id(&self) -> TempId {
        self.temp
    }
}

/// In-flight update. Carries the pre-edit snapshot for rollback.
#[derive(Debug)]
pub struct UpdateTicket<T: Entity> {
    id: RecordId,
    stamp: u64,
    snapshot: T,
}

impl<T: Entity> UpdateTicket<T> {
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn snapshot(&self) -> &T {
        &self.snapshot
    }
}

/// In-flight delete. Carries the removed record for messages.
#[derive(Debug)]
pub struct DeleteTicket<T: Entity> {
    id: RecordId,
    stamp: u64,
    removed: T,
}

impl<T: Entity> DeleteTicket<T> {
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn removed(&self) -> &T {
        &self.removed
    }
}

/// How an update outcome was folded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The authoritative record replaced the optimistic one.
    Applied,
    /// A newer intent superseded this one; the outcome was dropped.
    Stale,
    /// The failure rolled the record back to its pre-edit snapshot.
    Reverted,
    /// The failure was reported but a newer intent's state was kept.
    Kept,
}

/// What the caller must do after a failed delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Re-fetch the whole collection; the removed record's prior state
    /// cannot be reconstructed reliably.
    Refetch,
}

#[derive(Debug, Default)]
pub struct MutationManager {
    next_temp: u64,
    next_stamp: u64,
    latest: HashMap<RecordId, u64>,
    /// Tickets in flight per id; provisional ids for creates.
    outstanding: HashMap<RecordId, usize>,
    pending_deletes: HashSet<RecordId>,
}

impl MutationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a provisional record for `draft` and return its ticket.
    pub fn begin_create<T: Entity>(
        &mut self,
        store: &mut EntityStore<T>,
        draft: &T::Draft,
        author: &User,
    ) -> Result<CreateTicket> {
        T::validate_draft(draft)?;

        let temp = TempId(self.next_temp);
        self.next_temp += 1;
        let stamp = self.open(RecordId::Provisional(temp));

        let record = T::provisional(temp, draft, author, Utc::now());
        store.upsert(record);
        store.set_error(None);
        debug!(kind = %T::KIND, %temp, stamp, "optimistic create applied");

        Ok(CreateTicket { temp, stamp })
    }

    /// Swap the provisional record for the authoritative one. If a realtime
    /// write or delete for the new id was folded while the call was in
    /// flight, that state stands and only the provisional record goes.
    pub fn confirm_create<T: Entity>(
        &mut self,
        store: &mut EntityStore<T>,
        ticket: CreateTicket,
        record: T,
    ) -> RecordId {
        let temp_id = RecordId::Provisional(ticket.temp);
        let id = record.id().clone();

        if self.is_current(&id, ticket.stamp) {
            store.replace(&temp_id, record);
            info!(kind = %T::KIND, temp = %ticket.temp, %id, "create confirmed");
        } else {
            store.remove(&temp_id);
            info!(kind = %T::KIND, temp = %ticket.temp, %id, "create confirmed, realtime state kept");
        }
        self.close(&temp_id);
        id
    }

    /// Drop the provisional record and record the error on the store.
    pub fn fail_create<T: Entity>(
        &mut self,
        store: &mut EntityStore<T>,
        ticket: CreateTicket,
        error: &TrackerError,
    ) {
        let temp_id = RecordId::Provisional(ticket.temp);
        self.close(&temp_id);
        store.remove(&temp_id);
        store.set_error(Some(error.to_string()));
        warn!(kind = %T::KIND, temp = %ticket.temp, %error, "create failed, provisional record removed");
    }

    /// Merge `patch` over the current record and return its ticket.
    pub fn begin_update<T: Entity>(
        &mut self,
        store: &mut EntityStore<T>,
        id: &RecordId,
        patch: &T::Patch,
        actor: &User,
    ) -> Result<UpdateTicket<T>> {
        ensure_confirmed::<T>(id)?;
        T::validate_patch(patch)?;

        let snapshot = store
            .get(id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(format!("{} {}", T::KIND, id)))?;
        ensure_owner(&snapshot, actor)?;

        let mut next = snapshot.clone();
        next.merge(patch);
        store.upsert(next);
        store.set_error(None);

        let stamp = self.open(id.clone());
        debug!(kind = %T::KIND, %id, stamp, "optimistic update applied");
        Ok(UpdateTicket {
            id: id.clone(),
            stamp,
            snapshot,
        })
    }

    pub fn confirm_update<T: Entity>(
        &mut self,
        store: &mut EntityStore<T>,
        ticket: UpdateTicket<T>,
        record: T,
    ) -> Resolution {
        let current = self.is_current(&ticket.id, ticket.stamp);
        self.close(&ticket.id);
        if !current {
            debug!(kind = %T::KIND, id = %ticket.id, stamp = ticket.stamp, "stale update confirmation dropped");
            return Resolution::Stale;
        }
        store.upsert(record);
        info!(kind = %T::KIND, id = %ticket.id, "update confirmed");
        Resolution::Applied
    }

    /// Revert to the snapshot unless a newer intent or a realtime write has
    /// taken over the record.
    pub fn fail_update<T: Entity>(
        &mut self,
        store: &mut EntityStore<T>,
        ticket: UpdateTicket<T>,
        error: &TrackerError,
    ) -> Resolution {
        store.set_error(Some(error.to_string()));
        let current = self.is_current(&ticket.id, ticket.stamp);
        self.close(&ticket.id);
        if !current {
            warn!(kind = %T::KIND, id = %ticket.id, %error, "update failed, newer state kept");
            return Resolution::Kept;
        }
        store.upsert(ticket.snapshot);
        warn!(kind = %T::KIND, id = %ticket.id, %error, "update failed, reverted");
        Resolution::Reverted
    }

    /// Remove the record now and return its ticket.
    pub fn begin_delete<T: Entity>(
        &mut self,
        store: &mut EntityStore<T>,
        id: &RecordId,
        actor: &User,
    ) -> Result<DeleteTicket<T>> {
        ensure_confirmed::<T>(id)?;
        let existing = store
            .get(id)
            .ok_or_else(|| TrackerError::NotFound(format!("{} {}", T::KIND, id)))?;
        ensure_owner(existing, actor)?;

        let removed = match store.remove(id) {
            Some(record) => record,
            None => return Err(TrackerError::NotFound(format!("{} {}", T::KIND, id))),
        };
        store.set_error(None);
        self.pending_deletes.insert(id.clone());
        let stamp = self.open(id.clone());
        debug!(kind = %T::KIND, %id, stamp, "optimistic delete applied");

        Ok(DeleteTicket {
            id: id.clone(),
            stamp,
            removed,
        })
    }

    pub fn confirm_delete<T: Entity>(&mut self, store: &mut EntityStore<T>, ticket: DeleteTicket<T>) {
        self.pending_deletes.remove(&ticket.id);
        // A realtime event may have re-inserted it in between.
        if self.is_current(&ticket.id, ticket.stamp) {
            store.remove(&ticket.id);
        }
        self.close(&ticket.id);
        info!(kind = %T::KIND, id = %ticket.id, "delete confirmed");
    }

    pub fn fail_delete<T: Entity>(
        &mut self,
        store: &mut EntityStore<T>,
        ticket: DeleteTicket<T>,
        error: &TrackerError,
    ) -> Recovery {
        self.pending_deletes.remove(&ticket.id);
        self.close(&ticket.id);
        store.set_error(Some(error.to_string()));
        warn!(kind = %T::KIND, id = %ticket.id, %error, "delete failed, refetch required");
        Recovery::Refetch
    }

    /// Mark the start of a full fetch.
    pub fn begin_fetch<T: Entity>(&self, store: &mut EntityStore<T>) {
        store.set_error(None);
        store.set_loading(true);
    }

    /// Replace store content with a fetched collection, minus anything the
    /// user has a delete in flight for.
    pub fn complete_fetch<T: Entity>(&self, store: &mut EntityStore<T>, records: Vec<T>) {
        let records: Vec<T> = records
            .into_iter()
            .filter(|r| !self.pending_deletes.contains(r.id()))
            .collect();
        debug!(kind = %T::KIND, count = records.len(), "fetch applied");
        store.replace_all(records);
        store.set_loading(false);
    }

    pub fn fail_fetch<T: Entity>(&self, store: &mut EntityStore<T>, error: &TrackerError) {
        store.set_error(Some(error.to_string()));
        warn!(kind = %T::KIND, %error, "fetch failed");
    }

    pub fn is_pending_delete(&self, id: &RecordId) -> bool {
        self.pending_deletes.contains(id)
    }

    /// A realtime write or delete supersedes every outcome still in flight
    /// for `id`. While creates are in flight any id may be the one a create
    /// will return, so every write is stamped until they settle.
    pub fn observe_remote_write(&mut self, id: &RecordId) {
        if self.outstanding.contains_key(id) || self.creates_in_flight() {
            self.stamp(id.clone());
        }
    }

    fn creates_in_flight(&self) -> bool {
        self.outstanding.keys().any(RecordId::is_provisional)
    }

    fn stamp(&mut self, id: RecordId) -> u64 {
        self.next_stamp += 1;
        let stamp = self.next_stamp;
        self.latest.insert(id, stamp);
        stamp
    }

    /// Register a ticket for `id` and stamp it.
    fn open(&mut self, id: RecordId) -> u64 {
        *self.outstanding.entry(id.clone()).or_insert(0) += 1;
        self.stamp(id)
    }

    /// Settle a ticket for `id`. Stamps are only kept while something in
    /// flight can still be compared against them.
    fn close(&mut self, id: &RecordId) {
        if let Some(count) = self.outstanding.get_mut(id) {
            *count -= 1;
            if *count == 0 {
                self.outstanding.remove(id);
            }
        }
        if !self.outstanding.contains_key(id) {
            self.latest.remove(id);
        }
        if !self.creates_in_flight() {
            let outstanding = &self.outstanding;
            self.latest.retain(|id, _| outstanding.contains_key(id));
        }
    }

    fn is_current(&self, id: &RecordId, stamp: u64) -> bool {
        self.latest.get(id).map_or(true, |latest| *latest <= stamp)
    }
}

fn ensure_confirmed<T: Entity>(id: &RecordId) -> Result<()> {
    if id.is_provisional() {
        return Err(TrackerError::Validation(format!(
            "{} {} is not confirmed yet",
            T::KIND,
            id
        )));
    }
    Ok(())
}

/// Client-side owner check; the remote store remains the final authority.
pub fn ensure_owner<T: Entity>(record: &T, actor: &User) -> Result<()> {
    if record.owner_id() != actor.id {
        return Err(TrackerError::NotAuthorized(format!(
            "only the owner may modify {} {}",
            T::KIND,
            record.id()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RemoteError, RemoteOp};
    use crate::models::{EntityKind, Task, TaskDraft, TaskPatch, TaskStatus};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
        }
    }

    fn server_task(id: &str, title: &str) -> Task {
        let now = Utc::now();
        Task {
            id: RecordId::confirmed(id),
            title: title.to_string(),
            description: String::new(),
            status: TaskStatus::Pending,
            due_date: None,
            owner_id: "u1".to_string(),
            created_by: "Ada".to_string(),
            updated_by: Some("Ada".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    fn remote_err(op: RemoteOp) -> TrackerError {
        RemoteError::new(op, EntityKind::Task, "boom").into()
    }

    fn title_patch(title: &str) -> TaskPatch {
        TaskPatch {
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_confirm_replaces_temp() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        let ticket = mgr
            .begin_create::<Task>(&mut store, &TaskDraft::new("Write"), &user("u1"))
            .unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.list()[0].id.is_provisional());

        let id = mgr.confirm_create(&mut store, ticket, server_task("t1", "Write"));
        assert_eq!(id, RecordId::confirmed("t1"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.provisional().count(), 0);
        assert!(mgr.latest.is_empty());
    }

    #[test]
    fn test_create_failure_removes_temp() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        let ticket = mgr
            .begin_create::<Task>(&mut store, &TaskDraft::new("Write"), &user("u1"))
            .unwrap();
        mgr.fail_create(&mut store, ticket, &remote_err(RemoteOp::Create));
        assert!(store.is_empty());
        assert!(store.error().unwrap().contains("boom"));
    }

    #[test]
    fn test_create_rejects_empty_title_before_apply() {
        let mut store: EntityStore<Task> = EntityStore::new();
        let mut mgr = MutationManager::new();
        let err = mgr
            .begin_create::<Task>(&mut store, &TaskDraft::new(""), &user("u1"))
            .unwrap_err();
        assert!(matches!(err, TrackerError::Validation(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_double_submit_gets_distinct_temp_ids() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        let a = mgr
            .begin_create::<Task>(&mut store, &TaskDraft::new("Same"), &user("u1"))
            .unwrap();
        let b = mgr
            .begin_create::<Task>(&mut store, &TaskDraft::new("Same"), &user("u1"))
            .unwrap();
        assert_ne!(a.temp_id(), b.temp_id());
        assert_eq!(store.len(), 2);

        // Confirmations arriving out of order land on the right slots.
        mgr.confirm_create(&mut store, b, server_task("t2", "Same"));
        mgr.confirm_create(&mut store, a, server_task("t1", "Same"));
        let ids: Vec<String> = store.list().iter().map(|t| t.id.to_string()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
    }

    #[test]
    fn test_temp_ids_not_reused_after_failure() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        let a = mgr
            .begin_create::<Task>(&mut store, &TaskDraft::new("A"), &user("u1"))
            .unwrap();
        let first = a.temp_id();
        mgr.fail_create(&mut store, a, &remote_err(RemoteOp::Create));
        let b = mgr
            .begin_create::<Task>(&mut store, &TaskDraft::new("B"), &user("u1"))
            .unwrap();
        assert_ne!(first, b.temp_id());
    }

    #[test]
    fn test_update_is_merge_not_replace() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        let mut existing = server_task("t1", "Old");
        existing.description = "keep".to_string();
        store.upsert(existing);

        mgr.begin_update::<Task>(&mut store, &"t1".into(), &title_patch("New"), &user("u1"))
            .unwrap();
        let current = store.get(&"t1".into()).unwrap();
        assert_eq!(current.title, "New");
        assert_eq!(current.description, "keep");
    }

    #[test]
    fn test_update_failure_reverts_snapshot() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        store.upsert(server_task("t1", "Old"));

        let ticket = mgr
            .begin_update::<Task>(&mut store, &"t1".into(), &title_patch("New"), &user("u1"))
            .unwrap();
        let resolution = mgr.fail_update(&mut store, ticket, &remote_err(RemoteOp::Update));
        assert_eq!(resolution, Resolution::Reverted);
        assert_eq!(store.get(&"t1".into()).unwrap().title, "Old");
    }

    #[test]
    fn test_delayed_confirmation_does_not_clobber_newer_intent() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        store.upsert(server_task("t1", "v0"));

        let first = mgr
            .begin_update::<Task>(&mut store, &"t1".into(), &title_patch("v1"), &user("u1"))
            .unwrap();
        let second = mgr
            .begin_update::<Task>(&mut store, &"t1".into(), &title_patch("v2"), &user("u1"))
            .unwrap();

        assert_eq!(
            mgr.confirm_update(&mut store, second, server_task("t1", "v2")),
            Resolution::Applied
        );
        assert_eq!(
            mgr.confirm_update(&mut store, first, server_task("t1", "v1")),
            Resolution::Stale
        );
        assert_eq!(store.get(&"t1".into()).unwrap().title, "v2");
    }

    #[test]
    fn test_older_failure_keeps_newer_state() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        store.upsert(server_task("t1", "v0"));

        let first = mgr
            .begin_update::<Task>(&mut store, &"t1".into(), &title_patch("v1"), &user("u1"))
            .unwrap();
        let _second = mgr
            .begin_update::<Task>(&mut store, &"t1".into(), &title_patch("v2"), &user("u1"))
            .unwrap();

        let resolution = mgr.fail_update(&mut store, first, &remote_err(RemoteOp::Update));
        assert_eq!(resolution, Resolution::Kept);
        assert_eq!(store.get(&"t1".into()).unwrap().title, "v2");
    }

    #[test]
    fn test_update_by_non_owner_rejected() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        store.upsert(server_task("t1", "Mine"));

        let err = mgr
            .begin_update::<Task>(&mut store, &"t1".into(), &title_patch("Theirs"), &user("u2"))
            .unwrap_err();
        assert!(matches!(err, TrackerError::NotAuthorized(_)));
        assert_eq!(store.get(&"t1".into()).unwrap().title, "Mine");
    }

    #[test]
    fn test_update_on_provisional_rejected() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        let ticket = mgr
            .begin_create::<Task>(&mut store, &TaskDraft::new("A"), &user("u1"))
            .unwrap();
        let temp = RecordId::Provisional(ticket.temp_id());
        let err = mgr
            .begin_update::<Task>(&mut store, &temp, &title_patch("B"), &user("u1"))
            .unwrap_err();
        assert!(matches!(err, TrackerError::Validation(_)));
    }

    #[test]
    fn test_delete_then_stale_update_confirmation() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        store.upsert(server_task("t1", "v0"));

        let update = mgr
            .begin_update::<Task>(&mut store, &"t1".into(), &title_patch("v1"), &user("u1"))
            .unwrap();
        let delete = mgr.begin_delete::<Task>(&mut store, &"t1".into(), &user("u1")).unwrap();

        assert_eq!(
            mgr.confirm_update(&mut store, update, server_task("t1", "v1")),
            Resolution::Stale
        );
        mgr.confirm_delete(&mut store, delete);
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_failure_requests_refetch() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        store.upsert(server_task("t1", "v0"));

        let ticket = mgr.begin_delete::<Task>(&mut store, &"t1".into(), &user("u1")).unwrap();
        assert!(store.is_empty());
        assert!(mgr.is_pending_delete(&"t1".into()));

        let recovery = mgr.fail_delete(&mut store, ticket, &remote_err(RemoteOp::Delete));
        assert_eq!(recovery, Recovery::Refetch);
        assert!(!mgr.is_pending_delete(&"t1".into()));
        // Only the refetch brings it back.
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let mut store: EntityStore<Task> = EntityStore::new();
        let mut mgr = MutationManager::new();
        let err = mgr.begin_delete::<Task>(&mut store, &"nope".into(), &user("u1")).unwrap_err();
        assert!(matches!(err, TrackerError::NotFound(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_fetch_skips_pending_deletes() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        store.upsert(server_task("t1", "a"));
        let _ticket = mgr.begin_delete::<Task>(&mut store, &"t1".into(), &user("u1")).unwrap();

        mgr.begin_fetch(&mut store);
        assert!(store.is_loading());
        mgr.complete_fetch(&mut store, vec![server_task("t1", "a"), server_task("t2", "b")]);
        assert!(!store.is_loading());
        assert_eq!(store.len(), 1);
        assert!(store.contains(&"t2".into()));
    }

    #[test]
    fn test_remote_delete_makes_update_confirmation_stale() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        store.upsert(server_task("t1", "v0"));

        let ticket = mgr
            .begin_update::<Task>(&mut store, &"t1".into(), &title_patch("v1"), &user("u1"))
            .unwrap();
        store.remove(&"t1".into());
        mgr.observe_remote_write(&"t1".into());

        assert_eq!(
            mgr.confirm_update(&mut store, ticket, server_task("t1", "v1")),
            Resolution::Stale
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_stamps_dropped_once_settled() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        store.upsert(server_task("t1", "v0"));
        store.upsert(server_task("t2", "v0"));

        let create = mgr
            .begin_create::<Task>(&mut store, &TaskDraft::new("New"), &user("u1"))
            .unwrap();
        let update = mgr
            .begin_update::<Task>(&mut store, &"t1".into(), &title_patch("v1"), &user("u1"))
            .unwrap();
        let delete = mgr.begin_delete::<Task>(&mut store, &"t2".into(), &user("u1")).unwrap();
        // Remote writes seen while a create is in flight are remembered.
        mgr.observe_remote_write(&"t9".into());
        assert_eq!(mgr.latest.len(), 4);

        mgr.confirm_update(&mut store, update, server_task("t1", "v1"));
        mgr.confirm_delete(&mut store, delete);
        mgr.confirm_create(&mut store, create, server_task("t3", "New"));
        assert!(mgr.latest.is_empty());
        assert!(mgr.outstanding.is_empty());

        // With nothing in flight, remote writes leave no trace.
        mgr.observe_remote_write(&"t1".into());
        assert!(mgr.latest.is_empty());
    }

    proptest! {
        #[test]
        fn prop_temp_ids_unique(count in 1usize..30) {
            let mut store = EntityStore::new();
            let mut mgr = MutationManager::new();
            let mut seen = HashSet::new();
            for i in 0..count {
                let ticket = mgr
                    .begin_create::<Task>(&mut store, &TaskDraft::new(format!("t{}", i)), &user("u1"))
                    .unwrap();
                prop_assert!(seen.insert(ticket.temp_id()));
            }
            prop_assert_eq!(store.len(), count);
        }

        /// Whatever order the confirmations of a burst of updates arrive in,
        /// the store ends on the last-issued intent's server response.
        #[test]
        fn prop_last_issued_update_wins(order in Just((0..5usize).collect::<Vec<_>>()).prop_shuffle()) {
            let mut store = EntityStore::new();
            let mut mgr = MutationManager::new();
            store.upsert(server_task("t1", "v0"));

            let mut tickets: Vec<Option<UpdateTicket<Task>>> = (0..5)
                .map(|i| {
                    Some(
                        mgr.begin_update::<Task>(&mut store, &"t1".into(), &title_patch(&format!("v{}", i + 1)), &user("u1"))
                            .unwrap(),
                    )
                })
                .collect();

            for i in order {
                if let Some(ticket) = tickets[i].take() {
                    mgr.confirm_update(&mut store, ticket, server_task("t1", &format!("v{}", i + 1)));
                }
            }
            prop_assert_eq!(store.get(&"t1".into()).unwrap().title.as_str(), "v5");
            prop_assert_eq!(store.len(), 1);
        }
    }
}
