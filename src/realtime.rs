//! Realtime change events and their reconciliation into entity stores.
//!
//! The channel is at-least-once and unordered across ids: events may repeat,
//! and an echo of this client's own write may land before or after the
//! direct response. Folding is therefore idempotent per event:
//! create and update upsert by id, delete removes by id and tolerates absence.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::models::{Entity, EntityKind, RecordId};
use crate::mutation::MutationManager;
use crate::store::EntityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// A pushed change: which kind, what happened, and the record as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub operation: Operation,
    pub kind: EntityKind,
    pub payload: serde_json::Value,
}

impl RealtimeEvent {
    pub fn for_record<T: Entity>(operation: Operation, record: &T) -> serde_json::Result<Self> {
        Ok(Self {
            operation,
            kind: T::KIND,
            payload: serde_json::to_value(record)?,
        })
    }

    /// The `id` field of the payload, if any.
    pub fn payload_id(&self) -> Option<RecordId> {
        self.payload
            .get("id")
            .and_then(|v| v.as_str())
            .map(RecordId::confirmed)
    }
}

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Event(RealtimeEvent),
    /// The transport dropped; events are lost until `Reconnected`.
    Disconnected,
    /// The transport is back. Anything missed is gone for good, so the
    /// subscriber must re-fetch the collections in its scope.
    Reconnected,
}

/// What a subscriber wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub user_id: String,
    pub kinds: Vec<EntityKind>,
}

impl Scope {
    pub fn new(user_id: impl Into<String>, kinds: &[EntityKind]) -> Self {
        Self {
            user_id: user_id.into(),
            kinds: kinds.to_vec(),
        }
    }

    /// Tasks, projects and the user's notifications.
    pub fn everything(user_id: impl Into<String>) -> Self {
        Self::new(
            user_id,
            &[EntityKind::Task, EntityKind::Project, EntityKind::Notification],
        )
    }

    pub fn includes(&self, kind: EntityKind) -> bool {
        self.kinds.contains(&kind)
    }
}

/// A live registration. Dropping it unsubscribes.
pub struct Subscription {
    scope: Scope,
    rx: mpsc::UnboundedReceiver<ChannelMessage>,
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        scope: Scope,
        rx: mpsc::UnboundedReceiver<ChannelMessage>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            scope,
            rx,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Wait for the next message. `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.rx.recv().await
    }

    /// Next already-delivered message, without waiting.
    pub fn try_recv(&mut self) -> Option<ChannelMessage> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

pub trait EventChannel {
    fn subscribe(&self, scope: Scope) -> Subscription;
}

struct Subscriber {
    id: u64,
    kinds: Vec<EntityKind>,
    tx: mpsc::UnboundedSender<ChannelMessage>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// In-process channel. Writers publish, every subscriber whose scope covers
/// the event's kind gets a copy.
#[derive(Clone, Default)]
pub struct LocalChannel {
    registry: Arc<Mutex<Registry>>,
}

impl LocalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, event: RealtimeEvent) {
        let mut registry = self.lock();
        trace!(kind = %event.kind, operation = ?event.operation, "publishing event");
        registry.subscribers.retain(|sub| {
            if !sub.kinds.contains(&event.kind) {
                return !sub.tx.is_closed();
            }
            sub.tx.send(ChannelMessage::Event(event.clone())).is_ok()
        });
    }

    /// Tell every subscriber the transport dropped.
    pub fn disconnect_all(&self) {
        self.broadcast(ChannelMessage::Disconnected);
    }

    /// Tell every subscriber the transport is back.
    pub fn reconnect_all(&self) {
        self.broadcast(ChannelMessage::Reconnected);
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn broadcast(&self, message: ChannelMessage) {
        self.lock()
            .subscribers
            .retain(|sub| sub.tx.send(message.clone()).is_ok());
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EventChannel for LocalChannel {
    fn subscribe(&self, scope: Scope) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut registry = self.lock();
            registry.next_id += 1;
            let id = registry.next_id;
            registry.subscribers.push(Subscriber {
                id,
                kinds: scope.kinds.clone(),
                tx,
            });
            id
        };
        debug!(subscriber = id, user = %scope.user_id, "subscribed");

        let registry = Arc::downgrade(&self.registry);
        Subscription::new(scope, rx, move || {
            if let Some(registry) = registry.upgrade() {
                let mut registry = registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                registry.subscribers.retain(|sub| sub.id != id);
                debug!(subscriber = id, "unsubscribed");
            }
        })
    }
}

/// How an event was folded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Folded {
    Inserted,
    Refreshed,
    Removed,
    /// Delete of an id that was not present.
    AlreadyAbsent,
    Discarded(Discard),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// The kind is not in this subscriber's scope.
    OutOfScope,
    /// Addressed to another user.
    NotVisible,
    /// The payload could not be decoded.
    Malformed,
    /// The user has a delete in flight for this id.
    PendingDelete,
}

/// Folds events for one subscriber's scope into the matching stores.
#[derive(Debug, Clone)]
pub struct Reconciler {
    scope: Scope,
}

impl Reconciler {
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Fold one event whose kind is `T::KIND`.
    pub fn fold<T: Entity>(
        &self,
        store: &mut EntityStore<T>,
        mutations: &mut MutationManager,
        event: &RealtimeEvent,
    ) -> Folded {
        if event.kind != T::KIND || !self.scope.includes(event.kind) {
            return Folded::Discarded(Discard::OutOfScope);
        }

        let folded = match event.operation {
            Operation::Create | Operation::Update => self.fold_upsert(store, mutations, event),
            Operation::Delete => self.fold_delete(store, mutations, event),
        };
        debug!(kind = %event.kind, operation = ?event.operation, result = ?folded, "event folded");
        folded
    }

    fn fold_upsert<T: Entity>(
        &self,
        store: &mut EntityStore<T>,
        mutations: &mut MutationManager,
        event: &RealtimeEvent,
    ) -> Folded {
        let record: T = match serde_json::from_value(event.payload.clone()) {
            Ok(record) => record,
            Err(err) => {
                warn!(kind = %event.kind, error = %err, "malformed event payload dropped");
                return Folded::Discarded(Discard::Malformed);
            }
        };
        if !record.visible_to(&self.scope.user_id) {
            return Folded::Discarded(Discard::NotVisible);
        }
        if mutations.is_pending_delete(record.id()) {
            return Folded::Discarded(Discard::PendingDelete);
        }

        // Last observed write wins; no merge with unconfirmed local edits.
        mutations.observe_remote_write(record.id());
        if store.upsert(record) {
            Folded::Inserted
        } else {
            Folded::Refreshed
        }
    }

    fn fold_delete<T: Entity>(
        &self,
        store: &mut EntityStore<T>,
        mutations: &mut MutationManager,
        event: &RealtimeEvent,
    ) -> Folded {
        if let Ok(record) = serde_json::from_value::<T>(event.payload.clone()) {
            if !record.visible_to(&self.scope.user_id) {
                return Folded::Discarded(Discard::NotVisible);
            }
        }
        let Some(id) = event.payload_id() else {
            warn!(kind = %event.kind, "delete event without id dropped");
            return Folded::Discarded(Discard::Malformed);
        };

        mutations.observe_remote_write(&id);
        match store.remove(&id) {
            Some(_) => Folded::Removed,
            None => Folded::AlreadyAbsent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use crate::models::{Notification, Task, TaskDraft, TaskPatch, TaskStatus, User};
    use crate::mutation::Resolution;
    use chrono::Utc;

    fn task(id: &str, title: &str) -> Task {
        let now = Utc::now();
        Task {
            id: RecordId::confirmed(id),
            title: title.to_string(),
            description: String::new(),
            status: TaskStatus::Pending,
            due_date: None,
            owner_id: "u1".to_string(),
            created_by: "Ada".to_string(),
            updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn notification(id: &str, user_id: &str) -> Notification {
        let now = Utc::now();
        Notification {
            id: RecordId::confirmed(id),
            message: "Task \"x\" created!".to_string(),
            user_id: user_id.to_string(),
            read: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn event<T: Entity>(operation: Operation, record: &T) -> RealtimeEvent {
        RealtimeEvent::for_record(operation, record).unwrap()
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(Scope::everything("u1"))
    }

    #[test]
    fn test_create_event_inserts() {
        let mut store: EntityStore<Task> = EntityStore::new();
        let mut mgr = MutationManager::new();
        let folded = reconciler().fold(&mut store, &mut mgr, &event(Operation::Create, &task("t1", "A")));
        assert_eq!(folded, Folded::Inserted);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_create_event_for_confirmed_record_is_noop() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        let record = task("t1", "A");
        store.upsert(record.clone());
        let before = store.list().to_vec();

        let folded = reconciler().fold(&mut store, &mut mgr, &event(Operation::Create, &record));
        assert_eq!(folded, Folded::Refreshed);
        assert_eq!(store.list(), before.as_slice());
    }

    #[test]
    fn test_update_event_for_unknown_id_inserts() {
        let mut store: EntityStore<Task> = EntityStore::new();
        let mut mgr = MutationManager::new();
        let folded = reconciler().fold(&mut store, &mut mgr, &event(Operation::Update, &task("late", "A")));
        assert_eq!(folded, Folded::Inserted);
        assert!(store.contains(&"late".into()));
    }

    #[test]
    fn test_update_event_last_writer_wins() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        store.upsert(task("t1", "mine"));
        reconciler().fold(&mut store, &mut mgr, &event(Operation::Update, &task("t1", "theirs")));
        assert_eq!(store.get(&"t1".into()).unwrap().title, "theirs");
    }

    #[test]
    fn test_duplicate_delete_is_noop() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        store.upsert(task("t1", "A"));
        store.upsert(task("t2", "B"));
        let delete = event(Operation::Delete, &task("t1", "A"));

        assert_eq!(reconciler().fold(&mut store, &mut mgr, &delete), Folded::Removed);
        assert_eq!(reconciler().fold(&mut store, &mut mgr, &delete), Folded::AlreadyAbsent);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete_with_bare_id_payload() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        store.upsert(task("t1", "A"));
        let delete = RealtimeEvent {
            operation: Operation::Delete,
            kind: EntityKind::Task,
            payload: serde_json::json!({"id": "t1"}),
        };
        assert_eq!(reconciler().fold(&mut store, &mut mgr, &delete), Folded::Removed);
    }

    #[test]
    fn test_foreign_notification_discarded() {
        let mut store: EntityStore<Notification> = EntityStore::new();
        let mut mgr = MutationManager::new();
        let folded = reconciler().fold(
            &mut store,
            &mut mgr,
            &event(Operation::Create, &notification("n1", "someone-else")),
        );
        assert_eq!(folded, Folded::Discarded(Discard::NotVisible));
        assert!(store.is_empty());
    }

    #[test]
    fn test_own_notification_folded() {
        let mut store: EntityStore<Notification> = EntityStore::new();
        let mut mgr = MutationManager::new();
        let folded = reconciler().fold(&mut store, &mut mgr, &event(Operation::Create, &notification("n1", "u1")));
        assert_eq!(folded, Folded::Inserted);
    }

    #[test]
    fn test_out_of_scope_kind_discarded() {
        let mut store: EntityStore<Task> = EntityStore::new();
        let mut mgr = MutationManager::new();
        let only_projects = Reconciler::new(Scope::new("u1", &[EntityKind::Project]));
        let folded = only_projects.fold(&mut store, &mut mgr, &event(Operation::Create, &task("t1", "A")));
        assert_eq!(folded, Folded::Discarded(Discard::OutOfScope));
    }

    #[test]
    fn test_malformed_payload_discarded() {
        let mut store: EntityStore<Task> = EntityStore::new();
        let mut mgr = MutationManager::new();
        let bad = RealtimeEvent {
            operation: Operation::Create,
            kind: EntityKind::Task,
            payload: serde_json::json!({"id": 5}),
        };
        assert_eq!(reconciler().fold(&mut store, &mut mgr, &bad), Folded::Discarded(Discard::Malformed));
    }

    #[test]
    fn test_echo_before_response_does_not_duplicate() {
        let user = ada();
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        let ticket = mgr.begin_create::<Task>(&mut store, &TaskDraft::new("A"), &user).unwrap();

        let confirmed = task("t1", "A");
        reconciler().fold(&mut store, &mut mgr, &event(Operation::Create, &confirmed));
        assert_eq!(store.len(), 2);

        mgr.confirm_create(&mut store, ticket, confirmed);
        assert_eq!(store.len(), 1);
        assert_eq!(store.provisional().count(), 0);
    }

    #[test]
    fn test_event_for_pending_delete_dropped() {
        let user = ada();
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        store.upsert(task("t1", "A"));
        let _ticket = mgr.begin_delete::<Task>(&mut store, &"t1".into(), &user).unwrap();

        let folded = reconciler().fold(&mut store, &mut mgr, &event(Operation::Update, &task("t1", "late")));
        assert_eq!(folded, Folded::Discarded(Discard::PendingDelete));
        assert!(store.is_empty());
    }

    fn ada() -> User {
        User {
            id: "u1".to_string(),
            name: "Ada".to_string(),
            email: String::new(),
        }
    }

    #[test]
    fn test_failed_update_keeps_realtime_write() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        store.upsert(task("t1", "v0"));
        let patch = TaskPatch {
            title: Some("mine".to_string()),
            ..Default::default()
        };
        let ticket = mgr.begin_update::<Task>(&mut store, &"t1".into(), &patch, &ada()).unwrap();

        reconciler().fold(&mut store, &mut mgr, &event(Operation::Update, &task("t1", "theirs")));
        let err = TrackerError::Validation("rejected".to_string());
        assert_eq!(mgr.fail_update(&mut store, ticket, &err), Resolution::Kept);
        assert_eq!(store.get(&"t1".into()).unwrap().title, "theirs");
    }

    #[test]
    fn test_create_response_after_remote_delete_stays_deleted() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        let ticket = mgr.begin_create::<Task>(&mut store, &TaskDraft::new("A"), &ada()).unwrap();

        let confirmed = task("t1", "A");
        reconciler().fold(&mut store, &mut mgr, &event(Operation::Create, &confirmed));
        reconciler().fold(&mut store, &mut mgr, &event(Operation::Delete, &confirmed));

        let id = mgr.confirm_create(&mut store, ticket, confirmed);
        assert_eq!(id, RecordId::confirmed("t1"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_create_response_after_remote_update_keeps_newer() {
        let mut store = EntityStore::new();
        let mut mgr = MutationManager::new();
        let ticket = mgr.begin_create::<Task>(&mut store, &TaskDraft::new("A"), &ada()).unwrap();

        reconciler().fold(&mut store, &mut mgr, &event(Operation::Update, &task("t1", "renamed")));
        mgr.confirm_create(&mut store, ticket, task("t1", "A"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&"t1".into()).unwrap().title, "renamed");
    }

    #[tokio::test]
    async fn test_local_channel_delivers_by_kind() {
        let channel = LocalChannel::new();
        let mut tasks = channel.subscribe(Scope::new("u1", &[EntityKind::Task]));
        let mut projects = channel.subscribe(Scope::new("u1", &[EntityKind::Project]));

        channel.publish(event(Operation::Create, &task("t1", "A")));

        match tasks.recv().await {
            Some(ChannelMessage::Event(e)) => assert_eq!(e.payload_id(), Some("t1".into())),
            other => panic!("unexpected {:?}", other),
        }
        assert!(projects.try_recv().is_none());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let channel = LocalChannel::new();
        let sub = channel.subscribe(Scope::everything("u1"));
        let other = channel.subscribe(Scope::everything("u1"));
        assert_eq!(channel.subscriber_count(), 2);
        drop(sub);
        assert_eq!(channel.subscriber_count(), 1);
        other.unsubscribe();
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn test_reconnect_is_broadcast() {
        let channel = LocalChannel::new();
        let mut sub = channel.subscribe(Scope::everything("u1"));
        channel.disconnect_all();
        channel.reconnect_all();
        assert_eq!(sub.try_recv(), Some(ChannelMessage::Disconnected));
        assert_eq!(sub.try_recv(), Some(ChannelMessage::Reconnected));
    }
}
