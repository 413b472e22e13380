//! The async driver.
//!
//! `Tracker` owns one entity store per kind and routes every intent through
//! the mutation manager: apply locally, await the remote call, fold the
//! outcome back. It also pumps a realtime subscription through the
//! reconciler. All state sits behind a `RefCell` on one logical thread; a
//! borrow is never held across an `.await`.

use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::comments::{build_forest, subtree_ids, CommentNode};
use crate::error::{Result, TrackerError};
use crate::models::{
    Comment, CommentDraft, CommentTarget, Entity, EntityKind, Notification, NotificationDraft,
    NotificationPatch, Project, RecordId, Task, User,
};
use crate::mutation::{MutationManager, Recovery, Resolution};
use crate::realtime::{ChannelMessage, Discard, EventChannel, Folded, Reconciler, Scope, Subscription};
use crate::remote::{CommentStore, DocumentStore, IdentityProvider, ListFilter, RemoteCollection};
use crate::store::{EntityStore, RequestStatus, StoreChange};

/// A store together with the bookkeeping for intents against it.
pub struct Slot<T: Entity> {
    pub store: EntityStore<T>,
    pub mutations: MutationManager,
}

impl<T: Entity> Default for Slot<T> {
    fn default() -> Self {
        Self {
            store: EntityStore::new(),
            mutations: MutationManager::new(),
        }
    }
}

#[derive(Default)]
pub struct TrackerState {
    tasks: Slot<Task>,
    projects: Slot<Project>,
    notifications: Slot<Notification>,
    /// Loaded comment threads, oldest first.
    threads: HashMap<CommentTarget, Vec<Comment>>,
}

/// Entity kinds the tracker keeps a store for.
pub trait Tracked: Entity {
    /// Whether a successful write emits a notification to the actor.
    const NOTIFIES: bool;

    fn slot(state: &TrackerState) -> &Slot<Self>;
    fn slot_mut(state: &mut TrackerState) -> &mut Slot<Self>;

    fn list_filter(_identity: &dyn IdentityProvider) -> Result<ListFilter> {
        Ok(ListFilter::default())
    }
}

impl Tracked for Task {
    const NOTIFIES: bool = true;

    fn slot(state: &TrackerState) -> &Slot<Self> {
        &state.tasks
    }

    fn slot_mut(state: &mut TrackerState) -> &mut Slot<Self> {
        &mut state.tasks
    }
}

impl Tracked for Project {
    const NOTIFIES: bool = true;

    fn slot(state: &TrackerState) -> &Slot<Self> {
        &state.projects
    }

    fn slot_mut(state: &mut TrackerState) -> &mut Slot<Self> {
        &mut state.projects
    }
}

impl Tracked for Notification {
    const NOTIFIES: bool = false;

    fn slot(state: &TrackerState) -> &Slot<Self> {
        &state.notifications
    }

    fn slot_mut(state: &mut TrackerState) -> &mut Slot<Self> {
        &mut state.notifications
    }

    /// Only the signed-in user's notifications, newest first.
    fn list_filter(identity: &dyn IdentityProvider) -> Result<ListFilter> {
        let user = identity.current_user()?;
        Ok(ListFilter::owned_by(user.id).newest_first())
    }
}

/// Serializable copy of every store, for export.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub tasks: Vec<Task>,
    pub projects: Vec<Project>,
    pub notifications: Vec<Notification>,
    pub comments: Vec<Comment>,
}

pub struct Tracker<S, I> {
    remote: S,
    identity: I,
    state: RefCell<TrackerState>,
}

impl<S: DocumentStore, I: IdentityProvider> Tracker<S, I> {
    pub fn new(remote: S, identity: I) -> Self {
        Self {
            remote,
            identity,
            state: RefCell::new(TrackerState::default()),
        }
    }

    pub fn remote(&self) -> &S {
        &self.remote
    }

    pub fn current_user(&self) -> Result<User> {
        self.identity.current_user()
    }

    // ==================== Collections ====================

    /// Replace the `T` store with the remote collection. Provisional records
    /// still in flight are kept.
    pub async fn fetch<T: Tracked>(&self) -> Result<usize>
    where
        S: RemoteCollection<T>,
    {
        let filter = T::list_filter(&self.identity)?;
        {
            let mut state = self.state.borrow_mut();
            let slot = T::slot_mut(&mut state);
            slot.mutations.begin_fetch(&mut slot.store);
        }

        let result = RemoteCollection::<T>::list(&self.remote, &filter)
            .instrument(info_span!("remote", op = "list", kind = %T::KIND))
            .await;

        let mut state = self.state.borrow_mut();
        let slot = T::slot_mut(&mut state);
        match result {
            Ok(records) => {
                slot.mutations.complete_fetch(&mut slot.store, records);
                Ok(slot.store.len())
            }
            Err(err) => {
                let err = TrackerError::from(err);
                slot.mutations.fail_fetch(&mut slot.store, &err);
                Err(err)
            }
        }
    }

    /// Fetch every collection in `scope`. The first failure is reported
    /// after all were attempted.
    pub async fn fetch_scope(&self, scope: &Scope) -> Result<()> {
        let mut first_err = None;
        for kind in &scope.kinds {
            let result = match kind {
                EntityKind::Task => self.fetch::<Task>().await,
                EntityKind::Project => self.fetch::<Project>().await,
                EntityKind::Notification => self.fetch::<Notification>().await,
                EntityKind::Comment => continue,
            };
            if let Err(err) = result {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Create a record optimistically. Returns the confirmed id.
    pub async fn create<T: Tracked>(&self, draft: &T::Draft) -> Result<RecordId>
    where
        S: RemoteCollection<T>,
    {
        let user = self.identity.current_user()?;
        let ticket = {
            let mut state = self.state.borrow_mut();
            let slot = T::slot_mut(&mut state);
            slot.mutations.begin_create(&mut slot.store, draft, &user)?
        };

        let result = RemoteCollection::<T>::create(&self.remote, draft, &user)
            .instrument(info_span!("remote", op = "create", kind = %T::KIND, temp = %ticket.temp_id()))
            .await;

        let (id, label) = {
            let mut state = self.state.borrow_mut();
            let slot = T::slot_mut(&mut state);
            match result {
                Ok(record) => {
                    let label = record.label().to_string();
                    (slot.mutations.confirm_create(&mut slot.store, ticket, record), label)
                }
                Err(err) => {
                    let err = TrackerError::from(err);
                    slot.mutations.fail_create(&mut slot.store, ticket, &err);
                    return Err(err);
                }
            }
        };

        if T::NOTIFIES {
            self.notify(&user, T::KIND, &label, "created").await;
        }
        Ok(id)
    }

    /// Merge `patch` optimistically.
    pub async fn update<T: Tracked>(&self, id: &RecordId, patch: &T::Patch) -> Result<Resolution>
    where
        S: RemoteCollection<T>,
    {
        let user = self.identity.current_user()?;
        let ticket = {
            let mut state = self.state.borrow_mut();
            let slot = T::slot_mut(&mut state);
            slot.mutations.begin_update(&mut slot.store, id, patch, &user)?
        };

        // Confirmed ids display as the raw remote id.
        let remote_id = ticket.id().to_string();
        let result = RemoteCollection::<T>::update(&self.remote, &remote_id, patch, &user)
            .instrument(info_span!("remote", op = "update", kind = %T::KIND, id = %remote_id))
            .await;

        let (resolution, label) = {
            let mut state = self.state.borrow_mut();
            let slot = T::slot_mut(&mut state);
            match result {
                Ok(record) => {
                    let label = record.label().to_string();
                    (slot.mutations.confirm_update(&mut slot.store, ticket, record), label)
                }
                Err(err) => {
                    let err = TrackerError::from(err);
                    slot.mutations.fail_update(&mut slot.store, ticket, &err);
                    return Err(err);
                }
            }
        };

        if T::NOTIFIES {
            self.notify(&user, T::KIND, &label, "updated").await;
        }
        Ok(resolution)
    }

    /// Remove a record optimistically. A failed delete re-fetches the
    /// collection before reporting the error.
    pub async fn delete<T: Tracked>(&self, id: &RecordId) -> Result<()>
    where
        S: RemoteCollection<T>,
    {
        let user = self.identity.current_user()?;
        let ticket = {
            let mut state = self.state.borrow_mut();
            let slot = T::slot_mut(&mut state);
            slot.mutations.begin_delete(&mut slot.store, id, &user)?
        };

        let remote_id = ticket.id().to_string();
        let label = ticket.removed().label().to_string();
        let result = RemoteCollection::<T>::delete(&self.remote, &remote_id)
            .instrument(info_span!("remote", op = "delete", kind = %T::KIND, id = %remote_id))
            .await;

        let recovery = {
            let mut state = self.state.borrow_mut();
            let slot = T::slot_mut(&mut state);
            match result {
                Ok(()) => {
                    slot.mutations.confirm_delete(&mut slot.store, ticket);
                    None
                }
                Err(err) => {
                    let err = TrackerError::from(err);
                    let recovery = slot.mutations.fail_delete(&mut slot.store, ticket, &err);
                    Some((recovery, err))
                }
            }
        };

        match recovery {
            None => {
                if T::NOTIFIES {
                    self.notify(&user, T::KIND, &label, "deleted").await;
                }
                Ok(())
            }
            Some((Recovery::Refetch, err)) => {
                if let Err(refetch_err) = self.fetch::<T>().await {
                    warn!(kind = %T::KIND, error = %refetch_err, "refetch after failed delete also failed");
                }
                Err(err)
            }
        }
    }

    /// Best-effort notification to the actor. Failures are logged only.
    async fn notify(&self, user: &User, kind: EntityKind, label: &str, verb: &str) {
        let draft = NotificationDraft {
            message: format!("{} \"{}\" {}!", kind.title(), label, verb),
            user_id: user.id.clone(),
        };
        let result = RemoteCollection::<Notification>::create(&self.remote, &draft, user)
            .instrument(info_span!("remote", op = "create", kind = %EntityKind::Notification))
            .await;
        match result {
            Ok(notification) => {
                debug!(message = %notification.message, "notification created");
                self.state.borrow_mut().notifications.store.upsert(notification);
            }
            Err(err) => warn!(%kind, error = %err, "notification side effect failed"),
        }
    }

    // ==================== Notifications ====================

    pub async fn mark_read(&self, id: &RecordId) -> Result<Resolution> {
        self.update::<Notification>(id, &NotificationPatch::mark_read())
            .await
    }

    /// Mark every unread notification. Each is independent; the first error
    /// is reported after all were attempted.
    pub async fn mark_all_read(&self) -> Result<usize> {
        let unread: Vec<RecordId> = self
            .state
            .borrow()
            .notifications
            .store
            .list()
            .iter()
            .filter(|n| !n.read && !n.id.is_provisional())
            .map(|n| n.id.clone())
            .collect();

        let mut marked = 0;
        let mut first_err = None;
        for id in &unread {
            match self.mark_read(id).await {
                Ok(_) => marked += 1,
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(marked),
        }
    }

    pub async fn delete_notification(&self, id: &RecordId) -> Result<()> {
        self.delete::<Notification>(id).await
    }

    pub fn unread_count(&self) -> usize {
        self.state
            .borrow()
            .notifications
            .store
            .list()
            .iter()
            .filter(|n| !n.read)
            .count()
    }

    // ==================== Comments ====================

    pub async fn add_comment(
        &self,
        target: &CommentTarget,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<Comment> {
        let user = self.identity.current_user()?;
        let draft = CommentDraft {
            target: target.clone(),
            text: text.trim().to_string(),
            parent_id: reply_to.map(str::to_string),
        };
        draft.validate()?;

        let comment = self
            .remote
            .add_comment(&draft, &user)
            .instrument(info_span!("remote", op = "create", kind = %EntityKind::Comment))
            .await?;

        if let Some(thread) = self.state.borrow_mut().threads.get_mut(target) {
            thread.push(comment.clone());
        }
        info!(id = %comment.id, %target, "comment added");
        Ok(comment)
    }

    /// Load the thread on `target` and return it as a forest.
    pub async fn load_thread(&self, target: &CommentTarget) -> Result<Vec<CommentNode>> {
        let comments = self
            .remote
            .list_comments(target)
            .instrument(info_span!("remote", op = "list", kind = %EntityKind::Comment))
            .await?;
        let forest = build_forest(&comments);
        self.state.borrow_mut().threads.insert(target.clone(), comments);
        Ok(forest)
    }

    /// The cached thread on `target`, empty if never loaded.
    pub fn thread(&self, target: &CommentTarget) -> Vec<CommentNode> {
        self.state
            .borrow()
            .threads
            .get(target)
            .map(|comments| build_forest(comments))
            .unwrap_or_default()
    }

    /// Delete comment `id` and all of its replies. Only the comment's owner
    /// may do this. Returns how many comments were removed.
    pub async fn delete_comment(&self, target: &CommentTarget, id: &str) -> Result<usize> {
        let user = self.identity.current_user()?;
        if !self.state.borrow().threads.contains_key(target) {
            self.load_thread(target).await?;
        }

        let doomed = {
            let state = self.state.borrow();
            let comments = state.threads.get(target).map(Vec::as_slice).unwrap_or(&[]);
            let comment = comments
                .iter()
                .find(|c| c.id == id)
                .ok_or_else(|| TrackerError::NotFound(format!("comment {}", id)))?;
            if comment.owner_id != user.id {
                return Err(TrackerError::NotAuthorized(format!(
                    "only the author can delete comment {}",
                    id
                )));
            }
            subtree_ids(comments, id)
        };

        let mut first_err = None;
        let mut deleted = 0;
        for comment_id in &doomed {
            let result = self
                .remote
                .delete_comment(comment_id)
                .instrument(info_span!("remote", op = "delete", kind = %EntityKind::Comment, id = %comment_id))
                .await;
            match result {
                Ok(()) => {
                    deleted += 1;
                    if let Some(thread) = self.state.borrow_mut().threads.get_mut(target) {
                        thread.retain(|c| &c.id != comment_id);
                    }
                }
                Err(err) => {
                    warn!(id = %comment_id, error = %err, "comment delete failed");
                    first_err.get_or_insert(TrackerError::from(err));
                }
            }
        }

        match first_err {
            None => {
                info!(id, count = deleted, "comment thread deleted");
                Ok(deleted)
            }
            Some(err) => {
                if let Err(reload_err) = self.load_thread(target).await {
                    warn!(%target, error = %reload_err, "thread reload failed");
                }
                Err(err)
            }
        }
    }

    // ==================== Realtime ====================

    /// Subscribe to every kind the signed-in user can see.
    pub fn subscribe(&self, channel: &impl EventChannel) -> Result<Subscription> {
        let user = self.identity.current_user()?;
        Ok(channel.subscribe(Scope::everything(user.id)))
    }

    /// Fold one channel message. A reconnect re-fetches every collection
    /// in scope, since events missed while disconnected are gone.
    pub async fn apply(&self, scope: &Scope, message: ChannelMessage) -> Result<Option<Folded>> {
        let reconciler = Reconciler::new(scope.clone());
        match message {
            ChannelMessage::Event(event) => {
                let mut state = self.state.borrow_mut();
                let folded = match event.kind {
                    EntityKind::Task => {
                        let slot = &mut state.tasks;
                        reconciler.fold(&mut slot.store, &mut slot.mutations, &event)
                    }
                    EntityKind::Project => {
                        let slot = &mut state.projects;
                        reconciler.fold(&mut slot.store, &mut slot.mutations, &event)
                    }
                    EntityKind::Notification => {
                        let slot = &mut state.notifications;
                        reconciler.fold(&mut slot.store, &mut slot.mutations, &event)
                    }
                    EntityKind::Comment => Folded::Discarded(Discard::OutOfScope),
                };
                Ok(Some(folded))
            }
            ChannelMessage::Disconnected => {
                warn!(user = %scope.user_id, "realtime channel disconnected");
                Ok(None)
            }
            ChannelMessage::Reconnected => {
                info!(user = %scope.user_id, "realtime channel reconnected, resyncing");
                self.fetch_scope(scope).await?;
                Ok(None)
            }
        }
    }

    /// Apply every message already delivered to `subscription`.
    pub async fn drain(&self, subscription: &mut Subscription) -> Result<usize> {
        let scope = subscription.scope().clone();
        let mut applied = 0;
        while let Some(message) = subscription.try_recv() {
            self.apply(&scope, message).await?;
            applied += 1;
        }
        debug!(applied, "realtime messages drained");
        Ok(applied)
    }

    /// Wait for one message and apply it. `false` once the channel closed.
    pub async fn pump(&self, subscription: &mut Subscription) -> Result<bool> {
        let scope = subscription.scope().clone();
        match subscription.recv().await {
            Some(message) => {
                self.apply(&scope, message).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ==================== Views ====================

    pub fn get<T: Tracked>(&self, id: &RecordId) -> Option<T> {
        T::slot(&self.state.borrow()).store.get(id).cloned()
    }

    pub fn list<T: Tracked>(&self) -> Vec<T> {
        T::slot(&self.state.borrow()).store.list().to_vec()
    }

    pub fn status<T: Tracked>(&self) -> RequestStatus {
        T::slot(&self.state.borrow()).store.status()
    }

    pub fn watch<T: Tracked>(&self) -> broadcast::Receiver<StoreChange> {
        T::slot(&self.state.borrow()).store.subscribe()
    }

    /// Tasks newest first, optionally filtered by a case-insensitive title
    /// search.
    pub fn task_view(&self, search: Option<&str>) -> Vec<Task> {
        let needle = search_needle(search);
        let mut tasks: Vec<Task> = self
            .list::<Task>()
            .into_iter()
            .filter(|t| matches_search(&t.title, needle.as_deref()))
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// Projects newest first, optionally filtered by a case-insensitive name
    /// search.
    pub fn project_view(&self, search: Option<&str>) -> Vec<Project> {
        let needle = search_needle(search);
        let mut projects: Vec<Project> = self
            .list::<Project>()
            .into_iter()
            .filter(|p| matches_search(&p.name, needle.as_deref()))
            .collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        projects
    }

    pub fn notification_view(&self) -> Vec<Notification> {
        let mut notifications = self.list::<Notification>();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        notifications
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.borrow();
        Snapshot {
            tasks: state.tasks.store.list().to_vec(),
            projects: state.projects.store.list().to_vec(),
            notifications: state.notifications.store.list().to_vec(),
            comments: state.threads.values().flatten().cloned().collect(),
        }
    }
}

fn search_needle(search: Option<&str>) -> Option<String> {
    search.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty())
}

fn matches_search(text: &str, needle: Option<&str>) -> bool {
    needle.map_or(true, |needle| text.to_lowercase().contains(needle))
}
