//! Collaborator interfaces: the remote document store and identity service.
//!
//! Implementations can be a network client, SQLite (see `db`), or a test
//! double.

use async_trait::async_trait;

use crate::error::{RemoteError, Result, TrackerError};
use crate::models::{Comment, CommentDraft, CommentTarget, Entity, Notification, Project, Task, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    CreatedAsc,
    CreatedDesc,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Only records owned by (addressed to) this user.
    pub owner_id: Option<String>,
    pub order: SortOrder,
}

impl ListFilter {
    pub fn owned_by(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Default::default()
        }
    }

    pub fn newest_first(mut self) -> Self {
        self.order = SortOrder::CreatedDesc;
        self
    }
}

/// CRUD over one entity kind's remote collection.
///
/// `author` is the session the call is made under; the store stamps
/// ownership and display names from it.
#[async_trait]
pub trait RemoteCollection<T: Entity>: Send + Sync {
    async fn create(&self, draft: &T::Draft, author: &User) -> std::result::Result<T, RemoteError>;

    async fn update(&self, id: &str, patch: &T::Patch, author: &User) -> std::result::Result<T, RemoteError>;

    async fn delete(&self, id: &str) -> std::result::Result<(), RemoteError>;

    async fn list(&self, filter: &ListFilter) -> std::result::Result<Vec<T>, RemoteError>;
}

/// Comment threads. Comments are not kept in an entity store; threads are
/// loaded per target and rebuilt into a forest.
#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn add_comment(&self, draft: &CommentDraft, author: &User) -> std::result::Result<Comment, RemoteError>;

    /// Comments on `target`, oldest first.
    async fn list_comments(&self, target: &CommentTarget) -> std::result::Result<Vec<Comment>, RemoteError>;

    async fn delete_comment(&self, id: &str) -> std::result::Result<(), RemoteError>;
}

/// Everything the tracker needs from the remote side.
pub trait DocumentStore:
    RemoteCollection<Task> + RemoteCollection<Project> + RemoteCollection<Notification> + CommentStore
{
}

impl<S> DocumentStore for S where
    S: RemoteCollection<Task> + RemoteCollection<Project> + RemoteCollection<Notification> + CommentStore
{
}

pub trait IdentityProvider {
    fn current_user(&self) -> Result<User>;
}

/// Identity fixed at construction, e.g. loaded from a cached session.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user: Option<User>,
}

impl StaticIdentity {
    pub fn signed_in(user: User) -> Self {
        Self { user: Some(user) }
    }

    pub fn anonymous() -> Self {
        Self { user: None }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Result<User> {
        self.user.clone().ok_or(TrackerError::Unauthenticated)
    }
}
