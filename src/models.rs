use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TrackerError};

/// Locally issued handle for a record the remote store has not confirmed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(pub u64);

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "temp-{}", self.0)
    }
}

/// Identity of a record in a store.
///
/// A provisional id can never equal a confirmed one, even when their string
/// forms coincide: the distinction lives in the variant, not in a prefix.
/// Anything decoded from the wire is `Confirmed`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecordId {
    Provisional(TempId),
    Confirmed(String),
}

impl RecordId {
    pub fn confirmed(id: impl Into<String>) -> Self {
        RecordId::Confirmed(id.into())
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, RecordId::Provisional(_))
    }

    pub fn as_confirmed(&self) -> Option<&str> {
        match self {
            RecordId::Confirmed(id) => Some(id),
            RecordId::Provisional(_) => None,
        }
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        RecordId::Confirmed(id)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        RecordId::Confirmed(id.to_string())
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Provisional(temp) => temp.fmt(f),
            RecordId::Confirmed(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Task,
    Project,
    Notification,
    Comment,
}

impl EntityKind {
    /// Capitalized name used in notification messages.
    pub fn title(&self) -> &'static str {
        match self {
            EntityKind::Task => "Task",
            EntityKind::Project => "Project",
            EntityKind::Notification => "Notification",
            EntityKind::Comment => "Comment",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            EntityKind::Task => "task",
            EntityKind::Project => "project",
            EntityKind::Notification => "notification",
            EntityKind::Comment => "comment",
        };
        f.write_str(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub const VALID: [&'static str; 3] = ["pending", "in-progress", "completed"];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Completed => "completed",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in-progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(TrackerError::Validation(format!(
                "invalid task status '{}'. Must be one of: {}",
                other,
                Self::VALID.join(", ")
            ))),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

impl ProjectStatus {
    pub const VALID: [&'static str; 3] = ["not-started", "in-progress", "completed"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::NotStarted => "not-started",
            ProjectStatus::InProgress => "in-progress",
            ProjectStatus::Completed => "completed",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "not-started" => Ok(ProjectStatus::NotStarted),
            "in-progress" => Ok(ProjectStatus::InProgress),
            "completed" => Ok(ProjectStatus::Completed),
            other => Err(TrackerError::Validation(format!(
                "invalid project status '{}'. Must be one of: {}",
                other,
                Self::VALID.join(", ")
            ))),
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The signed-in identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl User {
    /// Name shown as author: the user's name, else email, else id.
    pub fn display_name(&self) -> &str {
        if !self.name.trim().is_empty() {
            &self.name
        } else if !self.email.trim().is_empty() {
            &self.email
        } else {
            &self.id
        }
    }
}

/// Author label stamped on records created locally before confirmation.
pub const PROVISIONAL_AUTHOR: &str = "You";

/// Common contract for the record kinds kept in an entity store.
pub trait Entity:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: EntityKind;

    /// User input for a create.
    type Draft: fmt::Debug + Send + Sync;
    /// Partial field set for an update; `None` fields are retained.
    type Patch: fmt::Debug + Clone + Send + Sync;

    fn id(&self) -> &RecordId;
    fn set_id(&mut self, id: RecordId);
    fn owner_id(&self) -> &str;
    /// Human label used in messages (title, name or message text).
    fn label(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;

    fn validate_draft(draft: &Self::Draft) -> Result<()>;
    fn validate_patch(patch: &Self::Patch) -> Result<()>;

    /// Build the tentative record shown while the create is in flight.
    fn provisional(id: TempId, draft: &Self::Draft, author: &User, now: DateTime<Utc>) -> Self;

    /// Merge the patch over this record.
    fn merge(&mut self, patch: &Self::Patch);

    /// Whether a realtime payload for this record belongs in `user_id`'s view.
    fn visible_to(&self, _user_id: &str) -> bool {
        true
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TrackerError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: RecordId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub owner_id: String,
    pub created_by: String,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub due_date: Option<DateTime<Utc>>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<DateTime<Utc>>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.due_date.is_none()
    }
}

impl Entity for Task {
    const KIND: EntityKind = EntityKind::Task;
    type Draft = TaskDraft;
    type Patch = TaskPatch;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn label(&self) -> &str {
        &self.title
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate_draft(draft: &TaskDraft) -> Result<()> {
        require("title", &draft.title)
    }

    fn validate_patch(patch: &TaskPatch) -> Result<()> {
        if patch.is_empty() {
            return Err(TrackerError::Validation("nothing to update".to_string()));
        }
        match &patch.title {
            Some(title) => require("title", title),
            None => Ok(()),
        }
    }

    fn provisional(id: TempId, draft: &TaskDraft, author: &User, now: DateTime<Utc>) -> Self {
        Task {
            id: RecordId::Provisional(id),
            title: draft.title.trim().to_string(),
            description: draft.description.trim().to_string(),
            status: draft.status,
            due_date: draft.due_date,
            owner_id: author.id.clone(),
            created_by: PROVISIONAL_AUTHOR.to_string(),
            updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn merge(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.trim().to_string();
        }
        if let Some(description) = &patch.description {
            self.description = description.trim().to_string();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: ProjectStatus,
    pub owner_id: String,
    pub created_by: String,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectDraft {
    pub name: String,
    pub description: String,
    pub deadline: Option<DateTime<Utc>>,
    pub status: ProjectStatus,
}

impl ProjectDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,
}

impl ProjectPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.deadline.is_none()
            && self.status.is_none()
    }
}

impl Entity for Project {
    const KIND: EntityKind = EntityKind::Project;
    type Draft = ProjectDraft;
    type Patch = ProjectPatch;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn label(&self) -> &str {
        &self.name
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate_draft(draft: &ProjectDraft) -> Result<()> {
        require("name", &draft.name)
    }

    fn validate_patch(patch: &ProjectPatch) -> Result<()> {
        if patch.is_empty() {
            return Err(TrackerError::Validation("nothing to update".to_string()));
        }
        match &patch.name {
            Some(name) => require("name", name),
            None => Ok(()),
        }
    }

    fn provisional(id: TempId, draft: &ProjectDraft, author: &User, now: DateTime<Utc>) -> Self {
        Project {
            id: RecordId::Provisional(id),
            name: draft.name.trim().to_string(),
            description: draft.description.trim().to_string(),
            deadline: draft.deadline,
            status: draft.status,
            owner_id: author.id.clone(),
            created_by: PROVISIONAL_AUTHOR.to_string(),
            updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn merge(&mut self, patch: &ProjectPatch) {
        if let Some(name) = &patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(description) = &patch.description {
            self.description = description.trim().to_string();
        }
        if let Some(deadline) = patch.deadline {
            self.deadline = deadline;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: RecordId,
    pub message: String,
    /// Addressee; also the owner.
    pub user_id: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    pub message: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
}

impl NotificationPatch {
    pub fn mark_read() -> Self {
        Self { read: Some(true) }
    }
}

impl Entity for Notification {
    const KIND: EntityKind = EntityKind::Notification;
    type Draft = NotificationDraft;
    type Patch = NotificationPatch;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn owner_id(&self) -> &str {
        &self.user_id
    }

    fn label(&self) -> &str {
        &self.message
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate_draft(draft: &NotificationDraft) -> Result<()> {
        require("message", &draft.message)?;
        require("user id", &draft.user_id)
    }

    fn validate_patch(patch: &NotificationPatch) -> Result<()> {
        if patch.read.is_none() {
            return Err(TrackerError::Validation("nothing to update".to_string()));
        }
        Ok(())
    }

    fn provisional(id: TempId, draft: &NotificationDraft, _author: &User, now: DateTime<Utc>) -> Self {
        Notification {
            id: RecordId::Provisional(id),
            message: draft.message.clone(),
            user_id: draft.user_id.clone(),
            read: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn merge(&mut self, patch: &NotificationPatch) {
        if let Some(read) = patch.read {
            self.read = read;
        }
    }

    fn visible_to(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

/// What a comment thread hangs off.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum CommentTarget {
    Task(String),
    Project(String),
}

impl CommentTarget {
    pub fn kind(&self) -> EntityKind {
        match self {
            CommentTarget::Task(_) => EntityKind::Task,
            CommentTarget::Project(_) => EntityKind::Project,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            CommentTarget::Task(id) | CommentTarget::Project(id) => id,
        }
    }
}

impl fmt::Display for CommentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub target: CommentTarget,
    /// `None` marks a root comment.
    pub parent_id: Option<String>,
    pub author_name: String,
    pub text: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentDraft {
    pub target: CommentTarget,
    pub text: String,
    pub parent_id: Option<String>,
}

impl CommentDraft {
    pub fn validate(&self) -> Result<()> {
        require("comment text", &self.text)?;
        require("target id", self.target.id())
    }
}
