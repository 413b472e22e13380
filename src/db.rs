use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::{RemoteError, RemoteOp};
use crate::models::{
    Comment, CommentDraft, CommentTarget, Entity, EntityKind, Notification, NotificationDraft,
    NotificationPatch, Project, ProjectDraft, ProjectPatch, ProjectStatus, RecordId, Task,
    TaskDraft, TaskPatch, TaskStatus, User,
};
use crate::realtime::{LocalChannel, Operation, RealtimeEvent};
use crate::remote::{CommentStore, ListFilter, RemoteCollection, SortOrder};

const SCHEMA_VERSION: i32 = 1;

type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// SQLite-backed document store. Every successful write is published to the
/// attached channel, the way a hosted store pushes change events.
pub struct Database {
    conn: Mutex<Connection>,
    channel: Option<LocalChannel>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open database")?;
        let db = Database {
            conn: Mutex::new(conn),
            channel: None,
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Publish change events for every write to `channel`.
    pub fn with_channel(mut self, channel: LocalChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock();
        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap_or(0);

        if version < SCHEMA_VERSION {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'pending',
                    due_date TEXT,
                    owner_id TEXT NOT NULL,
                    created_by TEXT NOT NULL,
                    updated_by TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    deadline TEXT,
                    status TEXT NOT NULL DEFAULT 'not-started',
                    owner_id TEXT NOT NULL,
                    created_by TEXT NOT NULL,
                    updated_by TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS notifications (
                    id TEXT PRIMARY KEY,
                    message TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    read INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                -- No foreign key on parent_id: replies may outlive their parent.
                CREATE TABLE IF NOT EXISTS comments (
                    id TEXT PRIMARY KEY,
                    target_kind TEXT NOT NULL,
                    target_id TEXT NOT NULL,
                    parent_id TEXT,
                    author_name TEXT NOT NULL,
                    text TEXT NOT NULL,
                    owner_id TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks(created_at);
                CREATE INDEX IF NOT EXISTS idx_projects_created ON projects(created_at);
                CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id);
                CREATE INDEX IF NOT EXISTS idx_comments_target ON comments(target_kind, target_id);
                "#,
            )?;

            conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;
        }

        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish<T: Entity>(&self, operation: Operation, record: &T) {
        let Some(channel) = &self.channel else {
            return;
        };
        match RealtimeEvent::for_record(operation, record) {
            Ok(event) => channel.publish(event),
            Err(err) => warn!(kind = %T::KIND, error = %err, "could not encode change event"),
        }
    }

    // Tasks
    fn insert_task(&self, draft: &TaskDraft, author: &User) -> rusqlite::Result<Task> {
        let conn = self.lock();
        let id = new_id(&conn)?;
        let now = now();
        conn.execute(
            "INSERT INTO tasks (id, title, description, status, due_date, owner_id, created_by, updated_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8, ?8)",
            params![
                id,
                draft.title.trim(),
                draft.description.trim(),
                draft.status.as_str(),
                draft.due_date.map(format_datetime),
                author.id,
                author.display_name(),
                format_datetime(now),
            ],
        )?;
        select_task(&conn, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    fn patch_task(&self, id: &str, patch: &TaskPatch, author: &User) -> rusqlite::Result<Option<Task>> {
        let conn = self.lock();
        let Some(mut task) = select_task(&conn, id)? else {
            return Ok(None);
        };
        task.merge(patch);
        task.updated_by = Some(author.display_name().to_string());
        task.updated_at = now();
        conn.execute(
            "UPDATE tasks SET title = ?1, description = ?2, status = ?3, due_date = ?4, updated_by = ?5, updated_at = ?6 WHERE id = ?7",
            params![
                task.title,
                task.description,
                task.status.as_str(),
                task.due_date.map(format_datetime),
                task.updated_by,
                format_datetime(task.updated_at),
                id,
            ],
        )?;
        Ok(Some(task))
    }

    fn list_tasks(&self, filter: &ListFilter) -> rusqlite::Result<Vec<Task>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT id, title, description, status, due_date, owner_id, created_by, updated_by, created_at, updated_at
             FROM tasks WHERE (?1 IS NULL OR owner_id = ?1) ORDER BY {}",
            order_clause(filter.order)
        );
        let mut stmt = conn.prepare(&sql)?;
        let tasks = stmt
            .query_map([filter.owner_id.as_deref()], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    // Projects
    fn insert_project(&self, draft: &ProjectDraft, author: &User) -> rusqlite::Result<Project> {
        let conn = self.lock();
        let id = new_id(&conn)?;
        let now = now();
        conn.execute(
            "INSERT INTO projects (id, name, description, deadline, status, owner_id, created_by, updated_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8, ?8)",
            params![
                id,
                draft.name.trim(),
                draft.description.trim(),
                draft.deadline.map(format_datetime),
                draft.status.as_str(),
                author.id,
                author.display_name(),
                format_datetime(now),
            ],
        )?;
        select_project(&conn, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    fn patch_project(
        &self,
        id: &str,
        patch: &ProjectPatch,
        author: &User,
    ) -> rusqlite::Result<Option<Project>> {
        let conn = self.lock();
        let Some(mut project) = select_project(&conn, id)? else {
            return Ok(None);
        };
        project.merge(patch);
        project.updated_by = Some(author.display_name().to_string());
        project.updated_at = now();
        conn.execute(
            "UPDATE projects SET name = ?1, description = ?2, deadline = ?3, status = ?4, updated_by = ?5, updated_at = ?6 WHERE id = ?7",
            params![
                project.name,
                project.description,
                project.deadline.map(format_datetime),
                project.status.as_str(),
                project.updated_by,
                format_datetime(project.updated_at),
                id,
            ],
        )?;
        Ok(Some(project))
    }

    fn list_projects(&self, filter: &ListFilter) -> rusqlite::Result<Vec<Project>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT id, name, description, deadline, status, owner_id, created_by, updated_by, created_at, updated_at
             FROM projects WHERE (?1 IS NULL OR owner_id = ?1) ORDER BY {}",
            order_clause(filter.order)
        );
        let mut stmt = conn.prepare(&sql)?;
        let projects = stmt
            .query_map([filter.owner_id.as_deref()], project_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(projects)
    }

    // Notifications
    fn insert_notification(&self, draft: &NotificationDraft) -> rusqlite::Result<Notification> {
        let conn = self.lock();
        let id = new_id(&conn)?;
        let now = format_datetime(now());
        conn.execute(
            "INSERT INTO notifications (id, message, user_id, read, created_at, updated_at) VALUES (?1, ?2, ?3, 0, ?4, ?4)",
            params![id, draft.message, draft.user_id, now],
        )?;
        select_notification(&conn, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    fn patch_notification(&self, id: &str, patch: &NotificationPatch) -> rusqlite::Result<Option<Notification>> {
        let conn = self.lock();
        let Some(mut notification) = select_notification(&conn, id)? else {
            return Ok(None);
        };
        notification.merge(patch);
        notification.updated_at = now();
        conn.execute(
            "UPDATE notifications SET read = ?1, updated_at = ?2 WHERE id = ?3",
            params![notification.read, format_datetime(notification.updated_at), id],
        )?;
        Ok(Some(notification))
    }

    fn list_notifications(&self, filter: &ListFilter) -> rusqlite::Result<Vec<Notification>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT id, message, user_id, read, created_at, updated_at
             FROM notifications WHERE (?1 IS NULL OR user_id = ?1) ORDER BY {}",
            order_clause(filter.order)
        );
        let mut stmt = conn.prepare(&sql)?;
        let notifications = stmt
            .query_map([filter.owner_id.as_deref()], notification_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notifications)
    }

    // Comments
    fn insert_comment(&self, draft: &CommentDraft, author: &User) -> rusqlite::Result<Comment> {
        let conn = self.lock();
        let id = new_id(&conn)?;
        let (kind, target_id) = target_columns(&draft.target);
        conn.execute(
            "INSERT INTO comments (id, target_kind, target_id, parent_id, author_name, text, owner_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                kind,
                target_id,
                draft.parent_id,
                author.display_name(),
                draft.text,
                author.id,
                format_datetime(now()),
            ],
        )?;
        let comment = conn.query_row(
            "SELECT id, target_kind, target_id, parent_id, author_name, text, owner_id, created_at FROM comments WHERE id = ?1",
            [&id],
            comment_from_row,
        )?;
        Ok(comment)
    }

    fn comments_for(&self, target: &CommentTarget) -> rusqlite::Result<Vec<Comment>> {
        let conn = self.lock();
        let (kind, target_id) = target_columns(target);
        let mut stmt = conn.prepare(
            "SELECT id, target_kind, target_id, parent_id, author_name, text, owner_id, created_at
             FROM comments WHERE target_kind = ?1 AND target_id = ?2 ORDER BY created_at ASC, rowid ASC",
        )?;
        let comments = stmt
            .query_map(params![kind, target_id], comment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(comments)
    }

    fn delete_row(&self, table: &str, id: &str) -> rusqlite::Result<bool> {
        let rows = self
            .lock()
            .execute(&format!("DELETE FROM {} WHERE id = ?1", table), [id])?;
        Ok(rows > 0)
    }

    fn fetch_one<T>(
        &self,
        select: fn(&Connection, &str) -> rusqlite::Result<Option<T>>,
        id: &str,
    ) -> rusqlite::Result<Option<T>> {
        select(&self.lock(), id)
    }
}

fn table_for(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Task => "tasks",
        EntityKind::Project => "projects",
        EntityKind::Notification => "notifications",
        EntityKind::Comment => "comments",
    }
}

fn remote_err(op: RemoteOp, kind: EntityKind) -> impl Fn(rusqlite::Error) -> RemoteError {
    move |err| RemoteError::new(op, kind, err.to_string())
}

fn not_found(op: RemoteOp, kind: EntityKind, id: &str) -> RemoteError {
    RemoteError::new(op, kind, format!("document {} not found", id))
}

/// Shared delete path: read the row for the event payload, delete, publish.
fn delete_document<T: Entity>(
    db: &Database,
    select: fn(&Connection, &str) -> rusqlite::Result<Option<T>>,
    id: &str,
) -> RemoteResult<()> {
    let err = remote_err(RemoteOp::Delete, T::KIND);
    let existing = db.fetch_one(select, id).map_err(&err)?;
    let Some(existing) = existing else {
        return Err(not_found(RemoteOp::Delete, T::KIND, id));
    };
    if !db.delete_row(table_for(T::KIND), id).map_err(&err)? {
        return Err(not_found(RemoteOp::Delete, T::KIND, id));
    }
    debug!(kind = %T::KIND, id, "document deleted");
    db.publish(Operation::Delete, &existing);
    Ok(())
}

#[async_trait]
impl RemoteCollection<Task> for Database {
    async fn create(&self, draft: &TaskDraft, author: &User) -> RemoteResult<Task> {
        let task = self
            .insert_task(draft, author)
            .map_err(remote_err(RemoteOp::Create, EntityKind::Task))?;
        self.publish(Operation::Create, &task);
        Ok(task)
    }

    async fn update(&self, id: &str, patch: &TaskPatch, author: &User) -> RemoteResult<Task> {
        let task = self
            .patch_task(id, patch, author)
            .map_err(remote_err(RemoteOp::Update, EntityKind::Task))?
            .ok_or_else(|| not_found(RemoteOp::Update, EntityKind::Task, id))?;
        self.publish(Operation::Update, &task);
        Ok(task)
    }

    async fn delete(&self, id: &str) -> RemoteResult<()> {
        delete_document::<Task>(self, select_task, id)
    }

    async fn list(&self, filter: &ListFilter) -> RemoteResult<Vec<Task>> {
        self.list_tasks(filter)
            .map_err(remote_err(RemoteOp::List, EntityKind::Task))
    }
}

#[async_trait]
impl RemoteCollection<Project> for Database {
    async fn create(&self, draft: &ProjectDraft, author: &User) -> RemoteResult<Project> {
        let project = self
            .insert_project(draft, author)
            .map_err(remote_err(RemoteOp::Create, EntityKind::Project))?;
        self.publish(Operation::Create, &project);
        Ok(project)
    }

    async fn update(&self, id: &str, patch: &ProjectPatch, author: &User) -> RemoteResult<Project> {
        let project = self
            .patch_project(id, patch, author)
            .map_err(remote_err(RemoteOp::Update, EntityKind::Project))?
            .ok_or_else(|| not_found(RemoteOp::Update, EntityKind::Project, id))?;
        self.publish(Operation::Update, &project);
        Ok(project)
    }

    async fn delete(&self, id: &str) -> RemoteResult<()> {
        delete_document::<Project>(self, select_project, id)
    }

    async fn list(&self, filter: &ListFilter) -> RemoteResult<Vec<Project>> {
        self.list_projects(filter)
            .map_err(remote_err(RemoteOp::List, EntityKind::Project))
    }
}

#[async_trait]
impl RemoteCollection<Notification> for Database {
    async fn create(&self, draft: &NotificationDraft, _author: &User) -> RemoteResult<Notification> {
        let notification = self
            .insert_notification(draft)
            .map_err(remote_err(RemoteOp::Create, EntityKind::Notification))?;
        self.publish(Operation::Create, &notification);
        Ok(notification)
    }

    async fn update(&self, id: &str, patch: &NotificationPatch, _author: &User) -> RemoteResult<Notification> {
        let notification = self
            .patch_notification(id, patch)
            .map_err(remote_err(RemoteOp::Update, EntityKind::Notification))?
            .ok_or_else(|| not_found(RemoteOp::Update, EntityKind::Notification, id))?;
        self.publish(Operation::Update, &notification);
        Ok(notification)
    }

    async fn delete(&self, id: &str) -> RemoteResult<()> {
        delete_document::<Notification>(self, select_notification, id)
    }

    async fn list(&self, filter: &ListFilter) -> RemoteResult<Vec<Notification>> {
        self.list_notifications(filter)
            .map_err(remote_err(RemoteOp::List, EntityKind::Notification))
    }
}

#[async_trait]
impl CommentStore for Database {
    async fn add_comment(&self, draft: &CommentDraft, author: &User) -> RemoteResult<Comment> {
        self.insert_comment(draft, author)
            .map_err(remote_err(RemoteOp::Create, EntityKind::Comment))
    }

    async fn list_comments(&self, target: &CommentTarget) -> RemoteResult<Vec<Comment>> {
        self.comments_for(target)
            .map_err(remote_err(RemoteOp::List, EntityKind::Comment))
    }

    async fn delete_comment(&self, id: &str) -> RemoteResult<()> {
        let deleted = self
            .delete_row(table_for(EntityKind::Comment), id)
            .map_err(remote_err(RemoteOp::Delete, EntityKind::Comment))?;
        if !deleted {
            return Err(not_found(RemoteOp::Delete, EntityKind::Comment, id));
        }
        Ok(())
    }
}

/// Fresh document id: 20 lowercase hex chars.
fn new_id(conn: &Connection) -> rusqlite::Result<String> {
    conn.query_row("SELECT lower(hex(randomblob(10)))", [], |row| row.get(0))
}

fn order_clause(order: SortOrder) -> &'static str {
    match order {
        SortOrder::CreatedAsc => "created_at ASC, rowid ASC",
        SortOrder::CreatedDesc => "created_at DESC, rowid DESC",
    }
}

fn target_columns(target: &CommentTarget) -> (&'static str, &str) {
    match target {
        CommentTarget::Task(id) => ("task", id),
        CommentTarget::Project(id) => ("project", id),
    }
}

fn select_task(conn: &Connection, id: &str) -> rusqlite::Result<Option<Task>> {
    conn.query_row(
        "SELECT id, title, description, status, due_date, owner_id, created_by, updated_by, created_at, updated_at FROM tasks WHERE id = ?1",
        [id],
        task_from_row,
    )
    .optional()
}

fn select_project(conn: &Connection, id: &str) -> rusqlite::Result<Option<Project>> {
    conn.query_row(
        "SELECT id, name, description, deadline, status, owner_id, created_by, updated_by, created_at, updated_at FROM projects WHERE id = ?1",
        [id],
        project_from_row,
    )
    .optional()
}

fn select_notification(conn: &Connection, id: &str) -> rusqlite::Result<Option<Notification>> {
    conn.query_row(
        "SELECT id, message, user_id, read, created_at, updated_at FROM notifications WHERE id = ?1",
        [id],
        notification_from_row,
    )
    .optional()
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: RecordId::Confirmed(row.get(0)?),
        title: row.get(1)?,
        description: row.get(2)?,
        status: row
            .get::<_, String>(3)?
            .parse::<TaskStatus>()
            .unwrap_or_default(),
        due_date: row.get::<_, Option<String>>(4)?.map(parse_datetime),
        owner_id: row.get(5)?,
        created_by: row.get(6)?,
        updated_by: row.get(7)?,
        created_at: parse_datetime(row.get::<_, String>(8)?),
        updated_at: parse_datetime(row.get::<_, String>(9)?),
    })
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: RecordId::Confirmed(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        deadline: row.get::<_, Option<String>>(3)?.map(parse_datetime),
        status: row
            .get::<_, String>(4)?
            .parse::<ProjectStatus>()
            .unwrap_or_default(),
        owner_id: row.get(5)?,
        created_by: row.get(6)?,
        updated_by: row.get(7)?,
        created_at: parse_datetime(row.get::<_, String>(8)?),
        updated_at: parse_datetime(row.get::<_, String>(9)?),
    })
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: RecordId::Confirmed(row.get(0)?),
        message: row.get(1)?,
        user_id: row.get(2)?,
        read: row.get(3)?,
        created_at: parse_datetime(row.get::<_, String>(4)?),
        updated_at: parse_datetime(row.get::<_, String>(5)?),
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    let kind: String = row.get(1)?;
    let target_id: String = row.get(2)?;
    let target = match kind.as_str() {
        "project" => CommentTarget::Project(target_id),
        _ => CommentTarget::Task(target_id),
    };
    Ok(Comment {
        id: row.get(0)?,
        target,
        parent_id: row.get(3)?,
        author_name: row.get(4)?,
        text: row.get(5)?,
        owner_id: row.get(6)?,
        created_at: parse_datetime(row.get::<_, String>(7)?),
    })
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
